// SPDX-License-Identifier: CEPL-1.0
//! Instance, surface, adapter selection and the logical device.

use crate::config::RendererConfig;
use crate::error::{RenderError, Result, VkResultExt};
use crate::swapchain::SwapchainSupport;
use ash::ext::debug_utils;
use ash::khr::{surface, swapchain};
use ash::{vk, Entry, Instance};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle};
use std::ffi::{c_char, c_void, CStr};
use tracing::{debug, error, info, trace, warn};

pub const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";
pub const DEVICE_EXTENSIONS: [&CStr; 1] = [swapchain::NAME];

/// Queue family indices; any of them may alias.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
    pub compute: u32,
}

impl QueueFamilies {
    /// Distinct families, one queue is created for each.
    pub fn unique(&self) -> Vec<u32> {
        let mut v = vec![self.graphics, self.present, self.compute];
        v.sort_unstable();
        v.dedup();
        v
    }

    /// Graphics and compute live in different families, so shared
    /// exclusive resources need ownership transfers.
    pub fn split_compute(&self) -> bool {
        self.graphics != self.compute
    }
}

/// Walks the family table until graphics, compute and present are all
/// covered; a later family overwrites an earlier match for the same role.
pub fn find_queue_families(
    props: &[vk::QueueFamilyProperties],
    mut supports_present: impl FnMut(u32) -> bool,
) -> Option<QueueFamilies> {
    let (mut graphics, mut present, mut compute) = (None, None, None);
    for (i, family) in props.iter().enumerate() {
        let i = i as u32;
        if family.queue_count == 0 {
            continue;
        }
        if family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
            graphics = Some(i);
        }
        if family.queue_flags.contains(vk::QueueFlags::COMPUTE) {
            compute = Some(i);
        }
        if supports_present(i) {
            present = Some(i);
        }
        if let (Some(graphics), Some(present), Some(compute)) = (graphics, present, compute) {
            return Some(QueueFamilies {
                graphics,
                present,
                compute,
            });
        }
    }
    None
}

pub fn missing_extensions<'r>(available: &[&CStr], required: &[&'r CStr]) -> Vec<&'r CStr> {
    required
        .iter()
        .copied()
        .filter(|r| !available.contains(r))
        .collect()
}

pub struct SurfaceContext {
    pub loader: surface::Instance,
    pub handle: vk::SurfaceKHR,
}

struct DebugMessenger {
    loader: debug_utils::Instance,
    handle: vk::DebugUtilsMessengerEXT,
}

/// Everything created before the logical device. Dropping it destroys the
/// surface, the messenger and the instance, in that order, which also
/// covers a failure halfway through device setup.
pub struct InstanceScope {
    entry: Entry,
    instance: Instance,
    debug: Option<DebugMessenger>,
    surface: Option<SurfaceContext>,
}

impl InstanceScope {
    fn create(display: Option<RawDisplayHandle>, validation: bool) -> Result<Self> {
        let entry = unsafe { Entry::load()? };
        let instance = create_instance(&entry, display, validation)?;
        let mut scope = InstanceScope {
            entry,
            instance,
            debug: None,
            surface: None,
        };
        if validation {
            scope.debug = Some(create_debug_messenger(&scope.entry, &scope.instance)?);
        }
        Ok(scope)
    }
}

impl Drop for InstanceScope {
    fn drop(&mut self) {
        unsafe {
            if let Some(s) = self.surface.take() {
                s.loader.destroy_surface(s.handle, None);
            }
            if let Some(d) = self.debug.take() {
                d.loader.destroy_debug_utils_messenger(d.handle, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user: *mut c_void,
) -> vk::Bool32 {
    if data.is_null() {
        return vk::FALSE;
    }
    let p_message = unsafe { (*data).p_message };
    if p_message.is_null() {
        return vk::FALSE;
    }
    let msg = unsafe { CStr::from_ptr(p_message) }.to_string_lossy();
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!("[vulkan] {msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!("[vulkan] {msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        debug!("[vulkan] {msg}");
    } else {
        trace!("[vulkan] {msg}");
    }
    vk::FALSE
}

fn create_debug_messenger(entry: &Entry, instance: &Instance) -> Result<DebugMessenger> {
    let loader = debug_utils::Instance::new(entry, instance);
    let ci = vk::DebugUtilsMessengerCreateInfoEXT {
        s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
        message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
            | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
            | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
            | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        pfn_user_callback: Some(debug_callback),
        ..Default::default()
    };
    let handle = unsafe { loader.create_debug_utils_messenger(&ci, None) }
        .op("vkCreateDebugUtilsMessengerEXT")?;
    Ok(DebugMessenger { loader, handle })
}

fn create_instance(
    entry: &Entry,
    display: Option<RawDisplayHandle>,
    validation: bool,
) -> Result<Instance> {
    let app_name = c"fplus";
    let app_info = vk::ApplicationInfo {
        s_type: vk::StructureType::APPLICATION_INFO,
        p_application_name: app_name.as_ptr(),
        application_version: vk::make_api_version(0, 0, 1, 0),
        p_engine_name: app_name.as_ptr(),
        engine_version: vk::make_api_version(0, 0, 1, 0),
        api_version: vk::API_VERSION_1_0,
        ..Default::default()
    };

    let mut extensions: Vec<*const c_char> = match display {
        Some(dh) => ash_window::enumerate_required_extensions(dh)
            .op("enumerate_required_extensions")?
            .to_vec(),
        None => Vec::new(),
    };

    let mut layers: Vec<*const c_char> = Vec::new();
    if validation {
        let available = unsafe { entry.enumerate_instance_layer_properties() }
            .op("vkEnumerateInstanceLayerProperties")?;
        if !available
            .iter()
            .any(|l| l.layer_name_as_c_str().is_ok_and(|n| n == VALIDATION_LAYER))
        {
            return Err(RenderError::MissingLayer(
                VALIDATION_LAYER.to_string_lossy().into_owned(),
            ));
        }
        let exts = unsafe { entry.enumerate_instance_extension_properties(None) }
            .op("vkEnumerateInstanceExtensionProperties")?;
        if !exts
            .iter()
            .any(|e| e.extension_name_as_c_str().is_ok_and(|n| n == debug_utils::NAME))
        {
            return Err(RenderError::MissingExtension(
                debug_utils::NAME.to_string_lossy().into_owned(),
            ));
        }
        layers.push(VALIDATION_LAYER.as_ptr());
        extensions.push(debug_utils::NAME.as_ptr());
    }

    let create_info = vk::InstanceCreateInfo {
        s_type: vk::StructureType::INSTANCE_CREATE_INFO,
        p_application_info: &app_info,
        enabled_extension_count: extensions.len() as u32,
        pp_enabled_extension_names: extensions.as_ptr(),
        enabled_layer_count: layers.len() as u32,
        pp_enabled_layer_names: layers.as_ptr(),
        ..Default::default()
    };
    unsafe { entry.create_instance(&create_info, None) }.op("vkCreateInstance")
}

/// Returns the families if `phys` can run the renderer, `None` if it is
/// merely unsuitable. Query failures are errors.
fn check_device(
    instance: &Instance,
    phys: vk::PhysicalDevice,
    surface: Option<&SurfaceContext>,
) -> Result<Option<QueueFamilies>> {
    let props = unsafe { instance.get_physical_device_queue_family_properties(phys) };
    let Some(surface) = surface else {
        // Headless: nothing is presented, present aliases graphics.
        return Ok(find_queue_families(&props, |_| true).map(|f| QueueFamilies {
            present: f.graphics,
            ..f
        }));
    };

    let Some(families) = find_queue_families(&props, |i| {
        unsafe { surface.loader.get_physical_device_surface_support(phys, i, surface.handle) }
            .unwrap_or(false)
    }) else {
        return Ok(None);
    };

    let available = unsafe { instance.enumerate_device_extension_properties(phys) }
        .op("vkEnumerateDeviceExtensionProperties")?;
    let names: Vec<&CStr> = available
        .iter()
        .filter_map(|e| e.extension_name_as_c_str().ok())
        .collect();
    let missing = missing_extensions(&names, &DEVICE_EXTENSIONS);
    if !missing.is_empty() {
        debug!("adapter lacks {:?}", missing);
        return Ok(None);
    }

    let support = SwapchainSupport::query(surface, phys)?;
    if !support.is_adequate() {
        debug!("adapter offers no surface formats or present modes");
        return Ok(None);
    }
    Ok(Some(families))
}

/// First suitable adapter wins; there is no scoring.
fn pick_physical_device(
    instance: &Instance,
    surface: Option<&SurfaceContext>,
) -> Result<(vk::PhysicalDevice, QueueFamilies)> {
    let candidates =
        unsafe { instance.enumerate_physical_devices() }.op("vkEnumeratePhysicalDevices")?;
    for phys in candidates {
        if let Some(families) = check_device(instance, phys, surface)? {
            return Ok((phys, families));
        }
    }
    Err(RenderError::NoSuitableDevice)
}

pub struct DeviceContext {
    pub device: ash::Device,
    pub physical: vk::PhysicalDevice,
    pub families: QueueFamilies,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub compute_queue: vk::Queue,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub properties: vk::PhysicalDeviceProperties,
    pub sampler_anisotropy: bool,
    // Dropped after `device` is destroyed in Drop::drop.
    scope: InstanceScope,
}

impl DeviceContext {
    /// Instance, surface for the given window, adapter and logical device.
    pub fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        config: &RendererConfig,
    ) -> Result<Self> {
        let dh = display.display_handle()?.as_raw();
        let wh = window.window_handle()?.as_raw();

        let mut scope = InstanceScope::create(Some(dh), config.validation)?;
        let handle =
            unsafe { ash_window::create_surface(&scope.entry, &scope.instance, dh, wh, None) }
                .op("vkCreateSurfaceKHR")?;
        scope.surface = Some(SurfaceContext {
            loader: surface::Instance::new(&scope.entry, &scope.instance),
            handle,
        });
        Self::finish(scope)
    }

    /// Device without a surface or swapchain; presentation is unavailable.
    pub fn headless(config: &RendererConfig) -> Result<Self> {
        let scope = InstanceScope::create(None, config.validation)?;
        Self::finish(scope)
    }

    fn finish(scope: InstanceScope) -> Result<Self> {
        let instance = &scope.instance;
        let (physical, families) = pick_physical_device(instance, scope.surface.as_ref())?;

        let priorities = [1.0_f32];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = families
            .unique()
            .into_iter()
            .map(|family| vk::DeviceQueueCreateInfo {
                s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
                queue_family_index: family,
                queue_count: 1,
                p_queue_priorities: priorities.as_ptr(),
                ..Default::default()
            })
            .collect();

        let supported = unsafe { instance.get_physical_device_features(physical) };
        let features = vk::PhysicalDeviceFeatures {
            sampler_anisotropy: supported.sampler_anisotropy,
            ..Default::default()
        };
        let extensions: Vec<*const c_char> = if scope.surface.is_some() {
            DEVICE_EXTENSIONS.iter().map(|e| e.as_ptr()).collect()
        } else {
            Vec::new()
        };

        let create_info = vk::DeviceCreateInfo {
            s_type: vk::StructureType::DEVICE_CREATE_INFO,
            queue_create_info_count: queue_infos.len() as u32,
            p_queue_create_infos: queue_infos.as_ptr(),
            enabled_extension_count: extensions.len() as u32,
            pp_enabled_extension_names: extensions.as_ptr(),
            p_enabled_features: &features,
            ..Default::default()
        };
        let device = unsafe { instance.create_device(physical, &create_info, None) }
            .op("vkCreateDevice")?;

        let (graphics_queue, present_queue, compute_queue) = unsafe {
            (
                device.get_device_queue(families.graphics, 0),
                device.get_device_queue(families.present, 0),
                device.get_device_queue(families.compute, 0),
            )
        };
        let memory_properties = unsafe { instance.get_physical_device_memory_properties(physical) };
        let properties = unsafe { instance.get_physical_device_properties(physical) };

        info!(
            "adapter: {} (graphics={}, present={}, compute={})",
            properties
                .device_name_as_c_str()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            families.graphics,
            families.present,
            families.compute
        );

        Ok(Self {
            device,
            physical,
            families,
            graphics_queue,
            present_queue,
            compute_queue,
            memory_properties,
            properties,
            sampler_anisotropy: supported.sampler_anisotropy == vk::TRUE,
            scope,
        })
    }

    pub fn instance(&self) -> &Instance {
        &self.scope.instance
    }

    pub fn surface(&self) -> Option<&SurfaceContext> {
        self.scope.surface.as_ref()
    }

    pub fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        unsafe {
            self.scope
                .instance
                .get_physical_device_format_properties(self.physical, format)
        }
    }

    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }.op("vkDeviceWaitIdle")
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_device(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags, count: u32) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: count,
            ..Default::default()
        }
    }

    #[test]
    fn single_universal_family_aliases_everything() {
        let props = [family(
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
            16,
        )];
        let f = find_queue_families(&props, |_| true).unwrap();
        assert_eq!((f.graphics, f.present, f.compute), (0, 0, 0));
        assert_eq!(f.unique(), vec![0]);
        assert!(!f.split_compute());
    }

    #[test]
    fn separate_families_are_deduplicated() {
        let props = [
            family(vk::QueueFlags::TRANSFER, 2),
            family(vk::QueueFlags::GRAPHICS, 1),
            family(vk::QueueFlags::COMPUTE, 4),
        ];
        let f = find_queue_families(&props, |i| i == 1).unwrap();
        assert_eq!(
            f,
            QueueFamilies {
                graphics: 1,
                present: 1,
                compute: 2
            }
        );
        assert_eq!(f.unique(), vec![1, 2]);
        assert!(f.split_compute());
    }

    #[test]
    fn empty_families_and_missing_present_fail() {
        let props = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, 0),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, 1),
        ];
        assert_eq!(find_queue_families(&props, |_| false), None);
        let f = find_queue_families(&props, |_| true).unwrap();
        assert_eq!(f.graphics, 1);
    }

    #[test]
    fn reports_only_missing_extensions() {
        let have = [c"VK_KHR_maintenance1", swapchain::NAME];
        assert!(missing_extensions(&have, &DEVICE_EXTENSIONS).is_empty());
        let none: [&CStr; 0] = [];
        assert_eq!(missing_extensions(&none, &DEVICE_EXTENSIONS), vec![swapchain::NAME]);
    }
}
