// SPDX-License-Identifier: CEPL-1.0
//! Surface capability queries, swapchain policy and creation.

use crate::config::PresentPreference;
use crate::device::{DeviceContext, SurfaceContext};
use crate::error::{RenderError, Result, VkResultExt};
use crate::memory::Sharing;
use ash::khr::swapchain;
use ash::vk;
use fplus_render::RenderSize;

pub const PREFERRED_SURFACE_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_UNORM,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

/// Depth formats in order of preference.
pub const DEPTH_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

#[derive(Clone, Debug, Default)]
pub struct SwapchainSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupport {
    pub fn query(surface: &SurfaceContext, phys: vk::PhysicalDevice) -> Result<Self> {
        unsafe {
            Ok(Self {
                capabilities: surface
                    .loader
                    .get_physical_device_surface_capabilities(phys, surface.handle)
                    .op("vkGetPhysicalDeviceSurfaceCapabilitiesKHR")?,
                formats: surface
                    .loader
                    .get_physical_device_surface_formats(phys, surface.handle)
                    .op("vkGetPhysicalDeviceSurfaceFormatsKHR")?,
                present_modes: surface
                    .loader
                    .get_physical_device_surface_present_modes(phys, surface.handle)
                    .op("vkGetPhysicalDeviceSurfacePresentModesKHR")?,
            })
        }
    }

    /// At least one format and one present mode.
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// B8G8R8A8_UNORM / SRGB_NONLINEAR when offered (or when the surface has no
/// preference at all), the first advertised pair otherwise.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    match formats {
        [only] if only.format == vk::Format::UNDEFINED => PREFERRED_SURFACE_FORMAT,
        _ if formats.contains(&PREFERRED_SURFACE_FORMAT) => PREFERRED_SURFACE_FORMAT,
        [first, ..] => *first,
        [] => PREFERRED_SURFACE_FORMAT,
    }
}

pub fn choose_present_mode(modes: &[vk::PresentModeKHR], pref: PresentPreference) -> vk::PresentModeKHR {
    match pref {
        PresentPreference::Mailbox if modes.contains(&vk::PresentModeKHR::MAILBOX) => {
            vk::PresentModeKHR::MAILBOX
        }
        _ => vk::PresentModeKHR::FIFO,
    }
}

/// The surface's current extent unless it leaves the choice to us
/// (`u32::MAX`), in which case the window size clamped to the limits.
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, want: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: want
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: want
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// A minimised window reports a zero current extent; no swapchain can be
/// created for it until it grows again.
pub fn is_presentable(extent: vk::Extent2D) -> bool {
    extent.width > 0 && extent.height > 0
}

/// One more than the minimum, capped by the maximum (0 means no cap).
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let wanted = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        wanted.min(caps.max_image_count)
    } else {
        wanted
    }
}

pub fn choose_depth_format(supports_attachment: impl Fn(vk::Format) -> bool) -> Result<vk::Format> {
    DEPTH_CANDIDATES
        .into_iter()
        .find(|&f| supports_attachment(f))
        .ok_or(RenderError::UnsupportedDepthFormat)
}

/// First candidate usable as an optimal-tiling depth attachment.
pub fn pick_depth_format(ctx: &DeviceContext) -> Result<vk::Format> {
    choose_depth_format(|format| {
        ctx.format_properties(format)
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
    })
}

pub fn present_mode_name(m: vk::PresentModeKHR) -> &'static str {
    match m {
        vk::PresentModeKHR::FIFO => "FIFO",
        vk::PresentModeKHR::MAILBOX => "MAILBOX",
        vk::PresentModeKHR::IMMEDIATE => "IMMEDIATE",
        vk::PresentModeKHR::FIFO_RELAXED => "FIFO_RELAXED",
        _ => "OTHER",
    }
}

pub struct Swapchain {
    loader: swapchain::Device,
    pub handle: vk::SwapchainKHR,
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub images: Vec<vk::Image>,
}

impl Swapchain {
    /// Builds a swapchain for the context's surface. `old` (may be null) is
    /// handed to the driver for resource reuse; the caller destroys it after.
    /// `None` when the surface extent has a zero dimension.
    pub fn create(
        ctx: &DeviceContext,
        size: RenderSize,
        pref: PresentPreference,
        old: vk::SwapchainKHR,
    ) -> Result<Option<Self>> {
        let surface = ctx.surface().ok_or(RenderError::MissingExtension(
            "VK_KHR_surface (headless context)".into(),
        ))?;
        let support = SwapchainSupport::query(surface, ctx.physical)?;
        let caps = &support.capabilities;

        let format = choose_surface_format(&support.formats);
        let present_mode = choose_present_mode(&support.present_modes, pref);
        let extent = choose_extent(caps, size);
        if !is_presentable(extent) {
            tracing::debug!("surface extent {}x{}, not creating a swapchain", extent.width, extent.height);
            return Ok(None);
        }
        let image_count = choose_image_count(caps);

        let pre_transform = if caps
            .supported_transforms
            .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
        {
            vk::SurfaceTransformFlagsKHR::IDENTITY
        } else {
            caps.current_transform
        };

        let sharing = Sharing::between(ctx.families.graphics, ctx.families.present);
        let families = sharing.families();
        let info = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface: surface.handle,
            min_image_count: image_count,
            image_format: format.format,
            image_color_space: format.color_space,
            image_extent: extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            image_sharing_mode: sharing.mode(),
            queue_family_index_count: families.len() as u32,
            p_queue_family_indices: families.as_ptr(),
            pre_transform,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode,
            clipped: vk::TRUE,
            old_swapchain: old,
            ..Default::default()
        };

        let loader = swapchain::Device::new(ctx.instance(), &ctx.device);
        let handle = unsafe { loader.create_swapchain(&info, None) }.op("vkCreateSwapchainKHR")?;
        let images = match unsafe { loader.get_swapchain_images(handle) } {
            Ok(images) => images,
            Err(result) => {
                unsafe { loader.destroy_swapchain(handle, None) };
                return Err(RenderError::Vulkan {
                    op: "vkGetSwapchainImagesKHR",
                    result,
                });
            }
        };

        tracing::info!(
            "swapchain: {:?} / {:?}, {}, {}x{}, {} images (min {})",
            format.format,
            format.color_space,
            present_mode_name(present_mode),
            extent.width,
            extent.height,
            images.len(),
            caps.min_image_count
        );

        Ok(Some(Self {
            loader,
            handle,
            format,
            present_mode,
            extent,
            images,
        }))
    }

    /// `Ok((index, suboptimal))`; OUT_OF_DATE comes back as the raw error.
    pub fn acquire(&self, signal: vk::Semaphore) -> std::result::Result<(u32, bool), vk::Result> {
        unsafe {
            self.loader
                .acquire_next_image(self.handle, u64::MAX, signal, vk::Fence::null())
        }
    }

    /// `Ok(suboptimal)`; OUT_OF_DATE comes back as the raw error.
    pub fn present(
        &self,
        queue: vk::Queue,
        index: u32,
        wait: vk::Semaphore,
    ) -> std::result::Result<bool, vk::Result> {
        let info = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &wait,
            swapchain_count: 1,
            p_swapchains: &self.handle,
            p_image_indices: &index,
            ..Default::default()
        };
        unsafe { self.loader.queue_present(queue, &info) }
    }

    /// The caller guarantees the device is idle and the views are gone.
    pub fn destroy(&mut self) {
        if self.handle != vk::SwapchainKHR::null() {
            unsafe { self.loader.destroy_swapchain(self.handle, None) };
            self.handle = vk::SwapchainKHR::null();
            self.images.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sf(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    #[test]
    fn surface_format_policy() {
        assert_eq!(choose_surface_format(&[sf(vk::Format::UNDEFINED)]), PREFERRED_SURFACE_FORMAT);
        assert_eq!(
            choose_surface_format(&[sf(vk::Format::R8G8B8A8_SRGB), PREFERRED_SURFACE_FORMAT]),
            PREFERRED_SURFACE_FORMAT
        );
        assert_eq!(
            choose_surface_format(&[sf(vk::Format::R8G8B8A8_SRGB), sf(vk::Format::B8G8R8A8_SRGB)]),
            sf(vk::Format::R8G8B8A8_SRGB)
        );
    }

    #[test]
    fn present_mode_prefers_mailbox_and_falls_back_to_fifo() {
        let both = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        let fifo = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(choose_present_mode(&both, PresentPreference::Mailbox), vk::PresentModeKHR::MAILBOX);
        assert_eq!(choose_present_mode(&fifo, PresentPreference::Mailbox), vk::PresentModeKHR::FIFO);
        assert_eq!(choose_present_mode(&both, PresentPreference::Fifo), vk::PresentModeKHR::FIFO);
    }

    fn caps(current: (u32, u32), min: (u32, u32), max: (u32, u32)) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D { width: current.0, height: current.1 },
            min_image_extent: vk::Extent2D { width: min.0, height: min.1 },
            max_image_extent: vk::Extent2D { width: max.0, height: max.1 },
            ..Default::default()
        }
    }

    #[test]
    fn extent_uses_current_unless_free() {
        let fixed = caps((1280, 720), (1, 1), (4096, 4096));
        assert_eq!(
            choose_extent(&fixed, RenderSize::new(800, 600)),
            vk::Extent2D { width: 1280, height: 720 }
        );

        let free = caps((u32::MAX, u32::MAX), (200, 200), (1000, 1000));
        assert_eq!(
            choose_extent(&free, RenderSize::new(4000, 100)),
            vk::Extent2D { width: 1000, height: 200 }
        );
        assert_eq!(
            choose_extent(&free, RenderSize::new(800, 600)),
            vk::Extent2D { width: 800, height: 600 }
        );
    }

    #[test]
    fn minimised_surface_is_not_presentable() {
        let minimised = caps((0, 0), (0, 0), (4096, 4096));
        let extent = choose_extent(&minimised, RenderSize::new(1280, 720));
        assert_eq!(extent, vk::Extent2D { width: 0, height: 0 });
        assert!(!is_presentable(extent));
        assert!(!is_presentable(vk::Extent2D { width: 640, height: 0 }));
        assert!(is_presentable(vk::Extent2D { width: 1, height: 1 }));
    }

    #[test]
    fn image_count_is_min_plus_one_capped() {
        let mut c = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(choose_image_count(&c), 3);
        c.max_image_count = 2;
        assert_eq!(choose_image_count(&c), 2);
        c.max_image_count = 8;
        assert_eq!(choose_image_count(&c), 3);
    }

    #[test]
    fn depth_format_follows_candidate_order() {
        assert_eq!(choose_depth_format(|_| true).unwrap(), vk::Format::D32_SFLOAT);
        assert_eq!(
            choose_depth_format(|f| f == vk::Format::D24_UNORM_S8_UINT).unwrap(),
            vk::Format::D24_UNORM_S8_UINT
        );
        assert!(matches!(
            choose_depth_format(|_| false),
            Err(RenderError::UnsupportedDepthFormat)
        ));
    }
}
