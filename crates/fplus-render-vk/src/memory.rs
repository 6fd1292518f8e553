// SPDX-License-Identifier: CEPL-1.0
//! Buffers, images, memory-type selection and the staging upload path.

use crate::arena::{ResourceArena, Scoped};
use crate::barrier;
use crate::error::{RenderError, Result, VkResultExt};
use ash::vk;
use fplus_render::PixelImage;

pub type DeviceArena = ResourceArena<ash::Device>;

const HOST_COHERENT: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
    vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw() | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
);

/// First memory type allowed by `type_bits` whose flags include `required`.
pub fn find_memory_type(
    props: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> Result<u32> {
    (0..props.memory_type_count.min(vk::MAX_MEMORY_TYPES as u32))
        .find(|&i| {
            type_bits & (1 << i) != 0
                && props.memory_types[i as usize]
                    .property_flags
                    .contains(required)
        })
        .ok_or(RenderError::MemoryTypeNotFound {
            type_bits,
            properties: required,
        })
}

/// `type_bits` accepting each of the first `count` memory types. A device
/// may report all 32.
pub fn all_memory_types(count: u32) -> u32 {
    1u32.checked_shl(count).map_or(u32::MAX, |bit| bit - 1)
}

/// Queue-family sharing of a buffer or image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sharing {
    /// One owner at a time; moving between families needs ownership barriers.
    Exclusive,
    Concurrent([u32; 2]),
}

impl Sharing {
    /// Concurrent across exactly two distinct families, exclusive otherwise.
    pub fn between(a: u32, b: u32) -> Self {
        if a != b {
            Sharing::Concurrent([a, b])
        } else {
            Sharing::Exclusive
        }
    }

    pub fn mode(&self) -> vk::SharingMode {
        match self {
            Sharing::Exclusive => vk::SharingMode::EXCLUSIVE,
            Sharing::Concurrent(_) => vk::SharingMode::CONCURRENT,
        }
    }

    pub fn families(&self) -> &[u32] {
        match self {
            Sharing::Exclusive => &[],
            Sharing::Concurrent(f) => f,
        }
    }
}

/// Rejects writes that would run past the end of a mapped staging buffer.
pub fn check_staging_fit(len: usize, capacity: vk::DeviceSize) -> Result<()> {
    let len = len as vk::DeviceSize;
    if len > capacity {
        return Err(RenderError::StagingOverflow { len, capacity });
    }
    Ok(())
}

#[derive(Clone, Copy, Debug)]
pub struct GpuBuffer {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
}

#[derive(Clone, Copy, Debug)]
pub struct GpuImage {
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
    /// Null when created without a view.
    pub view: vk::ImageView,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

#[derive(Clone, Copy, Debug)]
pub struct ImageDesc {
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub tiling: vk::ImageTiling,
    pub usage: vk::ImageUsageFlags,
    pub properties: vk::MemoryPropertyFlags,
    /// UNDEFINED or PREINITIALIZED.
    pub initial_layout: vk::ImageLayout,
    pub sharing: Sharing,
}

fn destroy_buffer_pair(d: &ash::Device, (buffer, memory): (vk::Buffer, vk::DeviceMemory)) {
    unsafe {
        d.destroy_buffer(buffer, None);
        d.free_memory(memory, None);
    }
}

fn destroy_image_pair(d: &ash::Device, (image, memory): (vk::Image, vk::DeviceMemory)) {
    unsafe {
        d.destroy_image(image, None);
        d.free_memory(memory, None);
    }
}

fn destroy_buffer(d: &ash::Device, buffer: vk::Buffer) {
    unsafe { d.destroy_buffer(buffer, None) }
}

fn destroy_image(d: &ash::Device, image: vk::Image) {
    unsafe { d.destroy_image(image, None) }
}

/// Creates and binds GPU memory and runs synchronous transfers on one queue.
pub struct Allocator {
    device: ash::Device,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    queue: vk::Queue,
    pool: vk::CommandPool,
}

impl Allocator {
    /// `queue` and `pool` must belong to the same (graphics) family.
    pub fn new(
        device: &ash::Device,
        memory_properties: vk::PhysicalDeviceMemoryProperties,
        queue: vk::Queue,
        pool: vk::CommandPool,
    ) -> Self {
        Self {
            device: device.clone(),
            memory_properties,
            queue,
            pool,
        }
    }

    pub fn memory_type(&self, type_bits: u32, props: vk::MemoryPropertyFlags) -> Result<u32> {
        find_memory_type(&self.memory_properties, type_bits, props)
    }

    fn allocate(&self, req: vk::MemoryRequirements, props: vk::MemoryPropertyFlags) -> Result<vk::DeviceMemory> {
        let info = vk::MemoryAllocateInfo {
            s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
            allocation_size: req.size,
            memory_type_index: self.memory_type(req.memory_type_bits, props)?,
            ..Default::default()
        };
        unsafe { self.device.allocate_memory(&info, None) }.op("vkAllocateMemory")
    }

    fn raw_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        props: vk::MemoryPropertyFlags,
        sharing: Sharing,
    ) -> Result<(vk::Buffer, vk::DeviceMemory)> {
        let families = sharing.families();
        let ci = vk::BufferCreateInfo {
            s_type: vk::StructureType::BUFFER_CREATE_INFO,
            size,
            usage,
            sharing_mode: sharing.mode(),
            queue_family_index_count: families.len() as u32,
            p_queue_family_indices: families.as_ptr(),
            ..Default::default()
        };
        let buffer = Scoped::new(
            &self.device,
            unsafe { self.device.create_buffer(&ci, None) }.op("vkCreateBuffer")?,
            destroy_buffer,
        );
        let req = unsafe { self.device.get_buffer_memory_requirements(buffer.get()) };
        let memory = self.allocate(req, props)?;
        if let Err(result) = unsafe { self.device.bind_buffer_memory(buffer.get(), memory, 0) } {
            unsafe { self.device.free_memory(memory, None) };
            return Err(RenderError::Vulkan {
                op: "vkBindBufferMemory",
                result,
            });
        }
        Ok((buffer.into_inner(), memory))
    }

    /// Buffer owned by `arena`; memory is freed right after the buffer.
    pub fn create_buffer(
        &self,
        arena: &mut DeviceArena,
        label: &'static str,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        props: vk::MemoryPropertyFlags,
        sharing: Sharing,
    ) -> Result<GpuBuffer> {
        let (buffer, memory) = self.raw_buffer(size, usage, props, sharing)?;
        arena.adopt(label, move |d| destroy_buffer_pair(d, (buffer, memory)));
        Ok(GpuBuffer {
            buffer,
            memory,
            size,
        })
    }

    /// Host-visible, host-coherent transfer source.
    pub fn create_staging(
        &self,
        arena: &mut DeviceArena,
        label: &'static str,
        size: vk::DeviceSize,
    ) -> Result<GpuBuffer> {
        self.create_buffer(
            arena,
            label,
            size,
            vk::BufferUsageFlags::TRANSFER_SRC,
            HOST_COHERENT,
            Sharing::Exclusive,
        )
    }

    /// Device-local buffer filled once through a transient staging buffer.
    pub fn create_buffer_with_data(
        &self,
        arena: &mut DeviceArena,
        label: &'static str,
        usage: vk::BufferUsageFlags,
        bytes: &[u8],
    ) -> Result<GpuBuffer> {
        let gpu = self.create_buffer(
            arena,
            label,
            bytes.len() as vk::DeviceSize,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            Sharing::Exclusive,
        )?;
        self.upload(gpu.buffer, bytes)?;
        Ok(gpu)
    }

    fn raw_image(&self, desc: &ImageDesc) -> Result<(vk::Image, vk::DeviceMemory)> {
        let families = desc.sharing.families();
        let ci = vk::ImageCreateInfo {
            s_type: vk::StructureType::IMAGE_CREATE_INFO,
            image_type: vk::ImageType::TYPE_2D,
            format: desc.format,
            extent: vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            },
            mip_levels: 1,
            array_layers: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            tiling: desc.tiling,
            usage: desc.usage,
            sharing_mode: desc.sharing.mode(),
            queue_family_index_count: families.len() as u32,
            p_queue_family_indices: families.as_ptr(),
            initial_layout: desc.initial_layout,
            ..Default::default()
        };
        let image = Scoped::new(
            &self.device,
            unsafe { self.device.create_image(&ci, None) }.op("vkCreateImage")?,
            destroy_image,
        );
        let req = unsafe { self.device.get_image_memory_requirements(image.get()) };
        let memory = self.allocate(req, desc.properties)?;
        if let Err(result) = unsafe { self.device.bind_image_memory(image.get(), memory, 0) } {
            unsafe { self.device.free_memory(memory, None) };
            return Err(RenderError::Vulkan {
                op: "vkBindImageMemory",
                result,
            });
        }
        Ok((image.into_inner(), memory))
    }

    pub fn create_view(
        &self,
        image: vk::Image,
        format: vk::Format,
        aspect: vk::ImageAspectFlags,
    ) -> Result<vk::ImageView> {
        let ci = vk::ImageViewCreateInfo {
            s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
            image,
            view_type: vk::ImageViewType::TYPE_2D,
            format,
            subresource_range: vk::ImageSubresourceRange {
                aspect_mask: aspect,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            },
            ..Default::default()
        };
        unsafe { self.device.create_image_view(&ci, None) }.op("vkCreateImageView")
    }

    /// Image (plus a view when `view_aspect` is given) owned by `arena`.
    /// The caller still has to transition it out of its initial layout.
    pub fn create_image(
        &self,
        arena: &mut DeviceArena,
        label: &'static str,
        desc: &ImageDesc,
        view_aspect: Option<vk::ImageAspectFlags>,
    ) -> Result<GpuImage> {
        let (image, memory) = self.raw_image(desc)?;
        arena.adopt(label, move |d| destroy_image_pair(d, (image, memory)));
        let view = match view_aspect {
            Some(aspect) => {
                let view = self.create_view(image, desc.format, aspect)?;
                arena.adopt(label, move |d| unsafe { d.destroy_image_view(view, None) });
                view
            }
            None => vk::ImageView::null(),
        };
        Ok(GpuImage {
            image,
            memory,
            view,
            format: desc.format,
            extent: desc.extent,
        })
    }

    /// Map, copy, unmap. `memory` must be host-visible and coherent.
    pub fn write_mapped(&self, memory: vk::DeviceMemory, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        unsafe {
            let ptr = self
                .device
                .map_memory(memory, 0, bytes.len() as vk::DeviceSize, vk::MemoryMapFlags::empty())
                .op("vkMapMemory")?;
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.cast::<u8>(), bytes.len());
            self.device.unmap_memory(memory);
        }
        Ok(())
    }

    pub fn read_mapped(&self, memory: vk::DeviceMemory, len: usize) -> Result<Vec<u8>> {
        let mut out = vec![0u8; len];
        if len == 0 {
            return Ok(out);
        }
        unsafe {
            let ptr = self
                .device
                .map_memory(memory, 0, len as vk::DeviceSize, vk::MemoryMapFlags::empty())
                .op("vkMapMemory")?;
            std::ptr::copy_nonoverlapping(ptr.cast::<u8>(), out.as_mut_ptr(), len);
            self.device.unmap_memory(memory);
        }
        Ok(out)
    }

    fn free_one_shot(&self, cmd: vk::CommandBuffer) {
        unsafe { self.device.free_command_buffers(self.pool, &[cmd]) }
    }

    /// Records into a throwaway command buffer, submits it and blocks until
    /// the queue is idle. Simple and synchronous, not fast.
    pub fn one_shot(
        &self,
        record: impl FnOnce(&ash::Device, vk::CommandBuffer) -> Result<()>,
    ) -> Result<()> {
        let ai = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: self.pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: 1,
            ..Default::default()
        };
        let cmd = unsafe { self.device.allocate_command_buffers(&ai) }
            .op("vkAllocateCommandBuffers")?[0];
        let cmd = Scoped::new(self, cmd, Self::free_one_shot);

        let bi = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            ..Default::default()
        };
        unsafe { self.device.begin_command_buffer(cmd.get(), &bi) }.op("vkBeginCommandBuffer")?;
        record(&self.device, cmd.get())?;
        unsafe { self.device.end_command_buffer(cmd.get()) }.op("vkEndCommandBuffer")?;

        let raw = cmd.get();
        let si = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            command_buffer_count: 1,
            p_command_buffers: &raw,
            ..Default::default()
        };
        unsafe {
            self.device
                .queue_submit(self.queue, std::slice::from_ref(&si), vk::Fence::null())
                .op("vkQueueSubmit")?;
            self.device.queue_wait_idle(self.queue).op("vkQueueWaitIdle")?;
        }
        Ok(())
    }

    pub fn copy_buffer(&self, src: vk::Buffer, dst: vk::Buffer, size: vk::DeviceSize) -> Result<()> {
        self.one_shot(|d, cmd| {
            let region = vk::BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size,
            };
            unsafe { d.cmd_copy_buffer(cmd, src, dst, std::slice::from_ref(&region)) };
            Ok(())
        })
    }

    /// Two-step upload through a caller-owned staging buffer.
    pub fn stage_and_copy(&self, staging: &GpuBuffer, dst: vk::Buffer, bytes: &[u8]) -> Result<()> {
        check_staging_fit(bytes.len(), staging.size)?;
        self.write_mapped(staging.memory, bytes)?;
        self.copy_buffer(staging.buffer, dst, bytes.len() as vk::DeviceSize)
    }

    /// Two-step upload through a transient staging buffer.
    pub fn upload(&self, dst: vk::Buffer, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        let staging = Scoped::new(
            &self.device,
            self.raw_buffer(
                bytes.len() as vk::DeviceSize,
                vk::BufferUsageFlags::TRANSFER_SRC,
                HOST_COHERENT,
                Sharing::Exclusive,
            )?,
            destroy_buffer_pair,
        );
        let (buffer, memory) = staging.get();
        self.write_mapped(memory, bytes)?;
        self.copy_buffer(buffer, dst, bytes.len() as vk::DeviceSize)
    }

    /// Copies `len` bytes of `src` into a host-visible buffer and reads them.
    /// `src` needs TRANSFER_SRC usage.
    pub fn read_back(&self, src: vk::Buffer, len: usize) -> Result<Vec<u8>> {
        if len == 0 {
            return Ok(Vec::new());
        }
        let readback = Scoped::new(
            &self.device,
            self.raw_buffer(
                len as vk::DeviceSize,
                vk::BufferUsageFlags::TRANSFER_DST,
                HOST_COHERENT,
                Sharing::Exclusive,
            )?,
            destroy_buffer_pair,
        );
        let (buffer, memory) = readback.get();
        self.copy_buffer(src, buffer, len as vk::DeviceSize)?;
        self.read_mapped(memory, len)
    }

    pub fn transition(
        &self,
        image: vk::Image,
        format: vk::Format,
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    ) -> Result<()> {
        // Reject before touching the queue.
        barrier::transition_masks(old, new)?;
        self.one_shot(|d, cmd| barrier::record_layout_transition(d, cmd, image, format, old, new))
    }

    /// RGBA8 pixels to a sampled, device-local image in SHADER_READ_ONLY,
    /// going through a linear PREINITIALIZED staging image.
    pub fn upload_texture(
        &self,
        arena: &mut DeviceArena,
        label: &'static str,
        pixels: &PixelImage,
    ) -> Result<GpuImage> {
        let format = vk::Format::R8G8B8A8_UNORM;
        let extent = vk::Extent2D {
            width: pixels.width(),
            height: pixels.height(),
        };

        let staging = Scoped::new(
            &self.device,
            self.raw_image(&ImageDesc {
                extent,
                format,
                tiling: vk::ImageTiling::LINEAR,
                usage: vk::ImageUsageFlags::TRANSFER_SRC,
                properties: HOST_COHERENT,
                initial_layout: vk::ImageLayout::PREINITIALIZED,
                sharing: Sharing::Exclusive,
            })?,
            destroy_image_pair,
        );
        let (staging_image, staging_memory) = staging.get();

        // Linear images may pad rows; honour the driver's row pitch.
        let layout = unsafe {
            self.device.get_image_subresource_layout(
                staging_image,
                vk::ImageSubresource {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: 0,
                    array_layer: 0,
                },
            )
        };
        unsafe {
            let base = self
                .device
                .map_memory(staging_memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())
                .op("vkMapMemory")?
                .cast::<u8>()
                .add(layout.offset as usize);
            for y in 0..pixels.height() {
                let row = pixels.row(y);
                let dst = base.add(y as usize * layout.row_pitch as usize);
                std::ptr::copy_nonoverlapping(row.as_ptr(), dst, row.len());
            }
            self.device.unmap_memory(staging_memory);
        }

        let texture = self.create_image(
            arena,
            label,
            &ImageDesc {
                extent,
                format,
                tiling: vk::ImageTiling::OPTIMAL,
                usage: vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
                properties: vk::MemoryPropertyFlags::DEVICE_LOCAL,
                initial_layout: vk::ImageLayout::PREINITIALIZED,
                sharing: Sharing::Exclusive,
            },
            Some(vk::ImageAspectFlags::COLOR),
        )?;

        self.one_shot(|d, cmd| {
            use vk::ImageLayout as L;
            barrier::record_layout_transition(d, cmd, staging_image, format, L::PREINITIALIZED, L::TRANSFER_SRC_OPTIMAL)?;
            barrier::record_layout_transition(d, cmd, texture.image, format, L::PREINITIALIZED, L::TRANSFER_DST_OPTIMAL)?;
            let layers = vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            };
            let region = vk::ImageCopy {
                src_subresource: layers,
                src_offset: vk::Offset3D::default(),
                dst_subresource: layers,
                dst_offset: vk::Offset3D::default(),
                extent: vk::Extent3D {
                    width: extent.width,
                    height: extent.height,
                    depth: 1,
                },
            };
            unsafe {
                d.cmd_copy_image(
                    cmd,
                    staging_image,
                    L::TRANSFER_SRC_OPTIMAL,
                    texture.image,
                    L::TRANSFER_DST_OPTIMAL,
                    std::slice::from_ref(&region),
                )
            };
            barrier::record_layout_transition(d, cmd, texture.image, format, L::TRANSFER_DST_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL)
        })?;
        Ok(texture)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut p = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            ..Default::default()
        };
        for (slot, &flags) in p.memory_types.iter_mut().zip(types) {
            slot.property_flags = flags;
        }
        p
    }

    #[test]
    fn picks_first_type_that_is_allowed_and_capable() {
        let p = props(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            HOST_COHERENT,
            HOST_COHERENT | vk::MemoryPropertyFlags::HOST_CACHED,
        ]);
        assert_eq!(find_memory_type(&p, 0b111, HOST_COHERENT).unwrap(), 1);
        // Type 1 masked out by the resource requirements.
        assert_eq!(find_memory_type(&p, 0b101, HOST_COHERENT).unwrap(), 2);
        assert_eq!(
            find_memory_type(&p, 0b111, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap(),
            0
        );
    }

    #[test]
    fn selection_is_idempotent() {
        let p = props(&[HOST_COHERENT, vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        let first = find_memory_type(&p, 0b11, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap();
        for _ in 0..8 {
            assert_eq!(
                find_memory_type(&p, 0b11, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap(),
                first
            );
        }
    }

    #[test]
    fn no_match_is_an_exhaustion_error() {
        let p = props(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        let err = find_memory_type(&p, 0b1, HOST_COHERENT).unwrap_err();
        assert!(matches!(err, RenderError::MemoryTypeNotFound { type_bits: 1, .. }));
        assert_eq!(err.kind(), crate::ErrorKind::Exhaustion);
        // Types beyond memory_type_count are never considered.
        assert!(find_memory_type(&p, 0b10, vk::MemoryPropertyFlags::empty()).is_err());
    }

    #[test]
    fn sharing_is_concurrent_only_for_distinct_families() {
        assert_eq!(Sharing::between(0, 0), Sharing::Exclusive);
        assert_eq!(Sharing::between(0, 0).mode(), vk::SharingMode::EXCLUSIVE);
        assert!(Sharing::between(0, 0).families().is_empty());
        let s = Sharing::between(0, 2);
        assert_eq!(s.mode(), vk::SharingMode::CONCURRENT);
        assert_eq!(s.families(), &[0, 2]);
    }

    #[test]
    fn type_mask_covers_every_reported_type() {
        assert_eq!(all_memory_types(0), 0);
        assert_eq!(all_memory_types(3), 0b111);
        assert_eq!(all_memory_types(31), u32::MAX >> 1);
        assert_eq!(all_memory_types(vk::MAX_MEMORY_TYPES as u32), u32::MAX);
    }

    #[test]
    fn oversized_staging_writes_are_rejected() {
        assert!(check_staging_fit(0, 0).is_ok());
        assert!(check_staging_fit(16, 16).is_ok());
        let err = check_staging_fit(17, 16).unwrap_err();
        assert!(matches!(err, RenderError::StagingOverflow { len: 17, capacity: 16 }));
        assert_eq!(err.kind(), crate::ErrorKind::Fatal);
    }
}
