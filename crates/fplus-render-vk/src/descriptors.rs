// SPDX-License-Identifier: CEPL-1.0
use crate::error::{Result, VkResultExt};
use crate::memory::DeviceArena;
use crate::pipeline::{SetLayouts, SetSlot};
use crate::scene::SceneResources;
use ash::vk;

pub const MAX_SETS: u32 = 4;

pub fn pool_sizes() -> [vk::DescriptorPoolSize; 3] {
    [
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: 4,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: 3,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::STORAGE_BUFFER,
            descriptor_count: 3,
        },
    ]
}

/// One set per slot, allocated once. The light-culling and intermediate
/// sets are rewritten whenever the swapchain-sized resources change.
#[derive(Clone, Copy, Debug)]
pub struct DescriptorSets {
    pub pool: vk::DescriptorPool,
    pub object: vk::DescriptorSet,
    pub camera: vk::DescriptorSet,
    pub light_culling: vk::DescriptorSet,
    pub intermediate: vk::DescriptorSet,
}

fn buffer_info(buffer: vk::Buffer) -> vk::DescriptorBufferInfo {
    vk::DescriptorBufferInfo {
        buffer,
        offset: 0,
        range: vk::WHOLE_SIZE,
    }
}

fn image_info(view: vk::ImageView, sampler: vk::Sampler) -> vk::DescriptorImageInfo {
    vk::DescriptorImageInfo {
        sampler,
        image_view: view,
        image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    }
}

fn buffer_write<'a>(
    set: vk::DescriptorSet,
    binding: u32,
    ty: vk::DescriptorType,
    info: &'a vk::DescriptorBufferInfo,
) -> vk::WriteDescriptorSet<'a> {
    vk::WriteDescriptorSet {
        s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
        dst_set: set,
        dst_binding: binding,
        descriptor_count: 1,
        descriptor_type: ty,
        p_buffer_info: info,
        ..Default::default()
    }
}

fn image_write<'a>(set: vk::DescriptorSet, binding: u32, info: &'a vk::DescriptorImageInfo) -> vk::WriteDescriptorSet<'a> {
    vk::WriteDescriptorSet {
        s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
        dst_set: set,
        dst_binding: binding,
        descriptor_count: 1,
        descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        p_image_info: info,
        ..Default::default()
    }
}

impl DescriptorSets {
    pub fn allocate(device: &ash::Device, arena: &mut DeviceArena, layouts: &SetLayouts) -> Result<Self> {
        let sizes = pool_sizes();
        let ci = vk::DescriptorPoolCreateInfo {
            s_type: vk::StructureType::DESCRIPTOR_POOL_CREATE_INFO,
            max_sets: MAX_SETS,
            pool_size_count: sizes.len() as u32,
            p_pool_sizes: sizes.as_ptr(),
            ..Default::default()
        };
        let pool = unsafe { device.create_descriptor_pool(&ci, None) }.op("vkCreateDescriptorPool")?;
        // Sets go back with the pool.
        arena.adopt("descriptor pool", move |d| unsafe { d.destroy_descriptor_pool(pool, None) });

        let set_layouts = [layouts.object, layouts.camera, layouts.light_culling, layouts.intermediate];
        let ai = vk::DescriptorSetAllocateInfo {
            s_type: vk::StructureType::DESCRIPTOR_SET_ALLOCATE_INFO,
            descriptor_pool: pool,
            descriptor_set_count: set_layouts.len() as u32,
            p_set_layouts: set_layouts.as_ptr(),
            ..Default::default()
        };
        let sets = unsafe { device.allocate_descriptor_sets(&ai) }.op("vkAllocateDescriptorSets")?;
        Ok(Self {
            pool,
            object: sets[0],
            camera: sets[1],
            light_culling: sets[2],
            intermediate: sets[3],
        })
    }

    pub fn get(&self, slot: SetSlot) -> vk::DescriptorSet {
        match slot {
            SetSlot::Object => self.object,
            SetSlot::Camera => self.camera,
            SetSlot::LightCulling => self.light_culling,
            SetSlot::Intermediate => self.intermediate,
        }
    }

    pub fn ordered(&self, order: &[SetSlot]) -> Vec<vk::DescriptorSet> {
        order.iter().map(|&s| self.get(s)).collect()
    }

    /// Object and camera sets; their resources live as long as the device.
    pub fn write_scene(&self, device: &ash::Device, scene: &SceneResources) {
        let object = buffer_info(scene.object.buffer);
        let albedo = image_info(scene.albedo.view, scene.texture_sampler);
        let normal = image_info(scene.normal_map.view, scene.texture_sampler);
        let camera = buffer_info(scene.camera.buffer);
        let writes = [
            buffer_write(self.object, 0, vk::DescriptorType::UNIFORM_BUFFER, &object),
            image_write(self.object, 1, &albedo),
            image_write(self.object, 2, &normal),
            buffer_write(self.camera, 0, vk::DescriptorType::STORAGE_BUFFER, &camera),
        ];
        unsafe { device.update_descriptor_sets(&writes, &[]) };
    }

    /// Visibility, light list and pre-pass depth.
    pub fn write_culling(
        &self,
        device: &ash::Device,
        visibility: vk::Buffer,
        lights: vk::Buffer,
        depth_view: vk::ImageView,
        depth_sampler: vk::Sampler,
    ) {
        let visibility = buffer_info(visibility);
        let lights = buffer_info(lights);
        let depth = image_info(depth_view, depth_sampler);
        let writes = [
            buffer_write(self.light_culling, 0, vk::DescriptorType::STORAGE_BUFFER, &visibility),
            buffer_write(self.light_culling, 1, vk::DescriptorType::STORAGE_BUFFER, &lights),
            image_write(self.intermediate, 0, &depth),
        ];
        unsafe { device.update_descriptor_sets(&writes, &[]) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::FORWARD_SETS;

    #[test]
    fn pool_covers_every_binding() {
        let mut need = std::collections::HashMap::new();
        for slot in FORWARD_SETS {
            for b in slot.bindings() {
                *need.entry(b.descriptor_type).or_insert(0u32) += b.descriptor_count;
            }
        }
        for size in pool_sizes() {
            assert!(size.descriptor_count >= need.get(&size.ty).copied().unwrap_or(0), "{:?}", size.ty);
        }
        for ty in need.keys() {
            assert!(pool_sizes().iter().any(|s| s.ty == *ty), "{ty:?} missing from pool");
        }
        assert_eq!(MAX_SETS as usize, FORWARD_SETS.len());
    }
}
