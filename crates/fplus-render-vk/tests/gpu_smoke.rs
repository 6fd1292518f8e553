// SPDX-License-Identifier: CEPL-1.0
//! Needs a Vulkan driver: `cargo test -p fplus-render-vk -- --ignored`.

use ash::vk;
use fplus_render_vk::arena::ResourceArena;
use fplus_render_vk::device::DeviceContext;
use fplus_render_vk::lights::{LightSet, LIGHT_BUFFER_SIZE};
use fplus_render_vk::memory::{all_memory_types, Allocator, Sharing};
use fplus_render_vk::RendererConfig;
use fplus_math::LightVolume;
use rand::{rngs::StdRng, SeedableRng};

fn headless() -> DeviceContext {
    let config = RendererConfig {
        validation: false,
        ..RendererConfig::default()
    };
    DeviceContext::headless(&config).expect("headless device")
}

fn command_pool(ctx: &DeviceContext) -> vk::CommandPool {
    let ci = vk::CommandPoolCreateInfo {
        s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
        flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
        queue_family_index: ctx.families.graphics,
        ..Default::default()
    };
    unsafe { ctx.device.create_command_pool(&ci, None) }.expect("command pool")
}

#[test]
#[ignore = "requires a Vulkan driver"]
fn light_buffer_survives_a_staging_round_trip() {
    let ctx = headless();
    let pool = command_pool(&ctx);
    let alloc = Allocator::new(&ctx.device, ctx.memory_properties, ctx.graphics_queue, pool);
    let mut arena = ResourceArena::new("test");

    let mut rng = StdRng::seed_from_u64(7);
    let lights = LightSet::random(64, LightVolume::default(), &mut rng).unwrap();
    let bytes = lights.to_gpu_bytes();
    assert_eq!(bytes.len(), LIGHT_BUFFER_SIZE);

    let device_local = alloc
        .create_buffer(
            &mut arena,
            "lights",
            bytes.len() as vk::DeviceSize,
            vk::BufferUsageFlags::STORAGE_BUFFER
                | vk::BufferUsageFlags::TRANSFER_DST
                | vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            Sharing::Exclusive,
        )
        .unwrap();
    alloc.upload(device_local.buffer, &bytes).unwrap();
    let back = alloc.read_back(device_local.buffer, bytes.len()).unwrap();
    assert_eq!(back, bytes);

    arena.destroy_all(&ctx.device);
    unsafe { ctx.device.destroy_command_pool(pool, None) };
}

#[test]
#[ignore = "requires a Vulkan driver"]
fn memory_type_lookup_is_stable() {
    let ctx = headless();
    let pool = command_pool(&ctx);
    let alloc = Allocator::new(&ctx.device, ctx.memory_properties, ctx.graphics_queue, pool);
    let all = all_memory_types(ctx.memory_properties.memory_type_count);
    let props = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
    let first = alloc.memory_type(all, props).unwrap();
    assert_eq!(alloc.memory_type(all, props).unwrap(), first);
    assert!(alloc.memory_type(0, props).is_err());
    unsafe { ctx.device.destroy_command_pool(pool, None) };
}
