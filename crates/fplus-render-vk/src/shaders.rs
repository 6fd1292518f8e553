// SPDX-License-Identifier: CEPL-1.0
use crate::error::{RenderError, Result, VkResultExt};
use crate::memory::DeviceArena;
use ash::util::read_spv;
use ash::vk;
use fplus_render::ShaderBlobs;
use std::io::Cursor;

/// Checks the SPIR-V header and re-packs the blob into aligned words.
pub fn decode_spirv(name: &'static str, bytes: &[u8]) -> Result<Vec<u32>> {
    read_spv(&mut Cursor::new(bytes)).map_err(|source| RenderError::InvalidShader { name, source })
}

fn create_module(device: &ash::Device, arena: &mut DeviceArena, name: &'static str, bytes: &[u8]) -> Result<vk::ShaderModule> {
    let code = decode_spirv(name, bytes)?;
    let ci = vk::ShaderModuleCreateInfo {
        s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
        p_code: code.as_ptr(),
        code_size: code.len() * 4,
        ..Default::default()
    };
    let module = unsafe { device.create_shader_module(&ci, None) }.op("vkCreateShaderModule")?;
    arena.adopt(name, move |d| unsafe { d.destroy_shader_module(module, None) });
    Ok(module)
}

/// Kept alive for the device lifetime so pipelines can be rebuilt on resize.
#[derive(Clone, Copy, Debug)]
pub struct ShaderModules {
    pub forward_vert: vk::ShaderModule,
    pub forward_frag: vk::ShaderModule,
    pub depth_vert: vk::ShaderModule,
    pub light_culling_comp: vk::ShaderModule,
}

impl ShaderModules {
    pub fn create(device: &ash::Device, arena: &mut DeviceArena, blobs: &ShaderBlobs) -> Result<Self> {
        Ok(Self {
            forward_vert: create_module(device, arena, "forwardplus.vert", &blobs.forward_vert)?,
            forward_frag: create_module(device, arena, "forwardplus.frag", &blobs.forward_frag)?,
            depth_vert: create_module(device, arena, "depth.vert", &blobs.depth_vert)?,
            light_culling_comp: create_module(device, arena, "light_culling.comp", &blobs.light_culling_comp)?,
        })
    }
}

/// SPIR-V compiled from `shaders/` by the build script.
#[cfg(feature = "embed-shaders")]
pub fn embedded_shaders() -> ShaderBlobs {
    ShaderBlobs {
        forward_vert: include_bytes!(concat!(env!("OUT_DIR"), "/forwardplus_vert.spv")).to_vec(),
        forward_frag: include_bytes!(concat!(env!("OUT_DIR"), "/forwardplus_frag.spv")).to_vec(),
        depth_vert: include_bytes!(concat!(env!("OUT_DIR"), "/depth_vert.spv")).to_vec(),
        light_culling_comp: include_bytes!(concat!(env!("OUT_DIR"), "/light_culling_comp.spv")).to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAGIC: u32 = 0x0723_0203;

    #[test]
    fn accepts_a_spirv_header() {
        let mut bytes = MAGIC.to_le_bytes().to_vec();
        bytes.extend_from_slice(&0x0001_0000u32.to_le_bytes());
        let words = decode_spirv("test", &bytes).unwrap();
        assert_eq!(words, vec![MAGIC, 0x0001_0000]);
    }

    #[test]
    fn rejects_truncated_or_foreign_blobs() {
        let err = decode_spirv("forwardplus.frag", &[0x03, 0x02, 0x23]).unwrap_err();
        assert!(matches!(err, RenderError::InvalidShader { name: "forwardplus.frag", .. }));
        assert!(decode_spirv("test", b"#version 450\n\0\0\0").is_err());
    }

    #[cfg(feature = "embed-shaders")]
    #[test]
    fn embedded_blobs_are_valid_spirv() {
        let blobs = embedded_shaders();
        for (name, bytes) in [
            ("forward_vert", &blobs.forward_vert),
            ("forward_frag", &blobs.forward_frag),
            ("depth_vert", &blobs.depth_vert),
            ("light_culling_comp", &blobs.light_culling_comp),
        ] {
            assert!(decode_spirv(name, bytes).is_ok(), "{name}");
        }
    }
}
