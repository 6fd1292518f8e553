// SPDX-License-Identifier: CEPL-1.0
fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=shaders");

    #[cfg(feature = "embed-shaders")]
    embed::compile_all()?;

    Ok(())
}

#[cfg(feature = "embed-shaders")]
mod embed {
    use std::{env, error::Error, fs, path::PathBuf};

    // (source file, stage, output blob)
    const SHADERS: [(&str, shaderc::ShaderKind, &str); 4] = [
        ("forwardplus.vert", shaderc::ShaderKind::Vertex, "forwardplus_vert.spv"),
        ("forwardplus.frag", shaderc::ShaderKind::Fragment, "forwardplus_frag.spv"),
        ("depth.vert", shaderc::ShaderKind::Vertex, "depth_vert.spv"),
        ("light_culling.comp", shaderc::ShaderKind::Compute, "light_culling_comp.spv"),
    ];

    pub fn compile_all() -> Result<(), Box<dyn Error>> {
        let out = PathBuf::from(env::var("OUT_DIR")?);
        let src_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR")?).join("shaders");

        let compiler = shaderc::Compiler::new().expect("shaderc compiler");
        let mut opts = shaderc::CompileOptions::new().expect("shaderc options");
        opts.set_target_env(
            shaderc::TargetEnv::Vulkan,
            shaderc::EnvVersion::Vulkan1_0 as u32,
        );
        opts.set_optimization_level(shaderc::OptimizationLevel::Performance);

        for (file, kind, blob) in SHADERS {
            let path = src_dir.join(file);
            println!("cargo:rerun-if-changed={}", path.display());
            let source = fs::read_to_string(&path)?;
            let spv = compiler
                .compile_into_spirv(&source, kind, file, "main", Some(&opts))
                .map_err(|e| format!("{file}: {e}"))?;
            fs::write(out.join(blob), spv.as_binary_u8())?;
        }
        Ok(())
    }
}
