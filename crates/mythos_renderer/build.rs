// Compiles the GLSL sources under shaders/ to SPIR-V with glslc from the Vulkan SDK.
// Output lands in <workspace>/target/shaders as vert.spv and frag.spv, one of the
// locations ShaderConfig probes. Without VULKAN_SDK the step is skipped.

use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;

const STAGES: [&str; 2] = ["vert", "frag"];

fn needs_compile(source: &Path, output: &Path) -> bool {
    match (std::fs::metadata(source), std::fs::metadata(output)) {
        (Ok(src), Ok(dst)) => match (src.modified(), dst.modified()) {
            (Ok(src_time), Ok(dst_time)) => src_time > dst_time,
            _ => true,
        },
        _ => true,
    }
}

fn compile(glslc: &Path, source: &Path, output: &Path) -> Result<(), String> {
    let status = Command::new(glslc)
        .arg(source)
        .arg("-o")
        .arg(output)
        .status()
        .map_err(|e| format!("failed to run glslc for {}: {e}", source.display()))?;
    if status.success() {
        Ok(())
    } else {
        Err(format!(
            "glslc failed for {} with exit code {}",
            source.display(),
            status.code().unwrap_or(-1)
        ))
    }
}

fn main() {
    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap_or_else(|_| ".".to_string()));
    let shader_dir = manifest_dir.join("shaders");
    println!("cargo:rerun-if-changed={}", shader_dir.display());
    println!("cargo:rerun-if-env-changed=VULKAN_SDK");
    println!("cargo:rerun-if-env-changed=SKIP_SHADERS");

    if env::var("SKIP_SHADERS").is_ok() {
        return;
    }

    let Ok(vulkan_sdk) = env::var("VULKAN_SDK") else {
        println!("cargo:warning=VULKAN_SDK not set, shader compilation skipped");
        return;
    };

    let glslc = if cfg!(target_os = "windows") {
        Path::new(&vulkan_sdk).join("Bin").join("glslc.exe")
    } else {
        Path::new(&vulkan_sdk).join("bin").join("glslc")
    };
    if !glslc.exists() {
        println!("cargo:warning=glslc not found at {}, shader compilation skipped", glslc.display());
        return;
    }

    let target_dir = manifest_dir.join("../../target/shaders");
    if let Err(e) = std::fs::create_dir_all(&target_dir) {
        println!("cargo:warning=failed to create {}: {e}", target_dir.display());
        return;
    }

    for stage in STAGES {
        let source = shader_dir.join(format!("shader.{stage}"));
        let output = target_dir.join(format!("{stage}.spv"));
        if !needs_compile(&source, &output) {
            continue;
        }
        if let Err(message) = compile(&glslc, &source, &output) {
            panic!("{message}");
        }
    }
}
