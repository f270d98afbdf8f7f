// Build script to compile GLSL shaders to SPIR-V
//
// The renderer loads the .spv files at runtime (and watches them for hot
// reload), so a missing glslc only produces a warning.

use std::path::Path;
use std::process::Command;

const SHADERS: &[&str] = &["shaders/scene.vert", "shaders/scene.frag"];

fn main() {
    for shader in SHADERS {
        println!("cargo:rerun-if-changed={shader}");
        compile_shader(shader, &format!("{shader}.spv"));
    }
}

fn compile_shader(input: &str, output: &str) {
    let input_path = Path::new(input);
    let output_path = Path::new(output);

    let result = Command::new("glslc")
        .arg(input_path)
        .arg("-o")
        .arg(output_path)
        .status();

    match result {
        Ok(status) if status.success() => {}
        Ok(status) => {
            println!(
                "cargo:warning=Failed to compile {}: exit code {:?}",
                input,
                status.code()
            );
        }
        Err(e) => {
            println!("cargo:warning=glslc not found ({e}); compile manually: glslc {input} -o {output}");
        }
    }
}
