// Shader module loading
//
// Vulkan consumes SPIR-V: a stream of little-endian u32 words starting with
// the magic number. Files are read at runtime so they can be hot reloaded.

use super::VulkanDevice;
use crate::error::RenderError;
use anyhow::{Context, Result};
use ash::vk;
use std::ffi::CStr;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

pub const SPIRV_MAGIC: u32 = 0x0723_0203;

pub struct ShaderModule {
    pub module: vk::ShaderModule,
    pub stage: vk::ShaderStageFlags,
    device: Arc<VulkanDevice>,
}

impl ShaderModule {
    pub fn from_bytes(device: &Arc<VulkanDevice>, stage: vk::ShaderStageFlags, code: &[u8]) -> Result<Self> {
        let words = parse_spirv(code)?;
        let create_info = vk::ShaderModuleCreateInfo::default().code(&words);

        let module = unsafe { device.device.create_shader_module(&create_info, None) }
            .context("Failed to create shader module")?;

        Ok(Self {
            module,
            stage,
            device: device.clone(),
        })
    }

    pub fn from_file(device: &Arc<VulkanDevice>, stage: vk::ShaderStageFlags, path: &Path) -> Result<Self> {
        let code = std::fs::read(path).with_context(|| format!("Failed to read shader {:?}", path))?;
        let shader = Self::from_bytes(device, stage, &code)
            .map_err(|e| e.context(RenderError::ShaderLoad { path: path.to_path_buf() }))?;
        log::debug!("Loaded {:?} shader from {:?}", stage, path);
        Ok(shader)
    }

    pub fn stage_info(&self) -> vk::PipelineShaderStageCreateInfo<'static> {
        const ENTRY_POINT: &CStr = c"main";
        vk::PipelineShaderStageCreateInfo::default()
            .stage(self.stage)
            .module(self.module)
            .name(ENTRY_POINT)
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_shader_module(self.module, None);
        }
    }
}

/// Decode SPIR-V bytes into aligned words, checking size and magic number.
pub fn parse_spirv(code: &[u8]) -> Result<Vec<u32>> {
    if code.len() < 20 {
        anyhow::bail!("SPIR-V blob is too short ({} bytes)", code.len());
    }
    let words = ash::util::read_spv(&mut Cursor::new(code)).context("Malformed SPIR-V")?;
    if words.first() != Some(&SPIRV_MAGIC) {
        anyhow::bail!("SPIR-V magic number mismatch");
    }
    Ok(words)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(magic: u32) -> Vec<u8> {
        [magic, 0x0001_0000, 0, 8, 0]
            .iter()
            .flat_map(|word| word.to_le_bytes())
            .collect()
    }

    #[test]
    fn accepts_valid_header() {
        let words = parse_spirv(&header(SPIRV_MAGIC)).unwrap();
        assert_eq!(words.len(), 5);
        assert_eq!(words[0], SPIRV_MAGIC);
    }

    #[test]
    fn rejects_wrong_magic() {
        assert!(parse_spirv(&header(0xdead_beef)).is_err());
    }

    #[test]
    fn rejects_truncated_or_unaligned_code() {
        assert!(parse_spirv(&[0x03, 0x02, 0x23, 0x07]).is_err());

        let mut unaligned = header(SPIRV_MAGIC);
        unaligned.push(0);
        assert!(parse_spirv(&unaligned).is_err());
    }
}
