// Typed errors for conditions callers branch on.
//
// Everything else travels as anyhow::Error with context attached.

use ash::vk;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("swapchain is out of date and must be recreated")]
    SwapchainOutOfDate,

    #[error("no Vulkan-capable GPU can present to this surface")]
    NoSuitableDevice,

    #[error("surface reports no supported formats")]
    NoSurfaceFormat,

    #[error("unsupported image layout transition {old:?} -> {new:?}")]
    UnsupportedLayoutTransition {
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    },

    #[error("uniform layout error: {0}")]
    UniformLayout(String),

    #[error("invalid SPIR-V in {path:?}")]
    ShaderLoad { path: PathBuf },
}

impl RenderError {
    /// True when the error only means the swapchain must be rebuilt.
    pub fn is_out_of_date(err: &anyhow::Error) -> bool {
        matches!(
            err.downcast_ref::<RenderError>(),
            Some(RenderError::SwapchainOutOfDate)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn out_of_date_survives_context() {
        let err: anyhow::Result<()> =
            Err(RenderError::SwapchainOutOfDate).context("acquiring image");
        assert!(RenderError::is_out_of_date(&err.unwrap_err()));
    }

    #[test]
    fn other_errors_are_not_out_of_date() {
        let err = anyhow::Error::from(RenderError::NoSurfaceFormat);
        assert!(!RenderError::is_out_of_date(&err));
        assert!(!RenderError::is_out_of_date(&anyhow::anyhow!("boom")));
    }
}
