//! Upscaler command construction.
//!
//! `<exe> -i <input> -o <output> -n <model_id> -f <format> [-g 0] [-t <tile_size>]`

use std::path::Path;

use crate::core::process::ToolInvocation;

/// Flags shared by every upscaler call of a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpscaleOptions {
    pub model_id: String,
    pub format: String,
    pub use_gpu: bool,
    /// `None` lets the upscaler choose
    pub tile_size: Option<u32>,
}

impl UpscaleOptions {
    /// Builds the invocation for one input/output pair.
    pub fn invocation(&self, executable: &Path, input: &Path, output: &Path) -> ToolInvocation {
        let mut invocation = ToolInvocation::new(executable)
            .arg("-i")
            .arg(input)
            .arg("-o")
            .arg(output)
            .arg("-n")
            .arg(&self.model_id)
            .arg("-f")
            .arg(&self.format);

        if self.use_gpu {
            invocation = invocation.args(["-g", "0"]);
        }

        if let Some(tile) = self.tile_size.filter(|t| *t > 0) {
            invocation = invocation.arg("-t").arg(tile.to_string());
        }

        invocation
    }
}
