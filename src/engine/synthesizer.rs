use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;
use tracing::debug;

use super::{SynthesisRequest, Synthesizer};
use crate::audio::wav_duration;
use crate::config::SynthesizerConfig;
use crate::error::{Result, RevoiceError};

/// Runs a text-to-speech CLI once per request, e.g. `f5-tts_infer-cli`.
pub struct CommandSynthesizer {
    config: SynthesizerConfig,
}

impl CommandSynthesizer {
    pub fn new(config: SynthesizerConfig) -> Self {
        Self { config }
    }

    fn render_args(&self, request: &SynthesisRequest, output: &Path) -> Vec<String> {
        let rate = format!("{:.3}", request.rate);
        let ref_audio = request.ref_audio.to_string_lossy();
        let output = output.to_string_lossy();

        self.config
            .args
            .iter()
            .map(|arg| {
                arg.replace("{text}", &request.text)
                    .replace("{ref_audio}", &ref_audio)
                    .replace("{ref_text}", &request.ref_text)
                    .replace("{rate}", &rate)
                    .replace("{language}", &request.language)
                    .replace("{output}", &output)
            })
            .collect()
    }
}

#[async_trait]
impl Synthesizer for CommandSynthesizer {
    async fn synthesize(&self, request: &SynthesisRequest, output: &Path) -> Result<f64> {
        let args = self.render_args(request, output);
        debug!("Executing synthesizer: {} {:?}", self.config.binary_path, args);

        let result = Command::new(&self.config.binary_path)
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                RevoiceError::engine(
                    "synthesizer",
                    format!("Failed to execute {}: {}", self.config.binary_path, e),
                )
            })?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(RevoiceError::engine("synthesizer", stderr.trim().to_string()));
        }
        if !output.is_file() {
            return Err(RevoiceError::engine(
                "synthesizer",
                format!("no audio written to {}", output.display()),
            ));
        }

        wav_duration(output)
    }
}
