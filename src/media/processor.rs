use async_trait::async_trait;
use std::path::Path;
use std::process::Command;
use tracing::info;

use super::{MediaCommandBuilder, MediaProcessorTrait, MixCoefficients};
use crate::config::MediaConfig;
use crate::error::{Result, RevoiceError};

/// FFmpeg-based media processor
pub struct MediaProcessorImpl {
    config: MediaConfig,
    command_builder: MediaCommandBuilder,
}

impl MediaProcessorImpl {
    pub fn new(config: MediaConfig) -> Self {
        let command_builder = MediaCommandBuilder::new(&config.binary_path);

        Self {
            config,
            command_builder,
        }
    }
}

#[async_trait]
impl MediaProcessorTrait for MediaProcessorImpl {
    async fn extract_audio(&self, video_path: &Path, audio_path: &Path) -> Result<()> {
        info!("Extracting audio from {} to {}", video_path.display(), audio_path.display());

        self.command_builder
            .extract_audio(video_path, audio_path)
            .execute()
            .await?;

        info!("Audio extraction completed");
        Ok(())
    }

    async fn normalize(&self, input_path: &Path, output_path: &Path, sample_rate: u32) -> Result<()> {
        info!("Normalizing {} -> {}", input_path.display(), output_path.display());

        self.command_builder
            .normalize(input_path, output_path, sample_rate, self.config.loudness_target)
            .execute()
            .await
    }

    async fn mix_background(
        &self,
        original_path: &Path,
        accompaniment_path: &Path,
        output_path: &Path,
        intervals: &[(f64, f64)],
        coefficients: MixCoefficients,
        sample_rate: u32,
    ) -> Result<()> {
        info!(
            "Mixing background for {} over {} cue intervals (voice {}, accompaniment {})",
            original_path.display(),
            intervals.len(),
            coefficients.voice,
            coefficients.accompaniment
        );

        self.command_builder
            .mix_background(
                original_path,
                accompaniment_path,
                output_path,
                intervals,
                coefficients,
                sample_rate,
                self.config.loudness_target,
            )
            .execute()
            .await
    }

    async fn mux(
        &self,
        video_path: &Path,
        background_path: &Path,
        voice_path: &Path,
        output_path: &Path,
    ) -> Result<()> {
        info!("Muxing {} -> {}", video_path.display(), output_path.display());

        self.command_builder
            .mux(
                video_path,
                background_path,
                voice_path,
                output_path,
                &self.config.audio_codec,
                &self.config.audio_bitrate,
                self.config.output_sample_rate,
            )
            .execute()
            .await?;

        info!("Muxing completed");
        Ok(())
    }

    fn check_availability(&self) -> Result<()> {
        let check = self.command_builder.version_check();
        let output = Command::new(&check.binary_path)
            .args(&check.args)
            .output()
            .map_err(|e| RevoiceError::Media(format!("Media processor not found: {}", e)))?;

        if output.status.success() {
            info!("Media processor is available");
            Ok(())
        } else {
            Err(RevoiceError::Media("Media processor version check failed".to_string()))
        }
    }
}
