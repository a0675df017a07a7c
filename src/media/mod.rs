// Media processing (ffmpeg) behind a single trait
//
// - Processor: ffmpeg-backed implementation
// - Commands: argument builders, testable without running ffmpeg

pub mod commands;
pub mod processor;

use async_trait::async_trait;
use std::path::Path;

pub use commands::*;
pub use processor::*;

use crate::config::MediaConfig;
use crate::error::Result;

/// Main trait for media processing operations
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaProcessorTrait: Send + Sync {
    /// Extract the full soundtrack of a video as PCM WAV
    async fn extract_audio(&self, video_path: &Path, audio_path: &Path) -> Result<()>;

    /// Loudness-normalize, resample and force stereo
    async fn normalize(&self, input_path: &Path, output_path: &Path, sample_rate: u32) -> Result<()>;

    /// Blend original and accompaniment inside the dubbed intervals
    async fn mix_background(
        &self,
        original_path: &Path,
        accompaniment_path: &Path,
        output_path: &Path,
        intervals: &[(f64, f64)],
        coefficients: MixCoefficients,
        sample_rate: u32,
    ) -> Result<()>;

    /// Combine video, background and dub into the final container
    async fn mux(
        &self,
        video_path: &Path,
        background_path: &Path,
        voice_path: &Path,
        output_path: &Path,
    ) -> Result<()>;

    /// Check if media processor is available
    fn check_availability(&self) -> Result<()>;
}

/// Factory for creating media processor instances
pub struct MediaProcessorFactory;

impl MediaProcessorFactory {
    /// Create the default media processor implementation (FFmpeg-based)
    pub fn create_processor(config: MediaConfig) -> Box<dyn MediaProcessorTrait> {
        Box::new(processor::MediaProcessorImpl::new(config))
    }
}
