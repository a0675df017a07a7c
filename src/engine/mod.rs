// External engine ports
//
// Every heavyweight operation the pipeline needs is behind one narrow trait:
// - Synthesizer: text to speech at a given rate
// - Separator: vocals / accompaniment split
// - TextCorrector: subtitle text normalization
// - SpeechVerifier: transcription of synthesized fragments
// Muxing and audio filters live behind `media::MediaProcessorTrait`.

pub mod corrector;
pub mod separator;
pub mod synthesizer;
pub mod verifier;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use corrector::{CopyCorrector, VocabularyCorrector};
pub use separator::DemucsSeparator;
pub use synthesizer::CommandSynthesizer;
pub use verifier::WhisperCliVerifier;

use crate::config::Config;
use crate::error::Result;
use crate::media::{MediaProcessorFactory, MediaProcessorTrait};

/// One synthesis call.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisRequest {
    pub text: String,
    pub ref_audio: PathBuf,
    pub ref_text: String,
    pub rate: f64,
    pub language: String,
}

impl SynthesisRequest {
    pub fn at_rate(&self, rate: f64) -> Self {
        Self {
            rate,
            ..self.clone()
        }
    }
}

/// Paths produced by a source separation run.
#[derive(Debug, Clone, PartialEq)]
pub struct Separation {
    pub vocals: PathBuf,
    pub accompaniment: PathBuf,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Write speech for `request` to `output` (WAV) and return its duration in seconds.
    async fn synthesize(&self, request: &SynthesisRequest, output: &Path) -> Result<f64>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Separator: Send + Sync {
    /// Split `input` into vocals and accompaniment somewhere under `work_dir`.
    async fn separate(&self, input: &Path, work_dir: &Path) -> Result<Separation>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TextCorrector: Send + Sync {
    /// Write a corrected copy of the subtitle at `input` to `output`.
    async fn correct(&self, input: &Path, output: &Path) -> Result<()>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SpeechVerifier: Send + Sync {
    /// Transcribe a synthesized fragment.
    async fn transcribe(&self, audio: &Path, language: &str) -> Result<String>;
}

/// The collaborators a pipeline runs against.
#[derive(Clone)]
pub struct Engines {
    pub synthesizer: Arc<dyn Synthesizer>,
    pub separator: Arc<dyn Separator>,
    pub corrector: Arc<dyn TextCorrector>,
    pub media: Arc<dyn MediaProcessorTrait>,
    pub verifier: Option<Arc<dyn SpeechVerifier>>,
}

/// Factory for the command-line backed engines
pub struct EngineFactory;

impl EngineFactory {
    pub fn create(config: &Config) -> Result<Engines> {
        let corrector: Arc<dyn TextCorrector> = match &config.vocabulary.path {
            Some(path) => Arc::new(VocabularyCorrector::from_file(path)?),
            None => Arc::new(CopyCorrector),
        };

        let verifier: Option<Arc<dyn SpeechVerifier>> = if config.verify.enabled {
            Some(Arc::new(WhisperCliVerifier::new(config.verify.clone())))
        } else {
            None
        };

        Ok(Engines {
            synthesizer: Arc::new(CommandSynthesizer::new(config.synthesizer.clone())),
            separator: Arc::new(DemucsSeparator::new(config.separator.clone())),
            corrector,
            media: Arc::from(MediaProcessorFactory::create_processor(config.media.clone())),
            verifier,
        })
    }
}
