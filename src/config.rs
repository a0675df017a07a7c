use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::error::{Result, RevoiceError};

fn default_video_extensions() -> Vec<String> {
    vec!["mp4".into(), "mkv".into(), "avi".into(), "mov".into()]
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub job: JobConfig,
    #[serde(default)]
    pub lock: LockConfig,
    #[serde(default)]
    pub fitter: FitterConfig,
    #[serde(default)]
    pub synthesizer: SynthesizerConfig,
    #[serde(default)]
    pub separator: SeparatorConfig,
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub vocabulary: VocabularyConfig,
    #[serde(default)]
    pub verify: VerifyConfig,
    #[serde(default)]
    pub speakers: SpeakersConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Root for job working directories; defaults to each subtitle's own folder
    pub output_folder: Option<PathBuf>,
    /// Language code of the synthesized speech
    pub target_language: String,
    /// Tag used for artifacts derived from the original soundtrack
    pub source_language: String,
    /// Weight of the separated accompaniment inside dubbed cues
    pub accompaniment_coef: f64,
    /// Weight of the original soundtrack inside dubbed cues
    pub voice_coef: f64,
    /// Subtitle file extension searched in directory mode
    pub subtitle_extension: String,
    /// Video extensions tried, in order, next to each subtitle
    #[serde(default = "default_video_extensions")]
    pub video_extensions: Vec<String>,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            output_folder: None,
            target_language: "en".to_string(),
            source_language: "src".to_string(),
            accompaniment_coef: 0.2,
            voice_coef: 0.2,
            subtitle_extension: "srt".to_string(),
            video_extensions: default_video_extensions(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// Identifier written into lock files; resolved from the environment when absent
    pub worker_id: Option<String>,
    /// Seconds without a heartbeat before a lock counts as abandoned
    pub stale_timeout_secs: f64,
    /// Seconds between lock refreshes
    pub heartbeat_interval_secs: f64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            worker_id: None,
            stale_timeout_secs: 1800.0,
            heartbeat_interval_secs: 60.0,
        }
    }
}

/// Smallest stale timeout `validate` accepts.
pub const MIN_STALE_TIMEOUT_SECS: f64 = 0.001;

/// Floor for the heartbeat period; a zero period cannot drive a timer.
pub const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(1);

impl LockConfig {
    pub fn stale_timeout(&self) -> Duration {
        seconds(self.stale_timeout_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        clamp_heartbeat(seconds(self.heartbeat_interval_secs), self.stale_timeout())
    }
}

fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value.max(0.0)).unwrap_or(Duration::MAX)
}

/// Heartbeat interval, clamped to a third of the stale timeout when it would
/// not fire at least once per timeout window. Never zero.
pub fn clamp_heartbeat(requested: Duration, stale_timeout: Duration) -> Duration {
    if requested.is_zero() || requested >= stale_timeout {
        let clamped = (stale_timeout / 3).max(MIN_HEARTBEAT_INTERVAL);
        warn!(
            "Heartbeat interval {:?} is not below stale timeout {:?}; using {:?}",
            requested, stale_timeout, clamped
        );
        clamped
    } else {
        requested
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitterConfig {
    /// Fixed rate increment between probing attempts
    pub step: f64,
    /// Refinement rounds before falling back to the safe rate
    pub max_iterations: usize,
    /// Lowest rate ever requested from the engine
    pub min_rate: f64,
    /// Highest rate ever requested from the engine
    pub max_rate: f64,
}

impl Default for FitterConfig {
    fn default() -> Self {
        Self {
            step: 0.1,
            max_iterations: 10,
            min_rate: 0.3,
            max_rate: 3.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesizerConfig {
    /// Path to the speech synthesis CLI
    pub binary_path: String,
    /// Argument template; `{text}`, `{ref_audio}`, `{ref_text}`, `{rate}`, `{output}`
    /// and `{language}` are substituted per call
    pub args: Vec<String>,
}

impl Default for SynthesizerConfig {
    fn default() -> Self {
        Self {
            binary_path: "f5-tts_infer-cli".to_string(),
            args: vec![
                "--ref_audio".into(),
                "{ref_audio}".into(),
                "--ref_text".into(),
                "{ref_text}".into(),
                "--gen_text".into(),
                "{text}".into(),
                "--speed".into(),
                "{rate}".into(),
                "--output_file".into(),
                "{output}".into(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeparatorConfig {
    /// Path to the demucs binary
    pub binary_path: String,
    /// Separation model name
    pub model: String,
    /// Parallel jobs passed to the separator
    pub jobs: u32,
}

impl Default for SeparatorConfig {
    fn default() -> Self {
        Self {
            binary_path: "demucs".to_string(),
            model: "mdx_extra".to_string(),
            jobs: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Path to ffmpeg binary
    pub binary_path: String,
    /// Audio codec of the final video
    pub audio_codec: String,
    /// Audio bitrate of the final video
    pub audio_bitrate: String,
    /// Audio sample rate of the final video
    pub output_sample_rate: u32,
    /// Integrated loudness target (LUFS) for normalized tracks
    pub loudness_target: f64,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            binary_path: "ffmpeg".to_string(),
            audio_codec: "aac".to_string(),
            audio_bitrate: "320k".to_string(),
            output_sample_rate: 44100,
            loudness_target: -18.0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VocabularyConfig {
    /// `old<=>new` replacement list applied to subtitle text lines
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyConfig {
    /// Transcribe every synthesized fragment and report mismatches
    pub enabled: bool,
    /// Path to transcriber binary (e.g., whisper-cli)
    pub binary_path: String,
    /// Model file passed to the transcriber
    pub model: String,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            binary_path: "whisper-cli".to_string(),
            model: "models/ggml-base.bin".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpeakersConfig {
    /// Name of the speaker used for untagged cues
    pub default: Option<String>,
    /// Folder of `<name>.wav` + `<name>.txt` reference voices
    pub folder: Option<PathBuf>,
    #[serde(default)]
    pub voices: BTreeMap<String, VoiceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceConfig {
    pub ref_audio: PathBuf,
    pub ref_text: String,
    /// Calibration table `speed,duration,symbol_duration`
    pub speeds: Option<PathBuf>,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| RevoiceError::Config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| RevoiceError::Config(format!("Failed to parse config file: {}", e)))
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| RevoiceError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| RevoiceError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let job = &self.job;
        for (name, value) in [
            ("accompaniment_coef", job.accompaniment_coef),
            ("voice_coef", job.voice_coef),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(RevoiceError::Config(format!(
                    "{} must be within 0..=1, got {}",
                    name, value
                )));
            }
        }
        let stale = self.lock.stale_timeout_secs;
        if stale.is_nan() || stale < MIN_STALE_TIMEOUT_SECS {
            return Err(RevoiceError::Config(format!(
                "stale_timeout_secs must be at least {}, got {}",
                MIN_STALE_TIMEOUT_SECS, stale
            )));
        }
        if self.fitter.step <= 0.0 || self.fitter.min_rate <= 0.0 || self.fitter.min_rate > self.fitter.max_rate {
            return Err(RevoiceError::Config(format!(
                "Invalid fitter settings: step {}, rate range {}..{}",
                self.fitter.step, self.fitter.min_rate, self.fitter.max_rate
            )));
        }
        Ok(())
    }
}

/// Worker identity: explicit value, then `REVOICE_WORKER_ID`, then host name,
/// then a random id.
pub fn resolve_worker_id(explicit: Option<&str>) -> String {
    if let Some(id) = explicit.map(str::trim).filter(|id| !id.is_empty()) {
        return id.to_string();
    }
    if let Ok(id) = std::env::var("REVOICE_WORKER_ID") {
        if !id.trim().is_empty() {
            return id.trim().to_string();
        }
    }
    let hostname = std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty());
    match hostname {
        Some(host) => host,
        None => format!("worker-{}", uuid::Uuid::new_v4()),
    }
}
