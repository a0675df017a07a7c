use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;
use tracing::debug;

use super::SpeechVerifier;
use crate::config::VerifyConfig;
use crate::error::{Result, RevoiceError};

/// Transcribes fragments with whisper.cpp's `whisper-cli`.
pub struct WhisperCliVerifier {
    config: VerifyConfig,
}

impl WhisperCliVerifier {
    pub fn new(config: VerifyConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SpeechVerifier for WhisperCliVerifier {
    async fn transcribe(&self, audio: &Path, language: &str) -> Result<String> {
        debug!("Transcribing {} with {}", audio.display(), self.config.binary_path);

        let output = Command::new(&self.config.binary_path)
            .arg("-m")
            .arg(&self.config.model)
            .arg("-l")
            .arg(language)
            .arg("-nt")
            .arg("-np")
            .arg("-f")
            .arg(audio)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                RevoiceError::engine(
                    "verifier",
                    format!("Failed to execute {}: {}", self.config.binary_path, e),
                )
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RevoiceError::engine("verifier", stderr.trim().to_string()));
        }

        let text = String::from_utf8_lossy(&output.stdout);
        Ok(text.lines().map(str::trim).filter(|l| !l.is_empty()).collect::<Vec<_>>().join(" "))
    }
}

/// Lower-case, punctuation to spaces, single spaces.
pub fn normalize_text(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_alphanumeric() { c.to_lowercase().collect::<String>() } else { " ".to_string() })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// `2 * LCS / (len(a) + len(b))` over characters; 1.0 for two empty strings.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }

    let mut previous = vec![0usize; b.len() + 1];
    let mut current = vec![0usize; b.len() + 1];
    for ca in &a {
        for (j, cb) in b.iter().enumerate() {
            current[j + 1] = if ca == cb {
                previous[j] + 1
            } else {
                current[j].max(previous[j + 1])
            };
        }
        std::mem::swap(&mut previous, &mut current);
    }

    2.0 * previous[b.len()] as f64 / (a.len() + b.len()) as f64
}
