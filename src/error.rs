use thiserror::Error;

use crate::artifact::Stage;

#[derive(Error, Debug)]
pub enum RevoiceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Invalid subtitle: {0}")]
    InvalidSubtitle(String),

    #[error("Media processing error: {0}")]
    Media(String),

    #[error("{engine} engine error: {message}")]
    Engine { engine: &'static str, message: String },

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("Stage '{stage}' failed: {source}")]
    StageFailed {
        stage: Stage,
        #[source]
        source: Box<RevoiceError>,
    },
}

impl RevoiceError {
    pub fn engine<S: Into<String>>(engine: &'static str, message: S) -> Self {
        Self::Engine {
            engine,
            message: message.into(),
        }
    }

    /// Wrap an error with the stage it escaped from. Already-wrapped errors keep
    /// their innermost stage.
    pub fn stage(stage: Stage, source: RevoiceError) -> Self {
        match source {
            already @ Self::StageFailed { .. } => already,
            other => Self::StageFailed {
                stage,
                source: Box::new(other),
            },
        }
    }

    pub fn failed_stage(&self) -> Option<Stage> {
        match self {
            Self::StageFailed { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, RevoiceError>;
