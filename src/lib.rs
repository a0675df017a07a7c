//! Revoice - resumable subtitle-to-dub pipeline
//!
//! Turns a subtitle file and its video into a dubbed video: one synthesized
//! fragment per cue, fitted to the cue's slot, laid onto a silence-padded
//! track and mixed over the separated accompaniment. Every intermediate file
//! is a checkpoint, and per-directory lock files let several workers share one
//! batch over common storage.

pub mod artifact;
pub mod audio;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod fitter;
pub mod job;
pub mod lock;
pub mod media;
pub mod pipeline;
pub mod runner;
pub mod speaker;
pub mod subtitle;
