use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::Config;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Dub every subtitle under a directory, a single subtitle, or a manifest
    Run {
        /// Subtitle file or directory to scan
        #[arg(short, long, required_unless_present = "manifest")]
        input: Option<PathBuf>,

        /// Manifest file (or directory of manifests) listing subtitle paths
        #[arg(short, long, conflicts_with = "input")]
        manifest: Option<PathBuf>,

        #[command(flatten)]
        overrides: RunOverrides,
    },

    /// Show job directories holding a lock, optionally recovering stale ones
    Locks {
        /// Directory tree to scan
        #[arg(short, long)]
        input: PathBuf,

        /// Rename abandoned locks aside
        #[arg(long)]
        recover: bool,
    },

    /// Measure a speaker's per-character duration across synthesis rates
    Calibrate {
        /// Speaker name from the configuration
        #[arg(short, long)]
        speaker: String,

        /// Output CSV (`speed,duration,symbol_duration,file_name`)
        #[arg(short, long)]
        output: PathBuf,

        /// Directory for the calibration clips
        #[arg(long)]
        work_dir: Option<PathBuf>,
    },

    /// Write a configuration file with default values
    InitConfig {
        /// Destination path
        path: PathBuf,
    },
}

/// Command-line values that take precedence over the configuration file.
#[derive(clap::Args, Debug, Default, Clone)]
pub struct RunOverrides {
    /// Root folder for job working directories
    #[arg(short, long)]
    pub output_folder: Option<PathBuf>,

    /// Identifier written into lock files
    #[arg(long)]
    pub worker_id: Option<String>,

    /// Seconds without a heartbeat before a lock is considered abandoned
    #[arg(long)]
    pub lock_timeout: Option<f64>,

    /// Seconds between lock heartbeats
    #[arg(long)]
    pub lock_heartbeat: Option<f64>,

    /// Accompaniment weight inside dubbed cues (0..1)
    #[arg(long)]
    pub accompaniment_coef: Option<f64>,

    /// Original soundtrack weight inside dubbed cues (0..1)
    #[arg(long)]
    pub voice_coef: Option<f64>,

    /// Language code of the synthesized speech
    #[arg(short, long)]
    pub target_language: Option<String>,

    /// Hide the per-cue progress bar
    #[arg(long)]
    pub no_progress: bool,
}

impl RunOverrides {
    pub fn apply(&self, config: &mut Config) {
        if let Some(folder) = &self.output_folder {
            config.job.output_folder = Some(folder.clone());
        }
        if let Some(id) = &self.worker_id {
            config.lock.worker_id = Some(id.clone());
        }
        if let Some(secs) = self.lock_timeout {
            config.lock.stale_timeout_secs = secs;
        }
        if let Some(secs) = self.lock_heartbeat {
            config.lock.heartbeat_interval_secs = secs;
        }
        if let Some(coef) = self.accompaniment_coef {
            config.job.accompaniment_coef = coef;
        }
        if let Some(coef) = self.voice_coef {
            config.job.voice_coef = coef;
        }
        if let Some(lang) = &self.target_language {
            config.job.target_language = lang.clone();
        }
    }
}
