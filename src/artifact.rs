// An artifact's existence is its completion marker. Producers write into a
// hidden staging path next to the final name and commit it with a rename, so a
// crash mid-write never leaves a file that looks complete.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Result, RevoiceError};

/// Pipeline stages in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    NormalizeSubtitle,
    TimingTable,
    SpeakerTable,
    SpeedTable,
    Synthesis,
    CorrectTimings,
    AssembleTrack,
    StereoTrack,
    ExtractSource,
    SeparateAccompaniment,
    MixBackground,
    Mux,
}

impl Stage {
    pub const ALL: [Stage; 12] = [
        Stage::NormalizeSubtitle,
        Stage::TimingTable,
        Stage::SpeakerTable,
        Stage::SpeedTable,
        Stage::Synthesis,
        Stage::CorrectTimings,
        Stage::AssembleTrack,
        Stage::StereoTrack,
        Stage::ExtractSource,
        Stage::SeparateAccompaniment,
        Stage::MixBackground,
        Stage::Mux,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::NormalizeSubtitle => "normalize-subtitle",
            Stage::TimingTable => "timing-table",
            Stage::SpeakerTable => "speaker-table",
            Stage::SpeedTable => "speed-table",
            Stage::Synthesis => "synthesis",
            Stage::CorrectTimings => "correct-timings",
            Stage::AssembleTrack => "assemble-track",
            Stage::StereoTrack => "stereo-track",
            Stage::ExtractSource => "extract-source",
            Stage::SeparateAccompaniment => "separate-accompaniment",
            Stage::MixBackground => "mix-background",
            Stage::Mux => "mux",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Deterministic artifact paths for one job.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    work_dir: PathBuf,
    stem: String,
    target_language: String,
    source_language: String,
    video_extension: String,
}

impl ArtifactStore {
    pub fn new(
        work_dir: impl Into<PathBuf>,
        stem: impl Into<String>,
        target_language: impl Into<String>,
        source_language: impl Into<String>,
        video_extension: impl Into<String>,
    ) -> Self {
        Self {
            work_dir: work_dir.into(),
            stem: stem.into(),
            target_language: target_language.into(),
            source_language: source_language.into(),
            video_extension: video_extension.into().trim_start_matches('.').to_string(),
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Output path of a single-artifact stage. The synthesis stage produces one
    /// fragment per cue instead; its path here is the verification report.
    pub fn path_for(&self, stage: Stage) -> PathBuf {
        let stem = &self.stem;
        let tgt = &self.target_language;
        let src = &self.source_language;
        let name = match stage {
            Stage::NormalizeSubtitle => format!("{stem}_0_mod.srt"),
            Stage::TimingTable => format!("{stem}_1.0_srt.csv"),
            Stage::SpeakerTable => format!("{stem}_1.5_output_speakers.csv"),
            Stage::SpeedTable => format!("{stem}_3.0_output_speed.csv"),
            Stage::Synthesis => format!("{stem}_3.0_output_speed_errors.csv"),
            Stage::CorrectTimings => format!("{stem}_4_corrected_output_speed.csv"),
            Stage::AssembleTrack => format!("{stem}_5.0_output_audiotrack_{tgt}.wav"),
            Stage::StereoTrack => format!("{stem}_5.3_stereo_{tgt}.wav"),
            Stage::ExtractSource => format!("{stem}_5.5_out_{src}.wav"),
            Stage::SeparateAccompaniment => format!("{stem}_5.7_accompaniment_{src}.wav"),
            Stage::MixBackground => format!("{stem}_6_out_reduced_{src}.wav"),
            Stage::Mux => return self.final_output(),
        };
        self.work_dir.join(name)
    }

    /// Final dubbed video, placed beside the working directory.
    pub fn final_output(&self) -> PathBuf {
        let parent = self
            .work_dir
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.work_dir.clone());
        parent.join(format!("{}_out_mix.{}", self.stem, self.video_extension))
    }

    /// Audio fragment of the cue at `index` (1-based).
    pub fn fragment_path(&self, index: usize) -> PathBuf {
        self.work_dir.join(format!("segment_{}.wav", index))
    }

    pub fn exists(path: &Path) -> bool {
        path.is_file()
    }

    pub fn is_complete(&self, stage: Stage) -> bool {
        Self::exists(&self.path_for(stage))
    }

    /// Hidden sibling of `target` that keeps its extension, so tools that pick
    /// a format from the file name still work.
    pub fn staging_path(target: &Path) -> PathBuf {
        let parent = target.parent().unwrap_or_else(|| Path::new("."));
        let stem = target
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "artifact".to_string());
        let id = uuid::Uuid::new_v4().simple().to_string();
        let name = match target.extension() {
            Some(ext) => format!(".{}.partial-{}.{}", stem, &id[..8], ext.to_string_lossy()),
            None => format!(".{}.partial-{}", stem, &id[..8]),
        };
        parent.join(name)
    }

    /// Atomically move a fully written staging file into its final name.
    pub fn commit(staging: &Path, target: &Path) -> Result<()> {
        if !staging.is_file() {
            return Err(RevoiceError::FileNotFound(format!(
                "staging file {} was not produced",
                staging.display()
            )));
        }
        std::fs::rename(staging, target)?;
        debug!("Committed artifact {}", target.display());
        Ok(())
    }

    /// Remove a leftover staging file after a failed attempt.
    pub fn discard(staging: &Path) {
        if staging.exists() {
            if let Err(e) = std::fs::remove_file(staging) {
                debug!("Could not remove staging file {}: {}", staging.display(), e);
            }
        }
    }
}
