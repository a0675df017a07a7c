// The fixed, ordered stage sequence that turns one job into a dubbed video.
// A stage whose artifact exists is skipped; new artifacts go through a staging
// path and a rename, so a stage leaves a complete artifact or nothing.

pub mod timing;

use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use crate::artifact::{ArtifactStore, Stage};
use crate::audio::{assemble_track, to_stereo, wav_duration, wav_spec, Placement};
use crate::engine::verifier::{normalize_text, similarity};
use crate::engine::{Engines, SpeechVerifier};
use crate::error::{Result, RevoiceError};
use crate::fitter::DurationFitter;
use crate::job::Job;
use crate::subtitle::read_srt;
use timing::{
    annotate_rates, annotate_speakers, correct_end_times, read_table, volume_intervals, write_table,
    TimingRow,
};

/// What a run did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineReport {
    pub executed: Vec<Stage>,
    pub skipped: Vec<Stage>,
    pub synthesized: usize,
    pub fit_exhausted: usize,
}

/// One line of the synthesis verification report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationRow {
    pub index: usize,
    pub similarity: f64,
    pub mismatch: bool,
    pub heard: String,
    pub expected: String,
}

pub struct StagePipeline {
    engines: Engines,
    fitter: DurationFitter,
    show_progress: bool,
}

impl StagePipeline {
    pub fn new(engines: Engines, fitter: DurationFitter) -> Self {
        Self {
            engines,
            fitter,
            show_progress: false,
        }
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    /// Run every stage in order. The first failure aborts the run as
    /// `StageFailed`; artifacts already written stay for the next attempt.
    pub async fn run(&self, job: &Job) -> Result<PipelineReport> {
        let store = job.artifacts();
        tokio::fs::create_dir_all(store.work_dir()).await?;
        let mut report = PipelineReport::default();

        for stage in Stage::ALL {
            let done = self
                .is_complete(&store, stage)
                .map_err(|e| RevoiceError::stage(stage, e))?;
            if done {
                debug!("Skipping {} for {}: artifact exists", stage, job.stem);
                report.skipped.push(stage);
                continue;
            }

            info!("Running {} for {}", stage, job.stem);
            if let Err(e) = self.run_stage(job, &store, stage, &mut report).await {
                error!("Stage {} failed for {}: {}", stage, job.stem, e);
                return Err(RevoiceError::stage(stage, e));
            }
            report.executed.push(stage);
        }

        info!(
            "Pipeline finished for {}: {} stage(s) run, {} skipped",
            job.stem,
            report.executed.len(),
            report.skipped.len()
        );
        Ok(report)
    }

    /// Synthesis is complete when every cue with text has its fragment; all
    /// other stages when their single artifact exists.
    fn is_complete(&self, store: &ArtifactStore, stage: Stage) -> Result<bool> {
        if stage != Stage::Synthesis {
            return Ok(store.is_complete(stage));
        }
        let table = store.path_for(Stage::SpeedTable);
        if !ArtifactStore::exists(&table) {
            return Ok(false);
        }
        Ok(read_table(&table)?
            .iter()
            .filter(|row| row.has_text())
            .all(|row| ArtifactStore::exists(&store.fragment_path(row.index))))
    }

    async fn run_stage(
        &self,
        job: &Job,
        store: &ArtifactStore,
        stage: Stage,
        report: &mut PipelineReport,
    ) -> Result<()> {
        let target = store.path_for(stage);
        let media = &self.engines.media;

        match stage {
            Stage::NormalizeSubtitle => {
                produce(&target, |staging| async move {
                    self.engines.corrector.correct(&job.subtitle, &staging).await
                })
                .await
            }
            Stage::TimingTable => {
                let cues = read_srt(store.path_for(Stage::NormalizeSubtitle)).await?;
                if cues.is_empty() {
                    return Err(RevoiceError::InvalidSubtitle(format!(
                        "{} contains no cues",
                        job.subtitle.display()
                    )));
                }
                let rows: Vec<TimingRow> = cues.iter().map(TimingRow::from).collect();
                produce(&target, |staging| async move { write_table(&staging, &rows) }).await
            }
            Stage::SpeakerTable => {
                let rows = read_table(&store.path_for(Stage::TimingTable))?;
                let rows = annotate_speakers(&rows, &job.speakers);
                produce(&target, |staging| async move { write_table(&staging, &rows) }).await
            }
            Stage::SpeedTable => {
                let rows = read_table(&store.path_for(Stage::SpeakerTable))?;
                let rows = annotate_rates(&rows, &job.speakers);
                produce(&target, |staging| async move { write_table(&staging, &rows) }).await
            }
            Stage::Synthesis => self.synthesize(job, store, report).await,
            Stage::CorrectTimings => {
                let rows = read_table(&store.path_for(Stage::SpeedTable))?;
                let rows = correct_end_times(&rows, |index| {
                    let fragment = store.fragment_path(index);
                    if ArtifactStore::exists(&fragment) {
                        wav_duration(&fragment).map(Some)
                    } else {
                        Ok(None)
                    }
                })?;
                produce(&target, |staging| async move { write_table(&staging, &rows) }).await
            }
            Stage::AssembleTrack => {
                let rows = read_table(&store.path_for(Stage::CorrectTimings))?;
                let placements: Vec<Placement> = rows
                    .iter()
                    .filter(|row| row.has_text())
                    .map(|row| Placement {
                        index: row.index,
                        start: row.start,
                        fragment: store.fragment_path(row.index),
                    })
                    .filter(|p| ArtifactStore::exists(&p.fragment))
                    .collect();
                produce(&target, |staging| async move {
                    let track = assemble_track(&placements, &staging)?;
                    info!(
                        "Assembled {} fragments into {:.2}s track",
                        track.fragments.len(),
                        track.duration
                    );
                    Ok(())
                })
                .await
            }
            Stage::StereoTrack => {
                let mono = store.path_for(Stage::AssembleTrack);
                produce(&target, |staging| async move { to_stereo(&mono, &staging) }).await
            }
            Stage::ExtractSource => {
                produce(&target, |staging| async move {
                    media.extract_audio(&job.video, &staging).await
                })
                .await
            }
            Stage::SeparateAccompaniment => {
                let source = store.path_for(Stage::ExtractSource);
                let sample_rate = wav_spec(&source)?.sample_rate;
                let separation = self.engines.separator.separate(&source, store.work_dir()).await?;
                produce(&target, |staging| async move {
                    media.normalize(&separation.accompaniment, &staging, sample_rate).await
                })
                .await
            }
            Stage::MixBackground => {
                let original = store.path_for(Stage::ExtractSource);
                let accompaniment = store.path_for(Stage::SeparateAccompaniment);
                let intervals = volume_intervals(&read_table(&store.path_for(Stage::TimingTable))?);
                let sample_rate = wav_spec(&original)?.sample_rate;
                produce(&target, |staging| async move {
                    media
                        .mix_background(&original, &accompaniment, &staging, &intervals, job.mix, sample_rate)
                        .await
                })
                .await
            }
            Stage::Mux => {
                let background = store.path_for(Stage::MixBackground);
                let voice = store.path_for(Stage::StereoTrack);
                produce(&target, |staging| async move {
                    media.mux(&job.video, &background, &voice, &staging).await
                })
                .await
            }
        }
    }

    /// Fit and write the missing fragments, one cue at a time.
    async fn synthesize(&self, job: &Job, store: &ArtifactStore, report: &mut PipelineReport) -> Result<()> {
        let rows = read_table(&store.path_for(Stage::SpeedTable))?;
        let pending: Vec<&TimingRow> = rows
            .iter()
            .filter(|row| row.has_text() && !ArtifactStore::exists(&store.fragment_path(row.index)))
            .collect();
        info!("Synthesizing {} of {} cues for {}", pending.len(), rows.len(), job.stem);

        let progress = self.progress_bar(pending.len() as u64);
        let mut checks = Vec::new();

        for row in pending {
            let speaker = row
                .speaker
                .as_deref()
                .and_then(|name| job.speakers.get(name))
                .unwrap_or_else(|| job.speakers.default_speaker());
            let request = speaker.request(&row.text, row.rate.unwrap_or(1.0), &job.target_language);
            let fragment = store.fragment_path(row.index);
            let staging = ArtifactStore::staging_path(&fragment);

            let fit = match self
                .fitter
                .fit(self.engines.synthesizer.as_ref(), &request, row.slot(), &staging)
                .await
            {
                Ok(fit) => fit,
                Err(e) => {
                    ArtifactStore::discard(&staging);
                    progress.abandon();
                    return Err(e);
                }
            };
            ArtifactStore::commit(&staging, &fragment)?;

            report.synthesized += 1;
            if fit.exhausted {
                report.fit_exhausted += 1;
            }
            debug!(
                "Cue {}: {:.2}s in {:.2}s slot at rate {:.2} ({} calls)",
                row.index,
                fit.duration,
                row.slot(),
                fit.rate,
                fit.synthesis_calls()
            );

            if let Some(verifier) = &self.engines.verifier {
                match verify(verifier.as_ref(), row, &fragment, &job.target_language).await {
                    Ok(check) => {
                        if check.mismatch {
                            warn!(
                                "Cue {} sounds like \"{}\" (expected \"{}\", similarity {:.2})",
                                check.index, check.heard, check.expected, check.similarity
                            );
                        }
                        checks.push(check);
                    }
                    Err(e) => warn!("Verification of cue {} failed: {}", row.index, e),
                }
            }
            progress.inc(1);
        }
        progress.finish_and_clear();

        if !checks.is_empty() {
            write_verification_report(&store.path_for(Stage::Synthesis), checks)?;
        }
        Ok(())
    }

    fn progress_bar(&self, len: u64) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(len);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} cues ({eta})")
        {
            pb.set_style(style.progress_chars("#>-"));
        }
        pb
    }
}

/// Write `target` through a staging file: commit on success, discard on error.
async fn produce<F, Fut>(target: &Path, write: F) -> Result<()>
where
    F: FnOnce(PathBuf) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let staging = ArtifactStore::staging_path(target);
    match write(staging.clone()).await {
        Ok(()) => ArtifactStore::commit(&staging, target),
        Err(e) => {
            ArtifactStore::discard(&staging);
            Err(e)
        }
    }
}

async fn verify(
    verifier: &dyn SpeechVerifier,
    row: &TimingRow,
    fragment: &Path,
    language: &str,
) -> Result<VerificationRow> {
    let heard = normalize_text(&verifier.transcribe(fragment, language).await?);
    let expected = normalize_text(&row.text);
    Ok(VerificationRow {
        index: row.index,
        similarity: similarity(&heard, &expected),
        mismatch: heard != expected,
        heard,
        expected,
    })
}

/// Merge new checks into the report, replacing earlier rows for the same cue.
fn write_verification_report(path: &Path, checks: Vec<VerificationRow>) -> Result<()> {
    let mut rows: Vec<VerificationRow> = if ArtifactStore::exists(path) {
        let mut reader = csv::Reader::from_path(path)?;
        reader.deserialize().collect::<std::result::Result<_, _>>()?
    } else {
        Vec::new()
    };
    rows.retain(|old| checks.iter().all(|new| new.index != old.index));
    rows.extend(checks);
    rows.sort_by_key(|row| row.index);

    let staging = ArtifactStore::staging_path(path);
    let written = (|| -> Result<()> {
        let mut writer = csv::Writer::from_path(&staging)?;
        for row in &rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        Ok(())
    })();
    match written {
        Ok(()) => ArtifactStore::commit(&staging, path),
        Err(e) => {
            ArtifactStore::discard(&staging);
            Err(e)
        }
    }
}
