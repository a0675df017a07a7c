use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::artifact::ArtifactStore;
use crate::config::JobConfig;
use crate::error::{Result, RevoiceError};
use crate::media::MixCoefficients;
use crate::speaker::SpeakerTable;

/// Suffix of the normalized subtitle artifact; never a job input.
const NORMALIZED_SUFFIX: &str = "_0_mod.srt";

/// One subtitle/video pair. Immutable for the duration of a run.
#[derive(Debug, Clone)]
pub struct Job {
    pub subtitle: PathBuf,
    pub video: PathBuf,
    pub work_dir: PathBuf,
    pub stem: String,
    pub speakers: Arc<SpeakerTable>,
    pub mix: MixCoefficients,
    pub target_language: String,
    pub source_language: String,
}

impl Job {
    pub fn new(
        subtitle: &Path,
        video: &Path,
        config: &JobConfig,
        speakers: Arc<SpeakerTable>,
    ) -> Result<Self> {
        let stem = subtitle
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| RevoiceError::Config(format!("Invalid subtitle name {}", subtitle.display())))?;

        let work_dir = match &config.output_folder {
            Some(root) => root.join(&stem),
            None => subtitle.parent().unwrap_or_else(|| Path::new(".")).join(&stem),
        };

        Ok(Self {
            subtitle: subtitle.to_path_buf(),
            video: video.to_path_buf(),
            work_dir,
            stem,
            speakers,
            mix: MixCoefficients {
                voice: config.voice_coef,
                accompaniment: config.accompaniment_coef,
            },
            target_language: config.target_language.clone(),
            source_language: config.source_language.clone(),
        })
    }

    pub fn artifacts(&self) -> ArtifactStore {
        let extension = self
            .video
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_else(|| "mp4".to_string());
        ArtifactStore::new(
            &self.work_dir,
            &self.stem,
            &self.target_language,
            &self.source_language,
            extension,
        )
    }

    pub fn final_output(&self) -> PathBuf {
        self.artifacts().final_output()
    }
}

/// A subtitle found by discovery, with or without a matching video.
#[derive(Debug, Clone)]
pub enum Candidate {
    Ready(Job),
    MissingVideo { subtitle: PathBuf },
}

/// Enumerates candidate jobs from a directory tree, a single file or manifests.
pub struct JobSource {
    config: JobConfig,
    speakers: Arc<SpeakerTable>,
}

impl JobSource {
    pub fn new(config: JobConfig, speakers: Arc<SpeakerTable>) -> Self {
        Self { config, speakers }
    }

    /// Subtitles under `input`, or `input` itself when it is a file.
    pub fn discover(&self, input: &Path) -> Result<Vec<PathBuf>> {
        if input.is_file() {
            return Ok(vec![input.to_path_buf()]);
        }
        if !input.is_dir() {
            return Err(RevoiceError::FileNotFound(input.display().to_string()));
        }
        let subtitles = list_subtitles(input, &self.config.subtitle_extension);
        info!("Found {} subtitle files under {}", subtitles.len(), input.display());
        Ok(subtitles)
    }

    pub fn candidates(&self, subtitles: &[PathBuf]) -> Result<Vec<Candidate>> {
        subtitles.iter().map(|s| self.candidate(s)).collect()
    }

    pub fn candidate(&self, subtitle: &Path) -> Result<Candidate> {
        match find_video(subtitle, &self.config.video_extensions) {
            Some(video) => Ok(Candidate::Ready(Job::new(
                subtitle,
                &video,
                &self.config,
                self.speakers.clone(),
            )?)),
            None => Ok(Candidate::MissingVideo {
                subtitle: subtitle.to_path_buf(),
            }),
        }
    }
}

/// Recursive, sorted scan for `*.<extension>`, excluding normalized artifacts.
pub fn list_subtitles(root: &Path, extension: &str) -> Vec<PathBuf> {
    let extension = extension.trim_start_matches('.');
    let mut found: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| {
            p.extension()
                .is_some_and(|ext| ext.to_string_lossy().eq_ignore_ascii_case(extension))
        })
        .filter(|p| {
            !p.file_name()
                .is_some_and(|n| n.to_string_lossy().ends_with(NORMALIZED_SUFFIX))
        })
        .collect();
    found.sort();
    found
}

/// First `<stem>.<ext>` beside the subtitle for the given extensions, in
/// their configured order. Extensions match without regard to case and the
/// file's own spelling is returned.
pub fn find_video(subtitle: &Path, extensions: &[String]) -> Option<PathBuf> {
    let stem = subtitle.file_stem()?;
    let dir = match subtitle.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut siblings: Vec<PathBuf> = std::fs::read_dir(dir)
        .ok()?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.file_stem() == Some(stem) && p.is_file())
        .collect();
    siblings.sort();

    extensions.iter().map(|ext| ext.trim_start_matches('.')).find_map(|ext| {
        let exact = subtitle.with_extension(ext);
        if exact.is_file() {
            return Some(exact);
        }
        siblings
            .iter()
            .filter(|p| {
                p.extension()
                    .is_some_and(|e| e.to_string_lossy().eq_ignore_ascii_case(ext))
            })
            .find_map(|p| p.file_name().map(|name| subtitle.with_file_name(name)))
    })
}

/// Subtitle paths listed in a manifest file, or in every file of a manifest
/// directory (sorted by name). Blank and `#` lines are ignored, relative paths
/// resolve against the manifest's own directory, duplicates keep their first
/// position.
pub fn load_manifest(path: &Path) -> Result<Vec<PathBuf>> {
    let files = if path.is_dir() {
        let mut files: Vec<PathBuf> = std::fs::read_dir(path)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.is_file())
            .collect();
        files.sort();
        files
    } else if path.is_file() {
        vec![path.to_path_buf()]
    } else {
        return Err(RevoiceError::FileNotFound(format!("manifest {}", path.display())));
    };

    let mut seen = HashSet::new();
    let mut jobs = Vec::new();
    for file in files {
        let base = file.parent().unwrap_or_else(|| Path::new("."));
        let content = std::fs::read_to_string(&file)?;
        for line in content.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let entry = Path::new(line);
            let resolved = if entry.is_absolute() {
                entry.to_path_buf()
            } else {
                base.join(entry)
            };
            if seen.insert(resolved.clone()) {
                jobs.push(resolved);
            } else {
                debug!("Duplicate manifest entry {}", resolved.display());
            }
        }
    }

    if jobs.is_empty() {
        warn!("Manifest {} lists no jobs", path.display());
    }
    Ok(jobs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::speaker::Speaker;
    use assert_fs::prelude::*;

    fn speakers() -> Arc<SpeakerTable> {
        Arc::new(
            SpeakerTable::new(
                vec![Speaker {
                    name: "narrator".to_string(),
                    ref_audio: PathBuf::from("narrator.wav"),
                    ref_text: "hello".to_string(),
                    speeds: vec![],
                }],
                None,
            )
            .unwrap(),
        )
    }

    #[test]
    fn manifest_is_deduplicated_in_order() {
        let temp = assert_fs::TempDir::new().unwrap();
        let manifest = temp.child("jobs.txt");
        manifest
            .write_str("# batch one\nshow/ep2.srt\n\nshow/ep1.srt\n  show/ep2.srt  \n/abs/ep3.srt\n# done\n")
            .unwrap();

        let jobs = load_manifest(manifest.path()).unwrap();
        assert_eq!(
            jobs,
            vec![
                temp.path().join("show/ep2.srt"),
                temp.path().join("show/ep1.srt"),
                PathBuf::from("/abs/ep3.srt"),
            ]
        );
    }

    #[test]
    fn manifest_directory_reads_files_in_name_order() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("manifests/b.txt").write_str("two.srt\none.srt\n").unwrap();
        temp.child("manifests/a.txt").write_str("one.srt\n").unwrap();

        let jobs = load_manifest(&temp.path().join("manifests")).unwrap();
        let base = temp.path().join("manifests");
        assert_eq!(jobs, vec![base.join("one.srt"), base.join("two.srt")]);
    }

    #[test]
    fn missing_manifest_is_an_error() {
        assert!(load_manifest(Path::new("/nonexistent/manifest.txt")).is_err());
    }

    #[test]
    fn discovery_skips_normalized_artifacts_and_pairs_videos() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("s1/ep1.srt").touch().unwrap();
        temp.child("s1/ep1.mkv").touch().unwrap();
        temp.child("s1/ep1/ep1_0_mod.srt").touch().unwrap();
        temp.child("s1/ep2.srt").touch().unwrap();
        temp.child("s1/notes.txt").touch().unwrap();

        let source = JobSource::new(JobConfig::default(), speakers());
        let subtitles = source.discover(temp.path()).unwrap();
        assert_eq!(
            subtitles,
            vec![temp.path().join("s1/ep1.srt"), temp.path().join("s1/ep2.srt")]
        );

        let candidates = source.candidates(&subtitles).unwrap();
        match &candidates[0] {
            Candidate::Ready(job) => {
                assert_eq!(job.video, temp.path().join("s1/ep1.mkv"));
                assert_eq!(job.work_dir, temp.path().join("s1/ep1"));
                assert_eq!(job.final_output(), temp.path().join("s1/ep1_out_mix.mkv"));
            }
            other => panic!("expected a ready job, got {:?}", other),
        }
        assert!(matches!(candidates[1], Candidate::MissingVideo { .. }));
    }

    #[test]
    fn video_extension_matches_any_case_and_keeps_it() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("ep1.srt").touch().unwrap();
        temp.child("ep1.MKV").touch().unwrap();
        temp.child("ep1.txt").touch().unwrap();
        let subtitle = temp.path().join("ep1.srt");

        let video = find_video(&subtitle, &JobConfig::default().video_extensions).unwrap();
        assert_eq!(video, temp.path().join("ep1.MKV"));

        let job = Job::new(&subtitle, &video, &JobConfig::default(), speakers()).unwrap();
        assert_eq!(job.final_output(), temp.path().join("ep1_out_mix.MKV"));
    }

    #[test]
    fn configured_extension_order_wins() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("ep1.srt").touch().unwrap();
        temp.child("ep1.Mov").touch().unwrap();
        temp.child("ep1.avi").touch().unwrap();

        let extensions = vec!["mov".to_string(), "avi".to_string()];
        let video = find_video(&temp.path().join("ep1.srt"), &extensions).unwrap();
        assert_eq!(video, temp.path().join("ep1.Mov"));
        assert_eq!(find_video(&temp.path().join("ep1.srt"), &["mp4".to_string()]), None);
    }

    #[test]
    fn output_folder_roots_the_work_dir() {
        let config = JobConfig {
            output_folder: Some(PathBuf::from("/out")),
            ..JobConfig::default()
        };
        let job = Job::new(Path::new("/in/ep1.srt"), Path::new("/in/ep1.mp4"), &config, speakers()).unwrap();
        assert_eq!(job.work_dir, PathBuf::from("/out/ep1"));
        assert_eq!(job.final_output(), PathBuf::from("/out/ep1_out_mix.mp4"));
    }
}
