use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::SpeakersConfig;
use crate::engine::{SynthesisRequest, Synthesizer};
use crate::error::{Result, RevoiceError};

/// Sentence synthesized at every calibration rate.
pub const CALIBRATION_TEXT: &str = "Some call me nature, others call me mother nature. \
Let's try some long text. We are just trying to get more fidelity. It's OK!";

/// Slack in seconds when comparing a calibrated time against a slot.
const FIT_TOLERANCE: f64 = 1e-9;

/// One row of a speaker's speed table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeedPoint {
    pub speed: f64,
    pub duration: f64,
    /// Seconds per character at this speed
    pub symbol_duration: f64,
    #[serde(default)]
    pub file_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Speaker {
    pub name: String,
    pub ref_audio: PathBuf,
    pub ref_text: String,
    pub speeds: Vec<SpeedPoint>,
}

impl Speaker {
    /// Starting rate for a cue of `text` in a `slot`-second window: the slowest
    /// calibrated rate whose per-character time fits, else the fastest one.
    pub fn typical_rate(&self, slot: f64, text: &str) -> f64 {
        let chars = text.chars().count();
        if self.speeds.is_empty() || chars == 0 || slot <= 0.0 {
            return 1.0;
        }
        let chars = chars as f64;

        // Exact fits must survive rounding (0.07 * 10 > 0.7 in f64)
        let fitting = self
            .speeds
            .iter()
            .filter(|p| p.symbol_duration * chars <= slot + FIT_TOLERANCE)
            .map(|p| p.speed)
            .fold(None, |slowest: Option<f64>, speed| {
                Some(slowest.map_or(speed, |s| s.min(speed)))
            });

        fitting.unwrap_or_else(|| {
            self.speeds
                .iter()
                .map(|p| p.speed)
                .fold(f64::MIN, f64::max)
        })
    }

    pub fn request(&self, text: &str, rate: f64, language: &str) -> SynthesisRequest {
        SynthesisRequest {
            text: text.to_string(),
            ref_audio: self.ref_audio.clone(),
            ref_text: self.ref_text.clone(),
            rate,
            language: language.to_string(),
        }
    }
}

/// Known speakers plus the default used for untagged cues.
#[derive(Debug, Clone)]
pub struct SpeakerTable {
    speakers: Vec<Speaker>,
    default: usize,
}

impl SpeakerTable {
    pub fn new(mut speakers: Vec<Speaker>, default: Option<&str>) -> Result<Self> {
        if speakers.is_empty() {
            return Err(RevoiceError::Config("At least one speaker is required".to_string()));
        }
        speakers.sort_by(|a, b| a.name.cmp(&b.name));
        speakers.dedup_by(|a, b| a.name == b.name);

        let default = match default {
            Some(name) => speakers
                .iter()
                .position(|s| s.name == name)
                .ok_or_else(|| RevoiceError::Config(format!("Default speaker '{}' is not defined", name)))?,
            None => 0,
        };

        Ok(Self { speakers, default })
    }

    /// Speakers from `[speakers.voices]` and the optional voice folder.
    /// Relative paths are resolved against `base_dir`.
    pub fn from_config(config: &SpeakersConfig, base_dir: &Path) -> Result<Self> {
        let resolve = |p: &Path| if p.is_absolute() { p.to_path_buf() } else { base_dir.join(p) };
        let mut speakers = Vec::new();

        for (name, voice) in &config.voices {
            let speeds = match &voice.speeds {
                Some(path) => read_speed_table(&resolve(path))?,
                None => Vec::new(),
            };
            speakers.push(Speaker {
                name: name.clone(),
                ref_audio: resolve(&voice.ref_audio),
                ref_text: voice.ref_text.clone(),
                speeds,
            });
        }

        if let Some(folder) = &config.folder {
            for speaker in speakers_from_folder(&resolve(folder))? {
                if speakers.iter().any(|s| s.name == speaker.name) {
                    debug!("Speaker {} is configured explicitly; ignoring folder copy", speaker.name);
                    continue;
                }
                speakers.push(speaker);
            }
        }

        let table = Self::new(speakers, config.default.as_deref())?;
        info!(
            "Loaded {} speaker(s), default '{}'",
            table.speakers.len(),
            table.default_speaker().name
        );
        Ok(table)
    }

    pub fn get(&self, name: &str) -> Option<&Speaker> {
        self.speakers.iter().find(|s| s.name == name)
    }

    pub fn default_speaker(&self) -> &Speaker {
        &self.speakers[self.default]
    }

    pub fn speakers(&self) -> &[Speaker] {
        &self.speakers
    }

    /// Speaker for a cue. A leading `[name]` or `[name]:` tag naming a known
    /// speaker selects it and is stripped from the returned text.
    pub fn resolve<'a>(&self, text: &'a str) -> (&Speaker, &'a str) {
        let trimmed = text.trim_start();
        if let Some(rest) = trimmed.strip_prefix('[') {
            if let Some((name, after)) = rest.split_once(']') {
                if let Some(speaker) = self.get(name.trim()) {
                    let after = after.strip_prefix(':').unwrap_or(after);
                    return (speaker, after.trim_start());
                }
            }
        }
        (self.default_speaker(), text)
    }
}

/// Every `<name>.wav` with a `<name>.txt` transcript beside it, plus an
/// optional `<name>_speeds.csv` table.
pub fn speakers_from_folder(folder: &Path) -> Result<Vec<Speaker>> {
    if !folder.is_dir() {
        return Err(RevoiceError::FileNotFound(format!("voice folder {}", folder.display())));
    }

    let mut entries: Vec<PathBuf> = std::fs::read_dir(folder)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("wav")))
        .collect();
    entries.sort();

    let mut speakers = Vec::new();
    for ref_audio in entries {
        let Some(name) = ref_audio.file_stem().map(|s| s.to_string_lossy().to_string()) else {
            continue;
        };
        let transcript = ref_audio.with_extension("txt");
        if !transcript.is_file() {
            warn!("Voice {} has no transcript {}; skipping", ref_audio.display(), transcript.display());
            continue;
        }
        let ref_text = std::fs::read_to_string(&transcript)?.trim().to_string();

        let table = folder.join(format!("{}_speeds.csv", name));
        let speeds = if table.is_file() {
            read_speed_table(&table)?
        } else {
            Vec::new()
        };

        speakers.push(Speaker {
            name,
            ref_audio,
            ref_text,
            speeds,
        });
    }
    Ok(speakers)
}

pub fn read_speed_table(path: &Path) -> Result<Vec<SpeedPoint>> {
    let mut reader = csv::Reader::from_path(path)?;
    let points = reader.deserialize().collect::<std::result::Result<Vec<SpeedPoint>, _>>()?;
    Ok(points)
}

pub fn write_speed_table(path: &Path, points: &[SpeedPoint]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for point in points {
        writer.serialize(point)?;
    }
    writer.flush()?;
    Ok(())
}

/// Calibration rates 0.3, 0.4, ... 2.5.
pub fn calibration_rates() -> Vec<f64> {
    (3..=25).map(|tenths| tenths as f64 / 10.0).collect()
}

/// Synthesize [`CALIBRATION_TEXT`] at every calibration rate and record how
/// long each character takes. Clips are kept in `work_dir`.
pub async fn calibrate(
    synthesizer: &dyn Synthesizer,
    speaker: &Speaker,
    language: &str,
    work_dir: &Path,
) -> Result<Vec<SpeedPoint>> {
    std::fs::create_dir_all(work_dir)?;
    let chars = CALIBRATION_TEXT.chars().count() as f64;
    let mut points = Vec::new();

    for rate in calibration_rates() {
        let clip = work_dir.join(format!("{}_gen_out_{:.1}.wav", speaker.name, rate));
        let request = speaker.request(CALIBRATION_TEXT, rate, language);
        let duration = synthesizer.synthesize(&request, &clip).await?;
        info!("Calibrated {} at rate {:.1}: {:.2}s", speaker.name, rate, duration);
        points.push(SpeedPoint {
            speed: rate,
            duration,
            symbol_duration: duration / chars,
            file_name: Some(clip.display().to_string()),
        });
    }
    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VoiceConfig;
    use crate::engine::MockSynthesizer;
    use assert_fs::prelude::*;

    fn point(speed: f64, symbol_duration: f64) -> SpeedPoint {
        SpeedPoint {
            speed,
            duration: symbol_duration * 100.0,
            symbol_duration,
            file_name: None,
        }
    }

    fn speaker(name: &str, speeds: Vec<SpeedPoint>) -> Speaker {
        Speaker {
            name: name.to_string(),
            ref_audio: PathBuf::from(format!("{}.wav", name)),
            ref_text: "reference".to_string(),
            speeds,
        }
    }

    #[test]
    fn typical_rate_picks_slowest_that_fits() {
        let narrator = speaker(
            "narrator",
            vec![point(0.8, 0.09), point(1.0, 0.07), point(1.2, 0.06), point(1.5, 0.05)],
        );
        // 10 chars in 0.7s: 0.07 s/char needed
        assert_eq!(narrator.typical_rate(0.7, "abcdefghij"), 1.0);
        // Nothing is fast enough
        assert_eq!(narrator.typical_rate(0.1, "abcdefghij"), 1.5);
        // Everything fits
        assert_eq!(narrator.typical_rate(5.0, "abcdefghij"), 0.8);
        assert_eq!(speaker("plain", vec![]).typical_rate(1.0, "abc"), 1.0);
    }

    #[test]
    fn exact_fit_counts_as_fitting() {
        // 0.1 * 3 rounds above 0.3
        let narrator = speaker("narrator", vec![point(0.9, 0.11), point(1.0, 0.1), point(1.3, 0.08)]);
        assert_eq!(narrator.typical_rate(0.3, "abc"), 1.0);
        // Just over the slot still falls through to the next rate
        assert_eq!(narrator.typical_rate(0.299, "abc"), 1.3);
    }

    #[test]
    fn tags_select_known_speakers() {
        let table = SpeakerTable::new(
            vec![speaker("narrator", vec![]), speaker("anna", vec![])],
            Some("narrator"),
        )
        .unwrap();

        let (who, text) = table.resolve("[anna]: Hi there");
        assert_eq!(who.name, "anna");
        assert_eq!(text, "Hi there");

        let (who, text) = table.resolve("[anna] Hi");
        assert_eq!((who.name.as_str(), text), ("anna", "Hi"));

        let (who, text) = table.resolve("[bob] Hi");
        assert_eq!((who.name.as_str(), text), ("narrator", "[bob] Hi"));
    }

    #[test]
    fn table_requires_speakers_and_known_default() {
        assert!(SpeakerTable::new(vec![], None).is_err());
        assert!(SpeakerTable::new(vec![speaker("a", vec![])], Some("b")).is_err());
        let table = SpeakerTable::new(vec![speaker("b", vec![]), speaker("a", vec![])], None).unwrap();
        assert_eq!(table.default_speaker().name, "a");
    }

    #[test]
    fn loads_voice_folder_and_config() {
        let temp = assert_fs::TempDir::new().unwrap();
        let voices = temp.child("VOICE");
        voices.create_dir_all().unwrap();
        voices.child("anna.wav").touch().unwrap();
        voices.child("anna.txt").write_str("some call me nature\n").unwrap();
        voices
            .child("anna_speeds.csv")
            .write_str("speed,duration,symbol_duration,file_name\n1.0,7.0,0.07,a.wav\n1.2,6.0,0.06,\n")
            .unwrap();
        voices.child("orphan.wav").touch().unwrap();

        let mut config = SpeakersConfig {
            default: Some("narrator".to_string()),
            folder: Some(PathBuf::from("VOICE")),
            ..SpeakersConfig::default()
        };
        config.voices.insert(
            "narrator".to_string(),
            VoiceConfig {
                ref_audio: PathBuf::from("narrator.wav"),
                ref_text: "hello".to_string(),
                speeds: None,
            },
        );

        let table = SpeakerTable::from_config(&config, temp.path()).unwrap();
        assert_eq!(table.speakers().len(), 2);
        assert_eq!(table.default_speaker().name, "narrator");
        assert_eq!(table.default_speaker().ref_audio, temp.path().join("narrator.wav"));

        let anna = table.get("anna").unwrap();
        assert_eq!(anna.ref_text, "some call me nature");
        assert_eq!(anna.speeds.len(), 2);
        assert_eq!(anna.speeds[1].file_name, None);
        assert!(table.get("orphan").is_none());
    }

    #[tokio::test]
    async fn calibration_covers_every_rate() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = MockSynthesizer::new();
        engine
            .expect_synthesize()
            .times(23)
            .returning(|request, _| Ok(13.0 / request.rate));

        let narrator = speaker("narrator", vec![]);
        let points = calibrate(&engine, &narrator, "en", dir.path()).await.unwrap();

        assert_eq!(points.len(), 23);
        assert_eq!(points[0].speed, 0.3);
        assert_eq!(points[22].speed, 2.5);
        assert!(points.windows(2).all(|w| w[1].symbol_duration < w[0].symbol_duration));

        let table = dir.path().join("narrator_speeds.csv");
        write_speed_table(&table, &points).unwrap();
        assert_eq!(read_speed_table(&table).unwrap(), points);
    }
}
