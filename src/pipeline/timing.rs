use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

use crate::error::Result;
use crate::speaker::SpeakerTable;
use crate::subtitle::Cue;

/// One cue row: `index,start,end,text,speaker,rate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingRow {
    pub index: usize,
    pub start: f64,
    pub end: f64,
    pub text: String,
    pub speaker: Option<String>,
    pub rate: Option<f64>,
}

impl TimingRow {
    pub fn slot(&self) -> f64 {
        (self.end - self.start).max(0.0)
    }

    pub fn has_text(&self) -> bool {
        !self.text.trim().is_empty()
    }
}

impl From<&Cue> for TimingRow {
    fn from(cue: &Cue) -> Self {
        Self {
            index: cue.index,
            start: cue.start,
            end: cue.end,
            text: cue.text.clone(),
            speaker: None,
            rate: None,
        }
    }
}

pub fn read_table(path: &Path) -> Result<Vec<TimingRow>> {
    let mut reader = csv::Reader::from_path(path)?;
    let rows = reader.deserialize().collect::<std::result::Result<Vec<TimingRow>, _>>()?;
    Ok(rows)
}

pub fn write_table(path: &Path, rows: &[TimingRow]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Attach a speaker to every row, stripping recognised `[name]` tags.
pub fn annotate_speakers(rows: &[TimingRow], speakers: &SpeakerTable) -> Vec<TimingRow> {
    rows.iter()
        .map(|row| {
            let (speaker, text) = speakers.resolve(&row.text);
            TimingRow {
                text: text.to_string(),
                speaker: Some(speaker.name.clone()),
                ..row.clone()
            }
        })
        .collect()
}

/// Attach each speaker's typical starting rate for the row's slot.
pub fn annotate_rates(rows: &[TimingRow], speakers: &SpeakerTable) -> Vec<TimingRow> {
    rows.iter()
        .map(|row| {
            let speaker = row
                .speaker
                .as_deref()
                .and_then(|name| speakers.get(name))
                .unwrap_or_else(|| speakers.default_speaker());
            TimingRow {
                rate: Some(speaker.typical_rate(row.slot(), &row.text)),
                ..row.clone()
            }
        })
        .collect()
}

/// `end = start + fragment length` for rows with speech; empty rows collapse
/// to zero length. `fragment_duration` returns `None` for a missing fragment.
pub fn correct_end_times<F>(rows: &[TimingRow], mut fragment_duration: F) -> Result<Vec<TimingRow>>
where
    F: FnMut(usize) -> Result<Option<f64>>,
{
    rows.iter()
        .map(|row| {
            if !row.has_text() {
                return Ok(TimingRow {
                    end: row.start,
                    ..row.clone()
                });
            }
            match fragment_duration(row.index)? {
                Some(duration) => Ok(TimingRow {
                    end: row.start + duration,
                    ..row.clone()
                }),
                None => {
                    warn!("No fragment for cue {}; keeping its subtitle end time", row.index);
                    Ok(row.clone())
                }
            }
        })
        .collect()
}

/// Original slots of cues with speech, used to gate the background mix.
pub fn volume_intervals(rows: &[TimingRow]) -> Vec<(f64, f64)> {
    rows.iter()
        .filter(|row| row.has_text() && row.end > row.start)
        .map(|row| (row.start, row.end))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::speaker::{Speaker, SpeedPoint};
    use std::path::PathBuf;

    fn row(index: usize, start: f64, end: f64, text: &str) -> TimingRow {
        TimingRow {
            index,
            start,
            end,
            text: text.to_string(),
            speaker: None,
            rate: None,
        }
    }

    fn speakers() -> SpeakerTable {
        let voice = |name: &str, speeds: Vec<SpeedPoint>| Speaker {
            name: name.to_string(),
            ref_audio: PathBuf::from(format!("{}.wav", name)),
            ref_text: String::new(),
            speeds,
        };
        let fast_table = vec![
            SpeedPoint { speed: 1.0, duration: 10.0, symbol_duration: 0.1, file_name: None },
            SpeedPoint { speed: 2.0, duration: 5.0, symbol_duration: 0.05, file_name: None },
        ];
        SpeakerTable::new(vec![voice("narrator", vec![]), voice("anna", fast_table)], Some("narrator")).unwrap()
    }

    #[test]
    fn table_survives_csv_with_empty_annotations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ep_1.0_srt.csv");
        let rows = vec![row(1, 0.5, 1.75, "Hello, \"friend\""), row(2, 2.0, 3.0, "")];

        write_table(&path, &rows).unwrap();
        let header = std::fs::read_to_string(&path).unwrap();
        assert!(header.starts_with("index,start,end,text,speaker,rate\n"));
        assert_eq!(read_table(&path).unwrap(), rows);
    }

    #[test]
    fn speakers_and_rates_are_annotated() {
        let table = speakers();
        let rows = vec![row(1, 0.0, 0.5, "[anna]: abcdefghij"), row(2, 1.0, 2.0, "plain")];

        let with_speakers = annotate_speakers(&rows, &table);
        assert_eq!(with_speakers[0].speaker.as_deref(), Some("anna"));
        assert_eq!(with_speakers[0].text, "abcdefghij");
        assert_eq!(with_speakers[1].speaker.as_deref(), Some("narrator"));

        let with_rates = annotate_rates(&with_speakers, &table);
        // 0.05 s/char needed: only 2.0 fits
        assert_eq!(with_rates[0].rate, Some(2.0));
        assert_eq!(with_rates[1].rate, Some(1.0));
    }

    #[test]
    fn end_times_follow_fragment_lengths() {
        let rows = vec![row(1, 0.0, 1.0, "a"), row(2, 2.0, 3.0, "b"), row(3, 4.0, 5.0, " ")];
        let corrected = correct_end_times(&rows, |index| Ok(if index == 1 { Some(1.5) } else { None })).unwrap();

        assert_eq!(corrected[0].end, 1.5);
        assert_eq!(corrected[1].end, 3.0);
        assert_eq!(corrected[2].end, 4.0);
        assert_eq!(volume_intervals(&rows), vec![(0.0, 1.0), (2.0, 3.0)]);
    }
}
