use std::path::Path;
use tokio::fs;

use crate::error::{Result, RevoiceError};

/// One subtitle entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Cue {
    /// 1-based position in the file
    pub index: usize,
    pub start: f64,
    pub end: f64,
    pub text: String,
}

pub async fn read_srt<P: AsRef<Path>>(path: P) -> Result<Vec<Cue>> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).await?;
    parse_srt(&content).map_err(|e| match e {
        RevoiceError::InvalidSubtitle(message) => {
            RevoiceError::InvalidSubtitle(format!("{}: {}", path.display(), message))
        }
        other => other,
    })
}

/// Parse SRT text. Cues are renumbered 1-based in file order; multi-line text
/// is joined with single spaces.
pub fn parse_srt(content: &str) -> Result<Vec<Cue>> {
    let content = content.trim_start_matches('\u{feff}').replace("\r\n", "\n");
    let mut cues = Vec::new();

    for block in content.split("\n\n") {
        let mut lines = block.lines().map(str::trim).filter(|l| !l.is_empty());
        let Some(first) = lines.next() else {
            continue;
        };
        let timing = if first.contains("-->") {
            first
        } else {
            lines.next().ok_or_else(|| {
                RevoiceError::InvalidSubtitle(format!("cue '{}' has no timing line", first))
            })?
        };

        let (start, end) = parse_timing(timing)?;
        let text = lines.collect::<Vec<_>>().join(" ");
        cues.push(Cue {
            index: cues.len() + 1,
            start,
            end,
            text,
        });
    }

    Ok(cues)
}

fn parse_timing(line: &str) -> Result<(f64, f64)> {
    let (start, rest) = line
        .split_once("-->")
        .ok_or_else(|| RevoiceError::InvalidSubtitle(format!("bad timing line '{}'", line)))?;
    // Anything after the end time (positioning hints) is ignored
    let end = rest.split_whitespace().next().unwrap_or_default();
    Ok((parse_timestamp(start.trim())?, parse_timestamp(end)?))
}

/// `HH:MM:SS,mmm` (or `.mmm`) to seconds.
pub fn parse_timestamp(value: &str) -> Result<f64> {
    let invalid = || RevoiceError::InvalidSubtitle(format!("invalid timestamp '{}'", value));

    let (clock, millis) = value.split_once([',', '.']).ok_or_else(invalid)?;
    let parts: Vec<&str> = clock.split(':').collect();
    let [hours, minutes, seconds] = parts.as_slice() else {
        return Err(invalid());
    };

    let number = |s: &str| -> Result<u64> {
        if s.is_empty() || !s.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        s.parse::<u64>().map_err(|_| invalid())
    };
    let (hours, minutes, seconds) = (number(*hours)?, number(*minutes)?, number(*seconds)?);
    if millis.len() > 3 {
        return Err(invalid());
    }
    let millis_value = number(millis)?;
    if hours >= 24 || minutes >= 60 || seconds >= 60 {
        return Err(invalid());
    }

    let millis = millis_value as f64 / 10f64.powi(millis.len() as i32);
    Ok((hours * 3600 + minutes * 60 + seconds) as f64 + millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\u{feff}1\r\n00:00:01,000 --> 00:00:02,500\r\nHello\r\nthere\r\n\r\n7\n00:00:03.250 --> 00:00:05,000 X1:10\n[narrator] Next line\n\n\n";

    #[test]
    fn parses_and_renumbers_cues() {
        let cues = parse_srt(SAMPLE).unwrap();
        assert_eq!(cues.len(), 2);
        assert_eq!(cues[0].index, 1);
        assert_eq!(cues[0].text, "Hello there");
        assert_eq!((cues[0].start, cues[0].end), (1.0, 2.5));
        assert_eq!(cues[1].index, 2);
        assert_eq!(cues[1].start, 3.25);
        assert_eq!(cues[1].text, "[narrator] Next line");
    }

    #[test]
    fn rejects_malformed_timestamps() {
        for bad in ["00:00:01", "24:00:00,000", "00:60:00,000", "00:00:60,000", "0:0:a,000", "00:00:01,0000"] {
            assert!(parse_timestamp(bad).is_err(), "{} should be rejected", bad);
        }
        assert!((parse_timestamp("01:02:03,004").unwrap() - 3723.004).abs() < 1e-9);
    }
}
