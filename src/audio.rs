use hound::{Sample, SampleFormat, WavReader, WavSpec, WavWriter};
use std::io::{Read, Seek, Write};
use std::path::{Path, PathBuf};

use crate::error::{Result, RevoiceError};

pub fn wav_spec(path: &Path) -> Result<WavSpec> {
    Ok(WavReader::open(path)?.spec())
}

/// Playback length in seconds.
pub fn wav_duration(path: &Path) -> Result<f64> {
    let reader = WavReader::open(path)?;
    let spec = reader.spec();
    Ok(reader.duration() as f64 / spec.sample_rate as f64)
}

/// One fragment to place on the assembled track.
#[derive(Debug, Clone)]
pub struct Placement {
    pub index: usize,
    /// Cue start in seconds
    pub start: f64,
    pub fragment: PathBuf,
}

/// Where each fragment actually landed.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedFragment {
    pub index: usize,
    pub offset: f64,
    pub duration: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssembledTrack {
    pub duration: f64,
    pub fragments: Vec<PlacedFragment>,
}

/// Concatenate fragments in order, padding with silence up to each cue start.
///
/// The silence before a fragment is measured from the previous cue's
/// `start + fragment length`, not from the end of the audio written so far.
/// Samples are always appended, so an overrun pushes later cues forward and
/// nothing overlaps. All fragments must share the first fragment's format.
pub fn assemble_track(placements: &[Placement], output: &Path) -> Result<AssembledTrack> {
    let Some(first) = placements.first() else {
        return Err(RevoiceError::Media("no fragments to assemble".to_string()));
    };
    let spec = wav_spec(&first.fragment)?;
    let mut writer = WavWriter::create(output, spec)?;

    let rate = spec.sample_rate as f64;
    let channels = spec.channels as usize;
    let mut written: u64 = 0;
    let mut previous_end: u64 = 0;
    let mut fragments = Vec::with_capacity(placements.len());

    for placement in placements {
        let mut reader = WavReader::open(&placement.fragment)?;
        let fragment_spec = reader.spec();
        if fragment_spec != spec {
            return Err(RevoiceError::Media(format!(
                "{} has format {}Hz/{}ch/{}bit, expected {}Hz/{}ch/{}bit",
                placement.fragment.display(),
                fragment_spec.sample_rate,
                fragment_spec.channels,
                fragment_spec.bits_per_sample,
                spec.sample_rate,
                spec.channels,
                spec.bits_per_sample
            )));
        }

        let start_frame = (placement.start.max(0.0) * rate).round() as u64;
        if start_frame > previous_end {
            let gap = start_frame - previous_end;
            write_silence(&mut writer, spec, gap as usize * channels)?;
            written += gap;
        }

        let frames = reader.duration() as u64;
        copy_samples(&mut reader, &mut writer, spec)?;
        fragments.push(PlacedFragment {
            index: placement.index,
            offset: written as f64 / rate,
            duration: frames as f64 / rate,
        });
        written += frames;
        previous_end = start_frame + frames;
    }

    writer.finalize()?;
    Ok(AssembledTrack {
        duration: written as f64 / rate,
        fragments,
    })
}

/// Copy `input` to `output` as two channels, duplicating mono audio.
pub fn to_stereo(input: &Path, output: &Path) -> Result<()> {
    let mut reader = WavReader::open(input)?;
    let spec = reader.spec();
    let stereo = WavSpec { channels: 2, ..spec };
    let mut writer = WavWriter::create(output, stereo)?;

    match (spec.channels, spec.sample_format) {
        (2, _) => copy_samples(&mut reader, &mut writer, spec)?,
        (1, SampleFormat::Int) => duplicate::<i32, _, _>(&mut reader, &mut writer)?,
        (1, SampleFormat::Float) => duplicate::<f32, _, _>(&mut reader, &mut writer)?,
        (n, _) => {
            return Err(RevoiceError::Media(format!(
                "{} has {} channels; only mono or stereo is supported",
                input.display(),
                n
            )))
        }
    }

    writer.finalize()?;
    Ok(())
}

fn copy_samples<R: Read, W: Write + Seek>(
    reader: &mut WavReader<R>,
    writer: &mut WavWriter<W>,
    spec: WavSpec,
) -> Result<()> {
    match spec.sample_format {
        SampleFormat::Int => copy_as::<i32, _, _>(reader, writer),
        SampleFormat::Float => copy_as::<f32, _, _>(reader, writer),
    }
}

fn copy_as<S: Sample, R: Read, W: Write + Seek>(
    reader: &mut WavReader<R>,
    writer: &mut WavWriter<W>,
) -> Result<()> {
    for sample in reader.samples::<S>() {
        writer.write_sample(sample?)?;
    }
    Ok(())
}

fn duplicate<S: Sample + Copy, R: Read, W: Write + Seek>(
    reader: &mut WavReader<R>,
    writer: &mut WavWriter<W>,
) -> Result<()> {
    for sample in reader.samples::<S>() {
        let sample = sample?;
        writer.write_sample(sample)?;
        writer.write_sample(sample)?;
    }
    Ok(())
}

fn write_silence<W: Write + Seek>(writer: &mut WavWriter<W>, spec: WavSpec, samples: usize) -> Result<()> {
    for _ in 0..samples {
        match spec.sample_format {
            SampleFormat::Int => writer.write_sample(0i32)?,
            SampleFormat::Float => writer.write_sample(0.0f32)?,
        }
    }
    Ok(())
}

/// Write `seconds` of a constant tone. Used by fakes and calibration tests.
#[cfg(test)]
pub(crate) fn write_tone(path: &Path, seconds: f64, sample_rate: u32, channels: u16) {
    let spec = WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec).unwrap();
    let frames = (seconds * sample_rate as f64).round() as usize;
    for _ in 0..frames * channels as usize {
        writer.write_sample(1000i16).unwrap();
    }
    writer.finalize().unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 8000;

    fn placements(dir: &Path, cues: &[(f64, f64)]) -> Vec<Placement> {
        cues.iter()
            .enumerate()
            .map(|(i, (start, length))| {
                let fragment = dir.join(format!("segment_{}.wav", i + 1));
                write_tone(&fragment, *length, RATE, 1);
                Placement {
                    index: i + 1,
                    start: *start,
                    fragment,
                }
            })
            .collect()
    }

    #[test]
    fn overrunning_fragment_pushes_the_next_one_forward() {
        let dir = tempfile::tempdir().unwrap();
        let cues = placements(dir.path(), &[(0.0, 1.0), (2.0, 4.0), (5.0, 1.0)]);
        let output = dir.path().join("track.wav");

        let track = assemble_track(&cues, &output).unwrap();

        let offsets: Vec<f64> = track.fragments.iter().map(|f| f.offset).collect();
        assert_eq!(offsets, vec![0.0, 2.0, 6.0]);
        assert!((track.duration - 7.0).abs() < 1e-9);
        assert!((wav_duration(&output).unwrap() - 7.0).abs() < 1e-9);

        // 1s..2s is silence, the rest is tone
        let samples: Vec<i16> = WavReader::open(&output)
            .unwrap()
            .samples::<i16>()
            .map(|s| s.unwrap())
            .collect();
        let second = RATE as usize;
        assert!(samples[..second].iter().all(|&s| s == 1000));
        assert!(samples[second..2 * second].iter().all(|&s| s == 0));
        assert!(samples[2 * second..].iter().all(|&s| s == 1000));
    }

    #[test]
    fn silence_is_measured_from_the_previous_cue_end() {
        let dir = tempfile::tempdir().unwrap();
        let cues = placements(dir.path(), &[(0.0, 1.0), (2.0, 4.0), (5.0, 1.0), (6.5, 1.0)]);
        let output = dir.path().join("track.wav");

        let track = assemble_track(&cues, &output).unwrap();

        // Cue 3 ends at 5 + 1 = 6, so 0.5s of silence precedes cue 4
        let offsets: Vec<f64> = track.fragments.iter().map(|f| f.offset).collect();
        assert_eq!(offsets, vec![0.0, 2.0, 6.0, 7.5]);
        assert!((track.duration - 8.5).abs() < 1e-9);

        let samples: Vec<i16> = WavReader::open(&output)
            .unwrap()
            .samples::<i16>()
            .map(|s| s.unwrap())
            .collect();
        let at = |seconds: f64| (seconds * RATE as f64) as usize;
        assert!(samples[at(7.0)..at(7.5)].iter().all(|&s| s == 0));
        assert!(samples[at(7.5)..].iter().all(|&s| s == 1000));
    }

    #[test]
    fn gaps_before_first_cue_are_silent() {
        let dir = tempfile::tempdir().unwrap();
        let cues = placements(dir.path(), &[(1.5, 0.5)]);
        let output = dir.path().join("track.wav");

        let track = assemble_track(&cues, &output).unwrap();
        assert!((track.duration - 2.0).abs() < 1e-9);
        assert_eq!(track.fragments[0].offset, 1.5);
    }

    #[test]
    fn mismatched_sample_rate_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut cues = placements(dir.path(), &[(0.0, 1.0)]);
        let odd = dir.path().join("odd.wav");
        write_tone(&odd, 1.0, 16000, 1);
        cues.push(Placement {
            index: 2,
            start: 2.0,
            fragment: odd,
        });

        let result = assemble_track(&cues, &dir.path().join("track.wav"));
        assert!(matches!(result, Err(RevoiceError::Media(_))));
    }

    #[test]
    fn mono_becomes_stereo() {
        let dir = tempfile::tempdir().unwrap();
        let mono = dir.path().join("mono.wav");
        let stereo = dir.path().join("stereo.wav");
        write_tone(&mono, 0.5, RATE, 1);

        to_stereo(&mono, &stereo).unwrap();

        let spec = wav_spec(&stereo).unwrap();
        assert_eq!(spec.channels, 2);
        assert!((wav_duration(&stereo).unwrap() - 0.5).abs() < 1e-9);
    }
}
