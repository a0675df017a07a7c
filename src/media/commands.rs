use std::path::Path;
use tokio::process::Command;
use tracing::debug;

use crate::error::{Result, RevoiceError};

/// Abstract media processing command representation
#[derive(Debug, Clone)]
pub struct MediaCommand {
    pub binary_path: String,
    pub args: Vec<String>,
    pub description: String,
}

impl MediaCommand {
    /// Create a new media processing command
    pub fn new<S1: Into<String>, S2: Into<String>>(binary_path: S1, description: S2) -> Self {
        Self {
            binary_path: binary_path.into(),
            args: Vec::new(),
            description: description.into(),
        }
    }

    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn input<P: AsRef<Path>>(self, path: P) -> Self {
        self.arg("-i").arg(path.as_ref().to_string_lossy().to_string())
    }

    pub fn output<P: AsRef<Path>>(self, path: P) -> Self {
        self.arg(path.as_ref().to_string_lossy().to_string())
    }

    /// Force overwrite output
    pub fn overwrite(self) -> Self {
        self.arg("-y")
    }

    pub fn video_codec<S: Into<String>>(self, codec: S) -> Self {
        self.arg("-c:v").arg(codec)
    }

    pub fn audio_codec<S: Into<String>>(self, codec: S) -> Self {
        self.arg("-c:a").arg(codec)
    }

    pub fn audio_bitrate<S: Into<String>>(self, bitrate: S) -> Self {
        self.arg("-b:a").arg(bitrate)
    }

    pub fn no_video(self) -> Self {
        self.arg("-vn")
    }

    pub fn audio_sample_rate(self, rate: u32) -> Self {
        self.arg("-ar").arg(rate.to_string())
    }

    pub fn audio_channels(self, channels: u32) -> Self {
        self.arg("-ac").arg(channels.to_string())
    }

    pub fn audio_filter<S: Into<String>>(self, filter: S) -> Self {
        self.arg("-af").arg(filter)
    }

    pub fn filter_complex<S: Into<String>>(self, graph: S) -> Self {
        self.arg("-filter_complex").arg(graph)
    }

    pub fn map<S: Into<String>>(self, stream: S) -> Self {
        self.arg("-map").arg(stream)
    }

    /// Execute the command
    pub async fn execute(&self) -> Result<()> {
        debug!("Executing media processing command: {} {:?}", self.binary_path, self.args);
        debug!("Description: {}", self.description);

        let output = Command::new(&self.binary_path)
            .args(&self.args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| RevoiceError::Media(format!("Failed to execute media processor: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RevoiceError::Media(format!(
                "{} failed: {}",
                self.description,
                stderr.trim()
            )));
        }

        Ok(())
    }
}

/// Weights applied inside dubbed cue intervals.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MixCoefficients {
    pub voice: f64,
    pub accompaniment: f64,
}

/// Builder for the ffmpeg invocations the pipeline needs
#[derive(Debug, Clone)]
pub struct MediaCommandBuilder {
    binary_path: String,
}

impl MediaCommandBuilder {
    pub fn new<S: Into<String>>(binary_path: S) -> Self {
        Self {
            binary_path: binary_path.into(),
        }
    }

    /// Full soundtrack as 16-bit PCM at its native rate and layout
    pub fn extract_audio<P: AsRef<Path>>(&self, video_path: P, audio_path: P) -> MediaCommand {
        MediaCommand::new(&self.binary_path, "Audio extraction")
            .overwrite()
            .input(video_path)
            .no_video()
            .audio_codec("pcm_s16le")
            .output(audio_path)
    }

    /// Loudness-normalized stereo copy, resampled to `sample_rate`
    pub fn normalize<P: AsRef<Path>>(
        &self,
        input_path: P,
        output_path: P,
        sample_rate: u32,
        loudness_target: f64,
    ) -> MediaCommand {
        MediaCommand::new(&self.binary_path, "Loudness normalization")
            .overwrite()
            .input(input_path)
            .audio_filter(loudnorm(loudness_target))
            .audio_sample_rate(sample_rate)
            .audio_channels(2)
            .audio_codec("pcm_s16le")
            .output(output_path)
    }

    /// Background track: the normalized original outside `intervals`, and a
    /// weighted blend of original and accompaniment inside them.
    pub fn mix_background<P: AsRef<Path>>(
        &self,
        original_path: P,
        accompaniment_path: P,
        output_path: P,
        intervals: &[(f64, f64)],
        coefficients: MixCoefficients,
        sample_rate: u32,
        loudness_target: f64,
    ) -> MediaCommand {
        let graph = background_filter_graph(intervals, coefficients, sample_rate, loudness_target);
        MediaCommand::new(&self.binary_path, "Background mixing")
            .overwrite()
            .input(original_path)
            .input(accompaniment_path)
            .filter_complex(graph)
            .map("[out]")
            .audio_codec("pcm_s16le")
            .output(output_path)
    }

    /// Copy the video stream and replace its audio with background + dub
    pub fn mux<P: AsRef<Path>>(
        &self,
        video_path: P,
        background_path: P,
        voice_path: P,
        output_path: P,
        audio_codec: &str,
        audio_bitrate: &str,
        sample_rate: u32,
    ) -> MediaCommand {
        MediaCommand::new(&self.binary_path, "Video muxing")
            .overwrite()
            .input(video_path)
            .input(background_path)
            .input(voice_path)
            .filter_complex("[1:a][2:a]amix=inputs=2:duration=first[a]")
            .map("0:v")
            .map("[a]")
            .video_codec("copy")
            .audio_codec(audio_codec)
            .audio_bitrate(audio_bitrate)
            .audio_sample_rate(sample_rate)
            .output(output_path)
    }

    pub fn version_check(&self) -> MediaCommand {
        MediaCommand::new(&self.binary_path, "Version check").arg("-version")
    }
}

fn loudnorm(target: f64) -> String {
    format!("loudnorm=I={}:TP=-1.5:LRA=11", target)
}

/// ffmpeg expression that is 1 while `t` is inside any interval.
fn inside_expression(intervals: &[(f64, f64)]) -> String {
    if intervals.is_empty() {
        return "0".to_string();
    }
    let terms = intervals
        .iter()
        .map(|(start, end)| format!("between(t,{:.3},{:.3})", start, end))
        .collect::<Vec<_>>()
        .join("+");
    format!("gt({},0)", terms)
}

pub(crate) fn background_filter_graph(
    intervals: &[(f64, f64)],
    coefficients: MixCoefficients,
    sample_rate: u32,
    loudness_target: f64,
) -> String {
    let inside = inside_expression(intervals);
    format!(
        "[0:a]{norm},aresample={sr},aformat=channel_layouts=stereo,\
         volume='if({inside},{voice},1)':eval=frame[orig];\
         [1:a]aresample={sr},aformat=channel_layouts=stereo,\
         volume='if({inside},{acc},0)':eval=frame[acc];\
         [orig][acc]amix=inputs=2:duration=first:normalize=0[out]",
        norm = loudnorm(loudness_target),
        sr = sample_rate,
        inside = inside,
        voice = coefficients.voice,
        acc = coefficients.accompaniment,
    )
}
