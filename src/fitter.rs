use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, warn};

use crate::config::FitterConfig;
use crate::engine::{SynthesisRequest, Synthesizer};
use crate::error::Result;

/// One synthesis attempt.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpeedSample {
    pub rate: f64,
    pub duration: f64,
}

/// Result of fitting one cue. The clip on disk always matches `rate`/`duration`.
#[derive(Debug, Clone, PartialEq)]
pub struct FitOutcome {
    pub rate: f64,
    pub duration: f64,
    pub samples: Vec<SpeedSample>,
    /// The iteration cap was hit and the fallback rate was accepted as-is
    pub exhausted: bool,
}

impl FitOutcome {
    pub fn synthesis_calls(&self) -> usize {
        self.samples.len()
    }
}

/// Rate at which the line through `(rate0, duration0)` and `(rate1, duration1)`
/// reaches `target`. Returns `rate0` when the two durations are equal.
pub fn linear_predict(rate0: f64, duration0: f64, rate1: f64, duration1: f64, target: f64) -> f64 {
    if duration1 == duration0 {
        return rate0;
    }
    rate0 + (target - duration0) * (rate1 - rate0) / (duration1 - duration0)
}

#[derive(Debug, Clone)]
pub struct DurationFitter {
    step: f64,
    max_iterations: usize,
    min_rate: f64,
    max_rate: f64,
}

impl Default for DurationFitter {
    fn default() -> Self {
        Self::from_config(&FitterConfig::default())
    }
}

impl DurationFitter {
    pub fn from_config(config: &FitterConfig) -> Self {
        Self {
            step: config.step,
            max_iterations: config.max_iterations,
            min_rate: config.min_rate,
            max_rate: config.max_rate,
        }
    }

    fn clamp(&self, rate: f64) -> f64 {
        rate.clamp(self.min_rate, self.max_rate)
    }

    /// Synthesize `request` into `output`, speeding up until the clip is no
    /// longer than `target` seconds.
    ///
    /// Starts at `request.rate`. Each round tries one fixed step faster and
    /// extrapolates linearly from the last two samples; the extrapolated rate
    /// is only used when it jumps further than the step. After
    /// `max_iterations` rounds the clip is synthesized once more at the first
    /// stepped rate and accepted whatever its length.
    pub async fn fit(
        &self,
        synthesizer: &dyn Synthesizer,
        request: &SynthesisRequest,
        target: f64,
        output: &Path,
    ) -> Result<FitOutcome> {
        let mut samples = Vec::new();

        let initial = self.clamp(request.rate);
        let mut current = self.sample(synthesizer, request, initial, output, &mut samples).await?;
        if current.duration <= target {
            return Ok(outcome(current, samples, false));
        }

        let fallback_rate = self.clamp(initial + self.step);
        for _ in 0..self.max_iterations {
            let stepped_rate = self.clamp(current.rate + self.step);
            let stepped = self.sample(synthesizer, request, stepped_rate, output, &mut samples).await?;

            let predicted = self.clamp(linear_predict(
                current.rate,
                current.duration,
                stepped.rate,
                stepped.duration,
                target,
            ));

            current = if predicted - current.rate > self.step {
                debug!(
                    "Extrapolated rate {:.3} from ({:.3}, {:.3}s) and ({:.3}, {:.3}s)",
                    predicted, current.rate, current.duration, stepped.rate, stepped.duration
                );
                self.sample(synthesizer, request, predicted, output, &mut samples).await?
            } else {
                stepped
            };

            if current.duration <= target {
                return Ok(outcome(current, samples, false));
            }
        }

        warn!(
            "Could not fit \"{}\" into {:.3}s after {} rounds; accepting rate {:.3}",
            request.text, target, self.max_iterations, fallback_rate
        );
        let last = self.sample(synthesizer, request, fallback_rate, output, &mut samples).await?;
        Ok(outcome(last, samples, true))
    }

    async fn sample(
        &self,
        synthesizer: &dyn Synthesizer,
        request: &SynthesisRequest,
        rate: f64,
        output: &Path,
        samples: &mut Vec<SpeedSample>,
    ) -> Result<SpeedSample> {
        let duration = synthesizer.synthesize(&request.at_rate(rate), output).await?;
        let sample = SpeedSample { rate, duration };
        debug!("Synthesized at rate {:.3}: {:.3}s", rate, duration);
        samples.push(sample);
        Ok(sample)
    }
}

fn outcome(last: SpeedSample, samples: Vec<SpeedSample>, exhausted: bool) -> FitOutcome {
    FitOutcome {
        rate: last.rate,
        duration: last.duration,
        samples,
        exhausted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MockSynthesizer;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::Mutex;

    /// duration(rate) = 10 / rate
    struct InverseRate {
        calls: Mutex<Vec<f64>>,
    }

    impl InverseRate {
        fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Synthesizer for InverseRate {
        async fn synthesize(&self, request: &SynthesisRequest, _output: &Path) -> Result<f64> {
            self.calls.lock().unwrap().push(request.rate);
            Ok(10.0 / request.rate)
        }
    }

    fn request(rate: f64) -> SynthesisRequest {
        SynthesisRequest {
            text: "hello there".to_string(),
            ref_audio: PathBuf::from("voice.wav"),
            ref_text: "reference".to_string(),
            rate,
            language: "en".to_string(),
        }
    }

    #[test]
    fn linear_prediction_hits_target_on_a_line() {
        // duration = 20 - 10 * rate
        let rate = linear_predict(1.0, 10.0, 1.1, 9.0, 8.0);
        assert!((rate - 1.2).abs() < 1e-9);
        assert_eq!(linear_predict(1.0, 5.0, 1.1, 5.0, 4.0), 1.0);
    }

    #[tokio::test]
    async fn converges_on_inverse_model() {
        let engine = InverseRate::new();
        let fitter = DurationFitter::default();

        let fit = fitter
            .fit(&engine, &request(1.0), 8.0, Path::new("segment_1.wav"))
            .await
            .unwrap();

        assert!(fit.duration <= 8.05);
        assert!(fit.synthesis_calls() <= 5);
        assert!(!fit.exhausted);
        assert_eq!(engine.calls.lock().unwrap().len(), fit.synthesis_calls());
        assert_eq!(fit.rate, *engine.calls.lock().unwrap().last().unwrap());
    }

    #[tokio::test]
    async fn accepts_first_sample_when_it_fits() {
        let engine = InverseRate::new();
        let fit = DurationFitter::default()
            .fit(&engine, &request(1.0), 20.0, Path::new("segment_1.wav"))
            .await
            .unwrap();

        assert_eq!(fit.synthesis_calls(), 1);
        assert_eq!(fit.rate, 1.0);
        assert_eq!(fit.duration, 10.0);
    }

    #[tokio::test]
    async fn gives_up_after_iteration_cap_with_fallback_rate() {
        let mut engine = MockSynthesizer::new();
        // 1 initial + 10 rounds + 1 fallback; duration never changes
        engine.expect_synthesize().times(12).returning(|_, _| Ok(9.0));

        let fit = DurationFitter::default()
            .fit(&engine, &request(1.0), 3.0, Path::new("segment_1.wav"))
            .await
            .unwrap();

        assert!(fit.exhausted);
        assert!((fit.rate - 1.1).abs() < 1e-9);
        assert_eq!(fit.duration, 9.0);
    }

    #[tokio::test]
    async fn rates_stay_within_bounds() {
        let engine = InverseRate::new();
        let config = FitterConfig {
            max_rate: 1.5,
            ..FitterConfig::default()
        };

        let fit = DurationFitter::from_config(&config)
            .fit(&engine, &request(1.0), 1.0, Path::new("segment_1.wav"))
            .await
            .unwrap();

        assert!(fit.exhausted);
        assert!(engine.calls.lock().unwrap().iter().all(|r| *r <= 1.5));
    }

    #[tokio::test]
    async fn engine_failure_propagates() {
        let mut engine = MockSynthesizer::new();
        engine
            .expect_synthesize()
            .returning(|_, _| Err(crate::error::RevoiceError::engine("synthesizer", "boom")));

        let result = DurationFitter::default()
            .fit(&engine, &request(1.0), 3.0, Path::new("segment_1.wav"))
            .await;
        assert!(result.is_err());
    }
}
