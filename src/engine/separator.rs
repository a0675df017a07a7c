use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info};

use super::{Separation, Separator};
use crate::config::SeparatorConfig;
use crate::error::{Result, RevoiceError};

/// Two-stem vocal separation through the `demucs` CLI.
pub struct DemucsSeparator {
    config: SeparatorConfig,
}

impl DemucsSeparator {
    pub fn new(config: SeparatorConfig) -> Self {
        Self { config }
    }

    fn args(&self, input: &Path, work_dir: &Path) -> Vec<String> {
        vec![
            "--two-stems".to_string(),
            "vocals".to_string(),
            "-n".to_string(),
            self.config.model.clone(),
            "--jobs".to_string(),
            self.config.jobs.to_string(),
            "-o".to_string(),
            work_dir.to_string_lossy().to_string(),
            input.to_string_lossy().to_string(),
        ]
    }

    /// demucs writes `<out>/<model>/<input stem>/{vocals,no_vocals}.wav`
    fn expected_outputs(&self, input: &Path, work_dir: &Path) -> Separation {
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let folder: PathBuf = work_dir.join(&self.config.model).join(stem);
        Separation {
            vocals: folder.join("vocals.wav"),
            accompaniment: folder.join("no_vocals.wav"),
        }
    }
}

#[async_trait]
impl Separator for DemucsSeparator {
    async fn separate(&self, input: &Path, work_dir: &Path) -> Result<Separation> {
        let separation = self.expected_outputs(input, work_dir);
        if separation.accompaniment.is_file() {
            info!("Reusing separation in {}", separation.accompaniment.display());
            return Ok(separation);
        }

        let args = self.args(input, work_dir);
        debug!("Executing separator: {} {:?}", self.config.binary_path, args);
        let output = Command::new(&self.config.binary_path)
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                RevoiceError::engine(
                    "separator",
                    format!("Failed to execute {}: {}", self.config.binary_path, e),
                )
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RevoiceError::engine("separator", stderr.trim().to_string()));
        }
        if !separation.accompaniment.is_file() {
            return Err(RevoiceError::engine(
                "separator",
                format!("expected {}", separation.accompaniment.display()),
            ));
        }

        Ok(separation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_layout_follows_model_and_stem() {
        let separator = DemucsSeparator::new(SeparatorConfig::default());
        let input = Path::new("/jobs/ep1/ep1_5.5_out_ukr.wav");
        let work_dir = Path::new("/jobs/ep1");

        let args = separator.args(input, work_dir);
        assert_eq!(&args[..4], &["--two-stems", "vocals", "-n", "mdx_extra"]);
        assert_eq!(args.last().unwrap(), "/jobs/ep1/ep1_5.5_out_ukr.wav");

        let outputs = separator.expected_outputs(input, work_dir);
        assert_eq!(
            outputs.accompaniment,
            PathBuf::from("/jobs/ep1/mdx_extra/ep1_5.5_out_ukr/no_vocals.wav")
        );
        assert_eq!(
            outputs.vocals,
            PathBuf::from("/jobs/ep1/mdx_extra/ep1_5.5_out_ukr/vocals.wav")
        );
    }
}
