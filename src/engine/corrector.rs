use async_trait::async_trait;
use regex::{NoExpand, Regex};
use std::path::Path;
use tokio::fs;
use tracing::info;

use super::TextCorrector;
use crate::error::{Result, RevoiceError};

/// Copies the subtitle unchanged.
pub struct CopyCorrector;

#[async_trait]
impl TextCorrector for CopyCorrector {
    async fn correct(&self, input: &Path, output: &Path) -> Result<()> {
        fs::copy(input, output).await?;
        Ok(())
    }
}

/// Whole-word replacements read from an `old<=>new` list.
#[derive(Debug, Clone, Default)]
pub struct VocabularyCorrector {
    replacements: Vec<(Regex, String)>,
}

impl VocabularyCorrector {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RevoiceError::Config(format!("Failed to read vocabulary {}: {}", path.display(), e))
        })?;
        let corrector = Self::parse(&content)?;
        info!(
            "Loaded {} vocabulary replacements from {}",
            corrector.replacements.len(),
            path.display()
        );
        Ok(corrector)
    }

    /// Each `old<=>new` line yields a capitalized and a lower-case variant,
    /// unless `old` has no cased first letter, in which case it is kept as
    /// written. Longer `old` strings are applied first.
    pub fn parse(content: &str) -> Result<Self> {
        let mut pairs: Vec<(String, String)> = Vec::new();
        for line in content.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let Some((old, new)) = line.split_once("<=>") else {
                continue;
            };
            let (old, new) = (old.trim(), new.trim());
            if old.is_empty() {
                continue;
            }
            let variants = if capitalize(old) == lowercase_first(old) {
                vec![(old.to_string(), new.to_string())]
            } else {
                vec![(capitalize(old), capitalize(new)), (lowercase_first(old), lowercase_first(new))]
            };
            for (o, n) in variants {
                if !pairs.iter().any(|(existing, _)| *existing == o) {
                    pairs.push((o, n));
                }
            }
        }
        pairs.sort_by(|a, b| b.0.chars().count().cmp(&a.0.chars().count()));

        let replacements = pairs
            .into_iter()
            .map(|(old, new)| whole_word(&old).map(|pattern| (pattern, new)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { replacements })
    }

    /// Subtitle text with index and timing lines left untouched.
    pub fn apply(&self, subtitle: &str) -> String {
        subtitle
            .split_inclusive('\n')
            .map(|line| {
                let trimmed = line.trim();
                let is_index = !trimmed.is_empty() && trimmed.chars().all(|c| c.is_ascii_digit());
                if is_index || trimmed.contains("-->") {
                    line.to_string()
                } else {
                    self.apply_line(line)
                }
            })
            .collect()
    }

    fn apply_line(&self, line: &str) -> String {
        self.replacements.iter().fold(line.to_string(), |acc, (pattern, new)| {
            pattern.replace_all(&acc, NoExpand(new.as_str())).into_owned()
        })
    }
}

#[async_trait]
impl TextCorrector for VocabularyCorrector {
    async fn correct(&self, input: &Path, output: &Path) -> Result<()> {
        let content = fs::read_to_string(input).await?;
        fs::write(output, self.apply(&content)).await?;
        Ok(())
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn lowercase_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Matches `old` literally, bounded by `\b` on the sides that end in a word
/// character.
fn whole_word(old: &str) -> Result<Regex> {
    let mut pattern = String::new();
    if old.chars().next().is_some_and(is_word_char) {
        pattern.push_str(r"\b");
    }
    pattern.push_str(&regex::escape(old));
    if old.chars().next_back().is_some_and(is_word_char) {
        pattern.push_str(r"\b");
    }
    Regex::new(&pattern)
        .map_err(|e| RevoiceError::Config(format!("Invalid vocabulary entry '{}': {}", old, e)))
}
