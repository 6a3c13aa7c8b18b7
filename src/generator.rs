use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::distributions::WeightedIndex;
use rand::prelude::*;
use thiserror::Error;

const START: char = '\u{2}';

#[derive(Error, Debug)]
pub enum GeneratorError {
    #[error("Generation failed: {0}")]
    Failed(String),
    #[error("Generation timed out after {0:?}")]
    TimedOut(Duration),
    #[error("Generation task aborted: {0}")]
    Join(String),
}

/// Produces raw conversation text that continues `context`.
///
/// Implementations may be non-deterministic and must bound their output to
/// roughly `max_tokens` units.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(
        &self,
        context: &str,
        max_tokens: usize,
        temperature: f32,
    ) -> Result<String, GeneratorError>;
}

type Table = HashMap<String, Vec<(char, u32)>>;

/// Character-level n-gram model with back-off to shorter contexts.
#[derive(Clone)]
pub struct CharModel {
    order: usize,
    table: Arc<Table>,
}

impl CharModel {
    pub fn from_corpus(path: &Path, order: usize) -> Result<Self, GeneratorError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            GeneratorError::Failed(format!("cannot read corpus {}: {}", path.display(), e))
        })?;
        Self::train(&text, order)
    }

    pub fn train(text: &str, order: usize) -> Result<Self, GeneratorError> {
        if text.trim().is_empty() {
            return Err(GeneratorError::Failed("corpus is empty".to_string()));
        }

        let chars: Vec<char> = std::iter::repeat(START)
            .take(order)
            .chain(text.chars())
            .collect();

        let mut counts: HashMap<String, HashMap<char, u32>> = HashMap::new();
        for i in order..chars.len() {
            for k in 0..=order {
                let key: String = chars[i - k..i].iter().collect();
                *counts.entry(key).or_default().entry(chars[i]).or_insert(0) += 1;
            }
        }

        let table = counts
            .into_iter()
            .map(|(key, next)| {
                let mut next: Vec<(char, u32)> = next.into_iter().collect();
                next.sort_unstable();
                (key, next)
            })
            .collect();

        Ok(CharModel {
            order,
            table: Arc::new(table),
        })
    }

    fn sample(
        &self,
        context: &str,
        max_tokens: usize,
        temperature: f32,
    ) -> Result<String, GeneratorError> {
        let mut window: Vec<char> = std::iter::repeat(START)
            .take(self.order)
            .chain(context.chars())
            .chain(std::iter::once('\n'))
            .collect();
        let keep = window.len() - self.order;
        window.drain(..keep);

        let exponent = 1.0 / f64::from(temperature.max(f32::EPSILON));
        let mut rng = thread_rng();
        let mut out = String::new();

        for _ in 0..max_tokens {
            let next = (0..=self.order)
                .rev()
                .find_map(|k| {
                    let key: String = window[window.len() - k..].iter().collect();
                    self.table.get(&key)
                })
                .ok_or_else(|| GeneratorError::Failed("model has no unigram table".to_string()))?;

            let weights = next.iter().map(|(_, count)| f64::from(*count).powf(exponent));
            let dist = WeightedIndex::new(weights)
                .map_err(|e| GeneratorError::Failed(format!("bad distribution: {}", e)))?;
            let c = next[dist.sample(&mut rng)].0;

            out.push(c);
            if self.order > 0 {
                window.remove(0);
                window.push(c);
            }
        }

        Ok(out)
    }
}

#[async_trait]
impl Generator for CharModel {
    async fn generate(
        &self,
        context: &str,
        max_tokens: usize,
        temperature: f32,
    ) -> Result<String, GeneratorError> {
        let model = self.clone();
        let context = context.to_string();
        tokio::task::spawn_blocking(move || model.sample(&context, max_tokens, temperature))
            .await
            .map_err(|e| GeneratorError::Join(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn continues_learned_pattern() {
        let model = CharModel::train("ab\nab\nab\n", 2).unwrap();
        let out = model.generate("ab", 5, 1.0).await.unwrap();
        assert_eq!(out, "ab\nab");
    }

    #[tokio::test]
    async fn backs_off_on_unseen_context() {
        let model = CharModel::train("ab\nab\nab\n", 2).unwrap();
        let out = model.generate("zz", 3, 0.5).await.unwrap();
        assert_eq!(out, "ab\n");
    }

    #[tokio::test]
    async fn output_is_bounded_by_max_tokens() {
        let model = CharModel::train("the quick brown fox jumps over the lazy dog\n", 3).unwrap();
        let out = model.generate("", 40, 1.5).await.unwrap();
        assert_eq!(out.chars().count(), 40);
    }

    #[test]
    fn empty_corpus_is_rejected() {
        assert!(matches!(
            CharModel::train("  \n", 3),
            Err(GeneratorError::Failed(_))
        ));
    }

    #[test]
    fn missing_corpus_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = CharModel::from_corpus(&dir.path().join("nope.txt"), 3);
        assert!(result.is_err());
    }
}
