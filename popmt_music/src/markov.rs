// Count-based baseline sequence model.
//
// A first-order Markov transition table over words, blended with a cache
// distribution read out of the recurrent memory:
//
//   p(w | prev, mem) = (1 - λ) · (count[prev][w] + s) / (total[prev] + s · n_token)
//                    + λ · cache(w | mem)
//
// where `s` is `markov_smoothing` and `λ` is `cache_weight`. The memory holds
// one-hot embeddings (feature `word % d_model`) of the most recent `mem_len`
// input words of each row; `cache(w)` is proportional to how often `w`'s
// feature occurs there. With an all-zero memory the cache term is skipped.
// Every layer carries the same cache contents.
//
// Training is counting: the loss is the mean negative log-likelihood of the
// targets under the table as it stood before the step, then every `x[i] → y[i]`
// transition is added. The checkpoint is the count table as JSON in
// `model.json`.

use crate::config::ModelConfig;
use crate::error::ModelError;
use crate::memory::{MemoryShape, MemoryState};
use crate::model::{InferOutput, SequenceModel, TrainOutput, check_batch};
use crate::vocab::Word;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Next word → observed count.
type TransitionTable = BTreeMap<Word, f64>;

pub const CHECKPOINT_FILE: &str = "model.json";

/// The learned part of the model, persisted in checkpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionCounts {
    pub n_token: usize,
    pub transitions: BTreeMap<Word, TransitionTable>,
    /// Windows trained on so far.
    pub steps: u64,
}

#[derive(Debug, Clone)]
pub struct MarkovSequenceModel {
    counts: TransitionCounts,
    n_layer: usize,
    mem_len: usize,
    d_model: usize,
    smoothing: f64,
    cache_weight: f64,
}

impl MarkovSequenceModel {
    pub fn new(config: &ModelConfig, n_token: usize) -> Self {
        Self::with_counts(
            config,
            TransitionCounts {
                n_token,
                transitions: BTreeMap::new(),
                steps: 0,
            },
        )
    }

    fn with_counts(config: &ModelConfig, counts: TransitionCounts) -> Self {
        MarkovSequenceModel {
            counts,
            n_layer: config.n_layer,
            mem_len: config.mem_len,
            d_model: config.d_model,
            smoothing: config.markov_smoothing.max(0.0),
            cache_weight: config.cache_weight.clamp(0.0, 1.0),
        }
    }

    /// Load a checkpoint from a directory written by `save_checkpoint`, or
    /// directly from its JSON file. The stored vocabulary size must match.
    pub fn restore(path: &Path, config: &ModelConfig, n_token: usize) -> Result<Self, ModelError> {
        let file = checkpoint_file(path);
        let restore_err = |reason: String| ModelError::Restore {
            path: file.clone(),
            reason,
        };
        let data = std::fs::read_to_string(&file).map_err(|e| restore_err(e.to_string()))?;
        let counts: TransitionCounts =
            serde_json::from_str(&data).map_err(|e| restore_err(e.to_string()))?;
        if counts.n_token != n_token {
            return Err(restore_err(format!(
                "checkpoint has {} words, dictionary has {n_token}",
                counts.n_token
            )));
        }
        if let Some((&from, _)) = counts
            .transitions
            .iter()
            .find(|(from, table)| **from >= n_token || table.keys().any(|&to| to >= n_token))
        {
            return Err(restore_err(format!("transition from word {from} out of range")));
        }
        Ok(Self::with_counts(config, counts))
    }

    pub fn counts(&self) -> &TransitionCounts {
        &self.counts
    }

    pub fn n_token(&self) -> usize {
        self.counts.n_token
    }

    fn check_words(&self, rows: &[Vec<Word>]) -> Result<(), ModelError> {
        let n_token = self.counts.n_token;
        match rows.iter().flatten().find(|&&w| w >= n_token) {
            Some(&word) => Err(ModelError::WordOutOfRange { word, n_token }),
            None => Ok(()),
        }
    }

    fn check_memory(&self, memory: &MemoryState, batch: usize) -> Result<(), ModelError> {
        let expected = MemoryShape {
            mem_len: self.mem_len,
            batch_size: batch,
            d_model: self.d_model,
        };
        if memory.shape() != expected || memory.n_layer() != self.n_layer {
            return Err(ModelError::Shape(format!(
                "memory is {} x {:?}, model expects {} x {expected:?}",
                memory.n_layer(),
                memory.shape(),
                self.n_layer
            )));
        }
        Ok(())
    }

    /// Smoothed transition probability `p(next | prev)` without the cache.
    fn transition_prob(&self, prev: Word, next: Word) -> f64 {
        let n = self.counts.n_token as f64;
        let (count, total) = match self.counts.transitions.get(&prev) {
            Some(table) => (
                table.get(&next).copied().unwrap_or(0.0),
                table.values().sum::<f64>(),
            ),
            None => (0.0, 0.0),
        };
        let den = total + self.smoothing * n;
        if den > 0.0 {
            (count + self.smoothing) / den
        } else {
            1.0 / n
        }
    }

    /// Blended probability for every word after `prev`, given a row's cache.
    fn distribution(&self, prev: Word, cache: &Cache) -> Vec<f64> {
        (0..self.counts.n_token)
            .map(|w| self.blend(self.transition_prob(prev, w), cache, w))
            .collect()
    }

    fn blend(&self, markov: f64, cache: &Cache, word: Word) -> f64 {
        match cache.prob(word) {
            Some(c) => (1.0 - self.cache_weight) * markov + self.cache_weight * c,
            None => markov,
        }
    }

    fn caches(&self, memory: &MemoryState) -> Vec<Cache> {
        let shape = memory.shape();
        let layer = memory.layer(0).unwrap_or(&[]);
        (0..shape.batch_size)
            .map(|b| {
                let mut features = vec![0.0f64; shape.d_model];
                for slot in 0..shape.mem_len {
                    for (f, acc) in features.iter_mut().enumerate() {
                        *acc += f64::from(layer[shape.index(slot, b, f)]);
                    }
                }
                Cache::new(features, self.counts.n_token)
            })
            .collect()
    }

    /// Shift each row's inputs into memory, keeping the newest `mem_len`.
    fn next_memory(&self, x: &[Vec<Word>], memory: &MemoryState) -> Result<MemoryState, ModelError> {
        let shape = memory.shape();
        let old = memory.layer(0).unwrap_or(&[]);
        let mut layer = vec![0.0f32; shape.len()];
        for (b, row) in x.iter().enumerate() {
            let total = shape.mem_len + row.len();
            for slot in 0..shape.mem_len {
                let source = total - shape.mem_len + slot;
                if source < shape.mem_len {
                    for f in 0..shape.d_model {
                        layer[shape.index(slot, b, f)] = old[shape.index(source, b, f)];
                    }
                } else {
                    let word = row[source - shape.mem_len];
                    layer[shape.index(slot, b, word % shape.d_model)] = 1.0;
                }
            }
        }
        MemoryState::from_layers(shape, vec![layer; memory.n_layer()])
    }
}

/// Word distribution read from one row of memory.
struct Cache {
    features: Vec<f64>,
    norm: f64,
}

impl Cache {
    fn new(features: Vec<f64>, n_token: usize) -> Self {
        let d = features.len().max(1);
        let norm = (0..n_token).map(|w| features[w % d]).sum();
        Cache { features, norm }
    }

    fn prob(&self, word: Word) -> Option<f64> {
        if self.norm > 0.0 {
            Some(self.features[word % self.features.len()] / self.norm)
        } else {
            None
        }
    }
}

fn checkpoint_file(path: &Path) -> PathBuf {
    if path.is_dir() {
        path.join(CHECKPOINT_FILE)
    } else {
        path.to_path_buf()
    }
}

impl SequenceModel for MarkovSequenceModel {
    fn train_step(
        &mut self,
        x: &[Vec<Word>],
        y: &[Vec<Word>],
        memory: &MemoryState,
    ) -> Result<TrainOutput, ModelError> {
        check_batch(x, Some(y))?;
        self.check_words(x)?;
        self.check_words(y)?;
        self.check_memory(memory, x.len())?;

        let caches = self.caches(memory);
        let mut nll = 0.0f64;
        let mut n = 0usize;
        for ((xr, yr), cache) in x.iter().zip(y).zip(&caches) {
            for (&prev, &next) in xr.iter().zip(yr) {
                let p = self.blend(self.transition_prob(prev, next), cache, next);
                nll -= p.max(f64::MIN_POSITIVE).ln();
                n += 1;
            }
        }
        let loss = (nll / n as f64) as f32;
        if !loss.is_finite() {
            return Err(ModelError::Step(format!("non-finite loss {loss}")));
        }

        for (xr, yr) in x.iter().zip(y) {
            for (&prev, &next) in xr.iter().zip(yr) {
                *self
                    .counts
                    .transitions
                    .entry(prev)
                    .or_default()
                    .entry(next)
                    .or_insert(0.0) += 1.0;
            }
        }
        self.counts.steps += 1;

        let memory = self.next_memory(x, memory)?;
        Ok(TrainOutput { loss, memory })
    }

    fn infer_step(
        &mut self,
        x: &[Vec<Word>],
        memory: &MemoryState,
    ) -> Result<InferOutput, ModelError> {
        check_batch(x, None)?;
        self.check_words(x)?;
        self.check_memory(memory, x.len())?;

        let caches = self.caches(memory);
        let logits = x
            .iter()
            .zip(&caches)
            .map(|(row, cache)| {
                let prev = row[row.len() - 1];
                self.distribution(prev, cache)
                    .into_iter()
                    .map(|p| p.max(f64::MIN_POSITIVE).ln() as f32)
                    .collect()
            })
            .collect();
        let memory = self.next_memory(x, memory)?;
        Ok(InferOutput { logits, memory })
    }

    fn save_checkpoint(&self, dir: &Path) -> Result<(), ModelError> {
        let path = dir.join(CHECKPOINT_FILE);
        let json = serde_json::to_string(&self.counts).map_err(|e| ModelError::Checkpoint {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        std::fs::write(&path, json).map_err(|e| ModelError::Checkpoint {
            path,
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ModelConfig {
        ModelConfig {
            n_layer: 2,
            mem_len: 3,
            d_model: 8,
            n_head: 2,
            markov_smoothing: 0.1,
            cache_weight: 0.2,
            ..Default::default()
        }
    }

    fn zeros(batch: usize) -> MemoryState {
        let c = config();
        MemoryState::zeros(c.n_layer, c.mem_len, batch, c.d_model)
    }

    #[test]
    fn loss_drops_when_repeating_a_pattern() {
        let mut model = MarkovSequenceModel::new(&config(), 10);
        let x = vec![vec![1, 2, 3, 1]];
        let y = vec![vec![2, 3, 1, 2]];
        let first = model.train_step(&x, &y, &zeros(1)).unwrap().loss;
        let mut last = first;
        for _ in 0..5 {
            last = model.train_step(&x, &y, &zeros(1)).unwrap().loss;
        }
        assert!(last < first, "{last} !< {first}");
        assert_eq!(model.counts().steps, 6);
    }

    #[test]
    fn untrained_model_is_uniform() {
        let mut model = MarkovSequenceModel::new(&config(), 4);
        let out = model.infer_step(&[vec![0]], &zeros(1)).unwrap();
        assert_eq!(out.logits.len(), 1);
        assert_eq!(out.logits[0].len(), 4);
        let expected = (0.25f64).ln() as f32;
        for l in &out.logits[0] {
            assert!((l - expected).abs() < 1e-6);
        }
    }

    #[test]
    fn infer_prefers_learned_transition() {
        let mut model = MarkovSequenceModel::new(&config(), 6);
        for _ in 0..3 {
            model.train_step(&[vec![4, 5]], &[vec![5, 4]], &zeros(1)).unwrap();
        }
        let out = model.infer_step(&[vec![4]], &zeros(1)).unwrap();
        let best = out.logits[0]
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i);
        assert_eq!(best, Some(5));
    }

    #[test]
    fn memory_holds_most_recent_inputs() {
        let mut model = MarkovSequenceModel::new(&config(), 20);
        let out = model.infer_step(&[vec![1, 2, 3, 4, 9]], &zeros(1)).unwrap();
        let mem = out.memory;
        let shape = mem.shape();
        assert_eq!(mem.n_layer(), 2);
        // Newest three words are 3, 4, 9 → features 3, 4, 1.
        for (slot, feature) in [(0, 3), (1, 4), (2, 1)] {
            assert_eq!(mem.layer(1).unwrap()[shape.index(slot, 0, feature)], 1.0);
        }
        let out = model.infer_step(&[vec![7]], &mem).unwrap();
        let layer = out.memory.layer(0).unwrap();
        assert_eq!(layer[shape.index(0, 0, 4)], 1.0);
        assert_eq!(layer[shape.index(1, 0, 1)], 1.0);
        assert_eq!(layer[shape.index(2, 0, 7)], 1.0);
    }

    #[test]
    fn cache_raises_recent_words() {
        let mut model = MarkovSequenceModel::new(&config(), 16);
        let blank = model.infer_step(&[vec![0]], &zeros(1)).unwrap();
        let warmed = model.infer_step(&[vec![6, 6, 0]], &zeros(1)).unwrap();
        let cached = model.infer_step(&[vec![0]], &warmed.memory).unwrap();
        assert!(cached.logits[0][6] > blank.logits[0][6]);
    }

    #[test]
    fn rejects_bad_inputs() {
        let mut model = MarkovSequenceModel::new(&config(), 5);
        assert!(matches!(
            model.infer_step(&[vec![7]], &zeros(1)),
            Err(ModelError::WordOutOfRange { word: 7, n_token: 5 })
        ));
        assert!(matches!(
            model.infer_step(&[vec![1]], &zeros(2)),
            Err(ModelError::Shape(_))
        ));
    }

    #[test]
    fn checkpoint_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut model = MarkovSequenceModel::new(&config(), 6);
        model.train_step(&[vec![1, 2]], &[vec![2, 3]], &zeros(1)).unwrap();
        model.save_checkpoint(dir.path()).unwrap();

        let restored = MarkovSequenceModel::restore(dir.path(), &config(), 6).unwrap();
        assert_eq!(restored.counts(), model.counts());
        let by_file =
            MarkovSequenceModel::restore(&dir.path().join(CHECKPOINT_FILE), &config(), 6).unwrap();
        assert_eq!(by_file.counts(), model.counts());

        assert!(matches!(
            MarkovSequenceModel::restore(dir.path(), &config(), 7),
            Err(ModelError::Restore { .. })
        ));
    }

    #[test]
    fn missing_checkpoint_is_a_restore_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            MarkovSequenceModel::restore(&dir.path().join("nope"), &config(), 6),
            Err(ModelError::Restore { .. })
        ));
    }
}
