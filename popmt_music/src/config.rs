// Model and loop configuration.
//
// `ModelConfig` is loaded from JSON (any missing field takes its default) and
// validated once at startup; a bad config aborts before any model or corpus
// work starts. The transformer-shaped fields (`n_layer`, `d_model`, `n_head`,
// ...) are forwarded to the sequence model untouched; the loops themselves
// only read `x_len`, `mem_len`, `n_layer`, `d_model`, `group_size` and
// `batch_size` to shape windows and memory.

use crate::error::ConfigError;
use crate::key::PitchClass;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Words fed per training step.
    pub x_len: usize,
    /// Recurrent memory slots per layer.
    pub mem_len: usize,
    pub n_layer: usize,
    pub d_embed: usize,
    pub d_model: usize,
    pub dropout: f64,
    pub n_head: usize,
    /// Defaults to `d_model / n_head`.
    pub d_head: Option<usize>,
    pub d_ff: usize,
    pub learning_rate: f64,
    /// Windows per memory-carrying group.
    pub group_size: usize,
    /// Groups per training batch. Generation always runs with batch 1.
    pub batch_size: usize,
    /// Chord events in the tokenization and chord-conditioned random seeds.
    pub use_chords: bool,
    /// Disjoint sets of interchangeable event strings for augmentation.
    pub exchangeable_words: Vec<Vec<String>>,
    /// Add every offset in `ALL_KEYS_OFFSETS` to each training source.
    pub transpose_to_all_keys: bool,
    /// Transpose every input (training source or prompt) to this key first.
    pub transpose_input_midi_to_key: Option<String>,
    /// Additive smoothing of the baseline model's transition counts.
    pub markov_smoothing: f64,
    /// Share of the baseline model's prediction read from memory.
    pub cache_weight: f64,
    /// Abort a generation run after this many decode steps.
    pub max_generation_steps: Option<usize>,
}

/// Transposition offsets used when `transpose_to_all_keys` is set.
pub const ALL_KEYS_OFFSETS: [i32; 8] = [-2, -1, 0, 1, 2, 3, 4, 5];

impl Default for ModelConfig {
    fn default() -> Self {
        ModelConfig {
            x_len: 512,
            mem_len: 512,
            n_layer: 12,
            d_embed: 512,
            d_model: 512,
            dropout: 0.1,
            n_head: 8,
            d_head: None,
            d_ff: 2048,
            learning_rate: 0.0002,
            group_size: 5,
            batch_size: 4,
            use_chords: true,
            exchangeable_words: Vec::new(),
            transpose_to_all_keys: false,
            transpose_input_midi_to_key: None,
            markov_smoothing: 0.01,
            cache_weight: 0.1,
            max_generation_steps: None,
        }
    }
}

impl ModelConfig {
    /// Load from a JSON file and validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: ModelConfig =
            serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let sizes = [
            ("x_len", self.x_len),
            ("mem_len", self.mem_len),
            ("n_layer", self.n_layer),
            ("d_model", self.d_model),
            ("n_head", self.n_head),
            ("group_size", self.group_size),
            ("batch_size", self.batch_size),
        ];
        for (field, value) in sizes {
            if value == 0 {
                return Err(ConfigError::Zero { field });
            }
        }
        if self.d_head.is_none() && self.d_model % self.n_head != 0 {
            return Err(ConfigError::HeadSplit {
                d_model: self.d_model,
                n_head: self.n_head,
            });
        }
        self.target_key()?;
        Ok(())
    }

    pub fn d_head(&self) -> usize {
        self.d_head.unwrap_or(self.d_model / self.n_head.max(1))
    }

    /// Parsed `transpose_input_midi_to_key`.
    pub fn target_key(&self) -> Result<Option<PitchClass>, ConfigError> {
        self.transpose_input_midi_to_key
            .as_deref()
            .map(|name| {
                name.parse::<PitchClass>()
                    .map_err(ConfigError::UnknownKey)
            })
            .transpose()
    }

    /// Offsets each training source is tokenized at.
    pub fn transposition_offsets(&self) -> Vec<i32> {
        if self.transpose_to_all_keys {
            ALL_KEYS_OFFSETS.to_vec()
        } else {
            vec![0]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ModelConfig::default();
        config.validate().unwrap();
        assert_eq!(config.d_head(), 64);
        assert_eq!(config.transposition_offsets(), vec![0]);
    }

    #[test]
    fn partial_json_takes_defaults() {
        let config: ModelConfig =
            serde_json::from_str(r#"{"x_len": 16, "group_size": 2, "use_chords": false}"#).unwrap();
        assert_eq!(config.x_len, 16);
        assert_eq!(config.group_size, 2);
        assert!(!config.use_chords);
        assert_eq!(config.mem_len, 512);
    }

    #[test]
    fn zero_sizes_are_rejected() {
        let config = ModelConfig {
            group_size: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Zero { field: "group_size" })
        ));
    }

    #[test]
    fn head_split_must_divide() {
        let config = ModelConfig {
            d_model: 100,
            n_head: 8,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::HeadSplit { .. })));
        let explicit = ModelConfig {
            d_head: Some(12),
            ..config
        };
        explicit.validate().unwrap();
    }

    #[test]
    fn target_key_is_parsed() {
        let config = ModelConfig {
            transpose_input_midi_to_key: Some("Eb".into()),
            ..Default::default()
        };
        assert_eq!(config.target_key().unwrap(), Some(PitchClass::DSharp));
        let bad = ModelConfig {
            transpose_input_midi_to_key: Some("X".into()),
            ..Default::default()
        };
        assert!(matches!(bad.validate(), Err(ConfigError::UnknownKey(_))));
    }

    #[test]
    fn all_keys_offsets() {
        let config = ModelConfig {
            transpose_to_all_keys: true,
            ..Default::default()
        };
        assert_eq!(config.transposition_offsets().len(), 8);
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"n_layer": 2, "transpose_input_midi_to_key": "A"}"#).unwrap();
        let config = ModelConfig::load(&path).unwrap();
        assert_eq!(config.n_layer, 2);
        assert_eq!(config.target_key().unwrap(), Some(PitchClass::A));
    }
}
