// Error types for the popmt pipeline.
//
// Fatal categories (configuration, dictionary load, checkpoint restore and
// write) propagate with `?` up to the binary, which prints them and exits.
// Recoverable categories (one malformed source, one failing training window)
// are wrapped into report entries by `corpus.rs` and `train.rs` and never
// abort the surrounding loop.

use std::path::PathBuf;

use thiserror::Error;

/// Failures loading, saving or validating the dictionary artifact.
#[derive(Debug, Error)]
pub enum VocabError {
    #[error("cannot read dictionary {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed dictionary {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("dictionary is inconsistent: event {event:?} maps to word {word} which maps back to {back:?}")]
    Inconsistent {
        event: String,
        word: usize,
        back: Option<String>,
    },
    #[error("dictionary words are not dense: word {0} is outside 0..n_token")]
    Sparse(usize),
}

/// Invalid or unloadable configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("config field `{field}` must be greater than zero")]
    Zero { field: &'static str },
    #[error("d_model ({d_model}) is not divisible by n_head ({n_head}) and no d_head was given")]
    HeadSplit { d_model: usize, n_head: usize },
    #[error("unknown key name {0:?}")]
    UnknownKey(String),
    #[error("exchangeable word {0:?} is not in the dictionary")]
    UnknownExchangeWord(String),
    #[error("exchangeable word {0:?} appears in more than one set")]
    DuplicateExchangeWord(String),
}

/// Failures reading or writing Standard MIDI Files.
#[derive(Debug, Error)]
pub enum MidiError {
    #[error("cannot access {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot parse MIDI {path}: {source}")]
    Parse { path: PathBuf, source: midly::Error },
    #[error("{0}: SMPTE timecode timing is not supported")]
    Timecode(PathBuf),
    #[error("{0}: no notes")]
    NoNotes(PathBuf),
    #[error("cannot encode MIDI: {0}")]
    Encode(String),
}

/// Failure turning one source file into events (tokenizing or key analysis).
#[derive(Debug, Error)]
pub enum SourceError {
    #[error(transparent)]
    Midi(#[from] MidiError),
    #[error("key detection failed for {path}: {reason}")]
    KeyDetection { path: PathBuf, reason: String },
}

/// Failures raised by a `SequenceModel`.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("cannot restore checkpoint {path}: {reason}")]
    Restore { path: PathBuf, reason: String },
    #[error("cannot write checkpoint {path}: {reason}")]
    Checkpoint { path: PathBuf, reason: String },
    #[error("shape mismatch: {0}")]
    Shape(String),
    #[error("word {word} is outside the vocabulary of {n_token}")]
    WordOutOfRange { word: usize, n_token: usize },
    #[error("model step failed: {0}")]
    Step(String),
}

/// Fatal training failures. Per-window step errors are not in here: they are
/// collected in the training report instead.
#[derive(Debug, Error)]
pub enum TrainError {
    #[error(transparent)]
    Checkpoint(#[from] ModelError),
    #[error("cannot create checkpoint directory {path}: {source}")]
    OutputDir {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Failures of the generation loop.
#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("the dictionary has no {0:?} event, required for generation")]
    MissingEvent(String),
    #[error("the dictionary has no words of category {0}")]
    EmptyCategory(&'static str),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Sampling(#[from] SamplingError),
    #[error(transparent)]
    Write(#[from] MidiError),
    #[error("reached {steps} decode steps with only {bars} of {target} bars generated")]
    StepLimit {
        steps: usize,
        bars: usize,
        target: usize,
    },
}

/// Invalid input to temperature sampling.
#[derive(Debug, Error, PartialEq)]
pub enum SamplingError {
    #[error("logits are empty")]
    Empty,
    #[error("temperature must be positive, got {0}")]
    Temperature(f64),
    #[error("topk must be at least 1")]
    TopK,
    #[error("no finite probability mass among the top candidates")]
    Degenerate,
}

/// Fatal failures assembling a session (config, dictionary, checkpoint).
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Vocab(#[from] VocabError),
    #[error(transparent)]
    Model(#[from] ModelError),
}
