// The sequence model seam.
//
// Training and generation loops drive any `SequenceModel` the same way: a
// batch of word rows plus the current recurrent memory goes in, a loss (or
// final-position logits) and the next memory come out. The loops never look
// inside the memory; they only hand it back on the next step and reset it to
// zeros at group or run boundaries.

use crate::error::ModelError;
use crate::memory::MemoryState;
use crate::vocab::Word;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct TrainOutput {
    /// Mean loss over the batch's target words.
    pub loss: f32,
    pub memory: MemoryState,
}

#[derive(Debug, Clone)]
pub struct InferOutput {
    /// `[batch][n_token]` logits for the word after each row's last input.
    pub logits: Vec<Vec<f32>>,
    pub memory: MemoryState,
}

pub trait SequenceModel {
    /// One optimization step on `x` → `y` (rows of equal length).
    fn train_step(
        &mut self,
        x: &[Vec<Word>],
        y: &[Vec<Word>],
        memory: &MemoryState,
    ) -> Result<TrainOutput, ModelError>;

    /// Forward pass without learning.
    fn infer_step(&mut self, x: &[Vec<Word>], memory: &MemoryState)
    -> Result<InferOutput, ModelError>;

    /// Persist the model under `dir`, which the caller has created.
    fn save_checkpoint(&self, dir: &Path) -> Result<(), ModelError>;
}

/// Check that a batch is non-empty, rectangular and matches `y` row for row.
pub fn check_batch(x: &[Vec<Word>], y: Option<&[Vec<Word>]>) -> Result<(), ModelError> {
    let Some(first) = x.first() else {
        return Err(ModelError::Shape("empty batch".into()));
    };
    if first.is_empty() {
        return Err(ModelError::Shape("empty input row".into()));
    }
    if let Some(row) = x.iter().position(|r| r.len() != first.len()) {
        return Err(ModelError::Shape(format!(
            "input row {row} has {} words, row 0 has {}",
            x[row].len(),
            first.len()
        )));
    }
    if let Some(y) = y {
        if y.len() != x.len() {
            return Err(ModelError::Shape(format!(
                "{} input rows but {} target rows",
                x.len(),
                y.len()
            )));
        }
        if let Some(row) = y.iter().position(|r| r.len() != first.len()) {
            return Err(ModelError::Shape(format!(
                "target row {row} has {} words, inputs have {}",
                y[row].len(),
                first.len()
            )));
        }
    }
    Ok(())
}
