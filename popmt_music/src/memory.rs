// Recurrent memory carried between consecutive model steps.
//
// One buffer per model layer, each of shape `[mem_len, batch_size, d_model]`
// stored row-major. A loop creates zeroed memory at the start of every group
// (training) or run (generation) and replaces it wholesale with whatever the
// model returns after each step. Nothing else writes to it.

use crate::error::ModelError;

/// Shape of one layer's memory buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryShape {
    pub mem_len: usize,
    pub batch_size: usize,
    pub d_model: usize,
}

impl MemoryShape {
    pub fn len(&self) -> usize {
        self.mem_len * self.batch_size * self.d_model
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flat offset of `(slot, batch, feature)`.
    pub fn index(&self, slot: usize, batch: usize, feature: usize) -> usize {
        (slot * self.batch_size + batch) * self.d_model + feature
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MemoryState {
    shape: MemoryShape,
    layers: Vec<Vec<f32>>,
}

impl MemoryState {
    pub fn zeros(n_layer: usize, mem_len: usize, batch_size: usize, d_model: usize) -> Self {
        let shape = MemoryShape {
            mem_len,
            batch_size,
            d_model,
        };
        MemoryState {
            shape,
            layers: vec![vec![0.0; shape.len()]; n_layer],
        }
    }

    /// Wrap layer buffers produced by a model. Every layer must hold exactly
    /// `shape.len()` values.
    pub fn from_layers(shape: MemoryShape, layers: Vec<Vec<f32>>) -> Result<Self, ModelError> {
        if let Some((i, layer)) = layers
            .iter()
            .enumerate()
            .find(|(_, l)| l.len() != shape.len())
        {
            return Err(ModelError::Shape(format!(
                "memory layer {i} has {} values, expected {} for {shape:?}",
                layer.len(),
                shape.len()
            )));
        }
        Ok(MemoryState { shape, layers })
    }

    /// Replace this state with the model's output. The shape may not change
    /// within a group or run.
    pub fn advance(&mut self, next: MemoryState) -> Result<(), ModelError> {
        if next.shape != self.shape || next.layers.len() != self.layers.len() {
            return Err(ModelError::Shape(format!(
                "memory changed shape from {} x {:?} to {} x {:?}",
                self.layers.len(),
                self.shape,
                next.layers.len(),
                next.shape
            )));
        }
        *self = next;
        Ok(())
    }

    pub fn shape(&self) -> MemoryShape {
        self.shape
    }

    pub fn n_layer(&self) -> usize {
        self.layers.len()
    }

    pub fn layer(&self, i: usize) -> Option<&[f32]> {
        self.layers.get(i).map(Vec::as_slice)
    }

    pub fn layers(&self) -> &[Vec<f32>] {
        &self.layers
    }

    pub fn is_zero(&self) -> bool {
        self.layers.iter().flatten().all(|&v| v == 0.0)
    }
}
