// Fine-tuning loop.
//
// Every epoch shuffles the group order, then walks it in batches of
// `batch_size` groups (a trailing remainder is dropped). Within a batch, the
// i-th windows of all groups form one step; memory starts at zeros for the
// batch and is replaced by the model's output after each successful step, so
// it threads through the `group_size` windows in order.
//
// A failing step is recorded and logged, and the loop moves on with the
// memory it had. Checkpoint writes are not recoverable: a model that cannot
// be saved aborts the run.

use crate::error::{ModelError, TrainError};
use crate::exchange::WordExchange;
use crate::model::SequenceModel;
use crate::segment::Group;
use crate::session::Session;
use crate::vocab::Word;
use popmt_prng::TuneRng;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct TrainOptions {
    pub epochs: usize,
    /// Stop after the first epoch whose mean loss is at or below this.
    pub stop_loss: Option<f32>,
    /// Checkpoint every this many batches (counting from batch 0); 0 disables
    /// mid-epoch checkpoints.
    pub checkpoint_every: usize,
}

impl Default for TrainOptions {
    fn default() -> Self {
        TrainOptions {
            epochs: 200,
            stop_loss: None,
            checkpoint_every: 100,
        }
    }
}

/// One window step that failed and was skipped.
#[derive(Debug)]
pub struct StepFailure {
    pub epoch: usize,
    pub batch: usize,
    pub window: usize,
    /// `(rows, words per row)` of the failing input.
    pub shape: (usize, usize),
    pub error: ModelError,
}

#[derive(Debug, Default)]
pub struct TrainingReport {
    /// Mean loss of each epoch run; `None` when no step succeeded.
    pub epoch_losses: Vec<Option<f32>>,
    pub failures: Vec<StepFailure>,
    pub checkpoints: Vec<PathBuf>,
    pub stopped_early: bool,
}

impl TrainingReport {
    pub fn epochs_run(&self) -> usize {
        self.epoch_losses.len()
    }
}

pub fn finetune<M: SequenceModel>(
    session: &mut Session<M>,
    groups: &[Group],
    output_dir: &Path,
    options: &TrainOptions,
    rng: &mut TuneRng,
) -> Result<TrainingReport, TrainError> {
    let batch_size = session.config.batch_size.max(1);
    let num_batches = groups.len() / batch_size;
    log::info!(
        "training on {} groups: {num_batches} batches of {batch_size}, {} epochs",
        groups.len(),
        options.epochs
    );
    if num_batches == 0 {
        log::warn!("fewer groups than batch_size; epochs will train nothing");
    }

    let mut report = TrainingReport::default();
    let mut order: Vec<usize> = (0..groups.len()).collect();
    for epoch in 0..options.epochs {
        rng.shuffle(&mut order);
        let mut total_loss = 0.0f64;
        let mut steps = 0usize;

        for batch in 0..num_batches {
            let batch_groups: Vec<&Group> = order[batch * batch_size..(batch + 1) * batch_size]
                .iter()
                .map(|&i| &groups[i])
                .collect();
            let losses = train_batch(session, &batch_groups, epoch, batch, rng, &mut report);
            total_loss += losses.iter().map(|&l| f64::from(l)).sum::<f64>();
            steps += losses.len();

            if options.checkpoint_every > 0 && batch % options.checkpoint_every == 0 {
                let dir = output_dir.join(format!("epoch-{epoch}_batch-{batch}"));
                write_checkpoint(session, &dir, &mut report)?;
            }
        }

        let mean = (steps > 0).then(|| (total_loss / steps as f64) as f32);
        match mean {
            Some(loss) => log::info!("epoch {epoch}: mean loss {loss:.5} over {steps} steps"),
            None => log::warn!("epoch {epoch}: no successful steps"),
        }
        report.epoch_losses.push(mean);

        let dir = output_dir.join(format!("epoch-{epoch}"));
        write_checkpoint(session, &dir, &mut report)?;

        if let (Some(stop), Some(loss)) = (options.stop_loss, mean) {
            if loss > stop {
                continue;
            }
            log::info!("epoch {epoch}: mean loss {loss:.5} <= {stop}, stopping");
            report.stopped_early = true;
            break;
        }
    }
    Ok(report)
}

/// Train the windows of one batch in order; returns the successful losses.
fn train_batch<M: SequenceModel>(
    session: &mut Session<M>,
    groups: &[&Group],
    epoch: usize,
    batch: usize,
    rng: &mut TuneRng,
    report: &mut TrainingReport,
) -> Vec<f32> {
    let mapping = (!session.exchange.is_empty()).then(|| session.exchange.draw(rng));
    let n_windows = groups.iter().map(|g| g.len()).min().unwrap_or(0);
    let mut memory = session.zero_memory(groups.len());
    let mut losses = Vec::with_capacity(n_windows);

    for window in 0..n_windows {
        let mut x: Vec<Vec<Word>> = groups.iter().map(|g| g.windows[window].x.clone()).collect();
        let mut y: Vec<Vec<Word>> = groups.iter().map(|g| g.windows[window].y.clone()).collect();
        if let Some(mapping) = &mapping {
            WordExchange::apply(mapping, &mut x, &mut y);
        }

        let step = session
            .model
            .train_step(&x, &y, &memory)
            .and_then(|out| memory.advance(out.memory).map(|()| out.loss));
        match step {
            Ok(loss) => {
                log::info!("epoch {epoch}, batch {batch}, window {window}: loss {loss:.5}");
                losses.push(loss);
            }
            Err(error) => {
                let shape = (x.len(), x.first().map_or(0, Vec::len));
                log::warn!(
                    "epoch {epoch}, batch {batch}, window {window}, input {shape:?}: {error}"
                );
                report.failures.push(StepFailure {
                    epoch,
                    batch,
                    window,
                    shape,
                    error,
                });
            }
        }
    }
    losses
}

fn write_checkpoint<M: SequenceModel>(
    session: &Session<M>,
    dir: &Path,
    report: &mut TrainingReport,
) -> Result<(), TrainError> {
    std::fs::create_dir_all(dir).map_err(|source| TrainError::OutputDir {
        path: dir.to_path_buf(),
        source,
    })?;
    log::info!("saving checkpoint {}", dir.display());
    session.model.save_checkpoint(dir)?;
    report.checkpoints.push(dir.to_path_buf());
    Ok(())
}
