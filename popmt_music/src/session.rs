// The explicit context every loop runs in: configuration, dictionary, the
// sequence model and the resolved word-exchange sets.

use crate::config::ModelConfig;
use crate::error::{ConfigError, SessionError};
use crate::exchange::WordExchange;
use crate::markov::MarkovSequenceModel;
use crate::memory::MemoryState;
use crate::model::SequenceModel;
use crate::vocab::Vocabulary;
use std::path::Path;

pub struct Session<M> {
    pub config: ModelConfig,
    pub vocab: Vocabulary,
    pub model: M,
    pub exchange: WordExchange,
}

impl<M: SequenceModel> Session<M> {
    pub fn new(config: ModelConfig, vocab: Vocabulary, model: M) -> Result<Self, ConfigError> {
        config.validate()?;
        let exchange = WordExchange::resolve(&config.exchangeable_words, &vocab)?;
        Ok(Session {
            config,
            vocab,
            model,
            exchange,
        })
    }

    /// Fresh memory for `batch_size` rows.
    pub fn zero_memory(&self, batch_size: usize) -> MemoryState {
        MemoryState::zeros(
            self.config.n_layer,
            self.config.mem_len,
            batch_size,
            self.config.d_model,
        )
    }
}

impl Session<MarkovSequenceModel> {
    /// Load the dictionary and either restore `checkpoint` or start from an
    /// untrained baseline model.
    pub fn open_markov(
        config: ModelConfig,
        dictionary: &Path,
        checkpoint: Option<&Path>,
    ) -> Result<Self, SessionError> {
        let vocab = Vocabulary::load(dictionary)?;
        let model = match checkpoint {
            Some(path) => {
                log::info!("restoring checkpoint {}", path.display());
                MarkovSequenceModel::restore(path, &config, vocab.n_token())?
            }
            None => MarkovSequenceModel::new(&config, vocab.n_token()),
        };
        Ok(Session::new(config, vocab, model)?)
    }
}
