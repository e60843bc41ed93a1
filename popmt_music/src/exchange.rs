// Word-exchange augmentation.
//
// Some words are musically interchangeable (enharmonic chord spellings,
// neighbouring tempo values, ...). For each declared set a fresh uniform
// permutation maps every member onto another member of the same set; the
// mapping is then applied element-wise to both inputs and targets. Sets must
// be disjoint, so the combined mapping is a bijection that never moves a word
// across sets, and `x[i] == y[i - 1]` survives the substitution.

use crate::error::ConfigError;
use crate::vocab::{Vocabulary, Word};
use popmt_prng::TuneRng;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Default)]
pub struct WordExchange {
    sets: Vec<Vec<Word>>,
}

/// One drawn substitution. Words outside every set map to themselves.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExchangeMapping(BTreeMap<Word, Word>);

impl ExchangeMapping {
    pub fn get(&self, word: Word) -> Word {
        self.0.get(&word).copied().unwrap_or(word)
    }

    pub fn apply(&self, words: &mut [Word]) {
        for w in words {
            *w = self.get(*w);
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl WordExchange {
    /// Resolve event-string sets through the vocabulary.
    pub fn resolve(sets: &[Vec<String>], vocab: &Vocabulary) -> Result<Self, ConfigError> {
        let mut seen = BTreeSet::new();
        let mut resolved = Vec::with_capacity(sets.len());
        for set in sets {
            let mut words = Vec::with_capacity(set.len());
            for event in set {
                let word = vocab
                    .lookup(event)
                    .ok_or_else(|| ConfigError::UnknownExchangeWord(event.clone()))?;
                if !seen.insert(word) {
                    return Err(ConfigError::DuplicateExchangeWord(event.clone()));
                }
                words.push(word);
            }
            resolved.push(words);
        }
        Ok(WordExchange { sets: resolved })
    }

    pub fn is_empty(&self) -> bool {
        self.sets.iter().all(|s| s.len() < 2)
    }

    pub fn sets(&self) -> &[Vec<Word>] {
        &self.sets
    }

    /// Draw one permutation per set.
    pub fn draw(&self, rng: &mut TuneRng) -> ExchangeMapping {
        let mut mapping = BTreeMap::new();
        for set in &self.sets {
            let mut shuffled = set.clone();
            rng.shuffle(&mut shuffled);
            mapping.extend(set.iter().copied().zip(shuffled));
        }
        ExchangeMapping(mapping)
    }

    /// Apply one mapping to every row of a batch's inputs and targets.
    pub fn apply(mapping: &ExchangeMapping, x: &mut [Vec<Word>], y: &mut [Vec<Word>]) {
        for row in x.iter_mut().chain(y.iter_mut()) {
            mapping.apply(row);
        }
    }
}
