// Event ↔ word dictionary.
//
// The vocabulary is loaded once (from the JSON dictionary artifact, or built
// from the full REMI event space) and is read-only afterwards. Alongside the
// two mappings it keeps a category index so generation can draw "any tempo
// class word" or "any duration word" without scanning event strings.
//
// Lookups of unknown events return `None`; what to do with them is the
// caller's decision (see the OOV policy in `corpus.rs`).

use crate::error::VocabError;
use crate::event::{BAR_KEY, EventCategory};
use crate::remi;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Integer id of one event string. Dense in `[0, n_token)`.
pub type Word = usize;

/// On-disk form of the dictionary.
#[derive(Debug, Serialize, Deserialize)]
struct DictionaryFile {
    event2word: BTreeMap<String, Word>,
    word2event: BTreeMap<Word, String>,
}

#[derive(Debug, Clone)]
pub struct Vocabulary {
    event2word: BTreeMap<String, Word>,
    word2event: Vec<String>,
    by_category: BTreeMap<EventCategory, Vec<Word>>,
}

impl Vocabulary {
    /// Build from event keys; words are assigned in iteration order.
    /// Duplicate keys keep their first word.
    pub fn from_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut event2word = BTreeMap::new();
        let mut word2event = Vec::new();
        for key in keys {
            let key = key.into();
            if event2word.contains_key(&key) {
                continue;
            }
            event2word.insert(key.clone(), word2event.len());
            word2event.push(key);
        }
        Self::indexed(event2word, word2event)
    }

    /// The full REMI event space, optionally with chord events.
    pub fn remi(use_chords: bool) -> Self {
        Self::from_keys(remi::event_space(use_chords))
    }

    /// Load the JSON dictionary artifact and check that both mappings agree.
    pub fn load(path: &Path) -> Result<Self, VocabError> {
        let data = std::fs::read_to_string(path).map_err(|source| VocabError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file: DictionaryFile =
            serde_json::from_str(&data).map_err(|source| VocabError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_mappings(file.event2word, file.word2event)
    }

    /// Build from both mappings, validating the round-trip invariant.
    pub fn from_mappings(
        event2word: BTreeMap<String, Word>,
        word2event: BTreeMap<Word, String>,
    ) -> Result<Self, VocabError> {
        let n_token = word2event.len();
        let mut dense = vec![String::new(); n_token];
        for (word, event) in word2event {
            if word >= n_token {
                return Err(VocabError::Sparse(word));
            }
            dense[word] = event;
        }
        for (event, &word) in &event2word {
            let back = dense.get(word);
            if back != Some(event) {
                return Err(VocabError::Inconsistent {
                    event: event.clone(),
                    word,
                    back: back.cloned(),
                });
            }
        }
        if event2word.len() != n_token {
            // Some word has no event pointing at it.
            if let Some((word, event)) = dense
                .iter()
                .enumerate()
                .find(|(w, e)| event2word.get(e.as_str()) != Some(w))
            {
                return Err(VocabError::Inconsistent {
                    event: event.clone(),
                    word,
                    back: None,
                });
            }
        }
        Ok(Self::indexed(event2word, dense))
    }

    fn indexed(event2word: BTreeMap<String, Word>, word2event: Vec<String>) -> Self {
        let mut by_category: BTreeMap<EventCategory, Vec<Word>> = BTreeMap::new();
        for (word, key) in word2event.iter().enumerate() {
            by_category
                .entry(EventCategory::of_key(key))
                .or_default()
                .push(word);
        }
        Vocabulary {
            event2word,
            word2event,
            by_category,
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), VocabError> {
        let file = DictionaryFile {
            event2word: self.event2word.clone(),
            word2event: self.word2event.iter().cloned().enumerate().collect(),
        };
        let io_err = |source: std::io::Error| VocabError::Io {
            path: path.to_path_buf(),
            source,
        };
        let json = serde_json::to_string_pretty(&file).map_err(|source| VocabError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, json).map_err(io_err)
    }

    pub fn lookup(&self, event: &str) -> Option<Word> {
        self.event2word.get(event).copied()
    }

    pub fn reverse_lookup(&self, word: Word) -> Option<&str> {
        self.word2event.get(word).map(String::as_str)
    }

    pub fn n_token(&self) -> usize {
        self.word2event.len()
    }

    /// All words of one category, in word order.
    pub fn words_in(&self, category: EventCategory) -> &[Word] {
        self.by_category
            .get(&category)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn category_of(&self, word: Word) -> EventCategory {
        self.reverse_lookup(word)
            .map(EventCategory::of_key)
            .unwrap_or(EventCategory::Other)
    }

    pub fn bar_word(&self) -> Option<Word> {
        self.lookup(BAR_KEY)
    }
}
