// Corpus preparation: MIDI sources → words → training groups.
//
// Each source is tokenized once per transposition offset (just `0`, or every
// offset in `ALL_KEYS_OFFSETS` when `transpose_to_all_keys` is set). With a
// target key configured, the detected key's normalizing steps are added to
// every offset. Events become words under the out-of-vocabulary policy:
//
// - an unknown `Note Velocity_*` event is replaced by `Note Velocity_21`;
// - any other unknown event is dropped with a warning.
//
// A source that fails anywhere (unreadable file, key analysis, tokenizing) is
// skipped as a whole and recorded in the report; it never aborts the corpus.

use crate::config::ModelConfig;
use crate::error::{ConfigError, SourceError};
use crate::event::{Event, EventCategory, FALLBACK_VELOCITY_KEY};
use crate::key::{self, KeyDetector, PitchClass};
use crate::remi::MidiTokenizer;
use crate::segment::{self, Group};
use crate::vocab::{Vocabulary, Word};
use std::path::{Path, PathBuf};

/// Events that missed the dictionary during conversion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OovReport {
    /// Velocity events replaced by the fallback velocity.
    pub substituted: usize,
    /// Keys of dropped events, in order of occurrence.
    pub dropped: Vec<String>,
}

impl OovReport {
    pub fn is_empty(&self) -> bool {
        self.substituted == 0 && self.dropped.is_empty()
    }

    pub fn merge(&mut self, other: OovReport) {
        self.substituted += other.substituted;
        self.dropped.extend(other.dropped);
    }
}

/// Convert events to words under the out-of-vocabulary policy.
pub fn words_from_events(events: &[Event], vocab: &Vocabulary) -> (Vec<Word>, OovReport) {
    let fallback_velocity = vocab.lookup(FALLBACK_VELOCITY_KEY);
    let mut words = Vec::with_capacity(events.len());
    let mut report = OovReport::default();
    for event in events {
        let key = event.key();
        if let Some(word) = vocab.lookup(&key) {
            words.push(word);
            continue;
        }
        match (event.category(), fallback_velocity) {
            (EventCategory::NoteVelocity, Some(word)) => {
                words.push(word);
                report.substituted += 1;
            }
            _ => {
                log::warn!("dropping event {key:?}: not in the dictionary");
                report.dropped.push(key);
            }
        }
    }
    (words, report)
}

/// Tokenizes sources, optionally normalizing them to a target key first.
pub struct EventExtractor<'a> {
    tokenizer: &'a dyn MidiTokenizer,
    key_detector: Option<&'a dyn KeyDetector>,
    target_key: Option<PitchClass>,
}

impl<'a> EventExtractor<'a> {
    pub fn new(tokenizer: &'a dyn MidiTokenizer) -> Self {
        EventExtractor {
            tokenizer,
            key_detector: None,
            target_key: None,
        }
    }

    /// Normalize every source to `target` using `detector`.
    pub fn with_key_normalization(mut self, detector: &'a dyn KeyDetector, target: PitchClass) -> Self {
        self.key_detector = Some(detector);
        self.target_key = Some(target);
        self
    }

    /// Extractor configured from `transpose_input_midi_to_key`.
    pub fn from_config(
        tokenizer: &'a dyn MidiTokenizer,
        detector: &'a dyn KeyDetector,
        config: &ModelConfig,
    ) -> Result<Self, ConfigError> {
        let extractor = EventExtractor::new(tokenizer);
        Ok(match config.target_key()? {
            Some(target) => extractor.with_key_normalization(detector, target),
            None => extractor,
        })
    }

    /// Steps moving `path` onto the target key; 0 without one.
    pub fn normalizing_steps(&self, path: &Path) -> Result<i32, SourceError> {
        let (Some(detector), Some(target)) = (self.key_detector, self.target_key) else {
            return Ok(0);
        };
        let detected = detector.detect(path)?;
        let steps = key::transposition_steps(detected, target);
        log::info!(
            "{}: detected {detected}, transposing {steps} steps to {target}",
            path.display()
        );
        Ok(steps)
    }

    /// Events of `path` at `offset` semitones on top of key normalization.
    pub fn extract(&self, path: &Path, offset: i32) -> Result<Vec<Event>, SourceError> {
        let steps = self.normalizing_steps(path)? + offset;
        Ok(self.tokenizer.tokenize(path, steps)?)
    }
}

/// A source skipped during corpus preparation.
#[derive(Debug)]
pub struct SourceFailure {
    pub path: PathBuf,
    pub error: SourceError,
}

#[derive(Debug, Default)]
pub struct CorpusReport {
    pub groups: Vec<Group>,
    pub failures: Vec<SourceFailure>,
    pub oov: OovReport,
    pub sources_used: usize,
}

pub fn prepare_corpus(
    sources: &[PathBuf],
    extractor: &EventExtractor<'_>,
    vocab: &Vocabulary,
    config: &ModelConfig,
) -> CorpusReport {
    let offsets = config.transposition_offsets();
    let mut report = CorpusReport::default();
    for path in sources {
        log::info!("extracting events for {}", path.display());
        match source_groups(path, &offsets, extractor, vocab, config) {
            Ok((groups, oov)) => {
                log::info!("{}: prepared {} groups", path.display(), groups.len());
                report.groups.extend(groups);
                report.oov.merge(oov);
                report.sources_used += 1;
            }
            Err(error) => {
                log::warn!("skipping {}: {error}", path.display());
                report.failures.push(SourceFailure {
                    path: path.clone(),
                    error,
                });
            }
        }
    }
    report
}

fn source_groups(
    path: &Path,
    offsets: &[i32],
    extractor: &EventExtractor<'_>,
    vocab: &Vocabulary,
    config: &ModelConfig,
) -> Result<(Vec<Group>, OovReport), SourceError> {
    let base = extractor.normalizing_steps(path)?;
    let mut groups = Vec::new();
    let mut oov = OovReport::default();
    for &offset in offsets {
        let events = extractor.tokenizer.tokenize(path, base + offset)?;
        let (words, missed) = words_from_events(&events, vocab);
        oov.merge(missed);
        groups.extend(segment::build_groups(&words, config.x_len, config.group_size));
    }
    Ok((groups, oov))
}

/// `.mid` / `.midi` files directly inside `dir`, sorted by path.
pub fn list_midi_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_midi = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("mid") || e.eq_ignore_ascii_case("midi"));
        if is_midi && path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MidiError;
    use crate::key::{DetectedKey, KeyMode};
    use std::cell::RefCell;

    /// Produces `n` alternating bar/position events, or fails for paths
    /// containing "bad".
    struct FakeTokenizer {
        n: usize,
        calls: RefCell<Vec<i32>>,
    }

    impl MidiTokenizer for FakeTokenizer {
        fn tokenize(&self, path: &Path, steps: i32) -> Result<Vec<Event>, MidiError> {
            self.calls.borrow_mut().push(steps);
            if path.to_string_lossy().contains("bad") {
                return Err(MidiError::NoNotes(path.to_path_buf()));
            }
            Ok((0..self.n)
                .map(|i| if i % 2 == 0 { Event::bar() } else { Event::new("Position", "1/16") })
                .collect())
        }
    }

    struct FixedKey(DetectedKey);

    impl KeyDetector for FixedKey {
        fn detect(&self, _path: &Path) -> Result<DetectedKey, SourceError> {
            Ok(self.0)
        }
    }

    fn small_config() -> ModelConfig {
        ModelConfig {
            x_len: 4,
            group_size: 2,
            ..Default::default()
        }
    }

    #[test]
    fn oov_velocity_falls_back_and_others_drop() {
        let vocab = Vocabulary::remi(false);
        let events = vec![
            Event::bar(),
            Event::new("Note Velocity", "99"),
            Event::new("Chord", "C:maj"),
            Event::new("Note On", "60"),
        ];
        let (words, report) = words_from_events(&events, &vocab);
        assert_eq!(words.len(), 3);
        assert_eq!(words[1], vocab.lookup(FALLBACK_VELOCITY_KEY).unwrap());
        assert_eq!(report.substituted, 1);
        assert_eq!(report.dropped, vec!["Chord_C:maj".to_string()]);
    }

    #[test]
    fn malformed_source_is_skipped_and_reported() {
        let tokenizer = FakeTokenizer { n: 20, calls: RefCell::new(Vec::new()) };
        let extractor = EventExtractor::new(&tokenizer);
        let vocab = Vocabulary::remi(false);
        let sources = vec![
            PathBuf::from("a.mid"),
            PathBuf::from("bad.mid"),
            PathBuf::from("c.mid"),
        ];
        let report = prepare_corpus(&sources, &extractor, &vocab, &small_config());
        assert_eq!(report.sources_used, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].path, PathBuf::from("bad.mid"));
        // One forward and one reverse group per good source.
        assert_eq!(report.groups.len(), 4);
        assert!(report.oov.is_empty());
    }

    #[test]
    fn all_keys_with_normalization_adds_offsets() {
        let tokenizer = FakeTokenizer { n: 20, calls: RefCell::new(Vec::new()) };
        let detector = FixedKey(DetectedKey { tonic: PitchClass::C, mode: KeyMode::Major });
        let extractor = EventExtractor::new(&tokenizer).with_key_normalization(&detector, PitchClass::A);
        let config = ModelConfig {
            transpose_to_all_keys: true,
            ..small_config()
        };
        let report = prepare_corpus(&[PathBuf::from("a.mid")], &extractor, &Vocabulary::remi(false), &config);
        assert_eq!(report.groups.len(), 16);
        assert_eq!(*tokenizer.calls.borrow(), vec![-5, -4, -3, -2, -1, 0, 1, 2]);
    }

    #[test]
    fn extractor_without_target_does_not_transpose() {
        let tokenizer = FakeTokenizer { n: 2, calls: RefCell::new(Vec::new()) };
        let extractor = EventExtractor::new(&tokenizer);
        extractor.extract(Path::new("x.mid"), 0).unwrap();
        assert_eq!(*tokenizer.calls.borrow(), vec![0]);
    }

    #[test]
    fn lists_only_midi_files() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.mid", "a.MIDI", "notes.txt"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        let files = list_midi_files(dir.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.MIDI", "b.mid"]);
    }
}
