// Autoregressive generation.
//
// A run starts from a seed: either a tokenized prompt with a closing
// `Bar_None` appended, or a short random opening (bar, position, optional
// chord, tempo class and value). Decoding runs with a batch of one. The first
// step feeds the whole seed against zeroed memory; every later step feeds
// only the previous word and the memory the model returned. The run ends
// when the number of generated `Bar_None` words reaches the target.
//
// The first `Note Duration` the model samples is swapped for a uniformly
// random duration, once per run, so openings do not all start with the same
// note length.

use crate::corpus::{self, EventExtractor};
use crate::error::{GenerateError, MidiError, ModelError};
use crate::event::{BAR_KEY, EventCategory, FIRST_POSITION_KEY};
use crate::model::SequenceModel;
use crate::remi::MidiWriter;
use crate::sampling;
use crate::session::Session;
use crate::vocab::{Vocabulary, Word};
use popmt_prng::TuneRng;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub n_target_bar: usize,
    pub temperature: f64,
    pub topk: usize,
    /// Continue this MIDI file instead of starting from a random seed.
    pub prompt: Option<PathBuf>,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        GenerateOptions {
            n_target_bar: 16,
            temperature: 1.2,
            topk: 5,
            prompt: None,
        }
    }
}

/// Result of one decode run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    /// Seed followed by every sampled word.
    pub words: Vec<Word>,
    pub seed_len: usize,
    /// Bars of the prompt (0 without one).
    pub bars_in_prompt: usize,
    pub steps: usize,
}

impl Generation {
    /// Sampled words only.
    pub fn continuation(&self) -> &[Word] {
        &self.words[self.seed_len..]
    }
}

fn required(vocab: &Vocabulary, key: &str) -> Result<Word, GenerateError> {
    vocab
        .lookup(key)
        .ok_or_else(|| GenerateError::MissingEvent(key.to_string()))
}

fn pick(vocab: &Vocabulary, category: EventCategory, rng: &mut TuneRng) -> Result<Word, GenerateError> {
    rng.choose(vocab.words_in(category))
        .copied()
        .ok_or(GenerateError::EmptyCategory(category.name()))
}

/// Seed words from a prompt file and the number of bars it holds.
pub fn seed_from_prompt(
    extractor: &EventExtractor<'_>,
    vocab: &Vocabulary,
    prompt: &Path,
) -> Result<(Vec<Word>, usize), GenerateError> {
    let bar = required(vocab, BAR_KEY)?;
    let events = extractor.extract(prompt, 0)?;
    let (mut words, oov) = corpus::words_from_events(&events, vocab);
    if !oov.is_empty() {
        log::warn!(
            "prompt {}: {} velocities substituted, {} events dropped",
            prompt.display(),
            oov.substituted,
            oov.dropped.len()
        );
    }
    words.push(bar);
    let bars_in_prompt = words.iter().filter(|&&w| w == bar).count() - 1;
    Ok((words, bars_in_prompt))
}

/// Random opening: bar, first position, optional chord and position, tempo.
pub fn random_seed(vocab: &Vocabulary, use_chords: bool, rng: &mut TuneRng) -> Result<Vec<Word>, GenerateError> {
    let bar = required(vocab, BAR_KEY)?;
    let position = required(vocab, FIRST_POSITION_KEY)?;
    let mut words = vec![bar, position];
    if use_chords {
        words.push(pick(vocab, EventCategory::Chord, rng)?);
        words.push(position);
    }
    words.push(pick(vocab, EventCategory::TempoClass, rng)?);
    words.push(pick(vocab, EventCategory::TempoValue, rng)?);
    Ok(words)
}

/// Decode from `seed` until `n_target_bar` bar words have been generated.
pub fn decode<M: SequenceModel>(
    session: &mut Session<M>,
    seed: Vec<Word>,
    options: &GenerateOptions,
    rng: &mut TuneRng,
) -> Result<Generation, GenerateError> {
    let bar = required(&session.vocab, BAR_KEY)?;
    let max_steps = session.config.max_generation_steps;
    let seed_len = seed.len();
    let mut words = seed;
    let mut memory = session.zero_memory(1);
    let mut first_duration = true;
    let mut bars = 0;
    let mut steps = 0;

    while bars < options.n_target_bar {
        if max_steps.is_some_and(|max| steps >= max) {
            return Err(GenerateError::StepLimit {
                steps,
                bars,
                target: options.n_target_bar,
            });
        }
        let input = if steps == 0 {
            words.clone()
        } else {
            words[words.len() - 1..].to_vec()
        };
        let out = session.model.infer_step(&[input], &memory)?;
        let logits = out
            .logits
            .first()
            .ok_or_else(|| ModelError::Shape("model returned no logits".into()))?;
        let mut word = sampling::temperature_sampling(logits, options.temperature, options.topk, rng)?;
        if word >= session.vocab.n_token() {
            return Err(ModelError::WordOutOfRange {
                word,
                n_token: session.vocab.n_token(),
            }
            .into());
        }

        if first_duration && session.vocab.category_of(word) == EventCategory::NoteDuration {
            word = pick(&session.vocab, EventCategory::NoteDuration, rng)?;
            first_duration = false;
        }

        words.push(word);
        if word == bar {
            bars += 1;
            log::debug!("generated bar {bars}/{}", options.n_target_bar);
        }
        memory.advance(out.memory)?;
        steps += 1;
    }

    Ok(Generation {
        words,
        seed_len,
        bars_in_prompt: 0,
        steps,
    })
}

/// One run written to `output`.
pub fn generate<M: SequenceModel>(
    session: &mut Session<M>,
    extractor: &EventExtractor<'_>,
    writer: &dyn MidiWriter,
    options: &GenerateOptions,
    output: &Path,
    rng: &mut TuneRng,
) -> Result<Generation, GenerateError> {
    let (seed, bars_in_prompt) = match &options.prompt {
        Some(prompt) => seed_from_prompt(extractor, &session.vocab, prompt)?,
        None => (random_seed(&session.vocab, session.config.use_chords, rng)?, 0),
    };
    let mut generation = decode(session, seed, options, rng)?;
    generation.bars_in_prompt = bars_in_prompt;

    match &options.prompt {
        Some(prompt) => writer.write(
            generation.continuation(),
            &session.vocab,
            output,
            Some(prompt),
            bars_in_prompt,
        )?,
        None => writer.write(&generation.words, &session.vocab, output, None, 0)?,
    }
    log::info!(
        "wrote {} ({} words in {} steps)",
        output.display(),
        generation.words.len() - generation.seed_len,
        generation.steps
    );
    Ok(generation)
}

/// `number_of_results` independent runs written to `output_dir/result_{i}.midi`.
pub fn generate_batch<M: SequenceModel>(
    session: &mut Session<M>,
    extractor: &EventExtractor<'_>,
    writer: &dyn MidiWriter,
    options: &GenerateOptions,
    number_of_results: usize,
    output_dir: &Path,
    rng: &mut TuneRng,
) -> Result<Vec<PathBuf>, GenerateError> {
    std::fs::create_dir_all(output_dir).map_err(|source| MidiError::Io {
        path: output_dir.to_path_buf(),
        source,
    })?;
    let mut outputs = Vec::with_capacity(number_of_results);
    for i in 0..number_of_results {
        let output = output_dir.join(format!("result_{i}.midi"));
        generate(session, extractor, writer, options, &output, rng)?;
        outputs.push(output);
    }
    Ok(outputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;
    use crate::event::Event;
    use crate::memory::MemoryState;
    use crate::model::{InferOutput, TrainOutput};
    use crate::remi::MidiTokenizer;
    use std::cell::RefCell;

    /// Emits `script` in order (then repeats the last word) as one-hot logits.
    struct Scripted {
        script: Vec<Word>,
        n_token: usize,
        inputs: Vec<Vec<Word>>,
        memory_was_zero: Vec<bool>,
    }

    impl Scripted {
        fn new(script: Vec<Word>, n_token: usize) -> Self {
            Scripted {
                script,
                n_token,
                inputs: Vec::new(),
                memory_was_zero: Vec::new(),
            }
        }
    }

    impl SequenceModel for Scripted {
        fn train_step(&mut self, _x: &[Vec<Word>], _y: &[Vec<Word>], _m: &MemoryState) -> Result<TrainOutput, ModelError> {
            Err(ModelError::Step("not used".into()))
        }

        fn infer_step(&mut self, x: &[Vec<Word>], memory: &MemoryState) -> Result<InferOutput, ModelError> {
            let step = self.inputs.len();
            self.inputs.push(x[0].clone());
            self.memory_was_zero.push(memory.is_zero());
            let word = self.script.get(step).or(self.script.last()).copied().unwrap_or(0);
            let mut logits = vec![0.0; self.n_token];
            logits[word] = 10.0;
            let shape = memory.shape();
            Ok(InferOutput {
                logits: vec![logits],
                memory: MemoryState::from_layers(shape, vec![vec![1.0; shape.len()]; memory.n_layer()])?,
            })
        }

        fn save_checkpoint(&self, _dir: &Path) -> Result<(), ModelError> {
            Ok(())
        }
    }

    struct PromptTokenizer;

    impl MidiTokenizer for PromptTokenizer {
        fn tokenize(&self, _path: &Path, _steps: i32) -> Result<Vec<Event>, MidiError> {
            Ok(vec![
                Event::bar(),
                Event::new("Position", "1/16"),
                Event::new("Note On", "60"),
                Event::bar(),
                Event::new("Position", "5/16"),
            ])
        }
    }

    #[derive(Default)]
    struct RecordingWriter {
        calls: RefCell<Vec<(Vec<Word>, PathBuf, Option<PathBuf>, usize)>>,
    }

    impl MidiWriter for RecordingWriter {
        fn write(
            &self,
            words: &[Word],
            _vocab: &Vocabulary,
            output: &Path,
            prompt: Option<&Path>,
            bars_in_prompt: usize,
        ) -> Result<(), MidiError> {
            self.calls.borrow_mut().push((
                words.to_vec(),
                output.to_path_buf(),
                prompt.map(Path::to_path_buf),
                bars_in_prompt,
            ));
            Ok(())
        }
    }

    fn config() -> ModelConfig {
        ModelConfig {
            n_layer: 1,
            mem_len: 2,
            d_model: 4,
            n_head: 1,
            use_chords: false,
            ..Default::default()
        }
    }

    fn session(script: &[&str], config: ModelConfig) -> Session<Scripted> {
        let vocab = Vocabulary::remi(config.use_chords);
        let words = script.iter().map(|k| vocab.lookup(k).unwrap()).collect();
        let model = Scripted::new(words, vocab.n_token());
        Session::new(config, vocab, model).unwrap()
    }

    fn greedy(n_target_bar: usize) -> GenerateOptions {
        GenerateOptions {
            n_target_bar,
            temperature: 1.0,
            topk: 1,
            prompt: None,
        }
    }

    #[test]
    fn stops_exactly_at_target_bar() {
        let script = ["Position_1/16", "Bar_None", "Note On_60", "Bar_None", "Note On_62", "Bar_None"];
        let mut s = session(&script, config());
        let seed = random_seed(&s.vocab, false, &mut TuneRng::new(0)).unwrap();
        let generation = decode(&mut s, seed, &greedy(2), &mut TuneRng::new(0)).unwrap();
        assert_eq!(generation.steps, 4);
        let bar = s.vocab.bar_word().unwrap();
        assert_eq!(generation.words.last(), Some(&bar));
        assert_eq!(generation.continuation().iter().filter(|&&w| w == bar).count(), 2);
    }

    #[test]
    fn first_step_feeds_seed_then_single_words() {
        let mut s = session(&["Note On_60", "Bar_None"], config());
        let seed = random_seed(&s.vocab, false, &mut TuneRng::new(4)).unwrap();
        assert_eq!(seed.len(), 4);
        decode(&mut s, seed.clone(), &greedy(1), &mut TuneRng::new(0)).unwrap();
        assert_eq!(s.model.inputs[0], seed);
        assert_eq!(s.model.inputs[1], vec![s.vocab.lookup("Note On_60").unwrap()]);
        assert_eq!(s.model.memory_was_zero, vec![true, false]);
    }

    #[test]
    fn first_duration_is_redrawn_once() {
        let script = ["Note Duration_5", "Note Duration_5", "Bar_None"];
        let durations = Vocabulary::remi(false).words_in(EventCategory::NoteDuration).to_vec();
        let five = Vocabulary::remi(false).lookup("Note Duration_5").unwrap();
        let mut redrawn = Vec::new();
        for seed in 0..20 {
            let mut s = session(&script, config());
            let seed_words = vec![s.vocab.bar_word().unwrap()];
            let g = decode(&mut s, seed_words, &greedy(1), &mut TuneRng::new(seed)).unwrap();
            let out = g.continuation();
            assert!(durations.contains(&out[0]));
            assert_eq!(out[1], five);
            redrawn.push(out[0]);
        }
        assert!(redrawn.iter().any(|&w| w != five));
    }

    #[test]
    fn random_seed_with_chords() {
        let vocab = Vocabulary::remi(true);
        let seed = random_seed(&vocab, true, &mut TuneRng::new(2)).unwrap();
        let categories: Vec<EventCategory> = seed.iter().map(|&w| vocab.category_of(w)).collect();
        assert_eq!(
            categories,
            vec![
                EventCategory::Bar,
                EventCategory::Position,
                EventCategory::Chord,
                EventCategory::Position,
                EventCategory::TempoClass,
                EventCategory::TempoValue,
            ]
        );
    }

    #[test]
    fn prompt_run_writes_only_the_continuation() {
        let mut s = session(&["Note On_64", "Bar_None"], config());
        let tokenizer = PromptTokenizer;
        let extractor = EventExtractor::new(&tokenizer);
        let writer = RecordingWriter::default();
        let options = GenerateOptions {
            prompt: Some(PathBuf::from("prompt.mid")),
            ..greedy(1)
        };
        let g = generate(&mut s, &extractor, &writer, &options, Path::new("out.midi"), &mut TuneRng::new(0)).unwrap();
        // Prompt: 5 events + closing bar; it holds bars 1 and 2.
        assert_eq!(g.seed_len, 6);
        assert_eq!(g.bars_in_prompt, 2);
        let calls = writer.calls.borrow();
        let (words, output, prompt, bars) = &calls[0];
        assert_eq!(words.len(), 2);
        assert_eq!(output, &PathBuf::from("out.midi"));
        assert_eq!(prompt.as_deref(), Some(Path::new("prompt.mid")));
        assert_eq!(*bars, 2);
    }

    #[test]
    fn step_limit_is_an_error() {
        let mut config = config();
        config.max_generation_steps = Some(3);
        let mut s = session(&["Note On_60"], config);
        let result = decode(&mut s, vec![0], &greedy(1), &mut TuneRng::new(0));
        assert!(matches!(
            result,
            Err(GenerateError::StepLimit { steps: 3, bars: 0, target: 1 })
        ));
    }

    #[test]
    fn batch_writes_numbered_results() {
        let mut s = session(&["Bar_None"], config());
        let tokenizer = PromptTokenizer;
        let extractor = EventExtractor::new(&tokenizer);
        let writer = RecordingWriter::default();
        let dir = tempfile::tempdir().unwrap();
        let outputs =
            generate_batch(&mut s, &extractor, &writer, &greedy(1), 3, dir.path(), &mut TuneRng::new(0)).unwrap();
        assert_eq!(outputs, (0..3).map(|i| dir.path().join(format!("result_{i}.midi"))).collect::<Vec<_>>());
        let calls = writer.calls.borrow();
        assert_eq!(calls.len(), 3);
        assert!(calls.iter().all(|(_, _, prompt, bars)| prompt.is_none() && *bars == 0));
    }
}
