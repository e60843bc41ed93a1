// popmt: memory-carrying fine-tuning and generation for REMI-tokenized MIDI
//
// MIDI pieces are tokenized into REMI events (bars, positions, note
// velocity/pitch/duration, tempo, optional chords), mapped to integer words
// through a fixed dictionary, and cut into fixed-length windows. A sequence
// model consumes those windows while carrying a recurrent memory from one
// window to the next; generation samples one word at a time from the same
// model until enough bars have been produced.
//
// Architecture:
// - event.rs: Event and its category tag
// - vocab.rs: Event <-> word dictionary with a per-category index
// - midi.rs: Standard MIDI File reading/writing into a flat note score
// - chord.rs: Half-bar template chord recognition
// - remi.rs: REMI tokenizer and writer (the MIDI collaborator traits)
// - key.rs: Key detection and the key-normalizing transposition
// - segment.rs: Forward/reverse windowing and memory-carrying groups
// - exchange.rs: Word-exchange augmentation
// - memory.rs: Per-layer recurrent memory buffers
// - model.rs: The `SequenceModel` seam
// - markov.rs: Count-based baseline `SequenceModel` with a memory cache
// - sampling.rs: Temperature / top-k sampling
// - corpus.rs: Sources -> words (OOV policy) -> groups, per-source failures
// - config.rs: Model and loop configuration
// - session.rs: Explicit context (config, dictionary, model)
// - train.rs: Fine-tuning loop with checkpoints and a step-failure report
// - generate.rs: Seeding and the autoregressive decode loop
// - error.rs: Error enums per concern
//
// All randomness flows through an explicit `popmt_prng::TuneRng`, so a run is
// reproducible from its seed.

pub mod chord;
pub mod config;
pub mod corpus;
pub mod error;
pub mod event;
pub mod exchange;
pub mod generate;
pub mod key;
pub mod markov;
pub mod memory;
pub mod midi;
pub mod model;
pub mod remi;
pub mod sampling;
pub mod segment;
pub mod session;
pub mod train;
pub mod vocab;
