// popmt: command line front end.
//
// Subcommands:
//   dictionary  write the REMI dictionary artifact
//   finetune    prepare a MIDI corpus and train the baseline model on it
//   generate    sample new pieces, optionally continuing a prompt
//   transpose   report a file's detected key and the steps to a target key
//
// Usage:
//   cargo run -p popmt_music --bin popmt -- finetune --dictionary dict.json \
//     --data midi/ --output checkpoints/ [--config model.json] [--epochs N]
//   cargo run -p popmt_music --bin popmt -- generate --dictionary dict.json \
//     --checkpoint checkpoints/epoch-3 --output-dir out/ [--prompt in.mid]
//
// Logging goes through `RUST_LOG` (default `info`).

use clap::{Args, Parser, Subcommand};
use popmt_music::config::ModelConfig;
use popmt_music::corpus::{self, EventExtractor};
use popmt_music::generate::{self, GenerateOptions};
use popmt_music::key::{self, KeyDetector, PitchClass, ProfileKeyDetector};
use popmt_music::remi::{RemiTokenizer, RemiWriter};
use popmt_music::session::Session;
use popmt_music::train::{self, TrainOptions};
use popmt_music::vocab::Vocabulary;
use popmt_prng::TuneRng;
use std::error::Error;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "popmt", about = "Fine-tune and sample a memory-carrying REMI music model")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write the REMI dictionary to a JSON file.
    Dictionary {
        #[arg(long)]
        output: PathBuf,
        /// Leave chord events out of the dictionary.
        #[arg(long)]
        no_chords: bool,
    },
    /// Train on a directory (or list) of MIDI files.
    Finetune {
        #[command(flatten)]
        model: ModelArgs,
        /// MIDI files, or directories holding them.
        #[arg(long, num_args = 1.., required = true)]
        data: Vec<PathBuf>,
        #[arg(long)]
        output: PathBuf,
        #[arg(long, default_value_t = 200)]
        epochs: usize,
        #[arg(long)]
        stop_loss: Option<f32>,
        #[arg(long, default_value_t = 100)]
        checkpoint_every: usize,
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Sample pieces into `result_{i}.midi` files.
    Generate {
        #[command(flatten)]
        model: ModelArgs,
        #[arg(long)]
        output_dir: PathBuf,
        #[arg(long, default_value_t = 1)]
        count: usize,
        #[arg(long, default_value_t = 16)]
        bars: usize,
        #[arg(long, default_value_t = 1.2)]
        temperature: f64,
        #[arg(long, default_value_t = 5)]
        topk: usize,
        #[arg(long)]
        prompt: Option<PathBuf>,
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Detect a file's key and print the steps that move it to `--key`.
    Transpose {
        midi: PathBuf,
        #[arg(long)]
        key: String,
    },
}

/// Options shared by the model-driving subcommands. Flags override values
/// from `--config`.
#[derive(Args)]
struct ModelArgs {
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    dictionary: PathBuf,
    /// Checkpoint directory (or its model.json) to start from.
    #[arg(long)]
    checkpoint: Option<PathBuf>,
    #[arg(long)]
    x_len: Option<usize>,
    #[arg(long)]
    mem_len: Option<usize>,
    #[arg(long)]
    group_size: Option<usize>,
    #[arg(long)]
    batch_size: Option<usize>,
    #[arg(long)]
    no_chords: bool,
    #[arg(long)]
    transpose_to_all_keys: bool,
    /// Normalize every input to this key before tokenizing.
    #[arg(long)]
    key: Option<String>,
}

impl ModelArgs {
    fn load_config(&self) -> Result<ModelConfig, Box<dyn Error>> {
        let mut config = match &self.config {
            Some(path) => ModelConfig::load(path)?,
            None => ModelConfig::default(),
        };
        let overrides = [
            (&mut config.x_len, self.x_len),
            (&mut config.mem_len, self.mem_len),
            (&mut config.group_size, self.group_size),
            (&mut config.batch_size, self.batch_size),
        ];
        for (field, value) in overrides {
            if let Some(v) = value {
                *field = v;
            }
        }
        if self.no_chords {
            config.use_chords = false;
        }
        if self.transpose_to_all_keys {
            config.transpose_to_all_keys = true;
        }
        if self.key.is_some() {
            config.transpose_input_midi_to_key = self.key.clone();
        }
        config.validate()?;
        Ok(config)
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    if let Err(e) = run(cli.command) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn run(command: Command) -> Result<(), Box<dyn Error>> {
    match command {
        Command::Dictionary { output, no_chords } => {
            let vocab = Vocabulary::remi(!no_chords);
            vocab.save(&output)?;
            println!("Wrote {} events to {}", vocab.n_token(), output.display());
            Ok(())
        }
        Command::Finetune {
            model,
            data,
            output,
            epochs,
            stop_loss,
            checkpoint_every,
            seed,
        } => {
            let options = TrainOptions {
                epochs,
                stop_loss,
                checkpoint_every,
            };
            finetune(&model, &data, &output, &options, seed)
        }
        Command::Generate {
            model,
            output_dir,
            count,
            bars,
            temperature,
            topk,
            prompt,
            seed,
        } => {
            let options = GenerateOptions {
                n_target_bar: bars,
                temperature,
                topk,
                prompt,
            };
            sample(&model, &output_dir, count, &options, seed)
        }
        Command::Transpose { midi, key } => {
            let target = key
                .parse::<PitchClass>()
                .map_err(|k| format!("unknown key name {k:?}"))?;
            let detected = ProfileKeyDetector.detect(&midi)?;
            let steps = key::transposition_steps(detected, target);
            println!("{}: {detected}", midi.display());
            println!("Steps to {target}: {steps:+}");
            Ok(())
        }
    }
}

fn make_rng(seed: Option<u64>) -> TuneRng {
    match seed {
        Some(s) => {
            println!("Seed: {s}");
            TuneRng::new(s)
        }
        None => {
            let (rng, s) = TuneRng::from_clock();
            println!("Seed: {s} (from clock)");
            rng
        }
    }
}

fn collect_sources(data: &[PathBuf]) -> Result<Vec<PathBuf>, Box<dyn Error>> {
    let mut sources = Vec::new();
    for path in data {
        if path.is_dir() {
            sources.extend(corpus::list_midi_files(path)?);
        } else {
            sources.push(path.clone());
        }
    }
    Ok(sources)
}

fn finetune(
    args: &ModelArgs,
    data: &[PathBuf],
    output: &Path,
    options: &TrainOptions,
    seed: Option<u64>,
) -> Result<(), Box<dyn Error>> {
    println!("=== popmt finetune ===");
    let config = args.load_config()?;
    let mut rng = make_rng(seed);

    println!("[1/3] Loading dictionary and model...");
    let mut session = Session::open_markov(config, &args.dictionary, args.checkpoint.as_deref())?;
    println!("  {} events, {} layers of memory", session.vocab.n_token(), session.config.n_layer);

    println!("[2/3] Preparing data...");
    let sources = collect_sources(data)?;
    let tokenizer = RemiTokenizer {
        use_chords: session.config.use_chords,
    };
    let extractor = EventExtractor::from_config(&tokenizer, &ProfileKeyDetector, &session.config)?;
    let corpus = corpus::prepare_corpus(&sources, &extractor, &session.vocab, &session.config);
    println!(
        "  {} of {} sources used, {} groups",
        corpus.sources_used,
        sources.len(),
        corpus.groups.len()
    );
    for failure in &corpus.failures {
        println!("  Skipped {}: {}", failure.path.display(), failure.error);
    }
    if !corpus.oov.is_empty() {
        println!(
            "  {} velocities substituted, {} unknown events dropped",
            corpus.oov.substituted,
            corpus.oov.dropped.len()
        );
    }

    println!("[3/3] Training...");
    let report = train::finetune(&mut session, &corpus.groups, output, options, &mut rng)?;
    println!("  Epochs run: {}", report.epochs_run());
    if let Some(Some(loss)) = report.epoch_losses.last() {
        println!("  Final mean loss: {loss:.5}");
    }
    println!("  Failed steps: {}", report.failures.len());
    println!("  Checkpoints written: {}", report.checkpoints.len());
    if report.stopped_early {
        println!("  Stopped early at the loss threshold.");
    }
    Ok(())
}

fn sample(
    args: &ModelArgs,
    output_dir: &Path,
    count: usize,
    options: &GenerateOptions,
    seed: Option<u64>,
) -> Result<(), Box<dyn Error>> {
    println!("=== popmt generate ===");
    let config = args.load_config()?;
    let mut rng = make_rng(seed);
    let mut session = Session::open_markov(config, &args.dictionary, args.checkpoint.as_deref())?;
    let tokenizer = RemiTokenizer {
        use_chords: session.config.use_chords,
    };
    let extractor = EventExtractor::from_config(&tokenizer, &ProfileKeyDetector, &session.config)?;

    println!(
        "Generating {count} piece(s) of {} bars (temperature {}, topk {})",
        options.n_target_bar, options.temperature, options.topk
    );
    let outputs = generate::generate_batch(
        &mut session,
        &extractor,
        &RemiWriter,
        options,
        count,
        output_dir,
        &mut rng,
    )?;
    for path in outputs {
        println!("  {}", path.display());
    }
    Ok(())
}
