// REMI tokenization: MIDI ↔ bar/position/note/tempo/chord events.
//
// Tokenizing a file runs: read notes and tempo changes → transpose →
// quantize note starts to a 1/16 grid → (optionally) recognize chords →
// expand tempo to one item per beat → bucket items into 4/4 bars → emit
// `Bar`, then per item `Position` followed by the item's attributes. Bars
// without notes are skipped.
//
// Writing goes the other way: words → events → a `Score` with notes placed by
// bar and position, tempo changes, and chord markers. When continuing a
// prompt, the generated part is shifted past the prompt's bars and merged
// into the prompt file's content.
//
// The tokenizer and writer sit behind the `MidiTokenizer` / `MidiWriter`
// traits so the orchestration loops can run against in-memory fakes.

use crate::chord;
use crate::error::MidiError;
use crate::event::{Event, EventCategory};
use crate::midi::{self, Marker, Note, Score, TICKS_PER_BEAT, TempoChange};
use crate::vocab::{Vocabulary, Word};
use std::path::Path;

pub const BEATS_PER_BAR: u32 = 4;
pub const TICKS_PER_BAR: u32 = TICKS_PER_BEAT * BEATS_PER_BAR;
pub const POSITIONS_PER_BAR: u32 = 16;
const TICKS_PER_POSITION: u32 = TICKS_PER_BAR / POSITIONS_PER_BAR;

pub const VELOCITY_CLASSES: u8 = 32;
const VELOCITY_BIN: u8 = 4;
pub const DURATION_CLASSES: u32 = 64;
const DURATION_STEP: u32 = 60;
pub const TEMPO_VALUES: u32 = 60;
/// Tempo class name and the first BPM of its range.
pub const TEMPO_CLASSES: [(&str, u32); 3] = [("slow", 30), ("mid", 90), ("fast", 150)];

/// Turns a MIDI file into events, transposed by a number of semitones.
pub trait MidiTokenizer {
    fn tokenize(&self, path: &Path, transposition_steps: i32) -> Result<Vec<Event>, MidiError>;
}

/// Renders words back into a MIDI file.
pub trait MidiWriter {
    /// `prompt` and `bars_in_prompt` are given when `words` continue a prompt
    /// file; the output then contains the prompt followed by `words`.
    fn write(
        &self,
        words: &[Word],
        vocab: &Vocabulary,
        output: &Path,
        prompt: Option<&Path>,
        bars_in_prompt: usize,
    ) -> Result<(), MidiError>;
}

/// Every event key the tokenizer can emit.
pub fn event_space(use_chords: bool) -> Vec<String> {
    let mut keys = vec![Event::bar().key()];
    for p in 1..=POSITIONS_PER_BAR {
        keys.push(format!("Position_{p}/{POSITIONS_PER_BAR}"));
    }
    for v in 0..VELOCITY_CLASSES {
        keys.push(format!("Note Velocity_{v}"));
    }
    for pitch in 0..128 {
        keys.push(format!("Note On_{pitch}"));
    }
    for d in 0..DURATION_CLASSES {
        keys.push(format!("Note Duration_{d}"));
    }
    for (class, _) in TEMPO_CLASSES {
        keys.push(format!("Tempo Class_{class}"));
    }
    for v in 0..TEMPO_VALUES {
        keys.push(format!("Tempo Value_{v}"));
    }
    if use_chords {
        keys.extend(chord::all_labels().into_iter().map(|l| format!("Chord_{l}")));
    }
    keys
}

#[derive(Debug, Clone, Default)]
pub struct RemiTokenizer {
    pub use_chords: bool,
}

impl MidiTokenizer for RemiTokenizer {
    fn tokenize(&self, path: &Path, transposition_steps: i32) -> Result<Vec<Event>, MidiError> {
        let score = midi::read_score(path)?;
        let events = score_to_events(&score, transposition_steps, self.use_chords);
        if events.is_empty() {
            return Err(MidiError::NoNotes(path.to_path_buf()));
        }
        Ok(events)
    }
}

#[derive(Debug, Clone)]
enum ItemKind {
    Chord(String),
    Tempo(u32),
    Note { pitch: u8, velocity: u8, duration: u32 },
}

#[derive(Debug, Clone)]
struct Item {
    start: u32,
    kind: ItemKind,
}

/// Tokenize an in-memory score. Empty when no note survives transposition.
pub fn score_to_events(score: &Score, transposition_steps: i32, use_chords: bool) -> Vec<Event> {
    let notes: Vec<Note> = score
        .notes
        .iter()
        .filter_map(|n| {
            let pitch = i32::from(n.pitch) + transposition_steps;
            (0..=127).contains(&pitch).then(|| Note {
                pitch: pitch as u8,
                ..*n
            })
        })
        .map(quantize)
        .collect();
    if notes.is_empty() {
        return Vec::new();
    }
    let max_time = notes.iter().map(|n| n.end).max().unwrap_or(0);

    // Same-start items keep chord, tempo, note order.
    let mut items = Vec::new();
    if use_chords {
        items.extend(chord::extract_chords(&notes).into_iter().map(|c| Item {
            start: c.start,
            kind: ItemKind::Chord(c.label),
        }));
    }
    items.extend(tempo_items(&score.tempos));
    items.extend(notes.iter().map(|n| Item {
        start: n.start,
        kind: ItemKind::Note {
            pitch: n.pitch,
            velocity: n.velocity,
            duration: n.end - n.start,
        },
    }));
    items.sort_by_key(|i| i.start);

    let mut events = Vec::new();
    let mut bar_start = 0;
    let mut cursor = 0;
    while bar_start <= max_time {
        let bar_end = bar_start + TICKS_PER_BAR;
        let first = cursor;
        while cursor < items.len() && items[cursor].start < bar_end {
            cursor += 1;
        }
        let bar_items = &items[first..cursor];
        if bar_items
            .iter()
            .any(|i| matches!(i.kind, ItemKind::Note { .. }))
        {
            events.push(Event::bar());
            for item in bar_items {
                push_item_events(&mut events, item, bar_start);
            }
        }
        bar_start = bar_end;
    }
    events
}

/// Snap a note's start to the nearest grid line (ties go earlier), keeping its
/// length.
fn quantize(note: Note) -> Note {
    let grid = TICKS_PER_POSITION;
    let start = (note.start + (grid - 1) / 2) / grid * grid;
    let length = note.end.saturating_sub(note.start);
    Note {
        start,
        end: start + length,
        ..note
    }
}

/// One tempo item per beat up to the last tempo change, each carrying the
/// tempo in force at that beat.
fn tempo_items(tempos: &[TempoChange]) -> Vec<Item> {
    let Some(last) = tempos.iter().map(|t| t.tick).max() else {
        return Vec::new();
    };
    let mut items = Vec::new();
    let mut current = tempos.first().map(|t| t.bpm).unwrap_or(120);
    let mut beat = 0;
    while beat <= last {
        if let Some(t) = tempos.iter().rev().find(|t| t.tick <= beat) {
            current = t.bpm;
        }
        items.push(Item {
            start: beat,
            kind: ItemKind::Tempo(current),
        });
        beat += TICKS_PER_BEAT;
    }
    items
}

fn push_item_events(events: &mut Vec<Event>, item: &Item, bar_start: u32) {
    let offset = item.start - bar_start;
    let position = ((offset + (TICKS_PER_POSITION - 1) / 2) / TICKS_PER_POSITION)
        .min(POSITIONS_PER_BAR - 1);
    events.push(Event::of(
        EventCategory::Position,
        format!("{}/{POSITIONS_PER_BAR}", position + 1),
    ));
    match &item.kind {
        ItemKind::Note {
            pitch,
            velocity,
            duration,
        } => {
            let velocity_class = (velocity / VELOCITY_BIN).min(VELOCITY_CLASSES - 1);
            events.push(Event::of(EventCategory::NoteVelocity, velocity_class.to_string()));
            events.push(Event::of(EventCategory::NoteOn, pitch.to_string()));
            events.push(Event::of(
                EventCategory::NoteDuration,
                duration_class(*duration).to_string(),
            ));
        }
        ItemKind::Chord(label) => {
            events.push(Event::of(EventCategory::Chord, label.clone()));
        }
        ItemKind::Tempo(bpm) => {
            let (class, value) = tempo_class(*bpm);
            events.push(Event::of(EventCategory::TempoClass, class));
            events.push(Event::of(EventCategory::TempoValue, value.to_string()));
        }
    }
}

/// Nearest duration bin of `60, 120, …, 3840` ticks; ties go to the shorter.
fn duration_class(duration: u32) -> u32 {
    let nearest = (duration + (DURATION_STEP - 1) / 2) / DURATION_STEP;
    nearest.saturating_sub(1).min(DURATION_CLASSES - 1)
}

fn tempo_class(bpm: u32) -> (&'static str, u32) {
    let (first_class, first_start) = TEMPO_CLASSES[0];
    if bpm < first_start {
        return (first_class, 0);
    }
    for (class, start) in TEMPO_CLASSES {
        if (start..start + TEMPO_VALUES).contains(&bpm) {
            return (class, bpm - start);
        }
    }
    (TEMPO_CLASSES[TEMPO_CLASSES.len() - 1].0, TEMPO_VALUES - 1)
}

fn tempo_from_class(class: &str, value: u32) -> Option<u32> {
    TEMPO_CLASSES
        .iter()
        .find(|(name, _)| *name == class)
        .map(|(_, start)| start + value)
}

/// Decode events into a score. Malformed runs of events are skipped.
pub fn events_to_score(events: &[Event]) -> Score {
    let mut score = Score::default();
    let mut bar: u32 = 0;
    let position_tick = |bar: u32, value: &str| -> Option<u32> {
        let index: u32 = value.split('/').next()?.parse().ok()?;
        let index = index.checked_sub(1)?.min(POSITIONS_PER_BAR - 1);
        Some(bar * TICKS_PER_BAR + index * TICKS_PER_POSITION)
    };
    let category = |i: usize| events.get(i).map(Event::category);

    for (i, event) in events.iter().enumerate() {
        match event.category() {
            // The leading bar opens bar 0.
            EventCategory::Bar if i > 0 => bar += 1,
            EventCategory::Position => {
                let Some(tick) = position_tick(bar, &event.value) else {
                    continue;
                };
                match category(i + 1) {
                    Some(EventCategory::NoteVelocity)
                        if category(i + 2) == Some(EventCategory::NoteOn)
                            && category(i + 3) == Some(EventCategory::NoteDuration) =>
                    {
                        let parsed = (
                            events[i + 1].value.parse::<u8>(),
                            events[i + 2].value.parse::<u8>(),
                            events[i + 3].value.parse::<u32>(),
                        );
                        if let (Ok(v), Ok(pitch), Ok(d)) = parsed {
                            let velocity = (v.min(VELOCITY_CLASSES - 1) * VELOCITY_BIN).max(1);
                            let duration = (d.min(DURATION_CLASSES - 1) + 1) * DURATION_STEP;
                            score.notes.push(Note {
                                start: tick,
                                end: tick + duration,
                                pitch: pitch.min(127),
                                velocity,
                            });
                        }
                    }
                    Some(EventCategory::Chord) => score.markers.push(Marker {
                        tick,
                        text: events[i + 1].value.clone(),
                    }),
                    Some(EventCategory::TempoClass)
                        if category(i + 2) == Some(EventCategory::TempoValue) =>
                    {
                        let bpm = events[i + 2]
                            .value
                            .parse()
                            .ok()
                            .and_then(|v| tempo_from_class(&events[i + 1].value, v));
                        if let Some(bpm) = bpm {
                            score.tempos.push(TempoChange { tick, bpm });
                        }
                    }
                    _ => {}
                }
            }
            _ => {}
        }
    }
    score
}

/// Decode words through the vocabulary. Unknown words are skipped.
pub fn words_to_events(words: &[Word], vocab: &Vocabulary) -> Vec<Event> {
    words
        .iter()
        .filter_map(|&w| vocab.reverse_lookup(w))
        .filter_map(|key| key.rsplit_once('_'))
        .map(|(name, value)| Event::new(name, value))
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct RemiWriter;

impl MidiWriter for RemiWriter {
    fn write(
        &self,
        words: &[Word],
        vocab: &Vocabulary,
        output: &Path,
        prompt: Option<&Path>,
        bars_in_prompt: usize,
    ) -> Result<(), MidiError> {
        let generated = events_to_score(&words_to_events(words, vocab));
        let score = match prompt {
            Some(prompt_path) => {
                let prompt_score = midi::read_score(prompt_path)?;
                continue_prompt(prompt_score, generated, bars_in_prompt)
            }
            None => generated,
        };
        midi::write_score(&score, output)
    }
}

/// Append `generated` after the first `bars_in_prompt` bars of `prompt`.
/// Prompt tempo changes past that point are dropped in favor of the
/// generated ones.
pub fn continue_prompt(mut prompt: Score, generated: Score, bars_in_prompt: usize) -> Score {
    let offset = bars_in_prompt as u32 * TICKS_PER_BAR;
    let generated = generated.shifted(offset);
    prompt.tempos.retain(|t| t.tick < offset);
    prompt.tempos.extend(generated.tempos);
    prompt.notes.extend(generated.notes);
    prompt.markers.extend(generated.markers);
    prompt.notes.sort_by_key(|n| (n.start, n.pitch));
    prompt.markers.sort_by_key(|m| m.tick);
    prompt
}
