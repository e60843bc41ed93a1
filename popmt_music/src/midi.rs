// Standard MIDI File reading and writing.
//
// `Score` is the flat, tick-based view both directions share: notes, tempo
// changes and text markers (chord labels), all on a fixed resolution of
// `TICKS_PER_BEAT` ticks per quarter note. Files with another resolution are
// rescaled on read. Percussion (channel 10) is ignored on read.
//
// Output is SMF Format 1: track 0 carries tempo and marker meta events,
// track 1 carries the piano part on channel 0.
//
// Uses the `midly` crate for parsing and encoding.

use crate::error::MidiError;
use midly::{
    Format, Header, MetaMessage, MidiMessage, Smf, Timing, Track, TrackEvent, TrackEventKind,
    num::{u4, u7, u15, u24, u28},
};
use std::collections::BTreeMap;
use std::path::Path;

/// Ticks per quarter note for every `Score`.
pub const TICKS_PER_BEAT: u32 = 480;

const PERCUSSION_CHANNEL: u8 = 9;
const DEFAULT_BPM: u32 = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Note {
    pub start: u32,
    pub end: u32,
    pub pitch: u8,
    pub velocity: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TempoChange {
    pub tick: u32,
    pub bpm: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    pub tick: u32,
    pub text: String,
}

/// Flat note/tempo/marker content of a MIDI file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Score {
    pub notes: Vec<Note>,
    pub tempos: Vec<TempoChange>,
    pub markers: Vec<Marker>,
}

impl Score {
    /// Tick at which the last note ends.
    pub fn end_tick(&self) -> u32 {
        self.notes.iter().map(|n| n.end).max().unwrap_or(0)
    }

    /// Shift everything later by `ticks`.
    pub fn shifted(mut self, ticks: u32) -> Self {
        for n in &mut self.notes {
            n.start += ticks;
            n.end += ticks;
        }
        for t in &mut self.tempos {
            t.tick += ticks;
        }
        for m in &mut self.markers {
            m.tick += ticks;
        }
        self
    }
}

/// Read and parse a MIDI file into a `Score`.
pub fn read_score(path: &Path) -> Result<Score, MidiError> {
    let bytes = std::fs::read(path).map_err(|source| MidiError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let smf = Smf::parse(&bytes).map_err(|source| MidiError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    smf_to_score(&smf).ok_or_else(|| MidiError::Timecode(path.to_path_buf()))
}

/// Convert a parsed SMF. `None` for timecode-based timing.
fn smf_to_score(smf: &Smf) -> Option<Score> {
    let ticks_per_beat = match smf.header.timing {
        Timing::Metrical(tpb) => u32::from(tpb.as_int()).max(1),
        Timing::Timecode(..) => return None,
    };
    let rescale = |tick: u64| (tick * u64::from(TICKS_PER_BEAT) / u64::from(ticks_per_beat)) as u32;

    let mut score = Score::default();
    for track in &smf.tracks {
        let mut tick: u64 = 0;
        // (channel, key) -> stack of (start, velocity)
        let mut sounding: BTreeMap<(u8, u8), Vec<(u32, u8)>> = BTreeMap::new();
        for event in track {
            tick += u64::from(event.delta.as_int());
            let now = rescale(tick);
            match event.kind {
                TrackEventKind::Midi { channel, message } => {
                    let channel = channel.as_int();
                    if channel == PERCUSSION_CHANNEL {
                        continue;
                    }
                    match message {
                        MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                            sounding
                                .entry((channel, key.as_int()))
                                .or_default()
                                .push((now, vel.as_int()));
                        }
                        MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. } => {
                            let stack = sounding.entry((channel, key.as_int())).or_default();
                            if !stack.is_empty() {
                                let (start, velocity) = stack.remove(0);
                                score.notes.push(Note {
                                    start,
                                    end: now.max(start),
                                    pitch: key.as_int(),
                                    velocity,
                                });
                            }
                        }
                        _ => {}
                    }
                }
                TrackEventKind::Meta(MetaMessage::Tempo(us_per_beat)) => {
                    let us = us_per_beat.as_int().max(1);
                    score.tempos.push(TempoChange {
                        tick: now,
                        bpm: 60_000_000 / us,
                    });
                }
                TrackEventKind::Meta(MetaMessage::Marker(text)) => {
                    score.markers.push(Marker {
                        tick: now,
                        text: String::from_utf8_lossy(text).into_owned(),
                    });
                }
                _ => {}
            }
        }
    }
    score.notes.sort_by_key(|n| (n.start, n.pitch));
    score.tempos.sort_by_key(|t| t.tick);
    score.markers.sort_by_key(|m| m.tick);
    if score.tempos.first().is_none_or(|t| t.tick > 0) {
        score.tempos.insert(
            0,
            TempoChange {
                tick: 0,
                bpm: DEFAULT_BPM,
            },
        );
    }
    Some(score)
}

/// Encode a `Score` and write it to `path`.
pub fn write_score(score: &Score, path: &Path) -> Result<(), MidiError> {
    let smf = score_to_smf(score);
    let mut buf = Vec::new();
    smf.write_std(&mut buf)
        .map_err(|e| MidiError::Encode(e.to_string()))?;
    std::fs::write(path, &buf).map_err(|source| MidiError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Absolute-time event before delta encoding. `order` breaks ties so note
/// offs precede note ons at the same tick.
struct Timed<'a> {
    tick: u32,
    order: u8,
    kind: TrackEventKind<'a>,
}

fn delta_encode<'a>(mut events: Vec<Timed<'a>>) -> Track<'a> {
    events.sort_by_key(|e| (e.tick, e.order));
    let mut track: Track<'a> = Vec::with_capacity(events.len() + 1);
    let mut last = 0;
    for e in events {
        track.push(TrackEvent {
            delta: u28::new(e.tick - last),
            kind: e.kind,
        });
        last = e.tick;
    }
    track.push(TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    });
    track
}

/// Convert a `Score` into an in-memory SMF borrowing its marker text.
fn score_to_smf(score: &Score) -> Smf<'_> {
    let mut smf = Smf::new(Header::new(
        Format::Parallel,
        Timing::Metrical(u15::new(TICKS_PER_BEAT as u16)),
    ));

    // Track 0: tempo map and chord markers.
    let mut meta = Vec::new();
    for t in &score.tempos {
        meta.push(Timed {
            tick: t.tick,
            order: 0,
            kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::new(
                60_000_000 / t.bpm.max(1),
            ))),
        });
    }
    for m in &score.markers {
        meta.push(Timed {
            tick: m.tick,
            order: 1,
            kind: TrackEventKind::Meta(MetaMessage::Marker(m.text.as_bytes())),
        });
    }
    smf.tracks.push(delta_encode(meta));

    // Track 1: piano.
    let channel = u4::new(0);
    let mut piano = vec![
        Timed {
            tick: 0,
            order: 0,
            kind: TrackEventKind::Meta(MetaMessage::TrackName(b"Piano")),
        },
        Timed {
            tick: 0,
            order: 0,
            kind: TrackEventKind::Midi {
                channel,
                message: MidiMessage::ProgramChange { program: u7::new(0) },
            },
        },
    ];
    for n in &score.notes {
        piano.push(Timed {
            tick: n.start,
            order: 2,
            kind: TrackEventKind::Midi {
                channel,
                message: MidiMessage::NoteOn {
                    key: u7::new(n.pitch.min(127)),
                    vel: u7::new(n.velocity.clamp(1, 127)),
                },
            },
        });
        piano.push(Timed {
            tick: n.end.max(n.start),
            order: 1,
            kind: TrackEventKind::Midi {
                channel,
                message: MidiMessage::NoteOff {
                    key: u7::new(n.pitch.min(127)),
                    vel: u7::new(0),
                },
            },
        });
    }
    smf.tracks.push(delta_encode(piano));

    smf
}
