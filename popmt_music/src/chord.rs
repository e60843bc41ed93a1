// Template-matching chord recognition for chord-conditioned tokenization.
//
// The timeline is cut into half-bar windows. Each window gets a
// duration-weighted pitch-class histogram which is scored against every
// root × quality template; the lowest sounding pitch class gets a small bonus
// as a root candidate. Consecutive windows with the same label merge into one
// chord item. Windows with no sounding notes are labeled `N:N`.

use crate::midi::{Note, TICKS_PER_BEAT};

pub const ROOTS: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Quality name and the intervals above the root it contains.
pub const QUALITIES: [(&str, &[u8]); 5] = [
    ("maj", &[0, 4, 7]),
    ("min", &[0, 3, 7]),
    ("dim", &[0, 3, 6]),
    ("aug", &[0, 4, 8]),
    ("dom", &[0, 4, 7, 10]),
];

pub const NO_CHORD: &str = "N:N";

const WINDOW_TICKS: u32 = TICKS_PER_BEAT * 2;
const OUTSIDE_PENALTY: f64 = 0.5;
const BASS_BONUS: f64 = 0.25;

/// A recognized chord starting at `start`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChordSpan {
    pub start: u32,
    pub label: String,
}

/// Every chord label that recognition can produce.
pub fn all_labels() -> Vec<String> {
    let mut labels = vec![NO_CHORD.to_string()];
    for root in ROOTS {
        for (quality, _) in QUALITIES {
            labels.push(format!("{root}:{quality}"));
        }
    }
    labels
}

pub fn extract_chords(notes: &[Note]) -> Vec<ChordSpan> {
    let end = notes.iter().map(|n| n.end).max().unwrap_or(0);
    let mut spans: Vec<ChordSpan> = Vec::new();
    let mut start = 0;
    while start < end {
        let stop = start + WINDOW_TICKS;
        let label = label_window(notes, start, stop);
        if spans.last().is_none_or(|s| s.label != label) {
            spans.push(ChordSpan { start, label });
        }
        start = stop;
    }
    spans
}

fn label_window(notes: &[Note], start: u32, stop: u32) -> String {
    let mut chroma = [0.0f64; 12];
    let mut bass: Option<u8> = None;
    for n in notes {
        let overlap = n.end.min(stop).saturating_sub(n.start.max(start));
        if overlap == 0 {
            continue;
        }
        chroma[usize::from(n.pitch % 12)] += f64::from(overlap);
        if bass.is_none_or(|b| n.pitch < b) {
            bass = Some(n.pitch);
        }
    }
    let total: f64 = chroma.iter().sum();
    if total <= 0.0 {
        return NO_CHORD.to_string();
    }

    let mut best = (f64::NEG_INFINITY, 0usize, 0usize);
    for root in 0..12 {
        for (qi, (_, intervals)) in QUALITIES.iter().enumerate() {
            let mut inside = 0.0;
            for &iv in intervals.iter() {
                inside += chroma[(root + usize::from(iv)) % 12];
            }
            // Normalize by template size so four-note chords are not favored.
            let mut score =
                inside / intervals.len() as f64 - OUTSIDE_PENALTY * (total - inside) / 12.0;
            if bass.is_some_and(|b| usize::from(b % 12) == root) {
                score += BASS_BONUS * total / 12.0;
            }
            if score > best.0 {
                best = (score, root, qi);
            }
        }
    }
    format!("{}:{}", ROOTS[best.1], QUALITIES[best.2].0)
}
