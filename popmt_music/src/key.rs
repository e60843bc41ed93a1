// Key detection and key-normalizing transposition.
//
// `transposition_steps` is the single function deciding how far to move a
// piece so its key lands on a target:
//
// - pitch classes are counted in semitones (C = 0 … B = 11);
// - for a minor piece the target is lowered by 3 semitones, so a minor piece
//   lands on the relative minor of the target major key;
// - the result is the signed circular distance `(target - tonic) mod 12`
//   folded into `[-5, 6]`: distances above 6 go downward, and the tritone
//   (exactly 6 either way) goes upward.
//
// Key detection itself sits behind `KeyDetector`. `ProfileKeyDetector`
// correlates a duration-weighted pitch-class histogram with the
// Krumhansl–Kessler major and minor profiles in all 12 rotations.

use crate::error::SourceError;
use crate::midi::{self, Note};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PitchClass {
    C,
    CSharp,
    D,
    DSharp,
    E,
    F,
    FSharp,
    G,
    GSharp,
    A,
    ASharp,
    B,
}

impl PitchClass {
    pub const ALL: [PitchClass; 12] = [
        PitchClass::C,
        PitchClass::CSharp,
        PitchClass::D,
        PitchClass::DSharp,
        PitchClass::E,
        PitchClass::F,
        PitchClass::FSharp,
        PitchClass::G,
        PitchClass::GSharp,
        PitchClass::A,
        PitchClass::ASharp,
        PitchClass::B,
    ];

    /// Semitones above C.
    pub fn semitone(self) -> i32 {
        self as i32
    }

    pub fn from_semitone(semitone: i32) -> Self {
        Self::ALL[semitone.rem_euclid(12) as usize]
    }

    pub fn name(self) -> &'static str {
        const NAMES: [&str; 12] = [
            "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
        ];
        NAMES[self as usize]
    }

    pub fn transposed(self, steps: i32) -> Self {
        Self::from_semitone(self.semitone() + steps)
    }
}

impl fmt::Display for PitchClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PitchClass {
    type Err = String;

    /// Accepts `C`, `C#`, `Db`, and the `D-` flat spelling some analysis tools
    /// emit; letter case is ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.trim().chars();
        let letter = chars.next().ok_or_else(|| s.to_string())?;
        let base = match letter.to_ascii_uppercase() {
            'C' => 0,
            'D' => 2,
            'E' => 4,
            'F' => 5,
            'G' => 7,
            'A' => 9,
            'B' => 11,
            _ => return Err(s.to_string()),
        };
        let mut offset = 0;
        for accidental in chars {
            offset += match accidental {
                '#' | '♯' => 1,
                'b' | '-' | '♭' => -1,
                _ => return Err(s.to_string()),
            };
        }
        Ok(Self::from_semitone(base + offset))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyMode {
    Major,
    Minor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectedKey {
    pub tonic: PitchClass,
    pub mode: KeyMode,
}

impl fmt::Display for DetectedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = match self.mode {
            KeyMode::Major => "major",
            KeyMode::Minor => "minor",
        };
        write!(f, "{} {mode}", self.tonic)
    }
}

/// Signed semitone steps moving `detected` onto `target` (see module docs).
pub fn transposition_steps(detected: DetectedKey, target: PitchClass) -> i32 {
    let mut target = target.semitone();
    if detected.mode == KeyMode::Minor {
        target -= 3;
    }
    let up = (target - detected.tonic.semitone()).rem_euclid(12);
    if up > 6 { up - 12 } else { up }
}

/// Key analysis of a MIDI source.
pub trait KeyDetector {
    fn detect(&self, path: &Path) -> Result<DetectedKey, SourceError>;
}

const MAJOR_PROFILE: [f64; 12] = [
    6.35, 2.23, 3.48, 2.33, 4.38, 4.09, 2.52, 5.19, 2.39, 3.66, 2.29, 2.88,
];
const MINOR_PROFILE: [f64; 12] = [
    6.33, 2.68, 3.52, 5.38, 2.60, 3.53, 2.54, 4.75, 3.98, 2.69, 3.34, 3.17,
];

#[derive(Debug, Clone, Copy, Default)]
pub struct ProfileKeyDetector;

impl KeyDetector for ProfileKeyDetector {
    fn detect(&self, path: &Path) -> Result<DetectedKey, SourceError> {
        let score = midi::read_score(path)?;
        detect_from_notes(&score.notes).ok_or_else(|| SourceError::KeyDetection {
            path: path.to_path_buf(),
            reason: "no pitched notes".into(),
        })
    }
}

/// Best-correlating key for a set of notes; `None` without notes.
pub fn detect_from_notes(notes: &[Note]) -> Option<DetectedKey> {
    let mut chroma = [0.0f64; 12];
    for n in notes {
        chroma[usize::from(n.pitch % 12)] += f64::from(n.end.saturating_sub(n.start).max(1));
    }
    if chroma.iter().all(|&c| c == 0.0) {
        return None;
    }

    let mut best: Option<(f64, DetectedKey)> = None;
    for tonic in PitchClass::ALL {
        for (mode, profile) in [(KeyMode::Major, &MAJOR_PROFILE), (KeyMode::Minor, &MINOR_PROFILE)] {
            let r = correlation(&chroma, profile, tonic.semitone() as usize);
            if best.is_none_or(|(score, _)| r > score) {
                best = Some((r, DetectedKey { tonic, mode }));
            }
        }
    }
    best.map(|(_, key)| key)
}

/// Pearson correlation of `chroma` with `profile` rotated to start at `shift`.
fn correlation(chroma: &[f64; 12], profile: &[f64; 12], shift: usize) -> f64 {
    let rotated: Vec<f64> = (0..12).map(|i| chroma[(i + shift) % 12]).collect();
    let mean_c = rotated.iter().sum::<f64>() / 12.0;
    let mean_p = profile.iter().sum::<f64>() / 12.0;
    let mut num = 0.0;
    let mut den_c = 0.0;
    let mut den_p = 0.0;
    for (c, p) in rotated.iter().zip(profile) {
        num += (c - mean_c) * (p - mean_p);
        den_c += (c - mean_c).powi(2);
        den_p += (p - mean_p).powi(2);
    }
    let den = (den_c * den_p).sqrt();
    if den == 0.0 { 0.0 } else { num / den }
}
