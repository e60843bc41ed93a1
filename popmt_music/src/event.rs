// REMI events and their categories.
//
// An `Event` is a named musical attribute with a string value; its dictionary
// key is `"{name}_{value}"` (e.g. `"Note On_60"`, `"Bar_None"`). The
// `EventCategory` tag is derived once from the name so callers never match on
// substrings of event strings.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Category of an event, parsed from its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EventCategory {
    Bar,
    Position,
    NoteVelocity,
    NoteOn,
    NoteDuration,
    TempoClass,
    TempoValue,
    Chord,
    Other,
}

impl EventCategory {
    pub const ALL: [EventCategory; 9] = [
        EventCategory::Bar,
        EventCategory::Position,
        EventCategory::NoteVelocity,
        EventCategory::NoteOn,
        EventCategory::NoteDuration,
        EventCategory::TempoClass,
        EventCategory::TempoValue,
        EventCategory::Chord,
        EventCategory::Other,
    ];

    /// The event name this category is written with.
    pub fn name(self) -> &'static str {
        match self {
            EventCategory::Bar => "Bar",
            EventCategory::Position => "Position",
            EventCategory::NoteVelocity => "Note Velocity",
            EventCategory::NoteOn => "Note On",
            EventCategory::NoteDuration => "Note Duration",
            EventCategory::TempoClass => "Tempo Class",
            EventCategory::TempoValue => "Tempo Value",
            EventCategory::Chord => "Chord",
            EventCategory::Other => "Other",
        }
    }

    pub fn from_name(name: &str) -> Self {
        match name {
            "Bar" => EventCategory::Bar,
            "Position" => EventCategory::Position,
            "Note Velocity" => EventCategory::NoteVelocity,
            "Note On" => EventCategory::NoteOn,
            "Note Duration" => EventCategory::NoteDuration,
            "Tempo Class" => EventCategory::TempoClass,
            "Tempo Value" => EventCategory::TempoValue,
            "Chord" => EventCategory::Chord,
            _ => EventCategory::Other,
        }
    }

    /// Category of a full dictionary key such as `"Note On_60"`.
    ///
    /// The name is everything before the last underscore; values never
    /// contain one.
    pub fn of_key(key: &str) -> Self {
        match key.rsplit_once('_') {
            Some((name, _)) => Self::from_name(name),
            None => EventCategory::Other,
        }
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One tokenized musical event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub name: String,
    pub value: String,
}

impl Event {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Event {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn of(category: EventCategory, value: impl Into<String>) -> Self {
        Event::new(category.name(), value)
    }

    /// The bar marker. REMI bars carry no value.
    pub fn bar() -> Self {
        Event::of(EventCategory::Bar, "None")
    }

    pub fn category(&self) -> EventCategory {
        EventCategory::from_name(&self.name)
    }

    /// Dictionary key, `"{name}_{value}"`.
    pub fn key(&self) -> String {
        format!("{}_{}", self.name, self.value)
    }
}

/// Dictionary key of the bar marker.
pub const BAR_KEY: &str = "Bar_None";
/// Position marker used by random generation seeds.
pub const FIRST_POSITION_KEY: &str = "Position_1/16";
/// Substitute for out-of-vocabulary velocities.
pub const FALLBACK_VELOCITY_KEY: &str = "Note Velocity_21";
