use crate::tracker::ActivePitchSet;
use serde::Serialize;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyDescriptor {
    pub name: &'static str,
    pub midi: u8,
    pub is_black: bool,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyState {
    pub key: KeyDescriptor,
    pub highlighted: bool,
}

const fn key(name: &'static str, midi: u8, is_black: bool) -> KeyDescriptor {
    KeyDescriptor {
        name,
        midi,
        is_black,
    }
}

// -----------------------------------------------------------------------------
// One octave and a bit: C4 (MIDI 60) .. C5 (MIDI 72) inclusive
// -----------------------------------------------------------------------------

pub const PIANO_KEYS: [KeyDescriptor; 13] = [
    key("C4", 60, false),
    key("C#4", 61, true),
    key("D4", 62, false),
    key("D#4", 63, true),
    key("E4", 64, false),
    key("F4", 65, false),
    key("F#4", 66, true),
    key("G4", 67, false),
    key("G#4", 68, true),
    key("A4", 69, false),
    key("A#4", 70, true),
    key("B4", 71, false),
    key("C5", 72, false),
];

pub fn highlighted(key: &KeyDescriptor, active: &ActivePitchSet) -> bool {
    active.contains(key.midi)
}

pub fn key_states(active: &ActivePitchSet) -> Vec<KeyState> {
    PIANO_KEYS
        .iter()
        .map(|key| KeyState {
            key: *key,
            highlighted: highlighted(key, active),
        })
        .collect()
}

/// Return the key descriptor for the given MIDI note number, if it is on the keyboard.
pub fn key_for_midi(midi: u8) -> Option<&'static KeyDescriptor> {
    PIANO_KEYS.iter().find(|k| k.midi == midi)
}
