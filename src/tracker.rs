use crate::notation::TimingEvent;
use log::trace;
use std::collections::BTreeSet;

/// The pitches sounding at the latest reported playback position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivePitchSet(BTreeSet<u8>);

impl ActivePitchSet {
    pub fn contains(&self, midi: u8) -> bool {
        self.0.contains(&midi)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.iter().copied().collect()
    }
}

impl FromIterator<u8> for ActivePitchSet {
    fn from_iter<I: IntoIterator<Item = u8>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Maps the timing events of the active session onto the set of highlighted pitches.
///
/// The policy is "last event wins": every accepted event replaces the whole set.
#[derive(Debug, Default)]
pub struct NoteHighlightTracker {
    active: ActivePitchSet,
}

impl NoteHighlightTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when the event was a measure-start sentinel and nothing changed.
    pub fn on_event(&mut self, event: &TimingEvent) -> bool {
        if event.is_measure_sentinel() {
            trace!("Ignoring measure sentinel at {:.3}ms", event.milliseconds);
            return false;
        }

        self.active = event.pitches.iter().copied().collect();
        true
    }

    pub fn clear(&mut self) {
        self.active = ActivePitchSet::default();
    }

    pub fn active(&self) -> &ActivePitchSet {
        &self.active
    }
}
