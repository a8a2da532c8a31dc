use crate::engine::{AudioOutput, SharedOutput};
use anyhow::{Context, bail};
use log::{debug, info, warn};
use midly::num::{u4, u7, u15, u24, u28};
use midly::{Format, Header, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;

const TICKS_PER_QUARTER: u16 = 480;
const RECORDING_MPQN: u32 = 500_000;

type Opener = Box<dyn Fn() -> anyhow::Result<Box<dyn AudioOutput>>>;

/// The component's single audio output.
///
/// Opened lazily on the first [`AudioResource::acquire`], so nothing is claimed
/// until a user actually presses play, and released on drop.
pub struct AudioResource {
    opener: Opener,
    output: Option<SharedOutput>,
}

impl std::fmt::Debug for AudioResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioResource")
            .field("acquired", &self.output.is_some())
            .finish()
    }
}

impl AudioResource {
    pub fn new<F>(opener: F) -> Self
    where
        F: Fn() -> anyhow::Result<Box<dyn AudioOutput>> + 'static,
    {
        Self {
            opener: Box::new(opener),
            output: None,
        }
    }

    pub fn logging() -> Self {
        Self::new(|| Ok(Box::new(LogOutput::default())))
    }

    pub fn recording(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self::new(move || Ok(Box::new(MidiRecorder::create(path.clone())?)))
    }

    pub fn is_acquired(&self) -> bool {
        self.output.is_some()
    }

    pub fn acquire(&mut self) -> anyhow::Result<SharedOutput> {
        if let Some(output) = self.output.as_ref() {
            return Ok(Arc::clone(output));
        }

        let output: SharedOutput = Arc::new(Mutex::new((self.opener)()?));
        info!("Audio output opened..!");
        self.output = Some(Arc::clone(&output));
        Ok(output)
    }

    pub fn release(&mut self) {
        let Some(output) = self.output.take() else {
            return;
        };

        let Ok(mut lock) = output.lock() else {
            warn!("Audio output lock poisoned, skipping release..!");
            return;
        };

        if let Err(why) = lock.release() {
            warn!("Failed to release audio output: {:#}", why);
        } else {
            info!("Audio output released..!");
        }
    }
}

impl Drop for AudioResource {
    fn drop(&mut self) {
        self.release();
    }
}

/// Logs the performance instead of sounding it.
#[derive(Debug, Default)]
pub struct LogOutput {
    held: BTreeSet<u8>,
}

impl AudioOutput for LogOutput {
    fn note_on(&mut self, midi: u8, velocity: u8) -> anyhow::Result<()> {
        debug!("note on  {:>3} vel {:>3}", midi, velocity);
        self.held.insert(midi);
        Ok(())
    }

    fn note_off(&mut self, midi: u8) -> anyhow::Result<()> {
        if self.held.remove(&midi) {
            debug!("note off {:>3}", midi);
        }
        Ok(())
    }

    fn all_notes_off(&mut self) -> anyhow::Result<()> {
        for midi in std::mem::take(&mut self.held) {
            debug!("note off {:>3}", midi);
        }
        Ok(())
    }
}

/// Records every note it is sent and writes a single-track MIDI file on release.
#[derive(Debug)]
pub struct MidiRecorder {
    path: PathBuf,
    started: Option<Instant>,
    last_tick: u64,
    held: BTreeSet<u8>,
    track: Vec<TrackEvent<'static>>,
}

impl MidiRecorder {
    pub fn create(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.is_dir()
        {
            bail!("Cannot record to {}: no such directory..!", path.display());
        }

        Ok(Self {
            path,
            started: None,
            last_tick: 0,
            held: BTreeSet::new(),
            track: vec![TrackEvent {
                delta: u28::new(0),
                kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::new(RECORDING_MPQN))),
            }],
        })
    }

    fn delta(&mut self) -> u28 {
        let started = *self.started.get_or_insert_with(Instant::now);
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        let us_per_tick = RECORDING_MPQN as f64 / TICKS_PER_QUARTER as f64;
        let tick = (elapsed_ms * 1000.0 / us_per_tick).round() as u64;

        let delta = tick.saturating_sub(self.last_tick).min(0x0FFF_FFFF);
        self.last_tick = self.last_tick.max(tick);
        u28::new(delta as u32)
    }

    fn push(&mut self, message: MidiMessage) {
        let delta = self.delta();
        self.track.push(TrackEvent {
            delta,
            kind: TrackEventKind::Midi {
                channel: u4::new(0),
                message,
            },
        });
    }

    pub fn note_count(&self) -> usize {
        self.track
            .iter()
            .filter(|ev| {
                matches!(
                    ev.kind,
                    TrackEventKind::Midi {
                        message: MidiMessage::NoteOn { .. },
                        ..
                    }
                )
            })
            .count()
    }
}

impl AudioOutput for MidiRecorder {
    fn note_on(&mut self, midi: u8, velocity: u8) -> anyhow::Result<()> {
        if midi > 127 {
            bail!("MIDI note {} is out of range..!", midi);
        }

        self.held.insert(midi);
        self.push(MidiMessage::NoteOn {
            key: u7::new(midi),
            vel: u7::new(velocity.min(127)),
        });
        Ok(())
    }

    fn note_off(&mut self, midi: u8) -> anyhow::Result<()> {
        if self.held.remove(&midi) {
            self.push(MidiMessage::NoteOff {
                key: u7::new(midi),
                vel: u7::new(0),
            });
        }
        Ok(())
    }

    fn all_notes_off(&mut self) -> anyhow::Result<()> {
        for midi in std::mem::take(&mut self.held) {
            self.push(MidiMessage::NoteOff {
                key: u7::new(midi),
                vel: u7::new(0),
            });
        }
        Ok(())
    }

    fn release(&mut self) -> anyhow::Result<()> {
        self.all_notes_off()?;

        let mut track = std::mem::take(&mut self.track);
        track.push(TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
        });

        let mut smf = Smf::new(Header::new(
            Format::SingleTrack,
            Timing::Metrical(u15::new(TICKS_PER_QUARTER)),
        ));
        smf.tracks.push(track);
        smf.save(&self.path)
            .with_context(|| format!("Failed to write {}", self.path.display()))?;

        info!("Recording saved to '{}'..!", self.path.display());
        Ok(())
    }
}

/// Dies on the first note it is sent, taking the playback thread with it.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct PanickingOutput {
    pub(crate) struck: Arc<std::sync::atomic::AtomicBool>,
}

#[cfg(test)]
impl AudioOutput for PanickingOutput {
    fn note_on(&mut self, midi: u8, _velocity: u8) -> anyhow::Result<()> {
        self.struck.store(true, std::sync::atomic::Ordering::SeqCst);
        panic!("output broke on note {}", midi);
    }

    fn note_off(&mut self, _midi: u8) -> anyhow::Result<()> {
        Ok(())
    }

    fn all_notes_off(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}
