use crate::engine::{AudioOutput, Message, SessionId, SessionNotice, SessionOptions, SharedOutput};
use crate::error::PlaybackError;
use crate::notation::{TimingEvent, VisualScore};
use anyhow::bail;
use log::{debug, info, warn};
use spin_sleep::{SpinSleeper, SpinStrategy};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const MAX_SLEEP_CHUNK_S: f64 = 0.050;

#[derive(Debug)]
enum ControlMsg {
    Stop,
}

#[derive(Debug, Clone)]
enum Action {
    NoteOff(u8),
    NoteOn(u8),
    Notify(TimingEvent),
}

impl Action {
    fn rank(&self) -> u8 {
        match self {
            Action::NoteOff(_) => 0,
            Action::NoteOn(_) => 1,
            Action::Notify(_) => 2,
        }
    }
}

#[derive(Debug, Clone)]
struct Cue {
    time_ms: f64,
    action: Action,
}

enum Pass {
    Finished,
    Stopped,
    Disconnected,
}

/// Lays the score out as note-on/note-off/notify cues, scaled by `warp` percent.
fn build_cues(score: &VisualScore, warp: u32) -> (Vec<Cue>, f64) {
    let scale = 100.0 / warp.max(1) as f64;
    let mut cues: Vec<Cue> = Vec::new();

    for event in score.timeline().into_iter() {
        let time_ms = event.milliseconds * scale;

        if let Some(pos) = event.position
            && let Some(note) = score.events.get(pos)
        {
            let end_ms = (note.time_ms + note.duration_ms) * scale;
            for &midi in note.pitches.iter() {
                cues.push(Cue {
                    time_ms,
                    action: Action::NoteOn(midi),
                });
                cues.push(Cue {
                    time_ms: end_ms,
                    action: Action::NoteOff(midi),
                });
            }
        }

        cues.push(Cue {
            time_ms,
            action: Action::Notify(event),
        });
    }

    // A repeated pitch has to be released before it is struck again.
    cues.sort_by(|a, b| {
        a.time_ms
            .total_cmp(&b.time_ms)
            .then_with(|| a.action.rank().cmp(&b.action.rank()))
    });

    (cues, score.total_ms * scale)
}

/// One playback of one rendered score on a worker thread.
///
/// The worker reports to the controller's inbox; every message carries the session's id
/// so the controller can tell current reports from stale ones.
#[derive(Debug)]
pub struct PlaybackSession {
    id: SessionId,
    control_tx: Option<Sender<ControlMsg>>,
    worker_handle: Option<JoinHandle<()>>,
}

impl PlaybackSession {
    pub fn start(
        id: SessionId,
        score: Arc<VisualScore>,
        output: SharedOutput,
        inbox: Sender<Message>,
        options: SessionOptions,
    ) -> anyhow::Result<Self> {
        if options.warp == 0 {
            bail!("Warp must be greater than 0..!");
        }

        let title = score
            .title
            .clone()
            .unwrap_or_else(|| String::from("No Title"));

        let (tx, rx) = mpsc::channel::<ControlMsg>();
        let handle = thread::Builder::new()
            .name(format!("playback-{}", id.0))
            .spawn(move || run(id, &score, &output, &inbox, &rx, options))?;

        info!("Started session {} for '{}'..!", id.0, title);

        Ok(Self {
            id,
            control_tx: Some(tx),
            worker_handle: Some(handle),
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Asks the worker to stop and waits for it. Stopping twice is a no-op.
    pub fn stop(&mut self) -> Result<(), PlaybackError> {
        if let Some(tx) = self.control_tx.take() {
            // the worker is already gone after a natural end
            let _ = tx.send(ControlMsg::Stop);
        }

        let Some(handle) = self.worker_handle.take() else {
            return Ok(());
        };

        if handle.join().is_err() {
            return Err(PlaybackError::SessionShutdown {
                session: self.id.0,
                reason: String::from("playback thread panicked"),
            });
        }

        debug!("Session {} thread joined..!", self.id.0);
        Ok(())
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        if let Err(why) = self.stop() {
            warn!("{}", why);
        }
    }
}

fn run(
    id: SessionId,
    score: &VisualScore,
    output: &SharedOutput,
    inbox: &Sender<Message>,
    ctrl_rx: &Receiver<ControlMsg>,
    options: SessionOptions,
) {
    let (cues, total_ms) = build_cues(score, options.warp);
    debug!("Session {} built {} cues over {:.3}ms", id.0, cues.len(), total_ms);

    if inbox.send(Message::Session(id, SessionNotice::Ready)).is_err() {
        return;
    }

    let sleeper = SpinSleeper::new(100_000).with_spin_strategy(SpinStrategy::YieldThread);
    let mut passes = 0u32;

    loop {
        let pass = play_pass(id, &cues, total_ms, output, inbox, ctrl_rx, &sleeper, options.velocity);
        with_output(output, |out| out.all_notes_off());
        passes += 1;

        let notice = match pass {
            Pass::Finished if options.looping => {
                debug!("Session {} looping (pass {})..!", id.0, passes);
                continue;
            }
            Pass::Finished => SessionNotice::Ended,
            Pass::Stopped => SessionNotice::Stopped,
            Pass::Disconnected => {
                warn!("Session {} lost its controller, exiting..!", id.0);
                return;
            }
        };

        info!("Session {} finished: {:?}..!", id.0, notice);
        let _ = inbox.send(Message::Session(id, notice));
        return;
    }
}

#[allow(clippy::too_many_arguments)]
fn play_pass(
    id: SessionId,
    cues: &[Cue],
    total_ms: f64,
    output: &SharedOutput,
    inbox: &Sender<Message>,
    ctrl_rx: &Receiver<ControlMsg>,
    sleeper: &SpinSleeper,
    velocity: u8,
) -> Pass {
    let start = Instant::now();

    for cue in cues.iter() {
        let Some(target) = deadline(start, cue.time_ms) else {
            warn!("Session {} cannot schedule a cue at {}ms, stopping..!", id.0, cue.time_ms);
            return Pass::Stopped;
        };
        if !wait_until(target, ctrl_rx, sleeper) {
            return Pass::Stopped;
        }

        match &cue.action {
            Action::NoteOn(midi) => with_output(output, |out| out.note_on(*midi, velocity)),
            Action::NoteOff(midi) => with_output(output, |out| out.note_off(*midi)),
            Action::Notify(event) => {
                let notice = SessionNotice::Timing(event.clone());
                if inbox.send(Message::Session(id, notice)).is_err() {
                    return Pass::Disconnected;
                }
            }
        }
    }

    let Some(target) = deadline(start, total_ms) else {
        warn!("Session {} cannot schedule the end at {}ms, stopping..!", id.0, total_ms);
        return Pass::Stopped;
    };
    if !wait_until(target, ctrl_rx, sleeper) {
        return Pass::Stopped;
    }

    Pass::Finished
}

/// `None` when `at_ms` is not a time an `Instant` can represent.
fn deadline(start: Instant, at_ms: f64) -> Option<Instant> {
    let offset = Duration::try_from_secs_f64(at_ms.max(0.0) / 1000.0).ok()?;
    start.checked_add(offset)
}

/// Sleeps until `target` in short chunks, returning false as soon as a stop arrives.
fn wait_until(target: Instant, ctrl_rx: &Receiver<ControlMsg>, sleeper: &SpinSleeper) -> bool {
    loop {
        match ctrl_rx.try_recv() {
            Ok(ControlMsg::Stop) | Err(TryRecvError::Disconnected) => return false,
            Err(TryRecvError::Empty) => {}
        }

        let now = Instant::now();
        if now >= target {
            return true;
        }

        let remaining = (target - now).as_secs_f64();
        sleeper.sleep(Duration::from_secs_f64(remaining.min(MAX_SLEEP_CHUNK_S)));
    }
}

fn with_output<F>(output: &SharedOutput, f: F)
where
    F: FnOnce(&mut dyn AudioOutput) -> anyhow::Result<()>,
{
    let Ok(mut lock) = output.lock() else {
        warn!("Audio output lock poisoned..!");
        return;
    };

    if let Err(why) = f(&mut **lock) {
        warn!("Audio output error: {:#}", why);
    }
}
