use crate::engine::output::AudioResource;
use crate::engine::session::PlaybackSession;
use crate::engine::{Message, SessionId, SessionNotice, SessionOptions};
use crate::error::PlaybackError;
use crate::notation::{Renderer, VisualScore};
use crate::tracker::{ActivePitchSet, NoteHighlightTracker};
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    /// `play` was accepted but the session has not reported `Ready` yet.
    Starting,
    Playing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayOutcome {
    /// The score was blank, nothing happened.
    Ignored,
    Started(SessionId),
}

/// Reported to the observer whenever something a view would redraw changes.
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEvent {
    StateChanged(PlaybackState),
    HighlightsChanged(Vec<u8>),
    /// Score time of the latest timing event, sent just before any highlight change it causes.
    Progress { elapsed_ms: f64, total_ms: f64 },
}

type Observer = Box<dyn FnMut(&ControllerEvent)>;

/// Posts requests into a controller's inbox from any thread.
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    inbox: Sender<Message>,
}

impl ControllerHandle {
    pub fn request_stop(&self) {
        if self.inbox.send(Message::StopRequested).is_err() {
            debug!("Controller is gone, dropping stop request..!");
        }
    }

    pub fn request_restart(&self) {
        if self.inbox.send(Message::RestartRequested).is_err() {
            debug!("Controller is gone, dropping restart request..!");
        }
    }
}

/// Renders scores, owns the one active playback session and keeps the
/// highlight state in step with it.
///
/// All state lives on the thread that owns the controller. Sessions report
/// through the inbox and are only listened to while they are current.
pub struct PlaybackController<R: Renderer> {
    renderer: R,
    options: SessionOptions,
    state: PlaybackState,
    tracker: NoteHighlightTracker,
    session: Option<PlaybackSession>,
    rendered: Option<Arc<VisualScore>>,
    elapsed_ms: f64,
    next_id: u64,
    inbox_tx: Sender<Message>,
    inbox_rx: Receiver<Message>,
    observer: Option<Observer>,
    audio: AudioResource,
}

impl<R: Renderer> PlaybackController<R> {
    pub fn new(renderer: R, audio: AudioResource, options: SessionOptions) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::channel::<Message>();
        Self {
            renderer,
            options,
            state: PlaybackState::Idle,
            tracker: NoteHighlightTracker::new(),
            session: None,
            rendered: None,
            elapsed_ms: 0.0,
            next_id: 1,
            inbox_tx,
            inbox_rx,
            observer: None,
            audio,
        }
    }

    pub fn set_observer<F>(&mut self, observer: F)
    where
        F: FnMut(&ControllerEvent) + 'static,
    {
        self.observer = Some(Box::new(observer));
    }

    pub fn handle(&self) -> ControllerHandle {
        ControllerHandle {
            inbox: self.inbox_tx.clone(),
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state != PlaybackState::Idle
    }

    pub fn active_pitches(&self) -> &ActivePitchSet {
        self.tracker.active()
    }

    pub fn active_session(&self) -> Option<SessionId> {
        self.session.as_ref().map(|s| s.id())
    }

    pub fn rendered(&self) -> Option<&VisualScore> {
        self.rendered.as_deref()
    }

    /// How far the current (or last) session got through its score, from 0 to 1.
    pub fn progress(&self) -> Option<f64> {
        let total_ms = self.rendered.as_ref()?.total_ms;
        (total_ms > 0.0).then(|| (self.elapsed_ms / total_ms).clamp(0.0, 1.0))
    }

    pub fn audio_acquired(&self) -> bool {
        self.audio.is_acquired()
    }

    pub fn play(&mut self, source: &str) -> Result<PlayOutcome, PlaybackError> {
        if source.trim().is_empty() {
            debug!("Ignoring play request for a blank score..!");
            return Ok(PlayOutcome::Ignored);
        }

        self.begin();
        self.rendered = None;

        let score = match self.renderer.render(source) {
            Ok(score) => Arc::new(score),
            Err(why) => {
                error!("Failed to render score: {}", why);
                self.reset();
                return Err(why.into());
            }
        };

        self.launch(score)
    }

    /// Plays the last rendered score again from the top without rendering it anew.
    pub fn restart(&mut self) -> Result<PlayOutcome, PlaybackError> {
        let Some(score) = self.rendered.clone() else {
            debug!("Nothing rendered yet, ignoring restart..!");
            return Ok(PlayOutcome::Ignored);
        };

        self.begin();
        self.launch(score)
    }

    /// Always leaves the controller idle with nothing highlighted.
    pub fn stop(&mut self) {
        self.end_session();
        self.reset();
    }

    /// Shows the start optimistically and shuts down whatever was playing.
    fn begin(&mut self) {
        self.set_state(PlaybackState::Starting);
        self.clear_highlights();
        self.end_session();
        self.elapsed_ms = 0.0;
    }

    fn launch(&mut self, score: Arc<VisualScore>) -> Result<PlayOutcome, PlaybackError> {
        let output = match self.audio.acquire() {
            Ok(output) => output,
            Err(why) => {
                error!("Failed to open audio output: {:#}", why);
                self.reset();
                return Err(PlaybackError::Output(format!("{:#}", why)));
            }
        };

        let id = SessionId(self.next_id);
        self.next_id += 1;
        self.rendered = Some(Arc::clone(&score));

        match PlaybackSession::start(id, score, output, self.inbox_tx.clone(), self.options) {
            Ok(session) => {
                self.session = Some(session);
                Ok(PlayOutcome::Started(id))
            }
            Err(why) => {
                error!("Failed to start session {}: {:#}", id.0, why);
                self.reset();
                Err(PlaybackError::SessionStart(format!("{:#}", why)))
            }
        }
    }

    /// Applies every message already waiting in the inbox. Returns how many were applied.
    pub fn pump(&mut self) -> usize {
        let mut n = 0;
        while let Ok(msg) = self.inbox_rx.try_recv() {
            self.dispatch(msg);
            n += 1;
        }
        n
    }

    /// Blocks for at most `timeout` waiting for one message, then applies it.
    pub fn wait(&mut self, timeout: Duration) -> bool {
        match self.inbox_rx.recv_timeout(timeout) {
            Ok(msg) => {
                self.dispatch(msg);
                true
            }
            Err(RecvTimeoutError::Timeout) => false,
            // we hold a sender ourselves
            Err(RecvTimeoutError::Disconnected) => false,
        }
    }

    /// Processes messages until the controller is idle or `timeout` passes.
    pub fn run_until_idle(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.is_playing() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            self.wait(deadline - now);
        }
        self.pump();
        true
    }

    fn dispatch(&mut self, msg: Message) {
        match msg {
            Message::StopRequested => {
                info!("Stop requested..!");
                self.stop();
            }
            Message::RestartRequested => {
                info!("Restart requested..!");
                if let Err(why) = self.restart() {
                    warn!("Restart failed: {}", why);
                }
            }
            Message::Session(id, notice) => {
                if self.active_session() != Some(id) {
                    debug!("Discarding stale {:?} from session {}", notice, id.0);
                    return;
                }
                self.apply(notice);
            }
        }
    }

    fn apply(&mut self, notice: SessionNotice) {
        match notice {
            SessionNotice::Ready => self.set_state(PlaybackState::Playing),
            SessionNotice::Timing(event) => {
                self.advance(event.milliseconds);
                if self.tracker.on_event(&event) {
                    self.notify(ControllerEvent::HighlightsChanged(self.tracker.active().to_vec()));
                }
            }
            SessionNotice::Ended => {
                let total_ms = self.rendered.as_ref().map_or(self.elapsed_ms, |s| s.total_ms);
                self.advance(total_ms);
                self.end_session();
                self.reset();
            }
            SessionNotice::Stopped => {
                self.end_session();
                self.reset();
            }
        }
    }

    /// The one path every session shutdown goes through. Failures are logged, never raised.
    fn end_session(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };

        match session.stop() {
            Ok(()) => debug!("Session {} shut down..!", session.id().0),
            Err(why) => warn!("{}", why),
        }
    }

    fn advance(&mut self, elapsed_ms: f64) {
        self.elapsed_ms = elapsed_ms;
        let total_ms = self.rendered.as_ref().map_or(0.0, |s| s.total_ms);
        self.notify(ControllerEvent::Progress { elapsed_ms, total_ms });
    }

    fn reset(&mut self) {
        self.set_state(PlaybackState::Idle);
        self.clear_highlights();
    }

    fn clear_highlights(&mut self) {
        if !self.tracker.active().is_empty() {
            self.tracker.clear();
            self.notify(ControllerEvent::HighlightsChanged(Vec::new()));
        }
    }

    fn set_state(&mut self, state: PlaybackState) {
        if self.state != state {
            debug!("Playback state {:?} -> {:?}", self.state, state);
            self.state = state;
            self.notify(ControllerEvent::StateChanged(state));
        }
    }

    fn notify(&mut self, event: ControllerEvent) {
        if let Some(observer) = self.observer.as_mut() {
            observer(&event);
        }
    }
}

impl<R: Renderer> Drop for PlaybackController<R> {
    fn drop(&mut self) {
        self.end_session();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::output::PanickingOutput;
    use crate::error::RenderError;
    use crate::notation::TimingEvent;
    use crate::notation::abc::AbcRenderer;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;
    use std::sync::atomic::{AtomicBool, Ordering};

    const SHORT: &str = "X:1\nL:1/4\nQ:1/4=3000\nK:C\nC E G2 |";
    const LONG_C: &str = "X:1\nL:1/4\nQ:1/4=30\nK:C\nC C C C | C C C C |";
    const SHORT_G: &str = "X:1\nL:1/4\nQ:1/4=3000\nK:C\nG G G G |";

    /// Counts render calls and fails on request.
    struct ScriptedRenderer {
        calls: Rc<Cell<usize>>,
    }

    impl Renderer for ScriptedRenderer {
        fn render(&self, source: &str) -> Result<VisualScore, RenderError> {
            self.calls.set(self.calls.get() + 1);
            if source.contains("broken") {
                return Err(RenderError::parse(1, 1, "broken on purpose"));
            }
            AbcRenderer.render(source)
        }
    }

    fn controller() -> (PlaybackController<ScriptedRenderer>, Rc<Cell<usize>>, Rc<RefCell<Vec<ControllerEvent>>>) {
        env_logger::try_init().unwrap_or(());

        let calls = Rc::new(Cell::new(0));
        let events = Rc::new(RefCell::new(Vec::new()));

        let mut controller = PlaybackController::new(
            ScriptedRenderer {
                calls: Rc::clone(&calls),
            },
            AudioResource::logging(),
            SessionOptions::default(),
        );

        let sink = Rc::clone(&events);
        controller.set_observer(move |ev| sink.borrow_mut().push(ev.clone()));

        (controller, calls, events)
    }

    #[test]
    fn blank_scores_are_ignored() {
        let (mut controller, calls, events) = controller();

        assert_eq!(controller.play("").unwrap(), PlayOutcome::Ignored);
        assert_eq!(controller.play("   \n\t").unwrap(), PlayOutcome::Ignored);

        assert_eq!(calls.get(), 0);
        assert_eq!(controller.state(), PlaybackState::Idle);
        assert!(events.borrow().is_empty());
        assert!(!controller.audio_acquired());
    }

    #[test]
    fn state_is_optimistic_then_reconciled_on_render_failure() {
        let (mut controller, calls, events) = controller();

        let result = controller.play("broken");
        assert!(matches!(result, Err(PlaybackError::Render(_))));
        assert_eq!(calls.get(), 1);

        assert_eq!(
            *events.borrow(),
            vec![
                ControllerEvent::StateChanged(PlaybackState::Starting),
                ControllerEvent::StateChanged(PlaybackState::Idle),
            ]
        );
        assert_eq!(controller.state(), PlaybackState::Idle);
        assert!(controller.active_session().is_none());
        assert!(controller.rendered().is_none());
    }

    #[test]
    fn render_failure_while_playing_ends_idle_and_dark() {
        let (mut controller, _, _) = controller();

        controller.play(LONG_C).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while controller.active_pitches().is_empty() && Instant::now() < deadline {
            controller.wait(Duration::from_millis(50));
        }
        assert!(controller.active_pitches().contains(60));
        assert_eq!(controller.state(), PlaybackState::Playing);

        assert!(controller.play("broken").is_err());
        assert_eq!(controller.state(), PlaybackState::Idle);
        assert!(controller.active_pitches().is_empty());
        assert!(controller.active_session().is_none());

        // whatever the old session sent is discarded
        controller.pump();
        assert!(controller.active_pitches().is_empty());
        assert_eq!(controller.state(), PlaybackState::Idle);
    }

    #[test]
    fn stop_is_idempotent() {
        let (mut controller, _, events) = controller();

        controller.stop();
        controller.stop();
        assert_eq!(controller.state(), PlaybackState::Idle);
        assert!(controller.active_pitches().is_empty());
        assert!(events.borrow().is_empty());

        controller.play(LONG_C).unwrap();
        controller.stop();
        let once = (controller.state(), controller.active_pitches().clone());
        controller.stop();
        assert_eq!((controller.state(), controller.active_pitches().clone()), once);
        assert_eq!(once.0, PlaybackState::Idle);
        assert!(once.1.is_empty());
    }

    #[test]
    fn late_reports_after_stop_are_discarded() {
        let (mut controller, _, _) = controller();

        let PlayOutcome::Started(id) = controller.play(SHORT).unwrap() else {
            panic!("session should start");
        };
        assert_eq!(controller.state(), PlaybackState::Starting);

        controller.stop();
        assert_eq!(controller.state(), PlaybackState::Idle);

        // forge the reports a slow session would deliver after being cancelled
        let inbox = controller.inbox_tx.clone();
        inbox.send(Message::Session(id, SessionNotice::Ready)).unwrap();
        inbox
            .send(Message::Session(
                id,
                SessionNotice::Timing(TimingEvent {
                    milliseconds: 0.0,
                    pitches: vec![64],
                    measure_start: false,
                    position: Some(0),
                }),
            ))
            .unwrap();

        controller.pump();
        assert_eq!(controller.state(), PlaybackState::Idle);
        assert!(controller.active_pitches().is_empty());
    }

    #[test]
    fn replaying_keeps_a_single_session() {
        let (mut controller, _, events) = controller();

        let PlayOutcome::Started(first) = controller.play(LONG_C).unwrap() else {
            panic!("first session should start");
        };
        // let the first session report a few times without applying anything
        std::thread::sleep(Duration::from_millis(50));

        let PlayOutcome::Started(second) = controller.play(SHORT_G).unwrap() else {
            panic!("second session should start");
        };
        assert_ne!(first, second);
        assert_eq!(controller.active_session(), Some(second));

        assert!(controller.run_until_idle(Duration::from_secs(5)));

        let highlights: Vec<Vec<u8>> = events
            .borrow()
            .iter()
            .filter_map(|ev| match ev {
                ControllerEvent::HighlightsChanged(p) => Some(p.clone()),
                _ => None,
            })
            .collect();

        assert!(highlights.iter().all(|p| !p.contains(&60)));
        assert!(highlights.iter().any(|p| p == &vec![67]));
        assert_eq!(controller.state(), PlaybackState::Idle);
        assert!(controller.active_pitches().is_empty());
    }

    #[test]
    fn natural_end_returns_to_idle() {
        let (mut controller, _, events) = controller();

        controller.play(SHORT).unwrap();
        assert!(controller.run_until_idle(Duration::from_secs(5)));

        assert_eq!(controller.state(), PlaybackState::Idle);
        assert!(controller.active_session().is_none());
        assert!(controller.active_pitches().is_empty());
        assert!(controller.rendered().is_some());
        assert!(controller.audio_acquired());

        let states: Vec<PlaybackState> = events
            .borrow()
            .iter()
            .filter_map(|ev| match ev {
                ControllerEvent::StateChanged(s) => Some(*s),
                _ => None,
            })
            .collect();
        assert_eq!(
            states,
            vec![PlaybackState::Starting, PlaybackState::Playing, PlaybackState::Idle]
        );
    }

    #[test]
    fn handle_requests_stop_from_another_thread() {
        let (mut controller, _, _) = controller();

        controller.play(LONG_C).unwrap();
        let handle = controller.handle();
        std::thread::spawn(move || handle.request_stop()).join().unwrap();

        assert!(controller.run_until_idle(Duration::from_secs(5)));
        assert!(controller.active_session().is_none());
    }

    #[test]
    fn unplayably_slow_tempo_is_a_render_error() {
        let (mut controller, _, _) = controller();

        let result = controller.play("X:1\nL:1/4\nQ:1/4=1e-300\nK:C\nC |");
        assert!(matches!(result, Err(PlaybackError::Render(RenderError::Parse { .. }))));
        assert_eq!(controller.state(), PlaybackState::Idle);
        assert!(controller.active_session().is_none());
    }

    #[test]
    fn failed_shutdown_still_resets_the_controller() {
        env_logger::try_init().unwrap_or(());

        let struck = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&struck);
        let mut controller = PlaybackController::new(
            AbcRenderer,
            AudioResource::new(move || {
                Ok(Box::new(PanickingOutput {
                    struck: Arc::clone(&flag),
                }))
            }),
            SessionOptions::default(),
        );

        let PlayOutcome::Started(first) = controller.play(SHORT).unwrap() else {
            panic!("first session should start");
        };
        let deadline = Instant::now() + Duration::from_secs(5);
        while !struck.load(Ordering::SeqCst) && Instant::now() < deadline {
            controller.wait(Duration::from_millis(10));
        }
        assert!(struck.load(Ordering::SeqCst));

        // Ready arrived, then the worker died without another word
        controller.pump();
        assert_eq!(controller.state(), PlaybackState::Playing);

        controller.stop();
        assert_eq!(controller.state(), PlaybackState::Idle);
        assert!(controller.active_pitches().is_empty());
        assert!(controller.active_session().is_none());

        let PlayOutcome::Started(second) = controller.play(SHORT).unwrap() else {
            panic!("second session should start");
        };
        assert_ne!(first, second);
        assert_eq!(controller.active_session(), Some(second));
        assert!(controller.run_until_idle(Duration::from_secs(5)));
        assert_eq!(controller.state(), PlaybackState::Idle);
    }

    #[test]
    fn progress_runs_up_to_the_total() {
        let (mut controller, _, events) = controller();
        assert!(controller.progress().is_none());

        controller.play(SHORT).unwrap();
        assert!(controller.run_until_idle(Duration::from_secs(5)));

        let progress: Vec<(f64, f64)> = events
            .borrow()
            .iter()
            .filter_map(|ev| match ev {
                ControllerEvent::Progress { elapsed_ms, total_ms } => Some((*elapsed_ms, *total_ms)),
                _ => None,
            })
            .collect();

        assert!(!progress.is_empty());
        assert!(progress.iter().all(|&(_, total)| total == 80.0));
        assert!(progress.windows(2).all(|w| w[0].0 <= w[1].0));
        assert_eq!(progress.last(), Some(&(80.0, 80.0)));
        assert_eq!(controller.progress(), Some(1.0));
    }

    #[test]
    fn restart_replays_the_rendered_score() {
        let (mut controller, calls, _) = controller();

        assert_eq!(controller.restart().unwrap(), PlayOutcome::Ignored);
        assert_eq!(controller.state(), PlaybackState::Idle);

        let PlayOutcome::Started(first) = controller.play(SHORT).unwrap() else {
            panic!("session should start");
        };
        assert!(controller.run_until_idle(Duration::from_secs(5)));

        let PlayOutcome::Started(second) = controller.restart().unwrap() else {
            panic!("restart should start a new session");
        };
        assert_ne!(first, second);
        assert_eq!(controller.state(), PlaybackState::Starting);
        assert_eq!(controller.progress(), Some(0.0));
        assert!(controller.run_until_idle(Duration::from_secs(5)));
        assert_eq!(calls.get(), 1);

        // nothing is left to restart once a render fails
        assert!(controller.play("broken").is_err());
        assert_eq!(controller.restart().unwrap(), PlayOutcome::Ignored);
    }

    #[test]
    fn restart_request_replaces_the_running_session() {
        let (mut controller, calls, _) = controller();

        let PlayOutcome::Started(first) = controller.play(LONG_C).unwrap() else {
            panic!("session should start");
        };
        controller.handle().request_restart();

        let deadline = Instant::now() + Duration::from_secs(5);
        while controller.active_session() == Some(first) && Instant::now() < deadline {
            controller.wait(Duration::from_millis(50));
        }

        let current = controller.active_session();
        assert!(current.is_some_and(|id| id != first));
        assert!(controller.is_playing());
        assert_eq!(calls.get(), 1);

        controller.stop();
        assert!(controller.active_session().is_none());
    }
}
