use crate::engine::SessionOptions;
use crate::engine::output::AudioResource;
use crate::error::PlaybackError;
use crate::model::keys::{KeyState, key_states};
use crate::model::score::{Preset, ScoreSource};
use crate::notation::Renderer;
use crate::player::{ControllerEvent, ControllerHandle, PlayOutcome, PlaybackController, PlaybackState};
use std::time::Duration;

/// The editor, the playback controller and the keyboard view wired together.
pub struct PianoApp<R: Renderer> {
    source: ScoreSource,
    controller: PlaybackController<R>,
}

impl<R: Renderer> PianoApp<R> {
    pub fn new(renderer: R, audio: AudioResource, options: SessionOptions) -> Self {
        Self {
            source: ScoreSource::default(),
            controller: PlaybackController::new(renderer, audio, options),
        }
    }

    pub fn source(&self) -> &ScoreSource {
        &self.source
    }

    pub fn edit(&mut self, text: impl Into<String>) {
        self.source.set_text(text);
    }

    pub fn select_preset(&mut self, preset: &Preset) {
        self.source.select_preset(preset);
    }

    pub fn press_play(&mut self) -> Result<PlayOutcome, PlaybackError> {
        self.controller.play(self.source.text())
    }

    pub fn press_stop(&mut self) {
        self.controller.stop();
    }

    pub fn press_restart(&mut self) -> Result<PlayOutcome, PlaybackError> {
        self.controller.restart()
    }

    pub fn keys(&self) -> Vec<KeyState> {
        key_states(self.controller.active_pitches())
    }

    pub fn state(&self) -> PlaybackState {
        self.controller.state()
    }

    pub fn is_playing(&self) -> bool {
        self.controller.is_playing()
    }

    pub fn handle(&self) -> ControllerHandle {
        self.controller.handle()
    }

    pub fn set_observer<F>(&mut self, observer: F)
    where
        F: FnMut(&ControllerEvent) + 'static,
    {
        self.controller.set_observer(observer);
    }

    pub fn wait(&mut self, timeout: Duration) -> bool {
        self.controller.wait(timeout)
    }
}
