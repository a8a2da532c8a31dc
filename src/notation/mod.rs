use crate::error::RenderError;
use serde::{Deserialize, Serialize};

pub mod abc;

/// Turns notation text into a timed score.
pub trait Renderer {
    fn render(&self, source: &str) -> Result<VisualScore, RenderError>;
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ScoreEvent {
    pub time_ms: f64,
    pub duration_ms: f64,
    /// Empty for rests.
    pub pitches: Vec<u8>,
    pub measure: usize,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct VisualScore {
    pub title: Option<String>,
    pub meter: Option<String>,
    pub unit_length: f64,
    pub tempo_bpm: f64,
    pub key: String,
    pub events: Vec<ScoreEvent>,
    /// Start time of every measure that contains at least one event.
    pub measure_starts_ms: Vec<f64>,
    pub total_ms: f64,
}

/// A single position report from a playing session.
///
/// A measure-start sentinel has `measure_start == true` and no `position`;
/// it marks a bar line rather than a change of sounding pitches.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TimingEvent {
    pub milliseconds: f64,
    pub pitches: Vec<u8>,
    pub measure_start: bool,
    pub position: Option<usize>,
}

impl TimingEvent {
    pub fn measure_sentinel(milliseconds: f64) -> Self {
        Self {
            milliseconds,
            pitches: Vec::new(),
            measure_start: true,
            position: None,
        }
    }

    pub fn is_measure_sentinel(&self) -> bool {
        self.measure_start && self.position.is_none()
    }
}

impl VisualScore {
    /// Every timing event the score produces, in playback order.
    /// Measure sentinels sort before the notes that start at the same instant.
    pub fn timeline(&self) -> Vec<TimingEvent> {
        let mut out = Vec::with_capacity(self.events.len() + self.measure_starts_ms.len());
        let mut measures = self.measure_starts_ms.iter().peekable();

        for (i, ev) in self.events.iter().enumerate() {
            while let Some(&&start) = measures.peek() {
                if start > ev.time_ms {
                    break;
                }
                out.push(TimingEvent::measure_sentinel(start));
                measures.next();
            }

            out.push(TimingEvent {
                milliseconds: ev.time_ms,
                pitches: ev.pitches.clone(),
                measure_start: false,
                position: Some(i),
            });
        }

        out
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn event(time_ms: f64, pitches: &[u8], measure: usize) -> ScoreEvent {
        ScoreEvent {
            time_ms,
            duration_ms: 100.0,
            pitches: pitches.to_vec(),
            measure,
        }
    }

    #[test]
    fn timeline_interleaves_measure_sentinels() {
        let score = VisualScore {
            events: vec![
                event(0.0, &[60], 0),
                event(100.0, &[62], 0),
                event(200.0, &[], 1),
            ],
            measure_starts_ms: vec![0.0, 200.0],
            total_ms: 300.0,
            ..Default::default()
        };

        let timeline = score.timeline();
        assert_eq!(timeline.len(), 5);
        assert!(timeline[0].is_measure_sentinel());
        assert_eq!(timeline[1].position, Some(0));
        assert_eq!(timeline[2].pitches, vec![62]);
        assert!(timeline[3].is_measure_sentinel());
        assert_eq!(timeline[3].milliseconds, 200.0);
        assert_eq!(timeline[4].position, Some(2));
        assert!(timeline[4].pitches.is_empty());
    }
}
