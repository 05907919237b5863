//! Decoding of inbound key state reports into press/release transitions.

use tracing::{debug, trace};

use crate::buttons::{check_button, raw_to_button};
use crate::cursor::ByteReader;
use crate::protocol::BUTTON_STATE_REPORT_ID;
use crate::{Error, Result, BUTTON_COUNT};

/// Pressed/released state of every key, indexed by logical button.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ButtonStates([bool; BUTTON_COUNT]);

impl ButtonStates {
    /// Returns true if the logical button is held down.
    pub fn is_pressed(&self, button: u8) -> Result<bool> {
        check_button(button)?;
        Ok(self.0[button as usize - 1])
    }

    /// Iterates `(button, pressed)` pairs in logical order.
    pub fn iter(&self) -> impl Iterator<Item = (u8, bool)> + '_ {
        self.0
            .iter()
            .enumerate()
            .map(|(i, &pressed)| (i as u8 + 1, pressed))
    }

    /// Iterates the logical buttons currently held down.
    pub fn pressed(&self) -> impl Iterator<Item = u8> + '_ {
        self.iter()
            .filter_map(|(button, pressed)| pressed.then_some(button))
    }

    /// State as 0/1 values, index 0 is button 1.
    pub fn to_bits(&self) -> [u8; BUTTON_COUNT] {
        self.0.map(u8::from)
    }
}

impl std::fmt::Display for ButtonStates {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{")?;
        for (button, pressed) in self.iter() {
            if button > 1 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", button, u8::from(pressed))?;
        }
        write!(f, "}}")
    }
}

/// A single key transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonEvent {
    /// Logical button went down.
    Pressed(u8),
    /// Logical button came up.
    Released(u8),
}

impl ButtonEvent {
    /// The logical button this event refers to.
    pub fn button(&self) -> u8 {
        match self {
            ButtonEvent::Pressed(button) | ButtonEvent::Released(button) => *button,
        }
    }
}

/// Outcome of decoding one key state report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ButtonReport {
    /// Transitions in raw key order.
    pub transitions: Vec<ButtonEvent>,
    /// Complete state after the report.
    pub state: ButtonStates,
}

/// Tracks key state across reports and reports edges.
#[derive(Debug, Default)]
pub struct ButtonTracker {
    /// Previous state per raw key (index 0 is raw key 1).
    previous: [bool; BUTTON_COUNT],
    state: ButtonStates,
}

impl ButtonTracker {
    /// Creates a tracker with every key released.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes one inbound report.
    ///
    /// Returns `Ok(None)` for reports that are not key state reports. Any
    /// non-zero key byte counts as pressed.
    pub fn process(&mut self, report: &[u8]) -> Result<Option<ButtonReport>> {
        if report.first() != Some(&BUTTON_STATE_REPORT_ID) {
            trace!("Ignoring report {:02X?}", report.first());
            return Ok(None);
        }
        if report.len() < BUTTON_COUNT + 1 {
            return Err(Error::ReportTooShort {
                expected: BUTTON_COUNT + 1,
                actual: report.len(),
            });
        }

        let mut reader = ByteReader::new(report);
        reader.skip(1)?;

        let mut transitions = Vec::new();
        for raw in 1..=BUTTON_COUNT as u8 {
            let pressed = reader.read_byte()? != 0;
            let button = raw_to_button(raw)?;
            let slot = raw as usize - 1;

            self.state.0[button as usize - 1] = pressed;
            if pressed != self.previous[slot] {
                self.previous[slot] = pressed;
                let event = if pressed {
                    ButtonEvent::Pressed(button)
                } else {
                    ButtonEvent::Released(button)
                };
                debug!("Button event: {:?}", event);
                transitions.push(event);
            }
        }

        Ok(Some(ButtonReport {
            transitions,
            state: self.state,
        }))
    }

    /// Current state of every key.
    pub fn state(&self) -> ButtonStates {
        self.state
    }

    /// Forgets all state; every key is considered released.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buttons::button_to_raw;

    fn report_with(raw_pressed: &[u8]) -> Vec<u8> {
        let mut report = vec![0u8; 17];
        report[0] = BUTTON_STATE_REPORT_ID;
        for &raw in raw_pressed {
            report[raw as usize] = 1;
        }
        report
    }

    #[test]
    fn test_press_and_release_button_7() {
        let mut tracker = ButtonTracker::new();
        let raw = button_to_raw(7).unwrap();

        let idle = tracker.process(&report_with(&[])).unwrap().unwrap();
        assert!(idle.transitions.is_empty());
        assert_eq!(idle.state, ButtonStates::default());

        let down = tracker.process(&report_with(&[raw])).unwrap().unwrap();
        assert_eq!(down.transitions, vec![ButtonEvent::Pressed(7)]);
        assert!(down.state.is_pressed(7).unwrap());
        assert_eq!(down.state.pressed().collect::<Vec<_>>(), vec![7]);

        let up = tracker.process(&report_with(&[])).unwrap().unwrap();
        assert_eq!(up.transitions, vec![ButtonEvent::Released(7)]);
        assert!(!up.state.is_pressed(7).unwrap());
    }

    #[test]
    fn test_held_button_does_not_repeat() {
        let mut tracker = ButtonTracker::new();
        let report = report_with(&[1]);
        assert_eq!(tracker.process(&report).unwrap().unwrap().transitions.len(), 1);
        let again = tracker.process(&report).unwrap().unwrap();
        assert!(again.transitions.is_empty());
        assert!(again.state.is_pressed(5).unwrap());
    }

    #[test]
    fn test_multiple_transitions_in_raw_order() {
        let mut tracker = ButtonTracker::new();
        let report = tracker.process(&report_with(&[1, 6])).unwrap().unwrap();
        assert_eq!(
            report.transitions,
            vec![ButtonEvent::Pressed(5), ButtonEvent::Pressed(10)]
        );
    }

    #[test]
    fn test_nonzero_values_are_pressed() {
        let mut tracker = ButtonTracker::new();
        let mut report = report_with(&[]);
        report[1] = 2;
        let first = tracker.process(&report).unwrap().unwrap();
        assert_eq!(first.transitions, vec![ButtonEvent::Pressed(5)]);

        report[1] = 1;
        let second = tracker.process(&report).unwrap().unwrap();
        assert!(second.transitions.is_empty());
    }

    #[test]
    fn test_other_reports_are_ignored() {
        let mut tracker = ButtonTracker::new();
        let mut report = report_with(&[1, 2, 3]);
        report[0] = 0x02;
        assert!(tracker.process(&report).unwrap().is_none());
        assert!(tracker.process(&[]).unwrap().is_none());
        assert_eq!(tracker.state(), ButtonStates::default());
    }

    #[test]
    fn test_short_report_is_error() {
        let mut tracker = ButtonTracker::new();
        assert!(matches!(
            tracker.process(&[BUTTON_STATE_REPORT_ID, 0, 0]),
            Err(Error::ReportTooShort {
                expected: 16,
                actual: 3
            })
        ));
    }

    #[test]
    fn test_state_display() {
        let mut tracker = ButtonTracker::new();
        tracker.process(&report_with(&[5])).unwrap();
        let text = tracker.state().to_string();
        assert!(text.starts_with("{1: 1, 2: 0"));
        assert!(text.ends_with("15: 0}"));
        assert_eq!(tracker.state().to_bits()[0], 1);

        tracker.reset();
        assert_eq!(tracker.state(), ButtonStates::default());
    }
}
