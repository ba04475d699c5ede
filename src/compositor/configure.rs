//! Configure/ack bookkeeping for shell roles
//!
//! The server proposes state in serial-numbered configures; the client
//! acknowledges one of them and the acknowledged state takes effect on the
//! client's next commit. Only the newest sent configure can become current:
//! acking an older one is accepted but changes nothing.

use std::collections::VecDeque;

use log::{debug, trace};

/// Result of acknowledging a serial
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// The newest configure was acked; it applies on the next commit
    Applied,
    /// A newer configure is outstanding; geometry is left alone
    Superseded,
    /// The serial is older than one already acked and is ignored
    Stale,
}

/// Configure tracking errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ConfigureError {
    #[error("serial {0} was never sent")]
    UnknownSerial(u32),
}

/// Per-role configure state machine
#[derive(Debug, Clone)]
pub struct ConfigureTracker<S> {
    /// Sent and not yet acked, oldest first
    in_flight: VecDeque<(u32, S)>,
    /// Highest serial acked so far
    last_acked: Option<u32>,
    /// Acked state waiting for a commit
    acked: Option<S>,
    /// State in effect since the last applying commit
    current: Option<S>,
}

impl<S: Clone + PartialEq + std::fmt::Debug> ConfigureTracker<S> {
    pub fn new() -> Self {
        Self {
            in_flight: VecDeque::new(),
            last_acked: None,
            acked: None,
            current: None,
        }
    }

    /// Record a configure that is being sent with `serial`
    pub fn send(&mut self, serial: u32, state: S) {
        debug_assert!(
            self.in_flight.back().map_or(true, |(last, _)| *last < serial),
            "configure serials must increase"
        );
        trace!("Configure {} sent: {:?}", serial, state);
        self.in_flight.push_back((serial, state));
    }

    /// Handle a client ack
    pub fn ack(&mut self, serial: u32) -> Result<AckOutcome, ConfigureError> {
        if let Some(last) = self.last_acked {
            if serial <= last {
                debug!("Ignoring stale ack {} (last acked {})", serial, last);
                return Ok(AckOutcome::Stale);
            }
        }

        let Some(index) = self.in_flight.iter().position(|(s, _)| *s == serial) else {
            return Err(ConfigureError::UnknownSerial(serial));
        };

        let newest = index + 1 == self.in_flight.len();
        let (_, state) = self
            .in_flight
            .drain(..=index)
            .last()
            .ok_or(ConfigureError::UnknownSerial(serial))?;
        self.last_acked = Some(serial);

        if newest {
            self.acked = Some(state);
            Ok(AckOutcome::Applied)
        } else {
            debug!("Ack {} superseded by a newer configure", serial);
            Ok(AckOutcome::Superseded)
        }
    }

    /// Promote the acked state on commit; returns it if something changed
    pub fn commit(&mut self) -> Option<&S> {
        let acked = self.acked.take()?;
        self.current = Some(acked);
        self.current.as_ref()
    }

    /// State in effect
    pub fn current(&self) -> Option<&S> {
        self.current.as_ref()
    }

    /// Newest state sent to the client, acked or not
    pub fn latest_sent(&self) -> Option<&S> {
        self.in_flight
            .back()
            .map(|(_, s)| s)
            .or(self.acked.as_ref())
            .or(self.current.as_ref())
    }

    /// Whether any configure was ever acked
    pub fn is_configured(&self) -> bool {
        self.last_acked.is_some()
    }

    /// Whether configures are waiting for an ack
    pub fn has_pending(&self) -> bool {
        !self.in_flight.is_empty()
    }

    /// No configure waits for an ack and no acked state for a commit
    pub fn is_idle(&self) -> bool {
        self.in_flight.is_empty() && self.acked.is_none()
    }

    /// Forget everything, as when a surface unmaps
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl<S: Clone + PartialEq + std::fmt::Debug> Default for ConfigureTracker<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_superseded_ack_keeps_geometry() {
        let mut tracker = ConfigureTracker::new();
        tracker.send(5, (800, 600));
        tracker.send(6, (400, 600));

        assert_eq!(tracker.ack(5), Ok(AckOutcome::Superseded));
        assert_eq!(tracker.commit(), None);
        assert_eq!(tracker.current(), None);

        assert_eq!(tracker.ack(6), Ok(AckOutcome::Applied));
        assert_eq!(tracker.commit(), Some(&(400, 600)));
        assert_eq!(tracker.current(), Some(&(400, 600)));
    }

    #[test]
    fn test_unknown_serial_is_rejected() {
        let mut tracker: ConfigureTracker<(i32, i32)> = ConfigureTracker::new();
        tracker.send(3, (10, 10));
        assert_eq!(tracker.ack(4), Err(ConfigureError::UnknownSerial(4)));
        assert!(!tracker.is_configured());
        assert!(tracker.has_pending());
    }

    #[test]
    fn test_stale_ack_is_ignored() {
        let mut tracker = ConfigureTracker::new();
        tracker.send(1, 'a');
        tracker.send(2, 'b');
        assert_eq!(tracker.ack(2), Ok(AckOutcome::Applied));
        tracker.commit();

        assert_eq!(tracker.ack(1), Ok(AckOutcome::Stale));
        assert_eq!(tracker.ack(2), Ok(AckOutcome::Stale));
        assert_eq!(tracker.commit(), None);
        assert_eq!(tracker.current(), Some(&'b'));
    }

    #[test]
    fn test_apply_waits_for_commit() {
        let mut tracker = ConfigureTracker::new();
        tracker.send(9, 1u8);
        tracker.ack(9).unwrap();
        assert_eq!(tracker.current(), None);
        assert_eq!(tracker.latest_sent(), Some(&1));
        assert_eq!(tracker.commit(), Some(&1));
    }

    #[test]
    fn test_reset() {
        let mut tracker = ConfigureTracker::new();
        tracker.send(1, 1u8);
        tracker.ack(1).unwrap();
        tracker.reset();
        assert!(!tracker.is_configured());
        assert_eq!(tracker.latest_sent(), None);
    }
}
