//! Frame admission: the cheap synchronous gate applied before any
//! expensive analysis is requested.
//!
//! Frames arrive at device frame rate but useful information changes much
//! more slowly, and the downstream detector call is comparatively
//! expensive. This is a leaky-bucket rate limiter with a single permit:
//! one analysis in flight at a time, and a minimum interval between
//! admitted frames. Checking and recording are split so the caller can
//! decide admission before committing side effects.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct FrameAdmission {
    min_interval: Duration,
    last_admitted: Option<Duration>,
}

impl FrameAdmission {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_admitted: None,
        }
    }

    /// Whether a frame arriving at `now` may be analyzed. `analyzing` is
    /// the session-level gate (false once capture is finished or while an
    /// analysis is already in flight). Purely advisory, no side effects.
    pub fn admit(&self, analyzing: bool, now: Duration) -> bool {
        if !analyzing {
            return false;
        }
        match self.last_admitted {
            Some(last) => now.saturating_sub(last) >= self.min_interval,
            None => true,
        }
    }

    /// Record that a frame was admitted at `now`.
    pub fn record_admitted(&mut self, now: Duration) {
        self.last_admitted = Some(now);
    }

    /// Forget the last admission, so the next frame passes immediately.
    pub fn reset(&mut self) {
        self.last_admitted = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn first_frame_is_admitted() {
        let gate = FrameAdmission::new(ms(250));
        assert!(gate.admit(true, ms(0)));
    }

    #[test]
    fn rejects_when_not_analyzing() {
        let gate = FrameAdmission::new(ms(250));
        assert!(!gate.admit(false, ms(1000)));
    }

    #[test]
    fn enforces_min_interval_since_last_admitted() {
        let mut gate = FrameAdmission::new(ms(250));
        gate.record_admitted(ms(100));
        assert!(!gate.admit(true, ms(200)));
        assert!(!gate.admit(true, ms(349)));
        assert!(gate.admit(true, ms(350)));
    }

    #[test]
    fn interval_counts_from_admitted_frames_only() {
        let mut gate = FrameAdmission::new(ms(250));
        gate.record_admitted(ms(0));
        // Rejected probes at 100 and 200 must not push the window forward
        assert!(!gate.admit(true, ms(100)));
        assert!(!gate.admit(true, ms(200)));
        assert!(gate.admit(true, ms(250)));
    }

    #[test]
    fn reset_reopens_the_gate() {
        let mut gate = FrameAdmission::new(ms(250));
        gate.record_admitted(ms(100));
        assert!(!gate.admit(true, ms(150)));
        gate.reset();
        assert!(gate.admit(true, ms(150)));
    }
}
