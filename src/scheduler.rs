use std::time::{Duration, Instant};

/// "Run me on the next display refresh."
///
/// Requests are not queued: asking twice before the refresh still yields one call.
pub trait FrameScheduler {
    fn request_frame(&mut self);
}

/// Refresh-driven scheduler used by the host loop.
///
/// The host calls [`RefreshScheduler::wait_for_refresh`] once per iteration and then
/// [`RefreshScheduler::take_request`] to learn whether a tick is due.
pub struct RefreshScheduler {
    interval: Duration,
    next_refresh: Instant,
    requested: bool,
}

impl RefreshScheduler {
    pub fn new(refresh_hz: u32) -> Self {
        let interval = Duration::from_secs_f64(1.0 / refresh_hz.max(1) as f64);
        Self {
            interval,
            next_refresh: Instant::now() + interval,
            requested: false,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Consume the pending request, if any
    pub fn take_request(&mut self) -> bool {
        std::mem::take(&mut self.requested)
    }

    pub fn has_request(&self) -> bool {
        self.requested
    }

    /// Sleep until the next refresh boundary.
    ///
    /// If the previous iteration overran, the schedule restarts from now instead of
    /// firing a burst of catch-up refreshes.
    pub fn wait_for_refresh(&mut self) {
        let now = Instant::now();
        if self.next_refresh > now {
            std::thread::sleep(self.next_refresh - now);
            self.next_refresh += self.interval;
        } else {
            self.next_refresh = now + self.interval;
        }
    }
}

impl FrameScheduler for RefreshScheduler {
    fn request_frame(&mut self) {
        self.requested = true;
    }
}
