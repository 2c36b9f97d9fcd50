use crate::config::ClientConfig;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacingMode {
    Idle,
    Active,
}

/// What a dispatch attempt resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Capture and send a frame now.
    Send,
    /// Inside the minimum interval; nothing sent, nothing queued.
    Throttled,
    /// A frame is still awaiting its result.
    InFlight,
    /// Sending is stopped.
    Idle,
    /// Nothing is due yet.
    Pending,
}

#[derive(Debug, Clone, Copy)]
pub struct PacingConfig {
    pub min_interval: Duration,
    pub receipt_delay: Duration,
    pub round_trip_timeout: Duration,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(5_000),
            receipt_delay: Duration::from_millis(5_000),
            round_trip_timeout: Duration::from_secs(60),
        }
    }
}

impl From<&ClientConfig> for PacingConfig {
    fn from(config: &ClientConfig) -> Self {
        Self {
            min_interval: config.get_min_send_interval(),
            receipt_delay: config.get_receipt_delay(),
            round_trip_timeout: config.get_round_trip_timeout(),
        }
    }
}

/// Client-side pacing state: at most one frame in flight, a minimum gap
/// between dispatches and a cooldown after every received result.
#[derive(Debug)]
pub struct Pacer {
    config: PacingConfig,
    mode: PacingMode,
    last_dispatch: Option<Instant>,
    in_flight_since: Option<Instant>,
    next_dispatch: Option<Instant>,
}

impl Pacer {
    pub fn new(config: PacingConfig) -> Self {
        Self {
            config,
            mode: PacingMode::Idle,
            last_dispatch: None,
            in_flight_since: None,
            next_dispatch: None,
        }
    }

    pub fn mode(&self) -> PacingMode {
        self.mode
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight_since.is_some()
    }

    pub fn last_dispatch(&self) -> Option<Instant> {
        self.last_dispatch
    }

    pub fn scheduled(&self) -> Option<Instant> {
        self.next_dispatch
    }

    pub fn start(&mut self, now: Instant) -> Dispatch {
        self.mode = PacingMode::Active;
        self.try_dispatch(now)
    }

    /// The frame already in flight still completes; nothing follows it.
    pub fn stop(&mut self) {
        self.mode = PacingMode::Idle;
        self.next_dispatch = None;
    }

    pub fn try_dispatch(&mut self, now: Instant) -> Dispatch {
        if self.mode == PacingMode::Idle {
            return Dispatch::Idle;
        }
        if self.in_flight_since.is_some() {
            return Dispatch::InFlight;
        }
        if let Some(last) = self.last_dispatch {
            if now.saturating_duration_since(last) < self.config.min_interval {
                return Dispatch::Throttled;
            }
        }
        self.last_dispatch = Some(now);
        self.in_flight_since = Some(now);
        self.next_dispatch = None;
        Dispatch::Send
    }

    /// A result arrived. Returns the time of the next dispatch, if any.
    pub fn on_result(&mut self, now: Instant) -> Option<Instant> {
        self.in_flight_since = None;
        if self.mode == PacingMode::Active {
            self.next_dispatch = Some(now + self.config.receipt_delay);
        }
        self.next_dispatch
    }

    /// The dispatched frame could not be captured or sent.
    pub fn abandon(&mut self, now: Instant) {
        self.in_flight_since = None;
        if self.mode == PacingMode::Active {
            self.next_dispatch = Some(now + self.config.receipt_delay);
        }
    }

    /// Earliest instant at which [`Pacer::on_tick`] has something to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        let expiry = self
            .in_flight_since
            .map(|since| since + self.config.round_trip_timeout);
        match (self.next_dispatch, expiry) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Expires a lost round trip and fires a due scheduled dispatch. A
    /// scheduled dispatch that lands inside the minimum interval is deferred
    /// to the end of the interval instead of being dropped.
    pub fn on_tick(&mut self, now: Instant) -> Dispatch {
        if let Some(since) = self.in_flight_since {
            if now.saturating_duration_since(since) >= self.config.round_trip_timeout {
                tracing::warn!(
                    "No result after {:?}, treating frame as dropped",
                    self.config.round_trip_timeout
                );
                self.in_flight_since = None;
                if self.mode == PacingMode::Active {
                    self.next_dispatch = Some(now);
                }
            }
        }

        match self.next_dispatch {
            Some(due) if due <= now => {
                self.next_dispatch = None;
                let dispatch = self.try_dispatch(now);
                if dispatch == Dispatch::Throttled {
                    self.next_dispatch = self
                        .last_dispatch
                        .map(|last| last + self.config.min_interval);
                }
                dispatch
            }
            _ if self.mode == PacingMode::Idle => Dispatch::Idle,
            _ if self.in_flight_since.is_some() => Dispatch::InFlight,
            _ => Dispatch::Pending,
        }
    }
}
