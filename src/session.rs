//! Per-connection relay state machine.
//!
//! ```text
//! Idle --frame accepted--> Processing --result sent / failure logged--> Idle
//! ```
//!
//! A frame that arrives while `Processing` is dropped. The detector runs in a
//! spawned task and reports back over a channel, so the connection keeps
//! reading (and dropping) while inference is in flight, and a disconnect never
//! waits for the detector.

use crate::{
    envelope::Envelope,
    protocol::{ClientEvent, ServerEvent},
    relay::{FrameJob, RelayError},
    server::SharedState,
    telemetry::DropReason,
};
use futures::{Stream, StreamExt};
use std::fmt;
use tokio::{sync::mpsc, time::Instant};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Processing,
}

#[derive(Debug)]
pub struct Session {
    id: Uuid,
    state: SessionState,
    frames_accepted: u64,
    last_frame_at: Option<Instant>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            state: SessionState::Idle,
            frames_accepted: 0,
            last_frame_at: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn frames_accepted(&self) -> u64 {
        self.frames_accepted
    }

    pub fn last_frame_at(&self) -> Option<Instant> {
        self.last_frame_at
    }

    /// Moves to `Processing` and returns the frame's sequence number, or `None`
    /// if a frame is already in flight.
    pub fn try_begin(&mut self, now: Instant) -> Option<u64> {
        if self.state == SessionState::Processing {
            return None;
        }
        let seq = self.frames_accepted;
        self.frames_accepted += 1;
        self.last_frame_at = Some(now);
        self.state = SessionState::Processing;
        Some(seq)
    }

    pub fn finish(&mut self) {
        self.state = SessionState::Idle;
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

struct FrameOutcome {
    seq: u64,
    result: Result<Envelope, RelayError>,
}

/// Drives one session until `inbound` ends.
///
/// `inbound` yields the text of each client message; replies go to `outbound`.
pub async fn run_session<I>(state: SharedState, mut inbound: I, outbound: mpsc::Sender<ServerEvent>)
where
    I: Stream<Item = String> + Unpin,
{
    let mut session = Session::new();
    let (done_tx, mut done_rx) = mpsc::channel::<FrameOutcome>(1);

    state.metrics.session_opened();
    tracing::info!(session_id = %session, "Session started");

    loop {
        tokio::select! {
            message = inbound.next() => {
                let Some(text) = message else { break };
                on_frame_received(&state, &mut session, &text, &done_tx);
            }
            Some(outcome) = done_rx.recv() => {
                session.finish();
                let Ok(frame) = outcome.result else { continue };
                let event = ServerEvent::processed_frame(frame.to_data_url());
                if outbound.send(event).await.is_err() {
                    state.metrics.record_frame_dropped(DropReason::Disconnected);
                    tracing::debug!(session_id = %session, seq = outcome.seq, "Connection closed before result delivery");
                    break;
                }
                state.metrics.record_frame_processed();
                tracing::info!(session_id = %session, seq = outcome.seq, "Sent processed frame");
            }
        }
    }

    state.metrics.session_closed();
    tracing::info!(
        session_id = %session,
        frames = session.frames_accepted(),
        "Session ended"
    );
}

fn on_frame_received(
    state: &SharedState,
    session: &mut Session,
    text: &str,
    done_tx: &mpsc::Sender<FrameOutcome>,
) {
    state.metrics.record_frame_received();

    if session.state() == SessionState::Processing {
        state.metrics.record_frame_dropped(DropReason::Busy);
        tracing::warn!(session_id = %session, "Frame received while processing, dropping it");
        return;
    }

    let frame = match parse_frame(text) {
        Ok(frame) => frame,
        Err(reason) => {
            state.metrics.record_frame_dropped(DropReason::Malformed);
            tracing::warn!(session_id = %session, "Received invalid frame: {}", reason);
            return;
        }
    };

    let now = Instant::now();
    let gap_ms = session
        .last_frame_at()
        .map(|last| now.saturating_duration_since(last).as_millis() as u64);
    let Some(seq) = session.try_begin(now) else {
        return;
    };
    tracing::info!(session_id = %session, seq, gap_ms, "Received frame");

    let job = FrameJob {
        session_id: session.id(),
        seq,
        frame,
    };
    let relay = state.relay.clone();
    let metrics = state.metrics.clone();
    let done_tx = done_tx.clone();

    tokio::spawn(async move {
        let session_id = job.session_id;
        let started = Instant::now();
        let result = relay.process(job).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        metrics.record_inference_duration(elapsed_ms, result.is_ok());

        if let Err(e) = &result {
            metrics.record_frame_dropped(DropReason::Failed);
            tracing::error!(%session_id, seq, "Frame processing failed: {}", e);
        }

        let succeeded = result.is_ok();
        if done_tx.send(FrameOutcome { seq, result }).await.is_err() && succeeded {
            metrics.record_frame_dropped(DropReason::Disconnected);
            tracing::debug!(%session_id, seq, "Session gone, discarding result");
        }
    });
}

fn parse_frame(text: &str) -> Result<Envelope, String> {
    let ClientEvent::SendFrame(payload) =
        serde_json::from_str::<ClientEvent>(text).map_err(|e| e.to_string())?;
    Envelope::parse(&payload.data_url).map_err(|e| e.to_string())
}
