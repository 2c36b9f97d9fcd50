//! Capture-and-pace client.
//!
//! One cooperative task owns the frame source, the pacing state and the relay
//! channel. It waits on three things: operator commands, results from the
//! relay and the pacing timer.

#[cfg(feature = "camera")]
mod camera;
mod display;
mod pacer;
mod source;
pub mod transport;

#[cfg(feature = "camera")]
pub use camera::CameraSource;
pub use display::{DisplayError, FileSink, ResultSink};
pub use pacer::{Dispatch, Pacer, PacingConfig, PacingMode};
pub use source::{CaptureError, DeviceInfo, DirectorySource, FrameSource};

use crate::{
    envelope::{Envelope, EnvelopeError},
    protocol::{ClientEvent, ServerEvent},
};
use std::str::FromStr;
use thiserror::Error;
use tokio::{
    sync::mpsc,
    time::{sleep_until, Instant},
};

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),
    #[error("Sending is disabled until a capture device is available")]
    SendingDisabled,
    #[error("Relay channel closed")]
    ChannelClosed,
    #[error("Invalid result from relay: {0}")]
    InvalidResult(#[from] EnvelopeError),
    #[error("Display error: {0}")]
    Display(#[from] DisplayError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    ListDevices,
    Select(String),
    Quit,
}

impl FromStr for Command {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split_whitespace();
        match (parts.next(), parts.next()) {
            (Some("start"), None) => Ok(Command::Start),
            (Some("stop"), None) => Ok(Command::Stop),
            (Some("devices"), None) => Ok(Command::ListDevices),
            (Some("select"), Some(device)) => Ok(Command::Select(device.to_string())),
            (Some("quit") | Some("exit"), None) => Ok(Command::Quit),
            _ => Err(format!(
                "unknown command `{}`; use start, stop, devices, select <id> or quit",
                s.trim()
            )),
        }
    }
}

pub struct CaptureClient<S: FrameSource> {
    source: S,
    pacer: Pacer,
    sink: Box<dyn ResultSink + Send>,
    outbound: mpsc::Sender<ClientEvent>,
    capture_ready: bool,
    frames_sent: u64,
    results_received: u64,
}

impl<S: FrameSource> CaptureClient<S> {
    pub fn new(
        source: S,
        pacing: PacingConfig,
        sink: Box<dyn ResultSink + Send>,
        outbound: mpsc::Sender<ClientEvent>,
    ) -> Self {
        Self {
            source,
            pacer: Pacer::new(pacing),
            sink,
            outbound,
            capture_ready: false,
            frames_sent: 0,
            results_received: 0,
        }
    }

    pub fn pacer(&self) -> &Pacer {
        &self.pacer
    }

    pub fn is_sending(&self) -> bool {
        self.pacer.mode() == PacingMode::Active
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    pub fn results_received(&self) -> u64 {
        self.results_received
    }

    pub fn devices(&self) -> Result<Vec<DeviceInfo>, CaptureError> {
        self.source.devices()
    }

    /// Switches the live source. A failure that leaves no usable device
    /// disables sending and stops an active pacing loop.
    pub fn select_device(&mut self, device_id: &str) -> Result<(), CaptureError> {
        match self.source.select(device_id) {
            Ok(()) => {
                self.capture_ready = true;
                tracing::info!("Selected capture device {}", device_id);
                Ok(())
            }
            Err(e) => {
                self.disable_capture(&e);
                Err(e)
            }
        }
    }

    pub async fn start_sending(&mut self) -> Result<Dispatch, ClientError> {
        if !self.capture_ready {
            return Err(ClientError::SendingDisabled);
        }
        let dispatch = self.pacer.start(Instant::now());
        self.perform(dispatch).await
    }

    pub fn stop_sending(&mut self) {
        self.pacer.stop();
        tracing::info!("Stopped sending frames");
    }

    /// Externally triggered dispatch; dropped if pacing does not allow it.
    pub async fn send_frame(&mut self) -> Result<Dispatch, ClientError> {
        let dispatch = self.pacer.try_dispatch(Instant::now());
        self.perform(dispatch).await
    }

    pub async fn handle_event(&mut self, event: ServerEvent) -> Result<(), ClientError> {
        let ServerEvent::ProcessedFrame(payload) = event;
        self.results_received += 1;
        let now = Instant::now();

        let shown = Envelope::parse(&payload.url)
            .map_err(ClientError::from)
            .and_then(|frame| self.sink.show(&frame).map_err(ClientError::from));

        if let Some(next) = self.pacer.on_result(now) {
            tracing::debug!("Next frame in {:?}", next.saturating_duration_since(now));
        }
        shown
    }

    pub async fn on_tick(&mut self) -> Result<Dispatch, ClientError> {
        let dispatch = self.pacer.on_tick(Instant::now());
        self.perform(dispatch).await
    }

    async fn perform(&mut self, dispatch: Dispatch) -> Result<Dispatch, ClientError> {
        if dispatch != Dispatch::Send {
            tracing::debug!("Dispatch skipped: {:?}", dispatch);
            return Ok(dispatch);
        }

        let frame = match self.source.capture() {
            Ok(frame) => frame,
            Err(e) => {
                self.pacer.abandon(Instant::now());
                self.disable_capture(&e);
                return Err(e.into());
            }
        };

        let event = ClientEvent::send_frame(frame.to_data_url());
        if self.outbound.send(event).await.is_err() {
            self.pacer.abandon(Instant::now());
            return Err(ClientError::ChannelClosed);
        }

        self.frames_sent += 1;
        tracing::info!("Sent frame {}", self.frames_sent);
        Ok(Dispatch::Send)
    }

    /// Errors that leave no usable device disable sending until a later
    /// `select_device` succeeds. Read and encode failures are transient.
    fn disable_capture(&mut self, error: &CaptureError) {
        let device_lost = matches!(
            error,
            CaptureError::AccessDenied { .. }
                | CaptureError::UnknownDevice(_)
                | CaptureError::NoDeviceSelected
        );
        if !device_lost {
            return;
        }

        self.capture_ready = false;
        self.pacer.stop();
        if error.is_access_denied() {
            tracing::error!(
                "Camera access is required for this application to function correctly: {}",
                error
            );
        } else {
            tracing::warn!("Capture device unavailable, sending stopped: {}", error);
        }
    }

    async fn handle_command(&mut self, command: Command) -> Result<(), ClientError> {
        match command {
            Command::Start => {
                let dispatch = self.start_sending().await?;
                tracing::info!("Started sending frames ({:?})", dispatch);
            }
            Command::Stop => self.stop_sending(),
            Command::ListDevices => {
                for device in self.devices()? {
                    tracing::info!(device_id = %device.device_id, label = %device.label, "Capture device");
                }
            }
            Command::Select(device_id) => self.select_device(&device_id)?,
            Command::Quit => {}
        }
        Ok(())
    }

    /// Runs until `Quit`, the command channel closing, or the relay closing.
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut inbound: mpsc::Receiver<ServerEvent>,
    ) -> Result<(), ClientError> {
        loop {
            let deadline = self.pacer.next_deadline();
            tokio::select! {
                command = commands.recv() => {
                    let command = match command {
                        None | Some(Command::Quit) => break,
                        Some(command) => command,
                    };
                    if let Err(e) = self.handle_command(command).await {
                        if matches!(e, ClientError::ChannelClosed) {
                            return Err(e);
                        }
                        tracing::warn!("Command failed: {}", e);
                    }
                }
                event = inbound.recv() => {
                    let Some(event) = event else {
                        return Err(ClientError::ChannelClosed);
                    };
                    if let Err(e) = self.handle_event(event).await {
                        tracing::warn!("Failed to display result: {}", e);
                    }
                }
                _ = wait_for(deadline) => {
                    match self.on_tick().await {
                        Err(ClientError::ChannelClosed) => return Err(ClientError::ChannelClosed),
                        Err(e) => tracing::warn!("Frame dispatch failed: {}", e),
                        Ok(_) => {}
                    }
                }
            }
        }

        tracing::info!(
            frames_sent = self.frames_sent,
            results = self.results_received,
            "Client stopped"
        );
        Ok(())
    }
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
