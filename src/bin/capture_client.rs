use anyhow::Context;
use frame_relay::{
    client::{transport, CaptureClient, Command, FileSink, FrameSource, PacingConfig},
    config::{self, ClientConfig, SourceKind},
    logging::init_logging,
};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::mpsc,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = config::get_configuration()?;
    init_logging(&config.log_level);

    match config.client.source {
        SourceKind::Directory => {
            let source = frame_relay::client::DirectorySource::new(&config.client.source_dir);
            run_client(source, &config.client).await
        }
        #[cfg(feature = "camera")]
        SourceKind::Camera => {
            let source = frame_relay::client::CameraSource::new(8);
            run_client(source, &config.client).await
        }
        #[cfg(not(feature = "camera"))]
        SourceKind::Camera => {
            anyhow::bail!("camera capture requires building with `--features camera`")
        }
    }
}

async fn run_client<S: FrameSource>(source: S, config: &ClientConfig) -> anyhow::Result<()> {
    let devices = source.devices().context("failed to enumerate capture devices")?;
    if devices.is_empty() {
        tracing::warn!("No capture devices found");
    }
    for device in &devices {
        tracing::info!(device_id = %device.device_id, label = %device.label, "Capture device");
    }

    let channel = transport::connect(&config.server_url, config.connect_retries)
        .await
        .with_context(|| format!("failed to connect to {}", config.server_url))?;

    let sink = Box::new(FileSink::new(&config.output_path));
    let mut client = CaptureClient::new(
        source,
        PacingConfig::from(config),
        sink,
        channel.outbound,
    );

    let initial = config
        .device
        .clone()
        .or_else(|| devices.first().map(|d| d.device_id.clone()));
    match initial {
        Some(device_id) => {
            if let Err(e) = client.select_device(&device_id) {
                tracing::error!("Failed to open capture device {}: {}", device_id, e);
            }
        }
        None => tracing::warn!("No capture device selected, sending is disabled"),
    }

    let (command_tx, command_rx) = mpsc::channel(8);
    tokio::spawn(read_commands(command_tx));

    tracing::info!("Commands: start, stop, devices, select <id>, quit");
    client.run(command_rx, channel.inbound).await?;
    Ok(())
}

async fn read_commands(commands: mpsc::Sender<Command>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::error!("Failed to read command: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match line.parse::<Command>() {
            Ok(command) => {
                if commands.send(command).await.is_err() {
                    break;
                }
            }
            Err(e) => tracing::warn!("{}", e),
        }
    }
}
