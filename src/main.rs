use frame_relay::{config, logging::init_logging, start_app};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = config::get_configuration()?;
    init_logging(&config.log_level);

    start_app(config).await
}
