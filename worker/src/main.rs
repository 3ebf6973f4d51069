use anyhow::Result;
use tracing::info;
use worker::runtime;
use worker::settings::Settings;

#[tokio::main]
async fn main() -> Result<()> {
    utils::logger::init(&utils::logger::Config::default())?;

    let settings = Settings::load(std::env::args().nth(1).as_deref())?;
    let hostname = utils::process::hostname();
    info!("worker {hostname} starting with {} threads", settings.threads());

    runtime::run(&settings, hostname).await
}
