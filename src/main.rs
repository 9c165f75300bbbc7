use anyhow::{Context, Result};
use env_logger::Env;
use log::{error, info};

use norepeat::api::build_rocket;
use norepeat::common::ROCKET_RUNTIME;
use norepeat::common::errors::handle_error;
use norepeat::config::DedupConfig;

fn initialize_logger() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

fn main() -> Result<()> {
    initialize_logger();

    let result = ROCKET_RUNTIME.block_on(async {
        let config = DedupConfig::from_env().map_err(handle_error)?;
        let guard = config
            .build_guard()
            .await
            .map_err(|error| handle_error(error.context("Failed to build dedup guard")))?;

        let rocket_instance = build_rocket(guard)
            .ignite()
            .await
            .context("Failed to ignite rocket")?;
        info!("Serving guarded routes");
        rocket_instance
            .launch()
            .await
            .context("Rocket server failed")?;
        Ok::<(), anyhow::Error>(())
    });

    if let Err(e) = &result {
        error!("Shutting down: {:#}", e);
    }
    result
}
