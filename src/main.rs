use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::info;

use azure_msi_operator::config::Opts;
use azure_msi_operator::observability::{logging, metrics};
use azure_msi_operator::operator::MsiOperator;
use azure_msi_operator::server;

#[tokio::main]
async fn main() -> Result<()> {
    let opts = Opts::parse();

    logging::init(&opts);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = %opts.azure_environment,
        sync_interval = ?opts.sync_interval,
        "starting azure-msi-operator"
    );
    info!(options = ?opts, "loaded configuration");

    metrics::register_metrics()?;

    let operator = Arc::new(MsiOperator::new(opts.clone()).await?);
    operator.start();

    server::run(&opts.server_bind).await
}
