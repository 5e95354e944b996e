//! # Logging
//!
//! tracing-subscriber initialization honoring the logger flags.
//!
//! `--debug` selects trace level, `--verbose` debug level, default is info.
//! `--log.json` switches the output to JSON. `RUST_LOG` overrides the
//! flag-derived filter when set.

use crate::config::Opts;
use tracing_subscriber::EnvFilter;

pub fn init(opts: &Opts) {
    let default_level = if opts.debug {
        "trace"
    } else if opts.verbose {
        "debug"
    } else {
        "info"
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("azure_msi_operator={default_level}")));

    if opts.log_json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
