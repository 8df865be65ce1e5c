//! tdsync: serve a directory tree to a userscript-manager extension.
//!
//! # Usage
//!
//! ```bash
//! # Serve ./scripts on the default localhost:7000
//! tdsync --path=./scripts
//!
//! # With credentials and meta-touch
//! tdsync --path=./scripts --username=dev --password=secret --meta-touch
//! ```

use clap::Parser;
use env_logger::Env;
use log::{error, info, warn};
use std::process;
use tdsync_server::{serve, CliArgs, Config, Core};

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();

    let config = match Config::resolve(args) {
        Ok(config) => config,
        Err(err) => {
            // Logging is not up yet.
            eprintln!("error: {}", err);
            process::exit(1);
        }
    };

    let log_level = if config.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_timestamp_millis()
        .init();

    info!("serving {}", config.path.display());
    if config.auth_required() {
        info!("basic auth enabled for user {:?}", config.username.as_deref().unwrap_or(""));
    } else if !config.no_auth_warning {
        warn!("no credentials configured; anyone who can reach {}:{} can read and write {}",
            config.host, config.port, config.path.display());
        warn!("set username/password (or TD_USERNAME/TD_PASSWORD), or pass --no-auth-warning to silence this");
    }
    if config.meta_touch {
        info!("meta-touch enabled");
    }
    if let Some(editor) = &config.open_in_editor {
        info!("EDITOR verb wired to {:?}", editor);
    }

    let core = Core::new(config);
    if let Err(err) = serve(core).await {
        error!("server error: {}", err);
        process::exit(1);
    }
}
