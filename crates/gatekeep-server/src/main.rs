use std::env;

use gatekeep_auth::system_clock;
use gatekeep_server::config::loader::load_config;
use gatekeep_server::{
    AppState, GatekeepServer, LoggingConfig, create_session_storage, init_tracing,
};

/// How the configuration path was determined.
#[derive(Debug, Clone, Copy)]
enum ConfigSource {
    /// From --config CLI argument
    CliArgument,
    /// From GATEKEEP_CONFIG environment variable
    EnvironmentVariable,
    /// Default path (gatekeep.toml)
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CliArgument => write!(f, "CLI argument (--config)"),
            Self::EnvironmentVariable => write!(f, "environment variable (GATEKEEP_CONFIG)"),
            Self::Default => write!(f, "default"),
        }
    }
}

#[tokio::main]
async fn main() {
    // .env is optional
    if let Err(e) = dotenvy::dotenv()
        && !matches!(e, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound)
    {
        eprintln!("Warning: Failed to load .env file: {e}");
    }

    let logs = init_tracing(&LoggingConfig::default());

    let (config_path, source) = resolve_config_path();
    let cfg = match load_config(Some(&config_path)) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(2);
        }
    };

    tracing::info!(
        path = %config_path,
        source = %source,
        "Configuration loaded"
    );
    if let Err(e) = logs.apply(&cfg.logging) {
        tracing::warn!(error = %e, "Keeping bootstrap log filter");
    }

    let storage = match create_session_storage(&cfg.storage).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Session storage initialization failed: {e}");
            std::process::exit(2);
        }
    };

    let state = match AppState::from_config(&cfg, storage, system_clock()) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Server initialization failed: {e}");
            std::process::exit(2);
        }
    };

    if let Err(err) = GatekeepServer::new(&cfg, state).run().await {
        eprintln!("Server error: {err}");
        std::process::exit(1);
    }
}

/// Resolve the configuration file path.
///
/// Priority order:
/// 1. CLI argument: --config <path>
/// 2. Environment variable: GATEKEEP_CONFIG
/// 3. Default: gatekeep.toml
fn resolve_config_path() -> (String, ConfigSource) {
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config"
            && let Some(path) = args.next()
        {
            return (path, ConfigSource::CliArgument);
        }
    }

    if let Ok(path) = env::var("GATEKEEP_CONFIG")
        && !path.is_empty()
    {
        return (path, ConfigSource::EnvironmentVariable);
    }

    ("gatekeep.toml".to_string(), ConfigSource::Default)
}
