//! Log output setup.
//!
//! The subscriber starts before the configuration file is read, so it is
//! installed with a bootstrap [`LoggingConfig`] behind a reload layer.
//! [`LogControl::apply`] swaps in the configured filter once it is known.
//! `RUST_LOG`, when set, wins over both.

use tracing_subscriber::{
    EnvFilter, Registry,
    filter::{Directive, ParseError},
    fmt,
    prelude::*,
    reload,
};

use crate::config::LoggingConfig;

/// Handle to the installed log filter.
#[derive(Clone)]
pub struct LogControl {
    handle: reload::Handle<EnvFilter, Registry>,
    from_env: bool,
}

impl LogControl {
    /// Replaces the active filter with one built from `logging`.
    ///
    /// A no-op while `RUST_LOG` is in charge.
    pub fn apply(&self, logging: &LoggingConfig) -> anyhow::Result<()> {
        if self.from_env {
            tracing::debug!("RUST_LOG is set, keeping its filter");
            return Ok(());
        }
        let filter = build_filter(logging)?;
        self.handle.reload(filter)?;
        tracing::debug!(level = %logging.level, directives = ?logging.directives, "Log filter applied");
        Ok(())
    }

    /// Returns the active filter rendered as directives.
    pub fn current(&self) -> Option<String> {
        self.handle.with_current(|f| f.to_string()).ok()
    }
}

/// Installs the global subscriber. A second call leaves the first subscriber
/// in place and returns a handle to an unattached filter.
pub fn init_tracing(logging: &LoggingConfig) -> LogControl {
    let env = EnvFilter::try_from_default_env().ok();
    let from_env = env.is_some();
    let filter = env
        .or_else(|| build_filter(logging).ok())
        .unwrap_or_else(|| EnvFilter::new("info"));

    let (filter, handle) = reload::Layer::new(filter);
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(logging.show_target))
        .try_init();

    LogControl { handle, from_env }
}

/// `level` as the default, each entry of `directives` layered on top.
pub fn build_filter(logging: &LoggingConfig) -> Result<EnvFilter, ParseError> {
    let mut filter = EnvFilter::try_new(&logging.level)?;
    for directive in &logging.directives {
        filter = filter.add_directive(directive.parse::<Directive>()?);
    }
    Ok(filter)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn logging(level: &str, directives: &[&str]) -> LoggingConfig {
        LoggingConfig {
            level: level.into(),
            directives: directives.iter().map(|d| d.to_string()).collect(),
            show_target: false,
        }
    }

    #[test]
    fn test_build_filter_layers_directives() {
        let filter = build_filter(&logging("debug", &["sqlx=warn", "hyper=error"])).unwrap();
        let rendered = filter.to_string();
        assert!(rendered.contains("debug"));
        assert!(rendered.contains("sqlx=warn"));
        assert!(rendered.contains("hyper=error"));

        assert!(build_filter(&logging("info", &["sqlx[connect"])).is_err());
    }

    #[test]
    fn test_apply_reloads_filter() {
        let (_layer, handle) = reload::Layer::<_, Registry>::new(EnvFilter::new("info"));
        let control = LogControl {
            handle,
            from_env: false,
        };

        control.apply(&logging("warn", &["gatekeep_auth=trace"])).unwrap();
        let current = control.current().unwrap();
        assert!(current.contains("warn"));
        assert!(current.contains("gatekeep_auth=trace"));
    }

    #[test]
    fn test_env_filter_is_not_replaced() {
        let (_layer, handle) = reload::Layer::<_, Registry>::new(EnvFilter::new("error"));
        let control = LogControl {
            handle,
            from_env: true,
        };

        control.apply(&logging("trace", &[])).unwrap();
        assert_eq!(control.current().unwrap(), "error");
    }
}
