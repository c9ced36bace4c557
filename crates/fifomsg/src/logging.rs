use clap::ValueEnum;
use tracing_subscriber::EnvFilter;

/// Environment variable holding a filter directive, e.g.
/// `FIFOMSG_LOG=fifomsg_rpc=trace`. `--log-level` takes precedence.
pub const LOG_ENV: &str = "FIFOMSG_LOG";

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn directive(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Explicit level first, then a valid `FIFOMSG_LOG` directive, then `info`.
fn resolve_filter(level: Option<LogLevel>, env: Option<&str>) -> EnvFilter {
    if let Some(level) = level {
        return EnvFilter::new(level.directive());
    }
    env.and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(LogLevel::Info.directive()))
}

/// Send server and client events to stderr; stdout carries replies only.
pub fn init_logging(format: LogFormat, level: Option<LogLevel>) {
    let env = std::env::var(LOG_ENV).ok();
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(resolve_filter(level, env.as_deref()))
        .with_ansi(false)
        .with_target(false);

    match format {
        LogFormat::Text => {
            let _ = builder.try_init();
        }
        LogFormat::Json => {
            let _ = builder.json().try_init();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_overrides_environment() {
        let filter = resolve_filter(Some(LogLevel::Warn), Some("fifomsg_rpc=trace"));
        assert_eq!(filter.to_string(), "warn");
    }

    #[test]
    fn environment_directive_used_without_flag() {
        let filter = resolve_filter(None, Some("fifomsg_rpc=trace"));
        assert_eq!(filter.to_string(), "fifomsg_rpc=trace");
    }

    #[test]
    fn falls_back_to_info() {
        assert_eq!(resolve_filter(None, None).to_string(), "info");
        assert_eq!(resolve_filter(None, Some("fifomsg=loudest")).to_string(), "info");
    }
}
