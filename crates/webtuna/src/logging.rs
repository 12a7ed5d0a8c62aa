use clap::ValueEnum;
use tracing::{info_span, Span};
use tracing_subscriber::EnvFilter;

/// Target of the per-stream multiplexer events (open, end, dial failures).
const STREAM_TARGET: &str = "webtuna_mux";

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

/// Which end of the tunnel a command runs; names the span every log line nests in.
#[derive(Copy, Clone, Debug)]
pub enum Role {
    Server,
    Client,
    Relay,
}

pub fn role_span(role: Role) -> Span {
    match role {
        Role::Server => info_span!("server"),
        Role::Client => info_span!("client"),
        Role::Relay => info_span!("relay"),
    }
}

#[derive(Clone, Debug)]
pub struct LogSettings {
    pub format: LogFormat,
    pub level: LogLevel,
    /// Overrides `level` for stream lifecycle events only.
    pub stream_level: Option<LogLevel>,
    /// Extra `EnvFilter` directives, applied last.
    pub filter: Option<String>,
}

impl LogSettings {
    pub fn directives(&self) -> String {
        let mut directives = vec![self.level.directive().to_string()];
        if let Some(stream_level) = self.stream_level {
            directives.push(format!("{STREAM_TARGET}={}", stream_level.directive()));
        }
        if let Some(extra) = self.filter.as_deref().map(str::trim) {
            if !extra.is_empty() {
                directives.push(extra.to_string());
            }
        }
        directives.join(",")
    }

    pub fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_new(self.directives())
            .unwrap_or_else(|_| EnvFilter::new(self.level.directive()))
    }
}

/// clap value parser for `--log-filter`.
pub fn parse_filter(value: &str) -> Result<String, String> {
    EnvFilter::try_new(value)
        .map(|_| value.to_string())
        .map_err(|err| format!("invalid log filter: {err}"))
}

/// Log to stderr; stdout is reserved for the share and relay banners.
pub fn init_logging(settings: &LogSettings) {
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(settings.env_filter())
        .with_ansi(false)
        .with_target(settings.stream_level.is_some() || settings.filter.is_some());

    match settings.format {
        LogFormat::Text => {
            let _ = builder.try_init();
        }
        LogFormat::Json => {
            let _ = builder.json().try_init();
        }
    }
}
