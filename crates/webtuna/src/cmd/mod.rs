use clap::{Args, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::exit::{CliError, CliResult, INTERNAL};
use crate::output::OutputFormat;

pub mod connect;
pub mod relay;
pub mod share;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Share a local port under a key.
    Share(ShareArgs),
    /// Expose a shared port on a local port.
    Connect(ConnectArgs),
    /// Run the rendezvous relay peers meet through.
    Relay(RelayArgs),
}

pub fn run(command: Command, relay: &str, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Share(args) => share::run(args, relay, format),
        Command::Connect(args) => connect::run(args, relay),
        Command::Relay(args) => relay::run(args, format),
    }
}

#[derive(Args, Debug)]
pub struct ShareArgs {
    /// Local port to share.
    #[arg(value_parser = parse_port)]
    pub source_port: u16,
    /// Key to share under. Generated when omitted.
    #[arg(value_parser = parse_key)]
    pub destination_key: Option<String>,
}

#[derive(Args, Debug)]
pub struct ConnectArgs {
    /// Key printed by `webtuna share`.
    #[arg(value_parser = parse_key)]
    pub source_key: String,
    /// Local port to listen on.
    #[arg(value_parser = parse_port)]
    pub destination_port: u16,
}

#[derive(Args, Debug)]
pub struct RelayArgs {
    /// Address to listen on.
    #[arg(long, value_name = "ADDR", default_value = "0.0.0.0:9009")]
    pub bind: String,
}

/// Ports are canonical decimal: digits only, no sign, no leading zero.
fn parse_port(value: &str) -> Result<u16, String> {
    let canonical = !value.is_empty()
        && value.bytes().all(|b| b.is_ascii_digit())
        && (value == "0" || !value.starts_with('0'));
    if !canonical {
        return Err(format!("'{value}' is not a port number"));
    }
    value
        .parse::<u16>()
        .map_err(|_| format!("'{value}' is out of range (0-65535)"))
}

fn parse_key(value: &str) -> Result<String, String> {
    webtuna_peer::validate_key(value)
        .map(|()| value.to_string())
        .map_err(|_| {
            format!(
                "'{value}' is not a valid key (1-{} characters of A-Z, a-z, 0-9, '_' or '-')",
                webtuna_peer::MAX_KEY_LEN
            )
        })
}

fn runtime() -> CliResult<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| CliError::new(INTERNAL, format!("runtime setup failed: {err}")))
}

/// Token cancelled on Ctrl-C. Must be called inside the runtime.
fn shutdown_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupted, shutting down");
                trigger.cancel();
            }
            Err(err) => warn!(error = %err, "signal handler setup failed"),
        }
    });
    token
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_ports() {
        assert_eq!(parse_port("0"), Ok(0));
        assert_eq!(parse_port("80"), Ok(80));
        assert_eq!(parse_port("65535"), Ok(65535));
        assert!(parse_port("00").is_err());
        assert!(parse_port("080").is_err());
        assert!(parse_port("+80").is_err());
        assert!(parse_port(" 80").is_err());
        assert!(parse_port("65536").is_err());
        assert!(parse_port("").is_err());
    }

    #[test]
    fn keys_follow_relay_rules() {
        assert!(parse_key("abc_DEF-123").is_ok());
        assert!(parse_key("a/b").is_err());
        assert!(parse_key("").is_err());
    }
}
