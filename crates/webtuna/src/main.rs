mod cmd;
mod exit;
mod logging;
mod output;

use clap::error::ErrorKind;
use clap::Parser;
use webtuna_peer::DEFAULT_RELAY_ADDR;

use crate::cmd::Command;
use crate::exit::{FAILURE, SUCCESS};
use crate::logging::{init_logging, parse_filter, LogFormat, LogLevel, LogSettings};
use crate::output::OutputFormat;

const USAGE: &str = "Usage:
  webtuna share <source_port> [destination_key]
  webtuna connect <source_key> <destination_port>
  webtuna relay [--bind <ADDR>]
  If 'destination_key' is omitted, a random one is generated.";

#[derive(Parser, Debug)]
#[command(
    name = "webtuna",
    version,
    about = "Point-to-point TCP tunnel",
    after_help = "If 'destination_key' is omitted, a random one is generated."
)]
struct Cli {
    /// Rendezvous relay address.
    #[arg(
        long,
        value_name = "ADDR",
        env = "WEBTUNA_RELAY",
        default_value = DEFAULT_RELAY_ADDR,
        global = true
    )]
    relay: String,

    /// Output format for banners on stdout.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    /// Log level for stream open/close events, independent of --log-level.
    #[arg(long, value_name = "LEVEL", global = true)]
    stream_log_level: Option<LogLevel>,

    /// Extra tracing filter directives, e.g. `webtuna_peer=debug`.
    #[arg(
        long,
        value_name = "DIRECTIVES",
        env = "WEBTUNA_LOG",
        value_parser = parse_filter,
        global = true
    )]
    log_filter: Option<String>,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => SUCCESS,
                _ => FAILURE,
            };
            let _ = err.print();
            if code != SUCCESS {
                eprintln!("\n{USAGE}");
            }
            std::process::exit(code);
        }
    };
    init_logging(&LogSettings {
        format: cli.log_format,
        level: cli.log_level,
        stream_level: cli.stream_log_level,
        filter: cli.log_filter.clone(),
    });

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, &cli.relay, format);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}
