use std::io::IsTerminal;
use std::net::SocketAddr;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Pretty
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct ShareOutput<'a> {
    key: &'a str,
    source_port: u16,
    connect_command: String,
}

/// Command the client machine runs to reach a shared port.
pub fn connect_command(key: &str) -> String {
    format!("webtuna connect '{key}' <LOCAL_PORT>")
}

pub fn print_share_banner(key: &str, source_port: u16, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = ShareOutput {
                key,
                source_port,
                connect_command: connect_command(key),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["PORT", "KEY", "RUN ON CLIENT"])
                .add_row(vec![
                    source_port.to_string(),
                    key.to_string(),
                    connect_command(key),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!("To access your port {source_port}, run on the client machine:");
            println!("  {}", connect_command(key));
            println!();
        }
    }
}

#[derive(Serialize)]
struct RelayOutput {
    relay: String,
}

pub fn print_relay_ready(addr: SocketAddr, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = RelayOutput {
                relay: addr.to_string(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_header(vec!["RELAY"])
                .add_row(vec![addr.to_string()]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!("Relay listening on {addr}");
        }
    }
}
