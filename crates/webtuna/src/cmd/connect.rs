use tracing::{info, Instrument};
use webtuna_peer::{run_connect, ConnectOptions, HandshakeConfig, SupervisorConfig};

use crate::cmd::{runtime, shutdown_on_ctrl_c, ConnectArgs};
use crate::exit::{CliResult, SUCCESS};
use crate::logging::{role_span, Role};

/// Runs until interrupted; Channel failures are retried, never fatal.
pub fn run(args: ConnectArgs, relay: &str) -> CliResult<i32> {
    let options = ConnectOptions {
        relay: relay.to_string(),
        key: args.source_key,
        local_port: args.destination_port,
        handshake: HandshakeConfig::default(),
        supervisor: SupervisorConfig::default(),
    };

    runtime()?.block_on(
        async {
            info!(port = options.local_port, relay, "connecting");
            run_connect(options, shutdown_on_ctrl_c()).await;
            Ok(SUCCESS)
        }
        .instrument(role_span(Role::Client)),
    )
}
