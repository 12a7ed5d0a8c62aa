use tracing::{info, Instrument};
use webtuna_peer::{generate_key, serve_share, ShareListener};

use crate::cmd::{runtime, shutdown_on_ctrl_c, ShareArgs};
use crate::exit::{peer_error, CliError, CliResult, SUCCESS};
use crate::logging::{role_span, Role};
use crate::output::{print_share_banner, OutputFormat};

pub fn run(args: ShareArgs, relay: &str, format: OutputFormat) -> CliResult<i32> {
    let key = args.destination_key.unwrap_or_else(generate_key);
    let port = args.source_port;

    runtime()?.block_on(
        async {
            info!(port, relay, "sharing port");
            let listener = ShareListener::register(relay, &key)
                .await
                .map_err(|err| peer_error("relay registration failed", err))?;
            print_share_banner(&key, port, format);
            info!(session = listener.session(), "waiting for peers");

            serve_share(listener, port, shutdown_on_ctrl_c())
                .await
                .map_err(|err| peer_error("relay registration lost", err))?;
            Ok::<_, CliError>(SUCCESS)
        }
        .instrument(role_span(Role::Server)),
    )
}
