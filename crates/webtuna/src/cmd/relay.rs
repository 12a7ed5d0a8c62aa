use tracing::Instrument;
use webtuna_peer::{RelayConfig, RelayServer};

use crate::cmd::{runtime, shutdown_on_ctrl_c, RelayArgs};
use crate::exit::{peer_error, CliError, CliResult, SUCCESS};
use crate::logging::{role_span, Role};
use crate::output::{print_relay_ready, OutputFormat};

pub fn run(args: RelayArgs, format: OutputFormat) -> CliResult<i32> {
    runtime()?.block_on(
        async {
            let relay = RelayServer::bind(&args.bind, RelayConfig::default())
                .await
                .map_err(|err| peer_error("relay bind failed", err))?;
            print_relay_ready(relay.local_addr(), format);

            relay
                .run(shutdown_on_ctrl_c())
                .await
                .map_err(|err| peer_error("relay failed", err))?;
            Ok::<_, CliError>(SUCCESS)
        }
        .instrument(role_span(Role::Relay)),
    )
}
