//! launcher: parse `<name> <value>` options from the environment and the
//! command line, bind and serve the document root.

use std::process::ExitCode;

use tracing::error;
use tracing_subscriber::EnvFilter;

use ksah::{Server, ServerConfig, StaticFiles};

// environment variables prefixed like KSAH_PORT feed the same option table
// as the command line, with the command line taking precedence.
const ENV_PREFIX: &str = "KSAH_";

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut config = ServerConfig::default();

    for (key, value) in std::env::vars() {
        if let Some(name) = key.strip_prefix(ENV_PREFIX) {
            config.apply(&name.to_ascii_lowercase(), &value);
        }
    }

    let args = std::env::args().skip(1).collect::<Vec<_>>();
    if args.len() % 2 != 0 {
        error!("options must come in <name> <value> pairs");
        return ExitCode::FAILURE;
    }
    for pair in args.chunks(2) {
        config.apply(&pair[0], &pair[1]);
    }

    if config.port.is_none() {
        error!("the port option is mandatory");
        return ExitCode::FAILURE;
    }

    let files = StaticFiles::new(&config);

    let server = match Server::bind(config) {
        Ok(server) => server,
        Err(e) => {
            error!("failed to bind: {e}");
            return ExitCode::FAILURE;
        }
    };

    match server.run(files) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("server failed: {e}");
            ExitCode::FAILURE
        }
    }
}
