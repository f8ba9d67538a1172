use std::sync::Once;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

static INIT: Once = Once::new();

/// Install the stderr subscriber.
///
/// `RECOMPRESS_LOG` takes the usual directive syntax, e.g.
/// `RECOMPRESS_LOG=recompress::search=debug,recompress::process=trace`.
/// Falls back to `recompress=info` when unset or invalid. Safe to call more
/// than once.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env("RECOMPRESS_LOG")
            .unwrap_or_else(|_| EnvFilter::new("recompress=info"));

        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true),
            )
            .with(filter)
            .init();
    });
}
