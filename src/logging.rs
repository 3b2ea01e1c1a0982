use std::sync::Once;

use tracing_subscriber::EnvFilter;

/// Filter directives are read from this variable before falling back to the CLI flags.
pub const ENV_LOG: &str = "CONTAINAI_LOG";

static TRACING_INIT: Once = Once::new();

/// Default directive for the given verbosity flags.
pub fn default_directive(verbose: bool, debug: bool) -> &'static str {
    if debug {
        "debug"
    } else if verbose {
        "info"
    } else {
        "warn"
    }
}

/// Install the global subscriber, writing to stderr so stdout stays clean for
/// plans and remote output. Later calls are no-ops.
pub fn init(verbose: bool, debug: bool) {
    TRACING_INIT.call_once(|| {
        let filter = EnvFilter::try_from_env(ENV_LOG)
            .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose, debug)));
        let _ = tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_env_filter(filter)
            .try_init();
    });
}
