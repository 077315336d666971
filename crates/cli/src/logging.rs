use std::env;

use tracing_subscriber::EnvFilter;

pub const VERBOSE_ENV: &str = "DPROC_VERBOSE";

pub fn init(verbose: bool) {
    let verbose = verbose || env::var(VERBOSE_ENV).is_ok_and(|value| is_truthy(&value));
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
