use tracing_subscriber::EnvFilter;

pub(crate) fn default_filter(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "warn,apkroot_installer=info,apkroot_cli=info",
        _ => "debug",
    }
}

/// Sends diagnostics to stderr. `RUST_LOG` overrides `-v`.
pub(crate) fn init_tracing(verbosity: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(verbosity)));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
