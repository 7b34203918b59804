use tracing_subscriber::EnvFilter;

/// Initialize logging from the `-v` count: warn by default, `-v` for
/// info, `-vv` for debug. `RUST_LOG` overrides when set.
pub fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("visor={level},visor_cli={level}")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
