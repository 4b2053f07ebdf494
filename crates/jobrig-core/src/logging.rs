/// Install a fmt subscriber for tests. Safe to call from every test: only the
/// first call in a process installs anything.
///
/// The filter comes from `RUST_LOG`, falling back to debug output for the
/// jobrig crates.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "jobrig_rendezvous=debug,jobrig_provision=debug,jobrig_scheduler=debug".into()
            }),
        )
        .with_test_writer()
        .try_init();
}
