use tracing_subscriber::EnvFilter;

/// Route engine logs through the test harness. Filter with `RUST_LOG`,
/// e.g. `RUST_LOG=ocn_clusters=debug`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
