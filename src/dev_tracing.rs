/// Install a `tracing` fmt subscriber filtered by `RUST_LOG`.
///
/// Tests call this first so `RUST_LOG=pluvio_zsock=trace cargo test` shows
/// every loop iteration. Does nothing when `RUST_LOG` is unset or a global
/// subscriber already exists.
pub fn init_tracing() {
    if std::env::var_os("RUST_LOG").is_none() {
        return;
    }
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
