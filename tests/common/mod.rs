use tracing_subscriber::EnvFilter;

/// Routes the events of the managers to the test output. Set `RUST_LOG` to see them.
pub fn setup_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
