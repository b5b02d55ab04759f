use std::sync::{Arc, OnceLock};

/// Runtime used to clean up the test environment from synchronous drops.
pub fn tokio_runtime() -> Arc<tokio::runtime::Runtime> {
    static RUNTIME_ONCE: OnceLock<Arc<tokio::runtime::Runtime>> = OnceLock::new();
    RUNTIME_ONCE
        .get_or_init(|| {
            Arc::new(
                tokio::runtime::Builder::new_multi_thread()
                    .worker_threads(2)
                    .enable_all()
                    .build()
                    .unwrap(),
            )
        })
        .clone()
}
