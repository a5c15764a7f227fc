//! Panic containment for engine background work
//!
//! A malformed remote event must not take the whole service down. Engine
//! tasks run through these helpers so a panic becomes a logged error that
//! the caller can turn into a pack failure.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tokio::task::JoinHandle;

/// Polls `future` to completion.
///
/// # Errors
/// - `String` - The panic message, if `future` panicked
pub async fn catch_panic<F>(future: F) -> Result<F::Output, String>
where
    F: Future,
{
    AssertUnwindSafe(future)
        .catch_unwind()
        .await
        .map_err(|payload| panic_message(payload.as_ref()))
}

/// Spawns `future` on the runtime. If it panics, the panic is logged and
/// `on_panic` receives the panic message instead of the task dying silently.
pub fn spawn_guarded<F, P>(task_name: &'static str, future: F, on_panic: P) -> JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
    P: FnOnce(String) + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(message) = catch_panic(future).await {
            tracing::error!(task = task_name, "Engine task panicked: {message}");
            on_panic(message);
        }
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
