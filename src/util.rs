use anyhow::anyhow;
use sentry_core::protocol::SpanStatus;
use std::any::Any;
use std::future::Future;

/// Try to figure out what's in the panic payload, and print it if we can.
///
/// The actual error type we get from `panic::catch_unwind` is poorly
/// documented, so we try the types a `panic!` commonly produces.
pub(crate) fn try_to_extract_panic_info(info: &(dyn Any + Send + 'static)) -> anyhow::Error {
    if let Some(x) = info.downcast_ref::<&'static str>() {
        anyhow!("handler panicked: {x}")
    } else if let Some(x) = info.downcast_ref::<String>() {
        anyhow!("handler panicked: {x}")
    } else {
        anyhow!("handler panicked")
    }
}

/// Wraps a handler invocation in a sentry performance transaction.
pub(crate) async fn with_sentry_transaction<F, Fut, R, E>(
    transaction_name: &str,
    callback: F,
) -> Result<R, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<R, E>>,
{
    let tx_ctx = sentry_core::TransactionContext::new(transaction_name, "queue.task");
    let transaction = sentry_core::start_transaction(tx_ctx);

    let result = callback().await;

    transaction.set_status(match result {
        Ok(_) => SpanStatus::Ok,
        Err(_) => SpanStatus::UnknownError,
    });
    transaction.finish();

    result
}
