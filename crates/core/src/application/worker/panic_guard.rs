// Panic isolation for job hooks: a panicking handler must not kill the consumer loop
use crate::port::JobError;
use std::any::Any;
use std::future::Future;
use tracing::error;

/// Extract a readable message from a panic payload
pub fn panic_message(panic_info: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic_info.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic_info.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

/// Run a hook future on its own task so a panic becomes `JobError::Panicked`
///
/// # Example
/// ```text
/// let result = execute_guarded(async move { handler.handle(&payload).await }).await;
/// if let Err(JobError::Panicked(msg)) = result {
///     println!("Caught panic: {}", msg);
/// }
/// ```
pub async fn execute_guarded<F, T>(future: F) -> Result<T, JobError>
where
    F: Future<Output = Result<T, JobError>> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn(future).await {
        Ok(result) => result,
        Err(join_err) if join_err.is_panic() => {
            let panic_msg = panic_message(join_err.into_panic());
            error!(panic_msg = %panic_msg, "Job hook panicked");
            Err(JobError::Panicked(panic_msg))
        }
        Err(join_err) => Err(JobError::failed(format!("job task cancelled: {}", join_err))),
    }
}
