//! Execution logging shared by the use cases

use std::fmt::Display;
use std::future::Future;
use std::time::Instant;

use tracing::{debug, error};

/// Run a use case, logging entry at debug and failure at error with elapsed time
pub async fn timed<T, E, F>(usecase: &'static str, execution: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: Display,
{
    let started = Instant::now();
    debug!(usecase, "Executing use case");

    let result = execution.await;
    match &result {
        Ok(_) => debug!(usecase, elapsed = ?started.elapsed(), "Use case completed"),
        Err(e) => error!(usecase, error = %e, elapsed = ?started.elapsed(), "Use case failed"),
    }

    result
}
