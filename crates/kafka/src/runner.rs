//! Timeout-bounded execution of a single broker operation.
//!
//! This is the only place timeout policy lives. Every service call goes
//! through [`run_with_timeout`], which turns any outcome into a
//! [`ServiceResult`]:
//!
//! - completion yields `Ok(value)`
//! - running past the timeout drops (cancels) the work and yields `ServiceError::Timeout`
//! - a client error yields `ServiceError::OperationFailed` carrying the error as its cause
//!
//! Cancellation by the caller is dropping the returned future. It never
//! reaches this function as a value, so it is never reported as a failure.

use kafka_types::{ServiceError, ServiceResult};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::Result;

pub async fn run_with_timeout<T, F>(operation: &str, timeout: Duration, work: F) -> ServiceResult<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, work).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => {
            debug!("{operation} failed: {err}");
            Err(ServiceError::from_cause(operation, err))
        }
        Err(_) => {
            warn!("{operation} timed out after {timeout:?}");
            Err(ServiceError::timeout(operation, timeout))
        }
    }
}
