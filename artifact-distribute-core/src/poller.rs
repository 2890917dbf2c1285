//! Async operation poller.
//!
//! Sleeps, then GETs the status URL: 202 keeps polling, 200 is success and
//! any other status is a failed operation. The loop is bounded by the
//! caller's deadline; running out of time yields [`PollResult::TimedOut`]
//! rather than an error. One handle is polled by exactly one task.

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::contract::{HttpRequest, HttpTransport};
use crate::error::DistributeError;
use crate::model::{OperationHandle, PollResult};

pub struct OperationPoller<'a, T: HttpTransport> {
    transport: &'a T,
    api_token: Option<String>,
}

impl<'a, T: HttpTransport> OperationPoller<'a, T> {
    pub fn new(transport: &'a T) -> Self {
        Self {
            transport,
            api_token: None,
        }
    }

    pub fn with_api_token(mut self, token: Option<String>) -> Self {
        self.api_token = token;
        self
    }

    /// Polls until a terminal state. Transport failures propagate; they are
    /// not retried here.
    pub async fn await_completion(&self, handle: &OperationHandle) -> Result<PollResult, DistributeError> {
        info!(status_url = %handle.status_url, "[POLL] Awaiting operation completion");
        let mut iterations = 0u32;

        loop {
            let now = Instant::now();
            if now >= handle.deadline {
                warn!(status_url = %handle.status_url, iterations, "[POLL] Operation timed out");
                return Ok(PollResult::TimedOut);
            }
            let remaining = handle.deadline - now;
            tokio::time::sleep(handle.poll_interval.min(remaining)).await;

            let mut request = HttpRequest::get(handle.status_url.clone());
            if let Some(token) = &self.api_token {
                request = request.header(crate::api::API_TOKEN_HEADER, token.clone());
            }
            let response = self.transport.send(request).await?;
            iterations += 1;
            debug!(iterations, status = response.status, "[POLL] Status received");

            match response.status {
                202 => continue,
                200 => {
                    info!(iterations, "[POLL] Operation completed");
                    return Ok(PollResult::Succeeded);
                }
                status => {
                    warn!(status, message = %response.message(), "[POLL] Operation failed");
                    return Ok(PollResult::Failed {
                        status,
                        message: response.message(),
                    });
                }
            }
        }
    }
}
