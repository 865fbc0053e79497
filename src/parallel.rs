//! Batched execution of prepared calls.
//!
//! A connection with an attached [`Parallel`] builds each call and queues it
//! instead of sending. [`Parallel::wait`] then sends the queued requests
//! concurrently and processes each response the way a direct call would.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use log::debug;
use reqwest::Client;
use tokio::sync::Mutex;

use crate::connection::{error_check, process_response, send};
use crate::error::{Error, Result};
use crate::hooks::VerbHooks;
use crate::request::RequestContext;
use crate::response::Response;

/// A built request waiting for [`Parallel::wait`].
pub(crate) struct PendingRequest {
    pub request: RequestContext,
    pub client: Client,
    pub hooks: Arc<dyn VerbHooks>,
    pub errors: bool,
}

#[derive(Clone, Default)]
pub struct Parallel {
    queue: Arc<Mutex<Vec<PendingRequest>>>,
}

impl Parallel {
    /// An empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) async fn add_request(&self, pending: PendingRequest) {
        debug!(
            "queued {} ({}) for parallel execution",
            pending.request.verb, pending.request.request_id
        );
        self.queue.lock().await.push(pending);
    }

    /// Number of queued requests.
    pub async fn len(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// True when nothing is queued.
    pub async fn is_empty(&self) -> bool {
        self.queue.lock().await.is_empty()
    }

    /// Sends every queued request and returns the outcomes in queue order.
    ///
    /// The queue is emptied, so the batch can be reused.
    #[tracing::instrument(skip(self))]
    pub async fn wait(&self) -> Vec<Result<Response>> {
        self.dispatch(None).await
    }

    /// Like [`Parallel::wait`], but a request still unanswered after `timeout`
    /// fails with [`Error::Transport`].
    #[tracing::instrument(skip(self))]
    pub async fn wait_timeout(&self, timeout: Duration) -> Vec<Result<Response>> {
        self.dispatch(Some(timeout)).await
    }

    async fn dispatch(&self, timeout: Option<Duration>) -> Vec<Result<Response>> {
        let pending = std::mem::take(&mut *self.queue.lock().await);
        debug!("sending {} queued requests", pending.len());

        join_all(pending.into_iter().map(|p| async move {
            let http_response = match timeout {
                Some(limit) => tokio::time::timeout(limit, send(&p.client, &p.request))
                    .await
                    .map_err(|_| {
                        Error::Transport(format!("{} timed out after {:?}", p.request.verb, limit))
                    })??,
                None => send(&p.client, &p.request).await?,
            };
            let response = process_response(p.hooks.as_ref(), &p.request, http_response).await?;
            error_check(response, p.errors)
        }))
        .await
    }
}

/// Combined error message of a finished batch, if any call failed or carries errors.
pub fn batch_error(results: &[Result<Response>]) -> Option<String> {
    let errors: Vec<String> = results
        .iter()
        .filter_map(|result| match result {
            Ok(response) => response.error(),
            Err(e) => Some(e.to_string()),
        })
        .collect();

    if errors.is_empty() {
        None
    } else {
        Some(format!("parallel error:\n{}\n", errors.join("\n")))
    }
}
