//! Fan-out/fan-in dispatch
//!
//! Every handler registered for an endpoint runs as its own task in a
//! request-scoped [`JoinSet`]. The dispatcher consumes the aggregator's
//! completion queue until each handler has signalled completion or the fan-in
//! deadline passes, then cancels and joins whatever is still running before
//! finalizing the response.

use std::{any::Any, fmt, panic::AssertUnwindSafe, sync::Arc, time::Duration};

use futures_util::FutureExt;
use tokio::{
    task::JoinSet,
    time::{timeout, timeout_at, Instant},
};
use tracing::{info, warn};

use crate::{
    aggregator::{FinalResponse, Message, ResponseAggregator, ResponseHandle},
    errors::AppError,
    registry::{EndpointRegistry, Handler, RequestContext},
    status::{standard_table, StatusTable},
};

/// How long handlers get to react to cancellation before they are aborted.
const CANCELLATION_GRACE: Duration = Duration::from_millis(50);

pub struct Dispatcher {
    registry: Arc<EndpointRegistry>,
    statuses: Arc<StatusTable>,
    fanin_timeout: Duration,
}

impl Dispatcher {
    pub fn new(registry: EndpointRegistry, fanin_timeout: Duration) -> Self {
        Self {
            registry: Arc::new(registry),
            statuses: standard_table(),
            fanin_timeout,
        }
    }

    pub fn with_status_table(mut self, statuses: Arc<StatusTable>) -> Self {
        self.statuses = statuses;
        self
    }

    pub fn registry(&self) -> &EndpointRegistry {
        &self.registry
    }

    pub fn fanin_timeout(&self) -> Duration {
        self.fanin_timeout
    }

    pub async fn dispatch(&self, request: RequestContext) -> Result<FinalResponse, AppError> {
        let handlers = self.registry.lookup(&request.path)?;
        let expected = handlers.len();
        let endpoint: Arc<str> = Arc::from(request.path.as_str());

        info!(
            endpoint = %endpoint,
            method = %request.method,
            handlers = expected,
            "request accepted"
        );

        let mut aggregator = ResponseAggregator::new(self.statuses.clone());
        // Cancels handlers if this future is dropped mid fan-in.
        let _cancel_on_drop = aggregator.cancellation().clone().drop_guard();
        let request = Arc::new(request);

        let mut tasks = JoinSet::new();
        let mut handles = Vec::with_capacity(expected);
        for (index, handler) in handlers.iter().enumerate() {
            let label = HandlerLabel {
                endpoint: endpoint.clone(),
                position: index + 1,
                total: expected,
            };
            let handle = aggregator.handle();
            handles.push((label.clone(), handle.clone()));
            tasks.spawn(run_handler(label, handler.clone(), request.clone(), handle));
        }

        let deadline = Instant::now() + self.fanin_timeout;
        let mut completed = 0;
        let mut timed_out = false;
        while completed < expected {
            let message = if timed_out {
                match aggregator.try_recv() {
                    Some(message) => message,
                    None => break,
                }
            } else {
                match timeout_at(deadline, aggregator.recv()).await {
                    Ok(Some(message)) => message,
                    Ok(None) => break,
                    Err(_) => {
                        timed_out = true;
                        continue;
                    }
                }
            };

            match message {
                Message::Content(value) => aggregator.push_content(value),
                Message::Complete => completed += 1,
            }
        }

        // Decided before cancellation: a handler completing in the grace
        // period still missed the deadline.
        let missed: Vec<HandlerLabel> = if completed < expected {
            handles
                .iter()
                .filter(|(_, handle)| !handle.is_complete())
                .map(|(label, _)| label.clone())
                .collect()
        } else {
            Vec::new()
        };
        aggregator.close();

        aggregator.cancellation().cancel();
        if timeout(CANCELLATION_GRACE, join_all(&mut tasks, &endpoint))
            .await
            .is_err()
        {
            tasks.abort_all();
            join_all(&mut tasks, &endpoint).await;
        }

        if !missed.is_empty() {
            let timeout_ms = self.fanin_timeout.as_millis();
            for label in &missed {
                warn!(
                    endpoint = %endpoint,
                    handler = label.position,
                    timeout_ms,
                    "handler did not complete before fan-in deadline"
                );
                aggregator.add_error(
                    format!("{label} did not complete within {timeout_ms}ms"),
                    504,
                );
            }
        }

        info!(
            endpoint = %endpoint,
            items = aggregator.content_len(),
            completed,
            expected,
            "content collected"
        );

        let response = aggregator.finalize();
        info!(
            endpoint = %endpoint,
            status_code = response.status_code,
            raw = response.is_raw(),
            "response finalized"
        );

        Ok(response)
    }
}

#[derive(Debug, Clone)]
struct HandlerLabel {
    endpoint: Arc<str>,
    position: usize,
    total: usize,
}

impl fmt::Display for HandlerLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "handler {}/{} for {}",
            self.position, self.total, self.endpoint
        )
    }
}

async fn join_all(tasks: &mut JoinSet<()>, endpoint: &str) {
    while let Some(joined) = tasks.join_next().await {
        if let Err(err) = joined {
            if !err.is_cancelled() {
                warn!(endpoint = %endpoint, error = %err, "handler task failed to join");
            }
        }
    }
}

async fn run_handler(
    label: HandlerLabel,
    handler: Arc<dyn Handler>,
    request: Arc<RequestContext>,
    response: ResponseHandle,
) {
    let outcome = AssertUnwindSafe(handler.handle(request, response.clone()))
        .catch_unwind()
        .await;

    match outcome {
        Ok(()) if !response.is_complete() => warn!(
            endpoint = %label.endpoint,
            handler = label.position,
            "handler returned without signalling completion"
        ),
        Ok(()) => {}
        Err(panic) => {
            let reason = panic_message(panic.as_ref());
            warn!(
                endpoint = %label.endpoint,
                handler = label.position,
                reason = %reason,
                "handler panicked"
            );
            response.add_error(format!("{label} panicked: {reason}"), 500);
            response.done();
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| message.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string())
}
