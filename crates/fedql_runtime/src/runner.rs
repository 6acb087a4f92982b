//! The dependency-aware concurrent executor driver.
//!
//! Two cooperating workers drive a query to completion. The scheduler owns
//! the [`State`]: it hands out statements whose dependencies are done,
//! re-resolves chained values as results arrive, and folds results back in.
//! The dispatcher consumes scheduled statements and performs the transport
//! calls, one task per in-flight request. The outer coordinator resolves on
//! whichever comes first: the final output, an aborting error, or the query
//! deadline.
//!
//! Workers communicate exclusively over channels; a watch flag is the
//! cancellation signal, observed by every task at its next channel
//! operation.

use crate::error::QueryError;
use crate::executor::StatementExecutor;
use crate::modifiers::{apply_encoders, apply_modifiers};
use crate::multiplex::{multiplex_statements, unwrap_no_multiplex};
use crate::query::{
    resources_from_query, Query, QueryContext, Resource, ResourceId, ResourceResult,
    ResourceResults, Resources,
};
use crate::resolver::{resolve_chained_values, resolve_variables, validate_chained_values};
use crate::state::State;
use crate::transport::Transport;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tracing::debug;

/// Capacity of the request and result channels.
const CHANNEL_CAPACITY: usize = 10;

/// A scheduled statement on its way to the dispatcher.
struct Request {
    id: ResourceId,
    resource: Resource,
}

/// A completed statement on its way back to the scheduler.
struct ResultMsg {
    id: ResourceId,
    result: ResourceResult,
}

/// Runs queries to completion against a transport.
pub struct Runner {
    executor: Arc<StatementExecutor>,
    global_timeout: Duration,
}

impl Runner {
    /// Creates a runner. `global_timeout` bounds queries that do not carry
    /// a `use timeout` of their own.
    pub fn new(transport: Arc<dyn Transport>, global_timeout: Duration) -> Self {
        Self {
            executor: Arc::new(StatementExecutor::new(transport)),
            global_timeout,
        }
    }

    /// Executes a query and returns its results keyed by resource
    /// identifier.
    ///
    /// On deadline the error carries the partial snapshot of everything
    /// that had completed.
    pub async fn execute_query(
        &self,
        query: Query,
        query_ctx: QueryContext,
    ) -> Result<ResourceResults, QueryError> {
        let timeout = query
            .timeout_ms()
            .map(Duration::from_millis)
            .unwrap_or(self.global_timeout);

        let resources = initialize_resources(&query, &query_ctx)?;
        let state = Arc::new(Mutex::new(State::new(resources)));

        let (request_tx, request_rx) = mpsc::channel::<Request>(CHANNEL_CAPACITY);
        let (result_tx, result_rx) = mpsc::channel::<ResultMsg>(CHANNEL_CAPACITY);
        let (output_tx, output_rx) = oneshot::channel::<ResourceResults>();
        let (error_tx, mut error_rx) = mpsc::channel::<QueryError>(1);
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let scheduler = StateWorker {
            state: Arc::clone(&state),
            request_tx,
            result_rx,
            output_tx,
            cancel: cancel_rx.clone(),
        };
        let dispatcher = RequestWorker {
            request_rx,
            result_tx,
            error_tx,
            executor: Arc::clone(&self.executor),
            ctx: Arc::new(query_ctx),
            cancel: cancel_rx,
        };

        tokio::spawn(scheduler.run());
        tokio::spawn(dispatcher.run());

        let result = tokio::select! {
            output = output_rx => output
                .map_err(|_| QueryError::Internal("scheduler exited without output".into())),
            Some(err) = error_rx.recv() => {
                debug!(error = %err, "query aborted");
                Err(err)
            }
            _ = tokio::time::sleep(timeout) => {
                debug!(timeout_ms = timeout.as_millis() as u64, "query timed out");
                let partial = state.lock().await.snapshot();
                Err(QueryError::Timeout { partial })
            }
        };

        // Whatever resolved the call, wind down every remaining task.
        let _ = cancel_tx.send(true);
        result
    }
}

/// Resolves variables, validates chains, applies modifiers and encoders,
/// and multiplexes list parameters.
pub fn initialize_resources(
    query: &Query,
    ctx: &QueryContext,
) -> Result<Resources, QueryError> {
    let resources = resources_from_query(query);
    let resources = resolve_variables(resources, &ctx.input);
    validate_chained_values(&resources)?;
    let resources = apply_modifiers(resources, &query.modifiers);
    let resources = apply_encoders(resources);
    Ok(multiplex_statements(resources))
}

/// The scheduler: owns the state and drives it to completion.
struct StateWorker {
    state: Arc<Mutex<State>>,
    request_tx: mpsc::Sender<Request>,
    result_rx: mpsc::Receiver<ResultMsg>,
    output_tx: oneshot::Sender<ResourceResults>,
    cancel: watch::Receiver<bool>,
}

impl StateWorker {
    async fn run(mut self) {
        loop {
            let (available, done) = {
                let mut state = self.state.lock().await;
                if state.has_finished() {
                    break;
                }
                let available = state.available();
                for id in available.keys() {
                    state.set_as_requested(id);
                }
                (available, state.done())
            };

            // Dependencies completed since initialization: substitute their
            // data, re-encode, and expand any lists that substitution
            // produced.
            let available = resolve_chained_values(available, &done);
            let available = apply_encoders(available);
            let available = multiplex_statements(available);
            let available = unwrap_no_multiplex(available);

            for (id, resource) in available {
                let request_tx = self.request_tx.clone();
                let mut cancel = self.cancel.clone();
                // The bounded send may suspend; keep consuming results
                // meanwhile and abandon the send on cancellation.
                tokio::spawn(async move {
                    tokio::select! {
                        _ = request_tx.send(Request { id, resource }) => {}
                        _ = cancel.changed() => {}
                    }
                });
            }

            tokio::select! {
                result = self.result_rx.recv() => {
                    let Some(result) = result else { return };
                    self.state.lock().await.update_done(result.id, result.result);
                }
                _ = self.cancel.changed() => return,
            }
        }

        let output = self.state.lock().await.snapshot();
        let _ = self.output_tx.send(output);
    }
}

/// The dispatcher: performs transport calls, one task per request.
struct RequestWorker {
    request_rx: mpsc::Receiver<Request>,
    result_tx: mpsc::Sender<ResultMsg>,
    error_tx: mpsc::Sender<QueryError>,
    executor: Arc<StatementExecutor>,
    ctx: Arc<QueryContext>,
    cancel: watch::Receiver<bool>,
}

impl RequestWorker {
    async fn run(mut self) {
        loop {
            tokio::select! {
                request = self.request_rx.recv() => {
                    let Some(request) = request else { return };
                    self.dispatch(request);
                }
                _ = self.cancel.changed() => return,
            }
        }
    }

    fn dispatch(&self, request: Request) {
        let executor = Arc::clone(&self.executor);
        let ctx = Arc::clone(&self.ctx);
        let result_tx = self.result_tx.clone();
        let error_tx = self.error_tx.clone();
        let mut cancel = self.cancel.clone();

        tokio::spawn(async move {
            match executor.execute(request.resource, ctx).await {
                Ok(result) => {
                    tokio::select! {
                        _ = result_tx.send(ResultMsg { id: request.id, result }) => {}
                        _ = cancel.changed() => {}
                    }
                }
                Err(err) => {
                    tokio::select! {
                        _ = error_tx.send(err) => {}
                        _ = cancel.changed() => {}
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fedql_syntax::parse_query;

    fn lower(source: &str) -> Query {
        Query::from_document(&parse_query(source).unwrap()).unwrap()
    }

    #[test]
    fn test_initialize_rejects_unknown_chain() {
        let query = lower("from sidekick with id = villain.id");
        let err = initialize_resources(&query, &QueryContext::default()).unwrap_err();
        assert!(matches!(err, QueryError::Validation(_)));
    }

    #[test]
    fn test_initialize_multiplexes_lists() {
        let query = lower("from hero with id = [1, 2]");
        let resources = initialize_resources(&query, &QueryContext::default()).unwrap();
        assert!(matches!(
            resources[&ResourceId::from("hero")],
            Resource::Many(_)
        ));
    }

    #[test]
    fn test_query_timeout_prefers_use_clause() {
        let query = lower("use timeout 50\nfrom hero");
        assert_eq!(query.timeout_ms(), Some(50));
    }
}
