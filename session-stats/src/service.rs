// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Runs a [`SessionAggregator`] as a task: session adds and deletes come in on a channel and
//! the export scan runs every `interval_ms`.

use std::time::Duration;

use concurrency::sync::{Arc, RwLock};
use flow_info::{KernelFlowSource, RevFlowDepParams};
use kanal::ReceiveError;
use tokio::time::Instant;
use tracing::{debug, error, info, trace};

use crate::aggregator::SessionAggregator;
use crate::config::SessionStatsConfig;
use crate::errors::SessionStatsError;
use crate::export::SessionExportSink;
use crate::keys::SessionFlow;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatsRequest {
    AddSession {
        flow: Box<SessionFlow>,
        setup_time: u64,
    },
    DeleteSession {
        flow: Box<SessionFlow>,
        teardown_time: u64,
        rev_params: RevFlowDepParams,
    },
}

/// Sending side of the request queue.
#[derive(Debug, Clone)]
pub struct SessionStatsHandle(kanal::Sender<SessionStatsRequest>);

impl SessionStatsHandle {
    /// # Errors
    ///
    /// Fails if the service is gone.
    pub fn enqueue(&self, request: SessionStatsRequest) -> Result<(), SessionStatsError> {
        self.0
            .send(request)
            .map_err(|_| SessionStatsError::RequestChannelClosed)
    }

    /// # Errors
    ///
    /// Fails if the service is gone.
    pub async fn enqueue_async(&self, request: SessionStatsRequest) -> Result<(), SessionStatsError> {
        self.0
            .as_async()
            .send(request)
            .await
            .map_err(|_| SessionStatsError::RequestChannelClosed)
    }
}

/// Read access to the aggregator, for introspection.
#[derive(Debug, Clone)]
pub struct SessionStatsReader(Arc<RwLock<SessionAggregator>>);

impl SessionStatsReader {
    pub fn with<R>(&self, f: impl FnOnce(&SessionAggregator) -> R) -> R {
        let aggregator = self.0.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&aggregator)
    }
}

#[derive(Debug)]
pub struct SessionStatsService<S, K> {
    aggregator: Arc<RwLock<SessionAggregator>>,
    interval: Duration,
    sink: S,
    kernel: K,
    requests: kanal::Receiver<SessionStatsRequest>,
}

impl<S: SessionExportSink, K: KernelFlowSource> SessionStatsService<S, K> {
    #[must_use]
    pub fn new(
        config: &SessionStatsConfig,
        sink: S,
        kernel: K,
    ) -> (Self, SessionStatsHandle, SessionStatsReader) {
        let (tx, rx) = kanal::bounded(config.queue_capacity);
        let aggregator = Arc::new(RwLock::new(SessionAggregator::new(config)));
        let service = Self {
            aggregator: Arc::clone(&aggregator),
            interval: Duration::from_millis(config.interval_ms),
            sink,
            kernel,
            requests: rx,
        };
        (service, SessionStatsHandle(tx), SessionStatsReader(aggregator))
    }

    fn with_aggregator<R>(&self, f: impl FnOnce(&mut SessionAggregator) -> R) -> R {
        let mut aggregator = self
            .aggregator
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut aggregator)
    }

    fn handle(&self, request: SessionStatsRequest) {
        trace!("session request: {request:?}");
        match request {
            SessionStatsRequest::AddSession { flow, setup_time } => {
                self.with_aggregator(|a| a.add_session(&flow, setup_time));
            }
            SessionStatsRequest::DeleteSession {
                flow,
                teardown_time,
                rev_params,
            } => {
                if let Err(e) = self.with_aggregator(|a| {
                    a.delete_session(&flow, teardown_time, rev_params, &self.kernel)
                }) {
                    error!("session delete failed: {e}");
                }
            }
        }
    }

    /// Process requests and export sessions until every [`SessionStatsHandle`] is dropped.
    /// A last scan runs on the way out so that pending deletes are exported.
    ///
    /// # Errors
    ///
    /// Does not fail at present: a closed request queue is the normal way out.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn run(mut self) -> Result<(), SessionStatsError> {
        info!("started session stats");
        let mut next_pass = Instant::now() + self.interval;
        loop {
            tokio::select! {
                () = tokio::time::sleep_until(next_pass) => {
                    Self::scan(&self.aggregator, &self.kernel, &mut self.sink);
                    next_pass = Instant::now() + self.interval;
                }
                request = self.requests.as_async().recv() => {
                    match request {
                        Ok(request) => self.handle(request),
                        // also reported as Closed when the last handle drops while parked
                        Err(ReceiveError::SendClosed | ReceiveError::Closed) => {
                            info!("all session stats handles are closed");
                            Self::scan(&self.aggregator, &self.kernel, &mut self.sink);
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    fn scan(aggregator: &RwLock<SessionAggregator>, kernel: &K, sink: &mut S) {
        let mut aggregator = aggregator
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let report = aggregator.run_pass(kernel, sink);
        if report.exported > 0 {
            debug!("{} sessions exported", report.exported);
        }
    }
}
