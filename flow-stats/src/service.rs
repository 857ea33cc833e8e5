// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Runs a [`FlowStatsCollector`] as a task: requests from the flow table come in on one
//! channel, aging passes run on the adaptive timer and aged flows go out on another channel.

use std::time::Duration;

use concurrency::sync::{Arc, RwLock};
use flow_info::{KernelFlowSource, utc_usec};
use kanal::ReceiveError;
use tokio::time::Instant;
use tracing::{debug, error, info, trace};

use crate::collector::{AgedFlow, FlowStatsCollector, FlowStatsRequest};
use crate::config::FlowAgingConfig;
use crate::errors::FlowStatsError;
use crate::export::FlowExportSink;

/// Period of the sampling threshold update.
pub const THRESHOLD_UPDATE_INTERVAL: Duration = Duration::from_secs(2);

/// Sending side of the request queue.
#[derive(Debug, Clone)]
pub struct FlowStatsHandle(kanal::Sender<FlowStatsRequest>);

impl FlowStatsHandle {
    /// # Errors
    ///
    /// Fails if the service is gone.
    pub fn enqueue(&self, request: FlowStatsRequest) -> Result<(), FlowStatsError> {
        self.0
            .send(request)
            .map_err(|_| FlowStatsError::RequestChannelClosed)
    }

    /// # Errors
    ///
    /// Fails if the service is gone.
    pub async fn enqueue_async(&self, request: FlowStatsRequest) -> Result<(), FlowStatsError> {
        self.0
            .as_async()
            .send(request)
            .await
            .map_err(|_| FlowStatsError::RequestChannelClosed)
    }
}

/// Flows the aging passes want deleted, one batch per pass.
#[derive(Debug)]
pub struct AgedFlowReader(kanal::Receiver<Vec<AgedFlow>>);

impl AgedFlowReader {
    /// # Errors
    ///
    /// Fails once the service is gone and every pending batch was received.
    pub async fn recv_async(&self) -> Result<Vec<AgedFlow>, FlowStatsError> {
        self.0
            .as_async()
            .recv()
            .await
            .map_err(|_| FlowStatsError::AgedChannelClosed)
    }

    #[must_use]
    pub fn drain(&self) -> Vec<AgedFlow> {
        let mut aged = vec![];
        while let Ok(Some(batch)) = self.0.try_recv() {
            aged.extend(batch);
        }
        aged
    }
}

/// Read access to the collector, for introspection.
#[derive(Debug)]
pub struct FlowStatsReader<S>(Arc<RwLock<FlowStatsCollector<S>>>);

impl<S> Clone for FlowStatsReader<S> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<S> FlowStatsReader<S> {
    pub fn with<R>(&self, f: impl FnOnce(&FlowStatsCollector<S>) -> R) -> R {
        let collector = self.0.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&collector)
    }
}

#[derive(Debug)]
pub struct FlowStatsService<S, K> {
    collector: Arc<RwLock<FlowStatsCollector<S>>>,
    kernel: K,
    requests: kanal::Receiver<FlowStatsRequest>,
    aged: kanal::Sender<Vec<AgedFlow>>,
}

impl<S: FlowExportSink, K: KernelFlowSource> FlowStatsService<S, K> {
    #[must_use]
    pub fn new(
        config: &FlowAgingConfig,
        sink: S,
        kernel: K,
        capacity: usize,
    ) -> (Self, FlowStatsHandle, AgedFlowReader, FlowStatsReader<S>) {
        let (req_tx, req_rx) = kanal::bounded(capacity);
        let (aged_tx, aged_rx) = kanal::bounded(capacity);
        let collector = Arc::new(RwLock::new(FlowStatsCollector::new(config, sink)));
        let service = Self {
            collector: Arc::clone(&collector),
            kernel,
            requests: req_rx,
            aged: aged_tx,
        };
        (
            service,
            FlowStatsHandle(req_tx),
            AgedFlowReader(aged_rx),
            FlowStatsReader(collector),
        )
    }

    fn with_collector<R>(&self, f: impl FnOnce(&mut FlowStatsCollector<S>) -> R) -> R {
        let mut collector = self
            .collector
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut collector)
    }

    /// Run aging passes and process requests until every [`FlowStatsHandle`] is dropped.
    ///
    /// # Errors
    ///
    /// Fails if the aged flow reader goes away.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn run(self) -> Result<(), FlowStatsError> {
        info!("started flow aging");
        let interval = self.with_collector(|c| c.control().interval_ms());
        let mut next_pass = Instant::now() + Duration::from_millis(interval);
        let mut next_threshold = Instant::now() + THRESHOLD_UPDATE_INTERVAL;
        loop {
            tokio::select! {
                () = tokio::time::sleep_until(next_pass) => {
                    let report = self.with_collector(|c| {
                        let total = u64::try_from(c.flow_count()).unwrap_or(u64::MAX);
                        c.run_pass(&self.kernel, total, utc_usec())
                    });
                    next_pass = Instant::now() + Duration::from_millis(report.interval_ms);
                    if !report.aged.is_empty() {
                        debug!("{} flows aged", report.aged.len());
                        self.aged
                            .as_async()
                            .send(report.aged)
                            .await
                            .map_err(|_| FlowStatsError::AgedChannelClosed)?;
                    }
                }
                () = tokio::time::sleep_until(next_threshold) => {
                    self.with_collector(|c| c.update_export_threshold(utc_usec()));
                    next_threshold = Instant::now() + THRESHOLD_UPDATE_INTERVAL;
                }
                request = self.requests.as_async().recv() => {
                    match request {
                        Ok(request) => {
                            trace!("flow stats request: {request:?}");
                            let result =
                                self.with_collector(|c| c.handle_request(request, &self.kernel));
                            if let Err(e) = result {
                                error!("flow stats request failed: {e}");
                            }
                        }
                        // also reported as Closed when the last handle drops while parked
                        Err(ReceiveError::SendClosed | ReceiveError::Closed) => {
                            info!("all flow stats handles are closed");
                            return Ok(());
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::FlowDataRecord;
    use crate::export_info::FlowExportInfo;
    use flow_info::{FlowHandle, FlowKey, IPPROTO_UDP, KernelFlowStats};
    use std::collections::HashMap;
    use uuid::Uuid;

    fn key(n: u8) -> FlowKey {
        FlowKey::new(
            1,
            format!("10.0.0.{n}").parse().unwrap(),
            "10.1.0.1".parse().unwrap(),
            IPPROTO_UDP,
            1000,
            53,
        )
    }

    #[tokio::test]
    async fn idle_flows_are_reported() {
        let config = FlowAgingConfig::builder()
            .age_time_usec(1_000_000)
            .default_interval_ms(100)
            .build()
            .unwrap();
        let (records_tx, records_rx) = kanal::unbounded::<Vec<FlowDataRecord>>();
        let kernel: HashMap<FlowHandle, KernelFlowStats> = HashMap::new();
        let (service, handle, aged, reader) = FlowStatsService::new(&config, records_tx, kernel, 64);
        let task = tokio::spawn(service.run());

        // set up long ago
        handle
            .enqueue_async(FlowStatsRequest::AddFlow {
                key: key(1),
                info: Box::new(FlowExportInfo::new(Uuid::from_u128(1), 0)),
            })
            .await
            .unwrap();
        let batch = tokio::time::timeout(Duration::from_secs(5), aged.recv_async())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(batch[0].key, key(1));
        assert!(!batch[0].delete_reverse);

        // the flow table deletes it
        handle
            .enqueue_async(FlowStatsRequest::DeleteFlow {
                key: key(1),
                teardown_time: utc_usec(),
            })
            .await
            .unwrap();
        drop(handle);
        task.await.unwrap().unwrap();
        assert_eq!(reader.with(FlowStatsCollector::flow_count), 0);
        let mut records = vec![];
        while let Ok(Some(batch)) = records_rx.try_recv() {
            records.push(batch);
        }
        assert_eq!(records.len(), 1);
        assert!(records[0][0].teardown_time.is_some());
    }

    #[tokio::test]
    async fn idle_service_stops_when_handles_drop() {
        let config = FlowAgingConfig::builder()
            .default_interval_ms(60_000)
            .build()
            .unwrap();
        let (records_tx, _records_rx) = kanal::unbounded::<Vec<FlowDataRecord>>();
        let kernel: HashMap<FlowHandle, KernelFlowStats> = HashMap::new();
        let (service, handle, _aged, reader) = FlowStatsService::new(&config, records_tx, kernel, 8);
        let task = tokio::spawn(service.run());

        handle
            .enqueue_async(FlowStatsRequest::AddFlow {
                key: key(2),
                info: Box::new(FlowExportInfo::new(Uuid::from_u128(2), utc_usec())),
            })
            .await
            .unwrap();
        // a failing request is logged and the service keeps going
        handle
            .enqueue_async(FlowStatsRequest::UpdateFlowIndex {
                key: key(3),
                handle: FlowHandle(3),
            })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(reader.with(FlowStatsCollector::flow_count), 1);

        drop(handle);
        let done = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(done, Ok(()));
    }
}
