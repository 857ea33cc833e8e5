// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Runs a [`FlowMgmtManager`] as a task fed through a request channel.
//!
//! Requests from any number of flow table workers are serialized through a single queue, so
//! the manager itself needs no locking besides the one guarding it against readers.

use concurrency::sync::{Arc, RwLock};
use kanal::ReceiveError;
use tracing::{debug, error, info, trace};

use crate::config::FlowMgmtConfig;
use crate::errors::FlowMgmtError;
use crate::event::FlowTableEvent;
use crate::manager::FlowMgmtManager;
use crate::request::FlowMgmtRequest;

/// Sending side of the request queue.
#[derive(Debug, Clone)]
pub struct FlowMgmtHandle(kanal::Sender<FlowMgmtRequest>);

impl FlowMgmtHandle {
    /// Queue a request, waiting for room.
    ///
    /// # Errors
    ///
    /// Fails if the service is gone.
    pub fn enqueue(&self, request: FlowMgmtRequest) -> Result<(), FlowMgmtError> {
        self.0
            .send(request)
            .map_err(|_| FlowMgmtError::RequestChannelClosed)
    }

    /// Queue a request if there is room. Returns false if the queue is full.
    ///
    /// # Errors
    ///
    /// Fails if the service is gone.
    pub fn try_enqueue(&self, request: FlowMgmtRequest) -> Result<bool, FlowMgmtError> {
        self.0
            .try_send(request)
            .map_err(|_| FlowMgmtError::RequestChannelClosed)
    }

    /// # Errors
    ///
    /// Fails if the service is gone.
    pub async fn enqueue_async(&self, request: FlowMgmtRequest) -> Result<(), FlowMgmtError> {
        self.0
            .as_async()
            .send(request)
            .await
            .map_err(|_| FlowMgmtError::RequestChannelClosed)
    }
}

/// Receiving side of the events the manager sends to the flow table.
#[derive(Debug)]
pub struct FlowEventReader(kanal::Receiver<FlowTableEvent>);

impl FlowEventReader {
    /// # Errors
    ///
    /// Fails once the service is gone and every pending event was received.
    pub fn recv(&self) -> Result<FlowTableEvent, FlowMgmtError> {
        self.0.recv().map_err(|_| FlowMgmtError::EventChannelClosed)
    }

    /// # Errors
    ///
    /// Fails once the service is gone and every pending event was received.
    pub async fn recv_async(&self) -> Result<FlowTableEvent, FlowMgmtError> {
        self.0
            .as_async()
            .recv()
            .await
            .map_err(|_| FlowMgmtError::EventChannelClosed)
    }

    /// All the events pending right now.
    #[must_use]
    pub fn drain(&self) -> Vec<FlowTableEvent> {
        let mut events = vec![];
        while let Ok(Some(event)) = self.0.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Read access to the manager state, for introspection.
#[derive(Debug, Clone)]
pub struct FlowMgmtReader(Arc<RwLock<FlowMgmtManager>>);

impl FlowMgmtReader {
    pub fn with<R>(&self, f: impl FnOnce(&FlowMgmtManager) -> R) -> R {
        let mgr = self.0.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mgr)
    }
}

#[derive(Debug)]
pub struct FlowMgmtService {
    mgr: Arc<RwLock<FlowMgmtManager>>,
    requests: kanal::Receiver<FlowMgmtRequest>,
    events: kanal::Sender<FlowTableEvent>,
}

impl FlowMgmtService {
    #[tracing::instrument(level = "info")]
    #[must_use]
    pub fn new(
        config: &FlowMgmtConfig,
    ) -> (Self, FlowMgmtHandle, FlowEventReader, FlowMgmtReader) {
        let (req_tx, req_rx) = kanal::bounded(config.queue_capacity);
        let (ev_tx, ev_rx) = kanal::bounded(config.event_capacity);
        let mgr = Arc::new(RwLock::new(FlowMgmtManager::new()));
        let service = Self {
            mgr: Arc::clone(&mgr),
            requests: req_rx,
            events: ev_tx,
        };
        (
            service,
            FlowMgmtHandle(req_tx),
            FlowEventReader(ev_rx),
            FlowMgmtReader(mgr),
        )
    }

    fn apply(&self, request: FlowMgmtRequest) -> Vec<FlowTableEvent> {
        let mut mgr = self
            .mgr
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        mgr.process(request);
        mgr.take_events()
    }

    /// Process requests until every [`FlowMgmtHandle`] is dropped.
    ///
    /// # Errors
    ///
    /// Fails if the event reader goes away while the service still has events to deliver.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn run(self) -> Result<(), FlowMgmtError> {
        info!("started flow management");
        loop {
            let request = match self.requests.as_async().recv().await {
                Ok(request) => request,
                // the receiver is never closed here: a closed queue means that every
                // handle is gone, whether the service was parked in recv() or not
                Err(ReceiveError::SendClosed | ReceiveError::Closed) => {
                    info!("all flow management senders are closed");
                    return Ok(());
                }
            };
            trace!("processing {request:?}");
            let events = self.apply(request);
            debug!("sending {} flow events", events.len());
            for event in events {
                if self.events.as_async().send(event).await.is_err() {
                    error!("flow event reader is gone");
                    return Err(FlowMgmtError::EventChannelClosed);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::FlowTableAction;
    use crate::key::FlowMgmtKey;
    use crate::request::{FlowDescriptor, ObjectEvent};
    use flow_info::{FlowFlags, FlowIndex};
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use uuid::Uuid;

    #[tokio::test]
    async fn service_round_trip() {
        let config = FlowMgmtConfig::builder().queue_capacity(4).build().unwrap();
        let (service, handle, events, reader) = FlowMgmtService::new(&config);
        let task = tokio::spawn(service.run());

        let vn = FlowMgmtKey::Vn(Uuid::from_u128(1));
        handle
            .enqueue_async(FlowMgmtRequest::AddFlow(
                FlowDescriptor::new(
                    FlowIndex(3),
                    FlowFlags::INGRESS_DIR,
                    "10.0.0.1".parse().unwrap(),
                    "10.0.0.2".parse().unwrap(),
                )
                .with_key(vn.clone()),
            ))
            .await
            .unwrap();
        handle
            .enqueue_async(
                ObjectEvent::Deleted {
                    key: vn.clone(),
                    gen_id: 1,
                }
                .into(),
            )
            .await
            .unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), events.recv_async())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            FlowTableEvent::flow(FlowTableAction::Delete, FlowIndex(3), &vn)
        );
        assert_eq!(reader.with(FlowMgmtManager::flow_count), 1);

        drop(handle);
        let done = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(done, Ok(()));
        assert!(events.drain().is_empty());
    }

    #[tokio::test]
    async fn idle_service_stops_when_handles_drop() {
        let (service, handle, events, reader) = FlowMgmtService::new(&FlowMgmtConfig::default());
        let task = tokio::spawn(service.run());
        handle
            .enqueue_async(FlowMgmtRequest::AddFlow(
                FlowDescriptor::new(
                    FlowIndex(1),
                    FlowFlags::empty(),
                    "10.0.0.1".parse().unwrap(),
                    "10.0.0.2".parse().unwrap(),
                )
                .with_key(FlowMgmtKey::Vn(Uuid::from_u128(2))),
            ))
            .await
            .unwrap();
        // let the service drain the queue and park in recv()
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(reader.with(FlowMgmtManager::flow_count), 1);

        drop(handle);
        let done = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(done, Ok(()));
        assert!(events.drain().is_empty());
    }

    #[tokio::test]
    async fn service_stops_without_event_reader() {
        let (service, handle, events, _reader) = FlowMgmtService::new(&FlowMgmtConfig::default());
        drop(events);
        handle
            .enqueue_async(
                ObjectEvent::Deleted {
                    key: FlowMgmtKey::NextHop(1),
                    gen_id: 1,
                }
                .into(),
            )
            .await
            .unwrap();
        assert_eq!(service.run().await, Err(FlowMgmtError::EventChannelClosed));
    }
}
