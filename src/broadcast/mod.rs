//! # Broadcast Module
//!
//! Shared telemetry store and fan-out to live observers.
//!
//! This module handles:
//! - Holding the last-known snapshot and connection status
//! - Registering subscribers and greeting them with the current snapshot
//! - Pushing one envelope per accepted record to every subscriber
//! - Dropping subscribers whose send fails or times out
//!
//! One mutex guards the snapshot and the registry. It is only held to copy
//! state in or out; serialization and sends happen outside it.
//!
//! Each registration also carries an async ordering gate. The greeting holds
//! it until delivered, so a record published meanwhile reaches the new
//! subscriber after the greeting, never before.

pub mod envelope;
pub mod ws;

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::join_all;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::telemetry::record::TelemetryRecord;
use envelope::{DeviceAddress, DisplayData, LinkStatus, Snapshot};

/// Anything that can receive serialized envelopes
#[async_trait]
pub trait Subscriber: Send + Sync {
    /// Deliver one envelope. An error removes the subscriber for good.
    async fn send(&self, payload: Bytes) -> Result<()>;
}

/// Registry handle for one subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

#[derive(Clone)]
struct Registration {
    id: SubscriberId,
    subscriber: Arc<dyn Subscriber>,
    order: Arc<tokio::sync::Mutex<()>>,
}

struct HubState {
    snapshot: Snapshot,
    subscribers: Vec<Registration>,
}

/// Last-known telemetry plus the set of live observers.
pub struct TelemetryHub {
    state: Mutex<HubState>,
    next_id: AtomicU64,
    send_timeout: Duration,
}

impl std::fmt::Debug for TelemetryHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryHub")
            .field("subscribers", &self.subscriber_count())
            .field("send_timeout", &self.send_timeout)
            .finish_non_exhaustive()
    }
}

impl TelemetryHub {
    /// Create a hub whose sends give up after `send_timeout`
    pub fn new(send_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(HubState {
                snapshot: Snapshot::default(),
                subscribers: Vec::new(),
            }),
            next_id: AtomicU64::new(1),
            send_timeout,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy of the current state
    pub fn snapshot(&self) -> Snapshot {
        self.lock().snapshot.clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    /// Add a subscriber and send it the current snapshot right away.
    ///
    /// If that first send fails the subscriber is removed again before
    /// this returns.
    pub async fn register(&self, subscriber: Arc<dyn Subscriber>) -> SubscriberId {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let order = Arc::new(tokio::sync::Mutex::new(()));
        // Taken before the subscriber is visible to fan-out
        let turn = order.clone().lock_owned().await;
        let registration = Registration {
            id,
            subscriber,
            order,
        };
        let snapshot = {
            let mut state = self.lock();
            state.subscribers.push(registration.clone());
            state.snapshot.clone()
        };
        info!("Subscriber {:?} registered", id);

        let delivered = match encode(&snapshot) {
            Some(payload) => self.send_bounded(&registration.subscriber, payload).await,
            None => false,
        };
        drop(turn);
        if !delivered {
            self.unregister(id);
        }
        id
    }

    /// Remove a subscriber; unknown ids are ignored
    pub fn unregister(&self, id: SubscriberId) {
        let removed = {
            let mut state = self.lock();
            let before = state.subscribers.len();
            state.subscribers.retain(|r| r.id != id);
            before != state.subscribers.len()
        };
        if removed {
            info!("Subscriber {:?} removed", id);
        }
    }

    /// Store a new record and push it to every subscriber
    pub async fn publish(&self, record: &TelemetryRecord) {
        let data = DisplayData::from_record(record);
        let (snapshot, targets) = {
            let mut state = self.lock();
            state.snapshot.data = data;
            (state.snapshot.clone(), state.subscribers.clone())
        };
        self.fan_out(&snapshot, targets).await;
    }

    /// Update connection status; pushes an envelope only when it changed
    pub async fn set_link_status(&self, connected: bool, address: DeviceAddress) {
        let status = LinkStatus { connected, address };
        let update = {
            let mut state = self.lock();
            if state.snapshot.status == status {
                None
            } else {
                state.snapshot.status = status;
                Some((state.snapshot.clone(), state.subscribers.clone()))
            }
        };
        if let Some((snapshot, targets)) = update {
            debug!(
                "Link status: connected={} port={}",
                snapshot.status.connected,
                snapshot.status.address.as_str()
            );
            self.fan_out(&snapshot, targets).await;
        }
    }

    async fn fan_out(&self, snapshot: &Snapshot, targets: Vec<Registration>) {
        if targets.is_empty() {
            return;
        }
        let Some(payload) = encode(snapshot) else {
            return;
        };

        let sends = targets.iter().map(|target| {
            let payload = payload.clone();
            async move { (target.id, self.deliver(target, payload).await) }
        });
        let failed: Vec<SubscriberId> = join_all(sends)
            .await
            .into_iter()
            .filter_map(|(id, ok)| (!ok).then_some(id))
            .collect();

        if !failed.is_empty() {
            let mut state = self.lock();
            state.subscribers.retain(|r| !failed.contains(&r.id));
            drop(state);
            warn!("Dropped {} unresponsive subscriber(s)", failed.len());
        }
    }

    /// Send after any in-flight greeting for this subscriber
    async fn deliver(&self, target: &Registration, payload: Bytes) -> bool {
        let _turn = target.order.lock().await;
        self.send_bounded(&target.subscriber, payload).await
    }

    async fn send_bounded(&self, subscriber: &Arc<dyn Subscriber>, payload: Bytes) -> bool {
        match tokio::time::timeout(self.send_timeout, subscriber.send(payload)).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                debug!("Subscriber send failed: {}", e);
                false
            }
            Err(_) => {
                debug!("Subscriber send timed out after {:?}", self.send_timeout);
                false
            }
        }
    }
}

fn encode(snapshot: &Snapshot) -> Option<Bytes> {
    match snapshot.to_envelope() {
        Ok(bytes) => Some(Bytes::from(bytes)),
        Err(e) => {
            error!("Failed to serialize envelope: {}", e);
            None
        }
    }
}


#[cfg(test)]
mod tests {
    use super::mocks::MockSubscriber;
    use super::*;
    use crate::telemetry::parser::TelemetryParser;

    const FRAME: &str =
        "5.2,-3.1,45.8,125.5,15.3,0.5,0.2,9.8,101325.0,22.5,1,8,37.123456,-122.345678,130.2,12.5,3.85,-95";

    fn frame_with_pitch(pitch: u32) -> String {
        let mut fields: Vec<String> = FRAME.split(',').map(str::to_string).collect();
        fields[0] = pitch.to_string();
        fields.join(",")
    }

    fn hub() -> TelemetryHub {
        TelemetryHub::new(Duration::from_millis(100))
    }

    #[tokio::test]
    async fn test_register_sends_current_snapshot() {
        let hub = hub();
        let record = TelemetryParser::new().parse(FRAME).unwrap();
        hub.publish(&record).await;

        let sub = MockSubscriber::new();
        hub.register(sub.clone()).await;

        let envelopes = sub.envelopes();
        assert_eq!(envelopes.len(), 1);
        assert_eq!(envelopes[0]["data"]["pitch"], "5.2");
        assert_eq!(hub.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_register_before_any_data_gets_defaults() {
        let hub = hub();
        let sub = MockSubscriber::new();
        hub.register(sub.clone()).await;
        let envelopes = sub.envelopes();
        assert_eq!(envelopes[0]["data"]["altitude"], "0.0");
        assert_eq!(envelopes[0]["status"]["connected"], false);
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_published_during_greeting_arrives_after_it() {
        let hub = Arc::new(hub());
        let sub = MockSubscriber::new();
        sub.delay_next_send(Duration::from_millis(50));

        let registering = {
            let hub = hub.clone();
            let sub = sub.clone();
            tokio::spawn(async move { hub.register(sub).await })
        };
        while hub.subscriber_count() == 0 {
            tokio::task::yield_now().await;
        }

        let record = TelemetryParser::new().parse(FRAME).unwrap();
        hub.publish(&record).await;
        registering.await.unwrap();

        let envelopes = sub.envelopes();
        assert_eq!(envelopes.len(), 2);
        assert_eq!(envelopes[0]["data"]["pitch"], "0.0");
        assert_eq!(envelopes[1]["data"]["pitch"], "5.2");
        assert_eq!(hub.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_greeting_unregisters() {
        let hub = hub();
        let sub = MockSubscriber::new();
        sub.set_fail(true);
        hub.register(sub.clone()).await;
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_each_subscriber_gets_every_record_in_order() {
        let hub = hub();
        let subs: Vec<_> = (0..3).map(|_| MockSubscriber::new()).collect();
        for sub in &subs {
            hub.register(sub.clone()).await;
        }

        let mut parser = TelemetryParser::new();
        for pitch in 1..=5 {
            hub.publish(&parser.parse(&frame_with_pitch(pitch)).unwrap()).await;
        }

        for sub in &subs {
            let envelopes = sub.envelopes();
            // greeting + 5 records
            assert_eq!(envelopes.len(), 6);
            let pitches: Vec<&str> = envelopes[1..]
                .iter()
                .map(|e| e["data"]["pitch"].as_str().unwrap())
                .collect();
            assert_eq!(pitches, vec!["1.0", "2.0", "3.0", "4.0", "5.0"]);
        }
    }

    #[tokio::test]
    async fn test_failed_subscriber_removed_others_continue() {
        let hub = hub();
        let good_a = MockSubscriber::new();
        let bad = MockSubscriber::new();
        let good_b = MockSubscriber::new();
        hub.register(good_a.clone()).await;
        hub.register(bad.clone()).await;
        hub.register(good_b.clone()).await;

        let mut parser = TelemetryParser::new();
        hub.publish(&parser.parse(FRAME).unwrap()).await;
        bad.set_fail(true);
        hub.publish(&parser.parse(FRAME).unwrap()).await;
        assert_eq!(hub.subscriber_count(), 2);

        // Recovered transport is not re-added
        bad.set_fail(false);
        hub.publish(&parser.parse(FRAME).unwrap()).await;
        hub.publish(&parser.parse(FRAME).unwrap()).await;

        assert_eq!(good_a.count(), 5);
        assert_eq!(good_b.count(), 5);
        assert_eq!(bad.count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_subscriber_times_out() {
        let hub = hub();
        let good = MockSubscriber::new();
        let stuck = MockSubscriber::new();
        hub.register(good.clone()).await;
        hub.register(stuck.clone()).await;
        stuck.set_stall(true);

        let record = TelemetryParser::new().parse(FRAME).unwrap();
        hub.publish(&record).await;

        assert_eq!(good.count(), 2);
        assert_eq!(hub.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_link_status_change_broadcasts_once() {
        let hub = hub();
        let sub = MockSubscriber::new();
        hub.register(sub.clone()).await;

        let port = DeviceAddress::Port("/dev/ttyACM0".to_string());
        hub.set_link_status(true, port.clone()).await;
        hub.set_link_status(true, port).await;

        let envelopes = sub.envelopes();
        assert_eq!(envelopes.len(), 2);
        assert_eq!(envelopes[1]["status"]["connected"], true);
        assert_eq!(envelopes[1]["status"]["port"], "/dev/ttyACM0");
        assert!(hub.snapshot().status.connected);
    }

    #[tokio::test]
    async fn test_unregister_unknown_is_noop() {
        let hub = hub();
        let sub = MockSubscriber::new();
        let id = hub.register(sub).await;
        hub.unregister(id);
        hub.unregister(id);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_snapshot_is_a_copy() {
        let hub = hub();
        let before = hub.snapshot();
        hub.publish(&TelemetryParser::new().parse(FRAME).unwrap()).await;
        assert_eq!(before.data, DisplayData::default());
        assert_ne!(hub.snapshot().data, before.data);
    }
}
