//! Subscriber fan-out.
//!
//! ## Delivery model
//!
//! - Live messages go through a `broadcast` channel, encoded once per tick.
//!   Each subscriber has its own receive cursor, so a slow consumer lags
//!   and skips messages without blocking the tick or its peers.
//! - Final reports go through a `watch` channel holding the outstanding
//!   [`PublishedFinal`]. Every subscriber remembers the last version it
//!   delivered and sends a newer one exactly once, as a `raw_dump` followed
//!   by a `final`. A subscriber that connects while a report is outstanding
//!   receives it before anything else.
//! - Any send failure ends that subscriber's loop and removes it from the
//!   registry; nothing else is affected.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use neuro_sentry_vitals::PublishedFinal;
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::SinkError;
use crate::protocol::OutboundMessage;

/// Output side of one subscriber connection.
#[async_trait]
pub trait SubscriberSink: Send {
    /// Deliver one JSON text frame.
    async fn send_text(&mut self, text: String) -> Result<(), SinkError>;
}

/// Identifier assigned to a subscriber on registration.
pub type SubscriberId = u64;

/// Registry entry of a connected subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriberInfo {
    /// Connection time.
    pub connected_at: DateTime<Utc>,
    /// Highest final report version delivered.
    pub delivered_version: u64,
}

/// Why a subscriber loop ended.
#[derive(Debug)]
pub enum SubscriberExit {
    /// The hub or the connection was shut down.
    Cancelled,
    /// Delivery failed; the subscriber was dropped.
    Failed(SinkError),
}

/// Fan-out hub shared by the tick task, the finalize path and every
/// subscriber connection.
#[derive(Clone)]
pub struct BroadcastHub {
    inner: Arc<HubInner>,
}

struct HubInner {
    live_tx: broadcast::Sender<Arc<str>>,
    final_tx: watch::Sender<Option<Arc<PublishedFinal>>>,
    subscribers: Mutex<HashMap<SubscriberId, SubscriberInfo>>,
    next_id: AtomicU64,
}

impl BroadcastHub {
    /// Hub whose live channel buffers `capacity` messages per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (live_tx, _) = broadcast::channel(capacity.max(1));
        let (final_tx, _) = watch::channel(None);
        Self {
            inner: Arc::new(HubInner {
                live_tx,
                final_tx,
                subscribers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    // ========================================================================
    // Publishing
    // ========================================================================

    /// Encode and fan out a live message. Returns the number of receivers.
    ///
    /// # Errors
    ///
    /// Returns the encoding error; nothing is sent in that case.
    pub fn publish_live(&self, message: &OutboundMessage) -> Result<usize, serde_json::Error> {
        let text: Arc<str> = message.to_json()?.into();
        // No receivers is not an error.
        Ok(self.inner.live_tx.send(text).unwrap_or(0))
    }

    /// Make `published` the outstanding final report.
    pub fn publish_final(&self, published: Arc<PublishedFinal>) {
        info!(
            version = published.version,
            subscribers = self.subscriber_count(),
            "publishing final report"
        );
        self.inner.final_tx.send_replace(Some(published));
    }

    /// Withdraw the outstanding final report.
    pub fn clear_final(&self) {
        self.inner.final_tx.send_replace(None);
    }

    /// The outstanding final report.
    pub fn outstanding_final(&self) -> Option<Arc<PublishedFinal>> {
        self.inner.final_tx.borrow().clone()
    }

    // ========================================================================
    // Registry
    // ========================================================================

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }

    /// Registry entry of a subscriber.
    pub fn subscriber(&self, id: SubscriberId) -> Option<SubscriberInfo> {
        self.inner.subscribers.lock().get(&id).cloned()
    }

    fn register(&self) -> Registration {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.subscribers.lock().insert(
            id,
            SubscriberInfo {
                connected_at: Utc::now(),
                delivered_version: 0,
            },
        );
        Registration {
            hub: Arc::clone(&self.inner),
            id,
        }
    }

    fn mark_delivered(&self, id: SubscriberId, version: u64) {
        if let Some(info) = self.inner.subscribers.lock().get_mut(&id) {
            info.delivered_version = version;
        }
    }

    // ========================================================================
    // Subscriber loop
    // ========================================================================

    /// Register `sink` and forward messages to it until `cancel` fires or a
    /// send fails. The subscriber is unregistered on return.
    pub async fn serve<S: SubscriberSink>(&self, mut sink: S, cancel: CancellationToken) -> SubscriberExit {
        // Subscribe before registering so no live message published after
        // the count goes up is missed.
        let mut live_rx = self.inner.live_tx.subscribe();
        let mut final_rx = self.inner.final_tx.subscribe();
        let registration = self.register();
        let id = registration.id;
        info!(subscriber_id = id, "subscriber connected");

        let mut delivered = 0u64;
        let exit = loop {
            // Catches both the outstanding report on connect and any newer
            // version since the last pass.
            let pending = final_rx
                .borrow_and_update()
                .clone()
                .filter(|f| f.version > delivered);
            if let Some(published) = pending {
                if let Err(e) = deliver_final(&mut sink, &published).await {
                    break SubscriberExit::Failed(e);
                }
                delivered = published.version;
                self.mark_delivered(id, delivered);
                debug!(subscriber_id = id, version = delivered, "final report delivered");
            }

            tokio::select! {
                _ = cancel.cancelled() => break SubscriberExit::Cancelled,
                changed = final_rx.changed() => {
                    if changed.is_err() {
                        break SubscriberExit::Cancelled;
                    }
                }
                msg = live_rx.recv() => match msg {
                    Ok(text) => {
                        if let Err(e) = sink.send_text(text.to_string()).await {
                            break SubscriberExit::Failed(e);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(subscriber_id = id, lagged = n, "subscriber lagged, live messages dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break SubscriberExit::Cancelled,
                },
            }
        };

        match &exit {
            SubscriberExit::Cancelled => info!(subscriber_id = id, "subscriber disconnected"),
            SubscriberExit::Failed(e) => warn!(subscriber_id = id, error = %e, "dropping subscriber"),
        }
        drop(registration);
        exit
    }
}

async fn deliver_final<S: SubscriberSink>(sink: &mut S, published: &PublishedFinal) -> Result<(), SinkError> {
    for message in OutboundMessage::final_pair(published) {
        sink.send_text(message.to_json()?).await?;
    }
    Ok(())
}

/// Removes a subscriber from the registry when dropped, so every exit path,
/// including task abort, unregisters.
struct Registration {
    hub: Arc<HubInner>,
    id: SubscriberId,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.hub.subscribers.lock().remove(&self.id);
    }
}
