//! Topic interest owned by the client, replayed onto the transport.
//!
//! Subscriptions are client state, not transport state: the broker forgets
//! them when a session is lost, so [`SubscriptionRegistry::on_reconnect`]
//! re-issues the whole set in one call after every (re)connect.

use std::collections::BTreeSet;
use std::sync::Mutex;

use tracing::{debug, info};

use crate::error::Result;
use crate::sync::lock;
use crate::topic::Topics;
use crate::transport::{TransportError, TransportRef};

/// Thread-safe set of topics the client wants to receive.
pub struct SubscriptionRegistry {
    transport: TransportRef,
    topics: Mutex<BTreeSet<String>>,
}

impl SubscriptionRegistry {
    pub fn new(transport: TransportRef) -> Self {
        Self {
            transport,
            topics: Mutex::new(BTreeSet::new()),
        }
    }

    /// Add topics to the interest set.
    ///
    /// When connected, issues one transport subscribe for exactly the given
    /// topics, even if some were already present. While disconnected the
    /// topics are only recorded and go out with the next reconnect replay.
    pub fn subscribe(&self, topics: impl Into<Topics>) -> Result<()> {
        let topics = topics.into().into_validated()?;
        let mut set = lock(&self.topics);
        set.extend(topics.iter().cloned());

        if self.transport.is_connected() {
            tolerate_disconnect(self.transport.subscribe(&topics), "subscribe")?;
        }
        debug!(?topics, "subscribed");
        Ok(())
    }

    /// Remove topics from the interest set, unsubscribing when connected.
    pub fn unsubscribe(&self, topics: impl Into<Topics>) -> Result<()> {
        let topics = topics.into().into_validated()?;
        let mut set = lock(&self.topics);
        for topic in &topics {
            set.remove(topic);
        }

        if self.transport.is_connected() {
            tolerate_disconnect(self.transport.unsubscribe(&topics), "unsubscribe")?;
        }
        debug!(?topics, "unsubscribed");
        Ok(())
    }

    /// Snapshot of the current interest set.
    pub fn current_topics(&self) -> BTreeSet<String> {
        lock(&self.topics).clone()
    }

    pub fn contains(&self, topic: &str) -> bool {
        lock(&self.topics).contains(topic)
    }

    /// Restore every topic on a fresh session with a single subscribe call.
    pub fn on_reconnect(&self) -> Result<()> {
        let set = lock(&self.topics);
        if set.is_empty() {
            return Ok(());
        }

        let topics: Vec<String> = set.iter().cloned().collect();
        self.transport.subscribe(&topics)?;
        info!(count = topics.len(), "restored subscriptions after connect");
        Ok(())
    }
}

/// A session lost between the connectivity check and the call is not an
/// error: the topics are recorded and the next replay covers them.
fn tolerate_disconnect(
    result: std::result::Result<(), TransportError>,
    operation: &'static str,
) -> Result<()> {
    match result {
        Err(TransportError::NotConnected) => {
            debug!(operation, "transport disconnected, deferring to reconnect");
            Ok(())
        }
        other => other.map_err(Into::into),
    }
}
