//! Shared session and subscription registry
//!
//! One `SessionRegistry` is shared by every connection task. All three
//! indexes are sharded `DashMap`s so that unrelated clients never contend on
//! a single lock. Whenever a sessions shard is held, the subscriptions map
//! may be locked afterwards, never the other way round.

use crate::broker::session::{Session, SharedSession};
use crate::packet::PublishPacket;
use crate::validation::topic_matches_filter;
use crate::QoS;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, trace};

/// A client's interest in a topic filter. Identity is
/// (`client_id`, `topic_filter`); `qos` is updated in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub client_id: String,
    pub topic_filter: String,
    pub qos: QoS,
}

/// Live connection handle for a client identifier.
#[derive(Debug)]
pub struct ClientInfo {
    /// Distinguishes reconnects that reuse the same client identifier
    pub connection_id: u64,
    /// Outbound delivery queue drained by the connection task
    pub sender: flume::Sender<PublishPacket>,
    /// Fired to close this connection when another takes over its identifier
    pub disconnect_tx: tokio::sync::oneshot::Sender<()>,
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, SharedSession>,
    clients: DashMap<String, ClientInfo>,
    subscriptions: DashMap<String, Vec<Subscription>>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the live channel for a client identifier, closing the
    /// connection that previously held it.
    pub fn register_client(
        &self,
        client_id: &str,
        connection_id: u64,
        sender: flume::Sender<PublishPacket>,
        disconnect_tx: tokio::sync::oneshot::Sender<()>,
    ) {
        let info = ClientInfo {
            connection_id,
            sender,
            disconnect_tx,
        };

        if let Some(old) = self.clients.insert(client_id.to_string(), info) {
            info!(
                client_id = %client_id,
                old_connection = old.connection_id,
                new_connection = connection_id,
                "Client ID takeover"
            );
            let _ = old.disconnect_tx.send(());
        } else {
            debug!(client_id = %client_id, connection_id, "Registered client");
        }
    }

    /// Removes the live channel only if it still belongs to `connection_id`.
    pub fn unregister_client(&self, client_id: &str, connection_id: u64) -> bool {
        let removed = self
            .clients
            .remove_if(client_id, |_, info| info.connection_id == connection_id)
            .is_some();
        if removed {
            debug!(client_id = %client_id, connection_id, "Unregistered client");
        }
        removed
    }

    pub fn client_sender(&self, client_id: &str) -> Option<flume::Sender<PublishPacket>> {
        self.clients.get(client_id).map(|info| info.sender.clone())
    }

    pub fn is_connected(&self, client_id: &str) -> bool {
        self.clients.contains_key(client_id)
    }

    /// Obtains the session for a CONNECT, atomically per client identifier.
    ///
    /// A clean connect, or a prior session that was itself clean, gets a
    /// fresh session and the client's old subscriptions are dropped. Returns
    /// the session and whether a prior session was resumed.
    pub fn open_session(
        &self,
        client_id: &str,
        clean_session: bool,
        keep_alive: u16,
    ) -> (SharedSession, bool) {
        match self.sessions.entry(client_id.to_string()) {
            Entry::Occupied(mut entry) => {
                let resumable = !clean_session && !entry.get().lock().clean_session;
                if resumable {
                    let session = Arc::clone(entry.get());
                    session.lock().keep_alive = keep_alive;
                    debug!(client_id = %client_id, "Resuming existing session");
                    (session, true)
                } else {
                    let session = Session::new(client_id, clean_session, keep_alive).into_shared();
                    entry.insert(Arc::clone(&session));
                    self.purge_subscriptions(client_id);
                    debug!(client_id = %client_id, "Replaced existing session");
                    (session, false)
                }
            }
            Entry::Vacant(entry) => {
                let session = Session::new(client_id, clean_session, keep_alive).into_shared();
                entry.insert(Arc::clone(&session));
                debug!(client_id = %client_id, clean_session, "Created new session");
                (session, false)
            }
        }
    }

    /// Inserts or replaces a session, returning the previous one.
    pub fn add_session(&self, session: Session) -> Option<SharedSession> {
        let client_id = session.client_id.clone();
        self.sessions.insert(client_id, session.into_shared())
    }

    pub fn get_session(&self, client_id: &str) -> Option<SharedSession> {
        self.sessions.get(client_id).map(|s| Arc::clone(s.value()))
    }

    /// Removes a session and every subscription its client holds.
    pub fn remove_session(&self, client_id: &str) -> Option<SharedSession> {
        let removed = self.sessions.remove_if(client_id, |_, _| {
            self.purge_subscriptions(client_id);
            true
        });
        removed.map(|(_, session)| session)
    }

    /// Ends a clean session, unless a newer connection already replaced it.
    pub fn close_session(&self, client_id: &str, session: &SharedSession) -> bool {
        let removed = self
            .sessions
            .remove_if(client_id, |_, current| {
                if Arc::ptr_eq(current, session) {
                    self.purge_subscriptions(client_id);
                    true
                } else {
                    false
                }
            })
            .is_some();
        if removed {
            debug!(client_id = %client_id, "Removed clean session");
        }
        removed
    }

    /// Adds or updates a subscription. Returns `true` when it is new.
    pub fn add_subscription(&self, subscription: Subscription) -> bool {
        let mut subs = self
            .subscriptions
            .entry(subscription.topic_filter.clone())
            .or_default();

        if let Some(existing) = subs
            .iter_mut()
            .find(|s| s.client_id == subscription.client_id)
        {
            existing.qos = subscription.qos;
            debug!(
                client_id = %subscription.client_id,
                filter = %subscription.topic_filter,
                qos = ?subscription.qos,
                "Updated subscription"
            );
            false
        } else {
            debug!(
                client_id = %subscription.client_id,
                filter = %subscription.topic_filter,
                qos = ?subscription.qos,
                "Added subscription"
            );
            subs.push(subscription);
            true
        }
    }

    /// Removes a client's subscription; an emptied filter entry is dropped.
    pub fn remove_subscription(&self, topic_filter: &str, client_id: &str) -> bool {
        let mut removed = false;
        self.subscriptions.remove_if_mut(topic_filter, |_, subs| {
            let before = subs.len();
            subs.retain(|s| s.client_id != client_id);
            removed = subs.len() != before;
            subs.is_empty()
        });
        if removed {
            debug!(client_id = %client_id, filter = %topic_filter, "Removed subscription");
        }
        removed
    }

    /// One subscription per client whose filters match `topic`, wildcards
    /// included. When several filters of a client match, the one with the
    /// highest granted `QoS` wins.
    pub fn get_subscribers(&self, topic: &str) -> Vec<Subscription> {
        let mut by_client: HashMap<String, Subscription> = HashMap::new();
        for entry in self
            .subscriptions
            .iter()
            .filter(|entry| topic_matches_filter(topic, entry.key()))
        {
            for sub in entry.value() {
                match by_client.get_mut(&sub.client_id) {
                    Some(best) if best.qos >= sub.qos => {}
                    Some(best) => *best = sub.clone(),
                    None => {
                        by_client.insert(sub.client_id.clone(), sub.clone());
                    }
                }
            }
        }
        let subscribers: Vec<Subscription> = by_client.into_values().collect();
        trace!(topic = %topic, count = subscribers.len(), "Resolved subscribers");
        subscribers
    }

    pub fn subscriptions_for(&self, client_id: &str) -> Vec<Subscription> {
        self.subscriptions
            .iter()
            .flat_map(|entry| {
                entry
                    .value()
                    .iter()
                    .filter(|s| s.client_id == client_id)
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    fn purge_subscriptions(&self, client_id: &str) {
        self.subscriptions.retain(|_, subs| {
            subs.retain(|s| s.client_id != client_id);
            !subs.is_empty()
        });
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn active_connection_count(&self) -> usize {
        self.clients.len()
    }

    pub fn topic_filter_count(&self) -> usize {
        self.subscriptions.len()
    }
}
