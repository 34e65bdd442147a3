//! Online presence tracking.
//!
//! Tracks the set of live connections per student — a student with two open
//! tabs holds two entries, and closing one must not mark them offline.  The
//! map is sharded so unrelated students' connect/disconnect churn never
//! contends on one lock.  A durable `last_online` stamp (written on first
//! connect and last disconnect) provides a "soft online" grace window that
//! smooths over reconnect flicker and survives process restarts.

use std::collections::{hash_map::DefaultHasher, HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use chrono::{DateTime, Duration, Utc};
use futures::StreamExt;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use eduswap_shared::{ConnectionId, StudentId};

use crate::directory::StudentDirectory;
use crate::events::PresenceCommand;

const SHARD_COUNT: usize = 16;

/// A student with no live connection still counts as online for this long
/// after their last stamped `last_online`.
pub fn online_grace() -> Duration {
    Duration::minutes(5)
}

pub struct PresenceTracker {
    shards: Vec<RwLock<HashMap<StudentId, HashSet<ConnectionId>>>>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARD_COUNT)
                .map(|_| RwLock::new(HashMap::new()))
                .collect(),
        }
    }

    fn shard(&self, student: StudentId) -> &RwLock<HashMap<StudentId, HashSet<ConnectionId>>> {
        let mut hasher = DefaultHasher::new();
        student.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % SHARD_COUNT]
    }

    /// Record a new live connection.  Returns `true` when this is the
    /// student's first.
    pub async fn connect(&self, student: StudentId, conn: ConnectionId) -> bool {
        let mut shard = self.shard(student).write().await;
        let connections = shard.entry(student).or_default();
        connections.insert(conn);
        connections.len() == 1
    }

    /// Remove a live connection.  Returns `true` when the student just went
    /// fully offline.
    pub async fn disconnect(&self, student: StudentId, conn: ConnectionId) -> bool {
        let mut shard = self.shard(student).write().await;
        if let Some(connections) = shard.get_mut(&student) {
            connections.remove(&conn);
            if connections.is_empty() {
                shard.remove(&student);
                return true;
            }
        }
        false
    }

    pub async fn live_connections(&self, student: StudentId) -> usize {
        self.shard(student)
            .read()
            .await
            .get(&student)
            .map(|c| c.len())
            .unwrap_or(0)
    }

    /// Online = at least one live connection, or a last-seen stamp within the
    /// grace window.
    pub async fn is_online_at(
        &self,
        student: StudentId,
        last_online: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> bool {
        if self.live_connections(student).await > 0 {
            return true;
        }
        match last_online {
            Some(seen) => now - seen < online_grace(),
            None => false,
        }
    }
}

impl Default for PresenceTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Presence channel: the socket lifecycle is the signal, plus an optional
/// periodic ping that refreshes the durable last-seen stamp.
pub struct PresenceHub {
    tracker: PresenceTracker,
    directory: Arc<StudentDirectory>,
}

impl PresenceHub {
    pub fn new(directory: Arc<StudentDirectory>) -> Self {
        Self {
            tracker: PresenceTracker::new(),
            directory,
        }
    }

    pub fn tracker(&self) -> &PresenceTracker {
        &self.tracker
    }

    /// Soft-online check against live connections and the cached student's
    /// last-seen stamp.
    pub async fn is_online(&self, student: StudentId) -> bool {
        let last_online = self
            .directory
            .get(student)
            .await
            .and_then(|s| s.last_online);
        self.tracker
            .is_online_at(student, last_online, Utc::now())
            .await
    }

    /// Drive one presence socket until it closes.
    pub async fn handle_socket(self: Arc<Self>, student: StudentId, mut socket: WebSocket) {
        let conn = ConnectionId::new();

        if self.tracker.connect(student, conn).await {
            debug!(student = %student, "student came online");
            if let Err(e) = self.directory.touch_last_online(student, Utc::now()).await {
                warn!(student = %student, error = %e, "failed to stamp last_online");
            }
        }

        while let Some(frame) = socket.next().await {
            let Ok(frame) = frame else { break };
            let WsMessage::Text(text) = frame else {
                continue;
            };

            if let Ok(PresenceCommand::Ping) = serde_json::from_str(&text) {
                if let Err(e) = self.directory.touch_last_online(student, Utc::now()).await {
                    warn!(student = %student, error = %e, "failed to refresh last_online");
                }
            }
        }

        if self.tracker.disconnect(student, conn).await {
            debug!(student = %student, "student went offline");
            if let Err(e) = self.directory.touch_last_online(student, Utc::now()).await {
                warn!(student = %student, error = %e, "failed to stamp last_online");
            }
        }
    }
}
