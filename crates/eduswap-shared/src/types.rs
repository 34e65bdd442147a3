use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StudentId(pub Uuid);

impl StudentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Sentinel identity used as the sender of AI tutor replies.
    pub fn bot() -> Self {
        Self(Uuid::nil())
    }

    pub fn is_bot(&self) -> bool {
        self.0.is_nil()
    }
}

impl Default for StudentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for StudentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SwapId(pub Uuid);

impl SwapId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SwapId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SwapId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct MessageId(pub Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier for one live WebSocket connection. A student with two browser
/// tabs open holds two distinct connection ids.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a swap.
///
/// `Rejected` and `Completed` are terminal: a swap in either state lives in
/// the history set and is never mutated again.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SwapStatus {
    Pending,
    Confirmed,
    Rejected,
    PendingCompleted,
    CompletedNotRated,
    Completed,
}

impl SwapStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SwapStatus::Rejected | SwapStatus::Completed)
    }

    /// Integer code used in the swaps table.
    pub fn as_i64(&self) -> i64 {
        match self {
            SwapStatus::Pending => 0,
            SwapStatus::Confirmed => 1,
            SwapStatus::Rejected => 2,
            SwapStatus::PendingCompleted => 3,
            SwapStatus::CompletedNotRated => 4,
            SwapStatus::Completed => 5,
        }
    }

    pub fn from_i64(code: i64) -> Option<Self> {
        match code {
            0 => Some(SwapStatus::Pending),
            1 => Some(SwapStatus::Confirmed),
            2 => Some(SwapStatus::Rejected),
            3 => Some(SwapStatus::PendingCompleted),
            4 => Some(SwapStatus::CompletedNotRated),
            5 => Some(SwapStatus::Completed),
            _ => None,
        }
    }
}

impl std::fmt::Display for SwapStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SwapStatus::Pending => "Pending",
            SwapStatus::Confirmed => "Confirmed",
            SwapStatus::Rejected => "Rejected",
            SwapStatus::PendingCompleted => "PendingCompleted",
            SwapStatus::CompletedNotRated => "CompletedNotRated",
            SwapStatus::Completed => "Completed",
        };
        write!(f, "{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_round_trip() {
        for code in 0..6 {
            let status = SwapStatus::from_i64(code).unwrap();
            assert_eq!(status.as_i64(), code);
        }
        assert!(SwapStatus::from_i64(6).is_none());
        assert!(SwapStatus::from_i64(-1).is_none());
    }

    #[test]
    fn terminal_statuses() {
        assert!(SwapStatus::Rejected.is_terminal());
        assert!(SwapStatus::Completed.is_terminal());
        assert!(!SwapStatus::Pending.is_terminal());
        assert!(!SwapStatus::Confirmed.is_terminal());
        assert!(!SwapStatus::PendingCompleted.is_terminal());
        assert!(!SwapStatus::CompletedNotRated.is_terminal());
    }

    #[test]
    fn bot_id_is_nil() {
        assert!(StudentId::bot().is_bot());
        assert!(!StudentId::new().is_bot());
    }
}
