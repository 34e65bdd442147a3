//! Domain model structs persisted in the SQLite database.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed
//! directly to the HTTP/WebSocket layer.  State machine rules are NOT
//! enforced here — the lifecycle engine owns those.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use eduswap_shared::{MessageId, StudentId, Subject, SwapId, SwapStatus};

// ---------------------------------------------------------------------------
// Student
// ---------------------------------------------------------------------------

/// A registered student.  Credentials live with the auth collaborator and are
/// not stored here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Student {
    pub id: StudentId,
    pub first_name: String,
    pub sec_name: String,
    pub age: i32,
    pub grade: i32,
    pub email: String,
    pub phone_number: String,
    /// Unique login name, also the auth boundary identity.
    pub username: String,
    pub avatar_name: Option<String>,
    /// Stamped when the student's first live connection opens and when the
    /// last one closes.  Drives the "soft online" grace window.
    pub last_online: Option<DateTime<Utc>>,
}

impl Student {
    /// Display name used in chat events.
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.sec_name)
    }
}

// ---------------------------------------------------------------------------
// StudentSubject
// ---------------------------------------------------------------------------

/// Join entity partitioning a student's subjects into "can help with"
/// (`can_help = true`) and "needs help with" (`can_help = false`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct StudentSubject {
    pub student_id: StudentId,
    pub subject: Subject,
    pub can_help: bool,
}

// ---------------------------------------------------------------------------
// Swap
// ---------------------------------------------------------------------------

/// A negotiated help exchange between two students.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Swap {
    pub id: SwapId,
    /// The student requesting help.
    pub student1_id: StudentId,
    /// The student offering help.
    pub student2_id: StudentId,
    /// Whichever participant initiated this particular swap.
    pub requester_id: StudentId,
    pub subject_for_help: Subject,
    pub status: SwapStatus,
    pub date_requested: DateTime<Utc>,
    pub date_confirmed: Option<DateTime<Utc>>,
    pub date_completed: Option<DateTime<Utc>>,
    /// Set while in `PendingCompleted`, cleared when the proposal is rejected.
    pub completion_proposed_by: Option<StudentId>,
    /// Free text attached at request time.
    pub comment: Option<String>,
}

impl Swap {
    pub fn involves(&self, student: StudentId) -> bool {
        self.student1_id == student || self.student2_id == student
    }

    /// The participant on the other side of `student`.
    /// Callers must have checked `involves` first.
    pub fn other_participant(&self, student: StudentId) -> StudentId {
        if self.student1_id == student {
            self.student2_id
        } else {
            self.student1_id
        }
    }

    /// Unordered participant pair, normalized so (a, b) == (b, a).
    pub fn pair(&self) -> (StudentId, StudentId) {
        ordered_pair(self.student1_id, self.student2_id)
    }
}

/// Normalize an unordered student pair to a canonical ordering.
pub fn ordered_pair(a: StudentId, b: StudentId) -> (StudentId, StudentId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A single chat line scoped to exactly one swap.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub swap_id: SwapId,
    pub sender_id: StudentId,
    pub content: String,
    /// Server-assigned at durable write; the chat ordering key.
    pub timestamp: DateTime<Utc>,
    pub is_read: bool,
    pub is_edited: bool,
    pub reply_to_message_id: Option<MessageId>,
}

// ---------------------------------------------------------------------------
// AiMessage
// ---------------------------------------------------------------------------

/// A chat line in a student's private conversation with the AI tutor.
///
/// For bot replies, `reply_to_message_id` points at the user prompt that
/// produced the reply, so that editing the prompt can retract the stale
/// reply before regenerating.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AiMessage {
    pub id: MessageId,
    /// The student whose private AI conversation this line belongs to.
    pub student_id: StudentId,
    /// The owner for prompts, [`StudentId::bot`] for replies.
    pub sender_id: StudentId,
    pub content: String,
    pub is_file: bool,
    pub file_name: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub reply_to_message_id: Option<MessageId>,
}

// ---------------------------------------------------------------------------
// Review
// ---------------------------------------------------------------------------

/// A rating left after a completed swap.  Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Review {
    pub id: Uuid,
    pub comment: String,
    /// 1..=5, validated by the rating service before insert.
    pub rating: i32,
    pub sender_student_id: StudentId,
    pub receiver_student_id: StudentId,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_is_unordered() {
        let a = StudentId::new();
        let b = StudentId::new();

        assert_eq!(ordered_pair(a, b), ordered_pair(b, a));
    }

    #[test]
    fn other_participant() {
        let a = StudentId::new();
        let b = StudentId::new();
        let swap = Swap {
            id: SwapId::new(),
            student1_id: a,
            student2_id: b,
            requester_id: a,
            subject_for_help: Subject::Math,
            status: SwapStatus::Pending,
            date_requested: Utc::now(),
            date_confirmed: None,
            date_completed: None,
            completion_proposed_by: None,
            comment: None,
        };

        assert_eq!(swap.other_participant(a), b);
        assert_eq!(swap.other_participant(b), a);
        assert!(swap.involves(a));
        assert!(!swap.involves(StudentId::new()));
    }
}
