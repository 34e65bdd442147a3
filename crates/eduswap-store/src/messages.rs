//! CRUD operations for swap chat [`Message`] rows.
//!
//! Ordering is `(timestamp, rowid)` ascending — the rowid breaks ties between
//! messages written within the same clock tick.

use rusqlite::{params, OptionalExtension};

use eduswap_shared::{MessageId, StudentId, SwapId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::Message;
use crate::swaps::{parse_timestamp, parse_uuid};

const MESSAGE_COLUMNS: &str =
    "id, swap_id, sender_id, content, timestamp, is_read, is_edited, reply_to_message_id";

impl Database {
    pub fn insert_message(&self, message: &Message) -> Result<()> {
        self.conn().execute(
            &format!(
                "INSERT INTO messages ({MESSAGE_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
            ),
            params![
                message.id.0.to_string(),
                message.swap_id.0.to_string(),
                message.sender_id.0.to_string(),
                message.content,
                message.timestamp.to_rfc3339(),
                message.is_read,
                message.is_edited,
                message.reply_to_message_id.map(|m| m.0.to_string()),
            ],
        )?;
        Ok(())
    }

    pub fn get_message(&self, id: MessageId) -> Result<Message> {
        self.conn()
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id.0.to_string()],
                row_to_message,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Full ordered log for a swap, oldest first.
    pub fn messages_for_swap(&self, swap_id: SwapId) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE swap_id = ?1
             ORDER BY timestamp ASC, rowid ASC"
        ))?;

        let rows = stmt.query_map(params![swap_id.0.to_string()], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Id of the sender's chronologically last message in the swap, if any.
    /// The edit precondition is checked against this.
    pub fn last_message_from_sender(
        &self,
        swap_id: SwapId,
        sender: StudentId,
    ) -> Result<Option<MessageId>> {
        let id_str: Option<String> = self
            .conn()
            .query_row(
                "SELECT id FROM messages
                 WHERE swap_id = ?1 AND sender_id = ?2
                 ORDER BY timestamp DESC, rowid DESC
                 LIMIT 1",
                params![swap_id.0.to_string(), sender.0.to_string()],
                |row| row.get(0),
            )
            .optional()?;

        match id_str {
            Some(s) => {
                let id = uuid::Uuid::parse_str(&s)?;
                Ok(Some(MessageId(id)))
            }
            None => Ok(None),
        }
    }

    /// Overwrite a message's content and flag it as edited.
    pub fn update_message_content(&self, id: MessageId, new_content: &str) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE messages SET content = ?2, is_edited = 1 WHERE id = ?1",
            params![id.0.to_string(), new_content],
        )?;

        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Hard delete.  Returns `true` if a row was deleted.
    pub fn delete_message(&self, id: MessageId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM messages WHERE id = ?1",
            params![id.0.to_string()],
        )?;
        Ok(affected > 0)
    }

    /// Batched read-marking: every unread message in the swap not sent by the
    /// reader becomes read.  Returns the number of rows flipped.
    pub fn mark_messages_read(&self, swap_id: SwapId, reader: StudentId) -> Result<usize> {
        let affected = self.conn().execute(
            "UPDATE messages
             SET is_read = 1
             WHERE swap_id = ?1 AND sender_id <> ?2 AND is_read = 0",
            params![swap_id.0.to_string(), reader.0.to_string()],
        )?;
        Ok(affected)
    }

    /// Count of unread messages in a swap addressed to `student` (i.e. sent
    /// by the other participant).
    pub fn unread_count(&self, swap_id: SwapId, student: StudentId) -> Result<i64> {
        let count = self.conn().query_row(
            "SELECT COUNT(1) FROM messages
             WHERE swap_id = ?1 AND sender_id <> ?2 AND is_read = 0",
            params![swap_id.0.to_string(), student.0.to_string()],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

/// Map a `rusqlite::Row` to a [`Message`].
fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id = parse_uuid(row.get::<_, String>(0)?, 0)?;
    let swap_id = parse_uuid(row.get::<_, String>(1)?, 1)?;
    let sender_id = parse_uuid(row.get::<_, String>(2)?, 2)?;
    let content: String = row.get(3)?;
    let timestamp = parse_timestamp(row.get::<_, String>(4)?, 4)?;
    let is_read: bool = row.get(5)?;
    let is_edited: bool = row.get(6)?;
    let reply_to = row
        .get::<_, Option<String>>(7)?
        .map(|s| parse_uuid(s, 7))
        .transpose()?
        .map(MessageId);

    Ok(Message {
        id: MessageId(id),
        swap_id: SwapId(swap_id),
        sender_id: StudentId(sender_id),
        content,
        timestamp,
        is_read,
        is_edited,
        reply_to_message_id: reply_to,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use eduswap_shared::{Subject, SwapStatus};

    /// Messages reference swaps by foreign key, so every test needs a parent
    /// swap row.
    fn seed_swap(db: &Database) -> SwapId {
        let swap = crate::models::Swap {
            id: SwapId::new(),
            student1_id: StudentId::new(),
            student2_id: StudentId::new(),
            requester_id: StudentId::new(),
            subject_for_help: Subject::Math,
            status: SwapStatus::Confirmed,
            date_requested: Utc::now(),
            date_confirmed: Some(Utc::now()),
            date_completed: None,
            completion_proposed_by: None,
            comment: None,
        };
        db.insert_swap(&swap).unwrap();
        swap.id
    }

    fn message_at(
        swap_id: SwapId,
        sender: StudentId,
        content: &str,
        offset_secs: i64,
    ) -> Message {
        Message {
            id: MessageId::new(),
            swap_id,
            sender_id: sender,
            content: content.to_string(),
            timestamp: Utc::now() + Duration::seconds(offset_secs),
            is_read: false,
            is_edited: false,
            reply_to_message_id: None,
        }
    }

    #[test]
    fn log_is_ordered_ascending() {
        let db = Database::open_in_memory().unwrap();
        let swap_id = seed_swap(&db);
        let sender = StudentId::new();

        let m2 = message_at(swap_id, sender, "second", 10);
        let m1 = message_at(swap_id, sender, "first", 0);
        db.insert_message(&m2).unwrap();
        db.insert_message(&m1).unwrap();

        let log = db.messages_for_swap(swap_id).unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].content, "first");
        assert_eq!(log[1].content, "second");
    }

    #[test]
    fn last_message_from_sender_tracks_latest() {
        let db = Database::open_in_memory().unwrap();
        let swap_id = seed_swap(&db);
        let a = StudentId::new();
        let b = StudentId::new();

        let first = message_at(swap_id, a, "one", 0);
        let second = message_at(swap_id, a, "two", 5);
        let from_b = message_at(swap_id, b, "three", 10);
        db.insert_message(&first).unwrap();
        db.insert_message(&second).unwrap();
        db.insert_message(&from_b).unwrap();

        assert_eq!(
            db.last_message_from_sender(swap_id, a).unwrap(),
            Some(second.id)
        );
        assert_eq!(
            db.last_message_from_sender(swap_id, b).unwrap(),
            Some(from_b.id)
        );
        assert_eq!(
            db.last_message_from_sender(swap_id, StudentId::new()).unwrap(),
            None
        );
    }

    #[test]
    fn mark_read_touches_only_other_senders() {
        let db = Database::open_in_memory().unwrap();
        let swap_id = seed_swap(&db);
        let a = StudentId::new();
        let b = StudentId::new();

        db.insert_message(&message_at(swap_id, a, "from a", 0)).unwrap();
        db.insert_message(&message_at(swap_id, b, "from b", 1)).unwrap();

        // b reads: only a's message flips.
        assert_eq!(db.mark_messages_read(swap_id, b).unwrap(), 1);
        assert_eq!(db.unread_count(swap_id, b).unwrap(), 0);

        // a still has b's message unread.
        assert_eq!(db.unread_count(swap_id, a).unwrap(), 1);
    }

    #[test]
    fn edit_flags_message() {
        let db = Database::open_in_memory().unwrap();
        let swap_id = seed_swap(&db);
        let msg = message_at(swap_id, StudentId::new(), "typo", 0);
        db.insert_message(&msg).unwrap();

        db.update_message_content(msg.id, "fixed").unwrap();

        let loaded = db.get_message(msg.id).unwrap();
        assert_eq!(loaded.content, "fixed");
        assert!(loaded.is_edited);
    }

    #[test]
    fn delete_message_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let msg = message_at(seed_swap(&db), StudentId::new(), "bye", 0);
        db.insert_message(&msg).unwrap();

        assert!(db.delete_message(msg.id).unwrap());
        assert!(!db.delete_message(msg.id).unwrap());
        assert!(matches!(db.get_message(msg.id), Err(StoreError::NotFound)));
    }
}
