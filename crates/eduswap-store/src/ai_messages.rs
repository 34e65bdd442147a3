//! CRUD operations for [`AiMessage`] rows — the private AI tutor chat.

use rusqlite::{params, OptionalExtension};

use eduswap_shared::{MessageId, StudentId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::AiMessage;
use crate::swaps::{parse_timestamp, parse_uuid};

const AI_MESSAGE_COLUMNS: &str =
    "id, student_id, sender_id, content, is_file, file_name, timestamp, reply_to_message_id";

impl Database {
    pub fn insert_ai_message(&self, message: &AiMessage) -> Result<()> {
        self.conn().execute(
            &format!(
                "INSERT INTO ai_messages ({AI_MESSAGE_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
            ),
            params![
                message.id.0.to_string(),
                message.student_id.0.to_string(),
                message.sender_id.0.to_string(),
                message.content,
                message.is_file,
                message.file_name,
                message.timestamp.to_rfc3339(),
                message.reply_to_message_id.map(|m| m.0.to_string()),
            ],
        )?;
        Ok(())
    }

    pub fn get_ai_message(&self, id: MessageId) -> Result<AiMessage> {
        self.conn()
            .query_row(
                &format!("SELECT {AI_MESSAGE_COLUMNS} FROM ai_messages WHERE id = ?1"),
                params![id.0.to_string()],
                row_to_ai_message,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// A student's full AI conversation, oldest first.
    pub fn ai_messages_for_student(&self, student: StudentId) -> Result<Vec<AiMessage>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {AI_MESSAGE_COLUMNS} FROM ai_messages
             WHERE student_id = ?1
             ORDER BY timestamp ASC, rowid ASC"
        ))?;

        let rows = stmt.query_map(params![student.0.to_string()], row_to_ai_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// The bot reply paired with a given user prompt, if one was generated.
    pub fn ai_reply_to(&self, prompt_id: MessageId) -> Result<Option<AiMessage>> {
        self.conn()
            .query_row(
                &format!(
                    "SELECT {AI_MESSAGE_COLUMNS} FROM ai_messages
                     WHERE reply_to_message_id = ?1
                     LIMIT 1"
                ),
                params![prompt_id.0.to_string()],
                row_to_ai_message,
            )
            .optional()
            .map_err(StoreError::Sqlite)
    }

    pub fn update_ai_message_content(&self, id: MessageId, new_content: &str) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE ai_messages SET content = ?2 WHERE id = ?1",
            params![id.0.to_string(), new_content],
        )?;

        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    pub fn delete_ai_message(&self, id: MessageId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM ai_messages WHERE id = ?1",
            params![id.0.to_string()],
        )?;
        Ok(affected > 0)
    }
}

/// Map a `rusqlite::Row` to an [`AiMessage`].
fn row_to_ai_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<AiMessage> {
    let id = parse_uuid(row.get::<_, String>(0)?, 0)?;
    let student_id = parse_uuid(row.get::<_, String>(1)?, 1)?;
    let sender_id = parse_uuid(row.get::<_, String>(2)?, 2)?;
    let content: String = row.get(3)?;
    let is_file: bool = row.get(4)?;
    let file_name: Option<String> = row.get(5)?;
    let timestamp = parse_timestamp(row.get::<_, String>(6)?, 6)?;
    let reply_to = row
        .get::<_, Option<String>>(7)?
        .map(|s| parse_uuid(s, 7))
        .transpose()?
        .map(MessageId);

    Ok(AiMessage {
        id: MessageId(id),
        student_id: StudentId(student_id),
        sender_id: StudentId(sender_id),
        content,
        is_file,
        file_name,
        timestamp,
        reply_to_message_id: reply_to,
    })
}
