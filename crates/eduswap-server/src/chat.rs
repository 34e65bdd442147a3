//! Chat store & ordering rules for swap chats.
//!
//! The storage layer keeps the per-swap message log; this service owns the
//! protocol-layer rules on top of it: server-assigned timestamps, sender-only
//! delete, and edit restricted to the sender's most recent message in the
//! swap.

use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use eduswap_shared::{MessageId, StudentId, SwapId};
use eduswap_store::Message;

use crate::engine::SwapEngine;
use crate::error::ServerError;
use crate::gateway::Gateway;

pub struct ChatService {
    gateway: Arc<Gateway>,
    engine: Arc<SwapEngine>,
}

impl ChatService {
    pub fn new(gateway: Arc<Gateway>, engine: Arc<SwapEngine>) -> Self {
        Self { gateway, engine }
    }

    /// Append a message to a swap's log.  The ordering timestamp is assigned
    /// here, at durable-write time — concurrent sends serialize on whichever
    /// write lands first.
    pub async fn add_message(
        &self,
        id: MessageId,
        swap_id: SwapId,
        sender: StudentId,
        content: String,
        reply_to: Option<MessageId>,
    ) -> Result<Message, ServerError> {
        let message = Message {
            id,
            swap_id,
            sender_id: sender,
            content,
            timestamp: Utc::now(),
            is_read: false,
            is_edited: false,
            reply_to_message_id: reply_to,
        };

        self.gateway
            .run({
                let message = message.clone();
                move |db| db.insert_message(&message)
            })
            .await?;

        debug!(swap = %swap_id, message = %id, "message stored");
        Ok(message)
    }

    /// Full ordered log for a swap, oldest first.  Used to hydrate a newly
    /// joined client.
    pub async fn messages(&self, swap_id: SwapId) -> Result<Vec<Message>, ServerError> {
        self.gateway.run(move |db| db.messages_for_swap(swap_id)).await
    }

    /// Edit a message.  Only the sender may edit, and only their
    /// chronologically last message in the swap.
    pub async fn edit_message(
        &self,
        swap_id: SwapId,
        editor: StudentId,
        message_id: MessageId,
        new_content: String,
    ) -> Result<(), ServerError> {
        let message = self.owned_message(swap_id, editor, message_id, "edit").await?;

        let last = self
            .gateway
            .run(move |db| db.last_message_from_sender(swap_id, editor))
            .await?;
        if last != Some(message.id) {
            return Err(ServerError::BadRequest(
                "only your most recent message can be edited".to_string(),
            ));
        }

        self.gateway
            .run(move |db| db.update_message_content(message_id, &new_content))
            .await
    }

    /// Delete a message.  Sender-only.
    pub async fn delete_message(
        &self,
        swap_id: SwapId,
        actor: StudentId,
        message_id: MessageId,
    ) -> Result<(), ServerError> {
        self.owned_message(swap_id, actor, message_id, "delete").await?;

        self.gateway
            .run(move |db| db.delete_message(message_id))
            .await?;
        Ok(())
    }

    /// Mark every message in the swap not sent by `reader` as read.
    pub async fn mark_read(&self, swap_id: SwapId, reader: StudentId) -> Result<(), ServerError> {
        self.gateway
            .run(move |db| db.mark_messages_read(swap_id, reader))
            .await?;
        Ok(())
    }

    /// Unread messages in one swap from the other participant's side.
    pub async fn unread_count(
        &self,
        swap_id: SwapId,
        student: StudentId,
    ) -> Result<i64, ServerError> {
        self.gateway
            .run(move |db| db.unread_count(swap_id, student))
            .await
    }

    /// Number of the student's active swaps with at least one unread message.
    pub async fn unread_chats_count(&self, student: StudentId) -> Result<usize, ServerError> {
        let swaps = self.engine.active_swaps_for_student(student).await;

        let mut count = 0;
        for swap in swaps {
            if self.unread_count(swap.id, student).await? > 0 {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Fetch a message and check it belongs to the swap and to the actor.
    async fn owned_message(
        &self,
        swap_id: SwapId,
        actor: StudentId,
        message_id: MessageId,
        action: &'static str,
    ) -> Result<Message, ServerError> {
        let message = self
            .gateway
            .run(move |db| db.get_message(message_id))
            .await
            .map_err(|e| match e {
                ServerError::NotFound(_) => {
                    ServerError::NotFound(format!("message {message_id} does not exist"))
                }
                other => other,
            })?;

        if message.swap_id != swap_id {
            return Err(ServerError::NotFound(format!(
                "message {message_id} does not exist"
            )));
        }
        if message.sender_id != actor {
            return Err(ServerError::Unauthorized(format!(
                "only the sender can {action} a message"
            )));
        }
        Ok(message)
    }
}
