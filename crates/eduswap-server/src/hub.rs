//! Real-time fanout hub for swap chats.
//!
//! Maps live WebSocket connections to per-swap groups, routes events to
//! exactly the two participants' connections, and re-checks swap membership
//! on every mutating call — group membership alone does not prove identity.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

use eduswap_shared::{ConnectionId, MessageId, StudentId, SwapId};
use eduswap_store::Swap;

use crate::chat::ChatService;
use crate::directory::StudentDirectory;
use crate::engine::SwapEngine;
use crate::error::ServerError;
use crate::events::{ChatCommand, ChatEvent};
use crate::files::FileStore;

struct ConnectionHandle {
    sender: mpsc::UnboundedSender<ChatEvent>,
    /// `(swap, claimed student)`, set by a successful JoinGroup.
    membership: Option<(SwapId, StudentId)>,
}

pub struct ChatHub {
    engine: Arc<SwapEngine>,
    chat: Arc<ChatService>,
    directory: Arc<StudentDirectory>,
    files: Arc<FileStore>,
    connections: RwLock<HashMap<ConnectionId, ConnectionHandle>>,
    groups: RwLock<HashMap<SwapId, HashSet<ConnectionId>>>,
}

impl ChatHub {
    pub fn new(
        engine: Arc<SwapEngine>,
        chat: Arc<ChatService>,
        directory: Arc<StudentDirectory>,
        files: Arc<FileStore>,
    ) -> Self {
        Self {
            engine,
            chat,
            directory,
            files,
            connections: RwLock::new(HashMap::new()),
            groups: RwLock::new(HashMap::new()),
        }
    }

    /// Drive one WebSocket connection until it closes.
    pub async fn handle_socket(self: Arc<Self>, socket: WebSocket) {
        let (mut ws_tx, mut ws_rx) = socket.split();
        let (conn_id, mut rx) = self.register().await;

        // Writer task: drain the connection's event queue into the socket.
        // The per-connection mpsc preserves the order events were broadcast.
        let writer = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let Ok(json) = serde_json::to_string(&event) else {
                    continue;
                };
                if ws_tx.send(WsMessage::Text(json)).await.is_err() {
                    break;
                }
            }
        });

        while let Some(frame) = ws_rx.next().await {
            let Ok(frame) = frame else { break };
            let WsMessage::Text(text) = frame else {
                continue;
            };

            match serde_json::from_str::<ChatCommand>(&text) {
                Ok(command) => {
                    if let Err(e) = self.handle_command(conn_id, command).await {
                        debug!(conn = %conn_id, error = %e, "chat command rejected");
                        self.send_to(
                            conn_id,
                            ChatEvent::Error {
                                message: e.to_string(),
                            },
                        )
                        .await;
                    }
                }
                Err(e) => {
                    warn!(conn = %conn_id, error = %e, "unparseable chat frame");
                }
            }
        }

        self.unregister(conn_id).await;
        writer.abort();
    }

    /// Apply one client command.  Authorization errors carry no side effects
    /// and trigger no broadcast.
    pub async fn handle_command(
        &self,
        conn: ConnectionId,
        command: ChatCommand,
    ) -> Result<(), ServerError> {
        match command {
            ChatCommand::JoinGroup {
                swap_id,
                student_id,
            } => self.join_group(conn, swap_id, student_id).await,

            ChatCommand::LeaveGroup { swap_id } => {
                self.leave_group(conn, swap_id).await;
                Ok(())
            }

            ChatCommand::SendMessage {
                swap_id,
                id,
                content,
                reply_to_message_id,
            } => {
                let student = self.authorize(conn, swap_id).await?;
                let message = self
                    .chat
                    .add_message(id, swap_id, student, content, reply_to_message_id)
                    .await?;

                self.broadcast(
                    swap_id,
                    ChatEvent::ReceiveMessage {
                        id: message.id,
                        sender_id: student,
                        sender_name: self.directory.display_name(student).await,
                        content: message.content,
                        timestamp: message.timestamp,
                        reply_to_message_id: message.reply_to_message_id,
                    },
                )
                .await;
                self.broadcast_except(swap_id, conn, ChatEvent::NewUnread { swap_id })
                    .await;
                Ok(())
            }

            ChatCommand::SendFile {
                swap_id,
                file_name,
                data,
            } => {
                let student = self.authorize(conn, swap_id).await?;

                let bytes = BASE64
                    .decode(data)
                    .map_err(|_| ServerError::BadRequest("invalid file data".to_string()))?;
                let stored = self.files.store_file(&file_name, &bytes).await?;

                let content = format!("[File: {file_name}](/files/{stored})");
                let message = self
                    .chat
                    .add_message(MessageId::new(), swap_id, student, content, None)
                    .await?;

                self.broadcast(
                    swap_id,
                    ChatEvent::ReceiveMessage {
                        id: message.id,
                        sender_id: student,
                        sender_name: self.directory.display_name(student).await,
                        content: message.content,
                        timestamp: message.timestamp,
                        reply_to_message_id: None,
                    },
                )
                .await;
                self.broadcast_except(swap_id, conn, ChatEvent::NewUnread { swap_id })
                    .await;
                Ok(())
            }

            ChatCommand::DeleteMessage {
                swap_id,
                message_id,
            } => {
                let student = self.authorize(conn, swap_id).await?;
                self.chat.delete_message(swap_id, student, message_id).await?;

                self.broadcast(swap_id, ChatEvent::DeleteMessage { message_id })
                    .await;
                Ok(())
            }

            ChatCommand::EditMessage {
                swap_id,
                message_id,
                new_content,
            } => {
                let student = self.authorize(conn, swap_id).await?;
                self.chat
                    .edit_message(swap_id, student, message_id, new_content.clone())
                    .await?;

                self.broadcast(
                    swap_id,
                    ChatEvent::EditMessage {
                        message_id,
                        new_content,
                    },
                )
                .await;
                Ok(())
            }

            ChatCommand::MarkRead { swap_id } => {
                let student = self.authorize(conn, swap_id).await?;
                self.chat.mark_read(swap_id, student).await?;

                self.broadcast_except(swap_id, conn, ChatEvent::NewUnread { swap_id })
                    .await;
                Ok(())
            }

            ChatCommand::ProposeCompletion { swap_id } => {
                let student = self.authorize(conn, swap_id).await?;
                let swap = self.engine.propose_completion(swap_id, student).await?;
                self.broadcast_swap_updated(&swap).await;
                Ok(())
            }

            ChatCommand::AcceptCompletion { swap_id } => {
                self.authorize(conn, swap_id).await?;
                let swap = self.engine.accept_completion(swap_id).await?;
                self.broadcast_swap_updated(&swap).await;
                Ok(())
            }

            ChatCommand::RejectCompletion { swap_id } => {
                self.authorize(conn, swap_id).await?;
                let swap = self.engine.reject_completion(swap_id).await?;
                self.broadcast_swap_updated(&swap).await;
                Ok(())
            }
        }
    }

    /// Push a swap state change to the swap's group.  Also used by the REST
    /// handlers after confirm/reject/rate.
    pub async fn broadcast_swap_updated(&self, swap: &Swap) {
        self.broadcast(swap.id, ChatEvent::SwapUpdated { swap: swap.clone() })
            .await;
    }

    // ------------------------------------------------------------------
    // Group management
    // ------------------------------------------------------------------

    async fn join_group(
        &self,
        conn: ConnectionId,
        swap_id: SwapId,
        student_id: StudentId,
    ) -> Result<(), ServerError> {
        let swap = self
            .engine
            .find_swap(swap_id)
            .await
            .ok_or_else(|| ServerError::NotFound(format!("no active swap {swap_id}")))?;

        if !swap.involves(student_id) {
            return Err(ServerError::Unauthorized(
                "you are not a participant of this swap".to_string(),
            ));
        }

        {
            let mut connections = self.connections.write().await;
            let Some(handle) = connections.get_mut(&conn) else {
                return Err(ServerError::Internal("connection not registered".to_string()));
            };
            handle.membership = Some((swap_id, student_id));
        }
        self.groups.write().await.entry(swap_id).or_default().insert(conn);

        debug!(conn = %conn, swap = %swap_id, student = %student_id, "joined chat group");

        let username = self.directory.display_name(student_id).await;
        self.broadcast(swap_id, ChatEvent::UserJoined { username })
            .await;
        Ok(())
    }

    async fn leave_group(&self, conn: ConnectionId, swap_id: SwapId) {
        let mut groups = self.groups.write().await;
        if let Some(members) = groups.get_mut(&swap_id) {
            members.remove(&conn);
            if members.is_empty() {
                groups.remove(&swap_id);
            }
        }
        drop(groups);

        if let Some(handle) = self.connections.write().await.get_mut(&conn) {
            handle.membership = None;
        }
    }

    /// Resolve the connection's claimed student and re-verify that the
    /// student is a participant of the target swap.  Mandatory on every
    /// mutating call.
    async fn authorize(
        &self,
        conn: ConnectionId,
        swap_id: SwapId,
    ) -> Result<StudentId, ServerError> {
        let membership = {
            let connections = self.connections.read().await;
            connections.get(&conn).and_then(|h| h.membership)
        };

        let Some((joined_swap, student)) = membership else {
            return Err(ServerError::Unauthorized(
                "join the swap group first".to_string(),
            ));
        };
        if joined_swap != swap_id {
            return Err(ServerError::Unauthorized(
                "connection is bound to a different swap".to_string(),
            ));
        }

        let swap = self
            .engine
            .find_swap(swap_id)
            .await
            .ok_or_else(|| ServerError::NotFound(format!("no active swap {swap_id}")))?;
        if !swap.involves(student) {
            return Err(ServerError::Unauthorized(
                "you are not a participant of this swap".to_string(),
            ));
        }

        Ok(student)
    }

    // ------------------------------------------------------------------
    // Connection registry & delivery
    // ------------------------------------------------------------------

    async fn register(&self) -> (ConnectionId, mpsc::UnboundedReceiver<ChatEvent>) {
        let conn = ConnectionId::new();
        let (tx, rx) = mpsc::unbounded_channel();

        self.connections.write().await.insert(
            conn,
            ConnectionHandle {
                sender: tx,
                membership: None,
            },
        );
        (conn, rx)
    }

    async fn unregister(&self, conn: ConnectionId) {
        let membership = self
            .connections
            .write()
            .await
            .remove(&conn)
            .and_then(|h| h.membership);

        if let Some((swap_id, _)) = membership {
            let mut groups = self.groups.write().await;
            if let Some(members) = groups.get_mut(&swap_id) {
                members.remove(&conn);
                if members.is_empty() {
                    groups.remove(&swap_id);
                }
            }
        }
    }

    async fn send_to(&self, conn: ConnectionId, event: ChatEvent) {
        let connections = self.connections.read().await;
        if let Some(handle) = connections.get(&conn) {
            let _ = handle.sender.send(event);
        }
    }

    async fn broadcast(&self, swap_id: SwapId, event: ChatEvent) {
        self.broadcast_inner(swap_id, event, None).await;
    }

    async fn broadcast_except(&self, swap_id: SwapId, except: ConnectionId, event: ChatEvent) {
        self.broadcast_inner(swap_id, event, Some(except)).await;
    }

    async fn broadcast_inner(
        &self,
        swap_id: SwapId,
        event: ChatEvent,
        except: Option<ConnectionId>,
    ) {
        let members: Vec<ConnectionId> = {
            let groups = self.groups.read().await;
            match groups.get(&swap_id) {
                Some(members) => members.iter().copied().collect(),
                None => return,
            }
        };

        let connections = self.connections.read().await;
        for member in members {
            if Some(member) == except {
                continue;
            }
            if let Some(handle) = connections.get(&member) {
                // Fire-and-forget: a full/closed queue never blocks the
                // operation that triggered the event.
                let _ = handle.sender.send(event.clone());
            }
        }
    }
}
