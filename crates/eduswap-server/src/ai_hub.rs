//! Real-time hub for the AI tutor chat.
//!
//! Each student has a private group (all of their open tabs).  Bot replies
//! stream token by token: a typing-started event opens a placeholder bubble
//! under a temporary id, chunk events append to it, and the finished event
//! carries the persisted message id that replaces it — or none when
//! generation produced nothing.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

use eduswap_shared::{ConnectionId, MessageId, StudentId};

use crate::ai::AiChatService;
use crate::error::ServerError;
use crate::events::{AiCommand, AiEvent};
use crate::files::FileStore;

struct ConnectionHandle {
    sender: mpsc::UnboundedSender<AiEvent>,
    student: Option<StudentId>,
}

pub struct AiHub {
    ai: Arc<AiChatService>,
    files: Arc<FileStore>,
    connections: RwLock<HashMap<ConnectionId, ConnectionHandle>>,
    groups: RwLock<HashMap<StudentId, HashSet<ConnectionId>>>,
}

impl AiHub {
    pub fn new(ai: Arc<AiChatService>, files: Arc<FileStore>) -> Self {
        Self {
            ai,
            files,
            connections: RwLock::new(HashMap::new()),
            groups: RwLock::new(HashMap::new()),
        }
    }

    /// Drive one WebSocket connection until it closes.
    pub async fn handle_socket(self: Arc<Self>, socket: WebSocket) {
        let (mut ws_tx, mut ws_rx) = socket.split();
        let (conn_id, mut rx) = self.register().await;

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

            match serde_json::from_str::<AiCommand>(&text) {
                Ok(command) => {
                    if let Err(e) = self.clone().handle_command(conn_id, command).await {
                        debug!(conn = %conn_id, error = %e, "AI command rejected");
                        self.send_to(
                            conn_id,
                            AiEvent::Error {
                                message: e.to_string(),
                            },
                        )
                        .await;
                    }
                }
                Err(e) => {
                    warn!(conn = %conn_id, error = %e, "unparseable AI chat frame");
                }
            }
        }

        self.unregister(conn_id).await;
        writer.abort();
    }

    pub async fn handle_command(
        self: Arc<Self>,
        conn: ConnectionId,
        command: AiCommand,
    ) -> Result<(), ServerError> {
        match command {
            AiCommand::JoinChat { student_id } => {
                {
                    let mut connections = self.connections.write().await;
                    let Some(handle) = connections.get_mut(&conn) else {
                        return Err(ServerError::Internal(
                            "connection not registered".to_string(),
                        ));
                    };
                    handle.student = Some(student_id);
                }
                self.groups
                    .write()
                    .await
                    .entry(student_id)
                    .or_default()
                    .insert(conn);

                debug!(conn = %conn, student = %student_id, "joined AI chat");
                Ok(())
            }

            AiCommand::SendMessage { id, content } => {
                let student = self.claimed_student(conn).await?;
                let prompt = self.ai.record_prompt(student, id, content).await?;

                self.broadcast(student, AiEvent::ReceiveMessage { message: prompt })
                    .await;

                // Generation runs detached so the student can keep typing.
                let hub = self.clone();
                tokio::spawn(async move {
                    hub.run_generation(student, id).await;
                });
                Ok(())
            }

            AiCommand::SendFile { file_name, data } => {
                let student = self.claimed_student(conn).await?;

                let bytes = BASE64
                    .decode(data)
                    .map_err(|_| ServerError::BadRequest("invalid file data".to_string()))?;
                let stored = self.files.store_file(&file_name, &bytes).await?;

                let link = format!("/files/{stored}");
                let message = self.ai.record_file(student, file_name, link).await?;

                self.broadcast(student, AiEvent::ReceiveMessage { message })
                    .await;
                Ok(())
            }

            AiCommand::EditMessage {
                message_id,
                new_content,
            } => {
                let student = self.claimed_student(conn).await?;
                let stale = self
                    .ai
                    .edit_prompt(student, message_id, new_content.clone())
                    .await?;

                self.broadcast(
                    student,
                    AiEvent::EditMessage {
                        message_id,
                        new_content,
                    },
                )
                .await;
                if let Some(stale_id) = stale {
                    self.broadcast(student, AiEvent::DeleteMessage { message_id: stale_id })
                        .await;
                }

                // Regenerate against the corrected prompt.
                let hub = self.clone();
                tokio::spawn(async move {
                    hub.run_generation(student, message_id).await;
                });
                Ok(())
            }
        }
    }

    /// Stream one bot reply into the student's group.
    async fn run_generation(self: Arc<Self>, student: StudentId, prompt_id: MessageId) {
        let temp_id = MessageId::new();
        self.broadcast(student, AiEvent::AiTypingStarted { temp_id })
            .await;

        let (chunk_tx, mut chunk_rx) = mpsc::unbounded_channel();
        let forwarder = {
            let hub = self.clone();
            tokio::spawn(async move {
                while let Some(text) = chunk_rx.recv().await {
                    hub.broadcast(student, AiEvent::AiTypingChunk { temp_id, text })
                        .await;
                }
            })
        };

        let reply = self.ai.generate_reply(student, prompt_id, chunk_tx).await;

        // The chunk sender is dropped by now; wait for the last chunk to be
        // relayed so Finished is the final frame of this generation.
        let _ = forwarder.await;

        let message_id = match reply {
            Ok(Some(message)) => Some(message.id),
            Ok(None) => None,
            Err(e) => {
                warn!(student = %student, error = %e, "AI generation failed");
                None
            }
        };
        self.broadcast(student, AiEvent::AiTypingFinished { temp_id, message_id })
            .await;
    }

    async fn claimed_student(&self, conn: ConnectionId) -> Result<StudentId, ServerError> {
        let connections = self.connections.read().await;
        connections
            .get(&conn)
            .and_then(|h| h.student)
            .ok_or_else(|| ServerError::Unauthorized("join the AI chat first".to_string()))
    }

    async fn register(&self) -> (ConnectionId, mpsc::UnboundedReceiver<AiEvent>) {
        let conn = ConnectionId::new();
        let (tx, rx) = mpsc::unbounded_channel();

        self.connections.write().await.insert(
            conn,
            ConnectionHandle {
                sender: tx,
                student: None,
            },
        );
        (conn, rx)
    }

    async fn unregister(&self, conn: ConnectionId) {
        let student = self
            .connections
            .write()
            .await
            .remove(&conn)
            .and_then(|h| h.student);

        if let Some(student) = student {
            let mut groups = self.groups.write().await;
            if let Some(members) = groups.get_mut(&student) {
                members.remove(&conn);
                if members.is_empty() {
                    groups.remove(&student);
                }
            }
        }
    }

    async fn send_to(&self, conn: ConnectionId, event: AiEvent) {
        let connections = self.connections.read().await;
        if let Some(handle) = connections.get(&conn) {
            let _ = handle.sender.send(event);
        }
    }

    async fn broadcast(&self, student: StudentId, event: AiEvent) {
        let members: Vec<ConnectionId> = {
            let groups = self.groups.read().await;
            match groups.get(&student) {
                Some(members) => members.iter().copied().collect(),
                None => return,
            }
        };

        let connections = self.connections.read().await;
        for member in members {
            if let Some(handle) = connections.get(&member) {
                let _ = handle.sender.send(event.clone());
            }
        }
    }
}
