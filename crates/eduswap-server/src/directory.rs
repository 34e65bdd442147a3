//! In-memory student directory.
//!
//! Indexed lookups by id and by username over a write-through cache of the
//! students table, rehydrated at startup.  Replaces the legacy
//! predicate-scan lookups with hash map indices.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::info;

use eduswap_shared::StudentId;
use eduswap_store::Student;

use crate::error::ServerError;
use crate::gateway::Gateway;

pub struct StudentDirectory {
    gateway: Arc<Gateway>,
    by_id: RwLock<HashMap<StudentId, Student>>,
    by_username: RwLock<HashMap<String, StudentId>>,
}

impl StudentDirectory {
    /// Rehydrate the directory from storage before serving.
    pub async fn load(gateway: Arc<Gateway>) -> Result<Self, ServerError> {
        let students = gateway.run(|db| db.list_students()).await?;

        info!(count = students.len(), "student directory rehydrated");

        let by_username = students
            .iter()
            .map(|s| (s.username.clone(), s.id))
            .collect();
        let by_id = students.into_iter().map(|s| (s.id, s)).collect();

        Ok(Self {
            gateway,
            by_id: RwLock::new(by_id),
            by_username: RwLock::new(by_username),
        })
    }

    pub async fn get(&self, id: StudentId) -> Option<Student> {
        self.by_id.read().await.get(&id).cloned()
    }

    pub async fn find_by_username(&self, username: &str) -> Option<Student> {
        let id = *self.by_username.read().await.get(username)?;
        self.get(id).await
    }

    /// Display name for chat events; falls back to the raw id for students
    /// the directory does not know (should not happen in practice).
    pub async fn display_name(&self, id: StudentId) -> String {
        match self.get(id).await {
            Some(student) => student.full_name(),
            None => id.to_string(),
        }
    }

    /// Register a student, store-then-cache.
    pub async fn add_student(&self, student: Student) -> Result<(), ServerError> {
        self.gateway
            .run({
                let student = student.clone();
                move |db| db.insert_student(&student)
            })
            .await?;

        self.by_username
            .write()
            .await
            .insert(student.username.clone(), student.id);
        self.by_id.write().await.insert(student.id, student);
        Ok(())
    }

    /// Stamp the durable last-seen timestamp, store-then-cache.  Called by
    /// the presence tracker on first-connect and last-disconnect.
    pub async fn touch_last_online(
        &self,
        id: StudentId,
        at: DateTime<Utc>,
    ) -> Result<(), ServerError> {
        self.gateway
            .run(move |db| db.update_last_online(id, at))
            .await?;

        if let Some(student) = self.by_id.write().await.get_mut(&id) {
            student.last_online = Some(at);
        }
        Ok(())
    }
}
