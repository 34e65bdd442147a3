//! CRUD operations for [`Swap`] rows, including the transactional
//! check-then-insert that enforces the one-active-swap-per-pair invariant.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use eduswap_shared::{StudentId, Subject, SwapId, SwapStatus};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::Swap;

/// Status codes that keep a swap in the active working set.
const ACTIVE_STATUSES: &str = "0, 1, 3, 4"; // Pending, Confirmed, PendingCompleted, CompletedNotRated

/// Status codes for the immutable history set.
const TERMINAL_STATUSES: &str = "2, 5"; // Rejected, Completed

/// Outcome of [`Database::insert_swap_if_pair_free`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairInsert {
    /// The swap row was inserted.
    Inserted,
    /// An active swap already exists for the unordered pair; nothing was
    /// written.
    ActiveExists(SwapId),
}

impl Database {
    /// Insert a new swap unless an active swap already exists between the
    /// same unordered pair of students.
    ///
    /// The duplicate check and the insert run inside one transaction so two
    /// concurrent requests for the same pair cannot both succeed.
    pub fn insert_swap_if_pair_free(&mut self, swap: &Swap) -> Result<PairInsert> {
        let tx = self.conn_mut().transaction()?;

        let existing: Option<String> = tx
            .query_row(
                &format!(
                    "SELECT id FROM swaps
                     WHERE status IN ({ACTIVE_STATUSES})
                       AND ((student1_id = ?1 AND student2_id = ?2)
                         OR (student1_id = ?2 AND student2_id = ?1))
                     LIMIT 1"
                ),
                params![swap.student1_id.0.to_string(), swap.student2_id.0.to_string()],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(id_str) = existing {
            tx.rollback()?;
            let id = Uuid::parse_str(&id_str)?;
            return Ok(PairInsert::ActiveExists(SwapId(id)));
        }

        insert_swap_row(&tx, swap)?;
        tx.commit()?;
        Ok(PairInsert::Inserted)
    }

    /// Insert a swap without the pair check.  Used by tests and by callers
    /// that already hold the pair exclusion.
    pub fn insert_swap(&self, swap: &Swap) -> Result<()> {
        insert_swap_row(self.conn(), swap)?;
        Ok(())
    }

    /// Fetch a single swap by id, regardless of status.
    pub fn get_swap(&self, id: SwapId) -> Result<Swap> {
        self.conn()
            .query_row(
                &format!("SELECT {SWAP_COLUMNS} FROM swaps WHERE id = ?1"),
                params![id.0.to_string()],
                row_to_swap,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// All swaps in the active working set (Pending, Confirmed,
    /// PendingCompleted, CompletedNotRated).
    pub fn active_swaps(&self) -> Result<Vec<Swap>> {
        self.swaps_where(&format!("status IN ({ACTIVE_STATUSES})"))
    }

    /// All archived swaps (Rejected, Completed).
    pub fn history_swaps(&self) -> Result<Vec<Swap>> {
        self.swaps_where(&format!("status IN ({TERMINAL_STATUSES})"))
    }

    /// All swaps involving a student, active or historical, most recent
    /// request first.
    pub fn swaps_for_student(&self, student: StudentId) -> Result<Vec<Swap>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {SWAP_COLUMNS} FROM swaps
             WHERE student1_id = ?1 OR student2_id = ?1
             ORDER BY date_requested DESC"
        ))?;

        let rows = stmt.query_map(params![student.0.to_string()], row_to_swap)?;

        let mut swaps = Vec::new();
        for row in rows {
            swaps.push(row?);
        }
        Ok(swaps)
    }

    /// Count of Pending swaps where the student is a participant but not the
    /// requester — incoming requests awaiting their decision.
    pub fn pending_incoming_count(&self, student: StudentId) -> Result<i64> {
        let count = self.conn().query_row(
            "SELECT COUNT(1) FROM swaps
             WHERE status = 0
               AND (student1_id = ?1 OR student2_id = ?1)
               AND requester_id <> ?1",
            params![student.0.to_string()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Persist the mutable fields of a swap after a lifecycle transition.
    pub fn update_swap(&self, swap: &Swap) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE swaps
             SET status = ?2,
                 date_confirmed = ?3,
                 date_completed = ?4,
                 completion_proposed_by = ?5
             WHERE id = ?1",
            params![
                swap.id.0.to_string(),
                swap.status.as_i64(),
                swap.date_confirmed.map(|d| d.to_rfc3339()),
                swap.date_completed.map(|d| d.to_rfc3339()),
                swap.completion_proposed_by.map(|s| s.0.to_string()),
            ],
        )?;

        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Hard delete — used when the requester withdraws a Pending swap.
    pub fn delete_swap(&self, id: SwapId) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM swaps WHERE id = ?1", params![id.0.to_string()])?;
        Ok(affected > 0)
    }

    fn swaps_where(&self, predicate: &str) -> Result<Vec<Swap>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {SWAP_COLUMNS} FROM swaps WHERE {predicate}
             ORDER BY date_requested DESC"
        ))?;

        let rows = stmt.query_map([], row_to_swap)?;

        let mut swaps = Vec::new();
        for row in rows {
            swaps.push(row?);
        }
        Ok(swaps)
    }
}

const SWAP_COLUMNS: &str = "id, student1_id, student2_id, requester_id, subject_for_help, \
                            status, date_requested, date_confirmed, date_completed, \
                            completion_proposed_by, comment";

fn insert_swap_row(conn: &Connection, swap: &Swap) -> rusqlite::Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO swaps ({SWAP_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
        ),
        params![
            swap.id.0.to_string(),
            swap.student1_id.0.to_string(),
            swap.student2_id.0.to_string(),
            swap.requester_id.0.to_string(),
            swap.subject_for_help.as_i64(),
            swap.status.as_i64(),
            swap.date_requested.to_rfc3339(),
            swap.date_confirmed.map(|d| d.to_rfc3339()),
            swap.date_completed.map(|d| d.to_rfc3339()),
            swap.completion_proposed_by.map(|s| s.0.to_string()),
            swap.comment,
        ],
    )?;
    Ok(())
}

/// Map a `rusqlite::Row` to a [`Swap`].
fn row_to_swap(row: &rusqlite::Row<'_>) -> rusqlite::Result<Swap> {
    let id = parse_uuid(row.get::<_, String>(0)?, 0)?;
    let student1 = parse_uuid(row.get::<_, String>(1)?, 1)?;
    let student2 = parse_uuid(row.get::<_, String>(2)?, 2)?;
    let requester = parse_uuid(row.get::<_, String>(3)?, 3)?;

    let subject_code: i64 = row.get(4)?;
    let subject = Subject::from_i64(subject_code).ok_or_else(|| bad_code(4, subject_code))?;

    let status_code: i64 = row.get(5)?;
    let status = SwapStatus::from_i64(status_code).ok_or_else(|| bad_code(5, status_code))?;

    let date_requested = parse_timestamp(row.get::<_, String>(6)?, 6)?;
    let date_confirmed = row
        .get::<_, Option<String>>(7)?
        .map(|s| parse_timestamp(s, 7))
        .transpose()?;
    let date_completed = row
        .get::<_, Option<String>>(8)?
        .map(|s| parse_timestamp(s, 8))
        .transpose()?;
    let completion_proposed_by = row
        .get::<_, Option<String>>(9)?
        .map(|s| parse_uuid(s, 9))
        .transpose()?
        .map(StudentId);
    let comment: Option<String> = row.get(10)?;

    Ok(Swap {
        id: SwapId(id),
        student1_id: StudentId(student1),
        student2_id: StudentId(student2),
        requester_id: StudentId(requester),
        subject_for_help: subject,
        status,
        date_requested,
        date_confirmed,
        date_completed,
        completion_proposed_by,
        comment,
    })
}

pub(crate) fn parse_uuid(s: String, idx: usize) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(&s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

pub(crate) fn parse_timestamp(s: String, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

pub(crate) fn bad_code(idx: usize, code: i64) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Integer,
        format!("invalid enum code {code}").into(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Swap;

    pub(crate) fn sample_swap(a: StudentId, b: StudentId) -> Swap {
        Swap {
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
            comment: Some("need help with integrals".to_string()),
        }
    }

    #[test]
    fn insert_and_get_round_trip() {
        let mut db = Database::open_in_memory().unwrap();
        let swap = sample_swap(StudentId::new(), StudentId::new());

        assert_eq!(
            db.insert_swap_if_pair_free(&swap).unwrap(),
            PairInsert::Inserted
        );

        let loaded = db.get_swap(swap.id).unwrap();
        assert_eq!(loaded, swap);
    }

    #[test]
    fn duplicate_pair_is_rejected_in_both_orders() {
        let mut db = Database::open_in_memory().unwrap();
        let a = StudentId::new();
        let b = StudentId::new();

        let first = sample_swap(a, b);
        db.insert_swap_if_pair_free(&first).unwrap();

        // Same order.
        let dup = sample_swap(a, b);
        assert_eq!(
            db.insert_swap_if_pair_free(&dup).unwrap(),
            PairInsert::ActiveExists(first.id)
        );

        // Reversed order.
        let reversed = sample_swap(b, a);
        assert_eq!(
            db.insert_swap_if_pair_free(&reversed).unwrap(),
            PairInsert::ActiveExists(first.id)
        );
    }

    #[test]
    fn terminal_swap_does_not_block_a_new_pair() {
        let mut db = Database::open_in_memory().unwrap();
        let a = StudentId::new();
        let b = StudentId::new();

        let mut first = sample_swap(a, b);
        db.insert_swap_if_pair_free(&first).unwrap();

        first.status = SwapStatus::Completed;
        first.date_completed = Some(Utc::now());
        db.update_swap(&first).unwrap();

        let second = sample_swap(a, b);
        assert_eq!(
            db.insert_swap_if_pair_free(&second).unwrap(),
            PairInsert::Inserted
        );
    }

    #[test]
    fn status_groups_partition_swaps() {
        let mut db = Database::open_in_memory().unwrap();
        let a = StudentId::new();
        let b = StudentId::new();

        let mut swap = sample_swap(a, b);
        db.insert_swap_if_pair_free(&swap).unwrap();
        assert_eq!(db.active_swaps().unwrap().len(), 1);
        assert!(db.history_swaps().unwrap().is_empty());

        swap.status = SwapStatus::Rejected;
        db.update_swap(&swap).unwrap();
        assert!(db.active_swaps().unwrap().is_empty());
        assert_eq!(db.history_swaps().unwrap().len(), 1);
    }

    #[test]
    fn pending_incoming_counts_only_non_requester() {
        let mut db = Database::open_in_memory().unwrap();
        let a = StudentId::new();
        let b = StudentId::new();

        let swap = sample_swap(a, b); // requester = a
        db.insert_swap_if_pair_free(&swap).unwrap();

        assert_eq!(db.pending_incoming_count(b).unwrap(), 1);
        assert_eq!(db.pending_incoming_count(a).unwrap(), 0);
    }

    #[test]
    fn update_missing_swap_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        let swap = sample_swap(StudentId::new(), StudentId::new());

        assert!(matches!(db.update_swap(&swap), Err(StoreError::NotFound)));
    }

    #[test]
    fn delete_swap_removes_row() {
        let mut db = Database::open_in_memory().unwrap();
        let swap = sample_swap(StudentId::new(), StudentId::new());
        db.insert_swap_if_pair_free(&swap).unwrap();

        assert!(db.delete_swap(swap.id).unwrap());
        assert!(!db.delete_swap(swap.id).unwrap());
        assert!(matches!(db.get_swap(swap.id), Err(StoreError::NotFound)));
    }
}
