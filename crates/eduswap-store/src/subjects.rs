//! CRUD operations for the [`StudentSubject`] join table.
//!
//! A student's "can help with" and "needs help with" sets are the partition
//! of this table by the `can_help` flag.

use rusqlite::params;

use eduswap_shared::{StudentId, Subject};

use crate::database::Database;
use crate::error::Result;
use crate::models::StudentSubject;
use crate::swaps::{bad_code, parse_uuid};

impl Database {
    /// Register a subject in one direction for a student.
    ///
    /// The `(student, subject, can_help)` triple is the primary key, so
    /// registering the same direction twice is a no-op; returns `true` when a
    /// new row was inserted.
    pub fn add_student_subject(&self, entry: &StudentSubject) -> Result<bool> {
        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO student_subjects (student_id, subject, can_help)
             VALUES (?1, ?2, ?3)",
            params![
                entry.student_id.0.to_string(),
                entry.subject.as_i64(),
                entry.can_help,
            ],
        )?;
        Ok(affected > 0)
    }

    pub fn remove_student_subject(&self, entry: &StudentSubject) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM student_subjects
             WHERE student_id = ?1 AND subject = ?2 AND can_help = ?3",
            params![
                entry.student_id.0.to_string(),
                entry.subject.as_i64(),
                entry.can_help,
            ],
        )?;
        Ok(affected > 0)
    }

    /// One direction of a student's subject sets.
    pub fn subjects_for_student(&self, student: StudentId, can_help: bool) -> Result<Vec<Subject>> {
        let mut stmt = self.conn().prepare(
            "SELECT subject FROM student_subjects
             WHERE student_id = ?1 AND can_help = ?2
             ORDER BY subject",
        )?;

        let rows = stmt.query_map(params![student.0.to_string(), can_help], |row| {
            let code: i64 = row.get(0)?;
            Subject::from_i64(code).ok_or_else(|| bad_code(0, code))
        })?;

        let mut subjects = Vec::new();
        for row in rows {
            subjects.push(row?);
        }
        Ok(subjects)
    }

    /// Students who registered a subject as "can help".
    pub fn helpers_for_subject(&self, subject: Subject) -> Result<Vec<StudentId>> {
        let mut stmt = self.conn().prepare(
            "SELECT student_id FROM student_subjects
             WHERE subject = ?1 AND can_help = 1",
        )?;

        let rows = stmt.query_map(params![subject.as_i64()], |row| {
            let id = parse_uuid(row.get::<_, String>(0)?, 0)?;
            Ok(StudentId(id))
        })?;

        let mut students = Vec::new();
        for row in rows {
            students.push(row?);
        }
        Ok(students)
    }
}
