//! CRUD operations for [`Student`] rows.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use eduswap_shared::StudentId;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::Student;
use crate::swaps::{parse_timestamp, parse_uuid};

const STUDENT_COLUMNS: &str = "id, first_name, sec_name, age, grade, email, phone_number, \
                               username, avatar_name, last_online";

impl Database {
    pub fn insert_student(&self, student: &Student) -> Result<()> {
        self.conn().execute(
            &format!(
                "INSERT INTO students ({STUDENT_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
            ),
            params![
                student.id.0.to_string(),
                student.first_name,
                student.sec_name,
                student.age,
                student.grade,
                student.email,
                student.phone_number,
                student.username,
                student.avatar_name,
                student.last_online.map(|d| d.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    pub fn get_student(&self, id: StudentId) -> Result<Student> {
        self.conn()
            .query_row(
                &format!("SELECT {STUDENT_COLUMNS} FROM students WHERE id = ?1"),
                params![id.0.to_string()],
                row_to_student,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    pub fn get_student_by_username(&self, username: &str) -> Result<Option<Student>> {
        self.conn()
            .query_row(
                &format!("SELECT {STUDENT_COLUMNS} FROM students WHERE username = ?1"),
                params![username],
                row_to_student,
            )
            .optional()
            .map_err(StoreError::Sqlite)
    }

    pub fn list_students(&self) -> Result<Vec<Student>> {
        let mut stmt = self
            .conn()
            .prepare(&format!("SELECT {STUDENT_COLUMNS} FROM students"))?;

        let rows = stmt.query_map([], row_to_student)?;

        let mut students = Vec::new();
        for row in rows {
            students.push(row?);
        }
        Ok(students)
    }

    /// Update the mutable profile fields.
    pub fn update_student(&self, student: &Student) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE students
             SET first_name = ?2, sec_name = ?3, age = ?4, grade = ?5,
                 email = ?6, phone_number = ?7, avatar_name = ?8
             WHERE id = ?1",
            params![
                student.id.0.to_string(),
                student.first_name,
                student.sec_name,
                student.age,
                student.grade,
                student.email,
                student.phone_number,
                student.avatar_name,
            ],
        )?;

        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Stamp the durable last-seen timestamp used by the presence grace
    /// window.
    pub fn update_last_online(&self, id: StudentId, at: DateTime<Utc>) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE students SET last_online = ?2 WHERE id = ?1",
            params![id.0.to_string(), at.to_rfc3339()],
        )?;

        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

/// Map a `rusqlite::Row` to a [`Student`].
fn row_to_student(row: &rusqlite::Row<'_>) -> rusqlite::Result<Student> {
    let id = parse_uuid(row.get::<_, String>(0)?, 0)?;
    let last_online = row
        .get::<_, Option<String>>(9)?
        .map(|s| parse_timestamp(s, 9))
        .transpose()?;

    Ok(Student {
        id: StudentId(id),
        first_name: row.get(1)?,
        sec_name: row.get(2)?,
        age: row.get(3)?,
        grade: row.get(4)?,
        email: row.get(5)?,
        phone_number: row.get(6)?,
        username: row.get(7)?,
        avatar_name: row.get(8)?,
        last_online,
    })
}

#[cfg(test)]
pub(crate) fn sample_student(username: &str) -> Student {
    Student {
        id: StudentId::new(),
        first_name: "Maria".to_string(),
        sec_name: "Petrova".to_string(),
        age: 16,
        grade: 10,
        email: format!("{username}@example.com"),
        phone_number: "+359000000000".to_string(),
        username: username.to_string(),
        avatar_name: None,
        last_online: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_get_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let student = sample_student("maria10");
        db.insert_student(&student).unwrap();

        assert_eq!(db.get_student(student.id).unwrap(), student);
        assert_eq!(
            db.get_student_by_username("maria10").unwrap(),
            Some(student)
        );
        assert_eq!(db.get_student_by_username("nobody").unwrap(), None);
    }

    #[test]
    fn usernames_are_unique() {
        let db = Database::open_in_memory().unwrap();
        db.insert_student(&sample_student("taken")).unwrap();

        assert!(db.insert_student(&sample_student("taken")).is_err());
    }

    #[test]
    fn last_online_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let student = sample_student("ivan9");
        db.insert_student(&student).unwrap();

        let now = Utc::now();
        db.update_last_online(student.id, now).unwrap();

        let loaded = db.get_student(student.id).unwrap();
        assert_eq!(loaded.last_online.unwrap().timestamp(), now.timestamp());
    }

    #[test]
    fn update_missing_student_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        let student = sample_student("ghost");

        assert!(matches!(
            db.update_student(&student),
            Err(StoreError::NotFound)
        ));
        assert!(matches!(
            db.update_last_online(student.id, Utc::now()),
            Err(StoreError::NotFound)
        ));
    }
}
