//! CRUD operations for [`Review`] rows.  Reviews are append-only.

use rusqlite::params;
use uuid::Uuid;

use eduswap_shared::StudentId;

use crate::database::Database;
use crate::error::Result;
use crate::models::Review;
use crate::swaps::{parse_timestamp, parse_uuid};

const REVIEW_COLUMNS: &str =
    "id, comment, rating, sender_student_id, receiver_student_id, created_at";

impl Database {
    pub fn insert_review(&self, review: &Review) -> Result<()> {
        self.conn().execute(
            &format!(
                "INSERT INTO reviews ({REVIEW_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
            ),
            params![
                review.id.to_string(),
                review.comment,
                review.rating,
                review.sender_student_id.0.to_string(),
                review.receiver_student_id.0.to_string(),
                review.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Reviews received by a student, newest first.
    pub fn reviews_for_receiver(&self, receiver: StudentId) -> Result<Vec<Review>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {REVIEW_COLUMNS} FROM reviews
             WHERE receiver_student_id = ?1
             ORDER BY created_at DESC"
        ))?;

        let rows = stmt.query_map(params![receiver.0.to_string()], row_to_review)?;

        let mut reviews = Vec::new();
        for row in rows {
            reviews.push(row?);
        }
        Ok(reviews)
    }

    /// Mean rating across all reviews a student has received, if any.
    pub fn average_rating(&self, receiver: StudentId) -> Result<Option<f64>> {
        let avg: Option<f64> = self.conn().query_row(
            "SELECT AVG(rating) FROM reviews WHERE receiver_student_id = ?1",
            params![receiver.0.to_string()],
            |row| row.get(0),
        )?;
        Ok(avg)
    }
}

/// Map a `rusqlite::Row` to a [`Review`].
fn row_to_review(row: &rusqlite::Row<'_>) -> rusqlite::Result<Review> {
    let id = parse_uuid(row.get::<_, String>(0)?, 0)?;
    let comment: String = row.get(1)?;
    let rating: i32 = row.get(2)?;
    let sender = parse_uuid(row.get::<_, String>(3)?, 3)?;
    let receiver = parse_uuid(row.get::<_, String>(4)?, 4)?;
    let created_at = parse_timestamp(row.get::<_, String>(5)?, 5)?;

    Ok(Review {
        id,
        comment,
        rating,
        sender_student_id: StudentId(sender),
        receiver_student_id: StudentId(receiver),
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn review(sender: StudentId, receiver: StudentId, rating: i32) -> Review {
        Review {
            id: Uuid::new_v4(),
            comment: "great help".to_string(),
            rating,
            sender_student_id: sender,
            receiver_student_id: receiver,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn reviews_listed_per_receiver() {
        let db = Database::open_in_memory().unwrap();
        let helper = StudentId::new();
        let other = StudentId::new();

        db.insert_review(&review(StudentId::new(), helper, 5)).unwrap();
        db.insert_review(&review(StudentId::new(), helper, 4)).unwrap();
        db.insert_review(&review(StudentId::new(), other, 1)).unwrap();

        assert_eq!(db.reviews_for_receiver(helper).unwrap().len(), 2);
        assert_eq!(db.reviews_for_receiver(other).unwrap().len(), 1);
    }

    #[test]
    fn average_rating_over_received_reviews() {
        let db = Database::open_in_memory().unwrap();
        let helper = StudentId::new();

        assert_eq!(db.average_rating(helper).unwrap(), None);

        db.insert_review(&review(StudentId::new(), helper, 5)).unwrap();
        db.insert_review(&review(StudentId::new(), helper, 3)).unwrap();

        assert_eq!(db.average_rating(helper).unwrap(), Some(4.0));
    }
}
