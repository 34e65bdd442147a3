//! v001 -- Initial schema creation.
//!
//! Creates the six core tables: `students`, `student_subjects`, `swaps`,
//! `messages`, `ai_messages`, and `reviews`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Students
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS students (
    id           TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    first_name   TEXT NOT NULL,
    sec_name     TEXT NOT NULL,
    age          INTEGER NOT NULL,
    grade        INTEGER NOT NULL,
    email        TEXT NOT NULL,
    phone_number TEXT NOT NULL,
    username     TEXT NOT NULL UNIQUE,
    avatar_name  TEXT,
    last_online  TEXT                         -- ISO-8601 / RFC-3339, nullable
);

CREATE INDEX IF NOT EXISTS idx_students_username ON students(username);

-- ----------------------------------------------------------------
-- Student subjects ("can help with" / "needs help with" sets)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS student_subjects (
    student_id TEXT NOT NULL,                 -- FK -> students(id)
    subject    INTEGER NOT NULL,              -- Subject enum code
    can_help   INTEGER NOT NULL,              -- boolean 0/1

    PRIMARY KEY (student_id, subject, can_help),
    FOREIGN KEY (student_id) REFERENCES students(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_student_subjects_subject
    ON student_subjects(subject, can_help);

-- ----------------------------------------------------------------
-- Swaps
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS swaps (
    id                      TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    student1_id             TEXT NOT NULL,              -- the one requesting help
    student2_id             TEXT NOT NULL,              -- the one offering help
    requester_id            TEXT NOT NULL,              -- who initiated this swap
    subject_for_help        INTEGER NOT NULL,           -- Subject enum code
    status                  INTEGER NOT NULL,           -- SwapStatus enum code
    date_requested          TEXT NOT NULL,              -- ISO-8601
    date_confirmed          TEXT,
    date_completed          TEXT,
    completion_proposed_by  TEXT,                       -- nullable participant id
    comment                 TEXT
);

CREATE INDEX IF NOT EXISTS idx_swaps_status ON swaps(status);
CREATE INDEX IF NOT EXISTS idx_swaps_students ON swaps(student1_id, student2_id);

-- ----------------------------------------------------------------
-- Messages (swap chat)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id                  TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    swap_id             TEXT NOT NULL,              -- FK -> swaps(id)
    sender_id           TEXT NOT NULL,
    content             TEXT NOT NULL,
    timestamp           TEXT NOT NULL,              -- ISO-8601, server-assigned
    is_read             INTEGER NOT NULL DEFAULT 0, -- boolean 0/1
    is_edited           INTEGER NOT NULL DEFAULT 0, -- boolean 0/1
    reply_to_message_id TEXT,                       -- nullable self-reference

    FOREIGN KEY (swap_id) REFERENCES swaps(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_swap_ts
    ON messages(swap_id, timestamp);

-- ----------------------------------------------------------------
-- AI tutor messages (one private conversation per student)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS ai_messages (
    id                  TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    student_id          TEXT NOT NULL,              -- conversation owner
    sender_id           TEXT NOT NULL,              -- owner, or nil UUID for the bot
    content             TEXT NOT NULL,
    is_file             INTEGER NOT NULL DEFAULT 0, -- boolean 0/1
    file_name           TEXT,
    timestamp           TEXT NOT NULL,
    reply_to_message_id TEXT                        -- pairs a bot reply with its prompt
);

CREATE INDEX IF NOT EXISTS idx_ai_messages_student_ts
    ON ai_messages(student_id, timestamp);

-- ----------------------------------------------------------------
-- Reviews
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS reviews (
    id                  TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    comment             TEXT NOT NULL,
    rating              INTEGER NOT NULL,           -- 1..=5
    sender_student_id   TEXT NOT NULL,
    receiver_student_id TEXT NOT NULL,
    created_at          TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_reviews_receiver ON reviews(receiver_student_id);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
