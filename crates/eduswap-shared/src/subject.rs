use serde::{Deserialize, Serialize};

/// School subjects a student can offer or request help with.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Subject {
    NotSpecified,
    Math,
    Biology,
    Chemistry,
    Physics,
    History,
    Geography,
    English,
    Literature,
    BulgarianLanguage,
    Informatics,
}

impl Subject {
    /// Human-readable name for display in chat and match listings.
    pub fn display_name(&self) -> &'static str {
        match self {
            Subject::NotSpecified => "Not specified",
            Subject::Math => "Mathematics",
            Subject::Biology => "Biology",
            Subject::Chemistry => "Chemistry",
            Subject::Physics => "Physics",
            Subject::History => "History",
            Subject::Geography => "Geography",
            Subject::English => "English",
            Subject::Literature => "Literature",
            Subject::BulgarianLanguage => "Bulgarian language",
            Subject::Informatics => "Informatics",
        }
    }

    /// Integer code used in the swaps and student_subjects tables.
    pub fn as_i64(&self) -> i64 {
        match self {
            Subject::NotSpecified => 0,
            Subject::Math => 1,
            Subject::Biology => 2,
            Subject::Chemistry => 3,
            Subject::Physics => 4,
            Subject::History => 5,
            Subject::Geography => 6,
            Subject::English => 7,
            Subject::Literature => 8,
            Subject::BulgarianLanguage => 9,
            Subject::Informatics => 10,
        }
    }

    pub fn from_i64(code: i64) -> Option<Self> {
        match code {
            0 => Some(Subject::NotSpecified),
            1 => Some(Subject::Math),
            2 => Some(Subject::Biology),
            3 => Some(Subject::Chemistry),
            4 => Some(Subject::Physics),
            5 => Some(Subject::History),
            6 => Some(Subject::Geography),
            7 => Some(Subject::English),
            8 => Some(Subject::Literature),
            9 => Some(Subject::BulgarianLanguage),
            10 => Some(Subject::Informatics),
            _ => None,
        }
    }

    /// All real subjects, excluding the `NotSpecified` placeholder.
    pub fn all() -> [Subject; 10] {
        [
            Subject::Math,
            Subject::Biology,
            Subject::Chemistry,
            Subject::Physics,
            Subject::History,
            Subject::Geography,
            Subject::English,
            Subject::Literature,
            Subject::BulgarianLanguage,
            Subject::Informatics,
        ]
    }
}

impl std::fmt::Display for Subject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}
