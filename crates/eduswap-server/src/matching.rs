//! Subject matching: who can help with what a student needs.
//!
//! Plain set intersection over the student_subjects join table — no scoring,
//! no ranking.  Recommendation logic beyond this is outside the core.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use eduswap_shared::{StudentId, Subject};

use crate::error::ServerError;
use crate::gateway::Gateway;

/// A student who can help with at least one of the seeker's needed subjects.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MatchCandidate {
    pub student_id: StudentId,
    /// The needed subjects this candidate covers.
    pub subjects: Vec<Subject>,
}

pub struct MatchFinder {
    gateway: Arc<Gateway>,
}

impl MatchFinder {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self { gateway }
    }

    /// Candidates for a seeker: every other student whose "can help" set
    /// intersects the seeker's "needs help" set.
    pub async fn candidates_for(
        &self,
        seeker: StudentId,
    ) -> Result<Vec<MatchCandidate>, ServerError> {
        let needs = self
            .gateway
            .run(move |db| db.subjects_for_student(seeker, false))
            .await?;

        let mut by_candidate: HashMap<StudentId, Vec<Subject>> = HashMap::new();
        for subject in needs {
            let helpers = self
                .gateway
                .run(move |db| db.helpers_for_subject(subject))
                .await?;
            for helper in helpers {
                if helper == seeker {
                    continue;
                }
                by_candidate.entry(helper).or_default().push(subject);
            }
        }

        let mut candidates: Vec<MatchCandidate> = by_candidate
            .into_iter()
            .map(|(student_id, subjects)| MatchCandidate {
                student_id,
                subjects,
            })
            .collect();
        // Widest coverage first, then stable by id for deterministic output.
        candidates.sort_by(|a, b| {
            b.subjects
                .len()
                .cmp(&a.subjects.len())
                .then(a.student_id.cmp(&b.student_id))
        });
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use eduswap_store::{Database, Student, StudentSubject};

    fn student(username: &str) -> Student {
        Student {
            id: StudentId::new(),
            first_name: "Test".to_string(),
            sec_name: "Student".to_string(),
            age: 16,
            grade: 10,
            email: format!("{username}@example.com"),
            phone_number: "+359000000000".to_string(),
            username: username.to_string(),
            avatar_name: None,
            last_online: None,
        }
    }

    async fn seed(
        gateway: &Arc<Gateway>,
        username: &str,
        can_help: &[Subject],
        needs: &[Subject],
    ) -> StudentId {
        let s = student(username);
        let id = s.id;
        gateway.run(move |db| db.insert_student(&s)).await.unwrap();

        for &subject in can_help {
            gateway
                .run(move |db| {
                    db.add_student_subject(&StudentSubject {
                        student_id: id,
                        subject,
                        can_help: true,
                    })
                })
                .await
                .unwrap();
        }
        for &subject in needs {
            gateway
                .run(move |db| {
                    db.add_student_subject(&StudentSubject {
                        student_id: id,
                        subject,
                        can_help: false,
                    })
                })
                .await
                .unwrap();
        }
        id
    }

    #[tokio::test]
    async fn candidates_are_the_set_intersection() {
        let gateway = Arc::new(Gateway::new(
            Database::open_in_memory().unwrap(),
            Duration::from_secs(1),
        ));
        let finder = MatchFinder::new(gateway.clone());

        let seeker = seed(
            &gateway,
            "seeker",
            &[],
            &[Subject::Math, Subject::Physics],
        )
        .await;
        let mathematician = seed(&gateway, "math", &[Subject::Math], &[]).await;
        let polymath = seed(
            &gateway,
            "poly",
            &[Subject::Math, Subject::Physics, Subject::History],
            &[],
        )
        .await;
        let _historian = seed(&gateway, "hist", &[Subject::History], &[]).await;

        let candidates = finder.candidates_for(seeker).await.unwrap();

        assert_eq!(candidates.len(), 2);
        // Widest coverage first.
        assert_eq!(candidates[0].student_id, polymath);
        assert_eq!(candidates[0].subjects.len(), 2);
        assert_eq!(candidates[1].student_id, mathematician);
        assert_eq!(candidates[1].subjects, vec![Subject::Math]);
    }

    #[tokio::test]
    async fn seeker_never_matches_themselves() {
        let gateway = Arc::new(Gateway::new(
            Database::open_in_memory().unwrap(),
            Duration::from_secs(1),
        ));
        let finder = MatchFinder::new(gateway.clone());

        // Can help with the same subject they need help in.
        let seeker = seed(&gateway, "solo", &[Subject::Math], &[Subject::Math]).await;

        assert!(finder.candidates_for(seeker).await.unwrap().is_empty());
    }
}
