//! Rating a completed help exchange.
//!
//! Rating is the trigger that drives a swap to its terminal `Completed`
//! state: the engine transition runs first (so a concurrent double-rate has
//! exactly one winner), then the immutable review row is appended.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use eduswap_shared::{StudentId, SwapId, SwapStatus};
use eduswap_store::{Review, Swap};

use crate::engine::SwapEngine;
use crate::error::ServerError;
use crate::gateway::Gateway;

pub struct RatingService {
    gateway: Arc<Gateway>,
    engine: Arc<SwapEngine>,
}

impl RatingService {
    pub fn new(gateway: Arc<Gateway>, engine: Arc<SwapEngine>) -> Self {
        Self { gateway, engine }
    }

    /// Rate a swap whose completion has been proposed or accepted.  Creates
    /// the review (rater -> other participant) and completes the swap.
    pub async fn rate_swap(
        &self,
        swap_id: SwapId,
        rater: StudentId,
        comment: String,
        rating: i32,
    ) -> Result<(Review, Swap), ServerError> {
        if !(1..=5).contains(&rating) {
            return Err(ServerError::BadRequest(
                "rating must be between 1 and 5".to_string(),
            ));
        }

        let swap = self
            .engine
            .find_swap(swap_id)
            .await
            .ok_or_else(|| ServerError::NotFound(format!("no active swap {swap_id}")))?;
        if !swap.involves(rater) {
            return Err(ServerError::Unauthorized(
                "only a participant can rate a swap".to_string(),
            ));
        }
        if !matches!(
            swap.status,
            SwapStatus::PendingCompleted | SwapStatus::CompletedNotRated
        ) {
            return Err(ServerError::InvalidTransition {
                status: swap.status,
                action: "rate",
            });
        }

        // Complete first: the per-swap lock makes this the single winner of
        // any double-rate race, so at most one review is appended.
        let completed = self.engine.complete_swap(swap_id).await?;

        let review = Review {
            id: Uuid::new_v4(),
            comment,
            rating,
            sender_student_id: rater,
            receiver_student_id: completed.other_participant(rater),
            created_at: Utc::now(),
        };
        self.gateway
            .run({
                let review = review.clone();
                move |db| db.insert_review(&review)
            })
            .await?;

        info!(
            swap = %swap_id,
            rater = %rater,
            rating,
            "swap rated and completed"
        );
        Ok((review, completed))
    }

    /// Reviews a student has received, newest first.
    pub async fn reviews_for(&self, student: StudentId) -> Result<Vec<Review>, ServerError> {
        self.gateway
            .run(move |db| db.reviews_for_receiver(student))
            .await
    }

    pub async fn average_rating(&self, student: StudentId) -> Result<Option<f64>, ServerError> {
        self.gateway.run(move |db| db.average_rating(student)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use eduswap_shared::Subject;
    use eduswap_store::Database;

    use crate::engine::RequestOutcome;

    struct Fixture {
        engine: Arc<SwapEngine>,
        rating: RatingService,
        swap_id: SwapId,
        helped: StudentId,
        helper: StudentId,
    }

    async fn fixture() -> Fixture {
        let gateway = Arc::new(Gateway::new(
            Database::open_in_memory().unwrap(),
            Duration::from_secs(1),
        ));
        let engine = Arc::new(SwapEngine::load(gateway.clone()).await.unwrap());
        let rating = RatingService::new(gateway, engine.clone());

        let helped = StudentId::new();
        let helper = StudentId::new();
        let swap = match engine
            .request_help(helped, helper, Subject::Math, None)
            .await
            .unwrap()
        {
            RequestOutcome::Created(swap) => swap,
            RequestOutcome::AlreadyActive(_) => unreachable!(),
        };
        engine.confirm(swap.id).await.unwrap();
        engine.propose_completion(swap.id, helper).await.unwrap();

        Fixture {
            engine,
            rating,
            swap_id: swap.id,
            helped,
            helper,
        }
    }

    #[tokio::test]
    async fn rating_completes_swap_and_appends_review() {
        let fx = fixture().await;
        fx.engine.accept_completion(fx.swap_id).await.unwrap();

        let (review, swap) = fx
            .rating
            .rate_swap(fx.swap_id, fx.helped, "great help".to_string(), 5)
            .await
            .unwrap();

        assert_eq!(swap.status, SwapStatus::Completed);
        assert_eq!(review.sender_student_id, fx.helped);
        assert_eq!(review.receiver_student_id, fx.helper);

        // Swap left the active index; the review is queryable.
        assert!(fx.engine.find_swap(fx.swap_id).await.is_none());
        assert_eq!(fx.rating.reviews_for(fx.helper).await.unwrap().len(), 1);
        assert_eq!(fx.rating.average_rating(fx.helper).await.unwrap(), Some(5.0));
    }

    #[tokio::test]
    async fn rating_works_straight_from_pending_completed() {
        let fx = fixture().await;

        let (_, swap) = fx
            .rating
            .rate_swap(fx.swap_id, fx.helped, "ok".to_string(), 4)
            .await
            .unwrap();
        assert_eq!(swap.status, SwapStatus::Completed);
    }

    #[tokio::test]
    async fn rating_twice_fails_with_one_review() {
        let fx = fixture().await;

        fx.rating
            .rate_swap(fx.swap_id, fx.helped, "first".to_string(), 5)
            .await
            .unwrap();

        let second = fx
            .rating
            .rate_swap(fx.swap_id, fx.helper, "second".to_string(), 3)
            .await;
        assert!(matches!(second, Err(ServerError::NotFound(_))));

        assert_eq!(fx.rating.reviews_for(fx.helper).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn invalid_rating_and_wrong_state_are_rejected() {
        let fx = fixture().await;

        assert!(matches!(
            fx.rating
                .rate_swap(fx.swap_id, fx.helped, "meh".to_string(), 0)
                .await,
            Err(ServerError::BadRequest(_))
        ));
        assert!(matches!(
            fx.rating
                .rate_swap(fx.swap_id, fx.helped, "meh".to_string(), 6)
                .await,
            Err(ServerError::BadRequest(_))
        ));

        // Back to Confirmed: rating is premature there.
        fx.engine.reject_completion(fx.swap_id).await.unwrap();
        assert!(matches!(
            fx.rating
                .rate_swap(fx.swap_id, fx.helped, "early".to_string(), 4)
                .await,
            Err(ServerError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn outsiders_cannot_rate() {
        let fx = fixture().await;

        assert!(matches!(
            fx.rating
                .rate_swap(fx.swap_id, StudentId::new(), "hi".to_string(), 5)
                .await,
            Err(ServerError::Unauthorized(_))
        ));
    }
}
