//! The swap lifecycle engine.
//!
//! Owns the state machine, the in-memory active/history indices that mirror
//! durable storage, and all legal-transition enforcement:
//!
//! ```text
//! Pending ──confirm──> Confirmed ──propose──> PendingCompleted ──accept──> CompletedNotRated
//!    │                     ^                        │     │                      │
//!    │reject               └──reject completion─────┘     └───────rate───────────┤
//!    v                                                                           v
//! Rejected                                                                   Completed
//! ```
//!
//! `Rejected` and `Completed` are terminal; swaps reaching them move to the
//! history index and are never mutated again.  Every transition re-validates
//! the current status under a per-swap mutex, persists through the gateway,
//! and only then updates the cache — a failed write leaves the cache
//! untouched.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info};

use eduswap_shared::{StudentId, Subject, SwapId, SwapStatus};
use eduswap_store::{ordered_pair, PairInsert, Swap};

use crate::error::ServerError;
use crate::gateway::Gateway;

/// Result of a help request/offer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestOutcome {
    /// A new Pending swap was created.
    Created(Swap),
    /// An active swap already exists for the pair; nothing was created.
    AlreadyActive(SwapId),
}

/// One async mutex per key, created on demand.
///
/// Guards are owned so they can be held across the storage await inside a
/// transition.  Entries are dropped once the keyed resource is retired.
struct KeyedLocks<K> {
    inner: Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    async fn acquire(&self, key: K) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.entry(key).or_default().clone()
        };
        lock.lock_owned().await
    }

    async fn retire(&self, key: &K) {
        self.inner.lock().await.remove(key);
    }
}

pub struct SwapEngine {
    gateway: Arc<Gateway>,
    /// Non-terminal swaps, mirror of the store.
    active: RwLock<HashMap<SwapId, Swap>>,
    /// Terminal swaps (Rejected/Completed), immutable once here.
    history: RwLock<HashMap<SwapId, Swap>>,
    swap_locks: KeyedLocks<SwapId>,
    pair_locks: KeyedLocks<(StudentId, StudentId)>,
}

impl SwapEngine {
    /// Rehydrate both indices from storage.  Must complete before the server
    /// starts serving — there is no partial-cache window.
    pub async fn load(gateway: Arc<Gateway>) -> Result<Self, ServerError> {
        let active_rows = gateway.run(|db| db.active_swaps()).await?;
        let history_rows = gateway.run(|db| db.history_swaps()).await?;

        info!(
            active = active_rows.len(),
            history = history_rows.len(),
            "swap indices rehydrated"
        );

        Ok(Self {
            gateway,
            active: RwLock::new(active_rows.into_iter().map(|s| (s.id, s)).collect()),
            history: RwLock::new(history_rows.into_iter().map(|s| (s.id, s)).collect()),
            swap_locks: KeyedLocks::new(),
            pair_locks: KeyedLocks::new(),
        })
    }

    // ------------------------------------------------------------------
    // Creation
    // ------------------------------------------------------------------

    /// Create a Pending swap with `requester` asking `target` for help.
    pub async fn request_help(
        &self,
        requester: StudentId,
        target: StudentId,
        subject: Subject,
        comment: Option<String>,
    ) -> Result<RequestOutcome, ServerError> {
        // student1 is the one who needs help.
        self.create_swap(requester, target, requester, subject, comment)
            .await
    }

    /// Create a Pending swap with `offerer` volunteering to help `target`.
    pub async fn offer_help(
        &self,
        offerer: StudentId,
        target: StudentId,
        subject: Subject,
        comment: Option<String>,
    ) -> Result<RequestOutcome, ServerError> {
        // The offer direction is reversed: the target is the one in need.
        self.create_swap(target, offerer, offerer, subject, comment)
            .await
    }

    async fn create_swap(
        &self,
        student1: StudentId,
        student2: StudentId,
        requester: StudentId,
        subject: Subject,
        comment: Option<String>,
    ) -> Result<RequestOutcome, ServerError> {
        if student1 == student2 {
            return Err(ServerError::BadRequest(
                "a student cannot swap with themselves".to_string(),
            ));
        }

        let pair = ordered_pair(student1, student2);
        let _pair_guard = self.pair_locks.acquire(pair).await;

        // Fast path against the cache; the store transaction re-checks.
        if let Some(existing) = self.active_swap_for_pair(student1, student2).await {
            return Ok(RequestOutcome::AlreadyActive(existing.id));
        }

        let swap = Swap {
            id: SwapId::new(),
            student1_id: student1,
            student2_id: student2,
            requester_id: requester,
            subject_for_help: subject,
            status: SwapStatus::Pending,
            date_requested: Utc::now(),
            date_confirmed: None,
            date_completed: None,
            completion_proposed_by: None,
            comment,
        };

        let inserted = self
            .gateway
            .run({
                let swap = swap.clone();
                move |db| db.insert_swap_if_pair_free(&swap)
            })
            .await?;

        match inserted {
            PairInsert::ActiveExists(id) => Ok(RequestOutcome::AlreadyActive(id)),
            PairInsert::Inserted => {
                self.active.write().await.insert(swap.id, swap.clone());
                info!(
                    swap = %swap.id,
                    requester = %requester,
                    subject = %subject,
                    "swap requested"
                );
                Ok(RequestOutcome::Created(swap))
            }
        }
    }

    // ------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------

    /// Pending -> Confirmed.  Stamps `date_confirmed`.
    pub async fn confirm(&self, id: SwapId) -> Result<Swap, ServerError> {
        let _guard = self.swap_locks.acquire(id).await;

        let mut swap = self.active_or_not_found(id).await?;
        if swap.status != SwapStatus::Pending {
            return Err(invalid(swap.status, "confirm"));
        }

        swap.status = SwapStatus::Confirmed;
        swap.date_confirmed = Some(Utc::now());
        self.persist_active(swap.clone()).await?;

        debug!(swap = %id, "swap confirmed");
        Ok(swap)
    }

    /// Pending -> Rejected (terminal).
    pub async fn reject(&self, id: SwapId) -> Result<Swap, ServerError> {
        let _guard = self.swap_locks.acquire(id).await;

        let mut swap = self.active_or_not_found(id).await?;
        if swap.status != SwapStatus::Pending {
            return Err(invalid(swap.status, "reject"));
        }

        swap.status = SwapStatus::Rejected;
        self.persist_terminal(swap.clone()).await?;
        self.swap_locks.retire(&id).await;

        info!(swap = %id, "swap rejected");
        Ok(swap)
    }

    /// The requester withdraws a Pending swap; the row is hard-deleted.
    pub async fn cancel_request(&self, id: SwapId, actor: StudentId) -> Result<(), ServerError> {
        let _guard = self.swap_locks.acquire(id).await;

        let swap = self.active_or_not_found(id).await?;
        if swap.status != SwapStatus::Pending {
            return Err(invalid(swap.status, "cancel"));
        }
        if swap.requester_id != actor {
            return Err(ServerError::Unauthorized(
                "only the requester can withdraw a request".to_string(),
            ));
        }

        self.gateway.run(move |db| db.delete_swap(id)).await?;
        self.active.write().await.remove(&id);
        self.swap_locks.retire(&id).await;

        info!(swap = %id, "swap request canceled");
        Ok(())
    }

    /// Confirmed -> PendingCompleted.  Records who proposed.
    pub async fn propose_completion(
        &self,
        id: SwapId,
        proposer: StudentId,
    ) -> Result<Swap, ServerError> {
        let _guard = self.swap_locks.acquire(id).await;

        let mut swap = self.active_or_not_found(id).await?;
        if !swap.involves(proposer) {
            return Err(ServerError::Unauthorized(
                "only a participant can propose completion".to_string(),
            ));
        }
        if swap.status != SwapStatus::Confirmed {
            return Err(invalid(swap.status, "propose completion for"));
        }

        swap.status = SwapStatus::PendingCompleted;
        swap.completion_proposed_by = Some(proposer);
        self.persist_active(swap.clone()).await?;

        debug!(swap = %id, proposer = %proposer, "completion proposed");
        Ok(swap)
    }

    /// PendingCompleted -> CompletedNotRated: the other party agreed the help
    /// happened, rating still pending.
    pub async fn accept_completion(&self, id: SwapId) -> Result<Swap, ServerError> {
        let _guard = self.swap_locks.acquire(id).await;

        let mut swap = self.active_or_not_found(id).await?;
        if swap.status != SwapStatus::PendingCompleted {
            return Err(invalid(swap.status, "accept completion for"));
        }

        swap.status = SwapStatus::CompletedNotRated;
        self.persist_active(swap.clone()).await?;

        debug!(swap = %id, "completion accepted");
        Ok(swap)
    }

    /// PendingCompleted -> Confirmed: proposal declined, swap continues.
    pub async fn reject_completion(&self, id: SwapId) -> Result<Swap, ServerError> {
        let _guard = self.swap_locks.acquire(id).await;

        let mut swap = self.active_or_not_found(id).await?;
        if swap.status != SwapStatus::PendingCompleted {
            return Err(invalid(swap.status, "reject completion for"));
        }

        swap.status = SwapStatus::Confirmed;
        swap.completion_proposed_by = None;
        self.persist_active(swap.clone()).await?;

        debug!(swap = %id, "completion rejected");
        Ok(swap)
    }

    /// PendingCompleted | CompletedNotRated -> Completed (terminal).  Invoked
    /// by the rating flow after a review is recorded.
    pub async fn complete_swap(&self, id: SwapId) -> Result<Swap, ServerError> {
        let _guard = self.swap_locks.acquire(id).await;

        let mut swap = self.active_or_not_found(id).await?;
        if !matches!(
            swap.status,
            SwapStatus::PendingCompleted | SwapStatus::CompletedNotRated
        ) {
            return Err(invalid(swap.status, "complete"));
        }

        swap.status = SwapStatus::Completed;
        swap.date_completed = Some(Utc::now());
        self.persist_terminal(swap.clone()).await?;
        self.swap_locks.retire(&id).await;

        info!(swap = %id, "swap completed");
        Ok(swap)
    }

    // ------------------------------------------------------------------
    // Lookups
    // ------------------------------------------------------------------

    /// Find a swap in the active working set.  Terminal swaps are never
    /// returned here.
    pub async fn find_swap(&self, id: SwapId) -> Option<Swap> {
        self.active.read().await.get(&id).cloned()
    }

    /// Find an archived (Rejected/Completed) swap.
    pub async fn find_history_swap(&self, id: SwapId) -> Option<Swap> {
        self.history.read().await.get(&id).cloned()
    }

    /// All swaps involving a student, active or historical, most recent
    /// request first.
    pub async fn swaps_for_student(&self, student: StudentId) -> Vec<Swap> {
        let mut swaps: Vec<Swap> = {
            let active = self.active.read().await;
            active
                .values()
                .filter(|s| s.involves(student))
                .cloned()
                .collect()
        };
        {
            let history = self.history.read().await;
            swaps.extend(history.values().filter(|s| s.involves(student)).cloned());
        }

        swaps.sort_by(|a, b| b.date_requested.cmp(&a.date_requested));
        swaps
    }

    /// Active swaps involving a student, most recent request first.
    pub async fn active_swaps_for_student(&self, student: StudentId) -> Vec<Swap> {
        let mut swaps: Vec<Swap> = {
            let active = self.active.read().await;
            active
                .values()
                .filter(|s| s.involves(student))
                .cloned()
                .collect()
        };
        swaps.sort_by(|a, b| b.date_requested.cmp(&a.date_requested));
        swaps
    }

    /// The at-most-one active swap between an unordered pair.
    pub async fn active_swap_for_pair(&self, a: StudentId, b: StudentId) -> Option<Swap> {
        let pair = ordered_pair(a, b);
        self.active
            .read()
            .await
            .values()
            .find(|s| s.pair() == pair)
            .cloned()
    }

    /// Count of Pending swaps awaiting this student's decision.
    pub async fn new_incomes_count(&self, student: StudentId) -> usize {
        self.active
            .read()
            .await
            .values()
            .filter(|s| {
                s.status == SwapStatus::Pending
                    && s.involves(student)
                    && s.requester_id != student
            })
            .count()
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    async fn active_or_not_found(&self, id: SwapId) -> Result<Swap, ServerError> {
        self.find_swap(id)
            .await
            .ok_or_else(|| ServerError::NotFound(format!("no active swap {id}")))
    }

    /// Persist a mutated swap that stays in the active set, then refresh the
    /// cache entry.
    async fn persist_active(&self, swap: Swap) -> Result<(), ServerError> {
        self.gateway
            .run({
                let swap = swap.clone();
                move |db| db.update_swap(&swap)
            })
            .await?;
        self.active.write().await.insert(swap.id, swap);
        Ok(())
    }

    /// Persist a swap that just reached a terminal status and move it from
    /// the active index to history.
    async fn persist_terminal(&self, swap: Swap) -> Result<(), ServerError> {
        self.gateway
            .run({
                let swap = swap.clone();
                move |db| db.update_swap(&swap)
            })
            .await?;

        self.active.write().await.remove(&swap.id);
        self.history.write().await.insert(swap.id, swap);
        Ok(())
    }
}

fn invalid(status: SwapStatus, action: &'static str) -> ServerError {
    ServerError::InvalidTransition { status, action }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use eduswap_store::Database;

    async fn test_engine() -> SwapEngine {
        let gateway = Arc::new(Gateway::new(
            Database::open_in_memory().unwrap(),
            Duration::from_secs(1),
        ));
        SwapEngine::load(gateway).await.unwrap()
    }

    fn created(outcome: RequestOutcome) -> Swap {
        match outcome {
            RequestOutcome::Created(swap) => swap,
            RequestOutcome::AlreadyActive(id) => panic!("expected new swap, got {id}"),
        }
    }

    #[tokio::test]
    async fn request_then_duplicate_is_noop() {
        let engine = test_engine().await;
        let a = StudentId::new();
        let b = StudentId::new();

        let swap = created(
            engine
                .request_help(a, b, Subject::Math, None)
                .await
                .unwrap(),
        );

        // Second request, same direction.
        assert_eq!(
            engine.request_help(a, b, Subject::Math, None).await.unwrap(),
            RequestOutcome::AlreadyActive(swap.id)
        );

        // Offer in the opposite direction hits the same pair.
        assert_eq!(
            engine.offer_help(b, a, Subject::Math, None).await.unwrap(),
            RequestOutcome::AlreadyActive(swap.id)
        );
    }

    #[tokio::test]
    async fn offer_reverses_direction() {
        let engine = test_engine().await;
        let offerer = StudentId::new();
        let needy = StudentId::new();

        let swap = created(
            engine
                .offer_help(offerer, needy, Subject::Physics, None)
                .await
                .unwrap(),
        );

        assert_eq!(swap.student1_id, needy);
        assert_eq!(swap.student2_id, offerer);
        assert_eq!(swap.requester_id, offerer);
    }

    #[tokio::test]
    async fn self_swap_is_rejected() {
        let engine = test_engine().await;
        let a = StudentId::new();

        assert!(matches!(
            engine.request_help(a, a, Subject::Math, None).await,
            Err(ServerError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn double_confirm_fails_and_leaves_state() {
        let engine = test_engine().await;
        let a = StudentId::new();
        let b = StudentId::new();

        let swap = created(
            engine
                .request_help(a, b, Subject::Math, None)
                .await
                .unwrap(),
        );

        let confirmed = engine.confirm(swap.id).await.unwrap();
        assert_eq!(confirmed.status, SwapStatus::Confirmed);
        assert!(confirmed.date_confirmed.is_some());

        let second = engine.confirm(swap.id).await;
        assert!(matches!(
            second,
            Err(ServerError::InvalidTransition {
                status: SwapStatus::Confirmed,
                ..
            })
        ));

        // State unchanged after the failed call.
        assert_eq!(
            engine.find_swap(swap.id).await.unwrap().status,
            SwapStatus::Confirmed
        );
    }

    #[tokio::test]
    async fn confirm_reject_race_has_one_winner() {
        let engine = Arc::new(test_engine().await);
        let a = StudentId::new();
        let b = StudentId::new();

        let swap = created(
            engine
                .request_help(a, b, Subject::Math, None)
                .await
                .unwrap(),
        );

        let id = swap.id;
        let confirm = tokio::spawn({
            let engine = engine.clone();
            async move { engine.confirm(id).await }
        });
        let reject = tokio::spawn({
            let engine = engine.clone();
            async move { engine.reject(id).await }
        });

        let results = [confirm.await.unwrap(), reject.await.unwrap()];
        let winners = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1, "exactly one transition must win");
    }

    #[tokio::test]
    async fn completion_proposal_round_trip() {
        let engine = test_engine().await;
        let a = StudentId::new();
        let b = StudentId::new();

        let swap = created(
            engine
                .request_help(a, b, Subject::Chemistry, None)
                .await
                .unwrap(),
        );
        engine.confirm(swap.id).await.unwrap();

        let proposed = engine.propose_completion(swap.id, b).await.unwrap();
        assert_eq!(proposed.status, SwapStatus::PendingCompleted);
        assert_eq!(proposed.completion_proposed_by, Some(b));

        // Rejecting the proposal restores the pre-proposal state exactly.
        let restored = engine.reject_completion(swap.id).await.unwrap();
        assert_eq!(restored.status, SwapStatus::Confirmed);
        assert_eq!(restored.completion_proposed_by, None);
    }

    #[tokio::test]
    async fn propose_requires_participant() {
        let engine = test_engine().await;
        let a = StudentId::new();
        let b = StudentId::new();

        let swap = created(
            engine
                .request_help(a, b, Subject::Math, None)
                .await
                .unwrap(),
        );
        engine.confirm(swap.id).await.unwrap();

        let outsider = StudentId::new();
        assert!(matches!(
            engine.propose_completion(swap.id, outsider).await,
            Err(ServerError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn completed_swap_moves_to_history() {
        let engine = test_engine().await;
        let a = StudentId::new();
        let b = StudentId::new();

        let swap = created(
            engine
                .request_help(a, b, Subject::Math, None)
                .await
                .unwrap(),
        );
        engine.confirm(swap.id).await.unwrap();
        engine.propose_completion(swap.id, b).await.unwrap();
        engine.accept_completion(swap.id).await.unwrap();

        let completed = engine.complete_swap(swap.id).await.unwrap();
        assert_eq!(completed.status, SwapStatus::Completed);
        assert!(completed.date_completed.is_some());

        assert!(engine.find_swap(swap.id).await.is_none());
        assert_eq!(
            engine.find_history_swap(swap.id).await.unwrap().status,
            SwapStatus::Completed
        );

        // The pair is free again.
        let again = engine.request_help(a, b, Subject::Math, None).await.unwrap();
        assert!(matches!(again, RequestOutcome::Created(_)));
    }

    #[tokio::test]
    async fn complete_directly_from_pending_completed() {
        let engine = test_engine().await;
        let a = StudentId::new();
        let b = StudentId::new();

        let swap = created(
            engine
                .request_help(a, b, Subject::Math, None)
                .await
                .unwrap(),
        );
        engine.confirm(swap.id).await.unwrap();
        engine.propose_completion(swap.id, a).await.unwrap();

        // Rating without the CompletedNotRated intermediate is allowed.
        let completed = engine.complete_swap(swap.id).await.unwrap();
        assert_eq!(completed.status, SwapStatus::Completed);
    }

    #[tokio::test]
    async fn cancel_is_requester_only_and_deletes() {
        let engine = test_engine().await;
        let a = StudentId::new();
        let b = StudentId::new();

        let swap = created(
            engine
                .request_help(a, b, Subject::Math, None)
                .await
                .unwrap(),
        );

        assert!(matches!(
            engine.cancel_request(swap.id, b).await,
            Err(ServerError::Unauthorized(_))
        ));

        engine.cancel_request(swap.id, a).await.unwrap();
        assert!(engine.find_swap(swap.id).await.is_none());
        assert!(engine.find_history_swap(swap.id).await.is_none());
    }

    #[tokio::test]
    async fn incomes_counts_only_incoming_pending() {
        let engine = test_engine().await;
        let a = StudentId::new();
        let b = StudentId::new();
        let c = StudentId::new();

        // a asks b, c asks a.
        created(
            engine
                .request_help(a, b, Subject::Math, None)
                .await
                .unwrap(),
        );
        created(
            engine
                .request_help(c, a, Subject::Physics, None)
                .await
                .unwrap(),
        );

        assert_eq!(engine.new_incomes_count(a).await, 1);
        assert_eq!(engine.new_incomes_count(b).await, 1);
        assert_eq!(engine.new_incomes_count(c).await, 0);
    }

    #[tokio::test]
    async fn rehydration_restores_indices() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.db");

        let a = StudentId::new();
        let b = StudentId::new();
        let swap_id;
        {
            let gateway = Arc::new(Gateway::new(
                Database::open_at(&path).unwrap(),
                Duration::from_secs(1),
            ));
            let engine = SwapEngine::load(gateway).await.unwrap();
            let swap = created(
                engine
                    .request_help(a, b, Subject::Math, None)
                    .await
                    .unwrap(),
            );
            swap_id = swap.id;
            engine.confirm(swap_id).await.unwrap();
        }

        // A fresh process sees the same working set.
        let gateway = Arc::new(Gateway::new(
            Database::open_at(&path).unwrap(),
            Duration::from_secs(1),
        ));
        let engine = SwapEngine::load(gateway).await.unwrap();

        let swap = engine.find_swap(swap_id).await.unwrap();
        assert_eq!(swap.status, SwapStatus::Confirmed);
        assert_eq!(engine.active_swap_for_pair(b, a).await.unwrap().id, swap_id);
    }
}
