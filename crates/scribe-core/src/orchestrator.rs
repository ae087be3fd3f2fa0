//! Generation orchestrator
//!
//! The central state machine of the pipeline. A submission is gated in
//! order — identity, then credit, then connectivity — and either issued
//! immediately, deferred into the single-slot queue, or blocked. A queued
//! request replays exactly once when connectivity returns, re-checking
//! credit at drain time. Credit exhaustion at any point triggers the
//! purchase offer and never queues, even offline.
//!
//! Gating runs entirely under one lock with no awaits, so no other gating
//! evaluation can interleave for the same instance; the lock is never held
//! across a remote call. Every call resumption is validated against the
//! attempt token captured when submission began — a stale completion is
//! discarded rather than allowed to corrupt a newer attempt's state.

use crate::checkout::PurchaseFlowBridge;
use crate::connectivity::{ConnectivityMonitor, ConnectivityState};
use crate::error::PipelineError;
use crate::event::{EventBus, PipelineEvent};
use crate::ledger::CreditLedger;
use crate::queue::RequestQueue;
use crate::remote::{GenerationCallError, GenerationClient};
use crate::types::{GenerationInput, GenerationReceipt, IdentityRef, PendingRequest};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

/// Lifecycle of the pipeline, one explicit enum instead of overlapping
/// booleans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Gating,
    Queued,
    Submitting,
    Succeeded,
    Failed,
    BlockedNoCredit,
    BlockedNoAuth,
}

/// How a `submit` call resolved without error.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// The remote call completed and content came back.
    Completed(GenerationReceipt),

    /// Offline with credit available: deferred into the queue. Carries the
    /// request this enqueue displaced, if one was waiting.
    Queued { displaced: Option<PendingRequest> },
}

struct AttemptState {
    state: PipelineState,
    /// Next attempt token to issue (monotonically increasing)
    next_token: u64,
    /// Token of the in-flight attempt while Submitting
    current_token: Option<u64>,
    /// Retained for display until overwritten by a newer attempt
    last_result: Option<Result<GenerationReceipt, PipelineError>>,
}

/// What the gate decided, computed under the state lock.
enum GateDecision {
    Rejected,
    Blocked(PipelineError),
    Queue(GenerationInput),
    Submit {
        token: u64,
        identity: IdentityRef,
        input: GenerationInput,
    },
}

/// Central state machine driving gating, queuing, submission and replay.
///
/// Owns the attempt lifecycle and token issuance; ledger and queue are
/// injected owned collaborators, never touched by presentation code.
pub struct GenerationOrchestrator {
    identity: RwLock<Option<IdentityRef>>,
    generation: Arc<dyn GenerationClient>,
    ledger: CreditLedger,
    queue: RequestQueue,
    checkout: PurchaseFlowBridge,
    connectivity: Arc<ConnectivityMonitor>,
    events: EventBus,
    inner: Mutex<AttemptState>,

    /// One suspect hint per online period
    suspect_reported: AtomicBool,

    started: AtomicBool,
    shutdown_tx: Mutex<Option<mpsc::Sender<()>>>,
}

impl GenerationOrchestrator {
    pub fn new(
        identity: Option<IdentityRef>,
        generation: Arc<dyn GenerationClient>,
        ledger: CreditLedger,
        queue: RequestQueue,
        checkout: PurchaseFlowBridge,
        connectivity: Arc<ConnectivityMonitor>,
    ) -> Self {
        Self {
            identity: RwLock::new(identity),
            generation,
            ledger,
            queue,
            checkout,
            connectivity,
            events: EventBus::default_capacity(),
            inner: Mutex::new(AttemptState {
                state: PipelineState::Idle,
                next_token: 0,
                current_token: None,
                last_result: None,
            }),
            suspect_reported: AtomicBool::new(false),
            started: AtomicBool::new(false),
            shutdown_tx: Mutex::new(None),
        }
    }

    /// Event bus for presenters.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn ledger(&self) -> &CreditLedger {
        &self.ledger
    }

    pub fn queue(&self) -> &RequestQueue {
        &self.queue
    }

    pub fn checkout(&self) -> &PurchaseFlowBridge {
        &self.checkout
    }

    pub fn state(&self) -> PipelineState {
        self.inner.lock().state
    }

    /// Result of the most recent finished attempt, retained for display.
    pub fn last_result(&self) -> Option<Result<GenerationReceipt, PipelineError>> {
        self.inner.lock().last_result.clone()
    }

    pub fn identity(&self) -> Option<IdentityRef> {
        self.identity.read().clone()
    }

    pub fn set_identity(&self, identity: Option<IdentityRef>) {
        *self.identity.write() = identity;
    }

    /// Whether the submission affordance should be enabled: identity
    /// present, credit available, and no call in flight.
    pub fn can_submit(&self) -> bool {
        // One guard at a time: gate() acquires these in the opposite order
        let signed_in = self.identity.read().is_some();
        let has_credit = self.ledger.has_credit();
        let in_flight = self.inner.lock().state == PipelineState::Submitting;
        signed_in && has_credit && !in_flight
    }

    /// Start the replay loop: on every reconnection edge the queued request
    /// (if any) is drained and retried once. Idempotent.
    pub fn start(self: Arc<Self>) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        *self.shutdown_tx.lock() = Some(shutdown_tx);

        let orchestrator = self;
        let mut edges = orchestrator.connectivity.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    edge = edges.recv() => {
                        match edge {
                            Ok(state) => orchestrator.handle_connectivity_edge(state).await,
                            Err(broadcast::error::RecvError::Lagged(missed)) => {
                                warn!(missed, "Connectivity edges lagged, resyncing from current state");
                                let state = orchestrator.connectivity.current_state();
                                orchestrator.handle_connectivity_edge(state).await;
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Orchestrator shutting down");
                        break;
                    }
                }
            }
        });
    }

    /// Stop the replay loop, if started.
    pub async fn shutdown(&self) {
        let tx = self.shutdown_tx.lock().take();
        if let Some(tx) = tx {
            let _ = tx.send(()).await;
        }
    }

    /// Submit a generation request.
    ///
    /// Gates in order (auth, credit, connectivity), then either drives the
    /// remote call to completion, defers into the single-slot queue, or
    /// blocks. A submit while another call is in flight is rejected outright
    /// and leaves the in-flight attempt untouched.
    pub async fn submit(&self, input: GenerationInput) -> Result<SubmitOutcome, PipelineError> {
        let decision = self.gate(input);

        match decision {
            GateDecision::Rejected => {
                debug!("Submit rejected: a call is already in flight");
                Err(PipelineError::AlreadySubmitting)
            }
            GateDecision::Blocked(error) => {
                if error == PipelineError::CreditExhausted {
                    self.offer_purchase();
                }
                self.events
                    .publish(PipelineEvent::AttemptFinished(Err(error.clone())));
                Err(error)
            }
            GateDecision::Queue(input) => {
                let displaced = self.queue.enqueue(input);
                if let Some(previous) = displaced.clone() {
                    info!(
                        enqueued_at = %previous.enqueued_at,
                        "Deferred request displaced by a newer submit"
                    );
                    self.events
                        .publish(PipelineEvent::RequestDiscarded(previous));
                }
                self.events.publish(PipelineEvent::RequestQueued);
                Ok(SubmitOutcome::Queued { displaced })
            }
            GateDecision::Submit {
                token,
                identity,
                input,
            } => self
                .run_attempt(token, identity, input)
                .await
                .map(SubmitOutcome::Completed),
        }
    }

    /// Ordered gate: identity, then credit, then connectivity. Runs under
    /// one lock acquisition with no awaits, so the check-then-transition is
    /// a single logical step.
    fn gate(&self, input: GenerationInput) -> GateDecision {
        let mut inner = self.inner.lock();

        if inner.state == PipelineState::Submitting {
            return GateDecision::Rejected;
        }
        self.transition(&mut inner, PipelineState::Gating);

        let Some(identity) = self.identity.read().clone() else {
            self.transition(&mut inner, PipelineState::BlockedNoAuth);
            inner.last_result = Some(Err(PipelineError::NotAuthenticated));
            return GateDecision::Blocked(PipelineError::NotAuthenticated);
        };

        // Credit exhaustion short-circuits before connectivity: never queue
        // a request that cannot be paid for.
        if !self.ledger.has_credit() {
            self.transition(&mut inner, PipelineState::BlockedNoCredit);
            inner.last_result = Some(Err(PipelineError::CreditExhausted));
            return GateDecision::Blocked(PipelineError::CreditExhausted);
        }

        if !self.connectivity.current_state().is_online() {
            self.transition(&mut inner, PipelineState::Queued);
            return GateDecision::Queue(input);
        }

        let token = inner.next_token;
        inner.next_token += 1;
        inner.current_token = Some(token);
        self.transition(&mut inner, PipelineState::Submitting);
        GateDecision::Submit {
            token,
            identity,
            input,
        }
    }

    /// Issue the remote call and resolve the attempt. The state lock is not
    /// held across the call; the completion is applied only if this attempt
    /// is still the current one.
    async fn run_attempt(
        &self,
        token: u64,
        identity: IdentityRef,
        input: GenerationInput,
    ) -> Result<GenerationReceipt, PipelineError> {
        debug!(token, prompt_len = input.prompt.len(), "Issuing generation call");
        let result = self.generation.generate(&identity, &input).await;

        let mut inner = self.inner.lock();
        if inner.current_token != Some(token) {
            // Superseded while in flight: discard without touching state or
            // ledger, but still resolve this caller's future.
            warn!(token, "Discarding stale generation completion");
            return match result {
                Ok(receipt) => Ok(receipt),
                Err(e) => Err(Self::map_call_error(e)),
            };
        }
        inner.current_token = None;

        match result {
            Ok(receipt) => {
                // Authoritative figure wins; only its absence permits the
                // optimistic local guess.
                match receipt.remaining_credits {
                    Some(balance) => self.ledger.apply_authoritative_balance(balance),
                    None => self.ledger.optimistic_decrement(),
                }
                self.transition(&mut inner, PipelineState::Succeeded);
                inner.last_result = Some(Ok(receipt.clone()));
                drop(inner);

                info!(token, "Generation succeeded");
                self.events
                    .publish(PipelineEvent::AttemptFinished(Ok(receipt.content.clone())));
                Ok(receipt)
            }
            Err(GenerationCallError::PaymentRequired) => {
                // Server signal overrides a possibly-stale cached balance.
                // The ledger itself is untouched on failure; a later load
                // resyncs it.
                self.transition(&mut inner, PipelineState::BlockedNoCredit);
                inner.last_result = Some(Err(PipelineError::CreditExhausted));
                drop(inner);

                info!(token, "Server demanded payment, blocking");
                self.offer_purchase();
                self.events.publish(PipelineEvent::AttemptFinished(Err(
                    PipelineError::CreditExhausted,
                )));
                Err(PipelineError::CreditExhausted)
            }
            Err(error) => {
                let error = Self::map_call_error(error);
                self.transition(&mut inner, PipelineState::Failed);
                inner.last_result = Some(Err(error.clone()));
                drop(inner);

                warn!(token, error = %error, "Generation attempt failed");
                // First failure while nominally online: the hint was wrong
                // somewhere, let sources re-verify. No hard state flip.
                if self.connectivity.current_state().is_online()
                    && !self.suspect_reported.swap(true, Ordering::SeqCst)
                {
                    self.events.publish(PipelineEvent::ConnectivitySuspect);
                }
                self.events
                    .publish(PipelineEvent::AttemptFinished(Err(error.clone())));
                Err(error)
            }
        }
    }

    fn map_call_error(error: GenerationCallError) -> PipelineError {
        match error {
            GenerationCallError::PaymentRequired => PipelineError::CreditExhausted,
            GenerationCallError::Service { message } | GenerationCallError::Transport { message } => {
                PipelineError::TransportFailure { message }
            }
        }
    }

    async fn handle_connectivity_edge(&self, state: ConnectivityState) {
        self.suspect_reported.store(false, Ordering::SeqCst);
        self.events
            .publish(PipelineEvent::ConnectivityChanged(state));

        if state.is_online() {
            self.replay_queued().await;
        }
    }

    /// Re-run the credit gate for the deferred request and retry it once.
    /// Fires on the reconnection edge; if the balance was spent elsewhere
    /// meanwhile, the request is dropped and the purchase offer shown.
    async fn replay_queued(&self) {
        enum Replay {
            Nothing,
            Dropped(PipelineError),
            Run {
                token: u64,
                identity: IdentityRef,
                pending: PendingRequest,
            },
        }

        let decision = {
            let mut inner = self.inner.lock();

            if !self.queue.is_occupied() {
                Replay::Nothing
            } else if inner.state == PipelineState::Submitting {
                // A direct submit won the race to the reconnection instant;
                // the newer intent stands and the deferred request goes.
                if let Some(stale) = self.queue.drain() {
                    self.events.publish(PipelineEvent::RequestDiscarded(stale));
                }
                Replay::Nothing
            } else if !self.ledger.has_credit() {
                self.queue.drain();
                self.transition(&mut inner, PipelineState::BlockedNoCredit);
                inner.last_result = Some(Err(PipelineError::CreditExhausted));
                Replay::Dropped(PipelineError::CreditExhausted)
            } else {
                match (self.identity.read().clone(), self.queue.drain()) {
                    (Some(identity), Some(pending)) => {
                        let token = inner.next_token;
                        inner.next_token += 1;
                        inner.current_token = Some(token);
                        self.transition(&mut inner, PipelineState::Submitting);
                        Replay::Run {
                            token,
                            identity,
                            pending,
                        }
                    }
                    (None, drained) => {
                        // Signed out while waiting: nothing replayable.
                        drop(drained);
                        self.transition(&mut inner, PipelineState::BlockedNoAuth);
                        inner.last_result = Some(Err(PipelineError::NotAuthenticated));
                        Replay::Dropped(PipelineError::NotAuthenticated)
                    }
                    (_, None) => Replay::Nothing,
                }
            }
        };

        match decision {
            Replay::Nothing => {}
            Replay::Dropped(error) => {
                info!(error = %error, "Dropping deferred request at replay gate");
                if error == PipelineError::CreditExhausted {
                    self.offer_purchase();
                }
                self.events
                    .publish(PipelineEvent::AttemptFinished(Err(error)));
            }
            Replay::Run {
                token,
                identity,
                pending,
            } => {
                info!(
                    enqueued_at = %pending.enqueued_at,
                    "Replaying deferred request after reconnection"
                );
                self.events.publish(PipelineEvent::ReplayStarted);
                // Exactly one automatic retry: if this fails too, it ends in
                // Failed with no further attempt.
                let _ = self.run_attempt(token, identity, pending.input).await;
            }
        }
    }

    fn offer_purchase(&self) {
        self.events
            .publish(PipelineEvent::PurchaseOffered(self.checkout.bundle().clone()));
    }

    fn transition(&self, inner: &mut AttemptState, next: PipelineState) {
        if inner.state == next {
            return;
        }
        debug!(from = ?inner.state, to = ?next, "Pipeline transition");
        inner.state = next;
        self.events.publish(PipelineEvent::StateChanged(next));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkout::CreditBundle;
    use crate::remote::{BalanceCallError, BalanceClient, CheckoutCallError, CheckoutClient,
        CheckoutRequest, CheckoutSession};
    use async_trait::async_trait;

    struct StaticBalance(u32);

    #[async_trait]
    impl BalanceClient for StaticBalance {
        async fn fetch_balance(&self, _identity: &IdentityRef) -> Result<u32, BalanceCallError> {
            Ok(self.0)
        }
    }

    struct NoCheckout;

    #[async_trait]
    impl CheckoutClient for NoCheckout {
        async fn create_session(
            &self,
            _request: &CheckoutRequest,
        ) -> Result<CheckoutSession, CheckoutCallError> {
            Err(CheckoutCallError {
                message: "unused".into(),
            })
        }
    }

    struct StaticGeneration(Result<GenerationReceipt, &'static str>);

    #[async_trait]
    impl GenerationClient for StaticGeneration {
        async fn generate(
            &self,
            _identity: &IdentityRef,
            _input: &GenerationInput,
        ) -> Result<GenerationReceipt, GenerationCallError> {
            self.0.clone().map_err(|m| GenerationCallError::Transport {
                message: m.to_string(),
            })
        }
    }

    fn orchestrator(
        identity: Option<&str>,
        balance: u32,
        connectivity: ConnectivityState,
        generation: Result<GenerationReceipt, &'static str>,
    ) -> GenerationOrchestrator {
        let ledger = CreditLedger::new(Arc::new(StaticBalance(balance)));
        let orchestrator = GenerationOrchestrator::new(
            identity.map(IdentityRef::new),
            Arc::new(StaticGeneration(generation)),
            ledger,
            RequestQueue::new(),
            PurchaseFlowBridge::new(
                Arc::new(NoCheckout),
                CreditBundle {
                    credit_type: "generation".into(),
                    quantity: 10,
                    unit_price_minor_units: 99,
                    line_item_label: "10 credits".into(),
                },
            ),
            Arc::new(ConnectivityMonitor::new(connectivity)),
        );
        orchestrator.ledger().apply_authoritative_balance(balance);
        orchestrator
    }

    fn receipt(content: &str, remaining: Option<u32>) -> GenerationReceipt {
        GenerationReceipt {
            content: content.into(),
            remaining_credits: remaining,
        }
    }

    #[tokio::test]
    async fn test_gate_order_auth_before_credit() {
        let orch = orchestrator(None, 0, ConnectivityState::Online, Err("unused"));
        let err = orch.submit(GenerationInput::new("x")).await.unwrap_err();
        assert_eq!(err, PipelineError::NotAuthenticated);
        assert_eq!(orch.state(), PipelineState::BlockedNoAuth);
    }

    #[tokio::test]
    async fn test_no_credit_blocks_even_offline() {
        let orch = orchestrator(Some("u"), 0, ConnectivityState::Offline, Err("unused"));
        let err = orch.submit(GenerationInput::new("x")).await.unwrap_err();
        assert_eq!(err, PipelineError::CreditExhausted);
        assert_eq!(orch.state(), PipelineState::BlockedNoCredit);
        // Credit exhaustion never queues
        assert!(!orch.queue().is_occupied());
    }

    #[tokio::test]
    async fn test_offline_with_credit_queues() {
        let orch = orchestrator(Some("u"), 2, ConnectivityState::Offline, Err("unused"));
        let outcome = orch.submit(GenerationInput::new("topic")).await.unwrap();
        assert!(matches!(outcome, SubmitOutcome::Queued { displaced: None }));
        assert_eq!(orch.state(), PipelineState::Queued);
        assert!(orch.queue().is_occupied());
    }

    #[tokio::test]
    async fn test_success_with_authoritative_balance() {
        let orch = orchestrator(
            Some("u"),
            3,
            ConnectivityState::Online,
            Ok(receipt("post", Some(2))),
        );
        let outcome = orch.submit(GenerationInput::new("topic")).await.unwrap();
        assert!(matches!(outcome, SubmitOutcome::Completed(_)));
        assert_eq!(orch.state(), PipelineState::Succeeded);
        // Overwrite, not a doubly-applied decrement
        assert_eq!(orch.ledger().balance(), 2);
    }

    #[tokio::test]
    async fn test_success_without_figure_decrements_optimistically() {
        let orch = orchestrator(
            Some("u"),
            3,
            ConnectivityState::Online,
            Ok(receipt("post", None)),
        );
        orch.submit(GenerationInput::new("topic")).await.unwrap();
        assert_eq!(orch.ledger().balance(), 2);
    }

    #[tokio::test]
    async fn test_transport_failure_leaves_ledger_untouched() {
        let orch = orchestrator(Some("u"), 3, ConnectivityState::Online, Err("boom"));
        let err = orch.submit(GenerationInput::new("topic")).await.unwrap_err();
        assert!(matches!(err, PipelineError::TransportFailure { .. }));
        assert_eq!(orch.state(), PipelineState::Failed);
        assert_eq!(orch.ledger().balance(), 3);
    }

    #[tokio::test]
    async fn test_can_submit_affordance() {
        let orch = orchestrator(Some("u"), 1, ConnectivityState::Online, Err("unused"));
        assert!(orch.can_submit());

        orch.set_identity(None);
        assert!(!orch.can_submit());

        orch.set_identity(Some(IdentityRef::new("u")));
        orch.ledger().apply_authoritative_balance(0);
        assert!(!orch.can_submit());
    }

    #[tokio::test]
    async fn test_last_result_retained_until_overwritten() {
        let orch = orchestrator(
            Some("u"),
            3,
            ConnectivityState::Online,
            Ok(receipt("first", None)),
        );
        orch.submit(GenerationInput::new("a")).await.unwrap();
        let first = orch.last_result().unwrap().unwrap();
        assert_eq!(first.content, "first");

        orch.submit(GenerationInput::new("b")).await.unwrap();
        let second = orch.last_result().unwrap().unwrap();
        assert_eq!(second.content, "first"); // same static client, new attempt
        assert_eq!(orch.state(), PipelineState::Succeeded);
    }
}
