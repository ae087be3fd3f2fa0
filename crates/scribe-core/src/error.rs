//! Error types for scribe-core
//!
//! One variant per failure policy: every remote-call failure is mapped to
//! exactly one of these at the orchestrator boundary, so no attempt ends
//! without a terminal state and a user-facing message.

use thiserror::Error;

/// Failures of a generation attempt, as surfaced to callers.
///
/// `NotAuthenticated` and `CreditExhausted` are gate denials: the request
/// never left the client. `TransportFailure` is a call that was issued and
/// did not succeed; it is surfaced once and never retried automatically.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PipelineError {
    /// No identity at gating. No queuing, no retry.
    #[error("not signed in")]
    NotAuthenticated,

    /// Balance was zero client-side, or the server answered payment-required.
    /// Triggers the purchase offer. Never queued, even offline.
    #[error("no generation credits remaining")]
    CreditExhausted,

    /// Transport or service failure while believed online. Ledger untouched.
    #[error("generation request failed: {message}")]
    TransportFailure { message: String },

    /// A submit arrived while another call was in flight. Rejected outright.
    #[error("a generation request is already in flight")]
    AlreadySubmitting,
}

/// Errors from [`crate::ledger::CreditLedger::load`].
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Identity absent; the balance endpoint requires one.
    #[error("not signed in")]
    NotAuthenticated,

    /// Transport error. Non-fatal: the ledger keeps its last-known value.
    #[error("balance service unavailable: {message}")]
    RemoteUnavailable { message: String },
}

/// Errors from [`crate::checkout::PurchaseFlowBridge::create_session`].
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// Identity absent; checkout sessions are always tied to a buyer.
    #[error("not signed in")]
    NotAuthenticated,

    /// A session-creation call is already outstanding.
    #[error("a checkout session is already being created")]
    InFlight,

    /// The payment provider refused or the call failed. Manual retry only.
    #[error("could not start checkout: {message}")]
    CreationFailed { message: String },
}
