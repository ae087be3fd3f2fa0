//! Remote service seams
//!
//! The orchestrator talks to the platform through these traits so the state
//! machine is unit-testable without a network. `http` carries the production
//! reqwest implementations; `wire` the serde contracts.

pub mod http;
pub mod wire;

use crate::types::{GenerationInput, GenerationReceipt, IdentityRef};
use async_trait::async_trait;
use thiserror::Error;

/// Failure of a generation call, before policy mapping.
///
/// Payment-required is its own variant: the orchestrator treats it as an
/// authoritative credit signal, not as a generic failure.
#[derive(Debug, Error)]
pub enum GenerationCallError {
    /// Explicit payment-required signal from the service
    #[error("payment required")]
    PaymentRequired,

    /// The service answered and refused the request
    #[error("{message}")]
    Service { message: String },

    /// The call never completed (DNS, connect, timeout, ...)
    #[error("{message}")]
    Transport { message: String },
}

/// Failure of a balance query.
#[derive(Debug, Error)]
pub enum BalanceCallError {
    /// The service rejected the identity
    #[error("not signed in")]
    NotAuthenticated,

    /// The call never completed
    #[error("{message}")]
    Transport { message: String },
}

/// Failure of a checkout-session creation call.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct CheckoutCallError {
    pub message: String,
}

/// Parameters of a checkout-session creation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutRequest {
    pub identity: IdentityRef,
    pub credit_type: String,
    pub quantity: u32,
    pub unit_price_minor_units: u64,
    pub line_item_label: String,
}

/// A created checkout session, ready for redirect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSession {
    pub redirect_url: String,
}

/// The opaque remote generation service.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    async fn generate(
        &self,
        identity: &IdentityRef,
        input: &GenerationInput,
    ) -> Result<GenerationReceipt, GenerationCallError>;
}

/// The remaining-credit counter, server side.
#[async_trait]
pub trait BalanceClient: Send + Sync {
    async fn fetch_balance(&self, identity: &IdentityRef) -> Result<u32, BalanceCallError>;
}

/// The payment-session side channel.
#[async_trait]
pub trait CheckoutClient: Send + Sync {
    async fn create_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, CheckoutCallError>;
}
