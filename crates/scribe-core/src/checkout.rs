//! Purchase flow bridge
//!
//! When credits run out the pipeline offers a fixed credit bundle. On
//! confirmation this bridge asks the payment side channel for a checkout
//! session and hands back the redirect target. Re-triggering while a
//! session-creation call is outstanding is rejected. Ledger replenishment
//! after a completed purchase happens out-of-band and is not handled here.

use crate::error::CheckoutError;
use crate::remote::{CheckoutClient, CheckoutRequest, CheckoutSession};
use crate::types::IdentityRef;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// The fixed credit bundle offered on exhaustion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditBundle {
    /// Which metered capability these credits unlock
    pub credit_type: String,

    /// Credits in the bundle
    pub quantity: u32,

    /// Price per credit, in minor currency units
    pub unit_price_minor_units: u64,

    /// Label shown on the provider's checkout page
    pub line_item_label: String,
}

impl CreditBundle {
    pub fn total_minor_units(&self) -> u64 {
        self.quantity as u64 * self.unit_price_minor_units
    }
}

/// Resets the in-flight flag even if the session call is cancelled.
struct FlightGuard<'a>(&'a AtomicBool);

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Bridge from credit exhaustion to the payment provider.
pub struct PurchaseFlowBridge {
    client: Arc<dyn CheckoutClient>,
    bundle: CreditBundle,
    in_flight: AtomicBool,
}

impl PurchaseFlowBridge {
    pub fn new(client: Arc<dyn CheckoutClient>, bundle: CreditBundle) -> Self {
        Self {
            client,
            bundle,
            in_flight: AtomicBool::new(false),
        }
    }

    /// The bundle this bridge offers.
    pub fn bundle(&self) -> &CreditBundle {
        &self.bundle
    }

    /// Whether a session-creation call is outstanding. Drives disabling the
    /// confirm affordance.
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Create a checkout session for the offered bundle and return the
    /// redirect target. At most one call may be outstanding.
    pub async fn create_session(
        &self,
        identity: Option<&IdentityRef>,
    ) -> Result<CheckoutSession, CheckoutError> {
        let identity = identity.ok_or(CheckoutError::NotAuthenticated)?;

        if self.in_flight.swap(true, Ordering::SeqCst) {
            warn!("Checkout session already being created, rejecting re-trigger");
            return Err(CheckoutError::InFlight);
        }
        let _guard = FlightGuard(&self.in_flight);

        let request = CheckoutRequest {
            identity: identity.clone(),
            credit_type: self.bundle.credit_type.clone(),
            quantity: self.bundle.quantity,
            unit_price_minor_units: self.bundle.unit_price_minor_units,
            line_item_label: self.bundle.line_item_label.clone(),
        };

        match self.client.create_session(&request).await {
            Ok(session) => {
                info!(redirect = %session.redirect_url, "Checkout session created");
                Ok(session)
            }
            Err(e) => {
                warn!(error = %e, "Checkout session creation failed");
                Err(CheckoutError::CreationFailed {
                    message: e.message,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::CheckoutCallError;
    use async_trait::async_trait;
    use tokio::sync::Notify;

    fn bundle() -> CreditBundle {
        CreditBundle {
            credit_type: "generation".into(),
            quantity: 10,
            unit_price_minor_units: 99,
            line_item_label: "10 generation credits".into(),
        }
    }

    struct FixedCheckout(Result<&'static str, &'static str>);

    #[async_trait]
    impl CheckoutClient for FixedCheckout {
        async fn create_session(
            &self,
            _request: &CheckoutRequest,
        ) -> Result<CheckoutSession, CheckoutCallError> {
            match self.0 {
                Ok(url) => Ok(CheckoutSession {
                    redirect_url: url.to_string(),
                }),
                Err(m) => Err(CheckoutCallError {
                    message: m.to_string(),
                }),
            }
        }
    }

    /// Blocks until released, so tests can hold a call in flight.
    struct BlockingCheckout(Arc<Notify>);

    #[async_trait]
    impl CheckoutClient for BlockingCheckout {
        async fn create_session(
            &self,
            _request: &CheckoutRequest,
        ) -> Result<CheckoutSession, CheckoutCallError> {
            self.0.notified().await;
            Ok(CheckoutSession {
                redirect_url: "https://pay.example.com/s/1".to_string(),
            })
        }
    }

    #[test]
    fn test_bundle_total() {
        assert_eq!(bundle().total_minor_units(), 990);
    }

    #[tokio::test]
    async fn test_create_session_requires_identity() {
        let bridge = PurchaseFlowBridge::new(Arc::new(FixedCheckout(Ok("u"))), bundle());
        let err = bridge.create_session(None).await.unwrap_err();
        assert!(matches!(err, CheckoutError::NotAuthenticated));
    }

    #[tokio::test]
    async fn test_create_session_returns_redirect() {
        let bridge = PurchaseFlowBridge::new(
            Arc::new(FixedCheckout(Ok("https://pay.example.com/s/42"))),
            bundle(),
        );
        let id = IdentityRef::new("user-1");
        let session = bridge.create_session(Some(&id)).await.unwrap();
        assert_eq!(session.redirect_url, "https://pay.example.com/s/42");
        assert!(!bridge.is_in_flight());
    }

    #[tokio::test]
    async fn test_create_session_failure_clears_in_flight() {
        let bridge = PurchaseFlowBridge::new(Arc::new(FixedCheckout(Err("declined"))), bundle());
        let id = IdentityRef::new("user-1");
        let err = bridge.create_session(Some(&id)).await.unwrap_err();
        assert!(matches!(err, CheckoutError::CreationFailed { .. }));
        // Manual retry stays possible after a failure
        assert!(!bridge.is_in_flight());
    }

    #[tokio::test]
    async fn test_double_submission_rejected_while_outstanding() {
        let release = Arc::new(Notify::new());
        let bridge = Arc::new(PurchaseFlowBridge::new(
            Arc::new(BlockingCheckout(Arc::clone(&release))),
            bundle(),
        ));
        let id = IdentityRef::new("user-1");

        let first = tokio::spawn({
            let bridge = Arc::clone(&bridge);
            let id = id.clone();
            async move { bridge.create_session(Some(&id)).await }
        });

        // Wait until the first call is holding the flight slot
        while !bridge.is_in_flight() {
            tokio::task::yield_now().await;
        }

        let err = bridge.create_session(Some(&id)).await.unwrap_err();
        assert!(matches!(err, CheckoutError::InFlight));

        release.notify_one();
        assert!(first.await.unwrap().is_ok());
        assert!(!bridge.is_in_flight());
    }
}
