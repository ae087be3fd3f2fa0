//! Client-side mirror of the remaining-credit counter
//!
//! The balance here is a cached view of one metered capability. Two mutation
//! paths exist and are mutually exclusive per call: an authoritative
//! overwrite when the server returned an explicit figure, and an optimistic
//! local decrement when a success carried no figure. Failures never touch
//! the balance. Replenishment after a purchase is observed only through a
//! later `load`.

use crate::error::LedgerError;
use crate::remote::{BalanceCallError, BalanceClient};
use crate::types::IdentityRef;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, warn};

struct LedgerInner {
    balance: u32,
    last_synced_at: Option<DateTime<Utc>>,
}

/// Remaining-credit mirror for one metered capability.
///
/// Balance is unsigned: the never-negative invariant is carried by the type,
/// and the optimistic path saturates at zero.
pub struct CreditLedger {
    client: Arc<dyn BalanceClient>,
    inner: RwLock<LedgerInner>,
}

impl CreditLedger {
    /// Create a ledger with no synced balance yet. Until the first
    /// successful `load`, the balance reads 0 and gates to no-credit.
    pub fn new(client: Arc<dyn BalanceClient>) -> Self {
        Self {
            client,
            inner: RwLock::new(LedgerInner {
                balance: 0,
                last_synced_at: None,
            }),
        }
    }

    /// Fetch the current balance from the server.
    ///
    /// On transport failure the last-known value is retained (0 if never
    /// loaded) — the error is non-fatal by design.
    pub async fn load(&self, identity: Option<&IdentityRef>) -> Result<u32, LedgerError> {
        let identity = identity.ok_or(LedgerError::NotAuthenticated)?;

        match self.client.fetch_balance(identity).await {
            Ok(balance) => {
                let mut inner = self.inner.write();
                inner.balance = balance;
                inner.last_synced_at = Some(Utc::now());
                debug!(balance, "Credit balance synced");
                Ok(balance)
            }
            Err(BalanceCallError::NotAuthenticated) => Err(LedgerError::NotAuthenticated),
            Err(BalanceCallError::Transport { message }) => {
                warn!(%message, "Balance sync failed, keeping last-known value");
                Err(LedgerError::RemoteUnavailable { message })
            }
        }
    }

    /// Current cached balance.
    pub fn balance(&self) -> u32 {
        self.inner.read().balance
    }

    /// `balance > 0`
    pub fn has_credit(&self) -> bool {
        self.balance() > 0
    }

    /// When the balance was last confirmed by the server.
    pub fn last_synced_at(&self) -> Option<DateTime<Utc>> {
        self.inner.read().last_synced_at
    }

    /// Hard overwrite with a figure the server returned. Always wins over
    /// any optimistic guess.
    pub fn apply_authoritative_balance(&self, balance: u32) {
        let mut inner = self.inner.write();
        inner.balance = balance;
        inner.last_synced_at = Some(Utc::now());
        debug!(balance, "Authoritative balance applied");
    }

    /// Local-only adjustment for a confirmed success that carried no
    /// authoritative figure. Never called on failure, never pre-confirmation.
    pub fn optimistic_decrement(&self) {
        let mut inner = self.inner.write();
        inner.balance = inner.balance.saturating_sub(1);
        debug!(balance = inner.balance, "Optimistic decrement");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FixedBalance(Result<u32, &'static str>);

    #[async_trait]
    impl BalanceClient for FixedBalance {
        async fn fetch_balance(&self, _identity: &IdentityRef) -> Result<u32, BalanceCallError> {
            self.0.map_err(|m| BalanceCallError::Transport {
                message: m.to_string(),
            })
        }
    }

    fn ledger(result: Result<u32, &'static str>) -> CreditLedger {
        CreditLedger::new(Arc::new(FixedBalance(result)))
    }

    #[tokio::test]
    async fn test_load_requires_identity() {
        let ledger = ledger(Ok(5));
        let err = ledger.load(None).await.unwrap_err();
        assert!(matches!(err, LedgerError::NotAuthenticated));
        assert_eq!(ledger.balance(), 0);
        assert!(ledger.last_synced_at().is_none());
    }

    #[tokio::test]
    async fn test_load_syncs_balance_and_stamp() {
        let ledger = ledger(Ok(5));
        let id = IdentityRef::new("user-1");
        assert_eq!(ledger.load(Some(&id)).await.unwrap(), 5);
        assert_eq!(ledger.balance(), 5);
        assert!(ledger.last_synced_at().is_some());
    }

    #[tokio::test]
    async fn test_load_failure_keeps_last_known_value() {
        let ledger = ledger(Ok(3));
        let id = IdentityRef::new("user-1");
        ledger.load(Some(&id)).await.unwrap();

        let failing = CreditLedger {
            client: Arc::new(FixedBalance(Err("timeout"))),
            inner: RwLock::new(LedgerInner {
                balance: 3,
                last_synced_at: ledger.last_synced_at(),
            }),
        };
        let err = failing.load(Some(&id)).await.unwrap_err();
        assert!(matches!(err, LedgerError::RemoteUnavailable { .. }));
        assert_eq!(failing.balance(), 3);
    }

    #[test]
    fn test_optimistic_decrement_saturates_at_zero() {
        let ledger = ledger(Ok(0));
        ledger.optimistic_decrement();
        assert_eq!(ledger.balance(), 0);

        ledger.apply_authoritative_balance(2);
        ledger.optimistic_decrement();
        ledger.optimistic_decrement();
        ledger.optimistic_decrement();
        assert_eq!(ledger.balance(), 0);
    }

    #[test]
    fn test_authoritative_supersedes_optimistic_guess() {
        let ledger = ledger(Ok(0));
        ledger.apply_authoritative_balance(3);
        ledger.optimistic_decrement();
        assert_eq!(ledger.balance(), 2);

        // Server figure wins outright, not merged with the local guess
        ledger.apply_authoritative_balance(7);
        assert_eq!(ledger.balance(), 7);
    }
}
