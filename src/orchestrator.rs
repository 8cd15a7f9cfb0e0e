use std::future::Future;
use std::sync::Mutex;

use log::debug;

use crate::error::{Error, Result};
use crate::types::TxHash;
use crate::wallet::WalletSession;

/// Lifecycle of the single transaction slot. Terminal states persist until
/// the consumer acknowledges them with [`TransactionOrchestrator::reset`].
#[derive(Debug, Clone, PartialEq)]
pub enum TxStatus {
    Idle,
    Pending,
    Success { hash: TxHash },
    Error { message: String },
}

/// Single-slot state machine for user-initiated mutating actions. At most
/// one transaction is in flight at a time; a submission while the slot is
/// occupied is refused, never queued.
pub struct TransactionOrchestrator {
    session: WalletSession,
    // Guards only state flips, never held across an await.
    slot: Mutex<TxStatus>,
}

impl TransactionOrchestrator {
    pub fn new(session: WalletSession) -> Self {
        Self {
            session,
            slot: Mutex::new(TxStatus::Idle),
        }
    }

    pub fn status(&self) -> TxStatus {
        self.slot.lock().unwrap().clone()
    }

    /// Acknowledges a terminal outcome and frees the slot. Refused while a
    /// transaction is still pending; there is no cancellation once submitted.
    pub fn reset(&self) -> Result<()> {
        let mut slot = self.slot.lock().unwrap();
        if *slot == TxStatus::Pending {
            return Err(Error::TransactionPending);
        }
        *slot = TxStatus::Idle;
        Ok(())
    }

    /// Occupies the slot, runs the submission and records the outcome. On
    /// success the session's balances are refreshed as an observable side
    /// effect before the reference is returned.
    pub async fn submit<F, Fut>(&self, action: F) -> Result<TxHash>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<TxHash>>,
    {
        {
            let mut slot = self.slot.lock().unwrap();
            match &*slot {
                TxStatus::Idle => *slot = TxStatus::Pending,
                TxStatus::Pending => return Err(Error::TransactionPending),
                TxStatus::Success { .. } | TxStatus::Error { .. } => {
                    return Err(Error::UnacknowledgedOutcome)
                }
            }
        }
        match action().await {
            Ok(hash) => {
                *self.slot.lock().unwrap() = TxStatus::Success { hash: hash.clone() };
                debug!("transaction submitted: {}", hash);
                self.session.refresh_balances().await;
                Ok(hash)
            }
            Err(e) => {
                let message = e.to_string();
                *self.slot.lock().unwrap() = TxStatus::Error {
                    message: message.clone(),
                };
                debug!("transaction failed: {}", message);
                Err(e)
            }
        }
    }
}
