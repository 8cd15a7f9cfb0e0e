use thiserror::Error;

use crate::types::TokenAmount;

pub type Result<T> = std::result::Result<T, Error>;

/// Failure modes of the orchestration layer. `Reverted` carries the ledger's
/// own message untouched; everything else originates on this side.
#[derive(Debug, Error)]
pub enum Error {
    #[error("signing provider not found, install a wallet or use simulated mode")]
    ProviderUnavailable,
    #[error("wallet connection was rejected")]
    ConnectionRejected,
    #[error("timed out waiting for the wallet to become ready")]
    ConnectionTimeout,
    #[error("no wallet is connected")]
    NotConnected,
    #[error("insufficient token balance: have {have}, need {need}")]
    InsufficientFunds { have: TokenAmount, need: TokenAmount },
    #[error("bet amount {amount} is outside the allowed range {min}..={max}")]
    BetOutOfBounds {
        amount: TokenAmount,
        min: TokenAmount,
        max: TokenAmount,
    },
    #[error("spend authorization still below {required} after approval")]
    AuthorizationShortfall { required: TokenAmount },
    #[error("another transaction is still pending")]
    TransactionPending,
    #[error("previous transaction outcome has not been acknowledged")]
    UnacknowledgedOutcome,
    #[error("action not permitted: {0}")]
    NotPermitted(&'static str),
    #[error("{0}")]
    Reverted(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("malformed ledger response: {0}")]
    MalformedResponse(String),
}
