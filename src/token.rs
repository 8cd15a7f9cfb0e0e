use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use log::debug;

use crate::error::{Error, Result};
use crate::types::{Address, NativeAmount, TokenAmount, TxHash};

/// The remote token ledger. `approve` is a mutating call under the same
/// fee-ceiling/reference contract as the settlement ledger's writes.
#[async_trait]
pub trait RemoteTokenLedger: Send + Sync {
    async fn balance_of(&self, account: &Address) -> Result<TokenAmount>;
    async fn allowance(&self, owner: &Address, spender: &Address) -> Result<TokenAmount>;
    /// Replaces the standing authorization; amounts do not accumulate.
    async fn approve(
        &self,
        spender: &Address,
        amount: TokenAmount,
        fee_limit: NativeAmount,
    ) -> Result<TxHash>;
}

/// Typed adapter bound to the settlement contract as spender.
#[derive(Clone)]
pub struct TokenClient {
    remote: Arc<dyn RemoteTokenLedger>,
    spender: Address,
    fee_limit: NativeAmount,
}

impl TokenClient {
    pub fn new(
        remote: Arc<dyn RemoteTokenLedger>,
        spender: Address,
        fee_limit: NativeAmount,
    ) -> Self {
        Self {
            remote,
            spender,
            fee_limit,
        }
    }
    pub async fn balance_of(&self, account: &Address) -> Result<TokenAmount> {
        self.remote.balance_of(account).await
    }
    /// Standing authorization of `owner` towards the settlement contract.
    pub async fn allowance(&self, owner: &Address) -> Result<TokenAmount> {
        self.remote.allowance(owner, &self.spender).await
    }
    /// Authorizes the settlement contract to draw up to `amount`.
    pub async fn approve(&self, amount: TokenAmount) -> Result<TxHash> {
        let hash = self
            .remote
            .approve(&self.spender, amount, self.fee_limit)
            .await?;
        debug!("approved {} for {}, tx {}", amount, self.spender, hash);
        Ok(hash)
    }
}

/// In-memory token ledger for tests and the CLI's simulated mode. The caller
/// identity the next mutating call signs as is set via [`TestToken::impersonate`].
#[derive(Debug, Default)]
pub struct TestToken {
    caller: Mutex<Option<Address>>,
    balances: Mutex<HashMap<Address, TokenAmount>>,
    allowances: Mutex<HashMap<(Address, Address), TokenAmount>>,
    approvals: Mutex<Vec<(Address, TokenAmount)>>,
    fail_next_approve: AtomicBool,
    consume_on_approve: Mutex<Option<TokenAmount>>,
    tx_counter: Mutex<u64>,
}

impl TestToken {
    pub fn impersonate(&self, caller: Address) {
        *self.caller.lock().unwrap() = Some(caller);
    }
    pub fn credit(&self, account: Address, amount: TokenAmount) {
        *self.balances.lock().unwrap().entry(account).or_insert(0) += amount;
    }
    /// History of (spender, amount) approve calls, for asserting call counts.
    pub fn approvals(&self) -> Vec<(Address, TokenAmount)> {
        self.approvals.lock().unwrap().clone()
    }
    pub fn fail_next_approve(&self) {
        self.fail_next_approve.store(true, Ordering::SeqCst);
    }
    /// Simulates a spend racing the next approval: right after it lands, the
    /// standing authorization is drawn down by `amount`.
    pub fn consume_on_next_approve(&self, amount: TokenAmount) {
        *self.consume_on_approve.lock().unwrap() = Some(amount);
    }
    fn next_hash(&self) -> TxHash {
        let mut counter = self.tx_counter.lock().unwrap();
        *counter += 1;
        format!("0xtoken{:04}", *counter)
    }
    fn caller(&self) -> Result<Address> {
        self.caller
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| Error::Reverted("no signing identity".to_string()))
    }
}

#[async_trait]
impl RemoteTokenLedger for TestToken {
    async fn balance_of(&self, account: &Address) -> Result<TokenAmount> {
        Ok(*self.balances.lock().unwrap().get(account).unwrap_or(&0))
    }
    async fn allowance(&self, owner: &Address, spender: &Address) -> Result<TokenAmount> {
        Ok(*self
            .allowances
            .lock()
            .unwrap()
            .get(&(owner.clone(), spender.clone()))
            .unwrap_or(&0))
    }
    async fn approve(
        &self,
        spender: &Address,
        amount: TokenAmount,
        _fee_limit: NativeAmount,
    ) -> Result<TxHash> {
        if self.fail_next_approve.swap(false, Ordering::SeqCst) {
            return Err(Error::Reverted("approval failed".to_string()));
        }
        let owner = self.caller()?;
        self.approvals
            .lock()
            .unwrap()
            .push((spender.clone(), amount));
        let mut granted = amount;
        if let Some(consumed) = self.consume_on_approve.lock().unwrap().take() {
            granted = granted.saturating_sub(consumed);
        }
        self.allowances
            .lock()
            .unwrap()
            .insert((owner, spender.clone()), granted);
        Ok(self.next_hash())
    }
}
