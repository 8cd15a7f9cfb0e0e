use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use log::debug;

use crate::error::{Error, Result};
use crate::types::{
    Address, NativeAmount, NewPrediction, Page, Prediction, PredictionId, PredictionOption,
    PredictionStatus, RawPrediction, TxHash,
};

/// The settlement contract, one typed binding per method. Reads return wire
/// values (sentinel addresses, coded enums); every write takes a fee ceiling
/// and returns a transaction reference on submission. Confirmation is
/// observed later by re-reading state; nothing here retries.
#[async_trait]
pub trait RemoteLedger: Send + Sync {
    async fn admin(&self) -> Result<Address>;
    async fn platform_fee_percent(&self) -> Result<u64>;
    async fn native_balance(&self, account: &Address) -> Result<NativeAmount>;
    async fn get_prediction(&self, id: PredictionId) -> Result<RawPrediction>;
    async fn get_open_predictions(&self, offset: u64, limit: u64) -> Result<Page>;
    async fn get_matched_predictions(&self, offset: u64, limit: u64) -> Result<Page>;
    async fn get_user_predictions(&self, account: &Address) -> Result<Vec<PredictionId>>;
    async fn get_winner(&self, id: PredictionId) -> Result<Address>;
    async fn create_prediction(
        &self,
        params: &NewPrediction,
        fee_limit: NativeAmount,
    ) -> Result<TxHash>;
    async fn join_prediction(
        &self,
        id: PredictionId,
        choice: PredictionOption,
        fee_limit: NativeAmount,
    ) -> Result<TxHash>;
    async fn resolve_prediction(
        &self,
        id: PredictionId,
        winning_option: PredictionOption,
        fee_limit: NativeAmount,
    ) -> Result<TxHash>;
    async fn claim_winnings(&self, id: PredictionId, fee_limit: NativeAmount) -> Result<TxHash>;
    async fn cancel_prediction(&self, id: PredictionId, fee_limit: NativeAmount)
        -> Result<TxHash>;
    async fn emergency_refund(&self, id: PredictionId, fee_limit: NativeAmount)
        -> Result<TxHash>;
}

/// Typed read/write adapter over the raw contract binding: decodes wire
/// enums, maps the zero sentinel to absent values and injects the configured
/// fee ceiling into every write.
#[derive(Clone)]
pub struct LedgerClient {
    remote: Arc<dyn RemoteLedger>,
    fee_limit: NativeAmount,
}

impl LedgerClient {
    pub fn new(remote: Arc<dyn RemoteLedger>, fee_limit: NativeAmount) -> Self {
        Self { remote, fee_limit }
    }
    pub async fn admin(&self) -> Result<Address> {
        self.remote.admin().await
    }
    pub async fn platform_fee_percent(&self) -> Result<u64> {
        self.remote.platform_fee_percent().await
    }
    pub async fn native_balance(&self, account: &Address) -> Result<NativeAmount> {
        self.remote.native_balance(account).await
    }
    pub async fn get_prediction(&self, id: PredictionId) -> Result<Prediction> {
        self.remote.get_prediction(id).await?.try_into()
    }
    pub async fn get_open_predictions(&self, offset: u64, limit: u64) -> Result<Page> {
        self.remote.get_open_predictions(offset, limit).await
    }
    pub async fn get_matched_predictions(&self, offset: u64, limit: u64) -> Result<Page> {
        self.remote.get_matched_predictions(offset, limit).await
    }
    pub async fn get_user_predictions(&self, account: &Address) -> Result<Vec<PredictionId>> {
        self.remote.get_user_predictions(account).await
    }
    pub async fn get_winner(&self, id: PredictionId) -> Result<Option<Address>> {
        Ok(self.remote.get_winner(id).await?.into_present())
    }
    pub async fn create_prediction(&self, params: &NewPrediction) -> Result<TxHash> {
        self.remote.create_prediction(params, self.fee_limit).await
    }
    pub async fn join_prediction(
        &self,
        id: PredictionId,
        choice: PredictionOption,
    ) -> Result<TxHash> {
        self.remote
            .join_prediction(id, choice, self.fee_limit)
            .await
    }
    pub async fn resolve_prediction(
        &self,
        id: PredictionId,
        winning_option: PredictionOption,
    ) -> Result<TxHash> {
        self.remote
            .resolve_prediction(id, winning_option, self.fee_limit)
            .await
    }
    pub async fn claim_winnings(&self, id: PredictionId) -> Result<TxHash> {
        self.remote.claim_winnings(id, self.fee_limit).await
    }
    pub async fn cancel_prediction(&self, id: PredictionId) -> Result<TxHash> {
        self.remote.cancel_prediction(id, self.fee_limit).await
    }
    pub async fn emergency_refund(&self, id: PredictionId) -> Result<TxHash> {
        self.remote.emergency_refund(id, self.fee_limit).await
    }
}

/// In-memory settlement ledger for tests and the CLI's simulated mode.
/// Enforces the same status machine and preconditions as the real contract
/// and reverts with its messages. The identity mutating calls sign as is set
/// via [`TestLedger::impersonate`].
pub struct TestLedger {
    admin: Address,
    fee_percent: Mutex<u64>,
    caller: Mutex<Address>,
    counter: Mutex<PredictionId>,
    predictions: Mutex<HashMap<PredictionId, Prediction>>,
    native: Mutex<HashMap<Address, NativeAmount>>,
    failing_reads: Mutex<HashSet<PredictionId>>,
    tx_counter: Mutex<u64>,
}

impl TestLedger {
    pub fn new(admin: Address) -> Self {
        Self {
            caller: Mutex::new(admin.clone()),
            admin,
            fee_percent: Mutex::new(2),
            counter: Mutex::new(0),
            predictions: Mutex::new(HashMap::new()),
            native: Mutex::new(HashMap::new()),
            failing_reads: Mutex::new(HashSet::new()),
            tx_counter: Mutex::new(0),
        }
    }
    pub fn impersonate(&self, caller: Address) {
        *self.caller.lock().unwrap() = caller;
    }
    pub fn set_fee_percent(&self, fee_percent: u64) {
        *self.fee_percent.lock().unwrap() = fee_percent;
    }
    pub fn set_native_balance(&self, account: Address, amount: NativeAmount) {
        self.native.lock().unwrap().insert(account, amount);
    }
    /// Makes every read of `id` fail, to exercise partial view resolution.
    pub fn fail_reads_of(&self, id: PredictionId) {
        self.failing_reads.lock().unwrap().insert(id);
    }
    /// Seeds an arbitrary record, bypassing the contract preconditions.
    pub fn seed(&self, prediction: Prediction) {
        let mut counter = self.counter.lock().unwrap();
        *counter = (*counter).max(prediction.id);
        self.predictions
            .lock()
            .unwrap()
            .insert(prediction.id, prediction);
    }
    fn caller(&self) -> Address {
        self.caller.lock().unwrap().clone()
    }
    fn next_hash(&self) -> TxHash {
        let mut counter = self.tx_counter.lock().unwrap();
        *counter += 1;
        format!("0xledger{:04}", *counter)
    }
    fn page_of(&self, status: PredictionStatus, offset: u64, limit: u64) -> Page {
        let predictions = self.predictions.lock().unwrap();
        let mut ids: Vec<PredictionId> = predictions
            .values()
            .filter(|p| p.status == status)
            .map(|p| p.id)
            .collect();
        ids.sort_unstable();
        let total = ids.len() as u64;
        let ids = ids
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect();
        Page { ids, total }
    }
    fn to_raw(prediction: &Prediction) -> RawPrediction {
        RawPrediction {
            id: prediction.id,
            creator: prediction.creator.clone(),
            opponent: prediction
                .opponent
                .clone()
                .unwrap_or_else(Address::zero),
            title: prediction.title.clone(),
            description: prediction.description.clone(),
            option_a: prediction.option_a.clone(),
            option_b: prediction.option_b.clone(),
            bet_amount: prediction.bet_amount,
            creator_choice: prediction.creator_choice.code(),
            opponent_choice: prediction.opponent_choice.code(),
            status: prediction.status.code(),
            winning_option: prediction.winning_option.code(),
            created_at: prediction.created_at,
            expiry_time: prediction.expiry_time,
        }
    }
}

#[async_trait]
impl RemoteLedger for TestLedger {
    async fn admin(&self) -> Result<Address> {
        Ok(self.admin.clone())
    }
    async fn platform_fee_percent(&self) -> Result<u64> {
        Ok(*self.fee_percent.lock().unwrap())
    }
    async fn native_balance(&self, account: &Address) -> Result<NativeAmount> {
        Ok(*self.native.lock().unwrap().get(account).unwrap_or(&0))
    }
    async fn get_prediction(&self, id: PredictionId) -> Result<RawPrediction> {
        if self.failing_reads.lock().unwrap().contains(&id) {
            return Err(Error::Network("transient fetch failure".to_string()));
        }
        self.predictions
            .lock()
            .unwrap()
            .get(&id)
            .map(Self::to_raw)
            .ok_or_else(|| Error::Reverted("prediction does not exist".to_string()))
    }
    async fn get_open_predictions(&self, offset: u64, limit: u64) -> Result<Page> {
        Ok(self.page_of(PredictionStatus::Open, offset, limit))
    }
    async fn get_matched_predictions(&self, offset: u64, limit: u64) -> Result<Page> {
        Ok(self.page_of(PredictionStatus::Matched, offset, limit))
    }
    async fn get_user_predictions(&self, account: &Address) -> Result<Vec<PredictionId>> {
        let predictions = self.predictions.lock().unwrap();
        let mut ids: Vec<PredictionId> = predictions
            .values()
            .filter(|p| p.creator == *account || p.opponent.as_ref() == Some(account))
            .map(|p| p.id)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }
    async fn get_winner(&self, id: PredictionId) -> Result<Address> {
        let predictions = self.predictions.lock().unwrap();
        let prediction = predictions
            .get(&id)
            .ok_or_else(|| Error::Reverted("prediction does not exist".to_string()))?;
        match prediction.status {
            PredictionStatus::Resolved | PredictionStatus::Claimed => {
                if prediction.creator_choice == prediction.winning_option {
                    Ok(prediction.creator.clone())
                } else {
                    Ok(prediction.opponent.clone().unwrap_or_else(Address::zero))
                }
            }
            _ => Ok(Address::zero()),
        }
    }
    async fn create_prediction(
        &self,
        params: &NewPrediction,
        _fee_limit: NativeAmount,
    ) -> Result<TxHash> {
        let now = Utc::now().timestamp();
        if params.bet_amount == 0 {
            return Err(Error::Reverted("bet amount must be positive".to_string()));
        }
        if params.creator_choice == PredictionOption::None {
            return Err(Error::Reverted("creator must pick a side".to_string()));
        }
        if params.expiry_time <= now {
            return Err(Error::Reverted("expiry must be in the future".to_string()));
        }
        let mut counter = self.counter.lock().unwrap();
        *counter += 1;
        let id = *counter;
        self.predictions.lock().unwrap().insert(
            id,
            Prediction {
                id,
                creator: self.caller(),
                opponent: None,
                title: params.title.clone(),
                description: params.description.clone(),
                option_a: params.option_a.clone(),
                option_b: params.option_b.clone(),
                bet_amount: params.bet_amount,
                creator_choice: params.creator_choice,
                opponent_choice: PredictionOption::None,
                status: PredictionStatus::Open,
                winning_option: PredictionOption::None,
                created_at: now,
                expiry_time: params.expiry_time,
            },
        );
        debug!("test ledger created prediction {}", id);
        Ok(self.next_hash())
    }
    async fn join_prediction(
        &self,
        id: PredictionId,
        choice: PredictionOption,
        _fee_limit: NativeAmount,
    ) -> Result<TxHash> {
        let caller = self.caller();
        let mut predictions = self.predictions.lock().unwrap();
        let prediction = predictions
            .get_mut(&id)
            .ok_or_else(|| Error::Reverted("prediction does not exist".to_string()))?;
        if prediction.status != PredictionStatus::Open {
            return Err(Error::Reverted("prediction is not open".to_string()));
        }
        if Utc::now().timestamp() > prediction.expiry_time {
            return Err(Error::Reverted("prediction has expired".to_string()));
        }
        if caller == prediction.creator {
            return Err(Error::Reverted(
                "creator cannot join own prediction".to_string(),
            ));
        }
        if choice != prediction.creator_choice.opposite() {
            return Err(Error::Reverted("must take the opposite side".to_string()));
        }
        prediction.opponent = Some(caller);
        prediction.opponent_choice = choice;
        prediction.status = PredictionStatus::Matched;
        Ok(self.next_hash())
    }
    async fn resolve_prediction(
        &self,
        id: PredictionId,
        winning_option: PredictionOption,
        _fee_limit: NativeAmount,
    ) -> Result<TxHash> {
        if self.caller() != self.admin {
            return Err(Error::Reverted("only admin can resolve".to_string()));
        }
        if winning_option == PredictionOption::None {
            return Err(Error::Reverted("winning option must be a side".to_string()));
        }
        let mut predictions = self.predictions.lock().unwrap();
        let prediction = predictions
            .get_mut(&id)
            .ok_or_else(|| Error::Reverted("prediction does not exist".to_string()))?;
        if prediction.status != PredictionStatus::Matched {
            return Err(Error::Reverted("prediction is not matched".to_string()));
        }
        prediction.status = PredictionStatus::Resolved;
        prediction.winning_option = winning_option;
        Ok(self.next_hash())
    }
    async fn claim_winnings(&self, id: PredictionId, _fee_limit: NativeAmount) -> Result<TxHash> {
        let caller = self.caller();
        let mut predictions = self.predictions.lock().unwrap();
        let prediction = predictions
            .get_mut(&id)
            .ok_or_else(|| Error::Reverted("prediction does not exist".to_string()))?;
        if prediction.status != PredictionStatus::Resolved {
            return Err(Error::Reverted("nothing to claim".to_string()));
        }
        let winner = if prediction.creator_choice == prediction.winning_option {
            prediction.creator.clone()
        } else {
            prediction.opponent.clone().unwrap_or_else(Address::zero)
        };
        if caller != winner {
            return Err(Error::Reverted("caller is not the winner".to_string()));
        }
        prediction.status = PredictionStatus::Claimed;
        Ok(self.next_hash())
    }
    async fn cancel_prediction(
        &self,
        id: PredictionId,
        _fee_limit: NativeAmount,
    ) -> Result<TxHash> {
        let caller = self.caller();
        let mut predictions = self.predictions.lock().unwrap();
        let prediction = predictions
            .get_mut(&id)
            .ok_or_else(|| Error::Reverted("prediction does not exist".to_string()))?;
        if prediction.status != PredictionStatus::Open {
            return Err(Error::Reverted("prediction is not open".to_string()));
        }
        if caller != prediction.creator {
            return Err(Error::Reverted("only the creator can cancel".to_string()));
        }
        prediction.status = PredictionStatus::Cancelled;
        Ok(self.next_hash())
    }
    async fn emergency_refund(
        &self,
        id: PredictionId,
        _fee_limit: NativeAmount,
    ) -> Result<TxHash> {
        if self.caller() != self.admin {
            return Err(Error::Reverted("only admin can refund".to_string()));
        }
        let mut predictions = self.predictions.lock().unwrap();
        let prediction = predictions
            .get_mut(&id)
            .ok_or_else(|| Error::Reverted("prediction does not exist".to_string()))?;
        if prediction.status != PredictionStatus::Matched {
            return Err(Error::Reverted("prediction is not matched".to_string()));
        }
        prediction.status = PredictionStatus::Cancelled;
        Ok(self.next_hash())
    }
}
