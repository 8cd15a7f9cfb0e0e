use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use log::warn;
use tokio::task::JoinHandle;

use crate::allowance::AllowanceGate;
use crate::config::Settings;
use crate::eligibility;
use crate::error::{Error, Result};
use crate::ledger::{LedgerClient, RemoteLedger};
use crate::orchestrator::TransactionOrchestrator;
use crate::provider::SigningProvider;
use crate::repository::PredictionRepository;
use crate::token::{RemoteTokenLedger, TokenClient};
use crate::types::{
    Address, NewPrediction, Prediction, PredictionId, PredictionOption, PredictionStatus,
    TokenAmount, TxHash,
};
use crate::wallet::WalletSession;

/// Entry point tying the session, the allowance gate, the transaction slot
/// and the view cache together. Every mutating operation checks eligibility
/// against fresh ledger state before it submits, so the common refusals
/// surface as typed errors instead of reverts.
pub struct Market {
    settings: Settings,
    session: WalletSession,
    ledger: LedgerClient,
    token: TokenClient,
    gate: AllowanceGate,
    orchestrator: TransactionOrchestrator,
    repository: Arc<PredictionRepository>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Market {
    pub fn new(
        settings: Settings,
        provider: Option<Arc<dyn SigningProvider>>,
        remote_ledger: Arc<dyn RemoteLedger>,
        remote_token: Arc<dyn RemoteTokenLedger>,
    ) -> Result<Self> {
        let network = settings
            .network()
            .ok_or(Error::NotPermitted("selected network is not configured"))?;
        let ledger = LedgerClient::new(remote_ledger, settings.fee_limit);
        let token = TokenClient::new(
            remote_token,
            Address::new(&network.market_address),
            settings.fee_limit,
        );
        let session = WalletSession::new(provider, ledger.clone(), token.clone(), &settings);
        let gate = AllowanceGate::new(token.clone(), settings.allowance_multiple);
        let orchestrator = TransactionOrchestrator::new(session.clone());
        let repository = Arc::new(PredictionRepository::new(
            ledger.clone(),
            settings.page_size,
        ));
        Ok(Self {
            settings,
            session,
            ledger,
            token,
            gate,
            orchestrator,
            repository,
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }
    pub fn session(&self) -> &WalletSession {
        &self.session
    }
    pub fn orchestrator(&self) -> &TransactionOrchestrator {
        &self.orchestrator
    }
    pub fn repository(&self) -> &Arc<PredictionRepository> {
        &self.repository
    }

    pub async fn connect_real(&self) -> Result<()> {
        self.stop_tasks();
        self.session.connect_real().await?;
        self.start_open_poll();
        self.start_state_watch();
        self.refresh_views().await;
        Ok(())
    }

    pub async fn connect_simulated(&self) {
        self.stop_tasks();
        self.session.connect_simulated().await;
        self.start_open_poll();
        self.start_state_watch();
        self.refresh_views().await;
    }

    pub async fn disconnect(&self) {
        self.stop_tasks();
        self.session.disconnect().await;
        self.repository.clear_owned().await;
        self.repository.clear_matched().await;
    }

    fn stop_tasks(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap());
        for task in tasks {
            task.abort();
        }
    }

    fn start_open_poll(&self) {
        let poll = self.repository.spawn_open_poll(
            self.session.clone(),
            Duration::from_secs(self.settings.open_poll_secs),
        );
        self.tasks.lock().unwrap().push(poll);
    }

    /// Keeps the identity-scoped views in step with the session: an account
    /// rebind re-fetches the owned view for the new identity, and a privilege
    /// change populates or drops the matched view.
    fn start_state_watch(&self) {
        let mut states = self.session.subscribe_state();
        let repository = self.repository.clone();
        let watcher = tokio::spawn(async move {
            let mut last = states.borrow().clone();
            while states.changed().await.is_ok() {
                let state = states.borrow().clone();
                if state.address != last.address {
                    match &state.address {
                        Some(address) => {
                            if let Err(e) = repository.refresh_owned(address).await {
                                warn!("owned view refresh after account change failed: {}", e);
                            }
                        }
                        None => repository.clear_owned().await,
                    }
                }
                if state.is_admin != last.is_admin {
                    if state.is_admin {
                        if let Err(e) = repository.refresh_matched(0).await {
                            warn!("matched view refresh after privilege change failed: {}", e);
                        }
                    } else {
                        repository.clear_matched().await;
                    }
                }
                last = state;
            }
        });
        self.tasks.lock().unwrap().push(watcher);
    }

    /// Re-fetches every view the connected identity cares about. Failures are
    /// logged, never propagated; the views keep their previous contents.
    pub async fn refresh_views(&self) {
        let state = self.session.state().await;
        self.repository
            .refresh_all(state.address.as_ref(), state.is_admin)
            .await;
    }

    pub async fn get_prediction(&self, id: PredictionId) -> Result<Prediction> {
        self.ledger.get_prediction(id).await
    }

    /// Payout preview using the live platform fee, falling back to the
    /// configured default rate when the read fails.
    pub async fn net_payout_for(&self, prediction: &Prediction) -> TokenAmount {
        let fee_percent = match self.ledger.platform_fee_percent().await {
            Ok(fee_percent) => fee_percent,
            Err(e) => {
                warn!("falling back to default fee rate: {}", e);
                self.settings.fee_percent_default
            }
        };
        eligibility::net_payout(prediction, fee_percent)
    }

    async fn connected_address(&self) -> Result<Address> {
        self.session.address().await.ok_or(Error::NotConnected)
    }

    async fn check_stake_funds(&self, owner: &Address, need: TokenAmount) -> Result<()> {
        let have = self.token.balance_of(owner).await?;
        if have < need {
            return Err(Error::InsufficientFunds { have, need });
        }
        Ok(())
    }

    /// Stakes `params.bet_amount` on a new prediction. Bounds, side and funds
    /// are checked up front; the stake authorization is raised if needed
    /// before the single submission occupies the transaction slot.
    pub async fn create_prediction(&self, params: NewPrediction) -> Result<TxHash> {
        self.settings.validate_bet(params.bet_amount)?;
        if params.creator_choice == PredictionOption::None {
            return Err(Error::NotPermitted("a side must be picked"));
        }
        let address = self.connected_address().await?;
        self.check_stake_funds(&address, params.bet_amount).await?;
        let hash = self
            .gate
            .run_gated(&address, params.bet_amount, || {
                self.orchestrator
                    .submit(|| self.ledger.create_prediction(&params))
            })
            .await?;
        self.refresh_views().await;
        Ok(hash)
    }

    /// Joins as the opponent, taking the side the creator did not pick.
    /// There is no choice parameter on purpose.
    pub async fn join_prediction(&self, id: PredictionId) -> Result<TxHash> {
        let address = self.connected_address().await?;
        let prediction = self.ledger.get_prediction(id).await?;
        if prediction.status != PredictionStatus::Open {
            return Err(Error::NotPermitted("prediction is no longer open"));
        }
        if eligibility::is_expired(&prediction, Utc::now().timestamp()) {
            return Err(Error::NotPermitted("prediction has expired"));
        }
        if address == prediction.creator {
            return Err(Error::NotPermitted("cannot join own prediction"));
        }
        let choice = eligibility::opponent_required_choice(&prediction);
        self.check_stake_funds(&address, prediction.bet_amount)
            .await?;
        let hash = self
            .gate
            .run_gated(&address, prediction.bet_amount, || {
                self.orchestrator
                    .submit(|| self.ledger.join_prediction(id, choice))
            })
            .await?;
        self.refresh_views().await;
        Ok(hash)
    }

    /// Settles a matched prediction on a side. Privileged identities only;
    /// moves no stake of the caller, so the allowance gate is not involved.
    pub async fn resolve_prediction(
        &self,
        id: PredictionId,
        winning_option: PredictionOption,
    ) -> Result<TxHash> {
        self.connected_address().await?;
        if winning_option == PredictionOption::None {
            return Err(Error::NotPermitted("a winning side must be picked"));
        }
        let prediction = self.ledger.get_prediction(id).await?;
        if !eligibility::can_resolve(&prediction, self.session.is_admin().await) {
            return Err(Error::NotPermitted(
                "resolving needs the admin identity and a matched prediction",
            ));
        }
        let hash = self
            .orchestrator
            .submit(|| self.ledger.resolve_prediction(id, winning_option))
            .await?;
        self.refresh_views().await;
        Ok(hash)
    }

    pub async fn claim_winnings(&self, id: PredictionId) -> Result<TxHash> {
        let address = self.connected_address().await?;
        let prediction = self.ledger.get_prediction(id).await?;
        if !eligibility::can_claim(&prediction, Some(&address)) {
            return Err(Error::NotPermitted("nothing to claim for this identity"));
        }
        let hash = self
            .orchestrator
            .submit(|| self.ledger.claim_winnings(id))
            .await?;
        self.refresh_views().await;
        Ok(hash)
    }

    pub async fn cancel_prediction(&self, id: PredictionId) -> Result<TxHash> {
        let address = self.connected_address().await?;
        let prediction = self.ledger.get_prediction(id).await?;
        if !eligibility::can_cancel(&prediction, Some(&address)) {
            return Err(Error::NotPermitted(
                "only the creator can cancel, and only while open",
            ));
        }
        let hash = self
            .orchestrator
            .submit(|| self.ledger.cancel_prediction(id))
            .await?;
        self.refresh_views().await;
        Ok(hash)
    }

    /// Unwinds a matched prediction, returning both stakes. Privileged
    /// identities only.
    pub async fn emergency_refund(&self, id: PredictionId) -> Result<TxHash> {
        self.connected_address().await?;
        let prediction = self.ledger.get_prediction(id).await?;
        if !eligibility::can_refund(&prediction, self.session.is_admin().await) {
            return Err(Error::NotPermitted(
                "refunding needs the admin identity and a matched prediction",
            ));
        }
        let hash = self
            .orchestrator
            .submit(|| self.ledger.emergency_refund(id))
            .await?;
        self.refresh_views().await;
        Ok(hash)
    }
}
