use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, error, trace};
use tokio::sync::{broadcast, watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::config::Settings;
use crate::error::{Error, Result};
use crate::ledger::LedgerClient;
use crate::provider::{ProviderEvent, SigningProvider};
use crate::token::TokenClient;
use crate::types::{Address, NativeAmount, TokenAmount};

/// Identity installed by [`WalletSession::connect_simulated`], with asserted
/// balances and privilege. Never contacts provider or ledger.
pub const SIMULATED_ADDRESS: &str = "0x51e0000000000000000000000000000000000001";
const SIMULATED_NATIVE_BALANCE: NativeAmount = 1_000_000_000;
const SIMULATED_TOKEN_BALANCE: TokenAmount = 10_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionMode {
    Disconnected,
    Real,
    Simulated,
}

/// Snapshot of the session state. Mutated only by the session's own
/// operations; consumers read copies.
#[derive(Debug, Clone)]
pub struct WalletState {
    pub mode: ConnectionMode,
    pub address: Option<Address>,
    pub native_balance: NativeAmount,
    pub token_balance: TokenAmount,
    pub is_admin: bool,
}
impl Default for WalletState {
    fn default() -> Self {
        Self {
            mode: ConnectionMode::Disconnected,
            address: None,
            native_balance: 0,
            token_balance: 0,
            is_admin: false,
        }
    }
}

/// The process-wide signing session: one active identity, its balances and
/// privilege flag, and the provider subscriptions that keep them current.
#[derive(Clone)]
pub struct WalletSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    state: RwLock<WalletState>,
    state_tx: watch::Sender<WalletState>,
    provider: Option<Arc<dyn SigningProvider>>,
    ledger: LedgerClient,
    token: TokenClient,
    ready_poll: Duration,
    ready_attempts: u32,
    balance_poll: Duration,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl WalletSession {
    pub fn new(
        provider: Option<Arc<dyn SigningProvider>>,
        ledger: LedgerClient,
        token: TokenClient,
        settings: &Settings,
    ) -> Self {
        let (state_tx, _) = watch::channel(WalletState::default());
        Self {
            inner: Arc::new(SessionInner {
                state: RwLock::new(WalletState::default()),
                state_tx,
                provider,
                ledger,
                token,
                ready_poll: Duration::from_millis(settings.ready_poll_ms),
                ready_attempts: settings.ready_attempts,
                balance_poll: Duration::from_secs(settings.balance_poll_secs),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    pub async fn state(&self) -> WalletState {
        self.inner.state.read().await.clone()
    }
    pub async fn address(&self) -> Option<Address> {
        self.inner.state.read().await.address.clone()
    }
    pub async fn is_connected(&self) -> bool {
        self.inner.state.read().await.mode != ConnectionMode::Disconnected
    }
    pub async fn is_admin(&self) -> bool {
        self.inner.state.read().await.is_admin
    }

    /// Snapshot stream updated on every state change (connect, disconnect,
    /// account rebind, balance refresh). Consumers watch it to react to
    /// identity or privilege changes.
    pub fn subscribe_state(&self) -> watch::Receiver<WalletState> {
        self.inner.state_tx.subscribe()
    }

    /// Connects through the signing provider: waits (bounded) for the
    /// provider to come up, requests account access, waits (bounded) for a
    /// usable signing address, then schedules a balance refresh instead of
    /// blocking on it.
    pub async fn connect_real(&self) -> Result<()> {
        if self.is_connected().await {
            self.disconnect().await;
        }
        let provider = self
            .inner
            .provider
            .clone()
            .ok_or(Error::ProviderUnavailable)?;

        if !provider.is_ready().await {
            let mut attempts = 0;
            while !provider.is_ready().await {
                attempts += 1;
                if attempts >= self.inner.ready_attempts {
                    return Err(Error::ConnectionTimeout);
                }
                sleep(self.inner.ready_poll).await;
            }
        }

        provider.request_accounts().await?;

        let mut attempts = 0;
        let address = loop {
            if let Some(address) = provider.active_address().await {
                break address;
            }
            attempts += 1;
            if attempts >= self.inner.ready_attempts {
                return Err(Error::ConnectionTimeout);
            }
            sleep(self.inner.ready_poll).await;
        };

        {
            let mut state = self.inner.state.write().await;
            *state = WalletState {
                mode: ConnectionMode::Real,
                address: Some(address.clone()),
                ..WalletState::default()
            };
            self.inner.publish(&state);
        }
        debug!("connected wallet {}", address);

        let events = provider.subscribe();
        let watcher = tokio::spawn(watch_provider(self.inner.clone(), events));
        let poller = tokio::spawn(poll_balances(self.inner.clone()));
        let refresher = {
            let inner = self.inner.clone();
            tokio::spawn(async move { inner.refresh_balances().await })
        };
        let mut tasks = self.inner.tasks.lock().unwrap();
        tasks.push(watcher);
        tasks.push(poller);
        tasks.push(refresher);
        Ok(())
    }

    /// Installs a fixed identity with preset balances and privilege for
    /// environments without a provider. Nothing is fetched; the values are
    /// asserted.
    pub async fn connect_simulated(&self) {
        let mut state = self.inner.state.write().await;
        *state = WalletState {
            mode: ConnectionMode::Simulated,
            address: Some(Address::new(SIMULATED_ADDRESS)),
            native_balance: SIMULATED_NATIVE_BALANCE,
            token_balance: SIMULATED_TOKEN_BALANCE,
            is_admin: true,
        };
        self.inner.publish(&state);
        debug!("connected simulated wallet {}", SIMULATED_ADDRESS);
    }

    pub async fn disconnect(&self) {
        self.inner.disconnect().await;
    }

    /// Re-reads native balance, token balance and the privilege flag. A
    /// no-op in simulated mode; individual read failures keep the previous
    /// value and never abort the whole refresh.
    pub async fn refresh_balances(&self) {
        self.inner.refresh_balances().await;
    }
}

impl SessionInner {
    fn publish(&self, state: &WalletState) {
        self.state_tx.send_replace(state.clone());
    }

    async fn disconnect(&self) {
        {
            let mut state = self.state.write().await;
            *state = WalletState::default();
            self.publish(&state);
        }
        let tasks = {
            let mut tasks = self.tasks.lock().unwrap();
            std::mem::take(&mut *tasks)
        };
        for task in tasks {
            task.abort();
        }
        debug!("wallet disconnected");
    }

    async fn refresh_balances(&self) {
        let (mode, address) = {
            let state = self.state.read().await;
            (state.mode, state.address.clone())
        };
        if mode != ConnectionMode::Real {
            return;
        }
        let Some(address) = address else { return };

        let mut native_balance = None;
        match self.ledger.native_balance(&address).await {
            Ok(balance) => native_balance = Some(balance),
            Err(e) => error!("error fetching native balance: {}", e),
        }
        let mut token_balance = None;
        match self.token.balance_of(&address).await {
            Ok(balance) => token_balance = Some(balance),
            Err(e) => error!("error fetching token balance: {}", e),
        }
        // Privilege is recomputed from the live admin address every cycle,
        // never trusted from an earlier read.
        let mut is_admin = None;
        match self.ledger.admin().await {
            Ok(admin) => is_admin = Some(admin == address),
            Err(e) => error!("error checking admin status: {}", e),
        }

        let mut state = self.state.write().await;
        if state.address.as_ref() != Some(&address) {
            // Identity changed while we were fetching; drop the stale values.
            return;
        }
        if let Some(balance) = native_balance {
            state.native_balance = balance;
        }
        if let Some(balance) = token_balance {
            state.token_balance = balance;
        }
        if let Some(admin) = is_admin {
            state.is_admin = admin;
        }
        self.publish(&state);
        trace!(
            "balances refreshed for {}: native {} token {} admin {}",
            address,
            state.native_balance,
            state.token_balance,
            state.is_admin
        );
    }
}

async fn watch_provider(
    inner: Arc<SessionInner>,
    mut events: broadcast::Receiver<ProviderEvent>,
) {
    loop {
        match events.recv().await {
            Ok(ProviderEvent::AccountChanged(Some(address))) => {
                {
                    let mut state = inner.state.write().await;
                    if state.mode != ConnectionMode::Real {
                        continue;
                    }
                    debug!("active account changed to {}", address);
                    state.address = Some(address);
                    state.is_admin = false;
                    inner.publish(&state);
                }
                inner.refresh_balances().await;
            }
            Ok(ProviderEvent::AccountChanged(None)) => {
                debug!("account became unavailable, disconnecting");
                inner.disconnect().await;
                return;
            }
            Ok(ProviderEvent::NetworkChanged) => {
                debug!("network changed, refreshing balances");
                inner.refresh_balances().await;
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                trace!("provider event stream lagged by {}", missed);
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

async fn poll_balances(inner: Arc<SessionInner>) {
    let mut interval = tokio::time::interval(inner.balance_poll);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        if inner.state.read().await.mode != ConnectionMode::Real {
            return;
        }
        inner.refresh_balances().await;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ledger::TestLedger;
    use crate::provider::StaticProvider;
    use crate::token::TestToken;

    fn fast_settings() -> Settings {
        Settings {
            ready_poll_ms: 1,
            ready_attempts: 3,
            balance_poll_secs: 3_600,
            ..Settings::default()
        }
    }

    fn session_for(
        provider: Option<Arc<StaticProvider>>,
        ledger: Arc<TestLedger>,
        token: Arc<TestToken>,
    ) -> WalletSession {
        let settings = fast_settings();
        let ledger = LedgerClient::new(ledger, settings.fee_limit);
        let token = TokenClient::new(token, Address::new("0xbeef"), settings.fee_limit);
        let provider = provider.map(|p| p as Arc<dyn SigningProvider>);
        WalletSession::new(provider, ledger, token, &settings)
    }

    #[tokio::test]
    async fn simulated_mode_asserts_its_values() {
        let session = session_for(
            None,
            Arc::new(TestLedger::new(Address::new("0xad"))),
            Arc::new(TestToken::default()),
        );
        session.connect_simulated().await;
        let state = session.state().await;
        assert_eq!(state.mode, ConnectionMode::Simulated);
        assert_eq!(state.address, Some(Address::new(SIMULATED_ADDRESS)));
        assert_eq!(state.native_balance, 1_000_000_000);
        assert_eq!(state.token_balance, 10_000_000_000);
        assert!(state.is_admin);
        // Refresh must not touch asserted values.
        session.refresh_balances().await;
        assert_eq!(session.state().await.token_balance, 10_000_000_000);
    }

    #[tokio::test]
    async fn missing_provider_fails_fast() {
        let session = session_for(
            None,
            Arc::new(TestLedger::new(Address::new("0xad"))),
            Arc::new(TestToken::default()),
        );
        assert!(matches!(
            session.connect_real().await,
            Err(Error::ProviderUnavailable)
        ));
    }

    #[tokio::test]
    async fn rejection_and_timeout_are_distinguished() {
        let ledger = Arc::new(TestLedger::new(Address::new("0xad")));
        let token = Arc::new(TestToken::default());

        let provider = Arc::new(StaticProvider::new(Address::new("0x01")));
        provider.set_rejecting(true);
        let session = session_for(Some(provider), ledger.clone(), token.clone());
        assert!(matches!(
            session.connect_real().await,
            Err(Error::ConnectionRejected)
        ));

        let provider = Arc::new(StaticProvider::new(Address::new("0x01")));
        provider.set_ready(false);
        let session = session_for(Some(provider), ledger, token);
        assert!(matches!(
            session.connect_real().await,
            Err(Error::ConnectionTimeout)
        ));
    }

    #[tokio::test]
    async fn refresh_recomputes_privilege_from_the_ledger() {
        let admin = Address::new("0xAD");
        let ledger = Arc::new(TestLedger::new(admin.clone()));
        ledger.set_native_balance(admin.clone(), 42);
        let token = Arc::new(TestToken::default());
        token.credit(admin.clone(), 7_000_000);

        // Mixed-case provider address still matches the admin.
        let provider = Arc::new(StaticProvider::new(Address::new("0xAd")));
        let session = session_for(Some(provider), ledger, token);
        session.connect_real().await.unwrap();
        session.refresh_balances().await;
        let state = session.state().await;
        assert_eq!(state.mode, ConnectionMode::Real);
        assert_eq!(state.native_balance, 42);
        assert_eq!(state.token_balance, 7_000_000);
        assert!(state.is_admin);
    }

    #[tokio::test]
    async fn state_changes_reach_subscribers() {
        let ledger = Arc::new(TestLedger::new(Address::new("0xad")));
        let token = Arc::new(TestToken::default());
        let provider = Arc::new(StaticProvider::new(Address::new("0x01")));
        let session = session_for(Some(provider.clone()), ledger, token);
        session.connect_real().await.unwrap();

        let mut states = session.subscribe_state();
        provider.emit(ProviderEvent::AccountChanged(Some(Address::new("0x02"))));
        while states.borrow().address != Some(Address::new("0x02")) {
            states.changed().await.unwrap();
        }

        session.disconnect().await;
        while states.borrow().mode != ConnectionMode::Disconnected {
            states.changed().await.unwrap();
        }
    }

    #[tokio::test]
    async fn account_loss_disconnects_and_change_rebinds() {
        let ledger = Arc::new(TestLedger::new(Address::new("0xad")));
        let token = Arc::new(TestToken::default());
        let provider = Arc::new(StaticProvider::new(Address::new("0x01")));
        let session = session_for(Some(provider.clone()), ledger, token);
        session.connect_real().await.unwrap();

        provider.emit(ProviderEvent::AccountChanged(Some(Address::new("0x02"))));
        sleep(Duration::from_millis(50)).await;
        assert_eq!(session.address().await, Some(Address::new("0x02")));

        provider.emit(ProviderEvent::AccountChanged(None));
        sleep(Duration::from_millis(50)).await;
        assert!(!session.is_connected().await);
    }
}
