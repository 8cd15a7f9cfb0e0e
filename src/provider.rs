use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::{Error, Result};
use crate::types::Address;

/// Notifications the provider pushes while a session is attached.
#[derive(Debug, Clone)]
pub enum ProviderEvent {
    /// The active account changed; `None` means no account is available
    /// anymore (locked or removed).
    AccountChanged(Option<Address>),
    NetworkChanged,
}

/// The signing wallet as seen from this layer. Key management and the actual
/// signing happen behind this seam.
#[async_trait]
pub trait SigningProvider: Send + Sync {
    /// Whether the provider runtime reports itself initialized.
    async fn is_ready(&self) -> bool;
    /// Asks the user for account access. An explicit rejection surfaces as
    /// [`Error::ConnectionRejected`]; other failures keep their own error.
    async fn request_accounts(&self) -> Result<()>;
    /// Address of the usable signing client, once fully initialized.
    async fn active_address(&self) -> Option<Address>;
    /// Typed notification stream. The session attaches one receiver on
    /// connect and drops it on disconnect.
    fn subscribe(&self) -> broadcast::Receiver<ProviderEvent>;
}

/// Scriptable provider used by the tests and by gateway-side signing setups
/// where the key sits next to the gateway and the address is fixed.
#[derive(Debug)]
pub struct StaticProvider {
    address: Mutex<Option<Address>>,
    ready: AtomicBool,
    rejecting: AtomicBool,
    events: broadcast::Sender<ProviderEvent>,
}

impl StaticProvider {
    pub fn new(address: Address) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            address: Mutex::new(Some(address)),
            ready: AtomicBool::new(true),
            rejecting: AtomicBool::new(false),
            events,
        }
    }
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }
    pub fn set_rejecting(&self, rejecting: bool) {
        self.rejecting.store(rejecting, Ordering::SeqCst);
    }
    pub fn set_address(&self, address: Option<Address>) {
        *self.address.lock().unwrap() = address;
    }
    /// Pushes an event to all attached sessions.
    pub fn emit(&self, event: ProviderEvent) {
        // No receiver attached is fine.
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl SigningProvider for StaticProvider {
    async fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
    async fn request_accounts(&self) -> Result<()> {
        if self.rejecting.load(Ordering::SeqCst) {
            return Err(Error::ConnectionRejected);
        }
        Ok(())
    }
    async fn active_address(&self) -> Option<Address> {
        if !self.ready.load(Ordering::SeqCst) {
            return None;
        }
        self.address.lock().unwrap().clone()
    }
    fn subscribe(&self) -> broadcast::Receiver<ProviderEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn rejection_is_distinguished() {
        let provider = StaticProvider::new(Address::new("0xAA"));
        provider.request_accounts().await.unwrap();
        provider.set_rejecting(true);
        assert!(matches!(
            provider.request_accounts().await,
            Err(Error::ConnectionRejected)
        ));
    }

    #[tokio::test]
    async fn address_is_hidden_until_ready() {
        let provider = StaticProvider::new(Address::new("0xAA"));
        provider.set_ready(false);
        assert_eq!(provider.active_address().await, None);
        provider.set_ready(true);
        assert_eq!(provider.active_address().await, Some(Address::new("0xaa")));
    }

    #[tokio::test]
    async fn events_reach_subscribers() {
        let provider = StaticProvider::new(Address::new("0xAA"));
        let mut rx = provider.subscribe();
        provider.emit(ProviderEvent::NetworkChanged);
        assert!(matches!(rx.recv().await, Ok(ProviderEvent::NetworkChanged)));
    }
}
