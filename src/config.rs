use std::collections::HashMap;

use anyhow::Result;
use serde::Deserialize;

use crate::error::Error;
use crate::types::{NativeAmount, TokenAmount, TxHash, UnixTime};

/// Ledger/token endpoints for one network.
#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    pub name: String,
    pub gateway_url: String,
    pub explorer_url: String,
    pub market_address: String,
    pub token_address: String,
}
impl NetworkConfig {
    pub fn transaction_url(&self, hash: &TxHash) -> String {
        format!("{}/transaction/{}", self.explorer_url, hash)
    }
}

/// Recognized configuration surface. Loaded from an optional `betduel.toml`
/// plus `BETDUEL_`-prefixed environment overrides; every field has a default.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Which entry of `networks` to use.
    pub network: String,
    pub networks: HashMap<String, NetworkConfig>,
    /// Fee ceiling for every mutating call, in minor native units.
    pub fee_limit: NativeAmount,
    pub min_bet: TokenAmount,
    pub max_bet: TokenAmount,
    /// Durations the creator may pick from, in hours.
    pub expiry_options_hours: Vec<i64>,
    pub page_size: u64,
    pub open_poll_secs: u64,
    pub balance_poll_secs: u64,
    /// Display fallback only; the live rate is read from the ledger.
    pub fee_percent_default: u64,
    /// Over-approval multiple applied by the allowance gate.
    pub allowance_multiple: u64,
    pub ready_poll_ms: u64,
    pub ready_attempts: u32,
}

impl Default for Settings {
    fn default() -> Self {
        let mut networks = HashMap::new();
        networks.insert(
            "local".to_string(),
            NetworkConfig {
                name: "Local devnet".to_string(),
                gateway_url: "http://127.0.0.1:8091".to_string(),
                explorer_url: "http://127.0.0.1:8091/explorer".to_string(),
                market_address: "0x00000000000000000000000000000000000000a1".to_string(),
                token_address: "0x00000000000000000000000000000000000000a2".to_string(),
            },
        );
        networks.insert(
            "testnet".to_string(),
            NetworkConfig {
                name: "Testnet".to_string(),
                gateway_url: "https://gateway.testnet.example".to_string(),
                explorer_url: "https://explorer.testnet.example".to_string(),
                market_address: String::new(),
                token_address: String::new(),
            },
        );
        Self {
            network: "local".to_string(),
            networks,
            fee_limit: 100_000_000,
            min_bet: 1_000_000,
            max_bet: 10_000_000_000,
            expiry_options_hours: vec![1, 6, 12, 24, 48, 168],
            page_size: 10,
            open_poll_secs: 30,
            balance_poll_secs: 15,
            fee_percent_default: 2,
            allowance_multiple: 10,
            ready_poll_ms: 250,
            ready_attempts: 20,
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name("betduel").required(false))
            .add_source(config::Environment::with_prefix("BETDUEL"))
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }
    pub fn network(&self) -> Option<&NetworkConfig> {
        self.networks.get(&self.network)
    }
    /// Client-side bound check; the ledger enforces nothing about bounds.
    pub fn validate_bet(&self, amount: TokenAmount) -> Result<(), Error> {
        if amount < self.min_bet || amount > self.max_bet {
            return Err(Error::BetOutOfBounds {
                amount,
                min: self.min_bet,
                max: self.max_bet,
            });
        }
        Ok(())
    }
    /// Turns one of the offered durations into an absolute expiry timestamp.
    pub fn expiry_from_hours(&self, hours: i64, now: UnixTime) -> Result<UnixTime, Error> {
        if !self.expiry_options_hours.contains(&hours) {
            return Err(Error::NotPermitted("expiry duration is not offered"));
        }
        Ok(now + hours * 3600)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_match_the_offered_surface() {
        let settings = Settings::default();
        assert_eq!(settings.fee_limit, 100_000_000);
        assert_eq!(settings.expiry_options_hours, vec![1, 6, 12, 24, 48, 168]);
        assert!(settings.network().is_some());
    }

    #[test]
    fn bet_bounds_are_enforced_client_side() {
        let settings = Settings::default();
        assert!(settings.validate_bet(1_000_000).is_ok());
        assert!(settings.validate_bet(999_999).is_err());
        assert!(settings.validate_bet(10_000_000_001).is_err());
    }

    #[test]
    fn expiry_must_come_from_the_offered_set() {
        let settings = Settings::default();
        assert_eq!(settings.expiry_from_hours(24, 1_000).unwrap(), 1_000 + 86_400);
        assert!(settings.expiry_from_hours(3, 1_000).is_err());
    }
}
