pub mod allowance;
pub mod config;
pub mod eligibility;
pub mod error;
pub mod gateway;
pub mod ledger;
pub mod market;
pub mod orchestrator;
pub mod provider;
pub mod repository;
pub mod token;
pub mod types;
pub mod wallet;

pub use error::{Error, Result};
