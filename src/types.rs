use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::Error;

pub type PredictionId = u64;
pub type TokenAmount = u64;
pub type NativeAmount = u64;
pub type TxHash = String;
pub type UnixTime = i64;

/// Decimals of the stake token; amounts everywhere are minor units.
pub const TOKEN_DECIMALS: u32 = 6;

const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

/// A ledger identity. Normalized to lowercase on construction so equality
/// checks are case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into().to_lowercase())
    }
    /// The reserved "unset" identity the ledger returns for absent
    /// participants.
    pub fn zero() -> Self {
        Self(ZERO_ADDRESS.to_string())
    }
    pub fn is_zero(&self) -> bool {
        self.0 == ZERO_ADDRESS
    }
    /// Maps the zero sentinel to an absent value.
    pub fn into_present(self) -> Option<Self> {
        if self.is_zero() {
            None
        } else {
            Some(self)
        }
    }
    pub fn as_str(&self) -> &str {
        &self.0
    }
    /// Shortened form for display, e.g. `0x1a2b…3c4d`.
    pub fn short(&self) -> String {
        if self.0.len() <= 10 {
            return self.0.clone();
        }
        format!("{}…{}", &self.0[..6], &self.0[self.0.len() - 4..])
    }
}
impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl FromStr for Address {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}
impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Self::new(String::deserialize(deserializer)?))
    }
}

/// One side of a prediction. Wire code is 0/1/2, mirroring the contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PredictionOption {
    None,
    OptionA,
    OptionB,
}
impl PredictionOption {
    pub fn code(self) -> u8 {
        match self {
            Self::None => 0,
            Self::OptionA => 1,
            Self::OptionB => 2,
        }
    }
    /// The other playable side. `None` has no opposite and maps to itself.
    pub fn opposite(self) -> Self {
        match self {
            Self::None => Self::None,
            Self::OptionA => Self::OptionB,
            Self::OptionB => Self::OptionA,
        }
    }
}
impl TryFrom<u8> for PredictionOption {
    type Error = Error;
    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Self::None),
            1 => Ok(Self::OptionA),
            2 => Ok(Self::OptionB),
            e => Err(Error::MalformedResponse(format!(
                "unknown option code {}",
                e
            ))),
        }
    }
}
impl Display for PredictionOption {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let output = match self {
            Self::None => "None",
            Self::OptionA => "A",
            Self::OptionB => "B",
        };
        write!(f, "{}", output)
    }
}
impl FromStr for PredictionOption {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "a" => Ok(Self::OptionA),
            "b" => Ok(Self::OptionB),
            e => Err(Error::MalformedResponse(format!(
                "expected option \"a\" or \"b\", got \"{}\"",
                e
            ))),
        }
    }
}

/// Lifecycle of a prediction as recorded on the ledger. Wire code is 0..=4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PredictionStatus {
    Open,
    Matched,
    Resolved,
    Cancelled,
    Claimed,
}
impl PredictionStatus {
    pub fn code(self) -> u8 {
        match self {
            Self::Open => 0,
            Self::Matched => 1,
            Self::Resolved => 2,
            Self::Cancelled => 3,
            Self::Claimed => 4,
        }
    }
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Cancelled | Self::Claimed)
    }
}
impl TryFrom<u8> for PredictionStatus {
    type Error = Error;
    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Self::Open),
            1 => Ok(Self::Matched),
            2 => Ok(Self::Resolved),
            3 => Ok(Self::Cancelled),
            4 => Ok(Self::Claimed),
            e => Err(Error::MalformedResponse(format!(
                "unknown status code {}",
                e
            ))),
        }
    }
}
impl Display for PredictionStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let output = match self {
            Self::Open => "Open",
            Self::Matched => "Matched",
            Self::Resolved => "Resolved",
            Self::Cancelled => "Cancelled",
            Self::Claimed => "Claimed",
        };
        write!(f, "{}", output)
    }
}

/// A prediction record as this layer sees it. Owned by the remote ledger;
/// cached copies are replaced wholesale, never patched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub id: PredictionId,
    pub creator: Address,
    pub opponent: Option<Address>,
    pub title: String,
    pub description: String,
    pub option_a: String,
    pub option_b: String,
    pub bet_amount: TokenAmount,
    pub creator_choice: PredictionOption,
    pub opponent_choice: PredictionOption,
    pub status: PredictionStatus,
    pub winning_option: PredictionOption,
    pub created_at: UnixTime,
    pub expiry_time: UnixTime,
}

/// Parameters for creating a prediction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPrediction {
    pub title: String,
    pub description: String,
    pub option_a: String,
    pub option_b: String,
    pub bet_amount: TokenAmount,
    pub creator_choice: PredictionOption,
    pub expiry_time: UnixTime,
}

/// A prediction exactly as the ledger hands it out: sentinel addresses kept,
/// enums still coded. Decoded at the `LedgerClient` boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawPrediction {
    pub id: PredictionId,
    pub creator: Address,
    pub opponent: Address,
    pub title: String,
    pub description: String,
    pub option_a: String,
    pub option_b: String,
    pub bet_amount: TokenAmount,
    pub creator_choice: u8,
    pub opponent_choice: u8,
    pub status: u8,
    pub winning_option: u8,
    pub created_at: UnixTime,
    pub expiry_time: UnixTime,
}
impl TryFrom<RawPrediction> for Prediction {
    type Error = Error;
    fn try_from(raw: RawPrediction) -> Result<Self, Self::Error> {
        Ok(Self {
            id: raw.id,
            creator: raw.creator,
            opponent: raw.opponent.into_present(),
            title: raw.title,
            description: raw.description,
            option_a: raw.option_a,
            option_b: raw.option_b,
            bet_amount: raw.bet_amount,
            creator_choice: raw.creator_choice.try_into()?,
            opponent_choice: raw.opponent_choice.try_into()?,
            status: raw.status.try_into()?,
            winning_option: raw.winning_option.try_into()?,
            created_at: raw.created_at,
            expiry_time: raw.expiry_time,
        })
    }
}

/// One page of ids from a paginated ledger view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    pub ids: Vec<PredictionId>,
    pub total: u64,
}

/// Formats minor units as a 2-decimal token amount for display.
pub fn format_token_amount(amount: TokenAmount) -> String {
    let unit = 10u64.pow(TOKEN_DECIMALS);
    format!("{}.{:02}", amount / unit, (amount % unit) / (unit / 100))
}

/// Parses a decimal token amount ("12.5") into minor units, truncating
/// beyond the token's precision.
pub fn parse_token_amount(input: &str) -> Result<TokenAmount, Error> {
    let bad = || Error::MalformedResponse(format!("invalid token amount \"{}\"", input));
    let (whole, frac) = match input.split_once('.') {
        Some((w, f)) => (w, f),
        None => (input, ""),
    };
    let whole: TokenAmount = whole.parse().map_err(|_| bad())?;
    let mut frac_units = 0u64;
    for (i, c) in frac.chars().take(TOKEN_DECIMALS as usize).enumerate() {
        let digit = c.to_digit(10).ok_or_else(bad)? as u64;
        frac_units += digit * 10u64.pow(TOKEN_DECIMALS - 1 - i as u32);
    }
    whole
        .checked_mul(10u64.pow(TOKEN_DECIMALS))
        .and_then(|w| w.checked_add(frac_units))
        .ok_or_else(bad)
}
