use serde::{Deserialize, Serialize};
use std::fmt;

mod config;

pub use config::{
    ConfigError, DEFAULT_CALL_TIMEOUT, DEFAULT_CONFIRMATION_TIMEOUT, DEFAULT_POLL_INTERVAL, LifelineConfig,
    NetworkConfig,
};

pub const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed address '{0}': expected 0x followed by 40 hex characters")]
pub struct AddressError(pub String);

/// A 20-byte account or contract address, always stored lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WalletAddress(String);

impl WalletAddress {
    pub fn parse(raw: &str) -> Result<Self, AddressError> {
        let trimmed = raw.trim();
        if !is_well_formed_address(trimmed) {
            return Err(AddressError(raw.to_owned()));
        }
        Ok(Self(trimmed.to_ascii_lowercase()))
    }

    pub fn zero() -> Self {
        Self(ZERO_ADDRESS.to_owned())
    }

    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(format!("0x{}", hex::encode(bytes)))
    }

    pub fn to_bytes(&self) -> [u8; 20] {
        // Every constructor leaves exactly 40 hex digits after the prefix.
        let mut bytes = [0_u8; 20];
        match hex::decode_to_slice(&self.0[2..], &mut bytes) {
            Ok(()) => bytes,
            Err(_) => [0_u8; 20],
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The all-zero address is what the contract returns for "no record".
    pub fn is_zero(&self) -> bool {
        self.0 == ZERO_ADDRESS
    }
}

impl fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for WalletAddress {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<WalletAddress> for String {
    fn from(value: WalletAddress) -> Self {
        value.0
    }
}

/// `0x` followed by exactly 40 hex digits, any case.
pub fn is_well_formed_address(candidate: &str) -> bool {
    candidate.len() == 42
        && candidate.starts_with("0x")
        && candidate[2..].bytes().all(|b| b.is_ascii_hexdigit())
}

/// Hex-string chain identifier as reported by the wallet, e.g. `0x3e8`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ChainId(pub String);

impl ChainId {
    pub fn from_u64(value: u64) -> Self {
        Self(format!("{value:#x}"))
    }

    pub fn as_u64(&self) -> Option<u64> {
        let digits = self.0.strip_prefix("0x").or_else(|| self.0.strip_prefix("0X"))?;
        u64::from_str_radix(digits, 16).ok()
    }

    /// Lowercase, no leading zeros. Wallets disagree on `0x03E8` vs `0x3e8`.
    pub fn normalized(&self) -> Self {
        match self.as_u64() {
            Some(value) => Self::from_u64(value),
            None => Self(self.0.to_ascii_lowercase()),
        }
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Sector {
    Healthcare,
    LawEnforcement,
    FireDepartment,
    Government,
    Ngo,
    Volunteer,
    Other(u8),
}

impl Sector {
    pub const ALL: [Sector; 6] = [
        Sector::Healthcare,
        Sector::LawEnforcement,
        Sector::FireDepartment,
        Sector::Government,
        Sector::Ngo,
        Sector::Volunteer,
    ];

    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Self::Healthcare,
            1 => Self::LawEnforcement,
            2 => Self::FireDepartment,
            3 => Self::Government,
            4 => Self::Ngo,
            5 => Self::Volunteer,
            other => Self::Other(other),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Self::Healthcare => 0,
            Self::LawEnforcement => 1,
            Self::FireDepartment => 2,
            Self::Government => 3,
            Self::Ngo => 4,
            Self::Volunteer => 5,
            Self::Other(code) => code,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EmergencyType {
    NaturalDisaster,
    MedicalEmergency,
    SecurityThreat,
    InfrastructureFailure,
    EnvironmentalHazard,
    Other(u8),
}

impl EmergencyType {
    pub const ALL: [EmergencyType; 5] = [
        EmergencyType::NaturalDisaster,
        EmergencyType::MedicalEmergency,
        EmergencyType::SecurityThreat,
        EmergencyType::InfrastructureFailure,
        EmergencyType::EnvironmentalHazard,
    ];

    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Self::NaturalDisaster,
            1 => Self::MedicalEmergency,
            2 => Self::SecurityThreat,
            3 => Self::InfrastructureFailure,
            4 => Self::EnvironmentalHazard,
            other => Self::Other(other),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Self::NaturalDisaster => 0,
            Self::MedicalEmergency => 1,
            Self::SecurityThreat => 2,
            Self::InfrastructureFailure => 3,
            Self::EnvironmentalHazard => 4,
            Self::Other(code) => code,
        }
    }
}

/// A registered participant. Never constructed for the zero-address sentinel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Identity {
    pub wallet: WalletAddress,
    pub did: String,
    pub sector: Sector,
    pub metadata_uri: Option<String>,
    pub verified: bool,
    pub registration_date: u64,
    pub last_verified: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Crisis {
    pub id: u64,
    pub emergency_type: EmergencyType,
    pub location: String,
    pub encrypted_data: String,
    pub data_hash: String,
    pub declared_by: WalletAddress,
    pub timestamp: u64,
    pub verified: bool,
    pub verification_count: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Immutable snapshot of the wallet connection.
///
/// Readers receive clones; only the session manager produces new values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Session {
    pub state: ConnectionState,
    pub account: Option<WalletAddress>,
    pub chain_id: Option<ChainId>,
}

impl Session {
    pub fn disconnected() -> Self {
        Self::default()
    }

    pub fn connecting() -> Self {
        Self {
            state: ConnectionState::Connecting,
            account: None,
            chain_id: None,
        }
    }

    pub fn connected(account: WalletAddress, chain_id: ChainId) -> Self {
        Self {
            state: ConnectionState::Connected,
            account: Some(account),
            chain_id: Some(chain_id),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected && self.account.is_some()
    }

    pub fn account(&self) -> Option<&WalletAddress> {
        if self.is_connected() {
            self.account.as_ref()
        } else {
            None
        }
    }
}
