//! Display formatting and input parsing for contract values.
//!
//! Everything here is pure; the contract facade and the CLI share these
//! helpers so that what is shown and what is submitted agree.

use chrono::DateTime;
use ll_api_types::{ChainId, EmergencyType, Sector, WalletAddress, is_well_formed_address};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    #[error("'{0}' is not a number")]
    NotNumeric(String),
    #[error("'{0}' does not fit in the target integer width")]
    Overflow(String),
    #[error("'{0}' is not a 0x-prefixed 32-byte hex digest")]
    NotDigest(String),
}

/// `0x1234...abcd`. Empty input stays empty.
pub fn format_address(address: &str) -> String {
    if address.is_empty() {
        return String::new();
    }
    if address.len() <= 10 || !address.is_ascii() {
        return address.to_owned();
    }
    format!("{}...{}", &address[..6], &address[address.len() - 4..])
}

/// Unix seconds rendered in UTC. Zero means "never set" on chain.
pub fn format_timestamp(seconds: u64) -> String {
    if seconds == 0 {
        return "N/A".to_owned();
    }
    i64::try_from(seconds)
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "N/A".to_owned())
}

pub fn emergency_type_label(kind: EmergencyType) -> &'static str {
    match kind {
        EmergencyType::NaturalDisaster => "Natural Disaster",
        EmergencyType::MedicalEmergency => "Medical Emergency",
        EmergencyType::SecurityThreat => "Security Threat",
        EmergencyType::InfrastructureFailure => "Infrastructure Failure",
        EmergencyType::EnvironmentalHazard => "Environmental Hazard",
        EmergencyType::Other(_) => "Unknown Emergency",
    }
}

pub fn sector_label(sector: Sector) -> &'static str {
    match sector {
        Sector::Healthcare => "Healthcare",
        Sector::LawEnforcement => "Law Enforcement",
        Sector::FireDepartment => "Fire Department",
        Sector::Government => "Government",
        Sector::Ngo => "NGO",
        Sector::Volunteer => "Volunteer",
        Sector::Other(_) => "Unknown Sector",
    }
}

pub fn network_name(chain_id: &ChainId) -> String {
    let known = match chain_id.normalized().0.as_str() {
        "0x1" => Some("Ethereum Mainnet"),
        "0xaa36a7" => Some("Sepolia Testnet"),
        "0x89" => Some("Polygon Mainnet"),
        "0x13881" => Some("Polygon Mumbai"),
        "0x38" => Some("BSC Mainnet"),
        "0x61" => Some("BSC Testnet"),
        "0xa4b1" => Some("Arbitrum"),
        "0x3e8" => Some("BlockDAG Testnet"),
        "0x539" => Some("Localhost"),
        _ => None,
    };
    known
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| format!("Chain {}", chain_id.0))
}

/// Parses a numeric string as returned by RPC layers: decimal or `0x` hex.
pub fn parse_numeric(raw: &str) -> Result<u128, FormatError> {
    let trimmed = raw.trim();
    let (digits, radix) = match trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
        Some(hex) => (hex, 16),
        None => (trimmed, 10),
    };
    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
        return Err(FormatError::NotNumeric(raw.to_owned()));
    }
    u128::from_str_radix(digits, radix).map_err(|_| FormatError::Overflow(raw.to_owned()))
}

pub fn parse_crisis_id(raw: &str) -> Result<u64, FormatError> {
    let value = parse_numeric(raw)?;
    u64::try_from(value).map_err(|_| FormatError::Overflow(raw.to_owned()))
}

/// Keeps only well-formed addresses; anything else is dropped silently.
pub fn filter_responders<'a, I>(candidates: I) -> Vec<WalletAddress>
where
    I: IntoIterator<Item = &'a str>,
{
    candidates
        .into_iter()
        .map(str::trim)
        .filter(|candidate| is_well_formed_address(candidate))
        .filter_map(|candidate| WalletAddress::parse(candidate).ok())
        .collect()
}

/// Comma-separated responder list as typed into a form.
pub fn parse_responders(csv: &str) -> Vec<WalletAddress> {
    filter_responders(csv.split(','))
}

/// SHA-256 of the payload as `0x`-prefixed lowercase hex.
pub fn data_hash(data: &str) -> String {
    format!("0x{}", hex::encode(Sha256::digest(data.as_bytes())))
}

pub fn parse_bytes32(raw: &str) -> Result<[u8; 32], FormatError> {
    let digits = raw
        .trim()
        .strip_prefix("0x")
        .ok_or_else(|| FormatError::NotDigest(raw.to_owned()))?;
    let mut out = [0_u8; 32];
    hex::decode_to_slice(digits, &mut out).map_err(|_| FormatError::NotDigest(raw.to_owned()))?;
    Ok(out)
}
