use ll_abi::{Token, from_hex_prefixed};
use ll_api_types::{EmergencyType, Sector, WalletAddress};
use ll_chain_client::{ClientError, ClientResult};
use ll_format::{data_hash, filter_responders, parse_bytes32};
use serde::{Deserialize, Serialize};

use crate::calls;

const MAX_DID_LEN: usize = 256;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegisterIdentity {
    pub did: String,
    pub sector: Sector,
    #[serde(default)]
    pub metadata_uri: Option<String>,
}

impl RegisterIdentity {
    pub(crate) fn encode(&self) -> ClientResult<Vec<u8>> {
        let did = self.did.trim();
        if did.is_empty() {
            return Err(ClientError::invalid("DID is required"));
        }
        if did.len() > MAX_DID_LEN {
            return Err(ClientError::invalid(format!("DID longer than {MAX_DID_LEN} bytes")));
        }
        if let Sector::Other(code) = self.sector {
            return Err(ClientError::invalid(format!("unknown sector code {code}")));
        }

        Ok(calls::REGISTER_IDENTITY.encode(&[
            Token::String(did.to_owned()),
            Token::Uint(u128::from(self.sector.code())),
            Token::String(self.metadata_uri.clone().unwrap_or_default()),
        ]))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeclareEmergency {
    pub emergency_type: EmergencyType,
    pub location: String,
    #[serde(default)]
    pub encrypted_data: String,
    /// `0x`-prefixed 32-byte digest. Derived from `encrypted_data` when absent.
    #[serde(default)]
    pub data_hash: Option<String>,
    /// Raw responder entries; malformed ones are dropped before submission.
    #[serde(default)]
    pub initial_responders: Vec<String>,
}

impl DeclareEmergency {
    pub fn responders(&self) -> Vec<WalletAddress> {
        filter_responders(self.initial_responders.iter().map(String::as_str))
    }

    pub fn digest(&self) -> String {
        match self.data_hash.as_deref().map(str::trim) {
            Some(hash) if !hash.is_empty() => hash.to_owned(),
            _ => data_hash(&self.encrypted_data),
        }
    }

    pub(crate) fn encode(&self) -> ClientResult<Vec<u8>> {
        if let EmergencyType::Other(code) = self.emergency_type {
            return Err(ClientError::invalid(format!("unknown emergency type {code}")));
        }
        let location = self.location.trim();
        if location.is_empty() {
            return Err(ClientError::invalid("location is required"));
        }
        let digest = parse_bytes32(&self.digest())
            .map_err(|err| ClientError::invalid(format!("data hash: {err}")))?;

        let responders = self
            .responders()
            .iter()
            .map(calls::address_token)
            .collect();

        Ok(calls::DECLARE_EMERGENCY.encode(&[
            Token::Uint(u128::from(self.emergency_type.code())),
            Token::String(location.to_owned()),
            Token::String(self.encrypted_data.clone()),
            Token::FixedBytes32(digest),
            Token::Array(responders),
        ]))
    }
}

pub(crate) fn encode_verify(crisis_id: u64, signatures: &[String]) -> ClientResult<Vec<u8>> {
    if signatures.is_empty() {
        return Err(ClientError::invalid("at least one signature is required"));
    }
    let decoded = signatures
        .iter()
        .map(|raw| match from_hex_prefixed(raw.trim()) {
            Ok(bytes) if !bytes.is_empty() => Ok(Token::Bytes(bytes)),
            _ => Err(ClientError::invalid(format!("signature '{raw}' is not hex"))),
        })
        .collect::<ClientResult<Vec<_>>>()?;

    Ok(calls::VERIFY_CRISIS.encode(&[Token::Uint(u128::from(crisis_id)), Token::Array(decoded)]))
}

/// Proof that the caller explicitly confirmed a break-glass request.
///
/// Emergency access is audited on-chain; the only way to obtain one of
/// these is [`BreakGlassAcknowledgement::confirm`] with a stated reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakGlassAcknowledgement {
    reason: String,
}

impl BreakGlassAcknowledgement {
    pub fn confirm(reason: impl Into<String>) -> ClientResult<Self> {
        let reason = reason.into();
        if reason.trim().is_empty() {
            return Err(ClientError::invalid("break-glass access needs a stated reason"));
        }
        Ok(Self { reason })
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}
