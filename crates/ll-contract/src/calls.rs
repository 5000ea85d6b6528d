//! ABI shapes of the deployed contract. Nothing outside this module sees raw
//! tokens.

use ll_abi::{AbiError, ParamType, Token, TokenReader, encode_call, selector, to_hex_prefixed};
use ll_api_types::{Crisis, EmergencyType, Identity, Sector, WalletAddress};

#[derive(Debug, Clone, Copy)]
pub(crate) struct Method {
    pub(crate) name: &'static str,
    pub(crate) signature: &'static str,
}

impl Method {
    pub(crate) fn selector(&self) -> [u8; 4] {
        selector(self.signature)
    }

    pub(crate) fn encode(&self, args: &[Token]) -> Vec<u8> {
        encode_call(self.signature, args)
    }
}

pub(crate) const IDENTITIES: Method = Method {
    name: "identities",
    signature: "identities(address)",
};
pub(crate) const CRISES: Method = Method {
    name: "crises",
    signature: "crises(uint256)",
};
pub(crate) const CRISIS_COUNT: Method = Method {
    name: "crisisCount",
    signature: "crisisCount()",
};
pub(crate) const EMERGENCY_MODE: Method = Method {
    name: "emergencyMode",
    signature: "emergencyMode()",
};
pub(crate) const CAN_ACCESS_CRISIS: Method = Method {
    name: "canAccessCrisis",
    signature: "canAccessCrisis(uint256,address)",
};
pub(crate) const REGISTER_IDENTITY: Method = Method {
    name: "registerIdentity",
    signature: "registerIdentity(string,uint8,string)",
};
pub(crate) const DECLARE_EMERGENCY: Method = Method {
    name: "declareEmergency",
    signature: "declareEmergency(uint8,string,string,bytes32,address[])",
};
pub(crate) const VERIFY_CRISIS: Method = Method {
    name: "verifyCrisis",
    signature: "verifyCrisis(uint256,bytes[])",
};
pub(crate) const EMERGENCY_ACCESS: Method = Method {
    name: "emergencyAccess",
    signature: "emergencyAccess(uint256)",
};

pub(crate) fn identity_returns() -> Vec<ParamType> {
    vec![
        ParamType::Address,
        ParamType::String,
        ParamType::Uint,
        ParamType::String,
        ParamType::Bool,
        ParamType::Uint,
        ParamType::Uint,
    ]
}

pub(crate) fn crisis_returns() -> Vec<ParamType> {
    vec![
        ParamType::Uint,
        ParamType::String,
        ParamType::String,
        ParamType::FixedBytes32,
        ParamType::Address,
        ParamType::Uint,
        ParamType::Bool,
        ParamType::Uint,
    ]
}

pub(crate) fn register_params() -> Vec<ParamType> {
    vec![ParamType::String, ParamType::Uint, ParamType::String]
}

pub(crate) fn declare_params() -> Vec<ParamType> {
    vec![
        ParamType::Uint,
        ParamType::String,
        ParamType::String,
        ParamType::FixedBytes32,
        ParamType::Array(Box::new(ParamType::Address)),
    ]
}

pub(crate) fn verify_params() -> Vec<ParamType> {
    vec![ParamType::Uint, ParamType::Array(Box::new(ParamType::Bytes))]
}

pub(crate) fn address_token(address: &WalletAddress) -> Token {
    Token::Address(address.to_bytes())
}

/// The zero wallet is the contract's "not registered" answer.
pub(crate) fn decode_identity(raw: &[u8]) -> Result<Option<Identity>, AbiError> {
    let mut reader = TokenReader::new(ll_abi::decode(&identity_returns(), raw)?);
    let wallet = WalletAddress::from_bytes(reader.address()?);
    if wallet.is_zero() {
        return Ok(None);
    }
    let did = reader.string()?;
    let sector = Sector::from_code(reader.u8()?);
    let metadata_uri = Some(reader.string()?).filter(|uri| !uri.is_empty());

    Ok(Some(Identity {
        wallet,
        did,
        sector,
        metadata_uri,
        verified: reader.bool()?,
        registration_date: reader.u64()?,
        last_verified: reader.u64()?,
    }))
}

pub(crate) fn decode_crisis(id: u64, raw: &[u8]) -> Result<Crisis, AbiError> {
    let mut reader = TokenReader::new(ll_abi::decode(&crisis_returns(), raw)?);
    Ok(Crisis {
        id,
        emergency_type: EmergencyType::from_code(reader.u8()?),
        location: reader.string()?,
        encrypted_data: reader.string()?,
        data_hash: to_hex_prefixed(&reader.bytes32()?),
        declared_by: WalletAddress::from_bytes(reader.address()?),
        timestamp: reader.u64()?,
        verified: reader.bool()?,
        verification_count: reader.u64()?,
    })
}

pub(crate) fn decode_u64(raw: &[u8]) -> Result<u64, AbiError> {
    TokenReader::new(ll_abi::decode(&[ParamType::Uint], raw)?).u64()
}

pub(crate) fn decode_bool(raw: &[u8]) -> Result<bool, AbiError> {
    TokenReader::new(ll_abi::decode(&[ParamType::Bool], raw)?).bool()
}
