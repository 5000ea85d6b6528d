use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{AddressError, ChainId, WalletAddress};

pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(180);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1500);

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("{name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
    #[error(transparent)]
    Address(#[from] AddressError),
}

/// Target network descriptor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkConfig {
    pub chain_id: ChainId,
    pub chain_name: String,
    pub rpc_url: String,
    pub explorer_url: Option<String>,
    pub currency_symbol: String,
    pub currency_decimals: u8,
}

impl NetworkConfig {
    pub fn blockdag_testnet() -> Self {
        Self {
            chain_id: ChainId("0x3e8".to_owned()),
            chain_name: "BlockDAG Testnet".to_owned(),
            rpc_url: "https://awakening.bdagchain.com".to_owned(),
            explorer_url: Some("https://awakening.bdagscan.com/".to_owned()),
            currency_symbol: "BDAG".to_owned(),
            currency_decimals: 18,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self::blockdag_testnet()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifelineConfig {
    pub network: NetworkConfig,
    pub contract_address: WalletAddress,
    pub call_timeout: Duration,
    pub confirmation_timeout: Duration,
    pub poll_interval: Duration,
}

impl LifelineConfig {
    pub fn new(network: NetworkConfig, contract_address: WalletAddress) -> Self {
        Self {
            network,
            contract_address,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            confirmation_timeout: DEFAULT_CONFIRMATION_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Reads `LIFELINE_*` variables on top of the BlockDAG testnet defaults.
    ///
    /// `LIFELINE_CONTRACT_ADDRESS` has no default.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_owned()).filter(|v| !v.is_empty());

        let mut network = NetworkConfig::blockdag_testnet();
        if let Some(url) = get("LIFELINE_RPC_URL") {
            network.rpc_url = url.trim_end_matches('/').to_owned();
        }
        if let Some(chain_id) = get("LIFELINE_CHAIN_ID") {
            let chain_id = ChainId(chain_id);
            if chain_id.as_u64().is_none() {
                return Err(ConfigError::Invalid {
                    name: "LIFELINE_CHAIN_ID",
                    reason: format!("'{}' is not a 0x-prefixed hex number", chain_id.0),
                });
            }
            network.chain_id = chain_id.normalized();
        }
        if let Some(name) = get("LIFELINE_CHAIN_NAME") {
            network.chain_name = name;
        }

        let contract_address = get("LIFELINE_CONTRACT_ADDRESS")
            .ok_or(ConfigError::Missing("LIFELINE_CONTRACT_ADDRESS"))?;
        let mut config = Self::new(network, WalletAddress::parse(&contract_address)?);

        if let Some(secs) = get("LIFELINE_CALL_TIMEOUT_SECS") {
            config.call_timeout = Duration::from_secs(parse_number("LIFELINE_CALL_TIMEOUT_SECS", &secs)?);
        }
        if let Some(secs) = get("LIFELINE_CONFIRMATION_TIMEOUT_SECS") {
            config.confirmation_timeout =
                Duration::from_secs(parse_number("LIFELINE_CONFIRMATION_TIMEOUT_SECS", &secs)?);
        }
        if let Some(ms) = get("LIFELINE_POLL_INTERVAL_MS") {
            config.poll_interval = Duration::from_millis(parse_number("LIFELINE_POLL_INTERVAL_MS", &ms)?);
        }

        Ok(config)
    }
}

fn parse_number(name: &'static str, raw: &str) -> Result<u64, ConfigError> {
    raw.parse::<u64>().map_err(|err| ConfigError::Invalid {
        name,
        reason: err.to_string(),
    })
}
