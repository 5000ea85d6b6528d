//! lifeline - command-line front end for the LifeLine crisis contract.

use anyhow::Context;
use clap::{Parser, Subcommand};
use ll_api_types::{EmergencyType, LifelineConfig, Sector};
use ll_chain_jsonrpc::{JsonRpcClient, JsonRpcWallet};
use ll_session::SessionManager;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod commands;
mod parse;

#[derive(Parser, Debug)]
#[command(name = "lifeline", version, about, long_about = None)]
struct Cli {
    /// Node endpoint for contract reads
    #[arg(long, env = "LIFELINE_RPC_URL")]
    rpc_url: Option<String>,

    /// Wallet endpoint for account access and signing (defaults to the node)
    #[arg(long, env = "LIFELINE_WALLET_URL")]
    wallet_url: Option<String>,

    /// Deployed contract address
    #[arg(long, env = "LIFELINE_CONTRACT_ADDRESS")]
    contract: Option<String>,

    /// Expected chain id, hex
    #[arg(long, env = "LIFELINE_CHAIN_ID")]
    chain_id: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Network, account and contract overview
    Status,

    /// Show an identity (the connected account when no address is given)
    Identity {
        #[arg(long)]
        address: Option<String>,
    },

    /// Register the connected account
    Register {
        #[arg(long)]
        did: String,
        /// Sector name (e.g. healthcare, law-enforcement) or numeric code
        #[arg(long, value_parser = parse::sector)]
        sector: Sector,
        #[arg(long)]
        metadata_uri: Option<String>,
    },

    /// List crises, newest first
    Crises,

    /// Declare an emergency
    Declare {
        /// Emergency type name (e.g. medical-emergency) or numeric code
        #[arg(long = "type", value_parser = parse::emergency_type)]
        emergency_type: EmergencyType,
        #[arg(long)]
        location: String,
        #[arg(long, default_value = "")]
        data: String,
        /// 0x-prefixed 32-byte digest; SHA-256 of --data when omitted
        #[arg(long)]
        hash: Option<String>,
        /// Comma-separated responder addresses; malformed entries are dropped
        #[arg(long, default_value = "")]
        responders: String,
    },

    /// Submit verification signatures for a crisis
    Verify {
        #[arg(value_parser = parse::crisis_id)]
        crisis_id: u64,
        /// 0x-prefixed signature, repeatable
        #[arg(long = "signature", required = true)]
        signatures: Vec<String>,
    },

    /// Crises the connected account may open
    Access,

    /// Break-glass access to a crisis. Irreversible and audited on-chain.
    BreakGlass {
        #[arg(value_parser = parse::crisis_id)]
        crisis_id: u64,
        #[arg(long)]
        reason: String,
        /// Confirms the request is intentional
        #[arg(long)]
        acknowledge: bool,
    },
}

impl Cli {
    /// Flags win over `LIFELINE_*` variables, which win over defaults.
    fn config(&self) -> anyhow::Result<LifelineConfig> {
        LifelineConfig::from_lookup(|name| {
            let flag = match name {
                "LIFELINE_RPC_URL" => self.rpc_url.clone(),
                "LIFELINE_CONTRACT_ADDRESS" => self.contract.clone(),
                "LIFELINE_CHAIN_ID" => self.chain_id.clone(),
                _ => None,
            };
            flag.or_else(|| std::env::var(name).ok())
        })
        .context("invalid LifeLine configuration")
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = cli.config()?;
    info!(
        "using {} ({}) contract {}",
        config.network.chain_name, config.network.rpc_url, config.contract_address
    );

    let rpc = Arc::new(JsonRpcClient::new(config.network.rpc_url.clone()));
    let wallet_endpoint = cli
        .wallet_url
        .clone()
        .unwrap_or_else(|| config.network.rpc_url.clone());
    let wallet = Arc::new(JsonRpcWallet::new(
        Arc::new(JsonRpcClient::new(wallet_endpoint)),
        config.poll_interval,
    ));
    let sessions = Arc::new(SessionManager::new(config, rpc, Some(wallet)));

    let output = commands::run(cli.command, sessions).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
