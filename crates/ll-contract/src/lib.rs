//! Typed facade over the deployed LifeLine contract.
//!
//! Reads go straight to the node. Writes need a connected account and run
//! through a dry-run call first so revert reasons surface before the wallet
//! prompt.

use ll_abi::{AbiError, Token};
use ll_api_types::{
    Crisis, DEFAULT_CALL_TIMEOUT, DEFAULT_CONFIRMATION_TIMEOUT, DEFAULT_POLL_INTERVAL, Identity,
    LifelineConfig, WalletAddress,
};
use ll_chain_client::{
    CallRequest, ChainRpc, ClientError, ClientResult, TxReceipt, TxRequest, WalletProvider,
    wait_for_receipt, with_timeout,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

mod calls;
mod requests;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use requests::{BreakGlassAcknowledgement, DeclareEmergency, RegisterIdentity};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContractOptions {
    pub call_timeout: Duration,
    /// Bounds the whole write: wallet prompt plus inclusion.
    pub confirmation_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for ContractOptions {
    fn default() -> Self {
        Self {
            call_timeout: DEFAULT_CALL_TIMEOUT,
            confirmation_timeout: DEFAULT_CONFIRMATION_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl From<&LifelineConfig> for ContractOptions {
    fn from(config: &LifelineConfig) -> Self {
        Self {
            call_timeout: config.call_timeout,
            confirmation_timeout: config.confirmation_timeout,
            poll_interval: config.poll_interval,
        }
    }
}

struct Signer {
    wallet: Arc<dyn WalletProvider>,
    account: WalletAddress,
}

/// Handle to the contract bound to (at most) one account.
///
/// Cheap to clone. A handle without a signer can still read; every write
/// fails with [`ClientError::NotConnected`] before touching the network.
#[derive(Clone)]
pub struct LifelineContract {
    rpc: Arc<dyn ChainRpc>,
    address: WalletAddress,
    signer: Option<Arc<Signer>>,
    options: ContractOptions,
}

impl LifelineContract {
    pub fn new(rpc: Arc<dyn ChainRpc>, address: WalletAddress, options: ContractOptions) -> Self {
        Self {
            rpc,
            address,
            signer: None,
            options,
        }
    }

    pub fn from_config(config: &LifelineConfig, rpc: Arc<dyn ChainRpc>) -> Self {
        Self::new(rpc, config.contract_address.clone(), ContractOptions::from(config))
    }

    /// Same contract, writes signed by `account` through `wallet`.
    pub fn with_signer(mut self, wallet: Arc<dyn WalletProvider>, account: WalletAddress) -> Self {
        self.signer = Some(Arc::new(Signer { wallet, account }));
        self
    }

    pub fn account(&self) -> Option<&WalletAddress> {
        self.signer.as_ref().map(|signer| &signer.account)
    }

    // ── reads ────────────────────────────────────────────────────────

    /// `None` when the wallet has never registered.
    pub async fn get_identity(&self, wallet: &WalletAddress) -> ClientResult<Option<Identity>> {
        let data = calls::IDENTITIES.encode(&[calls::address_token(wallet)]);
        let raw = self.read(calls::IDENTITIES.name, data).await?;
        calls::decode_identity(&raw).map_err(|err| decode_failure(calls::IDENTITIES.name, err))
    }

    pub async fn get_crisis(&self, index: u64) -> ClientResult<Crisis> {
        let data = calls::CRISES.encode(&[Token::Uint(u128::from(index))]);
        let raw = self.read(calls::CRISES.name, data).await?;
        calls::decode_crisis(index, &raw).map_err(|err| decode_failure(calls::CRISES.name, err))
    }

    pub async fn get_crisis_count(&self) -> ClientResult<u64> {
        let raw = self
            .read(calls::CRISIS_COUNT.name, calls::CRISIS_COUNT.encode(&[]))
            .await?;
        calls::decode_u64(&raw).map_err(|err| decode_failure(calls::CRISIS_COUNT.name, err))
    }

    pub async fn is_emergency_mode(&self) -> ClientResult<bool> {
        let raw = self
            .read(calls::EMERGENCY_MODE.name, calls::EMERGENCY_MODE.encode(&[]))
            .await?;
        calls::decode_bool(&raw).map_err(|err| decode_failure(calls::EMERGENCY_MODE.name, err))
    }

    pub async fn can_access_crisis(&self, crisis_id: u64, wallet: &WalletAddress) -> ClientResult<bool> {
        let data = calls::CAN_ACCESS_CRISIS.encode(&[
            Token::Uint(u128::from(crisis_id)),
            calls::address_token(wallet),
        ]);
        let raw = self.read(calls::CAN_ACCESS_CRISIS.name, data).await?;
        calls::decode_bool(&raw).map_err(|err| decode_failure(calls::CAN_ACCESS_CRISIS.name, err))
    }

    // ── writes ───────────────────────────────────────────────────────

    pub async fn register_identity(&self, request: &RegisterIdentity) -> ClientResult<TxReceipt> {
        let signer = self.signer()?;
        let data = request.encode()?;
        let receipt = self
            .transact(&signer, calls::REGISTER_IDENTITY.name, data)
            .await?;
        info!("identity registered for {}", signer.account);
        Ok(receipt)
    }

    pub async fn declare_emergency(&self, request: &DeclareEmergency) -> ClientResult<TxReceipt> {
        let signer = self.signer()?;
        let data = request.encode()?;
        let receipt = self
            .transact(&signer, calls::DECLARE_EMERGENCY.name, data)
            .await?;
        info!(
            "emergency declared by {} with {} responder(s)",
            signer.account,
            request.responders().len()
        );
        Ok(receipt)
    }

    /// `signatures` are `0x`-prefixed hex blobs collected off-chain.
    pub async fn verify_crisis(&self, crisis_id: u64, signatures: &[String]) -> ClientResult<TxReceipt> {
        let signer = self.signer()?;
        let data = requests::encode_verify(crisis_id, signatures)?;
        let receipt = self.transact(&signer, calls::VERIFY_CRISIS.name, data).await?;
        info!("crisis {} verified with {} signature(s)", crisis_id, signatures.len());
        Ok(receipt)
    }

    /// Break-glass access. The acknowledgement is the caller's explicit
    /// confirmation; the grant is permanently recorded on-chain.
    pub async fn request_emergency_access(
        &self,
        crisis_id: u64,
        acknowledgement: &BreakGlassAcknowledgement,
    ) -> ClientResult<TxReceipt> {
        let signer = self.signer()?;
        warn!(
            "break-glass access to crisis {} requested by {}: {}",
            crisis_id,
            signer.account,
            acknowledgement.reason()
        );
        let data = calls::EMERGENCY_ACCESS.encode(&[Token::Uint(u128::from(crisis_id))]);
        self.transact(&signer, calls::EMERGENCY_ACCESS.name, data).await
    }

    // ── plumbing ─────────────────────────────────────────────────────

    fn signer(&self) -> ClientResult<Arc<Signer>> {
        self.signer.clone().ok_or(ClientError::NotConnected)
    }

    async fn read(&self, call: &'static str, data: Vec<u8>) -> ClientResult<Vec<u8>> {
        let request = CallRequest {
            from: self.account().cloned(),
            to: self.address.clone(),
            data,
        };
        debug!("read {} on {}", call, self.address);
        with_timeout(self.options.call_timeout, self.rpc.call(request))
            .await
            .map_err(|err| err.in_call(call))
    }

    async fn transact(&self, signer: &Signer, call: &'static str, data: Vec<u8>) -> ClientResult<TxReceipt> {
        let preflight = CallRequest {
            from: Some(signer.account.clone()),
            to: self.address.clone(),
            data: data.clone(),
        };
        with_timeout(self.options.call_timeout, self.rpc.call(preflight))
            .await
            .map_err(|err| err.in_call(call))?;

        let tx = TxRequest {
            from: signer.account.clone(),
            to: self.address.clone(),
            data,
        };
        let submit_and_wait = async {
            let tx_hash = signer.wallet.send_transaction(tx).await?;
            debug!("{} submitted as {}", call, tx_hash.0);
            wait_for_receipt(self.rpc.as_ref(), &tx_hash, self.options.poll_interval).await
        };
        let receipt = with_timeout(self.options.confirmation_timeout, submit_and_wait)
            .await
            .map_err(|err| err.in_call(call))?;

        debug!("{} included in block {:?}", call, receipt.block_number);
        Ok(receipt)
    }
}

fn decode_failure(call: &str, err: AbiError) -> ClientError {
    ClientError::Unknown(format!("{call} returned undecodable data: {err}"))
}
