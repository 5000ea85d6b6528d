//! In-memory node, contract and wallet for tests.
//!
//! [`SimulatedLifeline`] answers the same ABI calls as the deployed contract
//! and plays the wallet extension, so the facade, session manager and views
//! can be exercised end to end without a network.

use async_trait::async_trait;
use ll_abi::{ParamType, Token, TokenReader, encode, split_call};
use ll_api_types::{ChainId, Crisis, EmergencyType, Identity, Sector, WalletAddress};
use ll_chain_client::{
    CallRequest, ChainRpc, ClientError, ClientResult, TxHash, TxReceipt, TxRequest, WalletEvent,
    WalletProvider,
};
use ll_format::parse_bytes32;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{RwLock, broadcast};

use crate::ContractOptions;
use crate::calls;

const GENESIS_TIME: u64 = 1_700_000_000;

/// Deterministic non-zero address for fixtures.
pub fn test_address(n: u8) -> WalletAddress {
    let mut bytes = [0_u8; 20];
    bytes[0] = 0xa0;
    bytes[19] = n;
    WalletAddress::from_bytes(bytes)
}

struct SimState {
    wallet_accounts: Vec<WalletAddress>,
    authorized: bool,
    wallet_missing: bool,
    reject_prompts: bool,
    stalled: bool,
    anonymous_reads_fail: bool,
    chain_id: ChainId,
    identities: HashMap<WalletAddress, Identity>,
    crises: Vec<Crisis>,
    declared_responders: Vec<Vec<WalletAddress>>,
    grants: HashSet<(u64, WalletAddress)>,
    break_glass: Vec<(u64, WalletAddress)>,
    emergency_mode: bool,
    required_signatures: usize,
    failing_crises: HashSet<u64>,
    receipts: HashMap<String, TxReceipt>,
    block: u64,
    clock: u64,
}

pub struct SimulatedLifeline {
    state: RwLock<SimState>,
    events: broadcast::Sender<WalletEvent>,
    requests: AtomicUsize,
}

impl Default for SimulatedLifeline {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedLifeline {
    /// One wallet account, `test_address(1)`, on chain `0x3e8`; nothing
    /// authorized yet.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            state: RwLock::new(SimState {
                wallet_accounts: vec![test_address(1)],
                authorized: false,
                wallet_missing: false,
                reject_prompts: false,
                stalled: false,
                anonymous_reads_fail: false,
                chain_id: ChainId::from_u64(1000),
                identities: HashMap::new(),
                crises: Vec::new(),
                declared_responders: Vec::new(),
                grants: HashSet::new(),
                break_glass: Vec::new(),
                emergency_mode: false,
                required_signatures: 1,
                failing_crises: HashSet::new(),
                receipts: HashMap::new(),
                block: 0,
                clock: GENESIS_TIME,
            }),
            events,
            requests: AtomicUsize::new(0),
        }
    }

    pub fn contract_address() -> WalletAddress {
        WalletAddress::from_bytes([0xcc; 20])
    }

    /// Short timeouts and a tight receipt poll.
    pub fn options(&self) -> ContractOptions {
        ContractOptions {
            call_timeout: Duration::from_secs(2),
            confirmation_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(1),
        }
    }

    /// Every wallet or node request seen so far.
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }

    // ── fixtures ─────────────────────────────────────────────────────

    pub async fn set_accounts(&self, accounts: Vec<WalletAddress>) {
        self.state.write().await.wallet_accounts = accounts;
    }

    /// Marks the accounts as already approved, as after an earlier visit.
    pub async fn authorize(&self) {
        self.state.write().await.authorized = true;
    }

    pub async fn set_wallet_missing(&self, missing: bool) {
        self.state.write().await.wallet_missing = missing;
    }

    pub async fn set_reject_prompts(&self, reject: bool) {
        self.state.write().await.reject_prompts = reject;
    }

    /// Every node call hangs forever.
    pub async fn set_stalled(&self, stalled: bool) {
        self.state.write().await.stalled = stalled;
    }

    /// Reads that carry no sender fail at the node. Dry runs of writes still
    /// go through.
    pub async fn set_anonymous_reads_failing(&self, failing: bool) {
        self.state.write().await.anonymous_reads_fail = failing;
    }

    pub async fn set_emergency_mode(&self, enabled: bool) {
        self.state.write().await.emergency_mode = enabled;
    }

    pub async fn set_required_signatures(&self, required: usize) {
        self.state.write().await.required_signatures = required;
    }

    /// Reads of this crisis index fail at the node.
    pub async fn fail_crisis(&self, index: u64) {
        self.state.write().await.failing_crises.insert(index);
    }

    pub async fn seed_identity(&self, identity: Identity) {
        self.state
            .write()
            .await
            .identities
            .insert(identity.wallet.clone(), identity);
    }

    /// Appends a crisis with an explicit timestamp and returns its id.
    pub async fn seed_crisis(
        &self,
        emergency_type: EmergencyType,
        location: &str,
        timestamp: u64,
        declared_by: WalletAddress,
    ) -> u64 {
        let mut state = self.state.write().await;
        let id = state.crises.len() as u64;
        state.crises.push(Crisis {
            id,
            emergency_type,
            location: location.to_owned(),
            encrypted_data: String::new(),
            data_hash: format!("0x{}", "00".repeat(32)),
            declared_by,
            timestamp,
            verified: false,
            verification_count: 0,
        });
        state.declared_responders.push(Vec::new());
        id
    }

    pub async fn grant_access(&self, crisis_id: u64, wallet: WalletAddress) {
        self.state.write().await.grants.insert((crisis_id, wallet));
    }

    // ── wallet-side events ───────────────────────────────────────────

    /// Switches the wallet's accounts and notifies subscribers.
    pub async fn switch_accounts(&self, accounts: Vec<WalletAddress>) {
        self.state.write().await.wallet_accounts = accounts.clone();
        let _ = self.events.send(WalletEvent::AccountsChanged(accounts));
    }

    pub async fn switch_chain(&self, chain_id: ChainId) {
        self.state.write().await.chain_id = chain_id.clone();
        let _ = self.events.send(WalletEvent::ChainChanged(chain_id));
    }

    // ── inspection ───────────────────────────────────────────────────

    pub async fn last_declared_responders(&self) -> Vec<WalletAddress> {
        self.state
            .read()
            .await
            .declared_responders
            .last()
            .cloned()
            .unwrap_or_default()
    }

    pub async fn break_glass_log(&self) -> Vec<(u64, WalletAddress)> {
        self.state.read().await.break_glass.clone()
    }

    fn count(&self) {
        self.requests.fetch_add(1, Ordering::SeqCst);
    }
}

fn reverted(reason: &str) -> ClientError {
    ClientError::rejected(reason)
}

fn arguments(types: &[ParamType], raw: &[u8]) -> ClientResult<TokenReader> {
    ll_abi::decode(types, raw)
        .map(TokenReader::new)
        .map_err(|_| reverted("execution reverted"))
}

fn malformed(_: ll_abi::AbiError) -> ClientError {
    reverted("execution reverted")
}

fn identity_record(identity: Option<&Identity>) -> Vec<u8> {
    match identity {
        Some(identity) => encode(&[
            Token::Address(identity.wallet.to_bytes()),
            Token::String(identity.did.clone()),
            Token::Uint(u128::from(identity.sector.code())),
            Token::String(identity.metadata_uri.clone().unwrap_or_default()),
            Token::Bool(identity.verified),
            Token::Uint(u128::from(identity.registration_date)),
            Token::Uint(u128::from(identity.last_verified)),
        ]),
        None => encode(&[
            Token::Address([0_u8; 20]),
            Token::String(String::new()),
            Token::Uint(0),
            Token::String(String::new()),
            Token::Bool(false),
            Token::Uint(0),
            Token::Uint(0),
        ]),
    }
}

fn crisis_record(crisis: &Crisis) -> Vec<u8> {
    encode(&[
        Token::Uint(u128::from(crisis.emergency_type.code())),
        Token::String(crisis.location.clone()),
        Token::String(crisis.encrypted_data.clone()),
        Token::FixedBytes32(parse_bytes32(&crisis.data_hash).unwrap_or([0_u8; 32])),
        Token::Address(crisis.declared_by.to_bytes()),
        Token::Uint(u128::from(crisis.timestamp)),
        Token::Bool(crisis.verified),
        Token::Uint(u128::from(crisis.verification_count)),
    ])
}

impl SimState {
    fn tick(&mut self) -> u64 {
        self.clock += 60;
        self.clock
    }

    fn crisis_index(&self, raw: u64) -> ClientResult<usize> {
        let index = usize::try_from(raw).map_err(|_| reverted("Crisis does not exist"))?;
        if index >= self.crises.len() {
            return Err(reverted("Crisis does not exist"));
        }
        Ok(index)
    }

    /// Runs one contract call. Writes only mutate state when `commit` is set,
    /// which lets the same path serve dry runs.
    fn execute(&mut self, sender: &WalletAddress, data: &[u8], commit: bool) -> ClientResult<Vec<u8>> {
        let (selector, args) = split_call(data).map_err(malformed)?;

        if selector == calls::IDENTITIES.selector() {
            let wallet = WalletAddress::from_bytes(arguments(&[ParamType::Address], args)?.address().map_err(malformed)?);
            return Ok(identity_record(self.identities.get(&wallet)));
        }
        if selector == calls::CRISES.selector() {
            let raw = arguments(&[ParamType::Uint], args)?.u64().map_err(malformed)?;
            if self.failing_crises.contains(&raw) {
                return Err(ClientError::Unknown(format!("node dropped the read of crisis {raw}")));
            }
            let index = self.crisis_index(raw).map_err(|_| reverted("panic code 0x32"))?;
            return Ok(crisis_record(&self.crises[index]));
        }
        if selector == calls::CRISIS_COUNT.selector() {
            return Ok(encode(&[Token::Uint(self.crises.len() as u128)]));
        }
        if selector == calls::EMERGENCY_MODE.selector() {
            return Ok(encode(&[Token::Bool(self.emergency_mode)]));
        }
        if selector == calls::CAN_ACCESS_CRISIS.selector() {
            let mut reader = arguments(&[ParamType::Uint, ParamType::Address], args)?;
            let crisis_id = reader.u64().map_err(malformed)?;
            let wallet = WalletAddress::from_bytes(reader.address().map_err(malformed)?);
            let declared = self
                .crisis_index(crisis_id)
                .is_ok_and(|index| self.crises[index].declared_by == wallet);
            let allowed = declared || self.grants.contains(&(crisis_id, wallet));
            return Ok(encode(&[Token::Bool(allowed)]));
        }

        if selector == calls::REGISTER_IDENTITY.selector() {
            let mut reader = arguments(&calls::register_params(), args)?;
            let did = reader.string().map_err(malformed)?;
            let sector = reader.u8().map_err(malformed)?;
            let metadata_uri = reader.string().map_err(malformed)?;
            if self.identities.contains_key(sender) {
                return Err(reverted("Identity already registered"));
            }
            if commit {
                let registered_at = self.tick();
                self.identities.insert(
                    sender.clone(),
                    Identity {
                        wallet: sender.clone(),
                        did,
                        sector: Sector::from_code(sector),
                        metadata_uri: Some(metadata_uri).filter(|uri| !uri.is_empty()),
                        verified: false,
                        registration_date: registered_at,
                        last_verified: 0,
                    },
                );
            }
            return Ok(Vec::new());
        }
        if selector == calls::DECLARE_EMERGENCY.selector() {
            let mut reader = arguments(&calls::declare_params(), args)?;
            let emergency_type = reader.u8().map_err(malformed)?;
            let location = reader.string().map_err(malformed)?;
            let encrypted_data = reader.string().map_err(malformed)?;
            let digest = reader.bytes32().map_err(malformed)?;
            let responders = reader
                .array()
                .map_err(malformed)?
                .into_iter()
                .map(|token| match token {
                    Token::Address(bytes) => Ok(WalletAddress::from_bytes(bytes)),
                    _ => Err(reverted("execution reverted")),
                })
                .collect::<ClientResult<Vec<_>>>()?;
            if commit {
                let id = self.crises.len() as u64;
                let timestamp = self.tick();
                self.crises.push(Crisis {
                    id,
                    emergency_type: EmergencyType::from_code(emergency_type),
                    location,
                    encrypted_data,
                    data_hash: ll_abi::to_hex_prefixed(&digest),
                    declared_by: sender.clone(),
                    timestamp,
                    verified: false,
                    verification_count: 0,
                });
                for responder in &responders {
                    self.grants.insert((id, responder.clone()));
                }
                self.declared_responders.push(responders);
            }
            return Ok(Vec::new());
        }
        if selector == calls::VERIFY_CRISIS.selector() {
            let mut reader = arguments(&calls::verify_params(), args)?;
            let index = self.crisis_index(reader.u64().map_err(malformed)?)?;
            let signatures = reader.array().map_err(malformed)?;
            if signatures.len() < self.required_signatures {
                return Err(reverted("Insufficient signatures"));
            }
            if commit {
                let crisis = &mut self.crises[index];
                crisis.verified = true;
                crisis.verification_count += signatures.len() as u64;
            }
            return Ok(Vec::new());
        }
        if selector == calls::EMERGENCY_ACCESS.selector() {
            let crisis_id = arguments(&[ParamType::Uint], args)?.u64().map_err(malformed)?;
            self.crisis_index(crisis_id)?;
            if commit {
                self.grants.insert((crisis_id, sender.clone()));
                self.break_glass.push((crisis_id, sender.clone()));
            }
            return Ok(Vec::new());
        }

        Err(reverted("execution reverted"))
    }
}

#[async_trait]
impl ChainRpc for SimulatedLifeline {
    async fn call(&self, req: CallRequest) -> ClientResult<Vec<u8>> {
        self.count();
        let (stalled, anonymous_reads_fail) = {
            let state = self.state.read().await;
            (state.stalled, state.anonymous_reads_fail)
        };
        if stalled {
            std::future::pending::<()>().await;
        }
        if anonymous_reads_fail && req.from.is_none() {
            return Err(ClientError::Unknown("node dropped the read".to_owned()));
        }
        if req.to != Self::contract_address() {
            return Ok(Vec::new());
        }
        let sender = req.from.unwrap_or_else(WalletAddress::zero);
        self.state.write().await.execute(&sender, &req.data, false)
    }

    async fn transaction_receipt(&self, tx_hash: &TxHash) -> ClientResult<Option<TxReceipt>> {
        self.count();
        Ok(self.state.read().await.receipts.get(&tx_hash.0).cloned())
    }
}

#[async_trait]
impl WalletProvider for SimulatedLifeline {
    async fn request_accounts(&self) -> ClientResult<Vec<WalletAddress>> {
        self.count();
        let mut state = self.state.write().await;
        if state.wallet_missing {
            return Err(ClientError::WalletUnavailable);
        }
        if state.reject_prompts {
            return Err(ClientError::UserRejected);
        }
        state.authorized = true;
        Ok(state.wallet_accounts.clone())
    }

    async fn accounts(&self) -> ClientResult<Vec<WalletAddress>> {
        self.count();
        let state = self.state.read().await;
        if state.wallet_missing {
            return Err(ClientError::WalletUnavailable);
        }
        Ok(if state.authorized {
            state.wallet_accounts.clone()
        } else {
            Vec::new()
        })
    }

    async fn chain_id(&self) -> ClientResult<ChainId> {
        self.count();
        let state = self.state.read().await;
        if state.wallet_missing {
            return Err(ClientError::WalletUnavailable);
        }
        Ok(state.chain_id.clone())
    }

    async fn send_transaction(&self, tx: TxRequest) -> ClientResult<TxHash> {
        self.count();
        let mut state = self.state.write().await;
        if state.reject_prompts {
            return Err(ClientError::UserRejected);
        }
        if tx.to != Self::contract_address() {
            return Err(reverted("execution reverted"));
        }
        state.execute(&tx.from, &tx.data, true)?;

        state.block += 1;
        let tx_hash = TxHash(format!("0x{:064x}", state.block));
        let receipt = TxReceipt {
            tx_hash: tx_hash.clone(),
            block_number: Some(state.block),
            status: true,
        };
        state.receipts.insert(tx_hash.0.clone(), receipt);
        Ok(tx_hash)
    }

    fn subscribe(&self) -> broadcast::Receiver<WalletEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn accounts_stay_hidden_until_authorized() -> anyhow::Result<()> {
        let sim = SimulatedLifeline::new();
        assert!(sim.accounts().await?.is_empty());
        assert_eq!(sim.request_accounts().await?, vec![test_address(1)]);
        assert_eq!(sim.accounts().await?, vec![test_address(1)]);
        Ok(())
    }

    #[tokio::test]
    async fn dry_runs_leave_state_untouched() -> anyhow::Result<()> {
        let sim = SimulatedLifeline::new();
        let data = calls::EMERGENCY_ACCESS.encode(&[Token::Uint(0)]);
        sim.seed_crisis(EmergencyType::NaturalDisaster, "Delta", 10, test_address(2))
            .await;

        sim.call(CallRequest {
            from: Some(test_address(1)),
            to: SimulatedLifeline::contract_address(),
            data,
        })
        .await?;
        assert!(sim.break_glass_log().await.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn switching_accounts_notifies_subscribers() -> anyhow::Result<()> {
        let sim = SimulatedLifeline::new();
        let mut events = sim.subscribe();
        sim.switch_accounts(vec![test_address(3)]).await;
        assert_eq!(events.recv().await?, WalletEvent::AccountsChanged(vec![test_address(3)]));
        Ok(())
    }
}
