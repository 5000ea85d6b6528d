use async_trait::async_trait;
use ll_abi::to_hex_prefixed;
use ll_api_types::{ChainId, WalletAddress};
use ll_chain_client::{ClientError, ClientResult, TxHash, TxRequest, WalletEvent, WalletProvider};
use serde_json::json;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{JsonRpcClient, METHOD_NOT_FOUND, RpcFailure};

const EVENT_BUFFER: usize = 16;

/// Wallet provider reached over JSON-RPC (a signer endpoint or a dev node
/// with unlocked accounts).
///
/// Account and chain changes are detected by polling while at least one
/// subscriber is listening.
pub struct JsonRpcWallet {
    rpc: Arc<JsonRpcClient>,
    events: broadcast::Sender<WalletEvent>,
    poll_interval: Duration,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl JsonRpcWallet {
    pub fn new(rpc: Arc<JsonRpcClient>, poll_interval: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            rpc,
            events,
            poll_interval,
            watcher: Mutex::new(None),
        }
    }

    /// A wallet endpoint that cannot be reached is treated like a missing
    /// extension.
    async fn wallet_request<R: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> ClientResult<R> {
        self.rpc
            .request_raw(method, params)
            .await
            .map_err(|failure| match failure {
                RpcFailure::Transport { connect: true, message } => {
                    debug!("wallet endpoint unreachable: {}", message);
                    ClientError::WalletUnavailable
                }
                other => other.into_client_error(),
            })
    }

    fn ensure_watcher(&self) {
        let mut guard = self.watcher.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("no async runtime; wallet change notifications disabled");
            return;
        };

        let rpc = Arc::clone(&self.rpc);
        let events = self.events.clone();
        let poll_interval = self.poll_interval;
        *guard = Some(runtime.spawn(watch_wallet(rpc, events, poll_interval)));
    }

    async fn addresses(&self, method: &str) -> ClientResult<Vec<WalletAddress>> {
        let raw: Vec<String> = self.wallet_request(method, json!([])).await?;
        parse_addresses(raw)
    }
}

impl Drop for JsonRpcWallet {
    fn drop(&mut self) {
        let guard = self.watcher.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = guard.take() {
            handle.abort();
        }
    }
}

fn parse_addresses(raw: Vec<String>) -> ClientResult<Vec<WalletAddress>> {
    raw.iter()
        .map(|entry| {
            WalletAddress::parse(entry)
                .map_err(|err| ClientError::Unknown(format!("wallet returned {err}")))
        })
        .collect()
}

async fn watch_wallet(
    rpc: Arc<JsonRpcClient>,
    events: broadcast::Sender<WalletEvent>,
    poll_interval: Duration,
) {
    let mut last_accounts: Option<Vec<String>> = None;
    let mut last_chain: Option<String> = None;

    loop {
        if events.receiver_count() == 0 {
            debug!("no wallet subscribers left; stopping watcher");
            return;
        }

        match rpc.request::<Vec<String>>("eth_accounts", json!([])).await {
            Ok(accounts) => {
                let accounts: Vec<String> = accounts.iter().map(|a| a.to_ascii_lowercase()).collect();
                if last_accounts.as_ref().is_some_and(|prev| *prev != accounts) {
                    match parse_addresses(accounts.clone()) {
                        Ok(parsed) => {
                            info!("wallet accounts changed ({} authorized)", parsed.len());
                            let _ = events.send(WalletEvent::AccountsChanged(parsed));
                        }
                        Err(err) => warn!("ignoring malformed account list: {}", err),
                    }
                }
                last_accounts = Some(accounts);
            }
            Err(err) => debug!("eth_accounts poll failed: {}", err),
        }

        match rpc.request::<String>("eth_chainId", json!([])).await {
            Ok(chain) => {
                let chain = ChainId(chain).normalized().0;
                if last_chain.as_ref().is_some_and(|prev| *prev != chain) {
                    info!("wallet chain changed to {}", chain);
                    let _ = events.send(WalletEvent::ChainChanged(ChainId(chain.clone())));
                }
                last_chain = Some(chain);
            }
            Err(err) => debug!("eth_chainId poll failed: {}", err),
        }

        tokio::time::sleep(poll_interval).await;
    }
}

#[async_trait]
impl WalletProvider for JsonRpcWallet {
    async fn request_accounts(&self) -> ClientResult<Vec<WalletAddress>> {
        let raw: Result<Vec<String>, RpcFailure> =
            self.rpc.request_raw("eth_requestAccounts", json!([])).await;
        match raw {
            Ok(accounts) => parse_addresses(accounts),
            // Plain nodes only know eth_accounts.
            Err(RpcFailure::Rpc(error)) if error.code == METHOD_NOT_FOUND => {
                self.addresses("eth_accounts").await
            }
            Err(RpcFailure::Transport { connect: true, .. }) => Err(ClientError::WalletUnavailable),
            Err(other) => Err(other.into_client_error()),
        }
    }

    async fn accounts(&self) -> ClientResult<Vec<WalletAddress>> {
        self.addresses("eth_accounts").await
    }

    async fn chain_id(&self) -> ClientResult<ChainId> {
        let raw: String = self.wallet_request("eth_chainId", json!([])).await?;
        Ok(ChainId(raw).normalized())
    }

    async fn send_transaction(&self, tx: TxRequest) -> ClientResult<TxHash> {
        let params = json!([{
            "from": tx.from.as_str(),
            "to": tx.to.as_str(),
            "data": to_hex_prefixed(&tx.data),
        }]);
        let hash: String = self.wallet_request("eth_sendTransaction", params).await?;
        info!("submitted transaction {}", hash);
        Ok(TxHash(hash))
    }

    fn subscribe(&self) -> broadcast::Receiver<WalletEvent> {
        let receiver = self.events.subscribe();
        self.ensure_watcher();
        receiver
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_wallet_is_unavailable() {
        let rpc = Arc::new(JsonRpcClient::new("http://127.0.0.1:9"));
        let wallet = JsonRpcWallet::new(rpc, Duration::from_millis(10));
        assert_eq!(wallet.request_accounts().await, Err(ClientError::WalletUnavailable));
        assert_eq!(wallet.chain_id().await, Err(ClientError::WalletUnavailable));
    }

    #[tokio::test]
    async fn watcher_stops_when_subscribers_leave() -> anyhow::Result<()> {
        let rpc = Arc::new(JsonRpcClient::new("http://127.0.0.1:9"));
        let wallet = JsonRpcWallet::new(rpc, Duration::from_millis(5));

        let receiver = wallet.subscribe();
        drop(receiver);

        for _ in 0..200 {
            let finished = wallet
                .watcher
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .as_ref()
                .is_some_and(|handle| handle.is_finished());
            if finished {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        anyhow::bail!("watcher kept running without subscribers")
    }

    #[test]
    fn malformed_addresses_from_wallet_are_errors() {
        let ok = parse_addresses(vec!["0x00000000000000000000000000000000000000Aa".to_owned()]).unwrap();
        assert_eq!(ok[0].as_str(), "0x00000000000000000000000000000000000000aa");
        assert!(parse_addresses(vec!["0x12".to_owned()]).is_err());
    }
}
