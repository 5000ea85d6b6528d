use async_trait::async_trait;
use ll_api_types::{ChainId, WalletAddress};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::debug;

/// Failure kinds surfaced to callers of the wallet and contract seams.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    #[error("no wallet provider available; install a browser wallet to continue")]
    WalletUnavailable,
    #[error("request rejected in the wallet")]
    UserRejected,
    #[error("wallet is not connected")]
    NotConnected,
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// `reason` is the provider's message, passed through verbatim.
    #[error("{reason}")]
    RemoteRejected { call: String, reason: String },
    #[error("no response within {0:?}")]
    Timeout(Duration),
    #[error("{0}")]
    Unknown(String),
}

pub type ClientResult<T> = Result<T, ClientError>;

impl ClientError {
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::RemoteRejected {
            call: String::new(),
            reason: reason.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Tags a remote rejection with the contract method it came from.
    pub fn in_call(self, method: &str) -> Self {
        match self {
            Self::RemoteRejected { call, reason } if call.is_empty() => Self::RemoteRejected {
                call: method.to_owned(),
                reason,
            },
            other => other,
        }
    }

    pub fn is_registration_rejected(&self) -> bool {
        matches!(self, Self::RemoteRejected { call, .. } if call == "registerIdentity")
    }

    pub fn is_verification_rejected(&self) -> bool {
        matches!(self, Self::RemoteRejected { call, .. } if call == "verifyCrisis")
    }

    /// Errors that need the user to act (install a wallet, approve a prompt)
    /// rather than a passive message.
    pub fn requires_user_action(&self) -> bool {
        matches!(self, Self::WalletUnavailable | Self::UserRejected)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct TxHash(pub String);

#[derive(Debug, Clone)]
pub struct CallRequest {
    pub from: Option<WalletAddress>,
    pub to: WalletAddress,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct TxRequest {
    pub from: WalletAddress,
    pub to: WalletAddress,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx_hash: TxHash,
    pub block_number: Option<u64>,
    pub status: bool,
}

impl TxReceipt {
    pub fn succeeded(&self) -> bool {
        self.status
    }
}

/// Notifications pushed by the wallet extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletEvent {
    AccountsChanged(Vec<WalletAddress>),
    ChainChanged(ChainId),
}

/// The wallet extension API: account access, chain identity, signing.
#[async_trait]
pub trait WalletProvider: Send + Sync {
    /// Prompts the user for account access.
    async fn request_accounts(&self) -> ClientResult<Vec<WalletAddress>>;
    /// Already-authorized accounts, without prompting.
    async fn accounts(&self) -> ClientResult<Vec<WalletAddress>>;
    async fn chain_id(&self) -> ClientResult<ChainId>;
    /// Signs and broadcasts; resolves once the transaction is submitted.
    async fn send_transaction(&self, tx: TxRequest) -> ClientResult<TxHash>;
    /// Dropping the receiver unsubscribes.
    fn subscribe(&self) -> broadcast::Receiver<WalletEvent>;
}

/// Raw contract handle: read calls and receipt lookups.
#[async_trait]
pub trait ChainRpc: Send + Sync {
    async fn call(&self, req: CallRequest) -> ClientResult<Vec<u8>>;
    async fn transaction_receipt(&self, tx_hash: &TxHash) -> ClientResult<Option<TxReceipt>>;
}

pub async fn with_timeout<T, F>(limit: Duration, future: F) -> ClientResult<T>
where
    F: Future<Output = ClientResult<T>>,
{
    tokio::time::timeout(limit, future)
        .await
        .map_err(|_| ClientError::Timeout(limit))?
}

/// Polls until the transaction is included. A reverted receipt is a
/// rejection; callers bound the wait with [`with_timeout`].
pub async fn wait_for_receipt(
    rpc: &dyn ChainRpc,
    tx_hash: &TxHash,
    poll_interval: Duration,
) -> ClientResult<TxReceipt> {
    loop {
        match rpc.transaction_receipt(tx_hash).await? {
            Some(receipt) if receipt.succeeded() => return Ok(receipt),
            Some(receipt) => {
                return Err(ClientError::rejected(format!(
                    "transaction {} reverted",
                    receipt.tx_hash.0
                )));
            }
            None => {
                debug!("receipt for {} not available yet", tx_hash.0);
                tokio::time::sleep(poll_interval).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct PendingThenMined {
        polls: AtomicUsize,
        mined_after: usize,
        status: bool,
    }

    #[async_trait]
    impl ChainRpc for PendingThenMined {
        async fn call(&self, _req: CallRequest) -> ClientResult<Vec<u8>> {
            Ok(Vec::new())
        }

        async fn transaction_receipt(&self, tx_hash: &TxHash) -> ClientResult<Option<TxReceipt>> {
            let seen = self.polls.fetch_add(1, Ordering::SeqCst);
            if seen < self.mined_after {
                return Ok(None);
            }
            Ok(Some(TxReceipt {
                tx_hash: tx_hash.clone(),
                block_number: Some(10),
                status: self.status,
            }))
        }
    }

    #[tokio::test]
    async fn waits_until_receipt_is_available() -> anyhow::Result<()> {
        let rpc = PendingThenMined {
            polls: AtomicUsize::new(0),
            mined_after: 2,
            status: true,
        };
        let hash = TxHash("0xabc".to_owned());
        let receipt = wait_for_receipt(&rpc, &hash, Duration::from_millis(1)).await?;
        assert!(receipt.succeeded());
        assert_eq!(rpc.polls.load(Ordering::SeqCst), 3);
        Ok(())
    }

    #[tokio::test]
    async fn reverted_receipt_is_a_rejection() {
        let rpc = PendingThenMined {
            polls: AtomicUsize::new(0),
            mined_after: 0,
            status: false,
        };
        let hash = TxHash("0xdead".to_owned());
        let err = wait_for_receipt(&rpc, &hash, Duration::from_millis(1))
            .await
            .unwrap_err()
            .in_call("verifyCrisis");
        assert!(err.is_verification_rejected());
        assert_eq!(err.to_string(), "transaction 0xdead reverted");
    }

    #[tokio::test]
    async fn hung_calls_time_out() {
        let limit = Duration::from_millis(20);
        let result: ClientResult<()> = with_timeout(limit, std::future::pending()).await;
        assert_eq!(result, Err(ClientError::Timeout(limit)));

        let ok = with_timeout(limit, async { Ok::<_, ClientError>(5) }).await;
        assert_eq!(ok, Ok(5));
    }

    #[test]
    fn call_tag_is_only_applied_once() {
        let err = ClientError::rejected("already registered")
            .in_call("registerIdentity")
            .in_call("verifyCrisis");
        assert!(err.is_registration_rejected());
        assert!(!err.is_verification_rejected());
        assert!(!ClientError::NotConnected.in_call("x").is_registration_rejected());
        assert!(ClientError::UserRejected.requires_user_action());
        assert!(!ClientError::Unknown("boom".into()).requires_user_action());
    }
}
