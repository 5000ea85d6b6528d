use async_trait::async_trait;
use ll_abi::{decode_revert_reason, from_hex_prefixed, to_hex_prefixed};
use ll_chain_client::{CallRequest, ChainRpc, ClientError, ClientResult, TxHash, TxReceipt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

mod wallet;

pub use wallet::JsonRpcWallet;

const USER_REJECTED: i64 = 4001;
const UNAUTHORIZED: i64 = 4100;
const EXECUTION_REVERTED: i64 = 3;
pub(crate) const METHOD_NOT_FOUND: i64 = -32601;

/// JSON-RPC 2.0 client for an EVM node or wallet endpoint. The endpoint
/// comes from [`ll_api_types::LifelineConfig`] or an explicit flag.
pub struct JsonRpcClient {
    endpoint: String,
    http: reqwest::Client,
    next_id: AtomicU64,
}

impl JsonRpcClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub async fn request<R: DeserializeOwned>(&self, method: &str, params: Value) -> ClientResult<R> {
        self.request_raw(method, params)
            .await
            .map_err(RpcFailure::into_client_error)
    }

    pub(crate) async fn request_raw<R: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<R, RpcFailure> {
        let body = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };
        debug!("rpc {} -> {}", method, self.endpoint);

        let response = self
            .http
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|err| RpcFailure::Transport {
                connect: err.is_connect(),
                message: format!("{method} transport: {err}"),
            })?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        let envelope: RpcResponse = serde_json::from_str(&text).map_err(|err| {
            if status.is_success() {
                RpcFailure::Decode(format!("{method} response parse: {err}"))
            } else {
                RpcFailure::Transport {
                    connect: false,
                    message: format!("{method} HTTP {status}: {text}"),
                }
            }
        })?;

        if let Some(error) = envelope.error {
            return Err(RpcFailure::Rpc(error));
        }
        // `null` is a legitimate result (e.g. pending receipts).
        serde_json::from_value(envelope.result.unwrap_or(Value::Null))
            .map_err(|err| RpcFailure::Decode(format!("{method} result parse: {err}")))
    }
}

// ── JSON-RPC wire types ──────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RpcErrorObject {
    pub(crate) code: i64,
    pub(crate) message: String,
    #[serde(default)]
    pub(crate) data: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReceiptWire {
    transaction_hash: String,
    #[serde(default)]
    block_number: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug)]
pub(crate) enum RpcFailure {
    Transport { connect: bool, message: String },
    Rpc(RpcErrorObject),
    Decode(String),
}

impl RpcFailure {
    pub(crate) fn into_client_error(self) -> ClientError {
        match self {
            Self::Transport { message, .. } | Self::Decode(message) => ClientError::Unknown(message),
            Self::Rpc(error) => map_rpc_error(&error),
        }
    }
}

pub(crate) fn map_rpc_error(error: &RpcErrorObject) -> ClientError {
    match error.code {
        USER_REJECTED => return ClientError::UserRejected,
        UNAUTHORIZED => return ClientError::NotConnected,
        _ => {}
    }

    if let Some(reason) = error.data.as_ref().and_then(revert_data).and_then(|raw| decode_revert_reason(&raw)) {
        return ClientError::rejected(reason);
    }

    if error.code == EXECUTION_REVERTED || error.message.contains("revert") {
        let reason = error
            .message
            .strip_prefix("execution reverted: ")
            .unwrap_or(&error.message);
        return ClientError::rejected(reason);
    }

    ClientError::rejected(error.message.clone())
}

/// Nodes put revert bytes either directly in `data` or one level down.
fn revert_data(data: &Value) -> Option<Vec<u8>> {
    match data {
        Value::String(raw) => from_hex_prefixed(raw).ok(),
        Value::Object(map) => map.get("data").and_then(revert_data),
        _ => None,
    }
}

pub(crate) fn parse_quantity(raw: &str) -> Option<u64> {
    let digits = raw.strip_prefix("0x")?;
    if digits.is_empty() {
        return None;
    }
    u64::from_str_radix(digits, 16).ok()
}

fn receipt_from_wire(wire: ReceiptWire) -> TxReceipt {
    TxReceipt {
        tx_hash: TxHash(wire.transaction_hash),
        block_number: wire.block_number.as_deref().and_then(parse_quantity),
        // Pre-Byzantium receipts carry no status; inclusion is all we know.
        status: wire.status.as_deref().map(|s| parse_quantity(s) == Some(1)).unwrap_or(true),
    }
}

#[async_trait]
impl ChainRpc for JsonRpcClient {
    async fn call(&self, req: CallRequest) -> ClientResult<Vec<u8>> {
        let mut tx = json!({
            "to": req.to.as_str(),
            "data": to_hex_prefixed(&req.data),
        });
        if let Some(from) = &req.from {
            tx["from"] = json!(from.as_str());
        }

        let raw: String = self.request("eth_call", json!([tx, "latest"])).await?;
        from_hex_prefixed(&raw).map_err(|err| ClientError::Unknown(format!("eth_call returned non-hex data: {err}")))
    }

    async fn transaction_receipt(&self, tx_hash: &TxHash) -> ClientResult<Option<TxReceipt>> {
        let wire: Option<ReceiptWire> = self
            .request("eth_getTransactionReceipt", json!([tx_hash.0]))
            .await?;
        Ok(wire.map(receipt_from_wire))
    }
}
