//! Thin JSON-RPC adapter for the three Solana endpoints the facilitator
//! needs: a recent blockhash, raw transaction submission, and token-account
//! balances.
//!
//! The client keeps a bounded reusable connection pool and a per-request
//! timeout, and never retries; callers decide what is worth repeating.
//! Transport failures are retriable, node-side rejections are not, and a 200
//! response that does not match the JSON-RPC schema is fatal.

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::time::Duration;
use url::Url;

use crate::util::b64;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_CONNECTIONS: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// Transport-level failure; the endpoint may recover.
    #[error("RPC transport error: {0}")]
    Transport(#[from] reqwest::Error),
    /// The node answered with a JSON-RPC error object.
    #[error("{message}")]
    Rpc { code: i64, message: String },
    /// The node answered but the payload did not match the expected schema.
    #[error("Malformed RPC response: {0}")]
    Malformed(String),
}

impl RpcError {
    pub fn is_retriable(&self) -> bool {
        matches!(self, RpcError::Transport(_))
    }
}

/// `getLatestBlockhash` result value.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatestBlockhash {
    pub blockhash: String,
    pub last_valid_block_height: u64,
}

/// `getTokenAccountBalance` result value.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenBalance {
    pub amount: String,
    pub decimals: u8,
}

#[derive(Debug, Deserialize)]
struct ContextValue<T> {
    value: T,
}

/// JSON-RPC client for a single Solana node.
#[derive(Debug, Clone)]
pub struct RpcClient {
    http: reqwest::Client,
    url: Url,
}

impl RpcClient {
    pub fn new(url: Url) -> Result<Self, RpcError> {
        Self::with_timeout(url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(url: Url, timeout: Duration) -> Result<Self, RpcError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(DEFAULT_MAX_CONNECTIONS)
            .build()?;
        Ok(Self { http, url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Fetch a recent blockhash at `confirmed` commitment.
    pub async fn get_latest_blockhash(&self) -> Result<LatestBlockhash, RpcError> {
        let result: ContextValue<LatestBlockhash> = self
            .call("getLatestBlockhash", json!([{"commitment": "confirmed"}]))
            .await?;
        Ok(result.value)
    }

    /// Submit fully-signed transaction bytes. Preflight runs at `confirmed`
    /// commitment; the node's signature check and simulation reject expired
    /// blockhashes and insufficient balances here.
    pub async fn send_transaction(&self, transaction: &[u8]) -> Result<String, RpcError> {
        self.call(
            "sendTransaction",
            json!([
                b64::encode(transaction),
                {
                    "encoding": "base64",
                    "skipPreflight": false,
                    "preflightCommitment": "confirmed",
                }
            ]),
        )
        .await
    }

    /// Read the balance of a token account (an ATA, usually).
    pub async fn get_token_account_balance(
        &self,
        address: &str,
    ) -> Result<TokenBalance, RpcError> {
        let result: ContextValue<TokenBalance> = self
            .call(
                "getTokenAccountBalance",
                json!([address, {"commitment": "confirmed"}]),
            )
            .await?;
        Ok(result.value)
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, RpcError> {
        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        let response = self.http.post(self.url.clone()).json(&request).send().await?;
        let body = response.text().await?;
        let envelope: Value = serde_json::from_str(&body)
            .map_err(|e| RpcError::Malformed(format!("{method}: {e}")))?;
        if let Some(error) = envelope.get("error") {
            let code = error.get("code").and_then(Value::as_i64).unwrap_or(0);
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown RPC error")
                .to_string();
            return Err(RpcError::Rpc { code, message });
        }
        let result = envelope
            .get("result")
            .ok_or_else(|| RpcError::Malformed(format!("{method}: missing result field")))?;
        serde_json::from_value(result.clone())
            .map_err(|e| RpcError::Malformed(format!("{method}: {e}")))
    }
}
