//! Ethereum JSON-RPC client implementing [`Ledger`].
//!
//! With a [`Wallet`] attached, transactions are signed locally and sent with
//! `eth_sendRawTransaction`. Without one they go through
//! `eth_sendTransaction`, so the sending account must be unlocked on the
//! node (hardhat/anvil dev accounts).

use alloy_primitives::{hex, Address, Bytes, B256};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::LedgerError;
use crate::ledger::{Ledger, LogEntry, LogFilter, TxReceipt, TxRequest};
use crate::wallet::Wallet;

/// HTTP request timeout for node calls.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Headroom added on top of `eth_estimateGas`, in percent.
const GAS_ESTIMATE_MARGIN: u64 = 20;

#[derive(Clone)]
pub struct EvmRpcClient {
    rpc_url: String,
    http: reqwest::Client,
    wallet: Option<Wallet>,
    /// Next nonce for the wallet. `None` until fetched, and again after a
    /// failed send so the node's view is re-read.
    nonce: Arc<Mutex<Option<u64>>>,
}

#[derive(Serialize)]
struct JsonRpcRequest<T: Serialize> {
    jsonrpc: &'static str,
    id: u64,
    method: &'static str,
    params: T,
}

#[derive(Deserialize, Debug)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Deserialize, Debug)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    transaction_hash: B256,
    block_number: String,
    /// Absent on pre-Byzantium chains, where success cannot be told apart.
    status: Option<String>,
    logs: Vec<RpcLog>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct RpcLog {
    address: Address,
    topics: Vec<B256>,
    data: Bytes,
    block_number: Option<String>,
}

/// Parse a `0x`-prefixed hex quantity.
fn parse_quantity(value: &str) -> Result<u64, LedgerError> {
    let digits = value
        .strip_prefix("0x")
        .ok_or_else(|| LedgerError::Malformed(format!("quantity without 0x prefix: {value}")))?;
    u64::from_str_radix(digits, 16)
        .map_err(|e| LedgerError::Malformed(format!("bad quantity {value}: {e}")))
}

impl TryFrom<RpcLog> for LogEntry {
    type Error = LedgerError;

    fn try_from(log: RpcLog) -> Result<Self, Self::Error> {
        Ok(LogEntry {
            address: log.address,
            topics: log.topics,
            data: log.data,
            block_number: log.block_number.as_deref().map(parse_quantity).transpose()?,
        })
    }
}

impl TryFrom<RpcReceipt> for TxReceipt {
    type Error = LedgerError;

    fn try_from(receipt: RpcReceipt) -> Result<Self, Self::Error> {
        let success = match receipt.status.as_deref() {
            Some(status) => parse_quantity(status)? == 1,
            None => true,
        };
        Ok(TxReceipt {
            tx_hash: receipt.transaction_hash,
            block_number: parse_quantity(&receipt.block_number)?,
            success,
            logs: receipt
                .logs
                .into_iter()
                .map(LogEntry::try_from)
                .collect::<Result<_, _>>()?,
        })
    }
}

impl EvmRpcClient {
    pub fn new(rpc_url: &str) -> Result<Self, LedgerError> {
        let http = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(Self {
            rpc_url: rpc_url.to_string(),
            http,
            wallet: None,
            nonce: Arc::new(Mutex::new(None)),
        })
    }

    /// Sign every transaction with `wallet`.
    pub fn with_wallet(mut self, wallet: Wallet) -> Self {
        self.wallet = Some(wallet);
        self
    }

    async fn request<P: Serialize, R: DeserializeOwned>(
        &self,
        method: &'static str,
        params: P,
    ) -> Result<Option<R>, LedgerError> {
        let req = JsonRpcRequest {
            jsonrpc: "2.0",
            id: 1,
            method,
            params,
        };

        let resp: JsonRpcResponse<R> = self
            .http
            .post(&self.rpc_url)
            .json(&req)
            .send()
            .await?
            .json()
            .await?;

        if let Some(err) = resp.error {
            debug!(method, code = err.code, message = %err.message, "RPC error");
            return Err(LedgerError::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        Ok(resp.result)
    }

    async fn request_required<P: Serialize, R: DeserializeOwned>(
        &self,
        method: &'static str,
        params: P,
    ) -> Result<R, LedgerError> {
        self.request(method, params)
            .await?
            .ok_or_else(|| LedgerError::Malformed(format!("{method} returned null result")))
    }

    /// Accounts the node can sign for (`eth_accounts`).
    pub async fn accounts(&self) -> Result<Vec<Address>, LedgerError> {
        self.request_required("eth_accounts", serde_json::json!([])).await
    }

    async fn quantity<P: Serialize>(
        &self,
        method: &'static str,
        params: P,
    ) -> Result<u64, LedgerError> {
        let raw: String = self.request_required(method, params).await?;
        parse_quantity(&raw)
    }

    async fn gas_limit(&self, tx: &TxRequest) -> Result<u64, LedgerError> {
        if let Some(gas) = tx.gas {
            return Ok(gas);
        }
        let estimate = self.quantity("eth_estimateGas", [call_object(tx)]).await?;
        Ok(estimate + estimate * GAS_ESTIMATE_MARGIN / 100)
    }

    /// Sign and submit `tx`. The nonce lock is held until the node accepted
    /// the transaction, so concurrent sends get consecutive nonces.
    async fn send_signed(&self, wallet: &Wallet, tx: &TxRequest) -> Result<B256, LedgerError> {
        if tx.from != wallet.address() {
            return Err(LedgerError::Signer(format!(
                "no key for sender {}, wallet holds {}",
                tx.from,
                wallet.address()
            )));
        }
        let gas_limit = self.gas_limit(tx).await?;
        let gas_price = self.quantity("eth_gasPrice", serde_json::json!([])).await?;

        let mut next = self.nonce.lock().await;
        let nonce = match *next {
            Some(nonce) => nonce,
            None => {
                let params = serde_json::json!([tx.from.to_string(), "pending"]);
                self.quantity("eth_getTransactionCount", params).await?
            }
        };
        let raw = wallet.sign(tx, nonce, gas_limit, u128::from(gas_price))?;

        let sent = self
            .request_required("eth_sendRawTransaction", [hex::encode_prefixed(&raw)])
            .await;
        *next = match sent {
            Ok(_) => Some(nonce + 1),
            Err(_) => None,
        };
        debug!(nonce, gas_limit, gas_price, ok = sent.is_ok(), "Raw transaction submitted");
        sent
    }
}

/// `{from, to, data, gas?}` object for `eth_sendTransaction` and
/// `eth_estimateGas`.
fn call_object(tx: &TxRequest) -> serde_json::Value {
    let mut call = serde_json::json!({
        "from": tx.from.to_string(),
        "to": tx.to.to_string(),
        "data": hex::encode_prefixed(&tx.data),
    });
    if let Some(gas) = tx.gas {
        call["gas"] = serde_json::Value::String(format!("{gas:#x}"));
    }
    call
}

#[async_trait]
impl Ledger for EvmRpcClient {
    async fn send_transaction(&self, tx: &TxRequest) -> Result<B256, LedgerError> {
        match &self.wallet {
            Some(wallet) => self.send_signed(wallet, tx).await,
            None => self.request_required("eth_sendTransaction", [call_object(tx)]).await,
        }
    }

    async fn receipt(&self, tx_hash: B256) -> Result<Option<TxReceipt>, LedgerError> {
        let receipt: Option<RpcReceipt> = self
            .request("eth_getTransactionReceipt", [tx_hash.to_string()])
            .await?;
        receipt.map(TxReceipt::try_from).transpose()
    }

    async fn block_number(&self) -> Result<u64, LedgerError> {
        self.quantity("eth_blockNumber", serde_json::json!([])).await
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, LedgerError> {
        let call = serde_json::json!({
            "to": to.to_string(),
            "data": hex::encode_prefixed(&data),
        });
        self.request_required("eth_call", serde_json::json!([call, "latest"]))
            .await
    }

    async fn logs(&self, filter: &LogFilter) -> Result<Vec<LogEntry>, LedgerError> {
        let params = serde_json::json!([{
            "address": filter.address.to_string(),
            "topics": [filter.topic0.to_string()],
            "fromBlock": format!("{:#x}", filter.from_block),
            "toBlock": format!("{:#x}", filter.to_block),
        }]);
        let logs: Vec<RpcLog> = self.request_required("eth_getLogs", params).await?;
        logs.into_iter().map(LogEntry::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::KeySource;

    #[test]
    fn parses_hex_quantities() {
        assert_eq!(parse_quantity("0x0").unwrap(), 0);
        assert_eq!(parse_quantity("0x1b4").unwrap(), 436);
        assert!(parse_quantity("436").is_err());
    }

    #[test]
    fn decodes_receipt_with_logs() {
        let json = serde_json::json!({
            "transactionHash": "0x00000000000000000000000000000000000000000000000000000000000000aa",
            "blockNumber": "0x10",
            "status": "0x1",
            "logs": [{
                "address": "0x01be23585060835e02b77ef475b0cc51aa1e0709",
                "topics": ["0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"],
                "data": "0x",
                "blockNumber": "0x10"
            }]
        });
        let raw: RpcReceipt = serde_json::from_value(json).unwrap();
        let receipt = TxReceipt::try_from(raw).unwrap();

        assert_eq!(receipt.block_number, 16);
        assert!(receipt.success);
        assert_eq!(receipt.logs.len(), 1);
        assert_eq!(receipt.logs[0].block_number, Some(16));
    }

    #[test]
    fn failed_status_marks_receipt_unsuccessful() {
        let json = serde_json::json!({
            "transactionHash": "0x00000000000000000000000000000000000000000000000000000000000000aa",
            "blockNumber": "0x10",
            "status": "0x0",
            "logs": []
        });
        let raw: RpcReceipt = serde_json::from_value(json).unwrap();
        assert!(!TxReceipt::try_from(raw).unwrap().success);
    }

    #[test]
    fn call_object_includes_gas_only_when_set() {
        let mut tx = TxRequest {
            from: Address::repeat_byte(0xaa),
            to: Address::repeat_byte(0xbb),
            data: Bytes::from_static(&[0xef, 0xc8, 0x1a, 0x8c]),
            gas: None,
        };
        let call = call_object(&tx);
        assert_eq!(call["data"], "0xefc81a8c");
        assert!(call.get("gas").is_none());

        tx.gas = Some(300_000);
        assert_eq!(call_object(&tx)["gas"], "0x493e0");
    }

    #[tokio::test]
    async fn wallet_refuses_foreign_sender() {
        let wallet = Wallet::from_source(
            &KeySource::PrivateKey(
                "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80".into(),
            ),
            31337,
        )
        .unwrap();
        // Rejected before any request goes out.
        let client = EvmRpcClient::new("http://127.0.0.1:9").unwrap().with_wallet(wallet);
        let tx = TxRequest {
            from: Address::repeat_byte(0xaa),
            to: Address::repeat_byte(0xbb),
            data: Bytes::new(),
            gas: Some(21_000),
        };

        let err = client.send_transaction(&tx).await.unwrap_err();
        assert!(matches!(err, LedgerError::Signer(_)));
    }

    #[test]
    fn error_object_is_surfaced() {
        let json = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": { "code": -32000, "message": "insufficient funds" }
        });
        let resp: JsonRpcResponse<String> = serde_json::from_value(json).unwrap();
        assert!(resp.result.is_none());
        assert_eq!(resp.error.unwrap().code, -32000);
    }
}
