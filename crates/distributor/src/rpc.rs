//! JSON-RPC over HTTP implementation of [ChainClient].

use crate::abi::parse_hex_bytes;
use crate::client::{parse_hex_u64, BlockHeader, ChainClient, RawLog, TxRequest};
use crate::config::{format_address, RpcConfig};
use crate::error::KeeperError;
use crate::signer::{LegacyTx, Signer};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::{sleep, Instant};

pub struct HttpChainClient {
    http: reqwest::Client,
    url: String,
    chain_id: u64,
    /// Signs locally when set; otherwise the node signs via `eth_sendTransaction`.
    signer: Option<Signer>,
    receipt_timeout: Duration,
    receipt_poll_interval: Duration,
    next_id: AtomicU64,
}

impl HttpChainClient {
    pub fn new(config: &RpcConfig, signer: Option<Signer>) -> Result<Self, KeeperError> {
        let http = reqwest::Client::builder()
            .no_proxy()
            .build()
            .map_err(|e| KeeperError::Config(e.to_string()))?;
        Ok(Self {
            http,
            url: config.http_url.clone(),
            chain_id: config.chain_id,
            signer,
            receipt_timeout: config.receipt_timeout(),
            receipt_poll_interval: config.receipt_poll_interval(),
            next_id: AtomicU64::new(1),
        })
    }

    /// Address transactions are sent from, if a key is configured.
    pub fn signer_address(&self) -> Option<[u8; 20]> {
        self.signer.as_ref().map(Signer::address)
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, KeeperError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
            "method": method,
            "params": params
        });
        let resp = self.http.post(&self.url).json(&body).send().await?;
        // A JSON-RPC error body takes precedence over a 4xx/5xx status.
        let status_err = resp.error_for_status_ref().err();
        let json = match (resp.json::<Value>().await, status_err) {
            (Ok(json), _) if json.get("error").is_some() => json,
            (_, Some(e)) => return Err(e.into()),
            (Ok(json), None) => json,
            (Err(e), None) => return Err(e.into()),
        };
        if let Some(err) = json.get("error") {
            let msg = err
                .get("message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| err.to_string());
            return Err(KeeperError::Rpc(format!("{method}: {msg}")));
        }
        json.get("result")
            .cloned()
            .ok_or_else(|| KeeperError::InvalidResponse(format!("{method}: missing result")))
    }

    async fn quantity(&self, method: &str, params: Value) -> Result<u64, KeeperError> {
        let result = self.request(method, params).await?;
        let s = result.as_str().ok_or_else(|| {
            KeeperError::InvalidResponse(format!("{method}: quantity not a string"))
        })?;
        parse_hex_u64(s).map_err(KeeperError::InvalidResponse)
    }

    async fn submit(&self, tx: &TxRequest) -> Result<String, KeeperError> {
        let result = match &self.signer {
            Some(signer) => {
                if signer.address() != tx.from {
                    return Err(KeeperError::Submission(format!(
                        "sender {} does not match keeper key {}",
                        format_address(&tx.from),
                        format_address(&signer.address())
                    )));
                }
                let nonce = self
                    .quantity(
                        "eth_getTransactionCount",
                        json!([format_address(&tx.from), "pending"]),
                    )
                    .await
                    .map_err(KeeperError::into_submission)?;
                let raw = signer.sign_legacy(
                    &LegacyTx {
                        nonce,
                        gas_price: tx.gas_price,
                        gas_limit: tx.gas_limit,
                        to: tx.to,
                        value: 0,
                        data: tx.data.clone(),
                    },
                    self.chain_id,
                )?;
                self.request("eth_sendRawTransaction", json!([format!("0x{}", hex::encode(raw))]))
                    .await
            }
            None => {
                self.request(
                    "eth_sendTransaction",
                    json!([{
                        "from": format_address(&tx.from),
                        "to": format_address(&tx.to),
                        "data": format!("0x{}", hex::encode(&tx.data)),
                        "value": "0x0",
                        "gas": format!("0x{:x}", tx.gas_limit),
                        "gasPrice": format!("0x{:x}", tx.gas_price),
                    }]),
                )
                .await
            }
        }
        .map_err(KeeperError::into_submission)?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| KeeperError::Submission("transaction hash not a string".into()))
    }

    async fn wait_for_receipt(&self, tx_hash: &str) -> Result<Value, KeeperError> {
        let deadline = Instant::now() + self.receipt_timeout;
        loop {
            let receipt = self
                .request("eth_getTransactionReceipt", json!([tx_hash]))
                .await
                .map_err(KeeperError::into_submission)?;
            if !receipt.is_null() {
                return Ok(receipt);
            }
            if Instant::now() >= deadline {
                return Err(KeeperError::Submission(format!(
                    "no receipt for {tx_hash} after {}ms",
                    self.receipt_timeout.as_millis()
                )));
            }
            sleep(self.receipt_poll_interval).await;
        }
    }
}

#[async_trait]
impl ChainClient for HttpChainClient {
    async fn block_number(&self) -> Result<u64, KeeperError> {
        self.quantity("eth_blockNumber", json!([])).await
    }

    async fn block(&self, number: u64) -> Result<BlockHeader, KeeperError> {
        let result = self
            .request("eth_getBlockByNumber", json!([format!("0x{:x}", number), false]))
            .await?;
        if result.is_null() {
            return Err(KeeperError::InvalidResponse(format!("block {number} not found")));
        }
        let timestamp = result
            .get("timestamp")
            .and_then(|t| t.as_str())
            .ok_or_else(|| KeeperError::InvalidResponse("block has no timestamp".into()))?;
        Ok(BlockHeader {
            number,
            timestamp: parse_hex_u64(timestamp).map_err(KeeperError::InvalidResponse)?,
        })
    }

    async fn call_view(&self, to: [u8; 20], calldata: Vec<u8>) -> Result<Vec<u8>, KeeperError> {
        let params = json!([{
            "to": format_address(&to),
            "data": format!("0x{}", hex::encode(calldata)),
        }, "latest"]);
        let result = self.request("eth_call", params).await?;
        let s = result
            .as_str()
            .ok_or_else(|| KeeperError::InvalidResponse("eth_call result not a string".into()))?;
        parse_hex_bytes(s).map_err(|e| KeeperError::InvalidResponse(e.to_string()))
    }

    async fn send_transaction(&self, tx: TxRequest) -> Result<String, KeeperError> {
        let tx_hash = self.submit(&tx).await?;
        tracing::info!(%tx_hash, "transaction submitted, waiting for receipt");
        let receipt = self.wait_for_receipt(&tx_hash).await?;
        match receipt.get("status").and_then(|s| s.as_str()) {
            Some("0x0") => Err(KeeperError::Submission(format!("transaction {tx_hash} reverted"))),
            _ => Ok(tx_hash),
        }
    }

    async fn get_logs(
        &self,
        address: [u8; 20],
        from: u64,
        to: u64,
    ) -> Result<Vec<RawLog>, KeeperError> {
        let filter = json!({
            "address": format_address(&address),
            "fromBlock": format!("0x{:x}", from),
            "toBlock": format!("0x{:x}", to),
        });
        let result = self.request("eth_getLogs", json!([filter])).await?;
        serde_json::from_value(result)
            .map_err(|e| KeeperError::InvalidResponse(format!("eth_getLogs: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signer_address_exposed() {
        let key = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
        let signer = Signer::from_hex(key).unwrap();
        let expected = signer.address();
        let client = HttpChainClient::new(&RpcConfig::default(), Some(signer)).unwrap();
        assert_eq!(client.signer_address(), Some(expected));
        let unsigned = HttpChainClient::new(&RpcConfig::default(), None).unwrap();
        assert_eq!(unsigned.signer_address(), None);
    }

    use crate::error::ErrorKind;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Local HTTP node answering every request with the same status and body.
    async fn canned_node(status: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut sock, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = Vec::new();
                    let mut chunk = [0u8; 4096];
                    while !request_complete(&buf) {
                        match sock.read(&mut chunk).await {
                            Ok(0) | Err(_) => break,
                            Ok(n) => buf.extend_from_slice(&chunk[..n]),
                        }
                    }
                    let resp = format!(
                        "HTTP/1.1 {status}\r\nContent-Type: application/json\r\n\
                         Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
                        body.len()
                    );
                    let _ = sock.write_all(resp.as_bytes()).await;
                    let _ = sock.shutdown().await;
                });
            }
        });
        format!("http://{addr}")
    }

    fn request_complete(buf: &[u8]) -> bool {
        let text = String::from_utf8_lossy(buf);
        let Some(end) = text.find("\r\n\r\n") else {
            return false;
        };
        let len = text[..end]
            .lines()
            .find_map(|line| {
                let (k, v) = line.split_once(':')?;
                k.eq_ignore_ascii_case("content-length")
                    .then(|| v.trim().parse::<usize>().ok())
                    .flatten()
            })
            .unwrap_or(0);
        buf.len() >= end + 4 + len
    }

    fn client_for(url: String) -> HttpChainClient {
        let config = RpcConfig {
            http_url: url,
            ..Default::default()
        };
        HttpChainClient::new(&config, None).unwrap()
    }

    fn distribute_tx() -> TxRequest {
        TxRequest {
            to: [0x5f; 20],
            from: [0xf3; 20],
            data: crate::abi::encode_call(crate::abi::DISTRIBUTE_REWARDS_SIG),
            gas_limit: 9_721_900,
            gas_price: 101_000_000_000,
        }
    }

    #[tokio::test]
    async fn error_body_on_server_error_keeps_revert_reason() {
        let url = canned_node(
            "500 Internal Server Error",
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":3,"message":"execution reverted: epoch not ready"}}"#,
        )
        .await;
        let err = client_for(url)
            .send_transaction(distribute_tx())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Submission);
        assert!(err.to_string().contains("execution reverted: epoch not ready"));
    }

    #[tokio::test]
    async fn error_body_on_success_status_is_an_rpc_error() {
        let url = canned_node(
            "200 OK",
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32000,"message":"header not found"}}"#,
        )
        .await;
        let err = client_for(url).block_number().await.unwrap_err();
        assert!(matches!(&err, KeeperError::Rpc(m) if m == "eth_blockNumber: header not found"));
    }

    #[tokio::test]
    async fn non_json_server_error_falls_back_to_status() {
        let url = canned_node("502 Bad Gateway", "upstream unavailable").await;
        let err = client_for(url).block_number().await.unwrap_err();
        assert!(matches!(err, KeeperError::Http(_)));
        assert_eq!(err.kind(), ErrorKind::TransientRead);
        assert!(err.to_string().contains("502"));
    }

    #[tokio::test]
    async fn unreachable_node_is_a_transient_read() {
        let config = RpcConfig {
            http_url: "http://127.0.0.1:1".into(),
            ..Default::default()
        };
        let client = HttpChainClient::new(&config, None).unwrap();
        let err = client.block_number().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransientRead);
    }
}
