use crate::error::{CoreError, Result};
use crate::ledger::LedgerInquiry;
use crate::types::{Drops, LedgerTransaction};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

pub const DEFAULT_RPC_URL: &str = "https://s1.ripple.com:51234/";

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: AccountTxResult,
}

#[derive(Debug, Deserialize)]
struct AccountTxResult {
    status: Option<String>,
    error: Option<String>,
    error_message: Option<String>,
    #[serde(default)]
    transactions: Vec<AccountTxEntry>,
}

// api_version 1 nests the body under `tx`, api_version 2 under `tx_json`
#[derive(Debug, Deserialize)]
struct AccountTxEntry {
    tx: Option<RawTx>,
    tx_json: Option<RawTx>,
    meta: Option<Value>,
    hash: Option<String>,
    #[serde(default)]
    validated: bool,
}

#[derive(Debug, Deserialize)]
struct RawTx {
    #[serde(rename = "TransactionType")]
    transaction_type: String,
    #[serde(rename = "Destination")]
    destination: Option<String>,
    #[serde(rename = "DestinationTag")]
    destination_tag: Option<u32>,
    #[serde(rename = "Amount")]
    amount: Option<Value>,
    #[serde(rename = "DeliverMax")]
    deliver_max: Option<Value>,
    hash: Option<String>,
}

fn native_amount(value: &Value) -> Option<Drops> {
    value.as_str().and_then(|s| s.parse().ok())
}

impl AccountTxEntry {
    fn into_transaction(self) -> Option<LedgerTransaction> {
        let tx = self.tx.or(self.tx_json)?;

        let succeeded = self
            .meta
            .as_ref()
            .and_then(|m| m.get("TransactionResult"))
            .and_then(Value::as_str)
            == Some("tesSUCCESS");

        let delivered = self.meta.as_ref().and_then(|m| m.get("delivered_amount"));
        let amount = match delivered {
            Some(Value::String(s)) if s.as_str() != "unavailable" => s.parse().ok(),
            Some(Value::Object(_)) => None,
            _ => tx
                .amount
                .as_ref()
                .or(tx.deliver_max.as_ref())
                .and_then(native_amount),
        };

        Some(LedgerTransaction {
            hash: self.hash.or(tx.hash),
            tx_type: tx.transaction_type,
            destination: tx.destination,
            destination_tag: tx.destination_tag,
            amount,
            validated: self.validated,
            succeeded,
        })
    }
}

/// Decodes an `account_tx` JSON-RPC response body.
pub fn parse_account_tx(body: Value) -> Result<Vec<LedgerTransaction>> {
    let response: RpcResponse = serde_json::from_value(body)?;
    let result = response.result;

    if result.status.as_deref() == Some("error") || result.error.is_some() {
        return Err(CoreError::ledger(format!(
            "account_tx failed: {} ({})",
            result.error.unwrap_or_else(|| "unknown".to_string()),
            result.error_message.unwrap_or_default()
        )));
    }

    Ok(result
        .transactions
        .into_iter()
        .filter_map(AccountTxEntry::into_transaction)
        .collect())
}

/// JSON-RPC client for a rippled node.
pub struct XrplClient {
    http: reqwest::Client,
    url: String,
}

impl XrplClient {
    pub fn new(url: &str) -> Result<Self> {
        if url.is_empty() {
            return Err(CoreError::config("Ledger RPC URL cannot be empty"));
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| CoreError::config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            url: url.to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl LedgerInquiry for XrplClient {
    async fn account_transactions(
        &self,
        account: &str,
        limit: u32,
    ) -> Result<Vec<LedgerTransaction>> {
        let request = json!({
            "method": "account_tx",
            "params": [{
                "account": account,
                "limit": limit,
                "forward": false,
            }]
        });

        let body: Value = self
            .http
            .post(&self.url)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        parse_account_tx(body)
    }
}
