//! JSON-RPC plumbing shared by the chain client.

use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

#[derive(Serialize)]
struct Request<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Vec<Value>,
}

#[derive(Deserialize)]
struct Response {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<ErrorObject>,
}

#[derive(Deserialize)]
struct ErrorObject {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

/// Create an HTTP client configured for JSON-RPC requests.
pub fn create_client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("Failed to create HTTP client")
}

/// Make a JSON-RPC call and deserialize the result.
///
/// An `error` member in the response (e.g. a revert detected while the node
/// estimates gas) is turned into an error carrying the node's message. A
/// `null` result deserializes into `T` as-is, so `Option<T>` can express
/// "not available yet".
pub async fn json_rpc_call<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    method: &str,
    params: Vec<Value>,
) -> anyhow::Result<T> {
    let request = Request {
        jsonrpc: "2.0",
        id: 1,
        method,
        params,
    };

    let response: Response = client
        .post(url)
        .json(&request)
        .send()
        .await
        .with_context(|| format!("Failed to send {method} request"))?
        .json()
        .await
        .with_context(|| format!("Failed to parse {method} response"))?;

    if let Some(error) = response.error {
        anyhow::bail!("RPC error on {method} ({}): {}", error.code, error.message);
    }

    serde_json::from_value(response.result.unwrap_or(Value::Null))
        .with_context(|| format!("Failed to deserialize {method} result"))
}
