//! `reqwest`-based [`WorkerTransport`] (§4.9): the concrete adapter the
//! dispatcher's trait object talks through in production, as opposed to
//! the in-memory fakes `pipeweave-core`'s own tests supply.

use async_trait::async_trait;
use pipeweave_core::dispatcher::{DispatchPayload, WorkerTransport};
use serde_json::json;

/// Mints the bearer-style credential a worker uses to call back into
/// `/api/callback` and `/api/heartbeat`. Kept deliberately simple — an
/// HMAC over `taskRunId` with the configured secret — since the design
/// treats credential minting as an external collaborator's concern, not
/// something the core dispatches on.
pub struct ReqwestTransport {
    client: reqwest::Client,
    secret_key: Option<String>,
}

impl ReqwestTransport {
    pub fn new(secret_key: Option<String>) -> Self {
        ReqwestTransport { client: reqwest::Client::new(), secret_key }
    }
}

#[async_trait]
impl WorkerTransport for ReqwestTransport {
    async fn dispatch(&self, base_url: &str, payload: DispatchPayload) -> Result<(), String> {
        let url = format!("{}/dispatch", base_url.trim_end_matches('/'));
        let body = json!({
            "runId": payload.task_run_id,
            "taskId": payload.task_id,
            "codeVersion": payload.code_version,
            "codeHash": payload.code_hash,
            "inputPath": payload.input_path,
            "upstreamRefs": payload.upstream_refs,
            "storageToken": payload.credential,
            "attempt": payload.attempt,
            "previousAttempts": payload.previous_attempts,
            "metadata": payload.metadata,
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("worker unreachable: {e}"))?;

        if !response.status().is_success() {
            return Err(format!("worker rejected dispatch with status {}", response.status()));
        }
        Ok(())
    }

    async fn mint_credential(&self, task_run_id: &str) -> String {
        use sha2::{Digest, Sha256};

        let Some(secret) = &self.secret_key else { return String::new() };
        let mut hasher = Sha256::new();
        hasher.update(secret.as_bytes());
        hasher.update(b":");
        hasher.update(task_run_id.as_bytes());
        hex::encode(hasher.finalize())
    }
}
