//! HTTP plumbing shared by the providers.
use std::path::Path;
use std::time::Duration;

use reqwest::Response;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::core::cancel::CancelToken;
use crate::core::model::StagedFile;
use crate::error::{Error, Result};

pub const CONNECT_TIMEOUT_SECS: u64 = 30;
/// Longest silence tolerated between two reads of a response.
pub const READ_TIMEOUT_SECS: u64 = 120;

/// Client without a total request timeout, so large imagery bodies are
/// bounded by stalls rather than by their size.
pub fn client(read_timeout_secs: u64) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .read_timeout(Duration::from_secs(read_timeout_secs))
        .build()?)
}

/// Read a credential from the environment.
pub fn credential(var: &str) -> Result<String> {
    match std::env::var(var) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(Error::config(format!("{} not set", var))),
    }
}

/// Pass successful responses through; turn anything else into a provider
/// error carrying the status and body.
pub async fn check(provider: &'static str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let url = response.url().clone();
    let body = response.text().await.unwrap_or_default();
    Err(Error::Provider {
        provider,
        message: format!("{} {}: {}", status, url, body.trim()),
    })
}

/// Stream `response` into `path` chunk by chunk. The staged file owns the
/// path from the first byte, so a failed or cancelled transfer leaves nothing
/// behind.
pub async fn stage_response(
    record_id: &str,
    mut response: Response,
    path: &Path,
    cancel: &CancelToken,
) -> Result<StagedFile> {
    let staged = StagedFile::new(record_id, path);
    let mut file = tokio::fs::File::create(&staged.path).await?;
    let mut written: u64 = 0;
    loop {
        let chunk = tokio::select! {
            chunk = response.chunk() => chunk?,
            _ = cancel.cancelled() => return Err(Error::Cancelled),
        };
        let Some(chunk) = chunk else { break };
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    debug!("Staged {} ({} bytes) at {:?}", record_id, written, path);
    Ok(staged)
}

/// File name component safe for any platform.
pub fn sanitize(component: &str) -> String {
    component
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '-' | '_' => c,
            _ => '_',
        })
        .collect()
}
