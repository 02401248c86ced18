//! Download of the raw punctuality export.

mod basic;
mod client;

pub use basic::BasicClient;
pub use client::HttpClient;

use anyhow::{Context, Result};
use std::path::Path;
use tracing::info;

pub async fn fetch_bytes<C: HttpClient>(client: &C, url: &str) -> Result<Vec<u8>> {
    let req = reqwest::Request::new(reqwest::Method::GET, url.parse()?);

    let resp = client.execute(req).await?.error_for_status()?;
    Ok(resp.bytes().await?.to_vec())
}

/// Downloads `url` to `path`, creating parent directories.
///
/// The body goes to a sibling `.part` file first and is renamed into place.
///
/// # Errors
///
/// Returns an error if the request fails, the server answers with a non
/// success status, or the file cannot be written.
#[tracing::instrument(skip(client, path), fields(path = %path.display()))]
pub async fn download_to<C: HttpClient>(client: &C, url: &str, path: &Path) -> Result<u64> {
    let bytes = fetch_bytes(client, url).await?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
    }

    let partial = path.with_extension("part");
    std::fs::write(&partial, &bytes).with_context(|| format!("writing {}", partial.display()))?;
    std::fs::rename(&partial, path).with_context(|| format!("moving into {}", path.display()))?;

    info!(bytes = bytes.len(), "Download complete");
    Ok(bytes.len() as u64)
}
