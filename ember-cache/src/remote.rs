//! Optional remote cache tier: `put`/`get`/`has` over content-addressed
//! blobs, with a Bazel Remote Execution API v2 HTTP client as the shipped
//! implementation.

use ember_digest::Digest;
use reqwest::blocking::Client;
use reqwest::StatusCode;
use thiserror::Error;

/// Errors raised talking to a remote cache.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The HTTP request itself failed (connection, TLS, timeout, ...).
    #[error("remote cache request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The server responded with a non-success status.
    #[error("remote cache server error ({status}): {body}")]
    Server {
        /// HTTP status code returned.
        status: u16,
        /// Response body, truncated for readability.
        body: String,
    },

    /// The configured base URL was not `http://` or `https://`.
    #[error("invalid remote cache URL: {0}")]
    InvalidUrl(String),
}

/// Result type for remote cache operations.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// The capability set distributed execution needs from a remote cache,
/// deliberately narrow: this crate owns no transport or server-side logic,
/// only this client boundary (§4.4's "only a thin interface").
pub trait RemoteCache: Send + Sync {
    /// Upload a blob, keyed by its digest.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError`] on transport or server failure.
    fn put(&self, digest: Digest, bytes: &[u8]) -> RemoteResult<()>;

    /// Download a blob by digest. Returns `Ok(None)` if the remote does not
    /// have it — a cache miss is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError`] on transport or server failure.
    fn get(&self, digest: Digest) -> RemoteResult<Option<Vec<u8>>>;

    /// Check whether the remote has a blob, without downloading it.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError`] on transport or server failure.
    fn has(&self, digest: Digest) -> RemoteResult<bool>;
}

/// A [`RemoteCache`] backed by a Bazel Remote Execution API v2 HTTP server
/// (`PUT`/`GET`/`HEAD /cas/<hash>`), with digests hex-encoded at the wire
/// boundary.
pub struct BazelRemoteClient {
    base_url: String,
    client: Client,
}

impl BazelRemoteClient {
    /// Create a client against `base_url` (e.g. `http://cache.example.com:9090`).
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::InvalidUrl`] if `base_url` is not an `http(s)` URL.
    pub fn new(base_url: &str) -> RemoteResult<Self> {
        let base_url = base_url.trim_end_matches('/').to_string();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(RemoteError::InvalidUrl(base_url));
        }
        Ok(Self { base_url, client: Client::new() })
    }

    fn cas_url(&self, digest: Digest) -> String {
        format!("{}/cas/{}", self.base_url, digest.to_hex())
    }
}

impl RemoteCache for BazelRemoteClient {
    fn put(&self, digest: Digest, bytes: &[u8]) -> RemoteResult<()> {
        let response = self.client.put(self.cas_url(digest)).body(bytes.to_vec()).send()?;
        if !response.status().is_success() {
            return Err(server_error(response));
        }
        Ok(())
    }

    fn get(&self, digest: Digest) -> RemoteResult<Option<Vec<u8>>> {
        let response = self.client.get(self.cas_url(digest)).send()?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(server_error(response));
        }
        Ok(Some(response.bytes()?.to_vec()))
    }

    fn has(&self, digest: Digest) -> RemoteResult<bool> {
        let response = self.client.head(self.cas_url(digest)).send()?;
        Ok(response.status().is_success())
    }
}

fn server_error(response: reqwest::blocking::Response) -> RemoteError {
    let status = response.status().as_u16();
    let body = response.text().unwrap_or_default();
    RemoteError::Server { status, body }
}
