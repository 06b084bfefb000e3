//! HTTP client for a remote peer or service.
//!
//! [`RemoteClient`] is stateless: every call names the endpoint it targets,
//! so switching the active endpoint needs no client-side bookkeeping.

use crate::protocol::{
    CreatedResponse, ErrorResponse, ListQuery, ListResponse, PingResponse, ServerInfo, MAX_LIMIT,
};
use reqwest::{RequestBuilder, Response, StatusCode};
use std::time::Duration;
use tether_engine::{RemoteEndpoint, RemoteId, RemoteRecord};

/// Timeout applied to entity requests.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound on pages fetched for one collection.
const MAX_PAGES: usize = 1000;

/// Errors from remote calls.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Remote returned {status}: {message}")]
    Status { status: StatusCode, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl RemoteError {
    /// Whether the remote could not be reached at all.
    pub fn is_unreachable(&self) -> bool {
        match self {
            RemoteError::Transport(e) => e.is_connect() || e.is_timeout(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, RemoteError>;

/// Build an HTTP client for LAN peers.
///
/// System proxies are ignored since peers live on the local network.
pub fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .no_proxy()
        .build()
        .unwrap_or_default()
}

/// Stateless facade over the remote entity API.
#[derive(Debug, Clone)]
pub struct RemoteClient {
    http: reqwest::Client,
}

impl Default for RemoteClient {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteClient {
    pub fn new() -> Self {
        Self::with_client(http_client(REQUEST_TIMEOUT))
    }

    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// `GET /api/ping` with an explicit timeout.
    pub async fn ping(&self, base_url: &str, timeout: Duration) -> Result<PingResponse> {
        let response = self
            .http
            .get(format!("{base_url}/api/ping"))
            .timeout(timeout)
            .send()
            .await?;
        let ping: PingResponse = check(response).await?.json().await?;
        if !ping.is_ok() {
            return Err(RemoteError::InvalidResponse(format!(
                "ping status {}",
                ping.status
            )));
        }
        Ok(ping)
    }

    /// `GET /api/server-info`, used to pair with a discovered server.
    pub async fn server_info(&self, base_url: &str) -> Result<ServerInfo> {
        let response = self
            .http
            .get(format!("{base_url}/api/server-info"))
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    /// Fetch a whole collection, page by page.
    pub async fn fetch_all(
        &self,
        endpoint: &RemoteEndpoint,
        entity: &str,
    ) -> Result<Vec<RemoteRecord>> {
        let mut records = Vec::new();

        for _ in 0..MAX_PAGES {
            let query = ListQuery::page(records.len(), MAX_LIMIT);
            let request = self
                .http
                .get(endpoint.url(&format!("/api/{entity}")))
                .query(&query);
            let page: ListResponse = check(authorized(request, endpoint).send().await?)
                .await?
                .json()
                .await?;

            let received = page.items.len();
            records.extend(page.items);
            if !page.has_more || received == 0 {
                return Ok(records);
            }
        }

        Err(RemoteError::InvalidResponse(format!(
            "{entity} exceeded {MAX_PAGES} pages"
        )))
    }

    /// Create a record remotely and return the id the remote assigned.
    pub async fn create(
        &self,
        endpoint: &RemoteEndpoint,
        entity: &str,
        payload: &serde_json::Value,
    ) -> Result<RemoteId> {
        let request = self
            .http
            .post(endpoint.url(&format!("/api/{entity}")))
            .json(payload);
        let created: CreatedResponse = check(authorized(request, endpoint).send().await?)
            .await?
            .json()
            .await?;
        Ok(created.id)
    }

    /// Replace the remote copy of a record.
    pub async fn update(
        &self,
        endpoint: &RemoteEndpoint,
        entity: &str,
        remote_id: &str,
        payload: &serde_json::Value,
    ) -> Result<()> {
        let request = self
            .http
            .put(endpoint.url(&format!("/api/{entity}/{remote_id}")))
            .json(payload);
        check(authorized(request, endpoint).send().await?).await?;
        Ok(())
    }

    /// Delete a record remotely. A record already gone counts as deleted.
    pub async fn delete(
        &self,
        endpoint: &RemoteEndpoint,
        entity: &str,
        remote_id: &str,
    ) -> Result<()> {
        let request = self
            .http
            .delete(endpoint.url(&format!("/api/{entity}/{remote_id}")));
        let response = authorized(request, endpoint).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        check(response).await?;
        Ok(())
    }
}

fn authorized(request: RequestBuilder, endpoint: &RemoteEndpoint) -> RequestBuilder {
    match &endpoint.token {
        Some(token) => request.bearer_auth(token),
        None => request,
    }
}

/// Turn a non-success status into [`RemoteError::Status`].
async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorResponse>(&body)
        .map(|e| e.error)
        .unwrap_or(body);
    Err(RemoteError::Status { status, message })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn closed_port_is_unreachable() {
        let client = RemoteClient::new();
        let err = client
            .server_info("http://127.0.0.1:9")
            .await
            .unwrap_err();

        assert!(err.is_unreachable());
    }

    #[test]
    fn rejection_is_not_unreachable() {
        let err = RemoteError::Status {
            status: StatusCode::UNAUTHORIZED,
            message: "Unauthorized".into(),
        };
        assert!(!err.is_unreachable());
        assert!(!RemoteError::InvalidResponse("bad".into()).is_unreachable());
    }
}
