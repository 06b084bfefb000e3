//! Configured remote endpoints.
//!
//! A device knows an ordered list of remotes, at most one of which is active.
//! Every mutation goes through [`EndpointSet`] so the exclusivity invariant
//! holds after each call.

use crate::{error::Result, EndpointId, Error};
use serde::{Deserialize, Serialize};

/// A peer or service a device can synchronize with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteEndpoint {
    pub id: EndpointId,
    /// Name shown to the user
    pub display_name: String,
    /// `http(s)://host:port`, without trailing slash
    pub base_url: String,
    /// Bearer token presented on entity routes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default)]
    pub is_active: bool,
}

impl RemoteEndpoint {
    /// Create an inactive endpoint, validating and normalizing its URL.
    pub fn new(
        id: impl Into<EndpointId>,
        display_name: impl Into<String>,
        base_url: &str,
    ) -> Result<Self> {
        Ok(Self {
            id: id.into(),
            display_name: display_name.into(),
            base_url: normalize_url(base_url)?,
            token: None,
            is_active: false,
        })
    }

    /// Builder-style method to set the bearer token.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Builder-style method to mark the endpoint active.
    pub fn active(mut self) -> Self {
        self.is_active = true;
        self
    }

    /// Full URL of an API path such as `/api/ping`.
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Trim whitespace and trailing slashes; require an http(s) scheme and host.
pub fn normalize_url(url: &str) -> Result<String> {
    let url = url.trim().trim_end_matches('/');
    let host = url
        .strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"))
        .ok_or_else(|| Error::InvalidEndpointUrl(url.to_string()))?;

    if host.is_empty() || host.contains(char::is_whitespace) {
        return Err(Error::InvalidEndpointUrl(url.to_string()));
    }
    Ok(url.to_string())
}

/// The ordered list of configured endpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<RemoteEndpoint>", into = "Vec<RemoteEndpoint>")]
pub struct EndpointSet {
    endpoints: Vec<RemoteEndpoint>,
}

impl EndpointSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from a loaded list. When several entries claim to be
    /// active only the first keeps the flag.
    pub fn from_vec(endpoints: Vec<RemoteEndpoint>) -> Self {
        let mut seen_active = false;
        let endpoints = endpoints
            .into_iter()
            .map(|mut endpoint| {
                if endpoint.is_active {
                    endpoint.is_active = !seen_active;
                    seen_active = true;
                }
                endpoint
            })
            .collect();
        Self { endpoints }
    }

    pub fn into_vec(self) -> Vec<RemoteEndpoint> {
        self.endpoints
    }

    pub fn iter(&self) -> impl Iterator<Item = &RemoteEndpoint> {
        self.endpoints.iter()
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&RemoteEndpoint> {
        self.endpoints.iter().find(|e| e.id == id)
    }

    /// The endpoint sync operations target, if any.
    pub fn active(&self) -> Option<&RemoteEndpoint> {
        self.endpoints.iter().find(|e| e.is_active)
    }

    /// Append an endpoint. An active endpoint deactivates all others.
    pub fn add(&mut self, endpoint: RemoteEndpoint) -> Result<()> {
        if self.get(&endpoint.id).is_some() {
            return Err(Error::InvalidEndpointUrl(format!(
                "duplicate endpoint id {}",
                endpoint.id
            )));
        }
        let endpoint = RemoteEndpoint {
            base_url: normalize_url(&endpoint.base_url)?,
            ..endpoint
        };
        if endpoint.is_active {
            self.deactivate_all();
        }
        self.endpoints.push(endpoint);
        Ok(())
    }

    /// Replace an endpoint in place, keeping its position.
    pub fn update(&mut self, endpoint: RemoteEndpoint) -> Result<()> {
        let base_url = normalize_url(&endpoint.base_url)?;
        let index = self
            .position(&endpoint.id)
            .ok_or_else(|| Error::EndpointNotFound(endpoint.id.clone()))?;

        if endpoint.is_active {
            self.deactivate_all();
        }
        self.endpoints[index] = RemoteEndpoint {
            base_url,
            ..endpoint
        };
        Ok(())
    }

    /// Remove an endpoint. Removing the active one leaves none active.
    pub fn remove(&mut self, id: &str) -> Result<RemoteEndpoint> {
        let index = self
            .position(id)
            .ok_or_else(|| Error::EndpointNotFound(id.to_string()))?;
        Ok(self.endpoints.remove(index))
    }

    /// Make `id` the only active endpoint.
    pub fn activate(&mut self, id: &str) -> Result<()> {
        let index = self
            .position(id)
            .ok_or_else(|| Error::EndpointNotFound(id.to_string()))?;
        self.deactivate_all();
        self.endpoints[index].is_active = true;
        Ok(())
    }

    pub fn deactivate_all(&mut self) {
        for endpoint in &mut self.endpoints {
            endpoint.is_active = false;
        }
    }

    /// Fold a legacy single-URL setting into the list.
    ///
    /// The URL becomes an active endpoint named `legacy_id` unless an entry
    /// with that id or the same URL already exists. Returns whether the set
    /// changed.
    pub fn migrate_legacy(&mut self, url: &str, legacy_id: &str) -> Result<bool> {
        let url = normalize_url(url)?;
        if self.get(legacy_id).is_some() || self.endpoints.iter().any(|e| e.base_url == url) {
            return Ok(false);
        }

        let activate = self.active().is_none();
        let mut endpoint = RemoteEndpoint::new(legacy_id, "Server", &url)?;
        endpoint.is_active = activate;
        self.endpoints.push(endpoint);
        Ok(true)
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.endpoints.iter().position(|e| e.id == id)
    }
}

impl From<Vec<RemoteEndpoint>> for EndpointSet {
    fn from(endpoints: Vec<RemoteEndpoint>) -> Self {
        Self::from_vec(endpoints)
    }
}

impl From<EndpointSet> for Vec<RemoteEndpoint> {
    fn from(set: EndpointSet) -> Self {
        set.into_vec()
    }
}
