//! Storage connection string parsing
//!
//! Accepts the two SAS-based connection string shapes:
//!
//! ```text
//! BlobEndpoint=https://acct.blob.core.windows.net/;SharedAccessSignature=sv=...
//! DefaultEndpointsProtocol=https;AccountName=acct;EndpointSuffix=core.windows.net;SharedAccessSignature=sv=...
//! ```
//!
//! Account keys are not supported; a string carrying only `AccountKey` is
//! rejected so the engine never has to sign requests itself. When only a
//! `BlobEndpoint` is given the account name is taken from the endpoint host
//! (`acct.blob...`) or, for emulator-style endpoints, its first path segment.

use std::collections::HashMap;
use std::fmt;

use url::Url;

use crate::errors::{ConfigError, ConfigResult};

/// Parsed storage connection details
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionString {
    /// Storage account name
    pub account: String,
    /// Blob service endpoint (always ends with '/')
    pub blob_endpoint: Url,
    /// Shared access signature query, without a leading '?'
    pub sas: String,
}

impl fmt::Debug for ConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionString")
            .field("account", &self.account)
            .field("blob_endpoint", &self.blob_endpoint.as_str())
            .field("sas", &"***")
            .finish()
    }
}

impl ConnectionString {
    /// Parse a `Key=Value;Key=Value` connection string
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidConnectionString` when no endpoint can be
    /// derived, the endpoint is not a URL, or no shared access signature is
    /// present.
    pub fn parse(raw: &str) -> ConfigResult<Self> {
        let pairs = split_pairs(raw)?;

        let sas = pairs
            .get("sharedaccesssignature")
            .map(|s| s.trim_start_matches('?').to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                let reason = if pairs.contains_key("accountkey") {
                    "account key authentication is not supported, use a SharedAccessSignature"
                } else {
                    "SharedAccessSignature is required"
                };
                invalid(reason)
            })?;

        let endpoint = match pairs.get("blobendpoint") {
            Some(endpoint) => endpoint.clone(),
            None => {
                let account = pairs
                    .get("accountname")
                    .ok_or_else(|| invalid("either BlobEndpoint or AccountName is required"))?;
                let protocol = pairs
                    .get("defaultendpointsprotocol")
                    .map(String::as_str)
                    .unwrap_or("https");
                let suffix = pairs
                    .get("endpointsuffix")
                    .map(String::as_str)
                    .unwrap_or("core.windows.net");
                format!("{protocol}://{account}.blob.{suffix}/")
            }
        };

        let mut blob_endpoint = Url::parse(&endpoint)
            .map_err(|e| invalid(&format!("invalid blob endpoint {endpoint}: {e}")))?;
        if !blob_endpoint.path().ends_with('/') {
            let path = format!("{}/", blob_endpoint.path());
            blob_endpoint.set_path(&path);
        }

        let account = match pairs.get("accountname") {
            Some(account) => account.clone(),
            None => account_from_endpoint(&blob_endpoint)
                .ok_or_else(|| invalid("cannot determine the account name from BlobEndpoint"))?,
        };

        Ok(Self {
            account,
            blob_endpoint,
            sas,
        })
    }

    /// Endpoint in the form the object store builder expects (no trailing '/')
    pub fn endpoint(&self) -> String {
        self.blob_endpoint.as_str().trim_end_matches('/').to_string()
    }

    /// Whether requests go over plain HTTP (storage emulators)
    pub fn is_http(&self) -> bool {
        self.blob_endpoint.scheme() == "http"
    }

    /// URL of a container under this endpoint, without the signature
    pub fn container_url(&self, container: &str) -> ConfigResult<Url> {
        if container.is_empty() || container.contains('/') {
            return Err(invalid(&format!("invalid container name '{container}'")));
        }
        let mut url = self.blob_endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| invalid("blob endpoint cannot be a base URL"))?
            .pop_if_empty()
            .push(container);
        Ok(url)
    }
}

fn account_from_endpoint(endpoint: &Url) -> Option<String> {
    let host = endpoint.host_str()?;
    if let Some((account, _)) = host.split_once(".blob.") {
        return Some(account.to_string());
    }
    endpoint
        .path_segments()?
        .find(|segment| !segment.is_empty())
        .map(str::to_string)
}

fn split_pairs(raw: &str) -> ConfigResult<HashMap<String, String>> {
    let mut pairs = HashMap::new();
    for part in raw.split(';').map(str::trim).filter(|p| !p.is_empty()) {
        // Signatures contain '=' so only the first one separates key and value
        let (key, value) = part
            .split_once('=')
            .ok_or_else(|| invalid(&format!("segment '{}' is not Key=Value", redact_segment(part))))?;
        pairs.insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
    }
    if pairs.is_empty() {
        return Err(invalid("connection string is empty"));
    }
    Ok(pairs)
}

fn redact_segment(part: &str) -> &str {
    if part.len() > 24 {
        &part[..part.char_indices().nth(24).map(|(i, _)| i).unwrap_or(part.len())]
    } else {
        part
    }
}

fn invalid(reason: &str) -> ConfigError {
    ConfigError::InvalidConnectionString {
        reason: reason.to_string(),
    }
}
