//! Identity provider signing keys, indexed by key id.
//!
//! The set is populated once when the federated authenticator is built and
//! replaced wholesale only by an explicit [`KeySet::refresh`]. Requests only
//! ever read it.

use jsonwebtoken::DecodingKey;
use serde::Deserialize;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::services::error::AuthError;

#[derive(Debug, Deserialize)]
struct JwkDocument {
    #[serde(default)]
    keys: Vec<Jwk>,
}

#[derive(Debug, Deserialize)]
struct Jwk {
    #[serde(default)]
    kid: String,
    #[serde(default)]
    kty: String,
    n: Option<String>,
    e: Option<String>,
}

#[derive(Debug, Clone)]
enum KeySource {
    Inline(String),
    Url(String),
}

pub struct KeySet {
    source: KeySource,
    keys: RwLock<HashMap<String, DecodingKey>>,
}

impl KeySet {
    /// Parses a locally supplied key set document.
    pub fn from_json(document: &str) -> Result<Self, AuthError> {
        let keys = parse_keys(document)?;
        Ok(Self {
            source: KeySource::Inline(document.to_string()),
            keys: RwLock::new(keys),
        })
    }

    /// Fetches and parses the key set published at `url`.
    pub async fn from_url(client: &reqwest::Client, url: &str) -> Result<Self, AuthError> {
        let keys = fetch_keys(client, url).await?;
        Ok(Self {
            source: KeySource::Url(url.to_string()),
            keys: RwLock::new(keys),
        })
    }

    /// Re-reads the key set from its source and swaps it in. On failure the
    /// current keys stay in place.
    pub async fn refresh(&self, client: &reqwest::Client) -> Result<usize, AuthError> {
        let keys = match &self.source {
            KeySource::Inline(document) => parse_keys(document)?,
            KeySource::Url(url) => fetch_keys(client, url).await?,
        };
        let count = keys.len();
        *self.keys.write().await = keys;
        tracing::info!(keys = count, "Signing keys refreshed");
        Ok(count)
    }

    pub async fn decoding_key(&self, kid: &str) -> Option<DecodingKey> {
        self.keys.read().await.get(kid).cloned()
    }

    pub async fn len(&self) -> usize {
        self.keys.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.keys.read().await.is_empty()
    }
}

async fn fetch_keys(
    client: &reqwest::Client,
    url: &str,
) -> Result<HashMap<String, DecodingKey>, AuthError> {
    let response = client.get(url).send().await.map_err(|e| {
        tracing::error!(error = %e, url, "Failed to fetch signing keys");
        AuthError::ServiceUnavailable(format!("key set unreachable: {}", e))
    })?;

    if !response.status().is_success() {
        tracing::error!(status = %response.status(), url, "Key set endpoint returned an error");
        return Err(AuthError::ServiceUnavailable(format!(
            "key set endpoint returned {}",
            response.status()
        )));
    }

    let body = response
        .text()
        .await
        .map_err(|e| AuthError::ServiceUnavailable(format!("key set unreadable: {}", e)))?;
    parse_keys(&body)
}

fn parse_keys(document: &str) -> Result<HashMap<String, DecodingKey>, AuthError> {
    let parsed: JwkDocument = serde_json::from_str(document)
        .map_err(|e| AuthError::Internal(format!("invalid key set: {}", e)))?;

    let mut keys = HashMap::new();
    for jwk in parsed.keys {
        // Only RSA keys can verify RS256 signatures.
        if !jwk.kty.eq_ignore_ascii_case("RSA") || jwk.kid.is_empty() {
            continue;
        }
        let (Some(n), Some(e)) = (jwk.n.as_deref(), jwk.e.as_deref()) else {
            continue;
        };
        match DecodingKey::from_rsa_components(n, e) {
            Ok(key) => {
                keys.insert(jwk.kid, key);
            }
            Err(err) => {
                tracing::warn!(kid = %jwk.kid, error = %err, "Skipping malformed signing key");
            }
        }
    }

    if keys.is_empty() {
        return Err(AuthError::Internal("key set contains no usable keys".to_string()));
    }
    Ok(keys)
}
