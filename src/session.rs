//! Mojang session-service authentication (`Join`/`HasJoined`) and offline UUID derivation (§4.4).
//!
//! `HasJoined` is what a server checks to confirm a client really authenticated with Mojang;
//! `Join` is the client-side call that performs that authentication before connecting. The
//! client-side call supports an opt-in retry after a forced credential refresh, for callers that
//! hold a refreshable token.

use crate::crypto::minecraft_hash;
use async_trait::async_trait;
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use tracing::instrument;
use uuid::Uuid;

/// The internal error type for session-service failures.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("session service request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("failed to verify username")]
    NotJoined,

    #[error("join was rejected by the session service")]
    JoinRejected,
}

static HTTP_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .build()
        .expect("failed to create http client")
});

/// A Minecraft account profile, as returned by Mojang's `hasJoined` endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub properties: Vec<ProfileProperty>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProfileProperty {
    pub name: String,
    pub value: String,
    pub signature: Option<String>,
}

/// The server-side half of the session-service contract (§4.4/§6): confirms that a connecting
/// client actually authenticated with Mojang for the given digest.
#[async_trait]
pub trait HasJoined: Send + Sync {
    async fn has_joined(
        &self,
        username: &str,
        digest: &str,
        client_ip: Option<&str>,
    ) -> Result<Profile, Error>;
}

/// The client-side half of the session-service contract (§4.4): asserts our ownership of an
/// access token against the given digest before connecting to an online-mode server.
#[async_trait]
pub trait Join: Send + Sync {
    async fn join(&self, access_token: &str, selected_profile: Uuid, digest: &str)
    -> Result<(), Error>;
}

/// Computes the session digest for a `(server_id, shared_secret, public_key)` triple and asks
/// Mojang's `hasJoined`/`join` endpoints, via [`minecraft_hash`].
#[must_use]
pub fn session_digest(server_id: &str, shared_secret: &[u8], encoded_public: &[u8]) -> String {
    minecraft_hash(server_id, shared_secret, encoded_public)
}

/// The default Mojang-backed [`HasJoined`]/[`Join`] implementation.
#[derive(Default)]
pub struct MojangSessionService {
    /// When set, a transient `join` failure triggers exactly one token refresh and retry before
    /// giving up. Disabled by default (§4.4/§9's Open Question decision).
    refresh_on_failure: Option<Box<dyn Fn() -> String + Send + Sync>>,
}

impl MojangSessionService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opts into a single refresh-then-retry after a transient `Join` failure. `refresh` is
    /// called to obtain a fresh access token for the retry.
    pub fn with_refresh_on_failure(refresh: impl Fn() -> String + Send + Sync + 'static) -> Self {
        Self {
            refresh_on_failure: Some(Box::new(refresh)),
        }
    }
}

#[async_trait]
impl HasJoined for MojangSessionService {
    #[instrument(skip(self))]
    async fn has_joined(
        &self,
        username: &str,
        digest: &str,
        client_ip: Option<&str>,
    ) -> Result<Profile, Error> {
        let mut url = format!(
            "https://sessionserver.mojang.com/session/minecraft/hasJoined?username={username}&serverId={digest}"
        );
        if let Some(ip) = client_ip {
            url.push_str("&ip=");
            url.push_str(ip);
        }

        let response = HTTP_CLIENT.get(&url).send().await?;
        if response.status() == reqwest::StatusCode::NO_CONTENT {
            return Err(Error::NotJoined);
        }
        Ok(response.error_for_status()?.json().await?)
    }
}

#[async_trait]
impl Join for MojangSessionService {
    #[instrument(skip(self, access_token))]
    async fn join(
        &self,
        access_token: &str,
        selected_profile: Uuid,
        digest: &str,
    ) -> Result<(), Error> {
        let body = serde_json::json!({
            "accessToken": access_token,
            "selectedProfile": selected_profile,
            "serverId": digest,
        });

        let attempt = HTTP_CLIENT
            .post("https://sessionserver.mojang.com/session/minecraft/join")
            .json(&body)
            .send()
            .await?;

        if attempt.status() == reqwest::StatusCode::NO_CONTENT {
            return Ok(());
        }

        let Some(refresh) = &self.refresh_on_failure else {
            return Err(Error::JoinRejected);
        };

        let refreshed_token = refresh();
        let retry_body = serde_json::json!({
            "accessToken": refreshed_token,
            "selectedProfile": selected_profile,
            "serverId": digest,
        });
        let retry = HTTP_CLIENT
            .post("https://sessionserver.mojang.com/session/minecraft/join")
            .json(&retry_body)
            .send()
            .await?;

        if retry.status() == reqwest::StatusCode::NO_CONTENT {
            Ok(())
        } else {
            Err(Error::JoinRejected)
        }
    }
}

/// Synthesises an offline-mode UUID as `md5("OfflinePlayer:" + name)` with the version nibble
/// forced to 3 (RFC 4122 §4.1.3) and the variant nibble forced to the RFC 4122 form.
///
/// This is deliberately *not* `Uuid::new_v3` (a real namespace-UUID derivation). Vanilla Minecraft
/// servers land on this exact non-standard byte pattern via a quirk in their namespace handling;
/// this function reproduces the resulting bytes directly from the raw MD5 digest instead of
/// imitating that quirk.
#[must_use]
pub fn offline_uuid(display_name: &str) -> Uuid {
    let mut hasher = Md5::new();
    hasher.update(b"OfflinePlayer:");
    hasher.update(display_name.as_bytes());
    let mut bytes: [u8; 16] = hasher.finalize().into();

    bytes[6] = (bytes[6] & 0x0f) | 0x30; // version 3
    bytes[8] = (bytes[8] & 0x3f) | 0x80; // RFC 4122 variant

    Uuid::from_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offline_uuid_of_notch() {
        assert_eq!(
            offline_uuid("Notch"),
            Uuid::parse_str("b50ad385-829d-3141-a216-7e7d7539ba7f").unwrap()
        );
    }
}
