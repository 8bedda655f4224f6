//! # Media Call Tokens
//!
//! Once a call is accepted both parties join a real-time media channel, which
//! requires a short-lived token from the media provider. The provider is an
//! external service behind [`TokenIssuer`]; [`HmacTokenIssuer`] is the local
//! signer used when no provider is configured and in tests.
//!
//! [`CallTokenService`] caches one token per `(session, role)` for the token
//! TTL so that reconnecting clients get the same uid and channel.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{debug, warn};

use crate::config::{KeyConfig, QueueConfig, TokenConfig, VoiceDeskConfig};
use crate::error::{CallEngineError, Result};
use crate::session::SessionState;
use crate::store::KeyedStore;

type HmacSha256 = Hmac<Sha256>;

pub const ROLE_CUSTOMER: &str = "CUSTOMER";
pub const ROLE_CONSULTANT: &str = "CONSULTANT";

/// Token material handed to a client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToken {
    pub app_id: String,
    pub channel: String,
    pub uid: u32,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// External media token provider
#[async_trait]
pub trait TokenIssuer: Send + Sync + 'static {
    fn app_id(&self) -> &str;

    async fn create_token(&self, channel: &str, uid: u32, expires_at: DateTime<Utc>) -> Result<String>;
}

/// Claims carried by an [`HmacTokenIssuer`] token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenClaims {
    pub app_id: String,
    pub channel: String,
    pub uid: u32,
    /// Epoch seconds
    pub expires_at: i64,
}

/// Signs `app_id:channel:uid:expiry` with HMAC-SHA256.
///
/// Token form: `base64url(payload).base64url(signature)`.
pub struct HmacTokenIssuer {
    app_id: String,
    secret: Vec<u8>,
}

impl HmacTokenIssuer {
    pub fn new(app_id: impl Into<String>, secret: impl AsRef<[u8]>) -> Result<Self> {
        let secret = secret.as_ref().to_vec();
        if secret.is_empty() {
            return Err(CallEngineError::token("signing secret must not be empty"));
        }
        Ok(Self {
            app_id: app_id.into(),
            secret,
        })
    }

    pub fn from_config(config: &TokenConfig) -> Result<Self> {
        Self::new(config.app_id.clone(), config.signing_secret.as_bytes())
    }

    /// Check the signature and decode the claims. Expiry is not checked.
    pub fn verify(&self, token: &str) -> Result<TokenClaims> {
        let (payload_b64, sig_b64) = token
            .split_once('.')
            .ok_or_else(|| CallEngineError::token("malformed token"))?;
        let payload = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|e| CallEngineError::token(format!("bad payload encoding: {}", e)))?;
        let signature = URL_SAFE_NO_PAD
            .decode(sig_b64)
            .map_err(|e| CallEngineError::token(format!("bad signature encoding: {}", e)))?;

        self.mac()?
            .chain_update(&payload)
            .verify_slice(&signature)
            .map_err(|_| CallEngineError::token("signature mismatch"))?;

        let payload = String::from_utf8(payload).map_err(|_| CallEngineError::token("payload is not UTF-8"))?;
        // channel may itself contain ':'; app id, uid and expiry never do
        let mut head = payload.splitn(2, ':');
        let app_id = head.next().unwrap_or_default().to_string();
        let rest = head.next().ok_or_else(|| CallEngineError::token("truncated payload"))?;
        let mut tail = rest.rsplitn(3, ':');
        let expires_at = tail
            .next()
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| CallEngineError::token("bad expiry"))?;
        let uid = tail
            .next()
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| CallEngineError::token("bad uid"))?;
        let channel = tail.next().ok_or_else(|| CallEngineError::token("missing channel"))?.to_string();

        Ok(TokenClaims {
            app_id,
            channel,
            uid,
            expires_at,
        })
    }

    fn mac(&self) -> Result<HmacSha256> {
        HmacSha256::new_from_slice(&self.secret).map_err(|e| CallEngineError::token(e.to_string()))
    }
}

#[async_trait]
impl TokenIssuer for HmacTokenIssuer {
    fn app_id(&self) -> &str {
        &self.app_id
    }

    async fn create_token(&self, channel: &str, uid: u32, expires_at: DateTime<Utc>) -> Result<String> {
        let payload = format!("{}:{}:{}:{}", self.app_id, channel, uid, expires_at.timestamp());
        let signature = self.mac()?.chain_update(payload.as_bytes()).finalize().into_bytes();
        Ok(format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(payload.as_bytes()),
            URL_SAFE_NO_PAD.encode(signature)
        ))
    }
}

/// Issues and caches media tokens for call participants
#[derive(Clone)]
pub struct CallTokenService {
    store: Arc<dyn KeyedStore>,
    sessions: SessionState,
    issuer: Arc<dyn TokenIssuer>,
    keys: KeyConfig,
    queue: QueueConfig,
    ttl: Duration,
}

impl CallTokenService {
    pub fn new(store: Arc<dyn KeyedStore>, issuer: Arc<dyn TokenIssuer>, config: &VoiceDeskConfig) -> Self {
        Self {
            sessions: SessionState::new(store.clone(), config.keys.clone()),
            store,
            issuer,
            keys: config.keys.clone(),
            queue: config.queue.clone(),
            ttl: config.ttl.token(),
        }
    }

    /// Token for `role` (default `CUSTOMER`) on the session's media channel.
    ///
    /// A cached token for the same session and role is returned as is. Cache
    /// failures are logged and never fail issuance.
    pub async fn issue(&self, session_id: &str, role: Option<&str>) -> Result<CallToken> {
        let session_id = session_id.trim();
        if session_id.is_empty() {
            return Err(CallEngineError::invalid_input("sessionId is required"));
        }
        let role = normalize_role(role);
        let cache_key = self.keys.token_cache_key(session_id, &role);

        match self.store.get(&cache_key).await {
            Ok(Some(cached)) if !cached.trim().is_empty() => match serde_json::from_str::<CallToken>(&cached) {
                Ok(token) => {
                    debug!(session_id, role = %role, "🎟️ Token cache hit");
                    return Ok(token);
                }
                Err(e) => warn!(key = %cache_key, error = %e, "⚠️ Cached token unreadable, reissuing"),
            },
            Ok(_) => {}
            Err(e) => warn!(key = %cache_key, error = %e, "⚠️ Token cache read failed"),
        }

        let channel = self
            .sessions
            .resolve_channel(session_id, self.queue.channel_for(session_id))
            .await;
        let uid = rand::thread_rng().gen_range(1..i32::MAX as u32);
        let lifetime = chrono::Duration::from_std(self.ttl)
            .map_err(|e| CallEngineError::token(format!("token ttl out of range: {}", e)))?;
        let expires_at = Utc::now() + lifetime;
        let token = self.issuer.create_token(&channel, uid, expires_at).await?;

        let issued = CallToken {
            app_id: self.issuer.app_id().to_string(),
            channel,
            uid,
            token,
            expires_at,
        };

        match serde_json::to_string(&issued) {
            Ok(json) => {
                if let Err(e) = self.store.set(&cache_key, &json, Some(self.ttl)).await {
                    warn!(key = %cache_key, error = %e, "⚠️ Token cache write failed");
                }
            }
            Err(e) => warn!(key = %cache_key, error = %e, "⚠️ Token encoding failed"),
        }

        debug!(session_id, role = %role, uid, "🎟️ Token issued");
        Ok(issued)
    }
}

fn normalize_role(role: Option<&str>) -> String {
    match role.map(str::trim).filter(|r| !r.is_empty()) {
        Some(role) => role.to_ascii_uppercase(),
        None => ROLE_CUSTOMER.to_string(),
    }
}
