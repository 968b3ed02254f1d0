// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Sharing grants, access levels and stateless access tokens.
//!
//! ## Grants
//!
//! The owner holds every permission. Other users hold what their
//! [`AccessGrant`] lists until it expires. Holders of `share` may grant and
//! revoke `view`, `download` and `sign` for others; only the owner may hand
//! out `share` or change the access level.
//!
//! ## Tokens
//!
//! ```text
//! vat1.<base64url(nonce || XChaCha20-Poly1305(claims_json))>
//! ```
//!
//! Claims are sealed under a subkey of the master key, so a token is valid
//! purely from its contents and the current time. A token is valid while
//! `now < expires_at`.

use std::collections::BTreeSet;
use std::time::Duration;

use base64ct::{Base64UrlUnpadded, Encoding};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use zeroize::Zeroizing;

use super::{VaultError, VaultResult};
use crate::clock::duration_ms;
use crate::crypto::encryption::{open, seal};
use crate::crypto::{MasterKey, ACCESS_TOKEN_LABEL, KEY_SIZE};
use crate::models::{AccessGrant, AccessLevel, DocumentRecord, Permission};

/// Prefix of every access token.
pub const TOKEN_PREFIX: &str = "vat1.";

/// Longest lifetime a token may be issued with.
pub const DEFAULT_MAX_TOKEN_TTL: Duration = Duration::from_secs(30 * 24 * 3600);

const TOKEN_AAD: &[u8] = b"integrity-vault/access-token/v1";

/// Contents of an access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TokenClaims {
    pub vault_id: String,
    pub permissions: BTreeSet<Permission>,
    pub issued_at: i64,
    pub expires_at: i64,
    pub token_id: String,
}

impl TokenClaims {
    pub fn allows(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }
}

/// A freshly issued token and its claims.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct IssuedToken {
    pub token: String,
    pub vault_id: String,
    pub permissions: BTreeSet<Permission>,
    pub issued_at: i64,
    pub expires_at: i64,
}

/// One grant in an access-control change set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GrantRequest {
    pub user_id: String,
    pub role: String,
    pub permissions: BTreeSet<Permission>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

/// Batch of grants, revokes and an optional access-level change, applied
/// as one mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AccessControlChanges {
    #[serde(default)]
    pub grants: Vec<GrantRequest>,
    #[serde(default)]
    pub revokes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_level: Option<AccessLevel>,
}

impl AccessControlChanges {
    pub fn is_empty(&self) -> bool {
        self.grants.is_empty() && self.revokes.is_empty() && self.access_level.is_none()
    }
}

pub struct AccessControlManager {
    token_key: Zeroizing<[u8; KEY_SIZE]>,
    max_ttl: Duration,
}

impl AccessControlManager {
    pub fn new(master: &MasterKey) -> Self {
        Self {
            token_key: master.derive_subkey(ACCESS_TOKEN_LABEL),
            max_ttl: DEFAULT_MAX_TOKEN_TTL,
        }
    }

    pub fn with_max_ttl(mut self, max_ttl: Duration) -> Self {
        self.max_ttl = max_ttl;
        self
    }

    // =========================================================================
    // Grants
    // =========================================================================

    /// Fail with `AccessDenied` unless `user_id` holds `permission`.
    pub fn check(
        &self,
        record: &DocumentRecord,
        user_id: &str,
        permission: Permission,
        now_ms: i64,
    ) -> VaultResult<()> {
        if record.access_control.permits(user_id, permission, now_ms) {
            Ok(())
        } else {
            Err(VaultError::AccessDenied(format!(
                "{user_id} lacks {permission} on {}",
                record.vault_id
            )))
        }
    }

    /// Add or replace the grant for `request.user_id`.
    ///
    /// Only the owner may replace a grant issued by someone else.
    pub fn grant(
        &self,
        record: &mut DocumentRecord,
        granted_by: &str,
        request: GrantRequest,
        now_ms: i64,
    ) -> VaultResult<()> {
        let user_id = request.user_id.trim();
        if user_id.is_empty() {
            return Err(VaultError::Input("grant needs a user id".to_string()));
        }
        if user_id == record.access_control.owner {
            return Err(VaultError::Input("the owner already holds every permission".to_string()));
        }
        if request.role.trim().is_empty() {
            return Err(VaultError::Input(format!("grant for {user_id} needs a role")));
        }
        if request.permissions.is_empty() {
            return Err(VaultError::Input(format!("grant for {user_id} has no permissions")));
        }
        if matches!(request.expires_at, Some(exp) if exp <= now_ms) {
            return Err(VaultError::Input(format!("grant for {user_id} is already expired")));
        }

        let grant = AccessGrant {
            user_id: user_id.to_string(),
            role: request.role.trim().to_string(),
            permissions: request.permissions,
            expires_at: request.expires_at,
            granted_at: now_ms,
            granted_by: granted_by.to_string(),
        };
        let is_owner = record.access_control.owner == granted_by;
        let shared = &mut record.access_control.shared_with;
        match shared.iter_mut().find(|g| g.user_id == grant.user_id) {
            Some(existing) if !is_owner && existing.granted_by != granted_by => {
                return Err(VaultError::AccessDenied(format!(
                    "{granted_by} may only replace grants it issued"
                )));
            }
            Some(existing) => *existing = grant,
            None => shared.push(grant),
        }
        Ok(())
    }

    /// Remove the grant held by `user_id`.
    pub fn revoke(&self, record: &mut DocumentRecord, user_id: &str) -> VaultResult<AccessGrant> {
        let shared = &mut record.access_control.shared_with;
        let index = shared
            .iter()
            .position(|g| g.user_id == user_id)
            .ok_or_else(|| VaultError::Input(format!("{user_id} holds no grant")))?;
        Ok(shared.remove(index))
    }

    /// Authorize and apply a change set. Returns audit details.
    pub fn apply_changes(
        &self,
        record: &mut DocumentRecord,
        actor_id: &str,
        changes: AccessControlChanges,
        now_ms: i64,
    ) -> VaultResult<serde_json::Value> {
        if changes.is_empty() {
            return Err(VaultError::Input("no access-control changes supplied".to_string()));
        }
        if record.is_tombstoned() {
            return Err(VaultError::Input(format!("{} is tombstoned", record.vault_id)));
        }

        let is_owner = record.access_control.owner == actor_id;
        if !is_owner {
            self.check(record, actor_id, Permission::Share, now_ms)?;
            if changes.access_level.is_some() {
                return Err(VaultError::AccessDenied(
                    "only the owner may change the access level".to_string(),
                ));
            }
            if changes
                .grants
                .iter()
                .any(|g| g.permissions.contains(&Permission::Share))
            {
                return Err(VaultError::AccessDenied(
                    "only the owner may grant share".to_string(),
                ));
            }
            for user_id in &changes.revokes {
                let granted_by_actor = record
                    .access_control
                    .grant_for(user_id)
                    .is_some_and(|g| g.granted_by == actor_id);
                if !granted_by_actor {
                    return Err(VaultError::AccessDenied(format!(
                        "{actor_id} may only revoke grants it issued"
                    )));
                }
            }
        }

        let mut granted = Vec::with_capacity(changes.grants.len());
        let mut revoked = Vec::with_capacity(changes.revokes.len());
        for user_id in &changes.revokes {
            self.revoke(record, user_id)?;
            revoked.push(user_id.clone());
        }
        for request in changes.grants {
            let detail = serde_json::json!({
                "userId": request.user_id.trim(),
                "role": request.role.trim(),
                "permissions": &request.permissions,
                "expiresAt": request.expires_at,
            });
            self.grant(record, actor_id, request, now_ms)?;
            granted.push(detail);
        }
        if let Some(level) = changes.access_level {
            record.access_level = level;
            record.access_control.public_access = level == AccessLevel::Public;
        }

        Ok(serde_json::json!({
            "granted": granted,
            "revoked": revoked,
            "accessLevel": changes.access_level,
        }))
    }

    // =========================================================================
    // Tokens
    // =========================================================================

    /// Seal a token for `vault_id` valid for `ttl` from `now_ms`.
    pub fn issue_token(
        &self,
        vault_id: &str,
        permissions: BTreeSet<Permission>,
        ttl: Duration,
        now_ms: i64,
    ) -> VaultResult<IssuedToken> {
        if permissions.is_empty() {
            return Err(VaultError::Input("token needs at least one permission".to_string()));
        }
        if ttl.is_zero() || ttl > self.max_ttl {
            return Err(VaultError::Input(format!(
                "token ttl must be between 1 ms and {} ms",
                duration_ms(self.max_ttl)
            )));
        }

        let claims = TokenClaims {
            vault_id: vault_id.to_string(),
            permissions,
            issued_at: now_ms,
            expires_at: now_ms.saturating_add(duration_ms(ttl)),
            token_id: uuid::Uuid::new_v4().to_string(),
        };
        let json = Zeroizing::new(
            serde_json::to_vec(&claims).map_err(|e| VaultError::Internal(e.to_string()))?,
        );
        let sealed = seal(&self.token_key, &json, TOKEN_AAD)?;

        Ok(IssuedToken {
            token: format!("{TOKEN_PREFIX}{}", Base64UrlUnpadded::encode_string(&sealed)),
            vault_id: claims.vault_id,
            permissions: claims.permissions,
            issued_at: claims.issued_at,
            expires_at: claims.expires_at,
        })
    }

    /// Open a token and check its expiry. Every failure is `AccessDenied`.
    pub fn validate_token(&self, token: &str, now_ms: i64) -> VaultResult<TokenClaims> {
        let body = token
            .trim()
            .strip_prefix(TOKEN_PREFIX)
            .ok_or_else(|| VaultError::AccessDenied("malformed access token".to_string()))?;
        let sealed = Base64UrlUnpadded::decode_vec(body)
            .map_err(|_| VaultError::AccessDenied("malformed access token".to_string()))?;
        let json = Zeroizing::new(
            open(&self.token_key, &sealed, TOKEN_AAD)
                .map_err(|_| VaultError::AccessDenied("access token failed authentication".to_string()))?,
        );
        let claims: TokenClaims = serde_json::from_slice(&json)
            .map_err(|_| VaultError::AccessDenied("malformed access token".to_string()))?;

        if now_ms >= claims.expires_at {
            return Err(VaultError::AccessDenied(format!(
                "access token {} expired",
                claims.token_id
            )));
        }
        Ok(claims)
    }
}
