// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Document vault API endpoints.
//!
//! Upload, read, verify, share, sign and soft-delete documents. Mutating
//! endpoints identify the caller through [`Actor`]; content downloads are
//! authorized by a vault access token.

use std::collections::BTreeSet;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::{
        header::{CONTENT_DISPOSITION, CONTENT_TYPE},
        StatusCode,
    },
    response::{IntoResponse, Response},
    Json,
};
use base64ct::{Base64, Encoding};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::extract::{Actor, BearerToken};
use crate::{
    error::ApiError,
    models::{
        AccessControl, AuditEntry, DocumentRecord, Permission, Signature, SignerRole, Tombstone,
    },
    state::AppState,
    storage::AuditFilter,
    vault::{
        AccessControlChanges, AddDocumentOptions, AddDocumentResult, IssuedToken, NewDocument,
        NewDocumentMetadata, SignatureCheck, Verdict,
    },
};

/// Request to store a new document.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UploadDocumentRequest {
    pub file_name: String,
    #[serde(default = "default_mime_type")]
    pub mime_type: String,
    /// Document bytes, standard base64.
    pub content: String,
    pub metadata: NewDocumentMetadata,
    #[serde(default)]
    pub options: AddDocumentOptions,
}

fn default_mime_type() -> String {
    "application/octet-stream".to_string()
}

/// Request to verify a document. Without `content` the stored copy is checked.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VerifyDocumentRequest {
    /// Candidate bytes, standard base64.
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeleteDocumentRequest {
    pub reason: String,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SignDocumentRequest {
    pub signer_role: SignerRole,
    /// Earlier signature by the same signer that this one corrects.
    #[serde(default)]
    pub supersedes: Option<String>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct IssueTokenRequest {
    pub permissions: BTreeSet<Permission>,
    pub ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SignatureListResponse {
    pub signatures: Vec<Signature>,
    pub checks: Vec<SignatureCheck>,
}

fn decode_content(raw: &str) -> Result<Vec<u8>, ApiError> {
    Base64::decode_vec(raw.trim()).map_err(|_| ApiError::bad_request("content is not valid base64"))
}

/// Store, encrypt and anchor a document.
///
/// The calling actor becomes the owner. Responds 201 even when the ledger
/// was unreachable; `anchorState` is then `anchored-pending` and the anchor
/// is retried in the background.
#[utoipa::path(
    post,
    path = "/v1/documents",
    tag = "Documents",
    request_body = UploadDocumentRequest,
    responses(
        (status = 201, description = "Document stored", body = AddDocumentResult),
        (status = 400, description = "Invalid input", body = crate::error::ErrorBody),
        (status = 401, body = crate::error::ErrorBody),
        (status = 403, description = "uploadedBy names another actor", body = crate::error::ErrorBody),
        (status = 500, description = "Storage failure", body = crate::error::ErrorBody)
    )
)]
pub async fn upload_document(
    Actor(actor): Actor,
    State(state): State<AppState>,
    Json(request): Json<UploadDocumentRequest>,
) -> Result<(StatusCode, Json<AddDocumentResult>), ApiError> {
    let mut metadata = request.metadata;
    let claimed = metadata.uploaded_by.trim();
    if claimed.is_empty() {
        metadata.uploaded_by = actor;
    } else if claimed != actor {
        return Err(ApiError::forbidden(format!(
            "{actor} may not upload on behalf of {claimed}"
        )));
    }

    let content = decode_content(&request.content)?;
    let result = state
        .vault
        .add_document(NewDocument {
            file_name: request.file_name,
            mime_type: request.mime_type,
            content,
            metadata,
            options: request.options,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(result)))
}

#[utoipa::path(
    get,
    path = "/v1/documents/{vault_id}",
    tag = "Documents",
    params(("vault_id" = String, Path, description = "Vault identifier")),
    responses(
        (status = 200, body = DocumentRecord),
        (status = 401, body = crate::error::ErrorBody),
        (status = 403, body = crate::error::ErrorBody),
        (status = 404, body = crate::error::ErrorBody)
    )
)]
pub async fn get_document(
    Actor(actor): Actor,
    State(state): State<AppState>,
    Path(vault_id): Path<String>,
) -> Result<Json<DocumentRecord>, ApiError> {
    state.vault.authorize(&vault_id, &actor, Permission::View)?;
    Ok(Json(state.vault.get_document(&vault_id)?))
}

/// Soft-delete a document. The record and its history are retained.
#[utoipa::path(
    delete,
    path = "/v1/documents/{vault_id}",
    tag = "Documents",
    params(("vault_id" = String, Path, description = "Vault identifier")),
    request_body = DeleteDocumentRequest,
    responses(
        (status = 200, description = "Document tombstoned", body = Tombstone),
        (status = 400, body = crate::error::ErrorBody),
        (status = 403, body = crate::error::ErrorBody),
        (status = 404, body = crate::error::ErrorBody)
    )
)]
pub async fn delete_document(
    Actor(actor): Actor,
    State(state): State<AppState>,
    Path(vault_id): Path<String>,
    Json(request): Json<DeleteDocumentRequest>,
) -> Result<Json<Tombstone>, ApiError> {
    let tombstone = state
        .vault
        .delete_document(&vault_id, &actor, &request.reason)
        .await?;
    Ok(Json(tombstone))
}

#[utoipa::path(
    post,
    path = "/v1/documents/{vault_id}/verify",
    tag = "Documents",
    params(("vault_id" = String, Path, description = "Vault identifier")),
    request_body = VerifyDocumentRequest,
    responses(
        (status = 200, description = "Verification verdict", body = Verdict),
        (status = 401, body = crate::error::ErrorBody),
        (status = 403, body = crate::error::ErrorBody),
        (status = 404, body = crate::error::ErrorBody)
    )
)]
pub async fn verify_document(
    Actor(actor): Actor,
    State(state): State<AppState>,
    Path(vault_id): Path<String>,
    Json(request): Json<VerifyDocumentRequest>,
) -> Result<Json<Verdict>, ApiError> {
    state.vault.authorize(&vault_id, &actor, Permission::View)?;
    let content = request.content.as_deref().map(decode_content).transpose()?;
    let verdict = state
        .vault
        .verify_document(&vault_id, content, &actor)
        .await?;
    Ok(Json(verdict))
}

#[utoipa::path(
    put,
    path = "/v1/documents/{vault_id}/access",
    tag = "Access",
    params(("vault_id" = String, Path, description = "Vault identifier")),
    request_body = AccessControlChanges,
    responses(
        (status = 200, description = "Updated access control", body = AccessControl),
        (status = 400, body = crate::error::ErrorBody),
        (status = 403, body = crate::error::ErrorBody)
    )
)]
pub async fn update_access(
    Actor(actor): Actor,
    State(state): State<AppState>,
    Path(vault_id): Path<String>,
    Json(changes): Json<AccessControlChanges>,
) -> Result<Json<AccessControl>, ApiError> {
    let access = state
        .vault
        .update_access_control(&vault_id, &actor, changes)
        .await?;
    Ok(Json(access))
}

#[utoipa::path(
    get,
    path = "/v1/documents/{vault_id}/signatures",
    tag = "Signatures",
    params(("vault_id" = String, Path, description = "Vault identifier")),
    responses(
        (status = 200, body = SignatureListResponse),
        (status = 401, body = crate::error::ErrorBody),
        (status = 403, body = crate::error::ErrorBody),
        (status = 404, body = crate::error::ErrorBody)
    )
)]
pub async fn list_signatures(
    Actor(actor): Actor,
    State(state): State<AppState>,
    Path(vault_id): Path<String>,
) -> Result<Json<SignatureListResponse>, ApiError> {
    state.vault.authorize(&vault_id, &actor, Permission::View)?;
    Ok(Json(SignatureListResponse {
        signatures: state.vault.list_signatures(&vault_id)?,
        checks: state.vault.check_signatures(&vault_id)?,
    }))
}

#[utoipa::path(
    post,
    path = "/v1/documents/{vault_id}/signatures",
    tag = "Signatures",
    params(("vault_id" = String, Path, description = "Vault identifier")),
    request_body = SignDocumentRequest,
    responses(
        (status = 201, description = "Signature appended", body = Signature),
        (status = 400, body = crate::error::ErrorBody),
        (status = 403, body = crate::error::ErrorBody)
    )
)]
pub async fn sign_document(
    Actor(actor): Actor,
    State(state): State<AppState>,
    Path(vault_id): Path<String>,
    Json(request): Json<SignDocumentRequest>,
) -> Result<(StatusCode, Json<Signature>), ApiError> {
    let signature = state
        .vault
        .sign(&vault_id, &actor, request.signer_role, request.supersedes)
        .await?;
    Ok((StatusCode::CREATED, Json(signature)))
}

/// Issue an access token. The caller must hold `share` plus every permission
/// the token carries.
#[utoipa::path(
    post,
    path = "/v1/documents/{vault_id}/tokens",
    tag = "Access",
    params(("vault_id" = String, Path, description = "Vault identifier")),
    request_body = IssueTokenRequest,
    responses(
        (status = 201, description = "Token issued", body = IssuedToken),
        (status = 400, body = crate::error::ErrorBody),
        (status = 403, body = crate::error::ErrorBody)
    )
)]
pub async fn issue_token(
    Actor(actor): Actor,
    State(state): State<AppState>,
    Path(vault_id): Path<String>,
    Json(request): Json<IssueTokenRequest>,
) -> Result<(StatusCode, Json<IssuedToken>), ApiError> {
    let issued = state.vault.issue_access_token(
        &vault_id,
        &actor,
        request.permissions,
        Duration::from_secs(request.ttl_secs),
    )?;
    tracing::info!(
        vault_id = %vault_id,
        actor_id = %actor,
        expires_at = issued.expires_at,
        "Access token issued"
    );
    Ok((StatusCode::CREATED, Json(issued)))
}

/// Download decrypted content with a `view` or `download` token.
#[utoipa::path(
    get,
    path = "/v1/documents/{vault_id}/content",
    tag = "Documents",
    params(("vault_id" = String, Path, description = "Vault identifier")),
    responses(
        (status = 200, description = "Decrypted document bytes"),
        (status = 401, body = crate::error::ErrorBody),
        (status = 403, body = crate::error::ErrorBody)
    )
)]
pub async fn download_content(
    Actor(actor): Actor,
    BearerToken(token): BearerToken,
    State(state): State<AppState>,
    Path(vault_id): Path<String>,
) -> Result<Response, ApiError> {
    let content = state
        .vault
        .retrieve_content(&vault_id, &token, &actor)
        .await?;
    let disposition = format!(
        "attachment; filename=\"{}\"",
        content.file_name.replace(['"', '\\', '\r', '\n'], "_")
    );
    Ok((
        [(CONTENT_TYPE, content.mime_type), (CONTENT_DISPOSITION, disposition)],
        content.bytes,
    )
        .into_response())
}

/// Audit trail of a document, optionally narrowed by time range, actor or
/// action.
#[utoipa::path(
    get,
    path = "/v1/documents/{vault_id}/audit",
    tag = "Documents",
    params(
        ("vault_id" = String, Path, description = "Vault identifier"),
        AuditFilter
    ),
    responses(
        (status = 200, body = [AuditEntry]),
        (status = 403, body = crate::error::ErrorBody),
        (status = 404, body = crate::error::ErrorBody)
    )
)]
pub async fn read_audit(
    Actor(actor): Actor,
    State(state): State<AppState>,
    Path(vault_id): Path<String>,
    Query(filter): Query<AuditFilter>,
) -> Result<Json<Vec<AuditEntry>>, ApiError> {
    state.vault.authorize(&vault_id, &actor, Permission::View)?;
    Ok(Json(state.vault.read_audit(&vault_id, &filter)?))
}
