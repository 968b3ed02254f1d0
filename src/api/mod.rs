// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post, put},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    crypto::{EncryptionLevel, KdfDescriptor, KdfParams, WrappedKey},
    error::ErrorBody,
    models::{
        AccessControl, AccessGrant, AccessLevel, AnchorState, AuditAction, AuditEntry,
        DocumentAnchor, DocumentMetadata, DocumentRecord, DocumentStatus, Permission,
        RetentionPolicy, Signature, SignerRole, StorageLocators, Tombstone,
    },
    state::AppState,
    vault::{
        AccessControlChanges, AddDocumentOptions, AddDocumentResult, GrantRequest, IssuedToken,
        LifecycleState, NewDocumentMetadata, SignatureCheck, Verdict, VerdictReason,
    },
};

pub mod documents;
pub mod extract;
pub mod health;

/// Largest accepted request body. Uploads are base64, so this is sized above
/// the document limit.
pub const MAX_REQUEST_BYTES: usize = 72 * 1024 * 1024;

pub fn router(state: AppState) -> Router {
    let v1_routes = Router::new()
        .route("/documents", post(documents::upload_document))
        .route(
            "/documents/{vault_id}",
            get(documents::get_document).delete(documents::delete_document),
        )
        .route("/documents/{vault_id}/verify", post(documents::verify_document))
        .route("/documents/{vault_id}/access", put(documents::update_access))
        .route(
            "/documents/{vault_id}/signatures",
            get(documents::list_signatures).post(documents::sign_document),
        )
        .route("/documents/{vault_id}/tokens", post(documents::issue_token))
        .route("/documents/{vault_id}/content", get(documents::download_content))
        .route("/documents/{vault_id}/audit", get(documents::read_audit))
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BYTES))
        .with_state(state.clone());

    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .with_state(state);

    Router::new()
        .merge(health_routes)
        .nest("/v1", v1_routes)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        health::liveness,
        health::readiness,
        documents::upload_document,
        documents::get_document,
        documents::delete_document,
        documents::verify_document,
        documents::update_access,
        documents::list_signatures,
        documents::sign_document,
        documents::issue_token,
        documents::download_content,
        documents::read_audit
    ),
    components(
        schemas(
            ErrorBody,
            health::ReadyResponse,
            health::HealthChecks,
            health::HealthResponse,
            documents::UploadDocumentRequest,
            documents::VerifyDocumentRequest,
            documents::DeleteDocumentRequest,
            documents::SignDocumentRequest,
            documents::IssueTokenRequest,
            documents::SignatureListResponse,
            AddDocumentResult,
            AddDocumentOptions,
            NewDocumentMetadata,
            AccessControlChanges,
            GrantRequest,
            IssuedToken,
            Verdict,
            VerdictReason,
            LifecycleState,
            SignatureCheck,
            DocumentRecord,
            DocumentMetadata,
            DocumentAnchor,
            DocumentStatus,
            StorageLocators,
            AccessControl,
            AccessGrant,
            AccessLevel,
            AnchorState,
            AuditAction,
            AuditEntry,
            Permission,
            RetentionPolicy,
            Signature,
            SignerRole,
            Tombstone,
            EncryptionLevel,
            KdfDescriptor,
            KdfParams,
            WrappedKey
        )
    ),
    tags(
        (name = "Health", description = "Liveness and readiness probes"),
        (name = "Documents", description = "Upload, verification and retrieval"),
        (name = "Access", description = "Sharing grants and access tokens"),
        (name = "Signatures", description = "Signer-bound document signatures")
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, StatusCode},
        response::Response,
    };
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::clock::ManualClock;
    use crate::crypto::MasterKey;
    use crate::ledger::{RetryPolicy, SimulatedLedger};
    use crate::storage::{AnchorDatabase, MemoryStorageTier, VaultStore};
    use crate::vault::{DocumentVault, VaultDeps, VaultSettings};

    fn test_state() -> (AppState, Arc<SimulatedLedger>) {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let anchor_db = Arc::new(AnchorDatabase::in_memory().unwrap());
        let ledger = Arc::new(SimulatedLedger::new(anchor_db.clone(), clock.clone()));
        let vault = DocumentVault::new(VaultDeps {
            ledger: ledger.clone(),
            anchor_db,
            store: VaultStore::new(Arc::new(MemoryStorageTier::new("primary"))),
            master_key: MasterKey::from_bytes([9u8; 32]),
            clock,
            settings: VaultSettings {
                anchor_timeout: Duration::from_millis(200),
                retry: RetryPolicy {
                    max_retries: 0,
                    initial_backoff: Duration::from_millis(1),
                    max_backoff: Duration::from_millis(1),
                },
                kdf: KdfParams {
                    memory_kib: 8,
                    iterations: 1,
                    parallelism: 1,
                },
                worker_threads: Some(2),
                ..Default::default()
            },
        });
        (AppState::new(Arc::new(vault)), ledger)
    }

    fn json_request(method: &str, uri: &str, actor: Option<&str>, body: Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(actor) = actor {
            builder = builder.header(extract::ACTOR_HEADER, actor);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn upload(app: &Router, content: &[u8]) -> Value {
        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/v1/documents",
                Some("owner_1"),
                json!({
                    "fileName": "returns.pdf",
                    "mimeType": "application/pdf",
                    "content": STANDARD.encode(content),
                    "metadata": {"uploadedBy": "owner_1", "documentType": "tax_returns"}
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        body_json(response).await
    }

    #[tokio::test]
    async fn router_builds_with_all_routes() {
        let (state, _) = test_state();
        let _ = router(state).into_make_service();
    }

    #[test]
    fn openapi_lists_document_paths() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/v1/documents"));
        assert!(doc.paths.paths.contains_key("/v1/documents/{vault_id}/verify"));
    }

    #[tokio::test]
    async fn health_reports_storage_and_ledger() {
        let (state, _) = test_state();
        let response = router(state)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["checks"]["storage"], "ok");
        assert_eq!(body["checks"]["ledger"], "simulated");
    }

    #[tokio::test]
    async fn upload_then_verify_flow() {
        let (state, _) = test_state();
        let app = router(state);
        let added = upload(&app, b"ABCDEFGHIJ").await;
        assert_eq!(added["anchorState"], "anchored");
        let vault_id = added["vaultId"].as_str().unwrap().to_string();

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                &format!("/v1/documents/{vault_id}/verify"),
                Some("owner_1"),
                json!({"content": STANDARD.encode(b"ABCDEFGHIK")}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let verdict = body_json(response).await;
        assert_eq!(verdict["isValid"], false);
        assert_eq!(verdict["reasons"], json!(["hash-mismatch"]));

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                &format!("/v1/documents/{vault_id}/verify"),
                Some("owner_1"),
                json!({}),
            ))
            .await
            .unwrap();
        let verdict = body_json(response).await;
        assert_eq!(verdict["isValid"], true);
        assert_eq!(verdict["auditTrail"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn ledger_outage_still_creates_document() {
        let (state, ledger) = test_state();
        ledger.set_offline(true);
        let added = upload(&router(state), b"doc").await;
        assert_eq!(added["anchorState"], "anchored-pending");
        assert!(added.get("anchorRef").is_none());
    }

    #[tokio::test]
    async fn token_download_flow() {
        let (state, _) = test_state();
        let app = router(state);
        let added = upload(&app, b"ABCDEFGHIJ").await;
        let vault_id = added["vaultId"].as_str().unwrap().to_string();

        let denied = app
            .clone()
            .oneshot(json_request(
                "POST",
                &format!("/v1/documents/{vault_id}/tokens"),
                Some("stranger"),
                json!({"permissions": ["download"], "ttlSecs": 60}),
            ))
            .await
            .unwrap();
        assert_eq!(denied.status(), StatusCode::FORBIDDEN);

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                &format!("/v1/documents/{vault_id}/tokens"),
                Some("owner_1"),
                json!({"permissions": ["download"], "ttlSecs": 60}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let token = body_json(response).await["token"].as_str().unwrap().to_string();
        assert!(token.starts_with("vat1."));

        let response = app
            .clone()
            .oneshot(
                Request::get(format!("/v1/documents/{vault_id}/content"))
                    .header(extract::ACTOR_HEADER, "broker_7")
                    .header(header::AUTHORIZATION, format!("Bearer {token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/pdf");
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"ABCDEFGHIJ");

        let missing_token = app
            .oneshot(
                Request::get(format!("/v1/documents/{vault_id}/content"))
                    .header(extract::ACTOR_HEADER, "broker_7")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(missing_token.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn sign_and_delete_flow() {
        let (state, _) = test_state();
        let app = router(state);
        let added = upload(&app, b"doc").await;
        let vault_id = added["vaultId"].as_str().unwrap().to_string();

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                &format!("/v1/documents/{vault_id}/signatures"),
                Some("owner_1"),
                json!({"signerRole": "borrower"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app
            .clone()
            .oneshot(json_request(
                "DELETE",
                &format!("/v1/documents/{vault_id}"),
                Some("owner_1"),
                json!({"reason": "superseded"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(
                Request::get(format!("/v1/documents/{vault_id}/signatures"))
                    .header(extract::ACTOR_HEADER, "owner_1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let list = body_json(response).await;
        assert_eq!(list["signatures"].as_array().unwrap().len(), 1);
        assert_eq!(list["checks"][0]["valid"], true);

        let response = app
            .oneshot(
                Request::get(format!("/v1/documents/{vault_id}"))
                    .header(extract::ACTOR_HEADER, "owner_1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let record = body_json(response).await;
        assert_eq!(record["status"], "tombstoned");
        assert_eq!(record["auditTrail"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn errors_render_code_and_status() {
        let (state, _) = test_state();
        let app = router(state);

        let response = app
            .clone()
            .oneshot(
                Request::get("/v1/documents/vault_ffffffffffffffffffffffffffffffff")
                    .header(extract::ACTOR_HEADER, "owner_1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["error_code"], "not_found");

        let response = app
            .clone()
            .oneshot(
                Request::get("/v1/documents/vault_ffffffffffffffffffffffffffffffff")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .oneshot(json_request(
                "POST",
                "/v1/documents",
                Some("owner_1"),
                json!({
                    "fileName": "x.pdf",
                    "content": "***not base64***",
                    "metadata": {"uploadedBy": "owner_1", "documentType": "tax_returns"}
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error_code"], "invalid_input");
    }

    #[tokio::test]
    async fn upload_owner_comes_from_the_actor_header() {
        let (state, _) = test_state();
        let app = router(state);

        let upload_as = |actor: Option<&str>, metadata: Value| {
            json_request(
                "POST",
                "/v1/documents",
                actor,
                json!({
                    "fileName": "returns.pdf",
                    "content": STANDARD.encode(b"doc"),
                    "metadata": metadata
                }),
            )
        };

        let response = app
            .clone()
            .oneshot(upload_as(
                Some("mallory"),
                json!({"uploadedBy": "owner_1", "documentType": "tax_returns"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(body_json(response).await["error_code"], "access_denied");

        let response = app
            .clone()
            .oneshot(upload_as(None, json!({"documentType": "tax_returns"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .clone()
            .oneshot(upload_as(Some("owner_2"), json!({"documentType": "tax_returns"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let vault_id = body_json(response).await["vaultId"]
            .as_str()
            .unwrap()
            .to_string();

        let response = app
            .oneshot(
                Request::get(format!("/v1/documents/{vault_id}"))
                    .header(extract::ACTOR_HEADER, "owner_2")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let record = body_json(response).await;
        assert_eq!(record["accessControl"]["owner"], "owner_2");
        assert_eq!(record["auditTrail"][0]["actorId"], "owner_2");
    }

    #[tokio::test]
    async fn signature_list_requires_view() {
        let (state, _) = test_state();
        let app = router(state);
        let added = upload(&app, b"doc").await;
        let vault_id = added["vaultId"].as_str().unwrap().to_string();
        let uri = format!("/v1/documents/{vault_id}/signatures");

        let response = app
            .clone()
            .oneshot(Request::get(&uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .clone()
            .oneshot(
                Request::get(&uri)
                    .header(extract::ACTOR_HEADER, "stranger")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = app
            .oneshot(
                Request::get(&uri)
                    .header(extract::ACTOR_HEADER, "owner_1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn audit_reads_accept_filters() {
        let (state, _) = test_state();
        let app = router(state);
        let added = upload(&app, b"doc").await;
        let vault_id = added["vaultId"].as_str().unwrap().to_string();

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                &format!("/v1/documents/{vault_id}/verify"),
                Some("owner_1"),
                json!({}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let read = |query: &str| {
            Request::get(format!("/v1/documents/{vault_id}/audit{query}"))
                .header(extract::ACTOR_HEADER, "owner_1")
                .body(Body::empty())
                .unwrap()
        };

        let all = body_json(app.clone().oneshot(read("")).await.unwrap()).await;
        assert_eq!(all.as_array().unwrap().len(), 2);

        let uploads = body_json(app.clone().oneshot(read("?action=upload")).await.unwrap()).await;
        assert_eq!(uploads.as_array().unwrap().len(), 1);
        assert_eq!(uploads[0]["action"], "upload");

        let none = body_json(app.oneshot(read("?actorId=broker_7")).await.unwrap()).await;
        assert!(none.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn verify_requires_view() {
        let (state, _) = test_state();
        let app = router(state.clone());
        let added = upload(&app, b"doc").await;
        let vault_id = added["vaultId"].as_str().unwrap().to_string();
        let before = state.vault.get_document(&vault_id).unwrap().audit_trail.len();

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                &format!("/v1/documents/{vault_id}/verify"),
                Some("stranger"),
                json!({}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            state.vault.get_document(&vault_id).unwrap().audit_trail.len(),
            before
        );

        let response = app
            .oneshot(json_request(
                "POST",
                &format!("/v1/documents/{vault_id}/verify"),
                None,
                json!({}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn share_only_holder_cannot_mint_download_token() {
        let (state, _) = test_state();
        let app = router(state);
        let added = upload(&app, b"secret").await;
        let vault_id = added["vaultId"].as_str().unwrap().to_string();

        let response = app
            .clone()
            .oneshot(json_request(
                "PUT",
                &format!("/v1/documents/{vault_id}/access"),
                Some("owner_1"),
                json!({"grants": [{"userId": "broker_7", "role": "broker", "permissions": ["share"]}]}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                &format!("/v1/documents/{vault_id}/tokens"),
                Some("broker_7"),
                json!({"permissions": ["download"], "ttlSecs": 60}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = app
            .oneshot(json_request(
                "POST",
                &format!("/v1/documents/{vault_id}/tokens"),
                Some("broker_7"),
                json!({"permissions": ["share"], "ttlSecs": 60}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }
}
