// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Request extractors for caller identity and access tokens.
//!
//! Callers are authenticated upstream; the gateway forwards the caller id
//! in `X-Actor-Id`. Content downloads carry a vault access token as
//! `Authorization: Bearer vat1.<...>`.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};

use crate::error::ApiError;

pub const ACTOR_HEADER: &str = "x-actor-id";

/// Caller identity from `X-Actor-Id`.
#[derive(Debug, Clone)]
pub struct Actor(pub String);

impl<S: Send + Sync> FromRequestParts<S> for Actor {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let actor = parts
            .headers
            .get(ACTOR_HEADER)
            .ok_or_else(|| ApiError::unauthorized("missing X-Actor-Id header"))?
            .to_str()
            .map_err(|_| ApiError::unauthorized("invalid X-Actor-Id header"))?
            .trim();
        if actor.is_empty() {
            return Err(ApiError::unauthorized("empty X-Actor-Id header"));
        }
        Ok(Actor(actor.to_string()))
    }
}

/// Access token from `Authorization: Bearer`.
#[derive(Debug, Clone)]
pub struct BearerToken(pub String);

impl<S: Send + Sync> FromRequestParts<S> for BearerToken {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .ok_or_else(|| ApiError::unauthorized("missing Authorization header"))?
            .to_str()
            .map_err(|_| ApiError::unauthorized("invalid Authorization header"))?;
        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| ApiError::unauthorized("expected a Bearer token"))?;
        Ok(BearerToken(token.trim().to_string()))
    }
}
