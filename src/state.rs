// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use crate::vault::DocumentVault;

#[derive(Clone)]
pub struct AppState {
    pub vault: Arc<DocumentVault>,
}

impl AppState {
    pub fn new(vault: Arc<DocumentVault>) -> Self {
        Self { vault }
    }
}
