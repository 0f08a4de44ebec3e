// Copyright 2026 the Traitmint Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! `sessionStorage`-backed [`SessionStore`].

use alloc::format;
use alloc::string::{String, ToString};

use wasm_bindgen::JsValue;

use traitmint_core::error::StorageError;
use traitmint_core::persist::SessionStore;

/// [`SessionStore`] over `window.sessionStorage`.
///
/// Storage can be missing (workers), disabled (privacy settings) or full
/// (quota); every such case surfaces as a [`StorageError`] for the caller to
/// log.
#[derive(Debug)]
pub struct SessionStorageStore {
    storage: Option<web_sys::Storage>,
}

impl SessionStorageStore {
    /// Opens the window's session storage.
    #[must_use]
    pub fn open() -> Self {
        let storage = web_sys::window().and_then(|w| w.session_storage().ok().flatten());
        if storage.is_none() {
            tracing::warn!("sessionStorage unavailable, sessions will not survive a reload");
        }
        Self { storage }
    }

    /// Whether storage was available when opened.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.storage.is_some()
    }

    fn storage(&self) -> Result<&web_sys::Storage, StorageError> {
        self.storage.as_ref().ok_or(StorageError::Unavailable)
    }
}

fn describe(err: &JsValue) -> String {
    err.as_string().unwrap_or_else(|| format!("{err:?}"))
}

impl SessionStore for SessionStorageStore {
    fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.storage()?
            .get_item(key)
            .map_err(|err| StorageError::ReadFailed {
                key: key.to_string(),
                reason: describe(&err),
            })
    }

    fn write(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.storage()?
            .set_item(key, value)
            .map_err(|err| StorageError::WriteFailed {
                key: key.to_string(),
                reason: describe(&err),
            })
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.storage()?
            .remove_item(key)
            .map_err(|err| StorageError::WriteFailed {
                key: key.to_string(),
                reason: describe(&err),
            })
    }
}
