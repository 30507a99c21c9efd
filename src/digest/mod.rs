// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Resolution of mutable image tags to immutable content digests.

pub mod keychain;
pub mod reference;
pub mod registry;

pub use keychain::{Credential, Keychain};
pub use reference::ImageReference;
pub use registry::RegistryResolver;

use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashSet;

/// Identity whose pull credentials are used for a lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub namespace: String,
    pub service_account_name: String,
}

#[async_trait]
pub trait Resolver: Send + Sync {
    /// Resolve `image` to `<registry>/<repository>@<digest>`.
    ///
    /// Images hosted on one of `skip_registries` are returned unchanged
    /// without contacting any registry.
    async fn resolve(
        &self,
        image: &str,
        auth: &AuthContext,
        skip_registries: &HashSet<String>,
    ) -> Result<String>;
}
