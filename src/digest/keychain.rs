// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Registry credentials from a service account's `imagePullSecrets`.

use crate::digest::reference::DEFAULT_REGISTRY;
use crate::digest::AuthContext;
use crate::error::{Result, RiffError};
use crate::kubernetes::ObjectStore;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use k8s_openapi::api::core::v1::{Secret, ServiceAccount};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

const DOCKER_CONFIG_JSON: &str = ".dockerconfigjson";
const DOCKER_CFG: &str = ".dockercfg";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    Anonymous,
    Basic { username: String, password: String },
}

#[derive(Deserialize, Default)]
struct DockerConfig {
    #[serde(default)]
    auths: BTreeMap<String, AuthEntry>,
}

#[derive(Deserialize, Default)]
struct AuthEntry {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    auth: Option<String>,
}

impl AuthEntry {
    fn credential(&self) -> Result<Credential> {
        if let (Some(username), Some(password)) = (&self.username, &self.password) {
            return Ok(Credential::Basic {
                username: username.clone(),
                password: password.clone(),
            });
        }
        let Some(auth) = self.auth.as_deref().filter(|a| !a.is_empty()) else {
            return Ok(Credential::Anonymous);
        };
        let decoded = STANDARD
            .decode(auth)
            .map_err(|e| RiffError::CredentialsError(format!("invalid auth encoding: {e}")))?;
        let decoded = String::from_utf8(decoded)
            .map_err(|e| RiffError::CredentialsError(format!("invalid auth encoding: {e}")))?;
        let (username, password) = decoded
            .split_once(':')
            .ok_or_else(|| RiffError::CredentialsError("auth is not user:password".to_string()))?;
        Ok(Credential::Basic {
            username: username.to_string(),
            password: password.to_string(),
        })
    }
}

/// Reduce a docker config key such as `https://index.docker.io/v1/` to a registry host
pub fn normalize_registry_key(key: &str) -> String {
    let host = key
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .split('/')
        .next()
        .unwrap_or_default();
    match host {
        "docker.io" | "registry-1.docker.io" | "registry.hub.docker.com" => DEFAULT_REGISTRY.to_string(),
        other => other.to_string(),
    }
}

/// Entries of one pull secret, keyed by normalized registry host
fn secret_auths(secret: &Secret) -> Result<BTreeMap<String, AuthEntry>> {
    let Some(data) = secret.data.as_ref() else {
        return Ok(BTreeMap::new());
    };
    let entries = if let Some(config) = data.get(DOCKER_CONFIG_JSON) {
        serde_json::from_slice::<DockerConfig>(&config.0)?.auths
    } else if let Some(config) = data.get(DOCKER_CFG) {
        serde_json::from_slice::<BTreeMap<String, AuthEntry>>(&config.0)?
    } else {
        BTreeMap::new()
    };
    Ok(entries
        .into_iter()
        .map(|(key, entry)| (normalize_registry_key(&key), entry))
        .collect())
}

/// Looks up credentials scoped to one service account
#[derive(Clone)]
pub struct Keychain {
    service_accounts: Arc<dyn ObjectStore<ServiceAccount>>,
    secrets: Arc<dyn ObjectStore<Secret>>,
}

impl Keychain {
    pub fn new(
        service_accounts: Arc<dyn ObjectStore<ServiceAccount>>,
        secrets: Arc<dyn ObjectStore<Secret>>,
    ) -> Self {
        Self {
            service_accounts,
            secrets,
        }
    }

    /// Credential for `registry`, anonymous when the service account has none
    #[instrument(skip(self))]
    pub async fn credential(&self, auth: &AuthContext, registry: &str) -> Result<Credential> {
        let Some(account) = self
            .service_accounts
            .get(&auth.namespace, &auth.service_account_name)
            .await?
        else {
            debug!("Service account not found, pulling anonymously");
            return Ok(Credential::Anonymous);
        };

        for reference in account.image_pull_secrets.iter().flatten() {
            let Some(secret) = self.secrets.get(&auth.namespace, &reference.name).await? else {
                warn!(secret = %reference.name, "Image pull secret not found");
                continue;
            };
            if let Some(entry) = secret_auths(&secret)?.get(registry) {
                debug!(secret = %reference.name, "Using image pull secret");
                return entry.credential();
            }
        }

        Ok(Credential::Anonymous)
    }
}
