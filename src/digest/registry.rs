// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Digest lookup against the registry v2 API.

use crate::digest::keychain::{Credential, Keychain};
use crate::digest::reference::ImageReference;
use crate::digest::{AuthContext, Resolver};
use crate::error::{Result, RiffError};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, WWW_AUTHENTICATE};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;
use tracing::{debug, instrument};

const DOCKER_CONTENT_DIGEST: &str = "Docker-Content-Digest";

const MANIFEST_MEDIA_TYPES: &str = "application/vnd.docker.distribution.manifest.v2+json, \
     application/vnd.docker.distribution.manifest.list.v2+json, \
     application/vnd.oci.image.manifest.v1+json, \
     application/vnd.oci.image.index.v1+json";

/// Authentication scheme requested by a registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub scheme: String,
    pub params: BTreeMap<String, String>,
}

impl Challenge {
    /// Parse a `WWW-Authenticate` value such as
    /// `Bearer realm="https://auth.example.com/token",service="registry"`
    pub fn parse(header: &str) -> Option<Self> {
        let header = header.trim();
        let (scheme, rest) = header.split_once(' ').unwrap_or((header, ""));
        if scheme.is_empty() {
            return None;
        }

        let mut params = BTreeMap::new();
        let mut chars = rest.chars().peekable();
        loop {
            while chars.peek().is_some_and(|c| *c == ',' || c.is_whitespace()) {
                chars.next();
            }
            let key: String = chars.by_ref().take_while(|c| *c != '=').collect();
            if key.is_empty() {
                break;
            }
            let value: String = if chars.peek() == Some(&'"') {
                chars.next();
                chars.by_ref().take_while(|c| *c != '"').collect()
            } else {
                chars.by_ref().take_while(|c| *c != ',').collect()
            };
            params.insert(key.trim().to_ascii_lowercase(), value);
        }

        Some(Self {
            scheme: scheme.to_ascii_lowercase(),
            params,
        })
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

enum Authorization {
    None,
    Basic(String, String),
    Bearer(String),
}

impl Authorization {
    fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        match self {
            Authorization::None => request,
            Authorization::Basic(username, password) => request.basic_auth(username, Some(password)),
            Authorization::Bearer(token) => request.bearer_auth(token),
        }
    }
}

/// [`Resolver`] that asks the image's registry for the manifest digest
pub struct RegistryResolver {
    http: reqwest::Client,
    keychain: Keychain,
}

impl RegistryResolver {
    pub fn new(keychain: Keychain, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, keychain })
    }

    async fn manifest_request(
        &self,
        method: Method,
        reference: &ImageReference,
        authorization: &Authorization,
    ) -> Result<Response> {
        let request = self
            .http
            .request(method, reference.manifest_url())
            .header(ACCEPT, MANIFEST_MEDIA_TYPES);
        Ok(authorization.apply(request).send().await?)
    }

    /// Answer a 401 challenge with the pull credential
    async fn authorize(
        &self,
        challenge: &Challenge,
        reference: &ImageReference,
        credential: &Credential,
    ) -> Result<Authorization> {
        match (challenge.scheme.as_str(), credential) {
            ("basic", Credential::Basic { username, password }) => {
                Ok(Authorization::Basic(username.clone(), password.clone()))
            }
            ("basic", Credential::Anonymous) => Err(RiffError::CredentialsError(format!(
                "registry {} requires credentials",
                reference.registry
            ))),
            ("bearer", _) => self.fetch_token(challenge, reference, credential).await,
            (scheme, _) => Err(RiffError::RegistryError(format!(
                "unsupported authentication scheme {scheme:?}"
            ))),
        }
    }

    async fn fetch_token(
        &self,
        challenge: &Challenge,
        reference: &ImageReference,
        credential: &Credential,
    ) -> Result<Authorization> {
        let realm = challenge
            .params
            .get("realm")
            .ok_or_else(|| RiffError::RegistryError("bearer challenge without realm".to_string()))?;
        let scope = format!("repository:{}:pull", reference.repository);
        let mut query = vec![("scope", scope.as_str())];
        if let Some(service) = challenge.params.get("service") {
            query.push(("service", service.as_str()));
        }
        let url = url::Url::parse_with_params(realm, &query)
            .map_err(|e| RiffError::RegistryError(format!("invalid token realm {realm:?}: {e}")))?;

        let mut request = self.http.get(url);
        if let Credential::Basic { username, password } = credential {
            request = request.basic_auth(username, Some(password));
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(RiffError::CredentialsError(format!(
                "token request for {} failed with {}",
                reference.repository,
                response.status()
            )));
        }
        let token: TokenResponse = response.json().await?;
        token
            .token
            .or(token.access_token)
            .map(Authorization::Bearer)
            .ok_or_else(|| RiffError::CredentialsError("token response without token".to_string()))
    }

    /// Manifest digest from the response header, or by hashing the manifest body
    async fn digest_of(
        &self,
        response: Response,
        reference: &ImageReference,
        authorization: &Authorization,
    ) -> Result<String> {
        if let Some(digest) = response
            .headers()
            .get(DOCKER_CONTENT_DIGEST)
            .and_then(|v| v.to_str().ok())
        {
            return Ok(digest.to_string());
        }

        debug!("No digest header, hashing manifest body");
        let response = self
            .manifest_request(Method::GET, reference, authorization)
            .await?
            .error_for_status()?;
        let body = response.bytes().await?;
        Ok(sha256_digest(&body))
    }
}

pub fn sha256_digest(bytes: &[u8]) -> String {
    format!("sha256:{:x}", Sha256::digest(bytes))
}

#[async_trait]
impl Resolver for RegistryResolver {
    #[instrument(skip(self, skip_registries))]
    async fn resolve(
        &self,
        image: &str,
        auth: &AuthContext,
        skip_registries: &HashSet<String>,
    ) -> Result<String> {
        let reference = ImageReference::parse(image)?;
        if skip_registries.contains(&reference.registry) {
            debug!(registry = %reference.registry, "Registry is skipped, not resolving");
            return Ok(image.to_string());
        }
        if reference.is_pinned() {
            return Ok(image.to_string());
        }

        let mut authorization = Authorization::None;
        let mut response = self
            .manifest_request(Method::HEAD, &reference, &authorization)
            .await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            let challenge = response
                .headers()
                .get(WWW_AUTHENTICATE)
                .and_then(|v| v.to_str().ok())
                .and_then(Challenge::parse)
                .ok_or_else(|| {
                    RiffError::RegistryError(format!(
                        "{} answered 401 without a challenge",
                        reference.registry
                    ))
                })?;
            let credential = self.keychain.credential(auth, &reference.registry).await?;
            authorization = self.authorize(&challenge, &reference, &credential).await?;
            response = self
                .manifest_request(Method::HEAD, &reference, &authorization)
                .await?;
        }

        if !response.status().is_success() {
            return Err(RiffError::RegistryError(format!(
                "manifest {} answered {}",
                reference.manifest_url(),
                response.status()
            )));
        }

        let digest = self.digest_of(response, &reference, &authorization).await?;
        debug!(%digest, "Resolved image digest");
        Ok(reference.pinned(&digest))
    }
}
