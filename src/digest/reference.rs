// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Parsing of `[registry/]repository[:tag][@digest]` image references.

use crate::error::{Result, RiffError};

pub const DEFAULT_REGISTRY: &str = "index.docker.io";
pub const DEFAULT_TAG: &str = "latest";
/// Host actually serving the registry API for Docker Hub
const DOCKER_HUB_API_HOST: &str = "registry-1.docker.io";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    pub registry: String,
    pub repository: String,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

impl ImageReference {
    pub fn parse(image: &str) -> Result<Self> {
        let image = image.trim();
        if image.is_empty() {
            return Err(invalid(image, "reference is empty"));
        }

        let (name, digest) = match image.split_once('@') {
            Some((name, digest)) => {
                validate_digest(digest).map_err(|reason| invalid(image, reason))?;
                (name, Some(digest.to_string()))
            }
            None => (image, None),
        };

        let (name, tag) = match name.rsplit_once(':') {
            Some((rest, tag)) if !tag.contains('/') => {
                validate_tag(tag).map_err(|reason| invalid(image, reason))?;
                (rest, Some(tag.to_string()))
            }
            _ => (name, None),
        };

        let (registry, repository) = match name.split_once('/') {
            Some((host, rest)) if is_registry_host(host) => (normalize_registry(host), rest.to_string()),
            _ => (DEFAULT_REGISTRY.to_string(), name.to_string()),
        };
        let repository = if registry == DEFAULT_REGISTRY && !repository.contains('/') {
            format!("library/{repository}")
        } else {
            repository
        };
        validate_repository(&repository).map_err(|reason| invalid(image, reason))?;

        Ok(Self {
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// Tag or digest to ask the registry for
    pub fn reference(&self) -> &str {
        self.digest
            .as_deref()
            .or(self.tag.as_deref())
            .unwrap_or(DEFAULT_TAG)
    }

    pub fn is_pinned(&self) -> bool {
        self.digest.is_some()
    }

    pub fn api_host(&self) -> &str {
        if self.registry == DEFAULT_REGISTRY {
            DOCKER_HUB_API_HOST
        } else {
            &self.registry
        }
    }

    /// Local registries are served over plain http
    pub fn scheme(&self) -> &'static str {
        let host = self
            .registry
            .rsplit_once(':')
            .map_or(self.registry.as_str(), |(host, _)| host);
        if host == "localhost" || host == "127.0.0.1" {
            "http"
        } else {
            "https"
        }
    }

    pub fn manifest_url(&self) -> String {
        format!(
            "{}://{}/v2/{}/manifests/{}",
            self.scheme(),
            self.api_host(),
            self.repository,
            self.reference()
        )
    }

    /// Immutable form of this reference pinned to `digest`
    pub fn pinned(&self, digest: &str) -> String {
        format!("{}/{}@{}", self.registry, self.repository, digest)
    }
}

/// The registry host of `image`, or `None` when it does not parse
pub fn registry_of(image: &str) -> Option<String> {
    ImageReference::parse(image).ok().map(|r| r.registry)
}

fn invalid(image: &str, reason: &str) -> RiffError {
    RiffError::InvalidImageReference(format!("{image:?}: {reason}"))
}

fn is_registry_host(component: &str) -> bool {
    component.contains('.') || component.contains(':') || component == "localhost"
}

fn normalize_registry(host: &str) -> String {
    match host {
        "docker.io" | "registry-1.docker.io" => DEFAULT_REGISTRY.to_string(),
        other => other.to_string(),
    }
}

fn validate_tag(tag: &str) -> std::result::Result<(), &'static str> {
    if tag.is_empty()
        || tag.len() > 128
        || !tag
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
    {
        return Err("invalid tag");
    }
    Ok(())
}

fn validate_repository(repository: &str) -> std::result::Result<(), &'static str> {
    for segment in repository.split('/') {
        if segment.is_empty()
            || !segment
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '.' | '-'))
        {
            return Err("invalid repository");
        }
    }
    Ok(())
}

fn validate_digest(digest: &str) -> std::result::Result<(), &'static str> {
    let Some(hex) = digest.strip_prefix("sha256:") else {
        return Err("unsupported digest algorithm");
    };
    if hex.len() != 64 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err("invalid digest");
    }
    Ok(())
}
