// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RiffError {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Object is missing {0}")]
    MissingObjectKey(&'static str),

    #[error("Invalid resource key: {0}")]
    InvalidKey(String),

    #[error("{owner} does not own {kind} {name:?}")]
    NotOwned {
        owner: String,
        kind: String,
        name: String,
    },

    #[error("Image not available: {0}")]
    ImageNotAvailable(String),

    #[error("Invalid image reference: {0}")]
    InvalidImageReference(String),

    #[error("Registry credentials error: {0}")]
    CredentialsError(String),

    #[error("Registry error: {0}")]
    RegistryError(String),

    #[error("Registry request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RiffError>;

impl RiffError {
    fn api_status(&self) -> Option<(u16, &str)> {
        match self {
            RiffError::KubeError(kube::Error::Api(err)) => Some((err.code, err.reason.as_str())),
            _ => None,
        }
    }

    /// The object store answered 404
    pub fn is_not_found(&self) -> bool {
        matches!(self.api_status(), Some((404, _)))
    }

    /// An optimistic-concurrency precondition (resourceVersion or UID) failed
    pub fn is_conflict(&self) -> bool {
        matches!(self.api_status(), Some((409, reason)) if reason != "AlreadyExists")
    }

    /// A create collided with an existing object of the same name
    pub fn is_already_exists(&self) -> bool {
        matches!(self.api_status(), Some((409, "AlreadyExists")))
    }
}
