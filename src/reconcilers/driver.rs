// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! One reconcile cycle for one owner, shared by every controller.
//!
//! The driver fetches the owner fresh, skips deleted or terminating owners,
//! defaults an in-memory copy, lets the kind-specific reconciler converge its
//! children and fold their health into status, and persists status only
//! when it changed.

use crate::constants::reasons;
use crate::error::{Result, RiffError};
use crate::kubernetes::{EventPublisher, ObjectStore};
use crate::types::Owner;
use async_trait::async_trait;
use chrono::Utc;
use kube::runtime::controller::Action;
use kube::{Resource, ResourceExt};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// `namespace/name` of an owner
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn parse(key: &str) -> Result<Self> {
        match key.split_once('/') {
            Some((namespace, name)) if !namespace.is_empty() && !name.is_empty() && !name.contains('/') => {
                Ok(Self {
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                })
            }
            _ => Err(RiffError::InvalidKey(key.to_string())),
        }
    }

    pub fn from_resource<K: Resource>(obj: &K) -> Result<Self> {
        Ok(Self {
            namespace: obj
                .meta()
                .namespace
                .clone()
                .ok_or(RiffError::MissingObjectKey(".metadata.namespace"))?,
            name: obj
                .meta()
                .name
                .clone()
                .ok_or(RiffError::MissingObjectKey(".metadata.name"))?,
        })
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Kind-specific part of a reconcile cycle
#[async_trait]
pub trait OwnerReconciler: Send + Sync {
    type Owner: Owner;

    fn owners(&self) -> &dyn ObjectStore<Self::Owner>;

    fn events(&self) -> &dyn EventPublisher;

    /// Delay before a failed cycle is retried
    fn error_requeue(&self) -> Duration;

    /// Converge the children of a defaulted owner and record what was
    /// learned on its status. Status changes are kept even when an error
    /// is returned.
    async fn reconcile_owner(&self, owner: &mut Self::Owner) -> Result<()>;
}

/// Run one cycle for the owner at `key`
pub async fn reconcile_key<R: OwnerReconciler>(reconciler: &R, key: &ObjectKey) -> Result<()> {
    let kind = R::Owner::kind(&());
    let Some(original) = reconciler.owners().get(&key.namespace, &key.name).await? else {
        debug!(%key, "{} no longer exists", kind);
        return Ok(());
    };
    if original.meta().deletion_timestamp.is_some() {
        debug!(%key, "{} is being deleted", kind);
        return Ok(());
    }

    let mut owner = original.clone();
    owner.set_defaults();

    let outcome = reconciler.reconcile_owner(&mut owner).await;
    if outcome.is_ok() {
        let generation = owner.meta().generation;
        owner.set_observed_generation(generation);
    }

    if owner.status() == original.status() {
        debug!(%key, "Status unchanged");
        return outcome;
    }

    let regarding = original.object_ref(&());
    match reconciler.owners().update_status(&owner).await {
        Ok(updated) => {
            let was_ready = original.status().is_some_and(R::Owner::is_ready);
            let is_ready = updated.status().is_some_and(R::Owner::is_ready);
            if !was_ready && is_ready {
                let elapsed = original
                    .creation_timestamp()
                    .map(|created| (Utc::now() - created.0).num_seconds())
                    .unwrap_or_default();
                info!(%key, "{} became ready after {}s", kind, elapsed);
                reconciler
                    .events()
                    .normal(
                        &regarding,
                        reasons::READY,
                        format!("{} {:?} became ready after {}s", kind, key.name, elapsed),
                    )
                    .await;
            }
            if outcome.is_ok() {
                reconciler
                    .events()
                    .normal(&regarding, reasons::UPDATED, format!("Updated {} {:?}", kind, key.name))
                    .await;
            }
            outcome
        }
        Err(err) => {
            warn!(%key, error = %err, "Failed to update status");
            reconciler
                .events()
                .warning(
                    &regarding,
                    reasons::UPDATE_FAILED,
                    format!("Failed to update status for {} {:?}: {}", kind, key.name, err),
                )
                .await;
            // the cycle's own failure is the more useful one to report
            outcome.and(Err(err))
        }
    }
}

/// `kube::runtime::Controller` entry point
pub async fn reconcile<R: OwnerReconciler>(owner: Arc<R::Owner>, ctx: Arc<R>) -> Result<Action> {
    let key = ObjectKey::from_resource(owner.as_ref())?;
    reconcile_key(ctx.as_ref(), &key).await?;
    Ok(Action::await_change())
}

pub fn error_policy<R: OwnerReconciler>(owner: Arc<R::Owner>, error: &RiffError, ctx: Arc<R>) -> Action {
    match error {
        RiffError::NotOwned { .. } => debug!(owner = %owner.name_any(), "Reconciliation blocked: {}", error),
        _ => warn!(owner = %owner.name_any(), "Reconciliation error: {}", error),
    }
    Action::requeue(ctx.error_requeue())
}
