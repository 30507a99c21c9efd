// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Convergence of one kind of child object towards the state an owner desires.
//!
//! Each child kind plugs in through [`ChildTemplate`], which computes the
//! desired object and knows which of its fields the reconciler owns. The
//! [`ChildSynchronizer`] does the rest: listing by correlation label,
//! telling owned children from foreign ones, creating, updating only the
//! owned fields, and removing extras.

use crate::constants::reasons;
use crate::error::{Result, RiffError};
use crate::kubernetes::{EventPublisher, KubeObject, ObjectStore};
use crate::types::Owner;
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// How one child kind is derived from its owner.
pub trait ChildTemplate<O: Owner>: Send + Sync {
    type Child: KubeObject;

    /// Labels every child of `owner` carries
    fn selector(&self, owner: &O) -> BTreeMap<String, String>;

    /// The child `owner` asks for, or `None` when it should not exist.
    /// Either `metadata.name` or `metadata.generateName` is set; namespace and
    /// owner reference are filled in by the synchronizer.
    fn desired(&self, owner: &O) -> Result<Option<Self::Child>>;

    /// Compare only the fields the reconciler owns
    fn semantic_equals(&self, desired: &Self::Child, observed: &Self::Child) -> bool;

    /// Copy the owned fields of `desired` onto `observed`
    fn merge(&self, desired: &Self::Child, observed: &mut Self::Child);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    Unchanged,
    Created,
    Updated,
    Deleted,
    /// Not desired and nothing to remove
    Absent,
}

#[derive(Debug, Clone)]
pub struct Synced<K> {
    /// The canonical child as last observed, `None` when it should not exist
    pub child: Option<K>,
    pub action: SyncAction,
}

/// A child is owned iff its controller reference points at the owner's UID
pub fn is_controlled_by<K: Resource>(child: &K, owner_uid: &str) -> bool {
    child
        .meta()
        .owner_references
        .iter()
        .flatten()
        .any(|r| r.controller == Some(true) && r.uid == owner_uid)
}

fn owned_keys<'a>(
    desired: Option<&'a BTreeMap<String, String>>,
    extra_owned: &'a [&'a str],
) -> impl Iterator<Item = &'a str> {
    desired
        .into_iter()
        .flat_map(|m| m.keys().map(String::as_str))
        .chain(extra_owned.iter().copied())
}

/// Equality of a label or annotation map, restricted to the keys of
/// `desired` plus `extra_owned`. Other keys on `observed` are ignored.
pub fn owned_entries_equal(
    desired: Option<&BTreeMap<String, String>>,
    observed: Option<&BTreeMap<String, String>>,
    extra_owned: &[&str],
) -> bool {
    owned_keys(desired, extra_owned)
        .all(|key| desired.and_then(|m| m.get(key)) == observed.and_then(|m| m.get(key)))
}

/// Write the owned keys of `desired` onto `observed`; owned keys absent from
/// `desired` are removed, all other keys are kept.
pub fn merge_owned_entries(
    desired: Option<&BTreeMap<String, String>>,
    observed: &mut Option<BTreeMap<String, String>>,
    extra_owned: &[&str],
) {
    let target = observed.get_or_insert_with(BTreeMap::new);
    for key in owned_keys(desired, extra_owned) {
        match desired.and_then(|m| m.get(key)) {
            Some(value) => {
                target.insert(key.to_string(), value.clone());
            }
            None => {
                target.remove(key);
            }
        }
    }
}

fn describe<K: Resource<DynamicType = ()>>(obj: &K) -> String {
    format!("{} {:?}", K::kind(&()), obj.name_any())
}

fn creation_order<K: Resource>(a: &K, b: &K) -> std::cmp::Ordering {
    let key = |k: &K| (k.meta().creation_timestamp.as_ref().map(|t| t.0), k.meta().name.clone());
    key(a).cmp(&key(b))
}

/// Converges children of one kind through an [`ObjectStore`]
pub struct ChildSynchronizer<'a, K: KubeObject> {
    store: &'a dyn ObjectStore<K>,
    events: &'a dyn EventPublisher,
}

impl<'a, K: KubeObject> ChildSynchronizer<'a, K> {
    pub fn new(store: &'a dyn ObjectStore<K>, events: &'a dyn EventPublisher) -> Self {
        Self { store, events }
    }

    pub async fn converge<O, T>(&self, owner: &O, template: &T) -> Result<Synced<K>>
    where
        O: Owner,
        T: ChildTemplate<O, Child = K>,
    {
        let namespace = owner
            .namespace()
            .ok_or(RiffError::MissingObjectKey(".metadata.namespace"))?;
        let owner_uid = owner.uid().ok_or(RiffError::MissingObjectKey(".metadata.uid"))?;

        let desired = match template.desired(owner)? {
            Some(mut desired) => {
                let owner_ref = owner
                    .controller_owner_ref(&())
                    .ok_or(RiffError::MissingObjectKey(".metadata.uid"))?;
                let meta = desired.meta_mut();
                meta.namespace = Some(namespace.clone());
                meta.owner_references = Some(vec![owner_ref]);
                Some(desired)
            }
            None => None,
        };

        let listed = self.store.list(&namespace, &template.selector(owner)).await?;
        let (mut owned, foreign): (Vec<K>, Vec<K>) =
            listed.into_iter().partition(|child| is_controlled_by(child, &owner_uid));
        owned.sort_by(creation_order);

        let Some(desired) = desired else {
            let removed = !owned.is_empty();
            self.delete_all(owner, owned).await?;
            return Ok(Synced {
                child: None,
                action: if removed { SyncAction::Deleted } else { SyncAction::Absent },
            });
        };

        let canonical = match desired.meta().name.clone() {
            Some(name) => {
                if foreign.iter().any(|child| child.name_any() == name) {
                    return Err(not_owned(owner, &desired));
                }
                owned
                    .iter()
                    .position(|child| child.name_any() == name)
                    .map(|i| owned.remove(i))
            }
            None => owned.pop(),
        };

        self.delete_all(owner, owned).await?;

        match canonical {
            None => self.create(owner, &namespace, &owner_uid, template, &desired).await,
            Some(observed) => self.update::<O, T>(template, &desired, observed).await,
        }
    }

    /// Bring the owned fields of an existing child in line with `desired`
    async fn update<O, T>(&self, template: &T, desired: &K, observed: K) -> Result<Synced<K>>
    where
        O: Owner,
        T: ChildTemplate<O, Child = K>,
    {
        if template.semantic_equals(desired, &observed) {
            return Ok(Synced {
                child: Some(observed),
                action: SyncAction::Unchanged,
            });
        }
        let mut updated = observed;
        template.merge(desired, &mut updated);
        debug!(child = %describe(&updated), "Updating owned fields");
        let updated = self.store.update(&updated).await?;
        Ok(Synced {
            child: Some(updated),
            action: SyncAction::Updated,
        })
    }

    async fn create<O, T>(
        &self,
        owner: &O,
        namespace: &str,
        owner_uid: &str,
        template: &T,
        desired: &K,
    ) -> Result<Synced<K>>
    where
        O: Owner,
        T: ChildTemplate<O, Child = K>,
    {
        match self.store.create(namespace, desired).await {
            Ok(created) => {
                info!(owner = %describe(owner), child = %describe(&created), "Created child");
                self.events
                    .normal(
                        &owner.object_ref(&()),
                        reasons::CREATED,
                        format!("Created {}", describe(&created)),
                    )
                    .await;
                Ok(Synced {
                    child: Some(created),
                    action: SyncAction::Created,
                })
            }
            Err(err) if err.is_already_exists() => {
                let name = desired.name_any();
                match self.store.get(namespace, &name).await? {
                    // Owned but not listed, e.g. it lost the correlation label.
                    // Adopt it through the update path so labels are restored.
                    Some(existing) if is_controlled_by(&existing, owner_uid) => {
                        debug!(child = %describe(&existing), "Adopting existing child");
                        self.update::<O, T>(template, desired, existing).await
                    }
                    Some(_) => Err(not_owned(owner, desired)),
                    None => Err(err),
                }
            }
            Err(err) => {
                self.events
                    .warning(
                        &owner.object_ref(&()),
                        reasons::CREATION_FAILED,
                        format!("Failed to create {}: {}", K::kind(&()), err),
                    )
                    .await;
                Err(err)
            }
        }
    }

    /// Delete in order, stopping at the first failure
    async fn delete_all<O: Owner>(&self, owner: &O, children: Vec<K>) -> Result<()> {
        for child in children {
            if let Err(err) = self.store.delete(&child).await {
                warn!(child = %describe(&child), error = %err, "Failed to delete child");
                return Err(err);
            }
            info!(owner = %describe(owner), child = %describe(&child), "Deleted child");
            self.events
                .normal(
                    &owner.object_ref(&()),
                    reasons::DELETED,
                    format!("Deleted {}", describe(&child)),
                )
                .await;
        }
        Ok(())
    }
}

fn not_owned<O: Owner, K: KubeObject>(owner: &O, desired: &K) -> RiffError {
    RiffError::NotOwned {
        owner: describe(owner),
        kind: K::kind(&()).to_string(),
        name: desired.name_any(),
    }
}
