// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! FunctionBuild reconciler - converges a build cache claim and a Knative
//! Build, then pins the built image to its digest.

use crate::config::Config;
use crate::constants::{labels, OPERATOR_NAME};
use crate::digest::{AuthContext, Keychain, RegistryResolver, Resolver};
use crate::error::{Result, RiffError};
use crate::kubernetes::{EventPublisher, KubeEventPublisher, KubeStore, ObjectStore};
use crate::reconcilers::driver::{self, OwnerReconciler};
use crate::sync::child::{merge_owned_entries, owned_entries_equal};
use crate::sync::{ChildSynchronizer, ChildTemplate};
use crate::types::function_build::FunctionBuild;
use crate::types::knative::{
    ArgumentSpec, Build, BuildSource, BuildSpec, GitSourceSpec, TemplateInstantiationSpec,
};
use crate::types::Owner;
use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::core::v1::{
    PersistentVolumeClaim, PersistentVolumeClaimSpec, PersistentVolumeClaimVolumeSource, Secret,
    ServiceAccount, Volume, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::runtime::controller::Config as ControllerConfig;
use kube::runtime::Controller;
use kube::{Api, Client, ResourceExt};
use kube_runtime::watcher::Config as WatcherConfig;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const CACHE_VOLUME: &str = "cache";
const BUILD_TEMPLATE_KIND: &str = "ClusterBuildTemplate";

pub fn build_cache_name(owner: &FunctionBuild) -> String {
    format!("{}-build-cache", owner.name_any())
}

pub fn build_name(owner: &FunctionBuild) -> String {
    format!("{}-build", owner.name_any())
}

fn child_labels(owner: &FunctionBuild) -> BTreeMap<String, String> {
    let mut labels = owner.labels().clone();
    labels.insert(labels::FUNCTION_BUILD.to_string(), owner.name_any());
    labels
}

fn selector(owner: &FunctionBuild) -> BTreeMap<String, String> {
    BTreeMap::from([(labels::FUNCTION_BUILD.to_string(), owner.name_any())])
}

/// Persistent volume caching build layers, present only when a cache size is set
struct BuildCacheTemplate;

impl ChildTemplate<FunctionBuild> for BuildCacheTemplate {
    type Child = PersistentVolumeClaim;

    fn selector(&self, owner: &FunctionBuild) -> BTreeMap<String, String> {
        selector(owner)
    }

    fn desired(&self, owner: &FunctionBuild) -> Result<Option<PersistentVolumeClaim>> {
        let Some(size) = owner.spec.cache_size.clone() else {
            return Ok(None);
        };
        Ok(Some(PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some(build_cache_name(owner)),
                labels: Some(child_labels(owner)),
                ..Default::default()
            },
            spec: Some(PersistentVolumeClaimSpec {
                access_modes: Some(vec!["ReadWriteOnce".to_string()]),
                resources: Some(VolumeResourceRequirements {
                    requests: Some(BTreeMap::from([("storage".to_string(), size)])),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }))
    }

    fn semantic_equals(&self, desired: &PersistentVolumeClaim, observed: &PersistentVolumeClaim) -> bool {
        let resources = |pvc: &PersistentVolumeClaim| pvc.spec.as_ref().and_then(|s| s.resources.clone());
        resources(desired) == resources(observed)
            && owned_entries_equal(desired.metadata.labels.as_ref(), observed.metadata.labels.as_ref(), &[])
    }

    fn merge(&self, desired: &PersistentVolumeClaim, observed: &mut PersistentVolumeClaim) {
        let resources = desired.spec.as_ref().and_then(|s| s.resources.clone());
        observed.spec.get_or_insert_with(Default::default).resources = resources;
        merge_owned_entries(desired.metadata.labels.as_ref(), &mut observed.metadata.labels, &[]);
    }
}

/// Knative Build running the function build template
struct BuildTemplate {
    /// Name of the cache claim mounted into the build, if any
    build_cache: Option<String>,
}

impl ChildTemplate<FunctionBuild> for BuildTemplate {
    type Child = Build;

    fn selector(&self, owner: &FunctionBuild) -> BTreeMap<String, String> {
        selector(owner)
    }

    fn desired(&self, owner: &FunctionBuild) -> Result<Option<Build>> {
        let spec = &owner.spec;
        let Some(source) = spec.source.as_ref() else {
            return Ok(None);
        };

        let argument = |name: &str, value: Option<&String>| ArgumentSpec {
            name: name.to_string(),
            value: value.cloned().unwrap_or_default(),
        };
        let mut arguments = vec![
            argument("IMAGE", Some(&spec.image)),
            argument("FUNCTION_ARTIFACT", spec.artifact.as_ref()),
            argument("FUNCTION_HANDLER", spec.handler.as_ref()),
            argument("FUNCTION_LANGUAGE", spec.invoker.as_ref()),
        ];
        let volumes = match &self.build_cache {
            Some(claim) => {
                arguments.push(argument("CACHE", Some(&CACHE_VOLUME.to_string())));
                vec![Volume {
                    name: CACHE_VOLUME.to_string(),
                    persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                        claim_name: claim.clone(),
                        read_only: None,
                    }),
                    ..Default::default()
                }]
            }
            None => vec![],
        };

        let mut build = Build::new(
            &build_name(owner),
            BuildSpec {
                service_account_name: spec.service_account_name.clone(),
                source: Some(BuildSource {
                    git: Some(GitSourceSpec {
                        url: source.git.url.clone(),
                        revision: source.git.revision.clone(),
                    }),
                    sub_path: source.sub_path.clone(),
                }),
                template: Some(TemplateInstantiationSpec {
                    name: spec.build_template.clone().unwrap_or_default(),
                    kind: Some(BUILD_TEMPLATE_KIND.to_string()),
                    arguments,
                }),
                volumes,
            },
        );
        build.metadata.labels = Some(child_labels(owner));
        Ok(Some(build))
    }

    fn semantic_equals(&self, desired: &Build, observed: &Build) -> bool {
        desired.spec == observed.spec
            && owned_entries_equal(desired.metadata.labels.as_ref(), observed.metadata.labels.as_ref(), &[])
    }

    fn merge(&self, desired: &Build, observed: &mut Build) {
        observed.spec = desired.spec.clone();
        merge_owned_entries(desired.metadata.labels.as_ref(), &mut observed.metadata.labels, &[]);
    }
}

pub struct FunctionBuildReconciler {
    client: Client,
    owners: Arc<dyn ObjectStore<FunctionBuild>>,
    caches: Arc<dyn ObjectStore<PersistentVolumeClaim>>,
    builds: Arc<dyn ObjectStore<Build>>,
    resolver: Arc<dyn Resolver>,
    events: Arc<dyn EventPublisher>,
    skip_registries: HashSet<String>,
    error_requeue: Duration,
    concurrency: u16,
}

impl FunctionBuildReconciler {
    pub fn new(client: Client, config: &Config) -> Result<Self> {
        let keychain = Keychain::new(
            Arc::new(KubeStore::<ServiceAccount>::new(client.clone())),
            Arc::new(KubeStore::<Secret>::new(client.clone())),
        );
        Ok(Self {
            owners: Arc::new(KubeStore::<FunctionBuild>::new(client.clone())),
            caches: Arc::new(KubeStore::<PersistentVolumeClaim>::new(client.clone())),
            builds: Arc::new(KubeStore::<Build>::new(client.clone())),
            resolver: Arc::new(RegistryResolver::new(keychain, config.registry_timeout)?),
            events: Arc::new(KubeEventPublisher::new(client.clone(), OPERATOR_NAME)),
            skip_registries: config.skip_registries.clone(),
            error_requeue: config.error_requeue,
            concurrency: config.concurrency,
            client,
        })
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let function_builds: Api<FunctionBuild> = Api::all(self.client.clone());
        let claims: Api<PersistentVolumeClaim> = Api::all(self.client.clone());
        let builds: Api<Build> = Api::all(self.client.clone());
        let config = ControllerConfig::default().concurrency(self.concurrency);

        Controller::new(function_builds, WatcherConfig::default())
            .owns(claims, WatcherConfig::default())
            .owns(builds, WatcherConfig::default())
            .with_config(config)
            .shutdown_on_signal()
            .run(
                driver::reconcile::<Self>,
                driver::error_policy::<Self>,
                Arc::new(self),
            )
            .for_each(|res| async move {
                match res {
                    Ok(o) => debug!("Reconciled function build: {}", o.0.name),
                    Err(e) => warn!("Reconciliation error: {:?}", e),
                }
            })
            .await;

        Ok(())
    }

    async fn resolve_image(&self, owner: &mut FunctionBuild) -> Result<()> {
        let image = owner.spec.image.clone();
        let auth = AuthContext {
            namespace: owner.namespace().unwrap_or_default(),
            service_account_name: owner.spec.service_account_name.clone().unwrap_or_default(),
        };
        match self.resolver.resolve(&image, &auth, &self.skip_registries).await {
            Ok(digest) => {
                debug!(%image, %digest, "Resolved function image");
                owner.status_mut().latest_image = Some(digest);
                Ok(())
            }
            Err(err) => {
                owner
                    .status_mut()
                    .mark_image_missing(&format!("Unable to fetch image {image:?}: {err}"));
                Err(err)
            }
        }
    }
}

#[async_trait]
impl OwnerReconciler for FunctionBuildReconciler {
    type Owner = FunctionBuild;

    fn owners(&self) -> &dyn ObjectStore<FunctionBuild> {
        self.owners.as_ref()
    }

    fn events(&self) -> &dyn EventPublisher {
        self.events.as_ref()
    }

    fn error_requeue(&self) -> Duration {
        self.error_requeue
    }

    async fn reconcile_owner(&self, owner: &mut FunctionBuild) -> Result<()> {
        owner.status_mut().initialize_conditions();

        let caches = ChildSynchronizer::new(self.caches.as_ref(), self.events.as_ref());
        let cache = match caches.converge(&*owner, &BuildCacheTemplate).await {
            Ok(synced) => synced.child,
            Err(err @ RiffError::NotOwned { .. }) => {
                let name = build_cache_name(owner);
                owner.status_mut().mark_build_cache_not_owned(&name);
                return Err(err);
            }
            Err(err) => return Err(err),
        };
        let status = owner.status_mut();
        match &cache {
            Some(claim) => {
                status.build_cache_name = Some(claim.name_any());
                status.propagate_build_cache_status(claim.status.as_ref());
            }
            None => status.mark_build_cache_not_used(),
        }

        let template = BuildTemplate {
            build_cache: cache.as_ref().map(|claim| claim.name_any()),
        };
        let builds = ChildSynchronizer::new(self.builds.as_ref(), self.events.as_ref());
        let build = match builds.converge(&*owner, &template).await {
            Ok(synced) => synced.child,
            Err(err @ RiffError::NotOwned { .. }) => {
                let name = build_name(owner);
                owner.status_mut().mark_build_not_owned(&name);
                return Err(err);
            }
            Err(err) => return Err(err),
        };
        let status = owner.status_mut();
        status.build_name = build.as_ref().map(|b| b.name_any());
        status.propagate_build_status(build.as_ref().and_then(|b| b.succeeded_condition()));

        if owner.status_mut().is_ready() {
            self.resolve_image(owner).await?;
        } else {
            debug!(function_build = %owner.name_any(), "Waiting for build to succeed");
        }
        Ok(())
    }
}
