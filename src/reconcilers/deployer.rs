// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Deployer reconciler - runs a function image as a Knative Configuration
//! with a Route in front of it.

use crate::config::Config;
use crate::constants::{annotations, labels, owned_fields, OPERATOR_NAME};
use crate::error::{Result, RiffError};
use crate::kubernetes::{EventPublisher, KubeEventPublisher, KubeObject, KubeStore, ObjectStore};
use crate::reconcilers::driver::{self, OwnerReconciler};
use crate::sync::child::{merge_owned_entries, owned_entries_equal};
use crate::sync::{ChildSynchronizer, ChildTemplate};
use crate::types::deployer::{ImageSource, IngressPolicy};
use crate::types::knative::{ConfigurationSpec, RouteSpec, TrafficTarget};
use crate::types::{
    Application, BuildContainer, Configuration, Deployer, FunctionBuild, LatestImage, Owner, Route,
};
use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::runtime::controller::Config as ControllerConfig;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::Controller;
use kube::{Api, Client, Resource, ResourceExt};
use kube_runtime::watcher::Config as WatcherConfig;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

fn selector(owner: &Deployer) -> BTreeMap<String, String> {
    BTreeMap::from([(labels::DEPLOYER.to_string(), owner.name_any())])
}

fn child_labels(owner: &Deployer) -> BTreeMap<String, String> {
    let mut labels = owner.labels().clone();
    labels.extend(selector(owner));
    if owner.spec.ingress_policy.unwrap_or_default() == IngressPolicy::ClusterLocal {
        labels.insert(
            labels::VISIBILITY.to_string(),
            labels::VISIBILITY_CLUSTER_LOCAL.to_string(),
        );
    }
    labels
}

fn child_annotations(owner: &Deployer) -> BTreeMap<String, String> {
    let mut annotations = owner.annotations().clone();
    let scale = &owner.spec.scale;
    if let Some(min) = scale.min {
        annotations.insert(annotations::MIN_SCALE.to_string(), min.to_string());
    }
    if let Some(max) = scale.max {
        annotations.insert(annotations::MAX_SCALE.to_string(), max.to_string());
    }
    annotations
}

/// Deployers in the object's namespace that take their image from it
pub fn deployers_referencing<K>(deployers: &[Arc<Deployer>], referenced: &K) -> Vec<ObjectRef<Deployer>>
where
    K: Resource<DynamicType = ()>,
{
    let kind = K::kind(&());
    let namespace = referenced.namespace();
    let name = referenced.name_any();
    deployers
        .iter()
        .filter(|d| d.namespace() == namespace)
        .filter(|d| d.spec.image_source().is_some_and(|s| s.references(&kind, &name)))
        .map(|d| ObjectRef::from_obj(d.as_ref()))
        .collect()
}

/// Knative Configuration running `image`, one generation at a time
struct ConfigurationTemplate {
    image: String,
}

impl ChildTemplate<Deployer> for ConfigurationTemplate {
    type Child = Configuration;

    fn selector(&self, owner: &Deployer) -> BTreeMap<String, String> {
        selector(owner)
    }

    fn desired(&self, owner: &Deployer) -> Result<Option<Configuration>> {
        let labels = child_labels(owner);
        let annotations = child_annotations(owner);

        let mut template = owner.spec.template.clone().unwrap_or_default();
        let metadata = template.metadata.get_or_insert_with(ObjectMeta::default);
        metadata.labels = Some(labels.clone());
        metadata.annotations = Some(annotations.clone());
        let pod = template.spec.get_or_insert_with(Default::default);
        if pod.containers.is_empty() {
            pod.containers.push(Default::default());
        }
        pod.containers[0].image = Some(self.image.clone());

        Ok(Some(Configuration {
            metadata: ObjectMeta {
                generate_name: Some(format!("{}-deployer-", owner.name_any())),
                labels: Some(labels),
                annotations: Some(annotations),
                ..Default::default()
            },
            spec: ConfigurationSpec { template },
            status: None,
        }))
    }

    fn semantic_equals(&self, desired: &Configuration, observed: &Configuration) -> bool {
        desired.spec == observed.spec
            && owned_entries_equal(desired.metadata.labels.as_ref(), observed.metadata.labels.as_ref(), &[])
            && owned_entries_equal(
                desired.metadata.annotations.as_ref(),
                observed.metadata.annotations.as_ref(),
                owned_fields::CONFIGURATION_ANNOTATIONS,
            )
    }

    fn merge(&self, desired: &Configuration, observed: &mut Configuration) {
        observed.spec = desired.spec.clone();
        merge_owned_entries(desired.metadata.labels.as_ref(), &mut observed.metadata.labels, &[]);
        merge_owned_entries(
            desired.metadata.annotations.as_ref(),
            &mut observed.metadata.annotations,
            owned_fields::CONFIGURATION_ANNOTATIONS,
        );
    }
}

/// Knative Route named after the owner, sending all traffic to one Configuration
struct RouteTemplate {
    configuration_name: String,
}

impl ChildTemplate<Deployer> for RouteTemplate {
    type Child = Route;

    fn selector(&self, owner: &Deployer) -> BTreeMap<String, String> {
        selector(owner)
    }

    fn desired(&self, owner: &Deployer) -> Result<Option<Route>> {
        let mut route = Route::new(
            &owner.name_any(),
            RouteSpec {
                traffic: vec![TrafficTarget {
                    configuration_name: Some(self.configuration_name.clone()),
                    percent: Some(100),
                    ..Default::default()
                }],
            },
        );
        route.metadata.labels = Some(child_labels(owner));
        Ok(Some(route))
    }

    fn semantic_equals(&self, desired: &Route, observed: &Route) -> bool {
        desired.spec == observed.spec
            && owned_entries_equal(desired.metadata.labels.as_ref(), observed.metadata.labels.as_ref(), &[])
    }

    fn merge(&self, desired: &Route, observed: &mut Route) {
        observed.spec = desired.spec.clone();
        merge_owned_entries(desired.metadata.labels.as_ref(), &mut observed.metadata.labels, &[]);
    }
}

pub struct DeployerReconciler {
    client: Client,
    owners: Arc<dyn ObjectStore<Deployer>>,
    applications: Arc<dyn ObjectStore<Application>>,
    function_builds: Arc<dyn ObjectStore<FunctionBuild>>,
    containers: Arc<dyn ObjectStore<BuildContainer>>,
    configurations: Arc<dyn ObjectStore<Configuration>>,
    routes: Arc<dyn ObjectStore<Route>>,
    events: Arc<dyn EventPublisher>,
    error_requeue: Duration,
    concurrency: u16,
}

impl DeployerReconciler {
    pub fn new(client: Client, config: &Config) -> Self {
        Self {
            owners: Arc::new(KubeStore::<Deployer>::new(client.clone())),
            applications: Arc::new(KubeStore::<Application>::new(client.clone())),
            function_builds: Arc::new(KubeStore::<FunctionBuild>::new(client.clone())),
            containers: Arc::new(KubeStore::<BuildContainer>::new(client.clone())),
            configurations: Arc::new(KubeStore::<Configuration>::new(client.clone())),
            routes: Arc::new(KubeStore::<Route>::new(client.clone())),
            events: Arc::new(KubeEventPublisher::new(client.clone(), OPERATOR_NAME)),
            error_requeue: config.error_requeue,
            concurrency: config.concurrency,
            client,
        }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let deployers: Api<Deployer> = Api::all(self.client.clone());
        let configurations: Api<Configuration> = Api::all(self.client.clone());
        let routes: Api<Route> = Api::all(self.client.clone());
        let applications: Api<Application> = Api::all(self.client.clone());
        let function_builds: Api<FunctionBuild> = Api::all(self.client.clone());
        let containers: Api<BuildContainer> = Api::all(self.client.clone());
        let config = ControllerConfig::default().concurrency(self.concurrency);

        let controller = Controller::new(deployers, WatcherConfig::default());
        let (by_application, by_build, by_container) =
            (controller.store(), controller.store(), controller.store());

        controller
            .owns(configurations, WatcherConfig::default())
            .owns(routes, WatcherConfig::default())
            // a new latest image on a referenced object rolls out to the Deployers using it
            .watches(applications, WatcherConfig::default(), move |application| {
                deployers_referencing(&by_application.state(), &application)
            })
            .watches(function_builds, WatcherConfig::default(), move |build| {
                deployers_referencing(&by_build.state(), &build)
            })
            .watches(containers, WatcherConfig::default(), move |container| {
                deployers_referencing(&by_container.state(), &container)
            })
            .with_config(config)
            .shutdown_on_signal()
            .run(
                driver::reconcile::<Self>,
                driver::error_policy::<Self>,
                Arc::new(self),
            )
            .for_each(|res| async move {
                match res {
                    Ok(o) => debug!("Reconciled deployer: {}", o.0.name),
                    Err(e) => warn!("Reconciliation error: {:?}", e),
                }
            })
            .await;

        Ok(())
    }

    /// The image to run, `None` while the referenced object does not exist
    async fn resolve_image(&self, owner: &Deployer) -> Result<Option<String>> {
        let namespace = owner.namespace().unwrap_or_default();
        match owner.spec.image_source() {
            Some(ImageSource::Application(name)) => {
                referenced_image(self.applications.as_ref(), &namespace, name).await
            }
            Some(ImageSource::FunctionBuild(name)) => {
                referenced_image(self.function_builds.as_ref(), &namespace, name).await
            }
            Some(ImageSource::Container(name)) => {
                referenced_image(self.containers.as_ref(), &namespace, name).await
            }
            Some(ImageSource::Image(image)) => Ok(Some(image.to_string())),
            None => Err(RiffError::ImageNotAvailable(format!(
                "Deployer {:?} names neither a build reference nor an image",
                owner.name_any()
            ))),
        }
    }
}

/// Latest image of the named object; `None` when it does not exist
async fn referenced_image<K>(store: &dyn ObjectStore<K>, namespace: &str, name: &str) -> Result<Option<String>>
where
    K: KubeObject + LatestImage,
{
    let kind = K::kind(&());
    let Some(referenced) = store.get(namespace, name).await? else {
        debug!(%kind, %name, "Referenced image source not found");
        return Ok(None);
    };
    referenced
        .latest_image()
        .map(|image| Some(image.to_string()))
        .ok_or_else(|| RiffError::ImageNotAvailable(format!("{kind} {name:?} has no latest image")))
}

#[async_trait]
impl OwnerReconciler for DeployerReconciler {
    type Owner = Deployer;

    fn owners(&self) -> &dyn ObjectStore<Deployer> {
        self.owners.as_ref()
    }

    fn events(&self) -> &dyn EventPublisher {
        self.events.as_ref()
    }

    fn error_requeue(&self) -> Duration {
        self.error_requeue
    }

    async fn reconcile_owner(&self, owner: &mut Deployer) -> Result<()> {
        owner.status_mut().initialize_conditions();

        let Some(image) = self.resolve_image(owner).await? else {
            return Ok(());
        };
        owner.status_mut().latest_image = Some(image.clone());

        let configurations = ChildSynchronizer::new(self.configurations.as_ref(), self.events.as_ref());
        let configuration = match configurations.converge(&*owner, &ConfigurationTemplate { image }).await {
            Ok(synced) => synced.child,
            Err(err) => {
                if let RiffError::NotOwned { name, .. } = &err {
                    owner.status_mut().mark_configuration_not_owned(name);
                }
                return Err(err);
            }
        };
        let status = owner.status_mut();
        status.configuration_ref = configuration.as_ref().map(|c| c.name_any());
        status.propagate_configuration_status(configuration.as_ref().and_then(|c| c.ready_condition()));
        let Some(configuration_name) = status.configuration_ref.clone() else {
            return Ok(());
        };

        let routes = ChildSynchronizer::new(self.routes.as_ref(), self.events.as_ref());
        let route = match routes.converge(&*owner, &RouteTemplate { configuration_name }).await {
            Ok(synced) => synced.child,
            Err(err) => {
                if let RiffError::NotOwned { name, .. } = &err {
                    owner.status_mut().mark_route_not_owned(name);
                }
                return Err(err);
            }
        };
        let status = owner.status_mut();
        status.route_ref = route.as_ref().map(|r| r.name_any());
        status.propagate_route_status(route.as_ref().and_then(|r| r.status.as_ref()));

        Ok(())
    }
}
