// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use crate::conditions::{self, Condition, ConditionSet};
use crate::constants::conditions::{CONFIGURATION_READY, READY, REASON_NOT_OWNED, ROUTE_READY};
use crate::types::knative::{Addressable, RouteStatus};
use crate::types::Owner;
use k8s_openapi::api::core::v1::{Container, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::CustomResource;
use serde::{Deserialize, Serialize};

pub const CONDITIONS: ConditionSet = ConditionSet::new(READY, &[CONFIGURATION_READY, ROUTE_READY]);

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[kube(group = "knative.projectriff.io", version = "v1alpha1", kind = "Deployer")]
#[kube(namespaced, status = "DeployerStatus")]
#[serde(rename_all = "camelCase")]
pub struct DeployerSpec {
    /// Where the image comes from when not set on the template
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build: Option<DeployerBuild>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<PodTemplateSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ingress_policy: Option<IngressPolicy>,
    #[serde(default, skip_serializing_if = "Scale::is_empty")]
    pub scale: Scale,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeployerBuild {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_build_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_ref: Option<String>,
}

/// Where a Deployer gets the image it runs
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageSource<'a> {
    Application(&'a str),
    FunctionBuild(&'a str),
    Container(&'a str),
    /// Image set directly on the template
    Image(&'a str),
}

impl ImageSource<'_> {
    /// Whether this source is the object of `kind` named `name`
    pub fn references(&self, kind: &str, name: &str) -> bool {
        match *self {
            ImageSource::Application(n) => kind == "Application" && n == name,
            ImageSource::FunctionBuild(n) => kind == "FunctionBuild" && n == name,
            ImageSource::Container(n) => kind == "Container" && n == name,
            ImageSource::Image(_) => false,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, schemars::JsonSchema)]
pub enum IngressPolicy {
    #[default]
    ClusterLocal,
    External,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
pub struct Scale {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<i32>,
}

impl Scale {
    pub fn is_empty(&self) -> bool {
        self.min.is_none() && self.max.is_none()
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeployerStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub configuration_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<Addressable>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl DeployerSpec {
    pub fn set_defaults(&mut self) {
        let template = self.template.get_or_insert_with(Default::default);
        let metadata = template.metadata.get_or_insert_with(ObjectMeta::default);
        metadata.labels.get_or_insert_with(Default::default);
        metadata.annotations.get_or_insert_with(Default::default);
        let pod = template.spec.get_or_insert_with(Default::default);
        if pod.containers.is_empty() {
            pod.containers.push(Container::default());
        }
        if self.ingress_policy.is_none() {
            self.ingress_policy = Some(IngressPolicy::ClusterLocal);
        }
    }

    /// Image set directly on the first container of the template, if any
    pub fn template_image(&self) -> Option<&str> {
        self.template
            .as_ref()
            .and_then(|t| t.spec.as_ref())
            .and_then(|s| s.containers.first())
            .and_then(|c| c.image.as_deref())
            .filter(|image| !image.is_empty())
    }

    /// The first of application, function build, container and template
    /// image that is set
    pub fn image_source(&self) -> Option<ImageSource<'_>> {
        fn non_empty(name: &Option<String>) -> Option<&str> {
            name.as_deref().filter(|n| !n.is_empty())
        }
        if let Some(build) = &self.build {
            if let Some(name) = non_empty(&build.application_ref) {
                return Some(ImageSource::Application(name));
            }
            if let Some(name) = non_empty(&build.function_build_ref) {
                return Some(ImageSource::FunctionBuild(name));
            }
            if let Some(name) = non_empty(&build.container_ref) {
                return Some(ImageSource::Container(name));
            }
        }
        self.template_image().map(ImageSource::Image)
    }
}

impl DeployerStatus {
    pub fn initialize_conditions(&mut self) {
        CONDITIONS.manage(&mut self.conditions).initialize();
    }

    pub fn is_ready(&self) -> bool {
        conditions::find(&self.conditions, READY).is_some_and(Condition::is_true)
    }

    pub fn mark_configuration_not_owned(&mut self, name: &str) {
        CONDITIONS.manage(&mut self.conditions).mark_false(
            CONFIGURATION_READY,
            REASON_NOT_OWNED,
            &format!("There is an existing Configuration {name:?} that the Deployer does not own."),
        );
    }

    pub fn propagate_configuration_status(&mut self, ready: Option<&Condition>) {
        CONDITIONS
            .manage(&mut self.conditions)
            .propagate(CONFIGURATION_READY, ready);
    }

    pub fn mark_route_not_owned(&mut self, name: &str) {
        CONDITIONS.manage(&mut self.conditions).mark_false(
            ROUTE_READY,
            REASON_NOT_OWNED,
            &format!("There is an existing Route {name:?} that the Deployer does not own."),
        );
    }

    /// Copy route readiness and its addresses
    pub fn propagate_route_status(&mut self, route: Option<&RouteStatus>) {
        let ready = route.and_then(|r| conditions::find(&r.conditions, READY));
        CONDITIONS.manage(&mut self.conditions).propagate(ROUTE_READY, ready);
        self.address = route.and_then(|r| r.address.clone());
        self.url = route.and_then(|r| r.url.clone());
    }
}

impl Owner for Deployer {
    type Status = DeployerStatus;

    fn status(&self) -> Option<&DeployerStatus> {
        self.status.as_ref()
    }

    fn status_mut(&mut self) -> &mut DeployerStatus {
        self.status.get_or_insert_with(Default::default)
    }

    fn set_defaults(&mut self) {
        self.spec.set_defaults();
    }

    fn set_observed_generation(&mut self, generation: Option<i64>) {
        self.status_mut().observed_generation = generation;
    }

    fn is_ready(status: &DeployerStatus) -> bool {
        status.is_ready()
    }
}
