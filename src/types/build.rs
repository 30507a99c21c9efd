// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Build kinds a Deployer can take its image from. They are reconciled
//! elsewhere; only the latest image on their status is read here.

use crate::conditions::Condition;
use kube::CustomResource;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[kube(group = "build.projectriff.io", version = "v1alpha1", kind = "Application")]
#[kube(namespaced, status = "ImageStatus", shortname = "app")]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSpec {
    /// Repository the built application image is pushed to
    pub image: String,
}

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[kube(group = "build.projectriff.io", version = "v1alpha1", kind = "Container")]
// Root named apart from the core v1 Container it would otherwise shadow
#[kube(root = "BuildContainer", namespaced, status = "ImageStatus", shortname = "con")]
#[serde(rename_all = "camelCase")]
pub struct ContainerSpec {
    /// Image watched for new digests
    pub image: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImageStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_image: Option<String>,
}
