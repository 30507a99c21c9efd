// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use crate::conditions::{Condition, ConditionSet, ConditionStatus};
use crate::constants::conditions::{
    BUILD_CACHE_READY, BUILD_SUCCEEDED, READY, REASON_IMAGE_MISSING, REASON_NOT_OWNED,
};
use crate::constants::defaults;
use crate::types::Owner;
use k8s_openapi::api::core::v1::PersistentVolumeClaimStatus;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::CustomResource;
use serde::{Deserialize, Serialize};

pub const CONDITIONS: ConditionSet = ConditionSet::new(READY, &[BUILD_CACHE_READY, BUILD_SUCCEEDED]);

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[kube(group = "build.projectriff.io", version = "v1alpha1", kind = "FunctionBuild")]
#[kube(namespaced, status = "FunctionBuildStatus", shortname = "fnbuild")]
#[serde(rename_all = "camelCase")]
pub struct FunctionBuildSpec {
    /// Repository the built image is pushed to
    pub image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handler: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoker: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
    /// Size of the volume caching build layers between builds; no cache when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_size: Option<Quantity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_template: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    pub git: GitSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_path: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
pub struct GitSource {
    pub url: String,
    #[serde(default)]
    pub revision: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FunctionBuildStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_cache_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_image: Option<String>,
}

impl FunctionBuildSpec {
    pub fn set_defaults(&mut self) {
        if self.build_template.as_deref().unwrap_or_default().is_empty() {
            self.build_template = Some(defaults::BUILD_TEMPLATE.to_string());
        }
        if self.service_account_name.as_deref().unwrap_or_default().is_empty() {
            self.service_account_name = Some(defaults::BUILD_SERVICE_ACCOUNT.to_string());
        }
        if let Some(source) = self.source.as_mut() {
            if source.git.revision.is_empty() {
                source.git.revision = defaults::GIT_REVISION.to_string();
            }
        }
    }
}

impl FunctionBuildStatus {
    pub fn initialize_conditions(&mut self) {
        CONDITIONS.manage(&mut self.conditions).initialize();
    }

    pub fn is_ready(&self) -> bool {
        crate::conditions::find(&self.conditions, READY).is_some_and(Condition::is_true)
    }

    pub fn mark_build_cache_not_owned(&mut self, name: &str) {
        CONDITIONS.manage(&mut self.conditions).mark_false(
            BUILD_CACHE_READY,
            REASON_NOT_OWNED,
            &format!(
                "There is an existing PersistentVolumeClaim {name:?} that the FunctionBuild does not own."
            ),
        );
    }

    pub fn mark_build_cache_not_used(&mut self) {
        self.build_cache_name = None;
        CONDITIONS.manage(&mut self.conditions).mark_true(BUILD_CACHE_READY);
    }

    /// Map the claim phase onto `BuildCacheReady`
    pub fn propagate_build_cache_status(&mut self, pvc: Option<&PersistentVolumeClaimStatus>) {
        let mut manager = CONDITIONS.manage(&mut self.conditions);
        match pvc.and_then(|s| s.phase.as_deref()) {
            Some("Bound") => manager.mark_true(BUILD_CACHE_READY),
            Some("Lost") => manager.mark_false(BUILD_CACHE_READY, "Lost", "volume claim is lost"),
            Some("Pending") => {
                manager.mark_unknown(BUILD_CACHE_READY, "Pending", "volume claim is not yet bound")
            }
            _ => manager.mark_unknown(BUILD_CACHE_READY, "", ""),
        }
    }

    pub fn mark_build_not_owned(&mut self, name: &str) {
        CONDITIONS.manage(&mut self.conditions).mark_false(
            BUILD_SUCCEEDED,
            REASON_NOT_OWNED,
            &format!("There is an existing Build {name:?} that the FunctionBuild does not own."),
        );
    }

    pub fn propagate_build_status(&mut self, succeeded: Option<&Condition>) {
        CONDITIONS
            .manage(&mut self.conditions)
            .propagate(BUILD_SUCCEEDED, succeeded);
    }

    pub fn mark_image_missing(&mut self, message: &str) {
        CONDITIONS
            .manage(&mut self.conditions)
            .mark_false(BUILD_SUCCEEDED, REASON_IMAGE_MISSING, message);
    }

    pub fn condition_status(&self, type_: &str) -> Option<ConditionStatus> {
        crate::conditions::find(&self.conditions, type_).map(|c| c.status)
    }
}

impl Owner for FunctionBuild {
    type Status = FunctionBuildStatus;

    fn status(&self) -> Option<&FunctionBuildStatus> {
        self.status.as_ref()
    }

    fn status_mut(&mut self) -> &mut FunctionBuildStatus {
        self.status.get_or_insert_with(Default::default)
    }

    fn set_defaults(&mut self) {
        self.spec.set_defaults();
    }

    fn set_observed_generation(&mut self, generation: Option<i64>) {
        self.status_mut().observed_generation = generation;
    }

    fn is_ready(status: &FunctionBuildStatus) -> bool {
        status.is_ready()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pvc_status(phase: &str) -> PersistentVolumeClaimStatus {
        PersistentVolumeClaimStatus {
            phase: Some(phase.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_set_defaults_fills_template_and_service_account() {
        let mut spec = FunctionBuildSpec {
            image: "example.com/repo/fn".to_string(),
            source: Some(Source {
                git: GitSource {
                    url: "https://example.com/fn.git".to_string(),
                    revision: String::new(),
                },
                sub_path: None,
            }),
            ..Default::default()
        };

        spec.set_defaults();

        assert_eq!(spec.build_template.as_deref(), Some("riff-cnb"));
        assert_eq!(spec.service_account_name.as_deref(), Some("riff-build"));
        assert_eq!(spec.source.unwrap().git.revision, "master");
    }

    #[test]
    fn test_set_defaults_keeps_explicit_values() {
        let mut spec = FunctionBuildSpec {
            build_template: Some("custom".to_string()),
            service_account_name: Some("builder".to_string()),
            ..Default::default()
        };

        spec.set_defaults();

        assert_eq!(spec.build_template.as_deref(), Some("custom"));
        assert_eq!(spec.service_account_name.as_deref(), Some("builder"));
    }

    #[test]
    fn test_build_cache_phases() {
        let mut status = FunctionBuildStatus::default();
        status.initialize_conditions();

        status.propagate_build_cache_status(Some(&pvc_status("Pending")));
        assert_eq!(status.condition_status(BUILD_CACHE_READY), Some(ConditionStatus::Unknown));

        status.propagate_build_cache_status(Some(&pvc_status("Bound")));
        assert_eq!(status.condition_status(BUILD_CACHE_READY), Some(ConditionStatus::True));

        status.propagate_build_cache_status(Some(&pvc_status("Lost")));
        assert_eq!(status.condition_status(BUILD_CACHE_READY), Some(ConditionStatus::False));
        assert_eq!(status.condition_status(READY), Some(ConditionStatus::False));
    }

    #[test]
    fn test_ready_requires_cache_and_build() {
        let mut status = FunctionBuildStatus::default();
        status.initialize_conditions();
        status.mark_build_cache_not_used();
        assert!(!status.is_ready());

        status.propagate_build_status(Some(&Condition::new(
            "Succeeded",
            ConditionStatus::True,
        )));
        assert!(status.is_ready());
    }

    #[test]
    fn test_image_missing_breaks_readiness() {
        let mut status = FunctionBuildStatus::default();
        status.mark_build_cache_not_used();
        status.propagate_build_status(Some(&Condition::new("Succeeded", ConditionStatus::True)));

        status.mark_image_missing("Unable to fetch image");

        let ready = crate::conditions::find(&status.conditions, READY).unwrap();
        assert_eq!(ready.status, ConditionStatus::False);
        assert_eq!(ready.reason, "ImageMissing");
    }

    #[test]
    fn test_not_owned_messages() {
        let mut status = FunctionBuildStatus::default();
        status.initialize_conditions();
        status.mark_build_not_owned("hello-build");

        let ready = crate::conditions::find(&status.conditions, READY).unwrap();
        assert_eq!(ready.reason, "NotOwned");
        assert_eq!(
            ready.message,
            "There is an existing Build \"hello-build\" that the FunctionBuild does not own."
        );
    }
}
