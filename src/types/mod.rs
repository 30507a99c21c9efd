// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Owner kinds reconciled by this operator and the third-party kinds they create.

pub mod build;
pub mod deployer;
pub mod function_build;
pub mod knative;

pub use build::{Application, BuildContainer};
pub use deployer::{Deployer, DeployerSpec, DeployerStatus};
pub use function_build::{FunctionBuild, FunctionBuildSpec, FunctionBuildStatus};
pub use knative::{Build, Configuration, Route};

use crate::kubernetes::KubeObject;
use std::fmt::Debug;

/// A user-declared resource whose spec drives the synthesis of children.
///
/// The status is reconciler-owned: it is only ever written through
/// [`crate::kubernetes::ObjectStore::update_status`].
pub trait Owner: KubeObject {
    type Status: Clone + Debug + Default + PartialEq + Send + Sync;

    fn status(&self) -> Option<&Self::Status>;

    /// Status of the object, created empty when absent
    fn status_mut(&mut self) -> &mut Self::Status;

    /// Fill in structural defaults on the in-memory copy
    fn set_defaults(&mut self);

    fn set_observed_generation(&mut self, generation: Option<i64>);

    fn is_ready(status: &Self::Status) -> bool;
}

/// A kind whose status names the most recent image it produced
pub trait LatestImage {
    /// `None` until an image was produced; an empty value counts as none
    fn latest_image(&self) -> Option<&str>;
}

impl LatestImage for FunctionBuild {
    fn latest_image(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.latest_image.as_deref())
            .filter(|image| !image.is_empty())
    }
}

impl LatestImage for Application {
    fn latest_image(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.latest_image.as_deref())
            .filter(|image| !image.is_empty())
    }
}

impl LatestImage for BuildContainer {
    fn latest_image(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.latest_image.as_deref())
            .filter(|image| !image.is_empty())
    }
}
