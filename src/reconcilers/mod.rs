// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Kubernetes reconcilers that converge owners onto their children.

pub mod deployer;
pub mod driver;
pub mod function_build;

pub use deployer::DeployerReconciler;
pub use driver::{ObjectKey, OwnerReconciler};
pub use function_build::FunctionBuildReconciler;
