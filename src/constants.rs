// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

/// Labels correlating children with their owner
pub mod labels {
    /// Set on every child of a FunctionBuild, value is the owner name
    pub const FUNCTION_BUILD: &str = "build.projectriff.io/functionBuild";
    /// Set on every child of a Deployer, value is the owner name
    pub const DEPLOYER: &str = "knative.projectriff.io/deployer";
    /// Knative visibility label, restricts a route to the cluster network
    pub const VISIBILITY: &str = "serving.knative.dev/visibility";
    pub const VISIBILITY_CLUSTER_LOCAL: &str = "cluster-local";
}

/// Annotation keys written onto children
pub mod annotations {
    pub const MIN_SCALE: &str = "autoscaling.knative.dev/minScale";
    pub const MAX_SCALE: &str = "autoscaling.knative.dev/maxScale";
}

/// Fields of a child the reconciler claims beyond the desired object's own keys.
///
/// Bump `VERSION` whenever the key set changes so that the change is visible
/// in review and release notes.
pub mod owned_fields {
    pub const VERSION: u32 = 1;
    /// Annotation keys on a Configuration that are removed when no longer desired
    pub const CONFIGURATION_ANNOTATIONS: &[&str] =
        &[super::annotations::MIN_SCALE, super::annotations::MAX_SCALE];
}

/// Condition types and reasons
pub mod conditions {
    pub const READY: &str = "Ready";
    pub const BUILD_CACHE_READY: &str = "BuildCacheReady";
    pub const BUILD_SUCCEEDED: &str = "BuildSucceeded";
    pub const CONFIGURATION_READY: &str = "ConfigurationReady";
    pub const ROUTE_READY: &str = "RouteReady";

    /// Child condition type reported by Knative builds
    pub const SUCCEEDED: &str = "Succeeded";

    pub const REASON_NOT_OWNED: &str = "NotOwned";
    pub const REASON_IMAGE_MISSING: &str = "ImageMissing";
}

/// Event reasons published on owners
pub mod reasons {
    pub const CREATED: &str = "Created";
    pub const DELETED: &str = "Deleted";
    pub const CREATION_FAILED: &str = "CreationFailed";
    pub const UPDATED: &str = "Updated";
    pub const UPDATE_FAILED: &str = "UpdateFailed";
    pub const READY: &str = "Ready";
}

/// The controller name reported on events
pub const OPERATOR_NAME: &str = "riff-controllers";

/// Defaults applied to owners before reconciling
pub mod defaults {
    pub const BUILD_TEMPLATE: &str = "riff-cnb";
    pub const BUILD_SERVICE_ACCOUNT: &str = "riff-build";
    pub const GIT_REVISION: &str = "master";
    pub const SKIP_REGISTRIES: &str = "ko.local,dev.local";
}

/// CRD polling configuration
pub mod crd {
    /// Initial polling interval in seconds when waiting for CRD
    pub const POLL_INTERVAL_SECS: u64 = 10;
    /// Maximum polling interval in seconds (exponential backoff cap)
    pub const POLL_MAX_INTERVAL_SECS: u64 = 60;
}
