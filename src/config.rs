// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use crate::constants::defaults;
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::env;
use std::time::Duration;

/// Operator configuration loaded from environment variables
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Registries whose images are never resolved to a digest
    pub skip_registries: HashSet<String>,
    /// Delay before a failed reconcile cycle is retried
    pub error_requeue: Duration,
    /// Concurrent reconciles per controller
    pub concurrency: u16,
    pub registry_timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let skip_registries = lookup("DIGEST_SKIP_REGISTRIES")
            .unwrap_or_else(|| defaults::SKIP_REGISTRIES.to_string())
            .split(',')
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string)
            .collect();

        let error_requeue = lookup("ERROR_REQUEUE_SECS")
            .map(|v| v.parse::<u64>().context("ERROR_REQUEUE_SECS must be a number of seconds"))
            .transpose()?
            .unwrap_or(60);

        let concurrency = lookup("RECONCILE_CONCURRENCY")
            .map(|v| v.parse::<u16>().context("RECONCILE_CONCURRENCY must be a positive number"))
            .transpose()?
            .unwrap_or(4);
        anyhow::ensure!(concurrency > 0, "RECONCILE_CONCURRENCY must be a positive number");

        let registry_timeout = lookup("REGISTRY_TIMEOUT_SECS")
            .map(|v| v.parse::<u64>().context("REGISTRY_TIMEOUT_SECS must be a number of seconds"))
            .transpose()?
            .unwrap_or(30);

        Ok(Config {
            skip_registries,
            error_requeue: Duration::from_secs(error_requeue),
            concurrency,
            registry_timeout: Duration::from_secs(registry_timeout),
        })
    }
}
