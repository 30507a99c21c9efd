// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use anyhow::Result;
use kube::Client;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use riff_controllers::config::Config;
use riff_controllers::kubernetes::wait_for_crd;
use riff_controllers::reconcilers::{DeployerReconciler, FunctionBuildReconciler};
use riff_controllers::types::{Application, Build, BuildContainer, Configuration, Route};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting riff controllers");

    // Load configuration
    let config = Config::from_env()?;
    info!(
        "Configuration loaded: skip_registries={:?}, concurrency={}",
        config.skip_registries, config.concurrency
    );

    // Create Kubernetes client
    let client = Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    // Children are Knative kinds, wait for them before starting reconcilers
    info!("Waiting for Knative CRDs to become available...");
    wait_for_crd::<Configuration>(&client).await?;
    wait_for_crd::<Route>(&client).await?;
    wait_for_crd::<Build>(&client).await?;
    // Image sources a Deployer may reference
    wait_for_crd::<Application>(&client).await?;
    wait_for_crd::<BuildContainer>(&client).await?;

    let function_build_reconciler = FunctionBuildReconciler::new(client.clone(), &config)?;
    let deployer_reconciler = DeployerReconciler::new(client, &config);

    info!("Starting reconcilers...");

    tokio::try_join!(function_build_reconciler.run(), deployer_reconciler.run())?;

    // Reconcilers only return on shutdown
    warn!("All reconcilers stopped");
    Ok(())
}
