//! Drives the Installation resource: preflight, then each install stage in
//! order, or the uninstall stages once the Installation is being deleted.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use kube::core::{ObjectMeta, ResourceExt};
use kube::runtime::controller::{Action, Controller};
use kube::runtime::{watcher, Config};
use kube::{Api, Client};
use tracing::{error, info, instrument, warn};

use super::{backoff_for, log_results, Context, Error};
use crate::client::ClusterClient;
use crate::config::OperatorConfig;
use crate::crd::{
    Installation, InstallationSpec, InstallationStatus, PreflightStatus, ProductStatus,
    StageName, StageStatus, StatusPhase,
};
use crate::products::ProductPlugin;
use crate::resources::is_owned_by;

pub const IN_PROGRESS_REQUEUE: Duration = Duration::from_secs(10);
pub const COMPLETE_REQUEUE: Duration = Duration::from_secs(5 * 60);
pub const PREFLIGHT_REQUEUE: Duration = Duration::from_secs(10);
pub const COMPLETE_STAGE: &str = "complete";

const OPERATOR_VERSION: &str = env!("CARGO_PKG_VERSION");

fn stage_mut(status: &mut InstallationStatus, stage: StageName) -> &mut StageStatus {
    status
        .stages
        .entry(stage)
        .or_insert_with(|| StageStatus::new(stage))
}

fn warn_if_overdue(installation: &Installation, status: &InstallationStatus, sla: Duration) {
    if !status.version.is_empty() {
        return;
    }
    let Some(created) = installation.creation_timestamp() else {
        return;
    };
    if let Ok(elapsed) = (Utc::now() - created.0).to_std() {
        if elapsed > sla {
            warn!(
                "Installation {} still not complete after {} minutes",
                installation.name_any(),
                elapsed.as_secs() / 60
            );
        }
    }
}

/// Look for selected products already running in namespaces this
/// installation does not own. Returns whether installing may go ahead.
async fn preflight(
    installation: &Installation,
    status: &mut InstallationStatus,
    plugins: &[&dyn ProductPlugin],
    client: &dyn ClusterClient,
) -> Result<bool, Error> {
    if status.preflight_status == PreflightStatus::Success {
        return Ok(true);
    }

    for namespace in client.list_namespaces().await? {
        if is_owned_by(&namespace, installation) {
            continue;
        }
        let ns = namespace.name_any();

        let mut conflicts = Vec::new();
        for plugin in plugins {
            let Some(object) = plugin.preflight_object(&ns) else {
                continue;
            };
            if client
                .get_deployment(&object.namespace, &object.name)
                .await?
                .is_some()
            {
                conflicts.push(plugin.name().to_string());
            }
        }

        if !conflicts.is_empty() {
            let message = format!(
                "found conflicting packages: {}, in namespace: {}",
                conflicts.join(", "),
                ns
            );
            info!("{}", message);
            status.preflight_status = PreflightStatus::Fail;
            status.preflight_message = message;
            return Ok(false);
        }
    }

    status.preflight_status = PreflightStatus::Success;
    status.preflight_message = "preflight checks passed".into();
    Ok(true)
}

/// Reconcile every product of one stage, recording their status. The stage
/// is complete only when every product is.
async fn process_stage(
    installation: &mut Installation,
    status: &mut InstallationStatus,
    stage: StageName,
    plugins: &[&dyn ProductPlugin],
    client: &dyn ClusterClient,
    errors: &mut Vec<String>,
) -> StatusPhase {
    status.stage = stage.as_str().to_string();
    let mut incomplete = false;

    for plugin in plugins {
        let name = plugin.name();
        let recorded = stage_mut(status, stage).products.get(&name).cloned();
        let mut product = recorded
            .or_else(|| status.product(name).cloned())
            .unwrap_or_else(|| ProductStatus::new(name));

        match plugin.reconcile(installation, &mut product, client).await {
            Ok(StatusPhase::Completed) => {}
            Ok(phase) => {
                info!("Product {} is {}", name, phase);
                incomplete = true;
            }
            Err(e) => {
                warn!("Product {} failed: {}", name, e);
                errors.push(format!("failed installation of {}: {}", name, e));
                incomplete = true;
            }
        }

        stage_mut(status, stage).products.insert(name, product);
    }

    let phase = if incomplete {
        StatusPhase::InProgress
    } else {
        StatusPhase::Completed
    };
    stage_mut(status, stage).phase = phase;
    phase
}

async fn install(
    installation: &mut Installation,
    status: &mut InstallationStatus,
    ctx: &Context,
    errors: &mut Vec<String>,
) -> Result<Action, Error> {
    let client = ctx.client.as_ref();
    let selection = installation.spec.selected_products.clone();
    let selected = ctx.products.selected(&selection)?;

    if !preflight(installation, status, &selected, client).await? {
        return Ok(Action::requeue(PREFLIGHT_REQUEUE));
    }

    if status.version.is_empty() && status.to_version.is_empty() {
        status.to_version = OPERATOR_VERSION.to_string();
    }

    for stage in StageName::INSTALL {
        let plugins = ctx.products.for_stage(&selection, stage)?;
        if plugins.is_empty() {
            continue;
        }
        if process_stage(installation, status, stage, &plugins, client, errors).await
            != StatusPhase::Completed
        {
            return Ok(Action::requeue(IN_PROGRESS_REQUEUE));
        }
    }

    if !status.to_version.is_empty() {
        info!("Installation of {} complete", status.to_version);
        status.version = std::mem::take(&mut status.to_version);
    }
    status.stage = COMPLETE_STAGE.to_string();
    Ok(Action::requeue(COMPLETE_REQUEUE))
}

async fn uninstall(
    installation: &mut Installation,
    status: &mut InstallationStatus,
    ctx: &Context,
    errors: &mut Vec<String>,
) -> Result<Action, Error> {
    let client = ctx.client.as_ref();
    let selection = installation.spec.selected_products.clone();

    for stage in StageName::UNINSTALL {
        let plugins = ctx
            .products
            .for_stage(&selection, stage.install_counterpart())?;
        if plugins.is_empty() {
            continue;
        }
        if process_stage(installation, status, stage, &plugins, client, errors).await
            != StatusPhase::Completed
        {
            return Ok(Action::requeue(IN_PROGRESS_REQUEUE));
        }
    }

    info!("Uninstall of {} complete", installation.name_any());
    Ok(Action::await_change())
}

#[instrument(skip(installation, ctx), fields(name = %installation.name_any()))]
async fn reconcile(installation: Arc<Installation>, ctx: Arc<Context>) -> Result<Action, Error> {
    let client = ctx.client.as_ref();
    let namespace = installation
        .namespace()
        .unwrap_or_else(|| ctx.config.namespace.clone());

    let Some(mut current) = client
        .get_installation(&namespace, &installation.name_any())
        .await?
    else {
        return Ok(Action::await_change());
    };

    let mut status = current.status.clone().unwrap_or_default();
    warn_if_overdue(&current, &status, ctx.config.install_sla);

    let mut errors = Vec::new();
    let action = if current.is_deleting() {
        uninstall(&mut current, &mut status, &ctx, &mut errors).await?
    } else {
        install(&mut current, &mut status, &ctx, &mut errors).await?
    };
    status.last_error = errors.join(", ");

    current.status = Some(status);
    match client.replace_installation_status(&current).await {
        Err(e) if e.is_not_found() => {
            info!("Installation {} is gone", current.name_any());
            Ok(Action::await_change())
        }
        Err(e) if e.is_conflict() => {
            info!("Installation {} changed underneath us, retrying", current.name_any());
            Ok(Action::requeue(Duration::from_secs(1)))
        }
        Err(e) => Err(e),
        Ok(_) => Ok(action),
    }
}

fn error_policy(installation: Arc<Installation>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!("Installation {} failed: {}", installation.name_any(), error);
    backoff_for(error)
}

/// Create the Installation this operator manages if nobody has yet.
pub async fn ensure_installation(
    client: &dyn ClusterClient,
    config: &OperatorConfig,
) -> Result<Installation, Error> {
    if let Some(existing) = client
        .get_installation(&config.namespace, &config.installation_name)
        .await?
    {
        return Ok(existing);
    }

    let installation = Installation {
        metadata: ObjectMeta {
            name: Some(config.installation_name.clone()),
            namespace: Some(config.namespace.clone()),
            ..Default::default()
        },
        spec: InstallationSpec {
            namespace_prefix: config.namespace_prefix.clone(),
            selected_products: config.selected_products.clone(),
            self_signed_certs: false,
        },
        status: None,
    };

    match client.create_installation(&installation).await {
        Err(e) if e.is_already_exists() => client
            .get_installation(&config.namespace, &config.installation_name)
            .await?
            .ok_or_else(|| Error::ResourceNotReady(config.installation_name.clone())),
        Err(e) => Err(e),
        Ok(created) => {
            info!(
                "Created installation {}/{}",
                config.namespace, config.installation_name
            );
            Ok(created)
        }
    }
}

pub async fn run(client: Client, ctx: Arc<Context>) -> Result<(), Error> {
    let api: Api<Installation> = Api::namespaced(client, &ctx.config.namespace);

    let stream = Controller::new(api, watcher::Config::default())
        .with_config(Config::default().concurrency(2))
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx);
    log_results("installation", stream).await;

    Ok(())
}
