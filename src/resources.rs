use std::collections::BTreeMap;
use std::future::Future;

use k8s_openapi::api::core::v1::Namespace;
use kube::core::{ObjectMeta, ResourceExt};
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use crate::client::ClusterClient;
use crate::controller::Error;
use crate::crd::{Installation, StatusPhase, MANAGED_LABEL, OWNER_LABEL};
use crate::marketplace::{PackageManager, PackageSource, Target};
use crate::olm::{Approval, INSTALL_PLAN_FAILED};

const NAMESPACE_ACTIVE: &str = "Active";
const NAMESPACE_TERMINATING: &str = "Terminating";

/// Set the ownership labels on `labels`, returning whether anything changed.
pub fn prepare_labels(labels: &mut BTreeMap<String, String>, installation: &Installation) -> bool {
    let mut changed = false;
    for (key, value) in [
        (OWNER_LABEL, installation.owner_id()),
        (MANAGED_LABEL, "true".to_string()),
    ] {
        if labels.get(key) != Some(&value) {
            labels.insert(key.to_string(), value);
            changed = true;
        }
    }
    changed
}

pub fn is_owned_by<K: ResourceExt>(obj: &K, installation: &Installation) -> bool {
    obj.labels().get(OWNER_LABEL) == Some(&installation.owner_id())
}

fn namespace_phase(namespace: &Namespace) -> Option<&str> {
    namespace.status.as_ref().and_then(|s| s.phase.as_deref())
}

/// Bring a product namespace into existence, labelled as owned by
/// `installation`. Reports `AwaitingNamespace` until the namespace is
/// active.
#[instrument(skip(installation, client))]
pub async fn reconcile_namespace(
    name: &str,
    installation: &Installation,
    client: &dyn ClusterClient,
) -> Result<StatusPhase, Error> {
    let Some(mut namespace) = client.get_namespace(name).await? else {
        let mut labels = BTreeMap::new();
        prepare_labels(&mut labels, installation);
        let namespace = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(labels),
                ..Default::default()
            },
            ..Default::default()
        };
        match client.create_namespace(&namespace).await {
            Err(e) if e.is_already_exists() => debug!("Namespace {} already exists", name),
            Err(e) => return Err(e),
            Ok(_) => info!("Created namespace {}", name),
        }
        return Ok(StatusPhase::AwaitingNamespace);
    };

    if namespace.metadata.deletion_timestamp.is_some()
        || namespace_phase(&namespace) == Some(NAMESPACE_TERMINATING)
    {
        warn!("Namespace {} is terminating", name);
        return Ok(StatusPhase::AwaitingNamespace);
    }

    let labels = namespace.metadata.labels.get_or_insert_with(BTreeMap::new);
    if prepare_labels(labels, installation) {
        namespace = client.replace_namespace(&namespace).await?;
    }

    if namespace_phase(&namespace) == Some(NAMESPACE_ACTIVE) {
        Ok(StatusPhase::Completed)
    } else {
        Ok(StatusPhase::AwaitingNamespace)
    }
}

/// Remove a product namespace. Reports `InProgress` until the namespace is
/// gone; namespaces not owned by `installation` are left alone.
pub async fn remove_namespace(
    name: &str,
    installation: &Installation,
    client: &dyn ClusterClient,
) -> Result<StatusPhase, Error> {
    match client.get_namespace(name).await? {
        None => Ok(StatusPhase::Completed),
        Some(namespace) if !is_owned_by(&namespace, installation) => {
            warn!("Not removing namespace {} owned by someone else", name);
            Ok(StatusPhase::Completed)
        }
        Some(namespace) => {
            if namespace.metadata.deletion_timestamp.is_none() {
                info!("Deleting namespace {}", name);
                client.delete_namespace(name).await?;
            }
            Ok(StatusPhase::InProgress)
        }
    }
}

/// Drive a product's operator subscription.
///
/// `CreatingSubscription` until the subscription exists, `AwaitingOperator`
/// until its install plan is `Complete`, then `Completed`. Plans waiting for
/// manual approval are approved here.
#[instrument(skip(installation, client, source), fields(package = %target.package))]
pub async fn reconcile_subscription(
    installation: &Installation,
    source: &PackageSource,
    target: &Target,
    client: &dyn ClusterClient,
) -> Result<StatusPhase, Error> {
    let manager = PackageManager::new(client);

    let (plan, _sub) = match manager
        .get_subscription_install_plan(&target.package, &target.namespace)
        .await
    {
        Err(Error::SubscriptionNotFound { .. }) => {
            match manager
                .create_subscription(
                    installation,
                    source,
                    target,
                    &[target.namespace.clone()],
                    Approval::Manual,
                )
                .await
            {
                Err(Error::CatalogSourceNotReady(name)) => {
                    debug!("Catalog source config {} not ready yet", name);
                    return Ok(StatusPhase::CreatingSubscription);
                }
                Err(e) => return Err(e),
                Ok(()) => {}
            }
            let created = client
                .get_subscription(&target.namespace, &target.package)
                .await?;
            return Ok(match created {
                Some(_) => StatusPhase::AwaitingOperator,
                None => StatusPhase::CreatingSubscription,
            });
        }
        Err(Error::InstallPlanNotGenerated(_)) => {
            debug!("Install plan for {} not generated yet", target.package);
            return Ok(StatusPhase::AwaitingOperator);
        }
        Err(e) => return Err(e),
        Ok(found) => found,
    };

    let Some(plan) = plan else {
        return Ok(StatusPhase::AwaitingOperator);
    };

    if plan.phase() == INSTALL_PLAN_FAILED {
        return Err(Error::InstallPlanFailed(plan.name_any()));
    }

    if plan.is_complete() {
        return Ok(StatusPhase::Completed);
    }

    if plan.awaits_approval() {
        info!("Approving install plan {}", plan.name_any());
        let namespace = plan.namespace().unwrap_or_else(|| target.namespace.clone());
        client
            .patch_install_plan(&namespace, &plan.name_any(), &json!({"spec": {"approved": true}}))
            .await?;
    }

    Ok(StatusPhase::AwaitingOperator)
}

/// Keep `finalizer` on `installation` while it lives; once it is being
/// deleted, run `delete_fn` and drop the finalizer only after it reports
/// `Completed`.
///
/// `installation` is updated in place with the server's copy after every
/// write.
pub async fn reconcile_finalizer<F, Fut>(
    client: &dyn ClusterClient,
    installation: &mut Installation,
    finalizer: &str,
    delete_fn: F,
) -> Result<StatusPhase, Error>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<StatusPhase, Error>>,
{
    if !installation.is_deleting() {
        if !installation.has_finalizer(finalizer) {
            installation.finalizers_mut().push(finalizer.to_string());
            *installation = client.replace_installation(installation).await?;
            info!("Added finalizer {}", finalizer);
        }
        return Ok(StatusPhase::Completed);
    }

    if !installation.has_finalizer(finalizer) {
        return Ok(StatusPhase::Completed);
    }

    let phase = delete_fn().await?;
    if phase != StatusPhase::Completed {
        debug!("Cleanup for {} still {}", finalizer, phase);
        return Ok(phase);
    }

    installation.finalizers_mut().retain(|f| f != finalizer);
    *installation = client.replace_installation(installation).await?;
    info!("Removed finalizer {}", finalizer);

    Ok(StatusPhase::Completed)
}
