//! One-shot actions requested by labelling the operator namespace.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::Namespace;
use kube::core::ResourceExt;
use kube::runtime::controller::{Action, Controller};
use kube::runtime::{watcher, Config};
use kube::{Api, Client};
use serde_json::Value;
use tracing::{info, instrument, warn};

use super::{log_results, Context, Error};
use crate::client::ClusterClient;

pub const REQUEUE: Duration = Duration::from_secs(60);
pub const CIDR_CONFIG_MAP: &str = "cloud-resources-aws-strategies";
const NETWORK_KEY: &str = "_network";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelAction {
    /// Delete the Installation when the label value is "true".
    Uninstall,
    /// Seed the production CIDR block from the label value.
    PatchCidr,
}

/// Label key to action. Built once at startup.
pub struct LabelActions {
    actions: BTreeMap<&'static str, LabelAction>,
}

impl LabelActions {
    /// Actions honoured on the operator namespace.
    pub fn for_namespace() -> LabelActions {
        LabelActions {
            actions: BTreeMap::from([
                (
                    "api.openshift.com/addon-rhmi-operator-delete",
                    LabelAction::Uninstall,
                ),
                (
                    "api.openshift.com/addon-managed-api-service-delete",
                    LabelAction::Uninstall,
                ),
                ("cidr", LabelAction::PatchCidr),
            ]),
        }
    }

    /// Actions honoured on the installation's deletion ConfigMap.
    pub fn for_config_map() -> LabelActions {
        let mut actions = LabelActions::for_namespace();
        actions
            .actions
            .retain(|_, action| *action == LabelAction::Uninstall);
        actions
    }

    pub fn matching<'a>(
        &self,
        labels: &'a BTreeMap<String, String>,
    ) -> Vec<(LabelAction, &'a str)> {
        labels
            .iter()
            .filter_map(|(key, value)| {
                self.actions
                    .get(key.as_str())
                    .map(|action| (*action, value.as_str()))
            })
            .collect()
    }
}

async fn uninstall(value: &str, ctx: &Context) -> Result<(), Error> {
    if value != "true" {
        return Ok(());
    }
    info!("Uninstall label has been set");

    let config = &ctx.config;
    let Some(installation) = ctx
        .client
        .get_installation(&config.namespace, &config.installation_name)
        .await?
    else {
        return Ok(());
    };

    if !installation.is_deleting() {
        info!("Deleting installation {}", installation.name_any());
        ctx.client
            .delete_installation(&config.namespace, &config.installation_name)
            .await?;
    }
    Ok(())
}

/// Build the patch that sets the production CIDR block, or `None` when one
/// is already configured or there is no production strategy.
pub fn cidr_patch(network: &str, label_value: &str) -> Result<Option<json_patch::Patch>, Error> {
    let mut strategies: Value = serde_json::from_str(network)?;

    let Some(production) = strategies
        .get_mut("production")
        .and_then(Value::as_object_mut)
    else {
        return Ok(None);
    };
    let Some(create_strategy) = production
        .entry("createStrategy")
        .or_insert_with(|| Value::Object(Default::default()))
        .as_object_mut()
    else {
        return Ok(None);
    };

    let current = create_strategy
        .get("CidrBlock")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if !current.is_empty() {
        info!("Cidr value {} is already set, not updating", current);
        return Ok(None);
    }

    let cidr = label_value.replace('-', "/");
    info!("No cidr has been set yet, setting {} from namespace label", cidr);
    create_strategy.insert("CidrBlock".into(), Value::String(cidr));

    Ok(Some(json_patch::Patch(vec![
        json_patch::PatchOperation::Add(json_patch::AddOperation {
            path: format!("/data/{}", NETWORK_KEY),
            value: Value::String(serde_json::to_string(&strategies)?),
        }),
    ])))
}

async fn patch_cidr(value: &str, namespace: &str, client: &dyn ClusterClient) -> Result<(), Error> {
    let Some(config_map) = client.get_config_map(namespace, CIDR_CONFIG_MAP).await? else {
        return Err(Error::ResourceNotReady(format!(
            "config map {}/{}",
            namespace, CIDR_CONFIG_MAP
        )));
    };
    let network = config_map
        .data
        .as_ref()
        .and_then(|d| d.get(NETWORK_KEY))
        .cloned()
        .unwrap_or_default();

    if let Some(patch) = cidr_patch(&network, value)? {
        client
            .patch_config_map(namespace, CIDR_CONFIG_MAP, &patch)
            .await?;
    }
    Ok(())
}

async fn apply(action: LabelAction, value: &str, namespace: &str, ctx: &Context) -> Result<(), Error> {
    match action {
        LabelAction::Uninstall => uninstall(value, ctx).await,
        LabelAction::PatchCidr => patch_cidr(value, namespace, ctx.client.as_ref()).await,
    }
}

#[instrument(skip(namespace, ctx), fields(name = %namespace.name_any()))]
async fn reconcile(namespace: Arc<Namespace>, ctx: Arc<Context>) -> Result<Action, Error> {
    let name = namespace.name_any();
    if name != ctx.config.namespace {
        return Ok(Action::await_change());
    }
    info!("Reconciling namespace labels");

    if let Some(config_map) = ctx
        .client
        .get_config_map(&name, &ctx.config.installation_name)
        .await?
    {
        for (action, value) in LabelActions::for_config_map().matching(config_map.labels()) {
            apply(action, value, &name, &ctx).await?;
        }
    }

    for (action, value) in LabelActions::for_namespace().matching(namespace.labels()) {
        apply(action, value, &name, &ctx).await?;
    }

    Ok(Action::requeue(REQUEUE))
}

fn error_policy(namespace: Arc<Namespace>, error: &Error, _ctx: Arc<Context>) -> Action {
    warn!("Namespace label action on {} failed: {}", namespace.name_any(), error);
    Action::requeue(REQUEUE)
}

pub async fn run(client: Client, ctx: Arc<Context>) -> Result<(), Error> {
    let api: Api<Namespace> = Api::all(client);
    let selector = format!("metadata.name={}", ctx.config.namespace);

    let stream = Controller::new(api, watcher::Config::default().fields(&selector))
        .with_config(Config::default().concurrency(1))
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx);
    log_results("namespace-label", stream).await;

    Ok(())
}
