//! In-memory cluster used by scenario tests. Mirrors the API server's
//! not-found, already-exists and resource-version conflict answers.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use k8s_openapi::api::admissionregistration::v1::{
    MutatingWebhookConfiguration, ValidatingWebhookConfiguration,
};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, NamespaceStatus, Secret, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::core::{ErrorResponse, ResourceExt};
use kube::Resource;

use crate::client::ClusterClient;
use crate::controller::Error;
use crate::crd::Installation;
use crate::olm::{CatalogSourceConfig, InstallPlan, OperatorGroup, Subscription};

type Key = (String, String);

fn api_error(code: u16, reason: &str, message: String) -> Error {
    Error::Kube(kube::Error::Api(ErrorResponse {
        status: "Failure".into(),
        message,
        reason: reason.into(),
        code,
    }))
}

fn key_of<K: Resource>(obj: &K) -> Key {
    (obj.namespace().unwrap_or_default(), obj.name_any())
}

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

fn version_of<K: Resource>(obj: &K) -> u64 {
    obj.meta()
        .resource_version
        .as_deref()
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

fn insert_new<K: Resource + Clone>(map: &mut BTreeMap<Key, K>, obj: &K) -> Result<K, Error> {
    let k = key_of(obj);
    if map.contains_key(&k) {
        return Err(api_error(
            409,
            "AlreadyExists",
            format!("{} already exists", k.1),
        ));
    }
    let mut stored = obj.clone();
    stored.meta_mut().resource_version = Some("1".into());
    if stored.meta().uid.is_none() {
        stored.meta_mut().uid = Some(format!("uid-{}", k.1));
    }
    map.insert(k, stored.clone());
    Ok(stored)
}

fn replace_existing<K: Resource + Clone>(map: &mut BTreeMap<Key, K>, obj: &K) -> Result<K, Error> {
    let k = key_of(obj);
    let current = map
        .get(&k)
        .ok_or_else(|| api_error(404, "NotFound", format!("{} not found", k.1)))?;
    let current_version = version_of(current);
    if obj.meta().resource_version.is_some() && version_of(obj) != current_version {
        return Err(api_error(
            409,
            "Conflict",
            format!("{} has been modified", k.1),
        ));
    }
    let mut stored = obj.clone();
    stored.meta_mut().resource_version = Some((current_version + 1).to_string());
    stored.meta_mut().uid = current.meta().uid.clone();
    map.insert(k, stored.clone());
    Ok(stored)
}

fn merge_existing<K>(
    map: &mut BTreeMap<Key, K>,
    namespace: &str,
    name: &str,
    patch: &serde_json::Value,
) -> Result<K, Error>
where
    K: Resource + Clone + serde::Serialize + serde::de::DeserializeOwned,
{
    let k = key(namespace, name);
    let current = map
        .get(&k)
        .ok_or_else(|| api_error(404, "NotFound", format!("{} not found", name)))?;
    let next_version = version_of(current) + 1;
    let mut doc = serde_json::to_value(current)?;
    json_patch::merge(&mut doc, patch);
    let mut patched: K = serde_json::from_value(doc)?;
    patched.meta_mut().resource_version = Some(next_version.to_string());
    map.insert(k, patched.clone());
    Ok(patched)
}

#[derive(Default)]
pub struct State {
    pub namespaces: BTreeMap<Key, Namespace>,
    pub catalog_source_configs: BTreeMap<Key, CatalogSourceConfig>,
    pub operator_groups: BTreeMap<Key, OperatorGroup>,
    pub subscriptions: BTreeMap<Key, Subscription>,
    pub install_plans: BTreeMap<Key, InstallPlan>,
    pub config_maps: BTreeMap<Key, ConfigMap>,
    pub secrets: BTreeMap<Key, Secret>,
    pub services: BTreeMap<Key, Service>,
    pub deployments: BTreeMap<Key, Deployment>,
    pub validating: BTreeMap<Key, ValidatingWebhookConfiguration>,
    pub mutating: BTreeMap<Key, MutatingWebhookConfiguration>,
    pub installations: BTreeMap<Key, Installation>,
    /// Every successful write, as "<verb> <kind> <name>".
    pub writes: Vec<String>,
}

#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<State>,
}

impl FakeCluster {
    pub fn new() -> FakeCluster {
        FakeCluster::default()
    }

    pub fn state(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn writes(&self) -> Vec<String> {
        self.state().writes.clone()
    }

    pub fn writes_of(&self, kind: &str) -> usize {
        self.state()
            .writes
            .iter()
            .filter(|w| w.split(' ').nth(1) == Some(kind))
            .count()
    }

    pub fn set_namespace_phase(&self, name: &str, phase: &str) {
        if let Some(ns) = self.state().namespaces.get_mut(&key("", name)) {
            ns.status = Some(NamespaceStatus {
                phase: Some(phase.to_string()),
                ..Default::default()
            });
        }
    }

    pub fn seed<F: FnOnce(&mut State)>(&self, f: F) {
        f(&mut self.state())
    }

    fn record(&self, state: &mut State, verb: &str, kind: &str, name: &str) {
        state.writes.push(format!("{} {} {}", verb, kind, name));
    }
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>, Error> {
        Ok(self.state().namespaces.get(&key("", name)).cloned())
    }

    async fn create_namespace(&self, namespace: &Namespace) -> Result<Namespace, Error> {
        let mut state = self.state();
        let created = insert_new(&mut state.namespaces, namespace)?;
        self.record(&mut state, "create", "Namespace", &created.name_any());
        Ok(created)
    }

    async fn replace_namespace(&self, namespace: &Namespace) -> Result<Namespace, Error> {
        let mut state = self.state();
        let replaced = replace_existing(&mut state.namespaces, namespace)?;
        self.record(&mut state, "replace", "Namespace", &replaced.name_any());
        Ok(replaced)
    }

    async fn delete_namespace(&self, name: &str) -> Result<(), Error> {
        let mut state = self.state();
        if state.namespaces.remove(&key("", name)).is_some() {
            self.record(&mut state, "delete", "Namespace", name);
        }
        Ok(())
    }

    async fn list_namespaces(&self) -> Result<Vec<Namespace>, Error> {
        Ok(self.state().namespaces.values().cloned().collect())
    }

    async fn get_catalog_source_config(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<CatalogSourceConfig>, Error> {
        Ok(self
            .state()
            .catalog_source_configs
            .get(&key(namespace, name))
            .cloned())
    }

    async fn create_catalog_source_config(
        &self,
        csc: &CatalogSourceConfig,
    ) -> Result<CatalogSourceConfig, Error> {
        let mut state = self.state();
        let created = insert_new(&mut state.catalog_source_configs, csc)?;
        self.record(&mut state, "create", "CatalogSourceConfig", &created.name_any());
        Ok(created)
    }

    async fn delete_catalog_source_config(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let mut state = self.state();
        if state
            .catalog_source_configs
            .remove(&key(namespace, name))
            .is_some()
        {
            self.record(&mut state, "delete", "CatalogSourceConfig", name);
        }
        Ok(())
    }

    async fn create_operator_group(&self, group: &OperatorGroup) -> Result<OperatorGroup, Error> {
        let mut state = self.state();
        let created = insert_new(&mut state.operator_groups, group)?;
        self.record(&mut state, "create", "OperatorGroup", &created.name_any());
        Ok(created)
    }

    async fn get_subscription(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Subscription>, Error> {
        Ok(self.state().subscriptions.get(&key(namespace, name)).cloned())
    }

    async fn create_subscription(&self, sub: &Subscription) -> Result<Subscription, Error> {
        let mut state = self.state();
        let created = insert_new(&mut state.subscriptions, sub)?;
        self.record(&mut state, "create", "Subscription", &created.name_any());
        Ok(created)
    }

    async fn patch_subscription(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<Subscription, Error> {
        let mut state = self.state();
        let patched = merge_existing(&mut state.subscriptions, namespace, name, patch)?;
        self.record(&mut state, "patch", "Subscription", name);
        Ok(patched)
    }

    async fn get_install_plan(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<InstallPlan>, Error> {
        Ok(self.state().install_plans.get(&key(namespace, name)).cloned())
    }

    async fn patch_install_plan(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<InstallPlan, Error> {
        let mut state = self.state();
        let patched = merge_existing(&mut state.install_plans, namespace, name, patch)?;
        self.record(&mut state, "patch", "InstallPlan", name);
        Ok(patched)
    }

    async fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ConfigMap>, Error> {
        Ok(self.state().config_maps.get(&key(namespace, name)).cloned())
    }

    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<ConfigMap, Error> {
        let mut state = self.state();
        let created = insert_new(&mut state.config_maps, config_map)?;
        self.record(&mut state, "create", "ConfigMap", &created.name_any());
        Ok(created)
    }

    async fn patch_config_map(
        &self,
        namespace: &str,
        name: &str,
        patch: &json_patch::Patch,
    ) -> Result<ConfigMap, Error> {
        let mut state = self.state();
        let current = state
            .config_maps
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| api_error(404, "NotFound", format!("{} not found", name)))?;
        let mut doc = serde_json::to_value(&current)?;
        json_patch::patch(&mut doc, patch)
            .map_err(|e| api_error(422, "Invalid", e.to_string()))?;
        let patched: ConfigMap = serde_json::from_value(doc)?;
        state.config_maps.insert(key(namespace, name), patched.clone());
        self.record(&mut state, "patch", "ConfigMap", name);
        Ok(patched)
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error> {
        Ok(self.state().secrets.get(&key(namespace, name)).cloned())
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>, Error> {
        Ok(self.state().services.get(&key(namespace, name)).cloned())
    }

    async fn create_service(&self, service: &Service) -> Result<Service, Error> {
        let mut state = self.state();
        let created = insert_new(&mut state.services, service)?;
        self.record(&mut state, "create", "Service", &created.name_any());
        Ok(created)
    }

    async fn replace_service(&self, service: &Service) -> Result<Service, Error> {
        let mut state = self.state();
        let replaced = replace_existing(&mut state.services, service)?;
        self.record(&mut state, "replace", "Service", &replaced.name_any());
        Ok(replaced)
    }

    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Deployment>, Error> {
        Ok(self.state().deployments.get(&key(namespace, name)).cloned())
    }

    async fn get_validating_webhook_configuration(
        &self,
        name: &str,
    ) -> Result<Option<ValidatingWebhookConfiguration>, Error> {
        Ok(self.state().validating.get(&key("", name)).cloned())
    }

    async fn create_validating_webhook_configuration(
        &self,
        config: &ValidatingWebhookConfiguration,
    ) -> Result<ValidatingWebhookConfiguration, Error> {
        let mut state = self.state();
        let created = insert_new(&mut state.validating, config)?;
        self.record(
            &mut state,
            "create",
            "ValidatingWebhookConfiguration",
            &created.name_any(),
        );
        Ok(created)
    }

    async fn replace_validating_webhook_configuration(
        &self,
        config: &ValidatingWebhookConfiguration,
    ) -> Result<ValidatingWebhookConfiguration, Error> {
        let mut state = self.state();
        let replaced = replace_existing(&mut state.validating, config)?;
        self.record(
            &mut state,
            "replace",
            "ValidatingWebhookConfiguration",
            &replaced.name_any(),
        );
        Ok(replaced)
    }

    async fn get_mutating_webhook_configuration(
        &self,
        name: &str,
    ) -> Result<Option<MutatingWebhookConfiguration>, Error> {
        Ok(self.state().mutating.get(&key("", name)).cloned())
    }

    async fn create_mutating_webhook_configuration(
        &self,
        config: &MutatingWebhookConfiguration,
    ) -> Result<MutatingWebhookConfiguration, Error> {
        let mut state = self.state();
        let created = insert_new(&mut state.mutating, config)?;
        self.record(
            &mut state,
            "create",
            "MutatingWebhookConfiguration",
            &created.name_any(),
        );
        Ok(created)
    }

    async fn replace_mutating_webhook_configuration(
        &self,
        config: &MutatingWebhookConfiguration,
    ) -> Result<MutatingWebhookConfiguration, Error> {
        let mut state = self.state();
        let replaced = replace_existing(&mut state.mutating, config)?;
        self.record(
            &mut state,
            "replace",
            "MutatingWebhookConfiguration",
            &replaced.name_any(),
        );
        Ok(replaced)
    }

    async fn get_installation(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Installation>, Error> {
        Ok(self.state().installations.get(&key(namespace, name)).cloned())
    }

    async fn create_installation(
        &self,
        installation: &Installation,
    ) -> Result<Installation, Error> {
        let mut state = self.state();
        let created = insert_new(&mut state.installations, installation)?;
        self.record(&mut state, "create", "Installation", &created.name_any());
        Ok(created)
    }

    async fn replace_installation(
        &self,
        installation: &Installation,
    ) -> Result<Installation, Error> {
        let mut state = self.state();
        let k = key_of(installation);
        let status = state.installations.get(&k).and_then(|i| i.status.clone());
        let mut replaced = replace_existing(&mut state.installations, installation)?;
        replaced.status = status;
        if replaced.is_deleting() && replaced.finalizers().is_empty() {
            state.installations.remove(&k);
        } else {
            state.installations.insert(k, replaced.clone());
        }
        self.record(&mut state, "replace", "Installation", &replaced.name_any());
        Ok(replaced)
    }

    async fn replace_installation_status(
        &self,
        installation: &Installation,
    ) -> Result<Installation, Error> {
        let mut state = self.state();
        let k = key_of(installation);
        let mut current = state
            .installations
            .get(&k)
            .cloned()
            .ok_or_else(|| api_error(404, "NotFound", format!("{} not found", k.1)))?;
        current.status = installation.status.clone();
        let replaced = replace_existing(&mut state.installations, &current)?;
        self.record(&mut state, "status", "Installation", &replaced.name_any());
        Ok(replaced)
    }

    async fn delete_installation(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let mut state = self.state();
        let k = key(namespace, name);
        let Some(current) = state.installations.get_mut(&k) else {
            return Ok(());
        };
        if current.finalizers().is_empty() {
            state.installations.remove(&k);
        } else {
            current.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        }
        self.record(&mut state, "delete", "Installation", name);
        Ok(())
    }
}
