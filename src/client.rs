use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::admissionregistration::v1::{
    MutatingWebhookConfiguration, ValidatingWebhookConfiguration,
};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Secret, Service};
use k8s_openapi::{ClusterResourceScope, NamespaceResourceScope};
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::core::ResourceExt;
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;

#[cfg(test)]
use mockall::automock;

use crate::controller::Error;
use crate::crd::Installation;
use crate::olm::{CatalogSourceConfig, InstallPlan, OperatorGroup, Subscription};

/// Cluster operations the orchestrator needs. Lookups return `None` for
/// absent objects; every other API failure is an `Error`.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>, Error>;
    async fn create_namespace(&self, namespace: &Namespace) -> Result<Namespace, Error>;
    async fn replace_namespace(&self, namespace: &Namespace) -> Result<Namespace, Error>;
    async fn delete_namespace(&self, name: &str) -> Result<(), Error>;
    async fn list_namespaces(&self) -> Result<Vec<Namespace>, Error>;

    async fn get_catalog_source_config(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<CatalogSourceConfig>, Error>;
    async fn create_catalog_source_config(
        &self,
        csc: &CatalogSourceConfig,
    ) -> Result<CatalogSourceConfig, Error>;
    async fn delete_catalog_source_config(&self, namespace: &str, name: &str) -> Result<(), Error>;
    async fn create_operator_group(&self, group: &OperatorGroup) -> Result<OperatorGroup, Error>;
    async fn get_subscription(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Subscription>, Error>;
    async fn create_subscription(&self, sub: &Subscription) -> Result<Subscription, Error>;
    /// JSON merge patch; fields the patch does not name are left untouched.
    async fn patch_subscription(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<Subscription, Error>;
    async fn get_install_plan(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<InstallPlan>, Error>;
    /// JSON merge patch; fields the patch does not name are left untouched.
    async fn patch_install_plan(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<InstallPlan, Error>;

    async fn get_config_map(&self, namespace: &str, name: &str)
        -> Result<Option<ConfigMap>, Error>;
    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<ConfigMap, Error>;
    async fn patch_config_map(
        &self,
        namespace: &str,
        name: &str,
        patch: &json_patch::Patch,
    ) -> Result<ConfigMap, Error>;
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error>;
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>, Error>;
    async fn create_service(&self, service: &Service) -> Result<Service, Error>;
    async fn replace_service(&self, service: &Service) -> Result<Service, Error>;
    async fn get_deployment(&self, namespace: &str, name: &str)
        -> Result<Option<Deployment>, Error>;

    async fn get_validating_webhook_configuration(
        &self,
        name: &str,
    ) -> Result<Option<ValidatingWebhookConfiguration>, Error>;
    async fn create_validating_webhook_configuration(
        &self,
        config: &ValidatingWebhookConfiguration,
    ) -> Result<ValidatingWebhookConfiguration, Error>;
    async fn replace_validating_webhook_configuration(
        &self,
        config: &ValidatingWebhookConfiguration,
    ) -> Result<ValidatingWebhookConfiguration, Error>;
    async fn get_mutating_webhook_configuration(
        &self,
        name: &str,
    ) -> Result<Option<MutatingWebhookConfiguration>, Error>;
    async fn create_mutating_webhook_configuration(
        &self,
        config: &MutatingWebhookConfiguration,
    ) -> Result<MutatingWebhookConfiguration, Error>;
    async fn replace_mutating_webhook_configuration(
        &self,
        config: &MutatingWebhookConfiguration,
    ) -> Result<MutatingWebhookConfiguration, Error>;

    async fn get_installation(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Installation>, Error>;
    async fn create_installation(&self, installation: &Installation)
        -> Result<Installation, Error>;
    /// Full replace, so a stale resource version is rejected with a conflict.
    async fn replace_installation(
        &self,
        installation: &Installation,
    ) -> Result<Installation, Error>;
    async fn replace_installation_status(
        &self,
        installation: &Installation,
    ) -> Result<Installation, Error>;
    async fn delete_installation(&self, namespace: &str, name: &str) -> Result<(), Error>;
}

enum Operation {
    Create,
    Update,
}

async fn perform_operation<T>(client: Client, operation: Operation, value: &T) -> Result<T, Error>
where
    T: Clone + DeserializeOwned + Debug + Serialize + ResourceExt,
    <T as kube::Resource>::DynamicType: Default,
    T: Resource<Scope = NamespaceResourceScope>,
{
    let pp = PostParams::default();
    let api: Api<T> = Api::namespaced(client, &value.namespace().unwrap_or("default".into()));

    match operation {
        Operation::Create => Ok(api.create(&pp, value).await?),
        Operation::Update => Ok(api.replace(&value.name_any(), &pp, value).await?),
    }
}

async fn perform_cluster_operation<T>(
    client: Client,
    operation: Operation,
    value: &T,
) -> Result<T, Error>
where
    T: Clone + DeserializeOwned + Debug + Serialize + ResourceExt,
    <T as kube::Resource>::DynamicType: Default,
    T: Resource<Scope = ClusterResourceScope>,
{
    let pp = PostParams::default();
    let api: Api<T> = Api::all(client);

    match operation {
        Operation::Create => Ok(api.create(&pp, value).await?),
        Operation::Update => Ok(api.replace(&value.name_any(), &pp, value).await?),
    }
}

async fn perform_get<T>(client: Client, namespace: &str, name: &str) -> Result<Option<T>, Error>
where
    T: Clone + DeserializeOwned + Debug,
    <T as kube::Resource>::DynamicType: Default,
    T: Resource<Scope = NamespaceResourceScope>,
{
    let api: Api<T> = Api::namespaced(client, namespace);
    Ok(api.get_opt(name).await?)
}

async fn perform_cluster_get<T>(client: Client, name: &str) -> Result<Option<T>, Error>
where
    T: Clone + DeserializeOwned + Debug,
    <T as kube::Resource>::DynamicType: Default,
    T: Resource<Scope = ClusterResourceScope>,
{
    let api: Api<T> = Api::all(client);
    Ok(api.get_opt(name).await?)
}

async fn perform_merge_patch<T>(
    client: Client,
    namespace: &str,
    name: &str,
    patch: &serde_json::Value,
) -> Result<T, Error>
where
    T: Clone + DeserializeOwned + Debug,
    <T as kube::Resource>::DynamicType: Default,
    T: Resource<Scope = NamespaceResourceScope>,
{
    let api: Api<T> = Api::namespaced(client, namespace);
    Ok(api
        .patch(name, &PatchParams::default(), &Patch::Merge(patch))
        .await?)
}

/// Deleting something already gone is success.
async fn perform_delete<T>(api: Api<T>, name: &str) -> Result<(), Error>
where
    T: Clone + DeserializeOwned + Debug,
{
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(response)) if response.code == 404 => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Client used for ad-hoc requests outside a controller's watch path;
/// every request is bounded by `timeout`.
pub async fn bounded_client(timeout: Duration) -> Result<Client, Error> {
    let mut config = kube::Config::infer().await?;
    config.connect_timeout = Some(timeout);
    config.read_timeout = Some(timeout);
    config.write_timeout = Some(timeout);
    Ok(Client::try_from(config)?)
}

#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    pub fn new(client: Client) -> KubeClusterClient {
        KubeClusterClient { client }
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>, Error> {
        perform_cluster_get(self.client.clone(), name).await
    }

    async fn create_namespace(&self, namespace: &Namespace) -> Result<Namespace, Error> {
        perform_cluster_operation(self.client.clone(), Operation::Create, namespace).await
    }

    async fn replace_namespace(&self, namespace: &Namespace) -> Result<Namespace, Error> {
        perform_cluster_operation(self.client.clone(), Operation::Update, namespace).await
    }

    async fn delete_namespace(&self, name: &str) -> Result<(), Error> {
        perform_delete(Api::<Namespace>::all(self.client.clone()), name).await
    }

    async fn list_namespaces(&self) -> Result<Vec<Namespace>, Error> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn get_catalog_source_config(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<CatalogSourceConfig>, Error> {
        perform_get(self.client.clone(), namespace, name).await
    }

    async fn create_catalog_source_config(
        &self,
        csc: &CatalogSourceConfig,
    ) -> Result<CatalogSourceConfig, Error> {
        perform_operation(self.client.clone(), Operation::Create, csc).await
    }

    async fn delete_catalog_source_config(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let api: Api<CatalogSourceConfig> = Api::namespaced(self.client.clone(), namespace);
        perform_delete(api, name).await
    }

    async fn create_operator_group(&self, group: &OperatorGroup) -> Result<OperatorGroup, Error> {
        perform_operation(self.client.clone(), Operation::Create, group).await
    }

    async fn get_subscription(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Subscription>, Error> {
        perform_get(self.client.clone(), namespace, name).await
    }

    async fn create_subscription(&self, sub: &Subscription) -> Result<Subscription, Error> {
        perform_operation(self.client.clone(), Operation::Create, sub).await
    }

    async fn patch_subscription(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<Subscription, Error> {
        perform_merge_patch(self.client.clone(), namespace, name, patch).await
    }

    async fn get_install_plan(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<InstallPlan>, Error> {
        perform_get(self.client.clone(), namespace, name).await
    }

    async fn patch_install_plan(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<InstallPlan, Error> {
        perform_merge_patch(self.client.clone(), namespace, name, patch).await
    }

    async fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ConfigMap>, Error> {
        perform_get(self.client.clone(), namespace, name).await
    }

    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<ConfigMap, Error> {
        perform_operation(self.client.clone(), Operation::Create, config_map).await
    }

    async fn patch_config_map(
        &self,
        namespace: &str,
        name: &str,
        patch: &json_patch::Patch,
    ) -> Result<ConfigMap, Error> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        let patch: Patch<()> = Patch::Json(patch.clone());
        Ok(api.patch(name, &PatchParams::default(), &patch).await?)
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error> {
        perform_get(self.client.clone(), namespace, name).await
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>, Error> {
        perform_get(self.client.clone(), namespace, name).await
    }

    async fn create_service(&self, service: &Service) -> Result<Service, Error> {
        perform_operation(self.client.clone(), Operation::Create, service).await
    }

    async fn replace_service(&self, service: &Service) -> Result<Service, Error> {
        perform_operation(self.client.clone(), Operation::Update, service).await
    }

    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Deployment>, Error> {
        perform_get(self.client.clone(), namespace, name).await
    }

    async fn get_validating_webhook_configuration(
        &self,
        name: &str,
    ) -> Result<Option<ValidatingWebhookConfiguration>, Error> {
        perform_cluster_get(self.client.clone(), name).await
    }

    async fn create_validating_webhook_configuration(
        &self,
        config: &ValidatingWebhookConfiguration,
    ) -> Result<ValidatingWebhookConfiguration, Error> {
        perform_cluster_operation(self.client.clone(), Operation::Create, config).await
    }

    async fn replace_validating_webhook_configuration(
        &self,
        config: &ValidatingWebhookConfiguration,
    ) -> Result<ValidatingWebhookConfiguration, Error> {
        perform_cluster_operation(self.client.clone(), Operation::Update, config).await
    }

    async fn get_mutating_webhook_configuration(
        &self,
        name: &str,
    ) -> Result<Option<MutatingWebhookConfiguration>, Error> {
        perform_cluster_get(self.client.clone(), name).await
    }

    async fn create_mutating_webhook_configuration(
        &self,
        config: &MutatingWebhookConfiguration,
    ) -> Result<MutatingWebhookConfiguration, Error> {
        perform_cluster_operation(self.client.clone(), Operation::Create, config).await
    }

    async fn replace_mutating_webhook_configuration(
        &self,
        config: &MutatingWebhookConfiguration,
    ) -> Result<MutatingWebhookConfiguration, Error> {
        perform_cluster_operation(self.client.clone(), Operation::Update, config).await
    }

    async fn get_installation(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Installation>, Error> {
        perform_get(self.client.clone(), namespace, name).await
    }

    async fn create_installation(
        &self,
        installation: &Installation,
    ) -> Result<Installation, Error> {
        perform_operation(self.client.clone(), Operation::Create, installation).await
    }

    async fn replace_installation(
        &self,
        installation: &Installation,
    ) -> Result<Installation, Error> {
        perform_operation(self.client.clone(), Operation::Update, installation).await
    }

    async fn replace_installation_status(
        &self,
        installation: &Installation,
    ) -> Result<Installation, Error> {
        let pp = PostParams::default();
        let api: Api<Installation> = Api::namespaced(
            self.client.clone(),
            &installation.namespace().unwrap_or("default".into()),
        );
        let data: Vec<u8> = serde_json::to_vec(installation)?;
        Ok(api
            .replace_status(&installation.name_any(), &pp, data)
            .await?)
    }

    async fn delete_installation(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let api: Api<Installation> = Api::namespaced(self.client.clone(), namespace);
        perform_delete(api, name).await
    }
}
