//! Converges the cluster side of admission webhooks: the serving Service,
//! the CA bundle request and one webhook configuration per descriptor.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use k8s_openapi::api::admissionregistration::v1::{
    MutatingWebhook, MutatingWebhookConfiguration, ServiceReference, ValidatingWebhook,
    ValidatingWebhookConfiguration, WebhookClientConfig,
};
use k8s_openapi::api::core::v1::{ConfigMap, Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use k8s_openapi::ByteString;
use kube::core::ResourceExt;
use tracing::{debug, info, instrument};

use super::registry::{WebhookDescriptor, WebhookRegistry};
use crate::client::ClusterClient;
use crate::controller::Error;
use crate::poll::{poll_until, DEFAULT_POLL_INTERVAL, DEFAULT_POLL_TIMEOUT};

pub const CA_CONFIG_MAP: &str = "rhmi-operator-ca";
pub const CA_BUNDLE_KEY: &str = "service-ca.crt";
pub const INJECT_CABUNDLE_ANNOTATION: &str = "service.beta.openshift.io/inject-cabundle";
pub const SERVING_CERT_ANNOTATION: &str = "service.beta.openshift.io/serving-cert-secret-name";
pub const SERVING_CERT_SECRET: &str = "rhmi-webhook-cert";
pub const SERVICE_NAME: &str = "rhmi-webhooks";
pub const SERVICE_PORT: i32 = 443;
const OPERATOR_SELECTOR: (&str, &str) = ("name", "rhmi-operator");
const ADMISSION_TIMEOUT_SECONDS: i32 = 30;

/// How far the CA bundle has progressed in the current reconcile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaInjection {
    NotRequested,
    Requested,
    Injected,
    Applied,
}

impl fmt::Display for CaInjection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CaInjection::NotRequested => "not requested",
            CaInjection::Requested => "requested",
            CaInjection::Injected => "injected",
            CaInjection::Applied => "applied",
        };
        f.write_str(s)
    }
}

pub struct WebhookManager<'a> {
    client: &'a dyn ClusterClient,
    registry: &'a WebhookRegistry,
    namespace: &'a str,
    target_port: u16,
    poll_interval: Duration,
    poll_timeout: Duration,
    state: CaInjection,
}

impl<'a> WebhookManager<'a> {
    pub fn new(
        client: &'a dyn ClusterClient,
        registry: &'a WebhookRegistry,
        namespace: &'a str,
        target_port: u16,
    ) -> WebhookManager<'a> {
        WebhookManager {
            client,
            registry,
            namespace,
            target_port,
            poll_interval: DEFAULT_POLL_INTERVAL,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            state: CaInjection::NotRequested,
        }
    }

    pub fn state(&self) -> CaInjection {
        self.state
    }

    #[instrument(skip(self), fields(namespace = %self.namespace))]
    pub async fn reconcile(&mut self) -> Result<(), Error> {
        self.state = CaInjection::NotRequested;
        reconcile_service(self.client, self.namespace, self.target_port).await?;

        self.request_ca_bundle().await?;
        self.state = CaInjection::Requested;

        let ca_bundle = self.wait_for_ca_bundle().await?;
        self.state = CaInjection::Injected;

        for descriptor in self.registry.descriptors() {
            if descriptor.strategy.is_mutating() {
                self.apply_mutating(descriptor, &ca_bundle).await?;
            } else {
                self.apply_validating(descriptor, &ca_bundle).await?;
            }
        }
        self.state = CaInjection::Applied;

        info!(
            "Webhook configurations applied for {} webhooks",
            self.registry.descriptors().len()
        );
        Ok(())
    }

    async fn request_ca_bundle(&self) -> Result<(), Error> {
        let config_map = ConfigMap {
            metadata: ObjectMeta {
                name: Some(CA_CONFIG_MAP.to_string()),
                namespace: Some(self.namespace.to_string()),
                annotations: Some(BTreeMap::from([(
                    INJECT_CABUNDLE_ANNOTATION.to_string(),
                    "true".to_string(),
                )])),
                ..Default::default()
            },
            ..Default::default()
        };

        match self.client.create_config_map(&config_map).await {
            Ok(_) => {
                debug!("Requested CA bundle injection into {}", CA_CONFIG_MAP);
                Ok(())
            }
            Err(e) if e.is_already_exists() => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn wait_for_ca_bundle(&self) -> Result<String, Error> {
        let client = self.client;
        let namespace = self.namespace;
        let found = poll_until(self.poll_interval, self.poll_timeout, || async move {
            let config_map = client.get_config_map(namespace, CA_CONFIG_MAP).await?;
            Ok::<_, Error>(
                config_map
                    .and_then(|cm| cm.data)
                    .and_then(|mut data| data.remove(CA_BUNDLE_KEY))
                    .filter(|bundle| !bundle.is_empty()),
            )
        })
        .await?;

        found.ok_or_else(|| {
            Error::Timeout(format!(
                "CA bundle injection into {}/{}",
                namespace, CA_CONFIG_MAP
            ))
        })
    }

    fn client_config(&self, descriptor: &WebhookDescriptor, ca_bundle: &str) -> WebhookClientConfig {
        WebhookClientConfig {
            ca_bundle: Some(ByteString(ca_bundle.as_bytes().to_vec())),
            service: Some(ServiceReference {
                name: SERVICE_NAME.to_string(),
                namespace: self.namespace.to_string(),
                path: Some(descriptor.strategy.path()),
                port: Some(SERVICE_PORT),
            }),
            url: None,
        }
    }

    async fn apply_validating(
        &self,
        descriptor: &WebhookDescriptor,
        ca_bundle: &str,
    ) -> Result<(), Error> {
        let name = descriptor.configuration_name();
        let mut desired = ValidatingWebhookConfiguration {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                ..Default::default()
            },
            webhooks: Some(vec![ValidatingWebhook {
                name: descriptor.entry_name(),
                admission_review_versions: admission_review_versions(),
                client_config: self.client_config(descriptor, ca_bundle),
                failure_policy: Some("Fail".to_string()),
                match_policy: Some("Exact".to_string()),
                rules: Some(vec![(&descriptor.rule).into()]),
                side_effects: "None".to_string(),
                timeout_seconds: Some(ADMISSION_TIMEOUT_SECONDS),
                ..Default::default()
            }]),
        };

        match self.client.get_validating_webhook_configuration(&name).await? {
            None => {
                self.client
                    .create_validating_webhook_configuration(&desired)
                    .await?;
                info!("Created validating webhook configuration {}", name);
            }
            Some(existing) => {
                desired.metadata.resource_version = existing.resource_version();
                self.client
                    .replace_validating_webhook_configuration(&desired)
                    .await?;
                debug!("Replaced validating webhook configuration {}", name);
            }
        }
        Ok(())
    }

    async fn apply_mutating(
        &self,
        descriptor: &WebhookDescriptor,
        ca_bundle: &str,
    ) -> Result<(), Error> {
        let name = descriptor.configuration_name();
        let mut desired = MutatingWebhookConfiguration {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                ..Default::default()
            },
            webhooks: Some(vec![MutatingWebhook {
                name: descriptor.entry_name(),
                admission_review_versions: admission_review_versions(),
                client_config: self.client_config(descriptor, ca_bundle),
                failure_policy: Some("Fail".to_string()),
                match_policy: Some("Exact".to_string()),
                rules: Some(vec![(&descriptor.rule).into()]),
                side_effects: "None".to_string(),
                timeout_seconds: Some(ADMISSION_TIMEOUT_SECONDS),
                ..Default::default()
            }]),
        };

        match self.client.get_mutating_webhook_configuration(&name).await? {
            None => {
                self.client
                    .create_mutating_webhook_configuration(&desired)
                    .await?;
                info!("Created mutating webhook configuration {}", name);
            }
            Some(existing) => {
                desired.metadata.resource_version = existing.resource_version();
                self.client
                    .replace_mutating_webhook_configuration(&desired)
                    .await?;
                debug!("Replaced mutating webhook configuration {}", name);
            }
        }
        Ok(())
    }
}

/// Create or converge the webhook Service. The platform only issues the
/// serving certificate once this Service carries its annotation.
pub async fn reconcile_service(
    client: &dyn ClusterClient,
    namespace: &str,
    target_port: u16,
) -> Result<(), Error> {
    let desired = webhook_service(namespace, target_port);
    let Some(mut existing) = client.get_service(namespace, SERVICE_NAME).await? else {
        match client.create_service(&desired).await {
            Err(e) if e.is_already_exists() => {}
            other => {
                other?;
                info!("Created webhook service {}", SERVICE_NAME);
            }
        }
        return Ok(());
    };

    let wanted_spec = desired.spec.unwrap_or_default();
    let mut spec = existing.spec.clone().unwrap_or_default();
    let annotations = existing.annotations_mut();
    let annotated =
        annotations.get(SERVING_CERT_ANNOTATION).map(String::as_str) == Some(SERVING_CERT_SECRET);
    if annotated && spec.ports == wanted_spec.ports && spec.selector == wanted_spec.selector {
        return Ok(());
    }

    annotations.insert(SERVING_CERT_ANNOTATION.into(), SERVING_CERT_SECRET.into());
    spec.ports = wanted_spec.ports;
    spec.selector = wanted_spec.selector;
    existing.spec = Some(spec);
    client.replace_service(&existing).await?;
    info!("Updated webhook service {}", SERVICE_NAME);
    Ok(())
}

fn admission_review_versions() -> Vec<String> {
    vec!["v1beta1".to_string(), "v1".to_string()]
}

fn webhook_service(namespace: &str, target_port: u16) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(SERVICE_NAME.to_string()),
            namespace: Some(namespace.to_string()),
            annotations: Some(BTreeMap::from([(
                SERVING_CERT_ANNOTATION.to_string(),
                SERVING_CERT_SECRET.to_string(),
            )])),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(BTreeMap::from([(
                OPERATOR_SELECTOR.0.to_string(),
                OPERATOR_SELECTOR.1.to_string(),
            )])),
            ports: Some(vec![ServicePort {
                name: Some("webhooks".to_string()),
                port: SERVICE_PORT,
                target_port: Some(IntOrString::Int(i32::from(target_port))),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}
