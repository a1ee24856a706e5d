use std::collections::BTreeMap;

use kube::core::{ObjectMeta, Resource, ResourceExt};
use tracing::{debug, info};

use crate::client::ClusterClient;
use crate::controller::Error;
use crate::crd::{Installation, OWNER_LABEL};
use crate::olm::{
    Approval, CatalogSourceConfig, CatalogSourceConfigSpec, InstallPlan, OperatorGroup,
    OperatorGroupSpec, Subscription, SubscriptionSpec, MARKETPLACE_NAMESPACE,
};

/// Where catalog entries for a product's package are published.
#[derive(Debug, Clone, PartialEq)]
pub struct PackageSource {
    pub namespace: String,
    pub display_name: String,
    pub publisher: String,
}

impl Default for PackageSource {
    fn default() -> Self {
        PackageSource {
            namespace: MARKETPLACE_NAMESPACE.into(),
            display_name: "Red Hat Operators".into(),
            publisher: "Red Hat".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub namespace: String,
    pub package: String,
    pub channel: String,
}

pub fn catalog_source_config_name(namespace: &str) -> String {
    format!("installed-redhat-{}", namespace)
}

pub fn operator_group_name(namespace: &str) -> String {
    format!("{}-integreatly", namespace)
}

pub struct PackageManager<'a> {
    client: &'a dyn ClusterClient,
}

impl<'a> PackageManager<'a> {
    pub fn new(client: &'a dyn ClusterClient) -> PackageManager<'a> {
        PackageManager { client }
    }

    /// Drive the catalog entry, operator group and subscription for `target`
    /// into existence.
    ///
    /// A call that has to create the catalog entry stops there and returns
    /// `Ok`; the caller comes back once the catalog is ready. A catalog that
    /// exists but has not `Succeeded` yields `Error::CatalogSourceNotReady`.
    pub async fn create_subscription(
        &self,
        owner: &Installation,
        source: &PackageSource,
        target: &Target,
        operator_group_namespaces: &[String],
        approval: Approval,
    ) -> Result<(), Error> {
        let csc_name = catalog_source_config_name(&target.namespace);

        match self
            .client
            .get_catalog_source_config(&source.namespace, &csc_name)
            .await?
        {
            None => {
                info!("Creating catalog source config {}", csc_name);
                self.create_catalog_source_config(source, target).await?;
                return Ok(());
            }
            Some(csc) if !csc.is_ready() => {
                return Err(Error::CatalogSourceNotReady(csc_name));
            }
            Some(_) => {}
        }

        let existing = self
            .client
            .get_subscription(&target.namespace, &target.package)
            .await?;
        if existing.is_none() {
            info!(
                "No subscription for {}, recreating catalog source config {}",
                target.package, csc_name
            );
            self.client
                .delete_catalog_source_config(&source.namespace, &csc_name)
                .await?;
            self.create_catalog_source_config(source, target).await?;
        }

        let group = OperatorGroup {
            metadata: ObjectMeta {
                name: Some(operator_group_name(&target.namespace)),
                namespace: Some(target.namespace.clone()),
                labels: Some(BTreeMap::from([(
                    "integreatly".to_string(),
                    target.package.clone(),
                )])),
                ..Default::default()
            },
            spec: OperatorGroupSpec {
                target_namespaces: operator_group_namespaces.to_vec(),
            },
        };
        match self.client.create_operator_group(&group).await {
            Err(e) if e.is_already_exists() => debug!("Operator group already exists"),
            other => {
                other?;
            }
        }

        let sub = self.subscription_for(owner, target, &csc_name, approval);
        match self.client.create_subscription(&sub).await {
            Err(e) if e.is_already_exists() => debug!("Subscription {} already exists", target.package),
            Err(e) => return Err(e),
            Ok(_) => info!("Created subscription {} in {}", target.package, target.namespace),
        }

        Ok(())
    }

    /// Fetch a subscription and the install plan it references.
    ///
    /// A subscription without a plan reference yields
    /// `Error::InstallPlanNotGenerated`, which carries the subscription. A
    /// reference to a plan that no longer exists yields `Ok((None, sub))`.
    pub async fn get_subscription_install_plan(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<(Option<InstallPlan>, Subscription), Error> {
        let sub = self
            .client
            .get_subscription(namespace, name)
            .await?
            .ok_or_else(|| Error::SubscriptionNotFound {
                name: name.to_string(),
                namespace: namespace.to_string(),
            })?;

        let Some(reference) = sub.install_plan_reference() else {
            return Err(Error::InstallPlanNotGenerated(Box::new(sub)));
        };

        let plan_namespace = if reference.namespace.is_empty() {
            namespace
        } else {
            reference.namespace.as_str()
        };
        let plan = self
            .client
            .get_install_plan(plan_namespace, &reference.name)
            .await?;

        Ok((plan, sub))
    }

    async fn create_catalog_source_config(
        &self,
        source: &PackageSource,
        target: &Target,
    ) -> Result<(), Error> {
        let csc = CatalogSourceConfig {
            metadata: ObjectMeta {
                name: Some(catalog_source_config_name(&target.namespace)),
                namespace: Some(source.namespace.clone()),
                ..Default::default()
            },
            spec: CatalogSourceConfigSpec {
                target_namespace: target.namespace.clone(),
                packages: target.package.clone(),
                cs_display_name: source.display_name.clone(),
                cs_publisher: source.publisher.clone(),
            },
            status: None,
        };

        match self.client.create_catalog_source_config(&csc).await {
            Err(e) if e.is_already_exists() => Ok(()),
            other => other.map(|_| ()),
        }
    }

    fn subscription_for(
        &self,
        owner: &Installation,
        target: &Target,
        source_name: &str,
        approval: Approval,
    ) -> Subscription {
        let mut metadata = ObjectMeta {
            name: Some(target.package.clone()),
            namespace: Some(target.namespace.clone()),
            labels: Some(BTreeMap::from([(OWNER_LABEL.to_string(), owner.owner_id())])),
            ..Default::default()
        };
        // Owner references may not cross namespaces.
        if owner.namespace().as_deref() == Some(target.namespace.as_str()) {
            metadata.owner_references = owner.controller_owner_ref(&()).map(|r| vec![r]);
        }

        Subscription {
            metadata,
            spec: SubscriptionSpec {
                source: source_name.to_string(),
                source_namespace: target.namespace.clone(),
                name: target.package.clone(),
                channel: target.channel.clone(),
                starting_csv: None,
                install_plan_approval: Some(approval),
            },
            status: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockClusterClient;
    use crate::crd::InstallationSpec;
    use crate::fake::FakeCluster;
    use crate::olm::{
        CatalogSourceConfigStatus, CurrentPhase, InstallPlanObjectRef, InstallPlanReference,
        InstallPlanSpec, InstallPlanStatus, ObjectPhase, SubscriptionStatus, CATALOG_SUCCEEDED,
    };

    fn installation() -> Installation {
        let mut inst = Installation::new(
            "rhmi",
            InstallationSpec {
                namespace_prefix: "prefix-".into(),
                selected_products: vec![],
                self_signed_certs: false,
            },
        );
        inst.metadata.namespace = Some("rhmi-operator".into());
        inst.metadata.uid = Some("1234".into());
        inst
    }

    fn target() -> Target {
        Target {
            namespace: "prefix-codeready-workspaces".into(),
            package: "codeready-workspaces".into(),
            channel: "final".into(),
        }
    }

    fn mark_catalog_ready(cluster: &FakeCluster) {
        cluster.seed(|state| {
            for csc in state.catalog_source_configs.values_mut() {
                csc.status = Some(CatalogSourceConfigStatus {
                    current_phase: CurrentPhase {
                        phase: ObjectPhase {
                            name: CATALOG_SUCCEEDED.into(),
                            message: String::new(),
                        },
                        ..Default::default()
                    },
                });
            }
        });
    }

    async fn subscribe(cluster: &FakeCluster) -> Result<(), Error> {
        let target = target();
        PackageManager::new(cluster)
            .create_subscription(
                &installation(),
                &PackageSource::default(),
                &target,
                &[target.namespace.clone()],
                Approval::Manual,
            )
            .await
    }

    #[tokio::test]
    async fn first_call_only_creates_catalog_entry() {
        let cluster = FakeCluster::new();

        subscribe(&cluster).await.unwrap();

        assert_eq!(
            cluster.writes(),
            vec!["create CatalogSourceConfig installed-redhat-prefix-codeready-workspaces"]
        );
    }

    #[tokio::test]
    async fn catalog_not_succeeded_is_not_ready() {
        let cluster = FakeCluster::new();
        subscribe(&cluster).await.unwrap();

        let err = subscribe(&cluster).await.unwrap_err();

        assert!(matches!(err, Error::CatalogSourceNotReady(_)));
        assert!(err.is_retryable());
        assert_eq!(cluster.writes_of("Subscription"), 0);
    }

    #[tokio::test]
    async fn dangling_catalog_is_recreated_before_subscribing() {
        let cluster = FakeCluster::new();
        subscribe(&cluster).await.unwrap();
        mark_catalog_ready(&cluster);

        subscribe(&cluster).await.unwrap();

        let writes = cluster.writes();
        assert_eq!(
            &writes[1..],
            &[
                "delete CatalogSourceConfig installed-redhat-prefix-codeready-workspaces",
                "create CatalogSourceConfig installed-redhat-prefix-codeready-workspaces",
                "create OperatorGroup prefix-codeready-workspaces-integreatly",
                "create Subscription codeready-workspaces",
            ]
        );

        let state = cluster.state();
        let sub = state.subscriptions.values().next().unwrap();
        assert_eq!(sub.spec.source, "installed-redhat-prefix-codeready-workspaces");
        assert_eq!(sub.spec.source_namespace, "prefix-codeready-workspaces");
        assert_eq!(sub.spec.install_plan_approval, Some(Approval::Manual));
        assert!(sub.metadata.owner_references.is_none());
        let group = state.operator_groups.values().next().unwrap();
        assert_eq!(
            group.spec.target_namespaces,
            vec!["prefix-codeready-workspaces".to_string()]
        );
    }

    #[tokio::test]
    async fn repeated_calls_converge_to_one_of_each() {
        let cluster = FakeCluster::new();
        subscribe(&cluster).await.unwrap();
        mark_catalog_ready(&cluster);
        subscribe(&cluster).await.unwrap();
        mark_catalog_ready(&cluster);

        subscribe(&cluster).await.unwrap();
        subscribe(&cluster).await.unwrap();

        let state = cluster.state();
        assert_eq!(state.catalog_source_configs.len(), 1);
        assert_eq!(state.operator_groups.len(), 1);
        assert_eq!(state.subscriptions.len(), 1);
    }

    fn subscription(install_plan: Option<&str>) -> Subscription {
        let t = target();
        let mut sub = Subscription::new(
            &t.package,
            SubscriptionSpec {
                source: catalog_source_config_name(&t.namespace),
                source_namespace: t.namespace.clone(),
                name: t.package.clone(),
                channel: t.channel.clone(),
                ..Default::default()
            },
        );
        sub.metadata.namespace = Some(t.namespace.clone());
        sub.status = Some(SubscriptionStatus {
            install: install_plan.map(|name| InstallPlanReference {
                name: name.into(),
                ..Default::default()
            }),
            install_plan_ref: install_plan.map(|name| InstallPlanObjectRef {
                name: name.into(),
                namespace: t.namespace.clone(),
                uid: None,
            }),
            ..Default::default()
        });
        sub
    }

    #[tokio::test]
    async fn missing_plan_reference_is_not_found() {
        let mut client = MockClusterClient::new();
        client
            .expect_get_subscription()
            .withf(|ns, name| {
                ns == "prefix-codeready-workspaces" && name == "codeready-workspaces"
            })
            .returning(|_, _| Ok(Some(subscription(None))));
        client.expect_get_install_plan().never();

        let err = PackageManager::new(&client)
            .get_subscription_install_plan("codeready-workspaces", "prefix-codeready-workspaces")
            .await
            .unwrap_err();

        assert!(err.is_not_found());
        match err {
            Error::InstallPlanNotGenerated(sub) => {
                assert_eq!(sub.name_any(), "codeready-workspaces")
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn referenced_plan_is_returned_with_subscription() {
        let mut client = MockClusterClient::new();
        client
            .expect_get_subscription()
            .returning(|_, _| Ok(Some(subscription(Some("install-x1")))));
        client
            .expect_get_install_plan()
            .withf(|ns, name| ns == "prefix-codeready-workspaces" && name == "install-x1")
            .returning(|_, name| {
                let mut plan = InstallPlan::new(name, InstallPlanSpec::default());
                plan.status = Some(InstallPlanStatus {
                    phase: "Complete".into(),
                });
                Ok(Some(plan))
            });

        let (plan, sub) = PackageManager::new(&client)
            .get_subscription_install_plan("codeready-workspaces", "prefix-codeready-workspaces")
            .await
            .unwrap();

        assert!(plan.map(|p| p.is_complete()).unwrap_or(false));
        assert_eq!(sub.spec.channel, "final");
    }

    #[tokio::test]
    async fn installplan_alone_is_enough_to_fetch_the_plan() {
        let mut client = MockClusterClient::new();
        client.expect_get_subscription().returning(|_, _| {
            let mut sub = subscription(Some("install-1"));
            if let Some(status) = sub.status.as_mut() {
                status.install_plan_ref = None;
            }
            Ok(Some(sub))
        });
        client
            .expect_get_install_plan()
            .withf(|ns, name| ns == "prefix-codeready-workspaces" && name == "install-1")
            .times(1)
            .returning(|_, name| Ok(Some(InstallPlan::new(name, InstallPlanSpec::default()))));

        let (plan, _) = PackageManager::new(&client)
            .get_subscription_install_plan("codeready-workspaces", "prefix-codeready-workspaces")
            .await
            .unwrap();

        assert_eq!(plan.map(|p| p.name_any()), Some("install-1".to_string()));
    }

    #[tokio::test]
    async fn absent_subscription_is_not_mistaken_for_missing_plan() {
        let mut client = MockClusterClient::new();
        client.expect_get_subscription().returning(|_, _| Ok(None));

        let err = PackageManager::new(&client)
            .get_subscription_install_plan("codeready-workspaces", "prefix-codeready-workspaces")
            .await
            .unwrap_err();

        assert!(matches!(err, Error::SubscriptionNotFound { .. }));
        assert!(!err.is_not_found());
    }
}
