use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use super::catalog::ProductDeclaration;
use super::{PreflightObject, ProductPlugin};
use crate::client::ClusterClient;
use crate::controller::Error;
use crate::crd::{Installation, ProductName, ProductStatus, StageName, StatusPhase};
use crate::marketplace::{PackageSource, Target};
use crate::phase::{Observed, PhaseEvent, PhaseMachine};
use crate::resources::{
    reconcile_finalizer, reconcile_namespace, reconcile_subscription, remove_namespace,
};

/// A product whose whole install is its operator: a namespace, a
/// subscription, and the operator deployment coming up.
pub struct OperatorProduct {
    declaration: ProductDeclaration,
    source: PackageSource,
    machine: PhaseMachine,
}

impl OperatorProduct {
    pub fn new(declaration: ProductDeclaration) -> OperatorProduct {
        OperatorProduct {
            declaration,
            source: PackageSource::default(),
            machine: PhaseMachine::new(),
        }
    }

    fn target(&self, installation: &Installation) -> Target {
        Target {
            namespace: installation.product_namespace(self.declaration.namespace_suffix),
            package: self.declaration.package.to_string(),
            channel: self.declaration.channel.to_string(),
        }
    }

    fn advance(
        &self,
        status: &mut ProductStatus,
        event: PhaseEvent,
        observed: &Observed,
    ) -> Result<StatusPhase, Error> {
        match self.machine.fire(status.phase, event, observed) {
            Ok(next) => {
                if next != status.phase {
                    info!(
                        "{} moved from {} to {} on {}",
                        self.declaration.name, status.phase, next, event
                    );
                    status.phase = next;
                }
                Ok(next)
            }
            Err(e) => {
                warn!(
                    "{}: {}, expected one of {:?}",
                    self.declaration.name,
                    e,
                    self.machine.valid_events(status.phase)
                );
                Err(e)
            }
        }
    }

    async fn operator_ready(&self, namespace: &str, client: &dyn ClusterClient) -> Result<bool, Error> {
        let deployment = client
            .get_deployment(namespace, self.declaration.operator_deployment)
            .await?;
        let ready = deployment
            .and_then(|d| d.status)
            .and_then(|s| s.ready_replicas)
            .map(|replicas| replicas > 0)
            .unwrap_or(false);
        if ready {
            info!("Deployment {} is ready", self.declaration.operator_deployment);
        }
        Ok(ready)
    }

    async fn uninstall(
        &self,
        installation: &mut Installation,
        status: &mut ProductStatus,
        client: &dyn ClusterClient,
    ) -> Result<StatusPhase, Error> {
        if status.phase != StatusPhase::DeleteInProgress {
            self.advance(status, PhaseEvent::DeletionRequested, &Observed::default())?;
        }

        let namespace = self.target(installation).namespace;
        let owner = installation.clone();
        let cleanup = reconcile_finalizer(
            client,
            installation,
            &self.declaration.name.finalizer(),
            || remove_namespace(&namespace, &owner, client),
        )
        .await?;

        if cleanup == StatusPhase::Completed {
            return self.advance(status, PhaseEvent::CleanupFinished, &Observed::default());
        }
        Ok(status.phase)
    }

    async fn install(
        &self,
        installation: &mut Installation,
        status: &mut ProductStatus,
        client: &dyn ClusterClient,
    ) -> Result<StatusPhase, Error> {
        let finalizer = self.declaration.name.finalizer();
        reconcile_finalizer(client, installation, &finalizer, || async {
            Ok(StatusPhase::Completed)
        })
        .await?;

        let target = self.target(installation);

        if status.phase == StatusPhase::Failed {
            self.advance(status, PhaseEvent::Retry, &Observed::default())?;
        }
        if status.phase == StatusPhase::None {
            self.advance(status, PhaseEvent::Begin, &Observed::default())?;
        }

        if status.phase == StatusPhase::AwaitingNamespace {
            if reconcile_namespace(&target.namespace, installation, client).await?
                != StatusPhase::Completed
            {
                return Ok(status.phase);
            }
            let subscription = client
                .get_subscription(&target.namespace, &target.package)
                .await?;
            if subscription.is_some() {
                let observed = Observed {
                    subscription_exists: true,
                    ..Default::default()
                };
                self.advance(status, PhaseEvent::SubscriptionFound, &observed)?;
            } else {
                self.advance(status, PhaseEvent::NamespaceReady, &Observed::default())?;
            }
        }

        if matches!(
            status.phase,
            StatusPhase::CreatingSubscription | StatusPhase::AwaitingOperator
        ) {
            match reconcile_subscription(installation, &self.source, &target, client).await? {
                StatusPhase::Completed => {
                    let observed = Observed {
                        subscription_exists: true,
                        install_plan_complete: true,
                    };
                    self.advance(status, PhaseEvent::InstallPlanComplete, &observed)?;
                }
                StatusPhase::AwaitingOperator if status.phase == StatusPhase::CreatingSubscription => {
                    self.advance(status, PhaseEvent::SubscriptionCreated, &Observed::default())?;
                    return Ok(status.phase);
                }
                phase => {
                    debug!("{} subscription is {}", self.declaration.name, phase);
                    return Ok(status.phase);
                }
            }
        }

        if status.phase == StatusPhase::CreatingComponents {
            status.version = self.declaration.version.to_string();
            status.operator_version = self.declaration.operator_version.to_string();
            self.advance(status, PhaseEvent::ComponentsCreated, &Observed::default())?;
        }

        if status.phase == StatusPhase::InProgress
            && self.operator_ready(&target.namespace, client).await?
        {
            self.advance(status, PhaseEvent::ComponentsReady, &Observed::default())?;
        }

        Ok(status.phase)
    }
}

#[async_trait]
impl ProductPlugin for OperatorProduct {
    fn name(&self) -> ProductName {
        self.declaration.name
    }

    fn stage(&self) -> StageName {
        self.declaration.stage
    }

    fn preflight_object(&self, namespace: &str) -> Option<PreflightObject> {
        self.declaration
            .preflight_deployment
            .map(|name| PreflightObject {
                kind: "Deployment",
                namespace: namespace.to_string(),
                name: name.to_string(),
            })
    }

    #[instrument(skip_all, fields(product = %self.declaration.name))]
    async fn reconcile(
        &self,
        installation: &mut Installation,
        status: &mut ProductStatus,
        client: &dyn ClusterClient,
    ) -> Result<StatusPhase, Error> {
        let result = if installation.is_deleting() {
            self.uninstall(installation, status, client).await
        } else {
            self.install(installation, status, client).await
        };

        if let Err(e) = &result {
            if !e.is_retryable() {
                if let Ok(failed) =
                    self.machine
                        .fire(status.phase, PhaseEvent::Failure, &Observed::default())
                {
                    status.phase = failed;
                }
            }
        }
        result
    }
}
