//! Products and the registry the installation controller drives them from.

use async_trait::async_trait;

use crate::client::ClusterClient;
use crate::controller::Error;
use crate::crd::{Installation, ProductName, ProductStatus, StageName, StatusPhase};

pub mod catalog;
pub mod operator;

use catalog::CATALOG;
use operator::OperatorProduct;

/// An object whose presence outside this installation's namespaces
/// signals a conflicting manual install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreflightObject {
    pub kind: &'static str,
    pub namespace: String,
    pub name: String,
}

/// One independently managed product.
///
/// `reconcile` is called repeatedly. It must return quickly, reporting
/// eventual conditions as a non-`Completed` phase, and only ever moves its
/// own `ProductStatus` forward or to `Failed`.
#[async_trait]
pub trait ProductPlugin: Send + Sync {
    fn name(&self) -> ProductName;

    fn stage(&self) -> StageName;

    fn preflight_object(&self, namespace: &str) -> Option<PreflightObject>;

    async fn reconcile(
        &self,
        installation: &mut Installation,
        status: &mut ProductStatus,
        client: &dyn ClusterClient,
    ) -> Result<StatusPhase, Error>;
}

/// Every product this operator can install, in install order. Built once
/// during startup and shared read-only.
pub struct ProductRegistry {
    plugins: Vec<Box<dyn ProductPlugin>>,
}

impl ProductRegistry {
    pub fn new(plugins: Vec<Box<dyn ProductPlugin>>) -> ProductRegistry {
        ProductRegistry { plugins }
    }

    pub fn from_catalog() -> ProductRegistry {
        ProductRegistry::new(
            CATALOG
                .iter()
                .map(|d| Box::new(OperatorProduct::new(d.clone())) as Box<dyn ProductPlugin>)
                .collect(),
        )
    }

    pub fn get(&self, name: ProductName) -> Option<&dyn ProductPlugin> {
        self.plugins
            .iter()
            .find(|p| p.name() == name)
            .map(|p| p.as_ref())
    }

    /// Resolve a product selection. An empty selection means everything.
    pub fn selected(&self, selection: &[String]) -> Result<Vec<&dyn ProductPlugin>, Error> {
        if selection.is_empty() {
            return Ok(self.plugins.iter().map(|p| p.as_ref()).collect());
        }

        let mut names = Vec::with_capacity(selection.len());
        for entry in selection {
            let name: ProductName = entry.trim().parse().map_err(Error::InvalidConfig)?;
            if self.get(name).is_none() {
                return Err(Error::InvalidConfig(format!(
                    "no plugin registered for product {}",
                    name
                )));
            }
            names.push(name);
        }

        Ok(self
            .plugins
            .iter()
            .filter(|p| names.contains(&p.name()))
            .map(|p| p.as_ref())
            .collect())
    }

    pub fn for_stage(
        &self,
        selection: &[String],
        stage: StageName,
    ) -> Result<Vec<&dyn ProductPlugin>, Error> {
        Ok(self
            .selected(selection)?
            .into_iter()
            .filter(|p| p.stage() == stage)
            .collect())
    }
}

/// Scripted product for controller tests.
#[cfg(test)]
pub struct StubProduct {
    pub name: ProductName,
    pub stage: StageName,
    pub outcome: Result<StatusPhase, String>,
    pub preflight: Option<&'static str>,
    pub calls: std::sync::Arc<std::sync::atomic::AtomicU32>,
}

#[cfg(test)]
impl StubProduct {
    pub fn new(name: ProductName, stage: StageName, phase: StatusPhase) -> StubProduct {
        StubProduct {
            name,
            stage,
            outcome: Ok(phase),
            preflight: None,
            calls: Default::default(),
        }
    }
}

#[cfg(test)]
#[async_trait]
impl ProductPlugin for StubProduct {
    fn name(&self) -> ProductName {
        self.name
    }

    fn stage(&self) -> StageName {
        self.stage
    }

    fn preflight_object(&self, namespace: &str) -> Option<PreflightObject> {
        self.preflight.map(|name| PreflightObject {
            kind: "Deployment",
            namespace: namespace.to_string(),
            name: name.to_string(),
        })
    }

    async fn reconcile(
        &self,
        _installation: &mut Installation,
        status: &mut ProductStatus,
        _client: &dyn ClusterClient,
    ) -> Result<StatusPhase, Error> {
        self.calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        match &self.outcome {
            Ok(phase) => {
                status.phase = *phase;
                Ok(*phase)
            }
            Err(message) => Err(Error::ResourceNotReady(message.clone())),
        }
    }
}
