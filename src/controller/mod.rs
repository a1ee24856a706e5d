use std::sync::Arc;

use futures::StreamExt;
use kube::core::ResourceExt;
use kube::runtime::controller::{Action, Error as ControllerError};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher;
use thiserror::Error;
use tracing::{info, warn};

use crate::client::ClusterClient;
use crate::config::OperatorConfig;
use crate::crd::StatusPhase;
use crate::olm::Subscription;
use crate::phase::PhaseEvent;
use crate::products::ProductRegistry;

pub mod installation;
pub mod namespace_label;
pub mod subscription;
pub mod webhook;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Kubernetes request failed: {0}")]
    Kube(#[from] kube::Error),
    #[error("UnableToSerializeObject: {0}")]
    UnableToSerializeObject(#[from] serde_json::Error),
    #[error("UnableToInferConfig: {0}")]
    UnableToInferConfig(#[from] kube::config::InferConfigError),
    #[error("UnableToCreateCertificate: {0}")]
    UnableToCreateCertificate(#[from] rcgen::Error),
    #[error("UnableToWriteFile: {0}")]
    UnableToWriteFile(#[from] std::io::Error),
    #[error("catalog source config {0} is not ready yet")]
    CatalogSourceNotReady(String),
    #[error("install plan not yet generated for subscription {}", .0.name_any())]
    InstallPlanNotGenerated(Box<Subscription>),
    #[error("subscription {namespace}/{name} not found")]
    SubscriptionNotFound { name: String, namespace: String },
    #[error("install plan {0} failed")]
    InstallPlanFailed(String),
    #[error("timed out waiting for {0}")]
    Timeout(String),
    #[error("ResourceNotReady: {0}")]
    ResourceNotReady(String),
    #[error("InvalidConfig: {0}")]
    InvalidConfig(String),
    #[error("invalid phase transition from {from} on {event}")]
    InvalidTransition { from: StatusPhase, event: PhaseEvent },
}

impl Error {
    fn api_code(&self) -> Option<(u16, &str)> {
        match self {
            Error::Kube(kube::Error::Api(response)) => {
                Some((response.code, response.reason.as_str()))
            }
            _ => None,
        }
    }

    /// Absent objects, including a subscription whose plan has not been
    /// generated yet.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::InstallPlanNotGenerated(_) => true,
            _ => matches!(self.api_code(), Some((404, _))),
        }
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self.api_code(), Some((409, "AlreadyExists")))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self.api_code(), Some((409, reason)) if reason != "AlreadyExists")
    }

    /// Whether a requeue can be expected to make progress. Everything else
    /// fails the product.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::CatalogSourceNotReady(_)
            | Error::InstallPlanNotGenerated(_)
            | Error::Timeout(_)
            | Error::ResourceNotReady(_) => true,
            Error::Kube(kube::Error::Api(response)) => {
                matches!(response.code, 404 | 409 | 429) || response.code >= 500
            }
            Error::Kube(_) => true,
            _ => false,
        }
    }
}

/// State shared by every reconciler.
pub struct Context {
    pub client: Arc<dyn ClusterClient>,
    pub config: Arc<OperatorConfig>,
    pub products: Arc<ProductRegistry>,
}

/// Drain a controller stream, logging each result. Watch expiry (410) is
/// routine and not reported.
pub async fn log_results<K, S>(name: &'static str, stream: S)
where
    K: kube::Resource,
    S: futures::Stream<
        Item = Result<(ObjectRef<K>, Action), ControllerError<Error, watcher::Error>>,
    >,
{
    stream
        .for_each(|res| async move {
            match res {
                Ok((o, a)) => info!("{} reconcile {} complete for {:?}", name, o.name, a),
                Err(ControllerError::QueueError(watcher::Error::WatchError(watch_error))) => {
                    if watch_error.code != 410 && watch_error.reason != *"Expired" {
                        warn!("{} reconcile failed: {:?}", name, watch_error)
                    };
                }
                Err(e) => warn!("{} reconcile failed: {:?}", name, e),
            }
        })
        .await;

    info!("{} controller terminated", name);
}

/// Requeue after an error. Retryable errors come back quickly.
pub fn backoff_for(error: &Error) -> Action {
    if error.is_retryable() {
        Action::requeue(std::time::Duration::from_secs(30))
    } else {
        Action::requeue(std::time::Duration::from_secs(60))
    }
}
