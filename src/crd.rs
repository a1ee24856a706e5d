use std::collections::BTreeMap;
use std::str::FromStr;

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Label put on every namespace created on behalf of an installation.
pub const OWNER_LABEL: &str = "integreatly.org/installation-uid";
pub const MANAGED_LABEL: &str = "integreatly";
pub const DELETION_PROTECTION_ANNOTATION: &str = "integreatly.org/deletion-protection";

#[derive(CustomResource, Serialize, Deserialize, Clone, PartialEq, Debug, JsonSchema)]
#[kube(group = "integreatly.org", version = "v1alpha1", kind = "Installation")]
#[kube(singular = "installation", plural = "installations")]
#[kube(namespaced, status = "InstallationStatus")]
#[serde(rename_all = "camelCase")]
pub struct InstallationSpec {
    pub namespace_prefix: String,
    /// Products to install. An empty list means every known product.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub selected_products: Vec<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub self_signed_certs: bool,
}

#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Debug, JsonSchema, Default)]
pub enum StatusPhase {
    #[default]
    #[serde(rename = "")]
    None,
    #[serde(rename = "awaiting namespace")]
    AwaitingNamespace,
    #[serde(rename = "creating subscription")]
    CreatingSubscription,
    #[serde(rename = "awaiting operator")]
    AwaitingOperator,
    #[serde(rename = "creating components")]
    CreatingComponents,
    #[serde(rename = "in progress")]
    InProgress,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "failed")]
    Failed,
    #[serde(rename = "deletion in progress")]
    DeleteInProgress,
}

impl StatusPhase {
    pub const ALL: [StatusPhase; 9] = [
        StatusPhase::None,
        StatusPhase::AwaitingNamespace,
        StatusPhase::CreatingSubscription,
        StatusPhase::AwaitingOperator,
        StatusPhase::CreatingComponents,
        StatusPhase::InProgress,
        StatusPhase::Completed,
        StatusPhase::Failed,
        StatusPhase::DeleteInProgress,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StatusPhase::None => "",
            StatusPhase::AwaitingNamespace => "awaiting namespace",
            StatusPhase::CreatingSubscription => "creating subscription",
            StatusPhase::AwaitingOperator => "awaiting operator",
            StatusPhase::CreatingComponents => "creating components",
            StatusPhase::InProgress => "in progress",
            StatusPhase::Completed => "completed",
            StatusPhase::Failed => "failed",
            StatusPhase::DeleteInProgress => "deletion in progress",
        }
    }

    /// Position along the install order. `Failed` and `DeleteInProgress`
    /// sit outside it.
    pub fn ordinal(&self) -> Option<usize> {
        match self {
            StatusPhase::None => Some(0),
            StatusPhase::AwaitingNamespace => Some(1),
            StatusPhase::CreatingSubscription => Some(2),
            StatusPhase::AwaitingOperator => Some(3),
            StatusPhase::CreatingComponents => Some(4),
            StatusPhase::InProgress => Some(5),
            StatusPhase::Completed => Some(6),
            StatusPhase::Failed | StatusPhase::DeleteInProgress => None,
        }
    }
}

impl std::fmt::Display for StatusPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            StatusPhase::None => write!(f, "none"),
            other => write!(f, "{}", other.as_str()),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, JsonSchema)]
pub enum StageName {
    #[serde(rename = "cloud-resources")]
    CloudResources,
    #[serde(rename = "authentication")]
    Authentication,
    #[serde(rename = "products")]
    Products,
    #[serde(rename = "uninstall - products")]
    UninstallProducts,
    #[serde(rename = "uninstall - authentication")]
    UninstallAuthentication,
    #[serde(rename = "uninstall - cloud-resources")]
    UninstallCloudResources,
}

impl StageName {
    pub const INSTALL: [StageName; 3] = [
        StageName::CloudResources,
        StageName::Authentication,
        StageName::Products,
    ];

    pub const UNINSTALL: [StageName; 3] = [
        StageName::UninstallProducts,
        StageName::UninstallAuthentication,
        StageName::UninstallCloudResources,
    ];

    /// The install stage whose products an uninstall stage tears down.
    pub fn install_counterpart(&self) -> StageName {
        match self {
            StageName::UninstallProducts => StageName::Products,
            StageName::UninstallAuthentication => StageName::Authentication,
            StageName::UninstallCloudResources => StageName::CloudResources,
            install => *install,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::CloudResources => "cloud-resources",
            StageName::Authentication => "authentication",
            StageName::Products => "products",
            StageName::UninstallProducts => "uninstall - products",
            StageName::UninstallAuthentication => "uninstall - authentication",
            StageName::UninstallCloudResources => "uninstall - cloud-resources",
        }
    }
}

impl std::fmt::Display for StageName {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, JsonSchema)]
pub enum ProductName {
    #[serde(rename = "cloud-resources")]
    CloudResources,
    #[serde(rename = "rhsso")]
    Rhsso,
    #[serde(rename = "rhssouser")]
    RhssoUser,
    #[serde(rename = "3scale")]
    ThreeScale,
    #[serde(rename = "codeready-workspaces")]
    CodeReadyWorkspaces,
    #[serde(rename = "amqstreams")]
    AmqStreams,
    #[serde(rename = "fuse")]
    Fuse,
    #[serde(rename = "grafana")]
    Grafana,
    #[serde(rename = "marin3r")]
    Marin3r,
}

impl ProductName {
    pub const ALL: [ProductName; 9] = [
        ProductName::CloudResources,
        ProductName::Rhsso,
        ProductName::RhssoUser,
        ProductName::ThreeScale,
        ProductName::CodeReadyWorkspaces,
        ProductName::AmqStreams,
        ProductName::Fuse,
        ProductName::Grafana,
        ProductName::Marin3r,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProductName::CloudResources => "cloud-resources",
            ProductName::Rhsso => "rhsso",
            ProductName::RhssoUser => "rhssouser",
            ProductName::ThreeScale => "3scale",
            ProductName::CodeReadyWorkspaces => "codeready-workspaces",
            ProductName::AmqStreams => "amqstreams",
            ProductName::Fuse => "fuse",
            ProductName::Grafana => "grafana",
            ProductName::Marin3r => "marin3r",
        }
    }

    /// Finalizer each product keeps on the installation until its
    /// resources are gone.
    pub fn finalizer(&self) -> String {
        format!("{}.integreatly.org/finalizer", self.as_str())
    }
}

impl std::fmt::Display for ProductName {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProductName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProductName::ALL
            .iter()
            .find(|p| p.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown product: {}", s))
    }
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Debug, JsonSchema)]
pub struct ProductStatus {
    pub name: ProductName,
    #[serde(rename = "operator", default, skip_serializing_if = "String::is_empty")]
    pub operator_version: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub host: String,
    #[serde(rename = "status", default)]
    pub phase: StatusPhase,
}

impl ProductStatus {
    pub fn new(name: ProductName) -> ProductStatus {
        ProductStatus {
            name,
            operator_version: String::new(),
            version: String::new(),
            host: String::new(),
            phase: StatusPhase::None,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Debug, JsonSchema)]
pub struct StageStatus {
    pub name: StageName,
    #[serde(default)]
    pub phase: StatusPhase,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub products: BTreeMap<ProductName, ProductStatus>,
}

impl StageStatus {
    pub fn new(name: StageName) -> StageStatus {
        StageStatus {
            name,
            phase: StatusPhase::None,
            products: BTreeMap::new(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug, JsonSchema, Default)]
pub enum PreflightStatus {
    #[default]
    #[serde(rename = "")]
    InProgress,
    #[serde(rename = "successful")]
    Success,
    #[serde(rename = "failed")]
    Fail,
}

impl PreflightStatus {
    fn is_in_progress(&self) -> bool {
        *self == PreflightStatus::InProgress
    }
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct InstallationStatus {
    #[serde(default)]
    pub stages: BTreeMap<StageName, StageStatus>,
    #[serde(default)]
    pub stage: String,
    #[serde(default, skip_serializing_if = "PreflightStatus::is_in_progress")]
    pub preflight_status: PreflightStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub preflight_message: String,
    #[serde(default)]
    pub last_error: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub to_version: String,
}

impl InstallationStatus {
    pub fn product(&self, name: ProductName) -> Option<&ProductStatus> {
        self.stages
            .values()
            .find_map(|stage| stage.products.get(&name))
    }
}

impl Installation {
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.finalizers().iter().any(|f| f == finalizer)
    }

    /// Identity used to mark namespaces as belonging to this installation.
    pub fn owner_id(&self) -> String {
        self.uid().unwrap_or_else(|| self.name_any())
    }

    pub fn product_namespace(&self, suffix: &str) -> String {
        format!("{}{}", self.spec.namespace_prefix, suffix)
    }
}
