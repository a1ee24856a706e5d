//! Package manager kinds. Field names follow the cluster's existing CRDs so
//! objects round-trip unchanged.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const MARKETPLACE_NAMESPACE: &str = "openshift-marketplace";
pub const CATALOG_SUCCEEDED: &str = "Succeeded";
pub const INSTALL_PLAN_COMPLETE: &str = "Complete";
pub const INSTALL_PLAN_FAILED: &str = "Failed";
pub const INSTALL_PLAN_REQUIRES_APPROVAL: &str = "RequiresApproval";

#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug, JsonSchema, Default)]
pub enum Approval {
    #[default]
    Automatic,
    Manual,
}

#[derive(CustomResource, Serialize, Deserialize, Clone, PartialEq, Debug, JsonSchema, Default)]
#[kube(group = "operators.coreos.com", version = "v2", kind = "CatalogSourceConfig")]
#[kube(namespaced, status = "CatalogSourceConfigStatus")]
#[serde(rename_all = "camelCase")]
pub struct CatalogSourceConfigSpec {
    pub target_namespace: String,
    /// Comma separated package names.
    pub packages: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cs_display_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cs_publisher: String,
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Debug, JsonSchema, Default)]
pub struct ObjectPhase {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct CurrentPhase {
    #[serde(default)]
    pub phase: ObjectPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct CatalogSourceConfigStatus {
    #[serde(default)]
    pub current_phase: CurrentPhase,
}

impl CatalogSourceConfig {
    pub fn is_ready(&self) -> bool {
        self.status
            .as_ref()
            .map(|s| s.current_phase.phase.name == CATALOG_SUCCEEDED)
            .unwrap_or(false)
    }
}

#[derive(CustomResource, Serialize, Deserialize, Clone, PartialEq, Debug, JsonSchema, Default)]
#[kube(group = "operators.coreos.com", version = "v1", kind = "OperatorGroup")]
#[kube(namespaced)]
#[serde(rename_all = "camelCase")]
pub struct OperatorGroupSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub target_namespaces: Vec<String>,
}

#[derive(CustomResource, Serialize, Deserialize, Clone, PartialEq, Debug, JsonSchema, Default)]
#[kube(group = "operators.coreos.com", version = "v1alpha1", kind = "Subscription")]
#[kube(namespaced, status = "SubscriptionStatus")]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionSpec {
    pub source: String,
    pub source_namespace: String,
    /// Package name.
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub channel: String,
    #[serde(rename = "startingCSV", default, skip_serializing_if = "Option::is_none")]
    pub starting_csv: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_plan_approval: Option<Approval>,
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct InstallPlanReference {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uuid: String,
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Debug, JsonSchema, Default)]
pub struct InstallPlanObjectRef {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionStatus {
    #[serde(rename = "installplan", default, skip_serializing_if = "Option::is_none")]
    pub install: Option<InstallPlanReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_plan_ref: Option<InstallPlanObjectRef>,
    #[serde(rename = "currentCSV", default, skip_serializing_if = "Option::is_none")]
    pub current_csv: Option<String>,
    #[serde(rename = "installedCSV", default, skip_serializing_if = "Option::is_none")]
    pub installed_csv: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
}

impl Subscription {
    /// The generated install plan, if the platform has recorded one.
    /// `installPlanRef` supplies the namespace when present; otherwise the
    /// plan lives next to the subscription and the namespace is left empty.
    pub fn install_plan_reference(&self) -> Option<InstallPlanObjectRef> {
        let status = self.status.as_ref()?;
        let install = status.install.as_ref()?;
        Some(match &status.install_plan_ref {
            Some(reference) => reference.clone(),
            None => InstallPlanObjectRef {
                name: install.name.clone(),
                ..Default::default()
            },
        })
    }
}

#[derive(CustomResource, Serialize, Deserialize, Clone, PartialEq, Debug, JsonSchema, Default)]
#[kube(group = "operators.coreos.com", version = "v1alpha1", kind = "InstallPlan")]
#[kube(namespaced, status = "InstallPlanStatus")]
#[serde(rename_all = "camelCase")]
pub struct InstallPlanSpec {
    #[serde(default)]
    pub cluster_service_version_names: Vec<String>,
    #[serde(default)]
    pub approval: Approval,
    #[serde(default)]
    pub approved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_namespace: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Debug, JsonSchema, Default)]
pub struct InstallPlanStatus {
    #[serde(default)]
    pub phase: String,
}

impl InstallPlan {
    pub fn phase(&self) -> &str {
        self.status
            .as_ref()
            .map(|s| s.phase.as_str())
            .unwrap_or_default()
    }

    pub fn is_complete(&self) -> bool {
        self.phase() == INSTALL_PLAN_COMPLETE
    }

    pub fn awaits_approval(&self) -> bool {
        !self.spec.approved
            && (self.spec.approval == Approval::Manual
                || self.phase() == INSTALL_PLAN_REQUIRES_APPROVAL)
    }
}
