use crate::crd::{ProductName, StageName};

pub const DEFAULT_CHANNEL: &str = "rhmi";

/// Static facts about one product operator.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductDeclaration {
    pub name: ProductName,
    pub stage: StageName,
    /// Appended to the installation's namespace prefix.
    pub namespace_suffix: &'static str,
    pub package: &'static str,
    pub channel: &'static str,
    /// Deployment whose readiness marks the operator as running.
    pub operator_deployment: &'static str,
    pub version: &'static str,
    pub operator_version: &'static str,
    /// A deployment that, found in a namespace this installation does not
    /// own, means the product was installed by hand.
    pub preflight_deployment: Option<&'static str>,
}

pub const CATALOG: [ProductDeclaration; 9] = [
    ProductDeclaration {
        name: ProductName::CloudResources,
        stage: StageName::CloudResources,
        namespace_suffix: "cloud-resources",
        package: "integreatly-cloud-resources",
        channel: DEFAULT_CHANNEL,
        operator_deployment: "cloud-resource-operator",
        version: "0.22.3",
        operator_version: "0.22.3",
        preflight_deployment: None,
    },
    ProductDeclaration {
        name: ProductName::Rhsso,
        stage: StageName::Authentication,
        namespace_suffix: "rhsso",
        package: "integreatly-rhsso",
        channel: DEFAULT_CHANNEL,
        operator_deployment: "keycloak-operator",
        version: "7.4",
        operator_version: "11.0.3",
        preflight_deployment: None,
    },
    ProductDeclaration {
        name: ProductName::RhssoUser,
        stage: StageName::Products,
        namespace_suffix: "user-sso",
        package: "integreatly-rhsso",
        channel: DEFAULT_CHANNEL,
        operator_deployment: "keycloak-operator",
        version: "7.4",
        operator_version: "11.0.3",
        preflight_deployment: Some("sso"),
    },
    ProductDeclaration {
        name: ProductName::ThreeScale,
        stage: StageName::Products,
        namespace_suffix: "3scale",
        package: "integreatly-3scale",
        channel: DEFAULT_CHANNEL,
        operator_deployment: "threescale-operator",
        version: "2.9.1",
        operator_version: "0.6.1",
        preflight_deployment: Some("system-app"),
    },
    ProductDeclaration {
        name: ProductName::CodeReadyWorkspaces,
        stage: StageName::Products,
        namespace_suffix: "codeready-workspaces",
        package: "integreatly-codeready-workspaces",
        channel: DEFAULT_CHANNEL,
        operator_deployment: "codeready-operator",
        version: "2.1.1",
        operator_version: "2.1.1",
        preflight_deployment: Some("codeready"),
    },
    ProductDeclaration {
        name: ProductName::AmqStreams,
        stage: StageName::Products,
        namespace_suffix: "amq-streams",
        package: "integreatly-amq-streams",
        channel: DEFAULT_CHANNEL,
        operator_deployment: "amq-streams-cluster-operator",
        version: "1.1.0",
        operator_version: "1.1.0",
        preflight_deployment: Some("amq-streams-cluster-operator"),
    },
    ProductDeclaration {
        name: ProductName::Fuse,
        stage: StageName::Products,
        namespace_suffix: "fuse",
        package: "integreatly-fuse-online",
        channel: DEFAULT_CHANNEL,
        operator_deployment: "syndesis-operator",
        version: "7.6",
        operator_version: "1.6.0",
        preflight_deployment: Some("syndesis-server"),
    },
    ProductDeclaration {
        name: ProductName::Grafana,
        stage: StageName::Products,
        namespace_suffix: "customer-monitoring",
        package: "integreatly-grafana",
        channel: DEFAULT_CHANNEL,
        operator_deployment: "grafana-operator",
        version: "3.6.0",
        operator_version: "3.6.0",
        preflight_deployment: None,
    },
    ProductDeclaration {
        name: ProductName::Marin3r,
        stage: StageName::Products,
        namespace_suffix: "marin3r",
        package: "integreatly-marin3r",
        channel: DEFAULT_CHANNEL,
        operator_deployment: "marin3r-controller-manager",
        version: "0.5.1",
        operator_version: "0.5.1",
        preflight_deployment: None,
    },
];

/// Whether `package` is one this operator installs.
pub fn is_catalog_package(package: &str) -> bool {
    CATALOG.iter().any(|d| d.package == package)
}
