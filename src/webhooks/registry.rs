use k8s_openapi::api::admissionregistration::v1::RuleWithOperations;
use kube::core::admission::{AdmissionRequest, AdmissionResponse};
use kube::core::DynamicObject;

/// Turns one admission request into its response.
pub type AdmissionHandler = fn(&AdmissionRequest<DynamicObject>) -> AdmissionResponse;

/// The admission rule a webhook is registered for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub api_groups: Vec<String>,
    pub api_versions: Vec<String>,
    pub resources: Vec<String>,
    pub operations: Vec<String>,
    pub scope: String,
}

impl Rule {
    pub fn namespaced(group: &str, version: &str, resource: &str, operations: &[&str]) -> Rule {
        Rule {
            api_groups: vec![group.to_string()],
            api_versions: vec![version.to_string()],
            resources: vec![resource.to_string()],
            operations: operations.iter().map(|o| o.to_string()).collect(),
            scope: "Namespaced".to_string(),
        }
    }
}

impl From<&Rule> for RuleWithOperations {
    fn from(rule: &Rule) -> Self {
        RuleWithOperations {
            api_groups: Some(rule.api_groups.clone()),
            api_versions: Some(rule.api_versions.clone()),
            resources: Some(rule.resources.clone()),
            operations: Some(rule.operations.clone()),
            scope: Some(rule.scope.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectKind {
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl ObjectKind {
    pub fn new(group: &str, version: &str, kind: &str) -> ObjectKind {
        ObjectKind {
            group: group.to_string(),
            version: version.to_string(),
            kind: kind.to_string(),
        }
    }

    fn path_suffix(&self) -> String {
        format!(
            "{}-{}-{}",
            self.group.replace('.', "-"),
            self.version,
            self.kind.to_lowercase()
        )
    }
}

/// How a webhook is exposed. Object bound webhooks derive their path from
/// the kind they guard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy {
    Validator(ObjectKind),
    Mutator(ObjectKind),
    Admission { path: String, mutating: bool },
}

impl Strategy {
    pub fn path(&self) -> String {
        match self {
            Strategy::Validator(kind) => format!("/validate-{}", kind.path_suffix()),
            Strategy::Mutator(kind) => format!("/mutate-{}", kind.path_suffix()),
            Strategy::Admission { path, .. } => path.clone(),
        }
    }

    pub fn is_mutating(&self) -> bool {
        match self {
            Strategy::Validator(_) => false,
            Strategy::Mutator(_) => true,
            Strategy::Admission { mutating, .. } => *mutating,
        }
    }
}

#[derive(Clone)]
pub struct WebhookDescriptor {
    pub name: String,
    pub rule: Rule,
    pub strategy: Strategy,
    pub handler: AdmissionHandler,
}

impl WebhookDescriptor {
    pub fn configuration_name(&self) -> String {
        format!("{}.integreatly.org", self.name)
    }

    pub fn entry_name(&self) -> String {
        if self.strategy.is_mutating() {
            format!("{}-mutating-config.integreatly.org", self.name)
        } else {
            format!("{}-validating-config.integreatly.org", self.name)
        }
    }
}

/// Every webhook served by this process. Assembled once during wiring and
/// only read afterwards.
#[derive(Clone, Default)]
pub struct WebhookRegistry {
    descriptors: Vec<WebhookDescriptor>,
}

impl WebhookRegistry {
    pub fn new() -> WebhookRegistry {
        WebhookRegistry::default()
    }

    pub fn register(mut self, descriptor: WebhookDescriptor) -> WebhookRegistry {
        self.descriptors.push(descriptor);
        self
    }

    pub fn descriptors(&self) -> &[WebhookDescriptor] {
        &self.descriptors
    }

    pub fn by_path(&self, path: &str) -> Option<&WebhookDescriptor> {
        self.descriptors.iter().find(|d| d.strategy.path() == path)
    }
}
