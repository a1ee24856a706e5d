//! Admission webhooks for the Installation resource.

pub mod handlers;
pub mod manager;
pub mod registry;
pub mod server;

use registry::{ObjectKind, Rule, Strategy, WebhookDescriptor, WebhookRegistry};

const GROUP: &str = "integreatly.org";
const VERSION: &str = "v1alpha1";

fn installation_kind() -> ObjectKind {
    ObjectKind::new(GROUP, VERSION, "Installation")
}

/// The webhooks this operator serves and registers.
pub fn default_registry() -> WebhookRegistry {
    WebhookRegistry::new()
        .register(WebhookDescriptor {
            name: "installation".into(),
            rule: Rule::namespaced(GROUP, VERSION, "installations", &["CREATE", "UPDATE"]),
            strategy: Strategy::Validator(installation_kind()),
            handler: handlers::validate_installation,
        })
        .register(WebhookDescriptor {
            name: "installation-mutate".into(),
            rule: Rule::namespaced(GROUP, VERSION, "installations", &["CREATE", "UPDATE"]),
            strategy: Strategy::Mutator(installation_kind()),
            handler: handlers::mutate_installation,
        })
        .register(WebhookDescriptor {
            name: "installation-delete".into(),
            rule: Rule::namespaced(GROUP, VERSION, "installations", &["DELETE"]),
            strategy: Strategy::Admission {
                path: "/delete-installation".into(),
                mutating: false,
            },
            handler: handlers::delete_installation,
        })
}
