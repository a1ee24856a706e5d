//! Keeps upgrades of product operators under this operator's control by
//! forcing manual install plan approval on their subscriptions.

use std::sync::Arc;

use kube::core::ResourceExt;
use kube::runtime::controller::{Action, Controller};
use kube::runtime::{watcher, Config};
use kube::{Api, Client};
use serde_json::json;
use tracing::{info, instrument, warn};

use super::{backoff_for, log_results, Context, Error};
use crate::olm::{Approval, Subscription};
use crate::products::catalog::is_catalog_package;

fn is_managed(subscription: &Subscription, ctx: &Context) -> bool {
    let in_product_namespace = subscription
        .namespace()
        .map(|ns| ns.starts_with(&ctx.config.namespace_prefix))
        .unwrap_or(false);
    in_product_namespace && is_catalog_package(&subscription.spec.name)
}

#[instrument(skip(subscription, ctx), fields(name = %subscription.name_any()))]
async fn reconcile(subscription: Arc<Subscription>, ctx: Arc<Context>) -> Result<Action, Error> {
    if !is_managed(&subscription, &ctx) {
        return Ok(Action::await_change());
    }

    let namespace = subscription.namespace().unwrap_or_default();
    let name = subscription.name_any();
    let Some(current) = ctx.client.get_subscription(&namespace, &name).await? else {
        return Ok(Action::await_change());
    };

    if current.spec.install_plan_approval == Some(Approval::Manual) {
        return Ok(Action::await_change());
    }

    ctx.client
        .patch_subscription(
            &namespace,
            &name,
            &json!({"spec": {"installPlanApproval": Approval::Manual}}),
        )
        .await?;
    info!("Set manual approval on subscription {}/{}", namespace, name);
    Ok(Action::await_change())
}

fn error_policy(subscription: Arc<Subscription>, error: &Error, _ctx: Arc<Context>) -> Action {
    warn!("Subscription {} failed: {}", subscription.name_any(), error);
    backoff_for(error)
}

pub async fn run(client: Client, ctx: Arc<Context>) -> Result<(), Error> {
    let api: Api<Subscription> = Api::all(client);

    let stream = Controller::new(api, watcher::Config::default())
        .with_config(Config::default().concurrency(2))
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx);
    log_results("subscription", stream).await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockClusterClient;
    use crate::config::test_config;
    use crate::olm::SubscriptionSpec;
    use crate::products::ProductRegistry;

    fn subscription(namespace: &str, package: &str, approval: Option<Approval>) -> Subscription {
        let mut sub = Subscription::new(
            package,
            SubscriptionSpec {
                source: "installed-redhat-ns".into(),
                source_namespace: namespace.into(),
                name: package.into(),
                install_plan_approval: approval,
                ..Default::default()
            },
        );
        sub.metadata.namespace = Some(namespace.into());
        sub
    }

    fn context(client: MockClusterClient) -> Arc<Context> {
        Arc::new(Context {
            client: Arc::new(client),
            config: Arc::new(test_config()),
            products: Arc::new(ProductRegistry::new(vec![])),
        })
    }

    #[tokio::test]
    async fn forces_manual_approval() {
        let sub = subscription("prefix-3scale", "integreatly-3scale", Some(Approval::Automatic));
        let stored = sub.clone();
        let mut client = MockClusterClient::new();
        client
            .expect_get_subscription()
            .returning(move |_, _| Ok(Some(stored.clone())));
        client
            .expect_patch_subscription()
            .withf(|ns, name, patch| {
                ns == "prefix-3scale"
                    && name == "integreatly-3scale"
                    && *patch == json!({"spec": {"installPlanApproval": "Manual"}})
            })
            .times(1)
            .returning(|_, name, _| Ok(subscription("prefix-3scale", name, Some(Approval::Manual))));

        let action = reconcile(Arc::new(sub), context(client)).await.unwrap();

        assert_eq!(action, Action::await_change());
    }

    #[tokio::test]
    async fn leaves_manual_subscriptions_alone() {
        let sub = subscription("prefix-3scale", "integreatly-3scale", Some(Approval::Manual));
        let stored = sub.clone();
        let mut client = MockClusterClient::new();
        client
            .expect_get_subscription()
            .returning(move |_, _| Ok(Some(stored.clone())));
        client.expect_patch_subscription().never();

        reconcile(Arc::new(sub), context(client)).await.unwrap();
    }

    #[tokio::test]
    async fn ignores_foreign_subscriptions() {
        let mut client = MockClusterClient::new();
        client.expect_get_subscription().never();
        client.expect_patch_subscription().never();
        let ctx = context(client);

        for sub in [
            subscription("openshift-logging", "integreatly-3scale", None),
            subscription("prefix-3scale", "cluster-logging", None),
        ] {
            let action = reconcile(Arc::new(sub), ctx.clone()).await.unwrap();
            assert_eq!(action, Action::await_change());
        }
    }
}
