use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use futures::join;
use kube::{Client, CustomResourceExt};
use tracing::info;

mod client;
mod config;
mod controller;
mod crd;
#[cfg(test)]
mod fake;
mod marketplace;
mod olm;
mod phase;
mod poll;
mod products;
mod resources;
mod webhooks;

use client::{bounded_client, ClusterClient, KubeClusterClient};
use config::{OperatorConfig, RunArgs};
use controller::Context;
use products::ProductRegistry;

#[derive(Parser)]
#[command(name = "integreatly-operator")]
#[command(bin_name = "integreatly-operator")]
enum IntegreatlyCli {
    Run(RunArgs),
    /// Print the Installation CustomResourceDefinition
    Crd,
}

async fn run(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = Arc::new(OperatorConfig::try_from(args)?);
    let client = Client::try_default().await?;
    let cluster: Arc<dyn ClusterClient> = Arc::new(KubeClusterClient::new(client.clone()));
    let products = Arc::new(ProductRegistry::from_catalog());
    let webhook_registry = Arc::new(webhooks::default_registry());

    // Fail fast on a selection no plugin can satisfy.
    products.selected(&config.selected_products)?;
    controller::installation::ensure_installation(cluster.as_ref(), &config).await?;

    let ctx = Arc::new(Context {
        client: cluster.clone(),
        config: config.clone(),
        products: products.clone(),
    });
    let label_ctx = Arc::new(Context {
        client: Arc::new(KubeClusterClient::new(
            bounded_client(Duration::from_secs(10)).await?,
        )),
        config: config.clone(),
        products,
    });

    let webhooks_proc = async {
        if !config.webhooks_enabled {
            info!("Webhooks disabled");
            return Ok::<(), controller::Error>(());
        }
        webhooks::server::setup_certs(
            cluster.as_ref(),
            &config.namespace,
            config.webhook_port,
            &config.cert_dir,
        )
        .await?;
        let (server, loop_result) = join!(
            webhooks::server::serve(
                webhook_registry.clone(),
                config.webhook_port,
                &config.cert_dir
            ),
            controller::webhook::run(ctx.clone(), webhook_registry.clone())
        );
        server?;
        loop_result
    };

    let (installation, subscription, namespace_label, webhooks) = join!(
        controller::installation::run(client.clone(), ctx.clone()),
        controller::subscription::run(client.clone(), ctx.clone()),
        controller::namespace_label::run(client, label_ctx),
        webhooks_proc
    );
    installation?;
    subscription?;
    namespace_label?;
    webhooks?;

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    match IntegreatlyCli::parse() {
        IntegreatlyCli::Run(args) => run(args).await?,
        IntegreatlyCli::Crd => println!("{}", serde_json::to_string_pretty(&crd::Installation::crd())?),
    };

    Ok(())
}
