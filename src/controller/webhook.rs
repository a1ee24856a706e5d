//! Periodic convergence of webhook configuration. Unlike the other
//! controllers this loop watches nothing: the CA bundle and serving
//! certificate are issued out of band, so it re-applies on a timer.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use super::{Context, Error};
use crate::webhooks::manager::WebhookManager;
use crate::webhooks::registry::WebhookRegistry;

const REQUEUE_AFTER_SUCCESS: Duration = Duration::from_secs(5 * 60);
const REQUEUE_AFTER_ERROR: Duration = Duration::from_secs(30);

async fn reconcile(ctx: &Context, registry: &WebhookRegistry) -> Duration {
    let mut manager = WebhookManager::new(
        ctx.client.as_ref(),
        registry,
        &ctx.config.namespace,
        ctx.config.webhook_port,
    );
    match manager.reconcile().await {
        Ok(()) => REQUEUE_AFTER_SUCCESS,
        Err(e) => {
            warn!("webhook reconcile failed with CA bundle {}: {}", manager.state(), e);
            REQUEUE_AFTER_ERROR
        }
    }
}

pub async fn run(ctx: Arc<Context>, registry: Arc<WebhookRegistry>) -> Result<(), Error> {
    loop {
        let delay = reconcile(&ctx, &registry).await;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    info!("webhook controller terminated");
    Ok(())
}
