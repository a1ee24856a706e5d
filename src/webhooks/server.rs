use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use kube::core::{
    admission::{AdmissionRequest, AdmissionResponse, AdmissionReview},
    DynamicObject,
};
use tracing::{info, warn};
use warp::{path::FullPath, reply, Filter, Reply};

use super::manager::{reconcile_service, SERVICE_NAME, SERVING_CERT_SECRET};
use super::registry::WebhookRegistry;
use crate::client::ClusterClient;
use crate::controller::Error;
use crate::poll::{poll_until, DEFAULT_POLL_INTERVAL, DEFAULT_POLL_TIMEOUT};

const CERT_FILE: &str = "tls.crt";
const KEY_FILE: &str = "tls.key";

fn cert_paths(cert_dir: &Path) -> (PathBuf, PathBuf) {
    (cert_dir.join(CERT_FILE), cert_dir.join(KEY_FILE))
}

/// Put a serving certificate into `cert_dir`. The platform issues it into
/// the serving secret once the webhook Service exists, so the Service is
/// converged first; `local` builds generate their own certificate instead.
pub async fn setup_certs(
    client: &dyn ClusterClient,
    namespace: &str,
    target_port: u16,
    cert_dir: &Path,
) -> Result<(), Error> {
    reconcile_service(client, namespace, target_port).await?;

    let (cert, key) = if cfg!(feature = "local") {
        self_signed_cert(namespace)?
    } else {
        serving_cert(client, namespace).await?
    };

    let (cert_path, key_path) = cert_paths(cert_dir);
    tokio::fs::create_dir_all(cert_dir).await?;
    tokio::fs::write(&cert_path, cert).await?;
    tokio::fs::write(&key_path, key).await?;

    info!("Webhook certificate written to {}", cert_dir.display());
    Ok(())
}

async fn serving_cert(client: &dyn ClusterClient, namespace: &str) -> Result<(Vec<u8>, Vec<u8>), Error> {
    let pair = poll_until(DEFAULT_POLL_INTERVAL, DEFAULT_POLL_TIMEOUT, || async move {
        let Some(secret) = client.get_secret(namespace, SERVING_CERT_SECRET).await? else {
            return Ok::<_, Error>(None);
        };
        let mut data = secret.data.unwrap_or_default();
        Ok(match (data.remove(CERT_FILE), data.remove(KEY_FILE)) {
            (Some(cert), Some(key)) if !cert.0.is_empty() && !key.0.is_empty() => {
                Some((cert.0, key.0))
            }
            _ => None,
        })
    })
    .await?;

    pair.ok_or_else(|| {
        Error::Timeout(format!("serving secret {}/{}", namespace, SERVING_CERT_SECRET))
    })
}

fn self_signed_cert(namespace: &str) -> Result<(Vec<u8>, Vec<u8>), Error> {
    let names = vec![
        format!("{}.{}.svc", SERVICE_NAME, namespace),
        "localhost".to_string(),
    ];
    let cert = rcgen::generate_simple_self_signed(names)?;
    warn!("Using a self-signed webhook certificate");
    Ok((
        cert.serialize_pem()?.into_bytes(),
        cert.serialize_private_key_pem().into_bytes(),
    ))
}

pub fn routes(
    registry: Arc<WebhookRegistry>,
) -> impl Filter<Extract = (impl Reply,), Error = warp::Rejection> + Clone {
    warp::post()
        .and(warp::path::full())
        .and(warp::body::json())
        .and_then(move |path: FullPath, body: AdmissionReview<DynamicObject>| {
            handler(registry.clone(), path, body)
        })
        .with(warp::trace::request())
}

/// Serve every registered webhook over TLS until ctrl-c.
pub async fn serve(registry: Arc<WebhookRegistry>, port: u16, cert_dir: &Path) -> Result<(), Error> {
    let (cert_path, key_path) = cert_paths(cert_dir);
    let (addr, server) = warp::serve(routes(registry))
        .tls()
        .cert_path(cert_path)
        .key_path(key_path)
        .bind_with_graceful_shutdown(([0, 0, 0, 0], port), async {
            let _ = tokio::signal::ctrl_c().await;
        });

    info!("Webhook server listening on {}", addr);
    server.await;
    info!("Webhook server terminated");
    Ok(())
}

async fn handler(
    registry: Arc<WebhookRegistry>,
    path: FullPath,
    body: AdmissionReview<DynamicObject>,
) -> Result<impl Reply, Infallible> {
    let req: AdmissionRequest<_> = match body.try_into() {
        Ok(req) => req,
        Err(err) => {
            return Ok(reply::json(
                &AdmissionResponse::invalid(err.to_string()).into_review(),
            ));
        }
    };

    let res = match registry.by_path(path.as_str()) {
        Some(descriptor) => (descriptor.handler)(&req),
        None => {
            warn!("No webhook registered for {}", path.as_str());
            AdmissionResponse::from(&req).deny(format!("no webhook registered for {}", path.as_str()))
        }
    };

    Ok(reply::json(&res.into_review()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::time::Duration;

    use k8s_openapi::api::core::v1::Secret;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use k8s_openapi::ByteString;
    use serde_json::{json, Value};

    use crate::fake::FakeCluster;
    use crate::webhooks::default_registry;
    use crate::webhooks::handlers::tests::{installation, review};

    async fn post(path: &str, body: &Value) -> Value {
        let filter = routes(Arc::new(default_registry()));
        let res = warp::test::request()
            .method("POST")
            .path(path)
            .json(body)
            .reply(&filter)
            .await;
        assert_eq!(res.status(), 200);
        serde_json::from_slice(res.body()).unwrap()
    }

    #[tokio::test]
    async fn dispatches_by_path() {
        let body = review(
            "CREATE",
            Some(installation(json!({"namespacePrefix": ""}), json!({}))),
            None,
        );

        let reply = post("/validate-integreatly-org-v1alpha1-installation", &body).await;
        assert_eq!(reply["response"]["allowed"], false);

        let reply = post("/delete-installation", &body).await;
        assert_eq!(reply["response"]["allowed"], true);
    }

    #[tokio::test]
    async fn unknown_paths_are_denied() {
        let body = review(
            "CREATE",
            Some(installation(json!({"namespacePrefix": "acme-"}), json!({}))),
            None,
        );
        let reply = post("/validate-something-else", &body).await;
        assert_eq!(reply["response"]["allowed"], false);
        assert_eq!(
            reply["response"]["uid"],
            "705ab4f5-6393-11e8-b7cc-42010a800002"
        );
    }

    fn serving_secret() -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some(SERVING_CERT_SECRET.to_string()),
                namespace: Some("rhmi-operator".to_string()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([
                (CERT_FILE.to_string(), ByteString(b"cert".to_vec())),
                (KEY_FILE.to_string(), ByteString(b"key".to_vec())),
            ])),
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn serving_secret_is_read_once_issued() {
        let cluster = FakeCluster::new();
        cluster.seed(|state| {
            state.secrets.insert(
                ("rhmi-operator".to_string(), SERVING_CERT_SECRET.to_string()),
                serving_secret(),
            );
        });

        let (cert, key) = serving_cert(&cluster, "rhmi-operator").await.unwrap();
        assert_eq!(cert, b"cert");
        assert_eq!(key, b"key");
    }

    #[tokio::test(start_paused = true)]
    async fn service_exists_before_waiting_for_its_certificate() {
        let cluster = Arc::new(FakeCluster::new());
        let issuer = cluster.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(500)).await;
                let mut state = issuer.state();
                if !state.services.is_empty() {
                    state.secrets.insert(
                        ("rhmi-operator".to_string(), SERVING_CERT_SECRET.to_string()),
                        serving_secret(),
                    );
                    return;
                }
            }
        });

        let cert_dir = std::env::temp_dir().join(format!("rhmi-webhook-certs-{}", std::process::id()));
        setup_certs(cluster.as_ref(), "rhmi-operator", 8090, &cert_dir)
            .await
            .unwrap();

        assert_eq!(cluster.writes_of("Service"), 1);
        assert!(cert_dir.join(CERT_FILE).exists());
        assert!(cert_dir.join(KEY_FILE).exists());
        let _ = std::fs::remove_dir_all(&cert_dir);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_serving_secret_times_out() {
        let cluster = FakeCluster::new();
        let result = serving_cert(&cluster, "rhmi-operator").await;
        assert!(matches!(result, Err(Error::Timeout(_))));
    }

    #[test]
    fn self_signed_pair_is_pem() {
        let (cert, key) = self_signed_cert("rhmi-operator").unwrap();
        assert!(String::from_utf8(cert).unwrap().starts_with("-----BEGIN CERTIFICATE-----"));
        assert!(String::from_utf8(key).unwrap().contains("PRIVATE KEY"));
    }
}
