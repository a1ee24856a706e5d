use json_patch::{AddOperation, Patch, PatchOperation, ReplaceOperation};
use kube::core::{
    admission::{AdmissionRequest, AdmissionResponse, Operation},
    DynamicObject, ResourceExt,
};
use serde_json::Value;
use tracing::{debug, info};

use crate::crd::{Installation, ProductName, DELETION_PROTECTION_ANNOTATION};

fn installation_of(object: &DynamicObject) -> Result<Installation, String> {
    let raw: Value = serde_json::to_value(object).map_err(|_| "invalid request format".to_string())?;
    serde_json::from_value(raw).map_err(|e| format!("invalid installation: {}", e))
}

/// Rejects installations that could never be reconciled.
pub fn validate_installation(req: &AdmissionRequest<DynamicObject>) -> AdmissionResponse {
    let res = AdmissionResponse::from(req);
    let Some(object) = &req.object else {
        return res;
    };

    let installation = match installation_of(object) {
        Ok(i) => i,
        Err(e) => return res.deny(e),
    };

    if installation.spec.namespace_prefix.trim().is_empty() {
        return res.deny("spec.namespacePrefix must not be empty");
    }
    for product in &installation.spec.selected_products {
        if let Err(e) = product.trim().parse::<ProductName>() {
            return res.deny(e);
        }
    }

    debug!("Installation {} validated", req.name);
    res
}

/// Appends the `-` separator to the namespace prefix when it is missing.
pub fn mutate_installation(req: &AdmissionRequest<DynamicObject>) -> AdmissionResponse {
    let res = AdmissionResponse::from(req);
    let Some(object) = &req.object else {
        return res;
    };

    let installation = match installation_of(object) {
        Ok(i) => i,
        Err(e) => return res.deny(e),
    };

    let prefix = installation.spec.namespace_prefix.trim();
    if prefix.is_empty() || prefix.ends_with('-') {
        return res;
    }

    let path = "/spec/namespacePrefix".to_string();
    let value = Value::String(format!("{}-", prefix));
    let operation = if object.data.pointer(&path).is_some() {
        PatchOperation::Replace(ReplaceOperation { path, value })
    } else {
        PatchOperation::Add(AddOperation { path, value })
    };

    info!("Adding separator to namespace prefix of {}", req.name);
    match res.with_patch(Patch(vec![operation])) {
        Ok(patched) => patched,
        Err(e) => AdmissionResponse::from(req).deny(format!("unable to build patch: {}", e)),
    }
}

/// Refuses to delete an installation still marked as protected.
pub fn delete_installation(req: &AdmissionRequest<DynamicObject>) -> AdmissionResponse {
    let res = AdmissionResponse::from(req);
    if req.operation != Operation::Delete {
        return res;
    }
    let Some(existing) = &req.old_object else {
        return res;
    };

    let protected = existing
        .annotations()
        .get(DELETION_PROTECTION_ANNOTATION)
        .map(|v| v == "true")
        .unwrap_or(false);
    if protected {
        info!("Refusing to delete protected installation {}", existing.name_any());
        return res.deny(format!(
            "installation {} is protected; remove the {} annotation first",
            existing.name_any(),
            DELETION_PROTECTION_ANNOTATION
        ));
    }

    res
}
