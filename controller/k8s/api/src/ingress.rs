//! The annotation and finalizer protocol on secured ingresses, and the ingress shape the
//! controller supports: one rule with one HTTP path backed by a service.

use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, Ingress, IngressRule, IngressServiceBackend, ServiceBackendPort,
};

/// Selects the auth backend that secures the ingress.
pub const BACKEND_ANNOTATION: &str = "auth.bilrost.slok.dev/backend";

/// Set once the ingress is ready to be secured; cleared once rolled back.
pub const HANDLED_ANNOTATION: &str = "auth.bilrost.slok.dev/handled";
pub const HANDLED_VALUE: &str = "true";

/// JSON encoded backup of the original ingress upstream.
pub const BACKUP_ANNOTATION: &str = "auth.bilrost.slok.dev/backup";

pub const FINALIZER: &str = "finalizers.auth.bilrost.slok.dev/security";

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum InvalidIngress {
    #[error("ingress must have exactly one rule, found {0}")]
    RuleCount(usize),

    #[error("ingress rule must have exactly one HTTP path, found {0}")]
    PathCount(usize),

    #[error("ingress path backend must reference a service")]
    NotAService,
}

/// Checks the ingress has the supported shape.
pub fn validate(ingress: &Ingress) -> Result<(), InvalidIngress> {
    service_backend(ingress).map(|_| ())
}

/// The host of the ingress' single rule.
pub fn host(ingress: &Ingress) -> Result<String, InvalidIngress> {
    let rules = rules(ingress)?;
    Ok(rules[0].host.clone().unwrap_or_default())
}

pub fn service_backend(ingress: &Ingress) -> Result<&IngressServiceBackend, InvalidIngress> {
    path(ingress)?
        .backend
        .service
        .as_ref()
        .ok_or(InvalidIngress::NotAService)
}

/// Points the ingress' single path at `service`.
pub fn set_service_backend(
    ingress: &mut Ingress,
    service: IngressServiceBackend,
) -> Result<(), InvalidIngress> {
    validate(ingress)?;
    let path = ingress
        .spec
        .as_mut()
        .and_then(|spec| spec.rules.as_mut())
        .and_then(|rules| rules.first_mut())
        .and_then(|rule| rule.http.as_mut())
        .and_then(|http| http.paths.first_mut())
        .ok_or(InvalidIngress::PathCount(0))?;
    path.backend.service = Some(service);
    Ok(())
}

/// Builds a service backend from a port that is either a number or a name.
pub fn service_backend_for(name: &str, port_or_name: &str) -> IngressServiceBackend {
    let port = match port_or_name.parse::<i32>() {
        Ok(number) => ServiceBackendPort {
            number: Some(number),
            name: None,
        },
        Err(_) => ServiceBackendPort {
            name: Some(port_or_name.to_string()),
            number: None,
        },
    };
    IngressServiceBackend {
        name: name.to_string(),
        port: Some(port),
    }
}

/// Renders a backend port as its name, or as its number when it has no name.
pub fn port_or_name(port: Option<&ServiceBackendPort>) -> String {
    match port {
        Some(ServiceBackendPort {
            name: Some(name), ..
        }) if !name.is_empty() => name.clone(),
        Some(ServiceBackendPort {
            number: Some(n), ..
        }) => n.to_string(),
        _ => String::new(),
    }
}

fn rules(ingress: &Ingress) -> Result<&[IngressRule], InvalidIngress> {
    let rules = ingress
        .spec
        .as_ref()
        .and_then(|spec| spec.rules.as_deref())
        .unwrap_or_default();
    if rules.len() != 1 {
        return Err(InvalidIngress::RuleCount(rules.len()));
    }
    Ok(rules)
}

fn path(ingress: &Ingress) -> Result<&HTTPIngressPath, InvalidIngress> {
    let rules = rules(ingress)?;
    let paths = rules[0]
        .http
        .as_ref()
        .map(|http| http.paths.as_slice())
        .unwrap_or_default();
    if paths.len() != 1 {
        return Err(InvalidIngress::PathCount(paths.len()));
    }
    Ok(&paths[0])
}
