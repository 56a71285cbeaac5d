//! Namespace pod-security label negotiation.

use cluster_api::{ClusterGateway, GatewayError, POD_SECURITY_ENFORCE_LABEL};
use tracing::{info, warn};

use crate::session::SecurityPolicyState;

pub const PRIVILEGED: &str = "privileged";

#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("cannot {action} pod security label on namespace {namespace}: {source}")]
    Permission {
        action: &'static str,
        namespace: String,
        #[source]
        source: GatewayError,
    },
}

impl PolicyError {
    pub fn guidance(&self) -> &'static str {
        "You may need permissions to modify namespace labels."
    }
}

/// Outcome of an elevation request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Elevation {
    AlreadyPrivileged,
    /// The label was changed from `previous` ("" when absent).
    Elevated { previous: String },
}

/// Current enforcement level, "" when the label is absent.
pub fn read_policy(gateway: &dyn ClusterGateway, namespace: &str) -> Result<String, PolicyError> {
    gateway
        .namespace_label(namespace, POD_SECURITY_ENFORCE_LABEL)
        .map(Option::unwrap_or_default)
        .map_err(|source| PolicyError::Permission {
            action: "read",
            namespace: namespace.to_string(),
            source,
        })
}

/// Set the enforcement level; "" removes the label.
pub fn write_policy(
    gateway: &dyn ClusterGateway,
    namespace: &str,
    value: &str,
) -> Result<(), PolicyError> {
    let value = (!value.is_empty()).then_some(value);
    gateway
        .set_namespace_label(namespace, POD_SECURITY_ENFORCE_LABEL, value)
        .map_err(|source| PolicyError::Permission {
            action: "write",
            namespace: namespace.to_string(),
            source,
        })
}

/// Raise the namespace to `privileged` unless it already is.
pub fn elevate(gateway: &dyn ClusterGateway, namespace: &str) -> Result<Elevation, PolicyError> {
    let current = read_policy(gateway, namespace)?;
    if current == PRIVILEGED {
        return Ok(Elevation::AlreadyPrivileged);
    }
    write_policy(gateway, namespace, PRIVILEGED)?;
    info!(namespace, previous = %current, "elevated pod security policy");
    Ok(Elevation::Elevated { previous: current })
}

/// Put the recorded original value back. Issues exactly one write when the
/// session changed the label and none otherwise. Returns whether a write
/// happened.
pub fn restore(
    gateway: &dyn ClusterGateway,
    namespace: &str,
    state: &SecurityPolicyState,
) -> Result<bool, PolicyError> {
    if !state.changed {
        return Ok(false);
    }
    match write_policy(gateway, namespace, &state.original) {
        Ok(()) => {
            info!(namespace, original = %state.original, "restored pod security policy");
            Ok(true)
        }
        Err(err) => {
            warn!(namespace, error = %err, "failed to restore pod security policy");
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cluster_api::testing::StubGateway;

    #[test]
    fn reads_absent_label_as_empty() {
        let stub = StubGateway::new();
        assert_eq!(read_policy(&stub, "shop").unwrap(), "");
    }

    #[test]
    fn elevates_and_reports_previous() {
        let stub = StubGateway::new().with_label("shop", POD_SECURITY_ENFORCE_LABEL, "restricted");
        assert_eq!(
            elevate(&stub, "shop").unwrap(),
            Elevation::Elevated {
                previous: "restricted".to_string()
            }
        );
        assert_eq!(
            stub.label("shop", POD_SECURITY_ENFORCE_LABEL).as_deref(),
            Some("privileged")
        );
    }

    #[test]
    fn privileged_namespace_is_left_alone() {
        let stub = StubGateway::new().with_label("shop", POD_SECURITY_ENFORCE_LABEL, "privileged");
        assert_eq!(elevate(&stub, "shop").unwrap(), Elevation::AlreadyPrivileged);
        assert!(stub.label_writes().is_empty());
    }

    #[test]
    fn write_failure_is_permission_error() {
        let stub = StubGateway::new().with_label_write_error("namespaces \"shop\" is forbidden");
        let err = elevate(&stub, "shop").unwrap_err();
        assert!(err.to_string().contains("forbidden"));
        assert!(err.guidance().contains("permissions"));
    }

    #[test]
    fn restore_removes_absent_original() {
        let stub = StubGateway::new();
        let state = SecurityPolicyState {
            original: String::new(),
            changed: true,
        };
        assert!(restore(&stub, "shop", &state).unwrap());
        assert_eq!(stub.label_writes(), vec![("shop".to_string(), None)]);
    }

    #[test]
    fn restore_without_change_writes_nothing() {
        let stub = StubGateway::new();
        assert!(!restore(&stub, "shop", &SecurityPolicyState::default()).unwrap());
        assert!(stub.label_writes().is_empty());
    }
}
