//! Docker-host (DinD) endpoint selection and DNS rewriting.
//!
//! Build jobs talk to a docker-in-docker sidecar service through cluster
//! DNS. The selector picks the least-loaded endpoint for a target cluster;
//! the endpoint's service name then has to be qualified with the namespace
//! the executor pod will actually run in, so the short name resolves from
//! there. The rewrite is positional over DNS labels and idempotent: running
//! it twice yields the same host.

use async_trait::async_trait;

use crate::error::Result;

/// Service-name label of the DinD sidecar.
pub const DIND_SERVER: &str = "dind";

#[async_trait]
pub trait DockerHostSelector: Send + Sync {
    /// Best DinD endpoint for the cluster, as a `scheme://host:port` URL.
    /// `hint` carries an optional affinity key (e.g. a previous host).
    async fn best_host(&self, cluster_id: &str, hint: &str) -> Result<String>;
}

/// Qualify the DinD service DNS name with `target_namespace`.
///
/// * `svc.dind` becomes `svc.dind.<target>`
/// * `svc.dind.<other-ns>` becomes `svc.dind.<target>`
/// * a host already qualified with `target_namespace` is returned unchanged
/// * hosts without a `dind` label fall back to replacing a
///   `process_namespace` label if one is present, else pass through
#[must_use]
pub fn qualify_dind_host(host: &str, process_namespace: &str, target_namespace: &str) -> String {
    let (scheme, rest) = match host.split_once("://") {
        Some((scheme, rest)) => (Some(scheme), rest),
        None => (None, host),
    };
    let (name, port) = match rest.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => (name, Some(port)),
        _ => (rest, None),
    };

    let mut labels: Vec<&str> = name.split('.').filter(|l| !l.is_empty()).collect();
    if let Some(dind_pos) = labels.iter().position(|l| *l == DIND_SERVER) {
        // everything after the dind label is the namespace part
        labels.truncate(dind_pos + 1);
        labels.push(target_namespace);
    } else if let Some(ns_pos) = labels.iter().position(|l| *l == process_namespace) {
        labels[ns_pos] = target_namespace;
    } else {
        return host.to_string();
    }

    let mut out = String::new();
    if let Some(scheme) = scheme {
        out.push_str(scheme);
        out.push_str("://");
    }
    out.push_str(&labels.join("."));
    if let Some(port) = port {
        out.push(':');
        out.push_str(port);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::qualify_dind_host;

    #[test]
    fn bare_service_gains_namespace() {
        assert_eq!(
            qualify_dind_host("tcp://dind-0.dind:2375", "zadig", "koderover-agent"),
            "tcp://dind-0.dind.koderover-agent:2375"
        );
    }

    #[test]
    fn existing_namespace_is_replaced() {
        assert_eq!(
            qualify_dind_host("tcp://dind-0.dind.zadig:2375", "zadig", "koderover-agent"),
            "tcp://dind-0.dind.koderover-agent:2375"
        );
    }

    #[test]
    fn rewrite_is_idempotent() {
        let once = qualify_dind_host("tcp://dind-0.dind:2375", "zadig", "koderover-agent");
        let twice = qualify_dind_host(&once, "zadig", "koderover-agent");
        assert_eq!(once, twice);
    }

    #[test]
    fn host_without_dind_label_replaces_process_namespace() {
        assert_eq!(
            qualify_dind_host("tcp://builder.zadig:2375", "zadig", "koderover-agent"),
            "tcp://builder.koderover-agent:2375"
        );
    }

    #[test]
    fn unrelated_host_passes_through() {
        assert_eq!(
            qualify_dind_host("tcp://10.0.0.8:2375", "zadig", "koderover-agent"),
            "tcp://10.0.0.8:2375"
        );
    }
}
