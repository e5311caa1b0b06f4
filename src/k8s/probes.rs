use k8s_openapi::api::core::v1::{ExecAction, GRPCAction, HTTPGetAction, Probe, TCPSocketAction};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

/// Zero delays are left unset so the Kubernetes defaults apply.
fn non_zero(value: i32) -> Option<i32> {
    (value != 0).then_some(value)
}

/// HTTP GET probe against `path` on `port`
pub fn http_probe(path: &str, port: i32, initial_delay: i32, period: i32) -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some(path.to_string()),
            port: IntOrString::Int(port),
            ..Default::default()
        }),
        initial_delay_seconds: non_zero(initial_delay),
        period_seconds: non_zero(period),
        ..Default::default()
    }
}

/// gRPC health probe on `port`
pub fn grpc_probe(port: i32, initial_delay: i32, period: i32) -> Probe {
    Probe {
        grpc: Some(GRPCAction {
            port,
            service: None,
        }),
        initial_delay_seconds: non_zero(initial_delay),
        period_seconds: non_zero(period),
        ..Default::default()
    }
}

/// Command-based probe (e.g. `pg_isready -U <user>`)
pub fn exec_probe(command: Vec<String>, initial_delay: i32, period: i32) -> Probe {
    Probe {
        exec: Some(ExecAction {
            command: Some(command),
        }),
        initial_delay_seconds: non_zero(initial_delay),
        period_seconds: non_zero(period),
        ..Default::default()
    }
}

/// TCP connect probe on `port`
pub fn tcp_probe(port: i32, initial_delay: i32, period: i32) -> Probe {
    Probe {
        tcp_socket: Some(TCPSocketAction {
            port: IntOrString::Int(port),
            ..Default::default()
        }),
        initial_delay_seconds: non_zero(initial_delay),
        period_seconds: non_zero(period),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_probe_defaults_left_unset() {
        let probe = http_probe("/healthz", 8080, 0, 0);
        assert!(probe.initial_delay_seconds.is_none());
        assert!(probe.period_seconds.is_none());
        let http = probe.http_get.unwrap();
        assert_eq!(http.path.as_deref(), Some("/healthz"));
        assert_eq!(http.port, IntOrString::Int(8080));
    }

    #[test]
    fn test_exec_probe_delays_set() {
        let probe = exec_probe(vec!["pg_isready".into()], 5, 10);
        assert_eq!(probe.initial_delay_seconds, Some(5));
        assert_eq!(probe.period_seconds, Some(10));
    }

    #[test]
    fn test_grpc_probe_port() {
        let probe = grpc_probe(9090, 0, 0);
        assert_eq!(probe.grpc.unwrap().port, 9090);
    }
}
