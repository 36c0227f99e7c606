use std::time::Duration;

use async_trait::async_trait;
use control_plane_sdk::HealthStatus;
use tonic::Code;
use tonic::transport::Endpoint;
use tonic_health::pb::HealthCheckRequest;
use tonic_health::pb::health_check_response::ServingStatus;
use tonic_health::pb::health_client::HealthClient;

use crate::config::HealthConfig;
use crate::domain::error::DomainError;
use crate::domain::probe::ModuleProbe;

/// Liveness probe over the standard `grpc.health.v1.Health/Check`.
///
/// A module that answers but does not implement the health service counts
/// as reachable with an unknown status.
#[derive(Debug, Clone)]
pub struct GrpcHealthProbe {
    connect_timeout: Duration,
    probe_timeout: Duration,
}

impl GrpcHealthProbe {
    #[must_use]
    pub fn new(cfg: &HealthConfig) -> Self {
        Self {
            connect_timeout: cfg.connect_timeout,
            probe_timeout: cfg.probe_timeout,
        }
    }
}

#[async_trait]
impl ModuleProbe for GrpcHealthProbe {
    async fn check(&self, module: &str, address: &str) -> Result<HealthStatus, DomainError> {
        let unresponsive = |reason: String| DomainError::ModuleUnresponsive {
            module: module.to_owned(),
            address: address.to_owned(),
            reason,
        };

        let endpoint = Endpoint::from_shared(format!("http://{address}"))
            .map_err(|e| unresponsive(e.to_string()))?
            .connect_timeout(self.connect_timeout)
            .timeout(self.probe_timeout);
        let channel = tokio::time::timeout(self.connect_timeout, endpoint.connect())
            .await
            .map_err(|_| unresponsive("connect timed out".to_owned()))?
            .map_err(|e| unresponsive(e.to_string()))?;

        let mut client = HealthClient::new(channel);
        let response = tokio::time::timeout(
            self.probe_timeout,
            client.check(HealthCheckRequest {
                service: String::new(),
            }),
        )
        .await
        .map_err(|_| unresponsive("health check timed out".to_owned()))?;

        let status = match response {
            Ok(resp) => match resp.into_inner().status() {
                ServingStatus::Serving => HealthStatus::Serving,
                ServingStatus::NotServing => HealthStatus::NotServing,
                ServingStatus::Unknown | ServingStatus::ServiceUnknown => HealthStatus::Unknown,
            },
            Err(status) if status.code() == Code::Unimplemented => HealthStatus::Unknown,
            Err(status) => return Err(unresponsive(status.message().to_owned())),
        };
        tracing::debug!(module = %module, address = %address, ?status, "module probed");
        Ok(status)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use tokio_stream::wrappers::TcpListenerStream;
    use tokio_util::sync::CancellationToken;

    fn probe() -> GrpcHealthProbe {
        GrpcHealthProbe::new(&HealthConfig {
            connect_timeout: Duration::from_millis(500),
            probe_timeout: Duration::from_millis(500),
            ..HealthConfig::default()
        })
    }

    #[tokio::test]
    async fn refused_connection_is_unresponsive() {
        // Bind and drop to get a port nobody listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = probe().check("chat", &addr.to_string()).await.unwrap_err();
        assert!(matches!(err, DomainError::ModuleUnresponsive { ref module, .. } if module == "chat"));
    }

    #[tokio::test]
    async fn serving_health_service_is_reported() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (_reporter, health) = tonic_health::server::health_reporter();
        let cancel = CancellationToken::new();
        let shutdown = cancel.clone();
        let server = tokio::spawn(async move {
            tonic::transport::Server::builder()
                .add_service(health)
                .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
                    shutdown.cancelled().await;
                })
                .await
        });

        let status = probe().check("chat", &addr.to_string()).await.unwrap();
        assert_eq!(status, HealthStatus::Serving);

        cancel.cancel();
        server.await.unwrap().unwrap();
    }
}
