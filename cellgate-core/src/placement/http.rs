use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::*;
use url::Url;

use super::{InstancePlacement, PlacementError, PlacementService};

/// JSON client for `GET {base}/v1/processes/{guid}/instances/{index}`.
pub struct HttpPlacementService {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpPlacementService {
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url })
    }

    fn instance_url(&self, process_guid: &str, index: u32) -> String {
        format!(
            "{}/v1/processes/{}/instances/{}",
            self.base_url.as_str().trim_end_matches('/'),
            process_guid,
            index
        )
    }
}

#[async_trait]
impl PlacementService for HttpPlacementService {
    async fn resolve_instance(
        &self,
        process_guid: &str,
        index: u32,
    ) -> Result<InstancePlacement, PlacementError> {
        let url = self.instance_url(process_guid, index);
        debug!(%url, "Looking up instance");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| PlacementError::Unavailable(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => return Err(PlacementError::NotFound),
            status if status.is_server_error() => {
                return Err(PlacementError::Unavailable(format!(
                    "placement service returned {status}"
                )))
            }
            status if !status.is_success() => {
                return Err(PlacementError::Invalid(format!(
                    "placement service returned {status}"
                )))
            }
            _ => (),
        }

        response
            .json::<InstancePlacement>()
            .await
            .map_err(|e| PlacementError::Invalid(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_http::{json_response, serve};

    #[tokio::test]
    async fn test_decodes_placement() {
        let body = r#"{
            "instance_guid": "inst-1",
            "index": 2,
            "address": "10.0.0.1",
            "instance_address": "192.168.0.7",
            "ports": [{"container_port": 2222, "host_port": 61001}],
            "ssh_route": {"container_port": 2222, "user": "vcap", "private_key": "pem"}
        }"#;
        let (base, server) = serve(vec![json_response(body)]).await;
        let service =
            HttpPlacementService::new(Url::parse(&base).unwrap(), Duration::from_secs(5)).unwrap();

        let placement = service.resolve_instance("proc", 2).await.unwrap();
        assert_eq!(placement.instance_address, "192.168.0.7");
        assert_eq!(placement.ports[0].host_port, 61001);
        assert_eq!(placement.ssh_route.unwrap().user, "vcap");

        let requests = server.await.unwrap();
        assert!(requests[0].starts_with("GET /v1/processes/proc/instances/2 "));
    }

    #[tokio::test]
    async fn test_missing_instance() {
        let (base, _server) = serve(vec![
            "HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\nconnection: close\r\n\r\n".to_owned(),
        ])
        .await;
        let service =
            HttpPlacementService::new(Url::parse(&base).unwrap(), Duration::from_secs(5)).unwrap();
        assert!(matches!(
            service.resolve_instance("proc", 0).await,
            Err(PlacementError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_server_error_is_unavailable() {
        let (base, _server) = serve(vec![
            "HTTP/1.1 503 Service Unavailable\r\ncontent-length: 0\r\nconnection: close\r\n\r\n"
                .to_owned(),
        ])
        .await;
        let service =
            HttpPlacementService::new(Url::parse(&base).unwrap(), Duration::from_secs(5)).unwrap();
        assert!(matches!(
            service.resolve_instance("proc", 0).await,
            Err(PlacementError::Unavailable(_))
        ));
    }
}
