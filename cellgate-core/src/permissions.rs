use std::sync::Arc;

use async_trait::async_trait;
use cellgate_common::{LogMessage, Permissions, TargetConfig};

use crate::placement::{InstancePlacement, PlacementError, PlacementService};

#[async_trait]
pub trait PermissionsResolver: Send + Sync {
    async fn resolve(
        &self,
        process_guid: &str,
        index: u32,
        connect_via_instance_address: bool,
    ) -> Result<Permissions, PlacementError>;
}

/// Turns a placement answer into the target the proxy should dial.
pub struct PermissionsBuilder {
    placement: Arc<dyn PlacementService>,
}

impl PermissionsBuilder {
    pub fn new(placement: Arc<dyn PlacementService>) -> Self {
        Self { placement }
    }
}

fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

fn build_permissions(
    process_guid: &str,
    placement: InstancePlacement,
    connect_via_instance_address: bool,
) -> Result<Permissions, PlacementError> {
    let route = placement.ssh_route.ok_or(PlacementError::NotFound)?;

    let (host, port, tls_port) = if connect_via_instance_address {
        let tls_port = placement
            .ports
            .iter()
            .find(|p| p.container_port == route.container_port)
            .map(|p| p.container_tls_proxy_port)
            .unwrap_or(0);
        (placement.instance_address, route.container_port, tls_port)
    } else {
        let mapping = placement
            .ports
            .iter()
            .find(|p| p.container_port == route.container_port)
            .ok_or(PlacementError::NotFound)?;
        (
            placement.address,
            mapping.host_port,
            mapping.host_tls_proxy_port,
        )
    };

    if host.is_empty() || port == 0 {
        return Err(PlacementError::NotFound);
    }

    Ok(Permissions {
        target: TargetConfig {
            address: join_host_port(&host, port),
            tls_address: (tls_port != 0).then(|| join_host_port(&host, tls_port)),
            server_cert_domain_san: placement.instance_guid,
            host_fingerprint: route.host_fingerprint,
            user: route.user,
            password: route.password,
            private_key: route.private_key,
        },
        log_message: LogMessage {
            guid: placement
                .log_guid
                .unwrap_or_else(|| process_guid.to_owned()),
            index: placement.index,
        },
        connect_via_instance_address,
    })
}

#[async_trait]
impl PermissionsResolver for PermissionsBuilder {
    async fn resolve(
        &self,
        process_guid: &str,
        index: u32,
        connect_via_instance_address: bool,
    ) -> Result<Permissions, PlacementError> {
        let placement = self.placement.resolve_instance(process_guid, index).await?;
        build_permissions(process_guid, placement, connect_via_instance_address)
    }
}

#[cfg(test)]
mod tests {
    use cellgate_common::Secret;

    use super::*;
    use crate::placement::{PortMapping, SshRoute};

    struct StaticPlacement(Option<InstancePlacement>);

    #[async_trait]
    impl PlacementService for StaticPlacement {
        async fn resolve_instance(
            &self,
            _process_guid: &str,
            _index: u32,
        ) -> Result<InstancePlacement, PlacementError> {
            self.0.clone().ok_or(PlacementError::NotFound)
        }
    }

    fn placement() -> InstancePlacement {
        InstancePlacement {
            instance_guid: "instance-guid".to_owned(),
            index: 1,
            log_guid: Some("log-guid".to_owned()),
            address: "10.0.0.1".to_owned(),
            instance_address: "192.168.1.2".to_owned(),
            ports: vec![PortMapping {
                container_port: 2222,
                host_port: 61001,
                container_tls_proxy_port: 61002,
                host_tls_proxy_port: 61003,
            }],
            ssh_route: Some(SshRoute {
                container_port: 2222,
                host_fingerprint: "a6:14:c0:ea:42:07:b2:f7:53:2c:0b:60:e0:00:21:6c".to_owned(),
                user: "vcap".to_owned(),
                password: None,
                private_key: Some(Secret::new("pem".to_owned())),
            }),
        }
    }

    #[tokio::test]
    async fn test_host_mapped_address() {
        let builder = PermissionsBuilder::new(Arc::new(StaticPlacement(Some(placement()))));
        let permissions = builder.resolve("proc", 1, false).await.unwrap();
        assert_eq!(permissions.target.address, "10.0.0.1:61001");
        assert_eq!(
            permissions.target.tls_address.as_deref(),
            Some("10.0.0.1:61003")
        );
        assert_eq!(permissions.target.server_cert_domain_san, "instance-guid");
        assert_eq!(permissions.target.user, "vcap");
        assert_eq!(permissions.log_message.guid, "log-guid");
        assert!(!permissions.connect_via_instance_address);
    }

    #[tokio::test]
    async fn test_instance_address() {
        let builder = PermissionsBuilder::new(Arc::new(StaticPlacement(Some(placement()))));
        let permissions = builder.resolve("proc", 1, true).await.unwrap();
        assert_eq!(permissions.target.address, "192.168.1.2:2222");
        assert_eq!(
            permissions.target.tls_address.as_deref(),
            Some("192.168.1.2:61002")
        );
        assert!(permissions.connect_via_instance_address);
    }

    #[tokio::test]
    async fn test_missing_route_or_mapping() {
        let mut no_route = placement();
        no_route.ssh_route = None;
        let builder = PermissionsBuilder::new(Arc::new(StaticPlacement(Some(no_route))));
        assert!(matches!(
            builder.resolve("proc", 1, false).await,
            Err(PlacementError::NotFound)
        ));

        let mut no_mapping = placement();
        no_mapping.ports.clear();
        let builder = PermissionsBuilder::new(Arc::new(StaticPlacement(Some(no_mapping))));
        assert!(matches!(
            builder.resolve("proc", 1, false).await,
            Err(PlacementError::NotFound)
        ));
    }

    #[test]
    fn test_ipv6_hosts_are_bracketed() {
        assert_eq!(join_host_port("fd00::1", 22), "[fd00::1]:22");
        assert_eq!(join_host_port("10.0.0.1", 22), "10.0.0.1:22");
    }
}
