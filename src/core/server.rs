//! Per-listener service state
//!
//! A `Service` bundles the immutable service record with everything a
//! connection task needs: the resolved static target, the transfer strategy
//! chosen at startup, the shared list store and the online counter.

use std::net::SocketAddr;
use std::sync::Arc;

use super::access::ListStore;
use super::connection::OnlineCounter;
use super::hooks::{CapabilityProbe, LoginLogger, LoginObserver};
use super::relay::{select_strategy, Strategy};
use crate::config::{ConnConfig, ServiceConfig};
use crate::error::{ProxyError, Result};

/// One running service
pub struct Service {
    /// Immutable service record
    pub config: ServiceConfig,
    /// What the static target resolved to at startup
    ///
    /// Connections dial `target_host` by name, so this is only reported.
    pub target: SocketAddr,
    /// Transfer strategy for every relayed login
    pub strategy: Strategy,
    /// Admitted players currently relaying
    pub online: Arc<OnlineCounter>,
    /// Access lists shared by all services
    pub lists: Arc<ListStore>,
    /// Connection performance configuration
    pub conn_config: ConnConfig,
    /// Hears about every admitted player
    pub observer: Arc<dyn LoginObserver>,
}

impl Service {
    /// Create a new service builder
    pub fn builder() -> ServiceBuilder {
        ServiceBuilder::new()
    }

    /// Validate list tags, resolve the static target and pick the strategy
    pub async fn prepare(
        config: ServiceConfig,
        lists: Arc<ListStore>,
        conn_config: ConnConfig,
        probe: &dyn CapabilityProbe,
    ) -> Result<Self> {
        config.check_tags(&lists.snapshot())?;

        let target = resolve_target(&config.target_host, config.target_port).await?;
        let strategy = select_strategy(config.flow, probe, conn_config.multiple_lanes);

        Service::builder()
            .config(config)
            .target(target)
            .strategy(strategy)
            .lists(lists)
            .conn_config(conn_config)
            .build()
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Online count shown in a synthesized status response
    pub fn shown_online(&self) -> i64 {
        self.config
            .minecraft
            .online
            .shown_online
            .unwrap_or_else(|| self.online.current() as i64)
    }
}

/// First address `host:port` resolves to
///
/// Startup check only: a target that does not resolve stops the service.
pub async fn resolve_target(host: &str, port: u16) -> Result<SocketAddr> {
    let first = match tokio::net::lookup_host((host, port)).await {
        Ok(mut addrs) => addrs.next(),
        Err(source) => {
            return Err(ProxyError::Dial {
                target: format!("{}:{}", host, port),
                source,
            })
        }
    };
    first.ok_or_else(|| ProxyError::Dial {
        target: format!("{}:{}", host, port),
        source: std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses resolved"),
    })
}

/// Builder for constructing a Service
pub struct ServiceBuilder {
    config: Option<ServiceConfig>,
    target: Option<SocketAddr>,
    strategy: Option<Strategy>,
    lists: Option<Arc<ListStore>>,
    conn_config: Option<ConnConfig>,
    observer: Option<Arc<dyn LoginObserver>>,
}

impl Default for ServiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            target: None,
            strategy: None,
            lists: None,
            conn_config: None,
            observer: None,
        }
    }

    pub fn config(mut self, config: ServiceConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn target(mut self, target: SocketAddr) -> Self {
        self.target = Some(target);
        self
    }

    pub fn strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn lists(mut self, lists: Arc<ListStore>) -> Self {
        self.lists = Some(lists);
        self
    }

    pub fn conn_config(mut self, config: ConnConfig) -> Self {
        self.conn_config = Some(config);
        self
    }

    /// Replace the default login logger
    pub fn observer(mut self, observer: Arc<dyn LoginObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Build the service
    ///
    /// Config and target are required. The strategy defaults to Origin.
    pub fn build(self) -> Result<Service> {
        let config = self
            .config
            .ok_or_else(|| ProxyError::config("service config is required"))?;
        let target = self
            .target
            .ok_or_else(|| ProxyError::config(format!("service {}: target is required", config.name)))?;
        Ok(Service {
            config,
            target,
            strategy: self.strategy.unwrap_or(Strategy::Origin),
            online: OnlineCounter::new(),
            lists: self.lists.unwrap_or_default(),
            conn_config: self.conn_config.unwrap_or_default(),
            observer: self
                .observer
                .unwrap_or_else(|| Arc::new(LoginLogger) as Arc<dyn LoginObserver>),
        })
    }
}
