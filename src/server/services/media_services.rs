use std::sync::Arc;

use tracing::info;

use crate::{config::AppConfig, media::HostRegistry};

use super::{
    forwarder_services::{DynForwarderService, ForwarderService},
    resolver_services::{DynResolverService, ResolverService},
    upstream_services::{DynUpstreamService, UpstreamService},
};

/// everything a media route needs, cloned into each request through an `Extension`.
/// nothing in here is mutated after startup
#[derive(Clone)]
pub struct MediaServices {
    pub resolver: DynResolverService,
    pub forwarder: DynForwarderService,
    pub config: Arc<AppConfig>,
}

impl MediaServices {
    pub fn new(config: Arc<AppConfig>) -> Self {
        let upstream = Arc::new(UpstreamService::new(&config)) as DynUpstreamService;
        Self::with_upstream(config, upstream)
    }

    /// same wiring with a caller supplied upstream, which is how tests swap the network out
    pub fn with_upstream(config: Arc<AppConfig>, upstream: DynUpstreamService) -> Self {
        info!("starting media services...");

        let registry = Arc::new(HostRegistry::from_config(&config));

        info!("host registry ok, starting resolver and forwarder...");

        let resolver = Arc::new(ResolverService::new(registry.clone(), upstream.clone()))
            as DynResolverService;
        let forwarder =
            Arc::new(ForwarderService::new(registry, upstream)) as DynForwarderService;

        Self {
            resolver,
            forwarder,
            config,
        }
    }
}
