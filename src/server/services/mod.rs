pub mod forwarder_services;
pub mod media_services;
pub mod resolver_services;
pub mod upstream_services;

pub use forwarder_services::DynForwarderService;
pub use media_services::MediaServices;
pub use resolver_services::DynResolverService;
pub use upstream_services::DynUpstreamService;
