//! Collaborator adapters: metadata over Postgres, orchestration over HTTP.

pub mod http_orchestration;
pub mod pg_metadata;

pub use http_orchestration::HttpOrchestrationClient;
pub use pg_metadata::PgMetadataClient;
