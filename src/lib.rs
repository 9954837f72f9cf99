//! Group engine - dynamic entity groups over Postgres.
//!
//! Compiles a group's rule tree (see [`group_rules_core`]) into a membership
//! query over `processed_entities`, snapshots the matching instances into
//! `group_memberships` in one transaction, and records the outcome in
//! `group_calculation_logs`.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use group_engine::{clients::PgMetadataClient, GroupCalculationService};
//!
//! # async fn run(pool: sqlx::PgPool, group_id: uuid::Uuid) -> group_engine::Result<()> {
//! let metadata = Arc::new(PgMetadataClient::new(pool.clone()));
//! let service = GroupCalculationService::new(pool, metadata);
//! let members = service.calculate_group(group_id).await?;
//! let results = service.get_group_results(group_id).await?;
//! assert_eq!(members.len(), results.member_ids.len());
//! # Ok(())
//! # }
//! ```

pub mod clients;
pub mod config;
pub mod database;
pub mod error;
pub mod notify;
pub mod pipeline;
pub mod results;

pub use config::{CalculationOptions, EngineConfig, OrchestrationConfig};
pub use database::{CalculationRepository, DatabaseConfig, DatabaseManager};
pub use error::{GroupEngineError, Result};
pub use pipeline::GroupCalculationService;
pub use results::GroupResultsReader;

pub use group_rules_core;
