//! Group calculation CLI
//!
//! Usage:
//!   cargo run --features cli --bin group_calc -- calculate <GROUP_ID>
//!   cargo run --features cli --bin group_calc -- results <GROUP_ID> --json
//!   cargo run --features cli --bin group_calc -- explain <GROUP_ID>
//!
//! Reads DATABASE_URL, ORCHESTRATION_URL and friends from the environment
//! (or a `.env` file).

use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::json;
use uuid::Uuid;

use group_engine::clients::{HttpOrchestrationClient, PgMetadataClient};
use group_engine::{DatabaseManager, EngineConfig, GroupCalculationService, GroupEngineError};

#[derive(Parser)]
#[command(name = "group_calc")]
#[command(about = "Calculate dynamic entity groups and inspect their membership")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Recompute a group's membership
    Calculate { group_id: Uuid },

    /// Show the membership of the last completed calculation
    Results { group_id: Uuid },

    /// Print the compiled membership query without running it
    Explain { group_id: Uuid },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("group_engine=info")),
        )
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = EngineConfig::from_env()?;
    let db = DatabaseManager::new(config.database.clone()).await?;
    let pool = db.pool().clone();

    let metadata = Arc::new(PgMetadataClient::new(pool.clone()));
    let mut service =
        GroupCalculationService::new(pool, metadata).with_options(config.calculation);
    if let Some(orchestration) = &config.orchestration {
        let client =
            HttpOrchestrationClient::with_timeout(&orchestration.base_url, orchestration.timeout)?;
        service = service.with_orchestration(Arc::new(client));
    }

    match cli.command {
        Commands::Calculate { group_id } => {
            let (members, notification) = service.calculate_group_with_notification(group_id).await?;
            if cli.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&json!({
                        "groupId": group_id,
                        "memberCount": members.len(),
                        "memberIds": members,
                    }))?
                );
            } else {
                println!("Group {}: {} member(s)", group_id, members.len());
                for id in &members {
                    println!("  {}", id);
                }
            }
            // The runtime shuts down when `run` returns; finish triggering first.
            if let Some(handle) = notification {
                match handle.await {
                    Ok(summary) if !summary.failed.is_empty() => eprintln!(
                        "warning: {} of {} workflow trigger(s) failed",
                        summary.failed.len(),
                        summary.failed.len() + summary.triggered.len()
                    ),
                    Ok(_) => {}
                    Err(e) => eprintln!("warning: notification task failed: {}", e),
                }
            }
        }

        Commands::Results { group_id } => match service.get_group_results(group_id).await {
            Ok(results) => {
                if cli.json {
                    println!("{}", serde_json::to_string_pretty(&results)?);
                } else {
                    match results.calculated_at {
                        Some(at) => println!(
                            "Group {}: {} member(s), calculated {}",
                            group_id,
                            results.member_ids.len(),
                            at.to_rfc3339()
                        ),
                        None => println!("Group {} has never been calculated", group_id),
                    }
                    for id in &results.member_ids {
                        println!("  {}", id);
                    }
                }
            }
            Err(GroupEngineError::CalculationNotSuccessful {
                status,
                calculated_at,
                error_message,
                ..
            }) if cli.json => {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&json!({
                        "groupId": group_id,
                        "status": status,
                        "calculatedAt": calculated_at,
                        "errorMessage": error_message,
                        "memberIds": [],
                    }))?
                );
                anyhow::bail!("last calculation was not successful (status: {})", status);
            }
            Err(e) => return Err(e.into()),
        },

        Commands::Explain { group_id } => {
            let query = service.explain_group(group_id).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&query)?);
            } else {
                println!("{}", query.sql);
                for (i, param) in query.params.iter().enumerate() {
                    println!("  ${} = {}", i + 1, param);
                }
            }
        }
    }

    Ok(())
}
