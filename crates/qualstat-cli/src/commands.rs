use anyhow::Result;
use std::sync::Arc;

use crate::cli::Commands;
use qualstat_api::{handlers::stats::parse_project_selector, ServiceConfig};
use qualstat_core::{Aggregator, CancellationToken, DatabaseDirectory};
use qualstat_db::{ServiceDatabase, SqliteStatsProvider};

pub async fn execute(command: Commands, database_url: String) -> Result<()> {
    match command {
        Commands::Serve { port } => {
            println!("Starting API server on port {}...", port);

            let mut config = ServiceConfig::load()?;
            config.port = port;
            config.service_database_url = database_url;

            qualstat_api::serve(config).await?;
        }

        Commands::Stats { project, json } => {
            let project_id = parse_project_selector(&project)?;
            let db = ServiceDatabase::new(&database_url).await?;
            let databases = db.list_databases(project_id, true).await?;

            if databases.is_empty() {
                println!("No active databases for project {}", project_id);
                return Ok(());
            }

            tracing::debug!(
                "Aggregating {} databases for project {}",
                databases.len(),
                project_id
            );
            let cancel = CancellationToken::new();
            let _guard = cancel.clone().drop_guard();
            let aggregator = Aggregator::new(Arc::new(SqliteStatsProvider::new()));
            let result = aggregator.aggregate(&databases, &cancel).await;

            for breakdown in &result.databases {
                db.mark_used(breakdown.database_id).await?;
            }

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
                return Ok(());
            }

            println!("Project {} Quality Statistics\n", project_id);
            println!(
                "  Databases: {}/{} processed",
                result.databases_processed,
                databases.len()
            );
            println!("  Total items: {}", result.total_items);
            println!("  Average quality: {:.4}", result.average_quality);
            println!(
                "  Benchmarks: {} ({:.1}%)",
                result.benchmark_count, result.benchmark_percentage
            );

            if !result.by_level.is_empty() {
                println!("\nBy level:");
                for (level, summary) in &result.by_level {
                    println!(
                        "  {:<12} {:>8} items  avg {:.4}  ({:.1}%)",
                        level, summary.count, summary.avg_quality, summary.percentage
                    );
                }
            }

            if let Some(last_activity) = result.last_activity {
                println!("\nLast activity: {}", last_activity);
            }
        }

        Commands::Databases { project, all } => {
            let db = ServiceDatabase::new(&database_url).await?;
            let databases = db.list_project_databases(project, !all).await?;

            if databases.is_empty() {
                println!("No databases found for project {}", project);
            } else {
                println!("Databases for project {}:", project);
                for database in databases {
                    let marker = if database.is_active { "✓" } else { "✗" };
                    println!(
                        "  {} [{}] {} - {}",
                        marker, database.id, database.name, database.file_path
                    );
                    if let Some(used) = database.last_used_at {
                        println!("      Last used: {}", used);
                    }
                }
            }
        }

        Commands::RegisterDb {
            project,
            name,
            path,
        } => {
            let db = ServiceDatabase::new(&database_url).await?;
            let record = db.register_database(project, &name, &path).await?;
            println!("✓ Database registered: {}", record.id);
            println!("  Project: {}", record.project_id);
            println!("  Name: {}", record.name);
            println!("  Path: {}", record.file_path);
        }

        Commands::InitDb => {
            println!("Initializing database schema...");
            let db = ServiceDatabase::new(&database_url).await?;
            db.init_schema().await?;
            println!("✓ Database initialized successfully");
        }
    }

    Ok(())
}
