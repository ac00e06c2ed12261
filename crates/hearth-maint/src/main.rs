// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Hearth maintenance binary: scans repositories for broken references and
//! optionally repairs them.
//!
//! Logging follows `logging.level` from the configuration unless `RUST_LOG`
//! is set.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use hearth_config::{DatabaseBackend, DatabaseConfig, HearthConfig};
use hearth_db::{create_pool, DocumentStore, MemoryStore, Repositories, ScanReport, SqliteStore};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Hearth maintenance - referential-integrity scans over the document store.
#[derive(Parser, Debug)]
#[command(name = "hearth-maint", about = "Hearth document store maintenance", version)]
struct Args {
	/// Config file to use instead of /etc/hearth/hearth.toml
	#[arg(long, global = true, env = "HEARTH_CONFIG")]
	config: Option<PathBuf>,

	#[command(subcommand)]
	command: Option<Command>,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Command {
	/// Scan repositories and report (or fix) orphaned and dangling references
	Scan {
		/// Delete and repair findings instead of only reporting them
		#[arg(long)]
		live: bool,

		/// Scan only this repository, e.g. `users` or `dashboard/task`
		#[arg(long)]
		repository: Option<String>,

		/// Print reports as JSON lines
		#[arg(long)]
		json: bool,
	},
	/// List repositories and the cascade edges between them
	Graph,
}

impl Default for Command {
	fn default() -> Self {
		Command::Scan {
			live: false,
			repository: None,
			json: false,
		}
	}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let args = Args::parse();

	let config = match &args.config {
		Some(path) => hearth_config::load_config_with_file(path),
		None => hearth_config::load_config(),
	}
	.context("failed to load configuration")?;

	tracing_subscriber::registry()
		.with(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| config.logging.level.clone().into()),
		)
		.with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
		.init();

	tracing::info!(
		backend = %config.database.backend,
		database = %config.database.url,
		"starting hearth-maint"
	);

	let store = connect_store(&config.database).await?;
	let repos = Repositories::connect(store)
		.await
		.context("failed to wire repositories")?;

	match args.command.unwrap_or_default() {
		Command::Scan {
			live,
			repository,
			json,
		} => {
			let dry_run = resolve_dry_run(&config, live);
			let reports = match repository {
				Some(name) => vec![repos.validate_named(&name, dry_run).await?],
				None => repos.validate_all(dry_run).await?,
			};
			for report in &reports {
				if json {
					println!("{}", serde_json::to_string(report)?);
				} else {
					print_report(report);
				}
			}
			let findings: usize = reports.iter().map(|r| r.findings.len()).sum();
			tracing::info!(repositories = reports.len(), findings, dry_run, "scan complete");
		}
		Command::Graph => {
			for name in repos.repository_names() {
				println!("{name}");
			}
			for edge in repos.cascade_graph().edges() {
				let events: Vec<String> = edge.events.iter().map(ToString::to_string).collect();
				println!("{} -> {} [{}]", edge.upstream, edge.downstream, events.join(", "));
			}
		}
	}

	Ok(())
}

/// `--live` overrides the configured default; without it the config decides.
fn resolve_dry_run(config: &HearthConfig, live: bool) -> bool {
	!live && config.maintenance.dry_run
}

async fn connect_store(database: &DatabaseConfig) -> anyhow::Result<Arc<dyn DocumentStore>> {
	match database.backend {
		DatabaseBackend::Memory => {
			tracing::warn!("memory backend selected; scanning an empty store");
			Ok(Arc::new(MemoryStore::new()))
		}
		DatabaseBackend::Sqlite => {
			let pool = create_pool(&database.url)
				.await
				.with_context(|| format!("failed to open {}", database.url))?;
			let store = SqliteStore::new(pool);
			store.migrate().await.context("failed to migrate document store")?;
			Ok(Arc::new(store))
		}
	}
}

fn print_report(report: &ScanReport) {
	println!("{report}");
	for finding in &report.findings {
		println!("  {finding}");
	}
}
