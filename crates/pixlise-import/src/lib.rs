//! PIXLISE Import Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Turns instrument deliveries into canonical PIXLISE datasets, and keeps
//! the dataset and quantification job catalogs up to date.
//!
//! # Components
//!
//! - **Decoders**: product file readers, one per product type ([`decode`])
//! - **Classification**: archive layout detection and file selection ([`layout`], [`breadboard`])
//! - **Assembly**: per-PMC bundling and bulk/max synthesis ([`assemble`])
//! - **Import runs**: trigger to written dataset ([`orchestrator`])
//! - **Indexers**: dataset and job summary catalogs ([`indexer`])
//!
//! # Example
//!
//! ```no_run
//! use pixlise_import::config::Config;
//! use pixlise_import::notify::LoggingSink;
//! use pixlise_import::orchestrator::ImportOrchestrator;
//! use pixlise_import::storage::{connect, StorageConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let store = connect(&StorageConfig::from_env()?).await?;
//!     let importer = ImportOrchestrator::new(
//!         store,
//!         Arc::new(LoggingSink),
//!         config.buckets.clone(),
//!         config.run.notification_debounce_secs,
//!     );
//!
//!     let payload = std::fs::read("trigger.json")?;
//!     let deadline = tokio::time::Instant::now() + config.run.import_deadline();
//!     let outcome = importer.run(&payload, deadline).await?;
//!     println!("Imported {}", outcome.summary.dataset_id);
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod assemble;
pub mod breadboard;
pub mod config;
pub mod debounce;
pub mod decode;
pub mod indexer;
pub mod layout;
pub mod model;
pub mod notify;
pub mod orchestrator;
pub mod output;
pub mod paths;
pub mod product_id;
pub mod quant;
pub mod storage;
pub mod summary;
pub mod trigger;
