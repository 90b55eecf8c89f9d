//! CLI interface for service-catalog.
//!
//! Provides command-line argument parsing using clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Command-line interface for service-catalog.
#[derive(Parser)]
#[command(name = "service-catalog")]
#[command(author, version, about = "Service catalog with pluggable storage", long_about = None)]
pub struct Cli {
    /// Path to a config.toml (overrides SERVICE_CATALOG_CONFIG).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// The subcommand to run.
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand)]
pub enum Commands {
    /// List services, optionally filtered.
    List {
        /// Only services in this category (case-insensitive).
        #[arg(short, long)]
        category: Option<String>,

        /// Only services whose name or description contains this text
        /// (case-insensitive).
        #[arg(short, long)]
        search: Option<String>,

        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Show a single service by its exact name.
    Get {
        /// Service name (case-sensitive).
        name: String,

        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Add a new service.
    Add {
        /// Unique service name.
        #[arg(short, long)]
        name: String,

        /// Category for grouping (e.g., "Compute", "Databases").
        #[arg(short, long)]
        category: String,

        /// Description of the service.
        #[arg(short, long)]
        description: String,
    },

    /// Update fields of an existing service. Omitted fields are unchanged.
    Update {
        /// Current service name.
        name: String,

        /// New name for the service.
        #[arg(long = "name", value_name = "NEW_NAME")]
        new_name: Option<String>,

        /// New category.
        #[arg(short, long)]
        category: Option<String>,

        /// New description.
        #[arg(short, long)]
        description: Option<String>,
    },

    /// Delete a service by name.
    Delete {
        /// Service name (case-sensitive).
        name: String,
    },

    /// List the distinct categories in the catalog.
    Categories,

    /// Start the REST API server.
    Serve {
        /// Address to listen on (overrides config and SERVER_ADDR).
        #[arg(short, long)]
        addr: Option<String>,
    },
}
