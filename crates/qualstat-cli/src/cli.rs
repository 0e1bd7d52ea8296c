use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "qualstat")]
#[command(about = "Qualstat - project-wide data quality statistics", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Service database URL
    #[arg(
        long,
        env = "QUALSTAT_SERVICE_DATABASE_URL",
        default_value = "sqlite://qualstat.db"
    )]
    pub database_url: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start API server
    Serve {
        /// Port to listen on
        #[arg(long, default_value = "3000")]
        port: u16,
    },

    /// Aggregate quality statistics for a project
    Stats {
        /// Project selector (clientId:projectId)
        #[arg(long)]
        project: String,

        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },

    /// List databases registered for a project
    Databases {
        /// Project ID
        #[arg(long)]
        project: i64,

        /// Include inactive databases
        #[arg(long)]
        all: bool,
    },

    /// Register a database file for a project
    RegisterDb {
        /// Project ID
        #[arg(long)]
        project: i64,

        /// Display name
        #[arg(long)]
        name: String,

        /// Path to the SQLite file
        #[arg(long)]
        path: String,
    },

    /// Initialize database
    InitDb,
}
