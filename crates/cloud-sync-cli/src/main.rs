mod app;
mod commands;
mod config;
mod logging;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use cloud_sync::ProviderType;

use crate::app::App;
use crate::commands::sync_config::NewSyncConfig;

#[derive(Parser)]
#[command(name = "cloud-sync")]
#[command(about = "Mirror documents from cloud drives and SaaS tools into a local library")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List registered providers and their capabilities
    Providers,
    /// Manage connections to remote accounts
    #[command(subcommand)]
    Connection(ConnectionCommand),
    /// Manage sync configs
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Run a sync job for a sync config
    Sync {
        /// Sync config ID
        config_id: String,
        /// Ignore the stored cursor and list everything
        #[arg(long)]
        full: bool,
    },
    /// Show recent sync jobs
    Jobs {
        /// Only jobs of this sync config
        #[arg(long)]
        config: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Browse the folders of a connection
    Browse {
        /// Connection ID
        connection_id: String,
        /// Folder to list (defaults to the root folders)
        #[arg(long)]
        folder: Option<String>,
    },
    /// Download a remote file through the cache and print its local path
    Fetch {
        /// Connection ID
        connection_id: String,
        /// Remote file ID
        remote_id: String,
    },
    /// List documents in the local library
    Documents {
        /// Only documents synced from this connection
        #[arg(long)]
        connection: Option<String>,
    },
    /// Inspect or clear a connection's file cache
    #[command(subcommand)]
    Cache(CacheCommand),
}

#[derive(Subcommand)]
enum ConnectionCommand {
    /// Add a connection, printing its ID
    Add {
        name: String,
        /// Provider type (google-drive, onedrive, webdav, confluence, jira, notion, slack, gmail)
        #[arg(long)]
        provider: ProviderType,
        /// JSON file with the credentials, e.g. {"auth_type": "app_token", "token": "..."}
        #[arg(long)]
        credentials: PathBuf,
        /// Cache budget in bytes for this connection
        #[arg(long)]
        cache_limit: Option<u64>,
        /// Store the credentials without checking them against the provider
        #[arg(long)]
        no_verify: bool,
    },
    /// List connections
    List,
    /// Remove a connection with its sync configs, jobs and cache
    Remove { connection_id: String },
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Add a sync config, printing its ID
    Add {
        /// Connection ID
        connection_id: String,
        name: String,
        /// Folder ID to sync (repeatable; defaults to the root)
        #[arg(long = "folder")]
        folders: Vec<String>,
        /// Allowed file extension (repeatable)
        #[arg(long = "ext")]
        extensions: Vec<String>,
        /// Allowed MIME type (repeatable)
        #[arg(long = "mime")]
        mime_types: Vec<String>,
        /// Skip files larger than this many bytes
        #[arg(long)]
        max_size: Option<u64>,
        /// Glob pattern to exclude (repeatable)
        #[arg(long)]
        exclude: Vec<String>,
        /// Skip files not modified after this RFC 3339 timestamp
        #[arg(long)]
        modified_after: Option<String>,
        /// Remove local documents whose remote file was deleted
        #[arg(long)]
        delete_removed: bool,
        /// Profile to file synced documents under
        #[arg(long)]
        profile: Option<String>,
    },
    /// List sync configs
    List {
        #[arg(long)]
        connection: Option<String>,
    },
}

#[derive(Subcommand)]
enum CacheCommand {
    /// Show cache usage for a connection
    Stats { connection_id: String },
    /// Delete every cached file for a connection
    Clear { connection_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    let cli = Cli::parse();
    let app = App::open(config::load_config())?;

    match cli.command {
        Command::Providers => commands::providers::run(&app.registry).await,
        Command::Connection(command) => match command {
            ConnectionCommand::Add {
                name,
                provider,
                credentials,
                cache_limit,
                no_verify,
            } => {
                commands::connection::add(&app, &name, provider, &credentials, cache_limit, !no_verify)
                    .await
            }
            ConnectionCommand::List => commands::connection::list(&app),
            ConnectionCommand::Remove { connection_id } => {
                commands::connection::remove(&app, &connection_id).await
            }
        },
        Command::Config(command) => match command {
            ConfigCommand::Add {
                connection_id,
                name,
                folders,
                extensions,
                mime_types,
                max_size,
                exclude,
                modified_after,
                delete_removed,
                profile,
            } => commands::sync_config::add(
                &app,
                NewSyncConfig {
                    connection_id,
                    name,
                    folders,
                    extensions,
                    mime_types,
                    max_size,
                    exclude,
                    modified_after,
                    delete_removed,
                    profile,
                },
            ),
            ConfigCommand::List { connection } => {
                commands::sync_config::list(&app, connection.as_deref())
            }
        },
        Command::Sync { config_id, full } => commands::sync::run(&app, &config_id, full).await,
        Command::Jobs { config, limit } => commands::jobs::run(&app, config.as_deref(), limit),
        Command::Browse {
            connection_id,
            folder,
        } => commands::browse::run(&app, &connection_id, folder.as_deref()).await,
        Command::Fetch {
            connection_id,
            remote_id,
        } => commands::fetch::run(&app, &connection_id, &remote_id).await,
        Command::Documents { connection } => {
            commands::documents::run(&app, connection.as_deref())
        }
        Command::Cache(command) => match command {
            CacheCommand::Stats { connection_id } => {
                commands::cache::stats(&app, &connection_id).await
            }
            CacheCommand::Clear { connection_id } => {
                commands::cache::clear(&app, &connection_id).await
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_defaults_to_incremental() {
        let cli = Cli::try_parse_from(["cloud-sync", "sync", "cfg-1"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Sync { ref config_id, full: false } if config_id == "cfg-1"
        ));
    }

    #[test]
    fn connection_add_parses_provider_type() {
        let cli = Cli::try_parse_from([
            "cloud-sync",
            "connection",
            "add",
            "work",
            "--provider",
            "onedrive",
            "--credentials",
            "creds.json",
        ])
        .unwrap();
        match cli.command {
            Command::Connection(ConnectionCommand::Add {
                provider,
                no_verify,
                ..
            }) => {
                assert_eq!(provider, ProviderType::OneDrive);
                assert!(!no_verify);
            }
            _ => panic!("expected connection add"),
        }
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let result = Cli::try_parse_from([
            "cloud-sync",
            "connection",
            "add",
            "work",
            "--provider",
            "dropbox",
            "--credentials",
            "creds.json",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn config_add_collects_repeated_filters() {
        let cli = Cli::try_parse_from([
            "cloud-sync",
            "config",
            "add",
            "conn-1",
            "docs",
            "--ext",
            "pdf",
            "--ext",
            "docx",
            "--exclude",
            "*.tmp",
            "--delete-removed",
        ])
        .unwrap();
        match cli.command {
            Command::Config(ConfigCommand::Add {
                extensions,
                exclude,
                delete_removed,
                folders,
                ..
            }) => {
                assert_eq!(extensions, vec!["pdf", "docx"]);
                assert_eq!(exclude, vec!["*.tmp"]);
                assert!(delete_removed);
                assert!(folders.is_empty());
            }
            _ => panic!("expected config add"),
        }
    }

    #[test]
    fn jobs_limit_defaults_to_twenty() {
        let cli = Cli::try_parse_from(["cloud-sync", "jobs"]).unwrap();
        assert!(matches!(cli.command, Command::Jobs { limit: 20, config: None }));
    }
}
