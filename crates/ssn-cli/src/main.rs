//! ssn command-line interface
//!
//! Runs a node of the onion-routed social network: owns the identity,
//! serves pulls from contacts and keeps their content in sync.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

/// ssn - onion-routed social network node
#[derive(Parser)]
#[command(name = "ssn")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Data directory path
    #[arg(short, long, default_value = "~/.ssn")]
    data_dir: String,

    /// Local SOCKS4a proxy port
    #[arg(long, default_value = "9050")]
    socks_port: u16,

    /// Port the onion service forwards to
    #[arg(long, default_value = "3141")]
    listen_port: u16,

    /// Seconds between resync sweeps
    #[arg(long, default_value = "300")]
    interval_secs: u64,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a new identity
    Init {
        /// Replace an existing database
        #[arg(short, long)]
        force: bool,
    },

    /// Show the local onion address
    Identity,

    /// Add a contact and ask them to connect back
    Add {
        /// Contact's onion address
        address: String,

        /// Display name for the contact
        #[arg(short, long)]
        alias: Option<String>,

        /// Message sent with the contact request
        #[arg(short, long, default_value = "")]
        message: String,
    },

    /// List contacts
    Contacts,

    /// Send a contact request without storing a contact
    Request {
        /// Recipient's onion address
        address: String,

        /// Message text
        #[arg(default_value = "")]
        message: String,
    },

    /// Serve inbound connections and resync periodically
    Daemon,

    /// Run one resync sweep over all contacts
    Sync,

    /// Ask peers to pull from us now
    Trigger {
        /// Onion addresses to notify
        #[arg(required = true)]
        addresses: Vec<String>,
    },

    /// Publish a post to a circle
    Post {
        /// Message text
        message: String,

        /// Target circle
        #[arg(short, long, default_value = "Public")]
        circle: String,

        /// Hop limit
        #[arg(long, default_value = "3")]
        ttl: u8,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let data_dir = shellexpand::tilde(&cli.data_dir).to_string();
    let options = commands::Options {
        data_dir,
        socks_port: cli.socks_port,
        listen_port: cli.listen_port,
        interval_secs: cli.interval_secs,
    };

    let command = cli.command.unwrap_or(Commands::Identity);

    match command {
        Commands::Init { force } => commands::init(&options, force)?,
        Commands::Identity => commands::show_identity(&options)?,
        Commands::Add {
            address,
            alias,
            message,
        } => commands::add_contact(&options, &address, alias.as_deref(), &message).await?,
        Commands::Contacts => commands::list_contacts(&options)?,
        Commands::Request { address, message } => {
            commands::send_request(&options, &address, &message).await?
        }
        Commands::Daemon => commands::run_daemon(&options).await?,
        Commands::Sync => commands::sync(&options).await?,
        Commands::Trigger { addresses } => commands::trigger(&options, &addresses).await?,
        Commands::Post {
            message,
            circle,
            ttl,
        } => commands::post(&options, &message, &circle, ttl).await?,
    }

    Ok(())
}
