//! CLI command implementations.

use anyhow::{bail, Context, Result};
use ssn_core::identity::{generate_identity, NodeIdentity, OnionAddress};
use ssn_core::storage::{
    ContactStatus, Database, DatabaseConfig, Repository, SharedRepository, DEFAULT_DB_NAME,
};
use ssn_core::sync::{Daemon, ResyncScheduler, SyncEngine};
use ssn_core::tor::SocksDialer;
use ssn_core::NodeConfig;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Global flags shared by every command.
pub struct Options {
    pub data_dir: String,
    pub socks_port: u16,
    pub listen_port: u16,
    pub interval_secs: u64,
}

impl Options {
    fn db_path(&self) -> PathBuf {
        Path::new(&self.data_dir).join(DEFAULT_DB_NAME)
    }

    fn node_config(&self) -> NodeConfig {
        NodeConfig {
            socks_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, self.socks_port)),
            listen_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, self.listen_port)),
            resync_interval: Duration::from_secs(self.interval_secs.max(1)),
            database: DatabaseConfig {
                path: self.db_path(),
                in_memory: false,
            },
            ..NodeConfig::default()
        }
    }
}

/// Open an existing database.
fn open_database(options: &Options) -> Result<Database> {
    let config = options.node_config().database;
    if !config.path.exists() {
        bail!("No identity found. Run 'ssn init' first.");
    }
    Database::open(&config).context("Failed to open database")
}

fn load_identity(db: &Database) -> Result<NodeIdentity> {
    db.load_identity()
        .context("Failed to load identity")?
        .context("No identity in database")
}

/// Build a sync engine over the on-disk store and the SOCKS proxy.
fn engine(options: &Options) -> Result<Arc<SyncEngine>> {
    let db = open_database(options)?;
    let identity = load_identity(&db)?;
    let config = options.node_config();
    let store: SharedRepository = Arc::new(Mutex::new(db));
    let dialer = Arc::new(SocksDialer::new(config.socks_config()));
    Ok(Arc::new(SyncEngine::new(Arc::new(identity), store, dialer, config)))
}

fn parse_onion(address: &str) -> Result<OnionAddress> {
    OnionAddress::from_string(address)
        .with_context(|| format!("Invalid onion address '{}'", address))
}

/// Generate a new identity and create the database.
pub fn init(options: &Options, force: bool) -> Result<()> {
    let db_path = options.db_path();

    if db_path.exists() {
        if !force {
            bail!("Identity already exists. Use --force to overwrite.");
        }
        std::fs::remove_file(&db_path).context("Failed to remove old database")?;
    }

    std::fs::create_dir_all(&options.data_dir).context("Failed to create data directory")?;

    println!("Generating identity...");
    let identity = generate_identity().context("Failed to generate identity")?;
    let pem = identity.to_pem().context("Failed to encode private key")?;

    let db = Database::open(&options.node_config().database).context("Failed to create database")?;
    db.store_identity_pem(identity.onion_address(), &pem)
        .context("Failed to store identity")?;

    println!("\nGenerated new identity:");
    println!("  Onion address: {}", identity.onion_address());
    println!("  Database:      {}", db_path.display());
    println!("\nConfigure your onion service to forward to 127.0.0.1:{}", options.listen_port);
    println!("using the private key stored in the database.");

    Ok(())
}

/// Show the local identity.
pub fn show_identity(options: &Options) -> Result<()> {
    let db = open_database(options)?;
    let identity = load_identity(&db)?;

    println!("Onion address: {}", identity.onion_address());
    Ok(())
}

/// Store a PENDING contact and send it a contact request.
///
/// Delivery failure is not fatal: the next resync sweep retries.
pub async fn add_contact(
    options: &Options,
    address: &str,
    alias: Option<&str>,
    message: &str,
) -> Result<()> {
    let onion = parse_onion(address)?;
    let engine = engine(options)?;

    if &onion == engine.onion() {
        bail!("Cannot add yourself as a contact");
    }

    {
        let store = engine.store().lock().await;
        if store.contact_by_onion(&onion)?.is_some() {
            bail!("Contact already exists");
        }
        store
            .add_contact(&onion, alias.unwrap_or(onion.as_str()), ContactStatus::Pending, message)
            .context("Failed to add contact")?;
    }
    println!("Contact added: {}", alias.unwrap_or(onion.as_str()));

    match engine.send_contact_request(&onion, message).await {
        Ok(()) => println!("Contact request delivered."),
        Err(e) => println!("Contact request not delivered yet ({}); it will be retried.", e),
    }
    Ok(())
}

/// List all contacts.
pub fn list_contacts(options: &Options) -> Result<()> {
    let db = open_database(options)?;
    let contacts = db.all_contacts().context("Failed to list contacts")?;

    if contacts.is_empty() {
        println!("No contacts.");
        return Ok(());
    }

    println!("{:<24} {:<10} {}", "ALIAS", "STATUS", "ONION");
    for contact in contacts {
        println!("{:<24} {:<10} {}", contact.alias, contact.status, contact.onion);
    }
    Ok(())
}

pub async fn send_request(options: &Options, address: &str, message: &str) -> Result<()> {
    let onion = parse_onion(address)?;
    let engine = engine(options)?;

    engine
        .send_contact_request(&onion, message)
        .await
        .context("Contact request failed")?;
    println!("Contact request delivered to {}", onion);
    Ok(())
}

/// Run the listener and the resync scheduler until Ctrl+C.
pub async fn run_daemon(options: &Options) -> Result<()> {
    let engine = engine(options)?;

    let daemon = Daemon::bind(Arc::clone(&engine))
        .await
        .with_context(|| format!("Failed to bind {}", engine.config().listen_addr))?;

    println!("Onion address: {}", engine.onion());
    println!("Listening on {}", daemon.local_addr()?);
    println!("Press Ctrl+C to stop.");

    let scheduler =
        ResyncScheduler::start(Arc::clone(&engine), engine.config().resync_interval, None);

    daemon
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            }
        })
        .await
        .context("Daemon failed")?;

    let sweeps = scheduler.stop().await;
    println!("\nStopped after {} resync sweeps.", sweeps);
    Ok(())
}

/// Run one resync sweep and print the outcome.
pub async fn sync(options: &Options) -> Result<()> {
    let engine = engine(options)?;
    let report = engine.resync_all().await.context("Resync failed")?;

    println!("Contacts:  {}", report.contacts);
    println!("Succeeded: {}", report.succeeded);
    println!("Failed:    {}", report.failed);
    println!("Timed out: {}", report.timed_out);
    println!("Posts:     {}", report.posts);
    println!("Profiles:  {}", report.profiles);
    Ok(())
}

pub async fn trigger(options: &Options, addresses: &[String]) -> Result<()> {
    let onions = addresses
        .iter()
        .map(|a| parse_onion(a))
        .collect::<Result<Vec<_>>>()?;
    let engine = engine(options)?;

    let total = onions.len();
    let delivered = engine
        .trigger_onions(onions)
        .await
        .context("Trigger task failed")?;
    println!("Triggered {}/{} peers", delivered, total);
    Ok(())
}

/// Publish a post and wait for the notification fan-out.
pub async fn post(options: &Options, message: &str, circle: &str, ttl: u8) -> Result<()> {
    let engine = engine(options)?;

    let circle = engine
        .store()
        .lock()
        .await
        .circle_by_name(circle)?
        .with_context(|| format!("No circle named '{}'", circle))?;

    let (post, fanout) = engine
        .create_post(message, ttl, &[circle.id])
        .await
        .context("Failed to create post")?;
    let delivered = fanout.await.context("Trigger task failed")?;

    println!("Posted {} to {}", post.hash, circle.name);
    println!("Notified {} peers", delivered);
    Ok(())
}
