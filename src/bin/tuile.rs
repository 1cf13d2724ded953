//! tuile: back-office data CLI
//!
//! Reads the dashboard, the chantier list and the current role through the
//! sync layer, against the backend named in the config file.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tuile::config::{Secrets, TuileConfig};
use tuile::{DEFAULT_TOP_CLIENTS, RestBackend, SyncClient, SyncError, Tuile};

/// Tuile CLI
#[derive(Parser)]
#[command(name = "tuile")]
#[command(version = tuile::PKG_VERSION)]
#[command(about = "Back-office data client")]
struct Args {
    /// Config file (default: ~/.tuile/config.toml, then /etc/tuile/config.toml)
    #[arg(short, long, env = "TUILE_CONFIG")]
    config: Option<PathBuf>,

    /// Backend URL, overriding the config file
    #[arg(short, long, env = "TUILE_URL")]
    url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Dashboard statistics
    Stats {
        /// Number of clients in the ranking
        #[arg(long, default_value_t = DEFAULT_TOP_CLIENTS)]
        top: usize,
    },

    /// List chantiers, newest first
    Chantiers {
        /// Filter on client name, project type or status
        #[arg(short, long)]
        search: Option<String>,
    },

    /// Show the current user's role and permissions
    Role,
}

fn build_client(args: &Args) -> Result<SyncClient, SyncError> {
    let config = TuileConfig::load_or_default(args.config.as_deref())?;
    let secrets = Secrets::load()?;

    let url = args
        .url
        .clone()
        .or_else(|| config.backend.url.clone())
        .ok_or_else(|| {
            SyncError::Configuration("no backend url: set [backend] url or --url".to_string())
        })?;
    let api_key = secrets.api_key().ok_or_else(|| {
        SyncError::Configuration(
            "no API key: set api_key in ~/.tuile/secrets.toml or TUILE_API_KEY".to_string(),
        )
    })?;

    let mut backend = RestBackend::new(url, api_key)?;
    if let Some(token) = secrets.access_token() {
        backend = backend.with_access_token(token);
    }
    let mut builder = Tuile::builder().config(&config);
    if let Some(user_id) = &config.backend.user_id {
        backend = backend.with_user_id(user_id);
        builder = builder.user_id(user_id);
    }
    builder.rest(backend).build()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialise tracing (default: warn for CLI; override with RUST_LOG).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();
    let client = build_client(&args)?;

    match args.command {
        Command::Stats { top } => {
            let kpis = client.kpis().await?;
            println!("leads: {}", kpis.leads);
            println!("devis: {}", kpis.devis);
            println!("chantiers: {}", kpis.chantiers);
            println!("revenue: {:.2}", kpis.revenue);

            println!();
            println!("leads by status:");
            for (status, count) in client.leads_by_status().await? {
                println!("  {status}: {count}");
            }

            println!();
            println!("top clients:");
            for (rank, client) in client.top_clients(top).await?.iter().enumerate() {
                println!("  {:>2}. {} ({:.2})", rank + 1, client.client_nom, client.total);
            }

            println!();
            println!("revenue by month:");
            for month in client.revenue_last_12_months().await? {
                println!("  {}: {:.2}", month.month, month.total);
            }
        }

        Command::Chantiers { search } => {
            let chantiers = client.chantiers(search.as_deref()).await?;
            if chantiers.is_empty() {
                println!("no chantiers");
            }
            for chantier in chantiers {
                let devis = chantier
                    .devis
                    .as_ref()
                    .map(|d| format!(" [{} {:.2}]", d.numero, d.montant_ttc))
                    .unwrap_or_default();
                println!(
                    "{} {} ({}) {}{}",
                    chantier.id,
                    chantier.nom_client,
                    chantier.statut,
                    chantier.type_projet.as_deref().unwrap_or("-"),
                    devis
                );
            }
        }

        Command::Role => {
            let permissions = client.permissions().await;
            println!("role: {}", permissions.role);
            println!("can edit: {}", permissions.can_edit);
            println!("can delete: {}", permissions.can_delete);
        }
    }

    Ok(())
}
