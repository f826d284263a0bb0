use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::{Parser, Subcommand};
use serde_json::json;

use ingress_sync::apply::Renderer;
use ingress_sync::certificates::CertificateManager;
use ingress_sync::config::{load_config, ControllerConfig};
use ingress_sync::store::snapshot_from_json;
use ingress_sync::translate::{translate, TranslateOptions};

#[derive(Parser)]
#[command(name = "ingress-sync-cli")]
#[command(about = "Offline tools for the ingress-sync controller", long_about = None)]
struct Cli {
    /// Controller configuration; defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render the proxy configuration for a JSON list of cluster objects
    Render {
        objects: PathBuf,

        /// Print a JSON report instead of the configuration text
        #[arg(long)]
        json: bool,
    },
    /// Validate a configuration file
    CheckConfig { path: PathBuf },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Render { objects, json } => {
            let config = match &cli.config {
                Some(path) => load_config(path)?,
                None => ControllerConfig::default(),
            };
            render(&config, &objects, json)?;
        }
        Commands::CheckConfig { path } => match load_config(&path) {
            Ok(_) => println!("{}: ok", path.display()),
            Err(e) => {
                eprintln!("{}: {}", path.display(), e);
                std::process::exit(1);
            }
        },
    }

    Ok(())
}

fn render(
    config: &ControllerConfig,
    objects: &Path,
    as_json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let text = std::fs::read_to_string(objects)?;
    let loaded = snapshot_from_json(&text)?;
    for kind in &loaded.skipped {
        eprintln!("skipped object of unwatched kind {}", kind);
    }

    let now = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs() as i64;
    let certificates =
        CertificateManager::new(i64::from(config.certificates.expiry_warning_days) * 86_400);
    let options = TranslateOptions::from_config(&config.ingress);

    let translation = translate(&loaded.snapshot, &options, &certificates, now);
    let rendered = Renderer::new(config.proxy.ssl_dir.clone()).render(&translation.model);

    if as_json {
        let report = json!({
            "fingerprint": rendered.fingerprint.to_string(),
            "servers": translation.model.servers.len(),
            "backends": translation.model.backends.len(),
            "certificates": translation.model.certificates.len(),
            "defects": translation.defects,
            "config": rendered.text,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    print!("{}", rendered.text);
    println!("# fingerprint: {}", rendered.fingerprint);
    for defect in &translation.defects {
        eprintln!("defect: {}", defect);
    }
    Ok(())
}
