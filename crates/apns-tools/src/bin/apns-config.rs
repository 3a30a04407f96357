//! Builds an APNs configuration JSON from PEM certificate and key files.
//!
//! When no bundle id is given the tool tries to read it from the
//! certificate itself; always double-check the result.
use anyhow::{Context, Result};
use apns_client::config::ConfigFile;
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "apns-config", about = "Create an APNs configuration file")]
struct Args {
    /// Certificate file name.
    #[arg(long, default_value = "cert.pem")]
    cert: PathBuf,
    /// Private key file name.
    #[arg(long, default_value = "key.pem")]
    key: PathBuf,
    /// Bundle id; read from the certificate when omitted.
    #[arg(long, env = "BUNDLE_ID")]
    bundle: Option<String>,
    /// Target the sandbox environment.
    #[arg(long, action = clap::ArgAction::Set, default_value_t = true)]
    sandbox: bool,
    /// Output file name.
    #[arg(long, default_value = "config.json")]
    output: PathBuf,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();

    let config = ConfigFile::create(args.bundle.as_deref(), &args.cert, &args.key, args.sandbox)
        .context("build configuration")?;
    let data = serde_json::to_string_pretty(&config).context("encode configuration")?;

    let mut open = std::fs::OpenOptions::new();
    open.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        open.mode(0o600);
    }
    let mut file = open
        .open(&args.output)
        .with_context(|| format!("create {}", args.output.display()))?;
    file.write_all(data.as_bytes())
        .with_context(|| format!("write {}", args.output.display()))?;

    println!("Created: {}", args.output.display());
    Ok(())
}
