//! Sends an Apple Push notification to one or more device tokens.
//!
//! The payload comes either from a JSON file (`--file`) or is built from
//! the alert text and badge number.
use anyhow::{Context, Result, bail};
use apns_client::http::Client;
use apns_client::{Notification, Payload, load_certificate};
use clap::Parser;
use serde_json::json;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "apns-push", about = "Send Apple Push notifications")]
struct Args {
    /// Push certificate (PKCS#12).
    #[arg(short = 'c', long = "certificate", default_value = "cert.p12")]
    certificate: PathBuf,
    /// Certificate password.
    #[arg(short = 'p', long = "password", default_value = "")]
    password: String,
    /// Use the sandbox service.
    #[arg(short = 't', long = "sandbox")]
    sandbox: bool,
    /// JSON file with the push message.
    #[arg(short = 'f', long = "file")]
    file: Option<PathBuf>,
    /// Message text.
    #[arg(short = 'a', long = "alert", default_value = "Hello!")]
    alert: String,
    /// Badge number.
    #[arg(short = 'b', long = "badge", default_value_t = 0)]
    badge: u32,
    /// Notification topic.
    #[arg(short = 'i', long = "topic", default_value = "")]
    topic: String,
    /// Device tokens (hex).
    #[arg(required = true)]
    tokens: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();

    let payload = match &args.file {
        Some(path) => {
            let data = std::fs::read(path)
                .with_context(|| format!("read push file {}", path.display()))?;
            let value: serde_json::Value =
                serde_json::from_slice(&data).context("parse push file")?;
            Payload::from(value)
        }
        None if !args.alert.is_empty() => Payload::from(json!({
            "aps": { "alert": args.alert, "badge": args.badge }
        })),
        None => bail!("nothing to send"),
    };

    let identity =
        load_certificate(&args.certificate, &args.password).context("load certificate")?;
    let client = Client::new(&identity)
        .context("build client")?
        .with_sandbox(args.sandbox);

    for token in &args.tokens {
        let notification = Notification {
            token: token.clone(),
            topic: args.topic.clone(),
            payload: payload.clone(),
            ..Notification::default()
        };
        match client.push(&notification).await {
            Ok(id) => println!("Sent: {id}"),
            Err(err) => {
                eprintln!("Error: {err}");
                break;
            }
        }
    }
    println!("Complete!");
    Ok(())
}
