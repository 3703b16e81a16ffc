// src/bin/mint_token.rs
//! Mint or check a serve token with the same secret the server uses.
//!
//! ```sh
//! TIKTOK_SERVE_SECRET=... mint_token create https://blob.example.com/img.png --app-url https://www.bleamies.com
//! TIKTOK_SERVE_SECRET=... mint_token verify <token>
//! ```
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Duration as ChronoDuration;
use clap::{Args, Parser, Subcommand};

use tiktok_relay::config::Config;
use tiktok_relay::handlers::serve::serve_url;
use tiktok_relay::token::{ServeTokens, SystemClock};

#[derive(Debug, Parser)]
#[command(about = "Mint or verify TikTok serve tokens")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Sign a blob URL into a serve token
    Create(CreateArgs),
    /// Check a token and print the URL it resolves to
    Verify(VerifyArgs),
}

#[derive(Debug, Args)]
struct CreateArgs {
    /// Blob URL the token should resolve to
    resource_url: String,

    /// Lifetime in milliseconds (defaults to SERVE_TOKEN_TTL_MS or one hour)
    #[arg(long, allow_hyphen_values = true)]
    ttl_ms: Option<i64>,

    /// Also print the full serve URL on this origin
    #[arg(long, env = "APP_URL")]
    app_url: Option<String>,
}

#[derive(Debug, Args)]
struct VerifyArgs {
    /// Token as it appears in the serve URL's `token` parameter
    token: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = Config::from_env();
    let ttl = cfg.serve_token_ttl();
    let tokens = ServeTokens::new(cfg.serve_secret.clone(), ttl, Arc::new(SystemClock));

    match cli.command {
        Command::Create(args) => {
            let ttl = args.ttl_ms.map(ChronoDuration::milliseconds).unwrap_or(ttl);
            let token = tokens
                .create_with_ttl(&args.resource_url, ttl)
                .context("create serve token")?;
            println!("token: {token}");
            println!("ttl_ms: {}", ttl.num_milliseconds());
            if let Some(app_url) = args.app_url.as_deref().filter(|u| !u.trim().is_empty()) {
                println!("serve_url: {}", serve_url(app_url.trim(), &token));
            }
        }
        Command::Verify(args) => {
            let url = tokens.verify(&args.token).context("verify serve token")?;
            println!("resource_url: {url}");
        }
    }
    Ok(())
}
