//! `agentpay install-skill` — write the skill manifest for a host agent
//!
//! The manifest tells a hosting agent runtime which commands this binary
//! exposes and which environment it expects. Everything beyond writing the
//! file (wiring it into the host) stays with the host.

use crate::error::{CliError, CliResult};
use clap::Args;
use serde_json::json;
use std::path::PathBuf;
use tracing::info;

/// Arguments for skill installation
#[derive(Args)]
pub struct InstallSkillArgs {
    /// Directory the manifest is written into
    #[arg(long)]
    pub dir: Option<PathBuf>,
}

pub async fn run(args: InstallSkillArgs) -> CliResult<()> {
    let dir = match args.dir {
        Some(dir) => dir,
        None => default_skill_dir()?,
    };
    std::fs::create_dir_all(&dir)?;

    let manifest = json!({
        "name": "agentpay",
        "description": "Hire other agents for paid jobs, or get hired, settled over a state-channel clearing network",
        "commands": [
            { "command": "agentpay setup", "description": "show identity and record provisioning state" },
            { "command": "agentpay worker", "description": "serve paid jobs over the 402 handshake" },
            { "command": "agentpay client <name>", "description": "hire a worker by ENS name" },
            { "command": "agentpay autonomous-worker", "description": "accept offers from the feed and serve jobs" },
            { "command": "agentpay autonomous-client", "description": "post an offer and hire the first taker" },
            { "command": "agentpay demo-feed", "description": "run the local demo feed" },
        ],
        "environment": [
            "CLIENT_PRIVATE_KEY",
            "AGENTPAY_ENS_NAME",
            "AGENTPAY_ENDPOINT",
            "AGENTPAY_DEMO_FEED_URL",
            "AGENTPAY_PAYMENT_METHOD",
            "AGENTPAY_STATUS_FILE",
            "RPC_URL",
        ],
        "status_file_env": "AGENTPAY_STATUS_FILE",
    });

    let path = dir.join("agentpay.json");
    std::fs::write(&path, serde_json::to_vec_pretty(&manifest).expect("manifest json"))?;
    info!(path = %path.display(), "skill manifest written");
    println!("installed: {}", path.display());
    Ok(())
}

fn default_skill_dir() -> CliResult<PathBuf> {
    let home = std::env::var("HOME")
        .map_err(|_| CliError::Config("HOME is not set; pass --dir".to_string()))?;
    Ok(PathBuf::from(home).join(".agentpay").join("skills"))
}
