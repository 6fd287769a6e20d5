//! `agentpay client <name>` — hire a worker and print the result

use crate::error::{CliError, CliResult};
use crate::runtime::Runtime;
use agentpay_broker::Hirer;
use clap::Args;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

/// Arguments for a one-shot hire
#[derive(Args)]
pub struct ClientArgs {
    /// Worker ENS name, or a direct `http://host:port` endpoint
    pub name: String,

    /// Task type to purchase
    #[arg(long, default_value = "summarize")]
    pub task: String,

    /// JSON input handed to the worker
    #[arg(long, default_value = "{}")]
    pub input: String,
}

pub async fn run(runtime: Runtime, args: ClientArgs) -> CliResult<()> {
    let input: Value = serde_json::from_str(&args.input)
        .map_err(|e| CliError::Config(format!("--input is not valid JSON: {e}")))?;

    let orchestrator = Arc::new(runtime.orchestrator()?);
    let hirer = Hirer::new(runtime.wallet.address(), orchestrator);

    info!(worker = %args.name, task = %args.task, path = %runtime.payment_path, "hiring");
    let outcome = if args.name.contains("://") {
        let worker_address = runtime.worker_address.ok_or_else(|| {
            CliError::Config("endpoint hires need WORKER_ADDRESS for bill validation".to_string())
        })?;
        hirer
            .hire_endpoint(
                &args.name,
                worker_address,
                &args.task,
                input,
                runtime.payment_path,
            )
            .await
    } else {
        hirer
            .with_resolver(runtime.resolver()?)
            .hire(&args.name, &args.task, input, runtime.payment_path)
            .await
    };

    match outcome {
        Ok(result) => {
            println!(
                "{}",
                serde_json::to_string_pretty(&result).unwrap_or_else(|_| "{}".to_string())
            );
            Ok(())
        }
        Err(e) => {
            let failure = json!({ "status": "failed", "reason": e.to_string() });
            println!("{failure}");
            Err(e.into())
        }
    }
}
