//! `agentpay worker` — serve the 402 job endpoint

use crate::error::{CliError, CliResult};
use crate::runtime::Runtime;
use agentpay_autonomous::{LoopState, LoopStateMachine};
use agentpay_broker::{
    worker_router, BalanceReporter, ClearingVerifier, EchoCollaborator, StatusRecorder,
    WorkerConfig, WorkerState,
};
use agentpay_clearing::{ClearingConfig, ClearingSession, SettlementClient};
use agentpay_wallet::AgentWallet;
use async_trait::async_trait;
use clap::Args;
use std::sync::Arc;
use tracing::{debug, info};

/// Arguments for the worker server
#[derive(Args)]
pub struct WorkerArgs {
    /// Port the job endpoint listens on
    #[arg(long, default_value_t = 9000)]
    pub port: u16,

    /// Flat price per job in asset units (default: 1 whole unit)
    #[arg(long)]
    pub price: Option<u64>,
}

pub async fn run(runtime: Runtime, args: WorkerArgs) -> CliResult<()> {
    let state = build_worker_state(&runtime, args.price, None)?;
    info!(port = args.port, "worker starting");
    serve_worker(state, args.port).await
}

/// Assemble the worker server state shared by `worker` and
/// `autonomous-worker`
pub(crate) fn build_worker_state(
    runtime: &Runtime,
    price: Option<u64>,
    machine: Option<Arc<LoopStateMachine>>,
) -> CliResult<Arc<WorkerState>> {
    let wallet = runtime.worker_identity()?;
    let settlement = SettlementClient::new(runtime.settlement.clone(), wallet.clone())
        .map_err(CliError::Payment)?;
    let verifier = ClearingVerifier::new(wallet.clone(), runtime.clearing.clone(), settlement);

    let mut config = WorkerConfig::new(wallet.address());
    if let Some(price) = price {
        config = config.with_price(price);
    }

    let status = StatusRecorder::new(runtime.status_file.clone());
    status.record("idle", None, None);

    let reporter = Arc::new(LedgerReporter {
        wallet,
        clearing: runtime.clearing.clone(),
        machine,
    });
    {
        // Show the operator where the balance starts; never blocks startup.
        let reporter = reporter.clone();
        tokio::spawn(async move { reporter.report("startup").await });
    }

    Ok(Arc::new(
        WorkerState::new(config, Arc::new(verifier), Arc::new(EchoCollaborator::new()))
            .with_status(status)
            .with_balance_reporter(reporter),
    ))
}

/// Serve the worker router until ctrl-c
pub(crate) async fn serve_worker(state: Arc<WorkerState>, port: u16) -> CliResult<()> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "job endpoint listening");
    axum::serve(listener, worker_router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await?;
    Ok(())
}

/// Logs the unified balance; also walks the autonomous state machine
/// through a completed job when one is attached
struct LedgerReporter {
    wallet: AgentWallet,
    clearing: ClearingConfig,
    machine: Option<Arc<LoopStateMachine>>,
}

#[async_trait]
impl BalanceReporter for LedgerReporter {
    async fn report(&self, moment: &str) {
        if moment == "after job" {
            if let Some(machine) = &self.machine {
                for state in [
                    LoopState::JobReceived,
                    LoopState::Working,
                    LoopState::Completed,
                    LoopState::Idle,
                ] {
                    machine.transition(state);
                }
            }
        }

        match ClearingSession::connect(self.clearing.clone(), &self.wallet).await {
            Ok(session) => {
                match session.ledger_balances().await {
                    Ok(balances) => {
                        for balance in &balances {
                            info!(moment, asset = %balance.asset, amount = balance.amount,
                                  "unified balance");
                        }
                        if balances.is_empty() {
                            info!(moment, "unified balance empty");
                        }
                    }
                    Err(e) => debug!(moment, error = %e, "balance query failed"),
                }
                session.close().await;
            }
            Err(e) => debug!(moment, error = %e, "balance check skipped"),
        }
    }
}
