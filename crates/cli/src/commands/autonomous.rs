//! `agentpay autonomous-worker` / `autonomous-client` — feed-driven hiring
//!
//! The worker watches the feed and answers offers with accept replies while
//! serving the job endpoint. The client posts exactly one offer, then hires
//! the first worker that accepts; posting another offer means running the
//! command again.

use crate::commands::worker::{build_worker_state, serve_worker};
use crate::error::{CliError, CliResult};
use crate::runtime::Runtime;
use agentpay_autonomous::{
    AutonomousLoop, Feed, FeedItem, HttpFeed, IntentHandler, LoopConfig, LoopState,
    LoopStateMachine,
};
use agentpay_broker::{BrokerError, Hirer};
use agentpay_clearing::PaymentPath;
use agentpay_protocol::{render_accept, render_offer, Accept, JobResult, Offer};
use async_trait::async_trait;
use clap::Args;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Arguments for the autonomous worker
#[derive(Args)]
pub struct AutonomousWorkerArgs {
    /// Port the job endpoint listens on
    #[arg(long, default_value_t = 9000)]
    pub port: u16,

    /// Feed poll interval in seconds
    #[arg(long, default_value_t = 5)]
    pub poll_secs: u64,
}

/// Arguments for the autonomous client
#[derive(Args)]
pub struct AutonomousClientArgs {
    /// Task type to offer
    #[arg(long, default_value = "summarize")]
    pub task: String,

    /// JSON input handed to whoever accepts
    #[arg(long, default_value = "{}")]
    pub input: String,

    /// Offered price in AP units
    #[arg(long, default_value_t = 1)]
    pub price: u64,

    /// Feed poll interval in seconds
    #[arg(long, default_value_t = 5)]
    pub poll_secs: u64,
}

pub async fn run_worker(runtime: Runtime, args: AutonomousWorkerArgs) -> CliResult<()> {
    let ens = runtime.ens_name()?;
    let machine = Arc::new(LoopStateMachine::new());
    let state = build_worker_state(&runtime, None, Some(machine.clone()))?;

    let feed: Arc<dyn Feed> = Arc::new(HttpFeed::new(&runtime.feed_url));
    let handler = Arc::new(WorkerIntents {
        feed: feed.clone(),
        machine: machine.clone(),
        ens: ens.clone(),
    });
    let looper = AutonomousLoop::new(
        feed,
        handler,
        LoopConfig {
            poll_interval: Duration::from_secs(args.poll_secs.max(1)),
            ..Default::default()
        },
    )
    .with_state_machine(machine);

    info!(%ens, port = args.port, feed = %runtime.feed_url, "autonomous worker starting");
    let (cancel_tx, cancel_rx) = oneshot::channel();
    let loop_task = tokio::spawn(async move { looper.run(cancel_rx).await });

    let served = serve_worker(state, args.port).await;
    let _ = cancel_tx.send(());
    let _ = loop_task.await;
    served
}

pub async fn run_client(runtime: Runtime, args: AutonomousClientArgs) -> CliResult<()> {
    let ens = runtime.ens_name()?;
    let input: Value = serde_json::from_str(&args.input)
        .map_err(|e| CliError::Config(format!("--input is not valid JSON: {e}")))?;

    let feed = Arc::new(HttpFeed::new(&runtime.feed_url));
    let offer = Offer {
        price: args.price,
        task_type: args.task.clone(),
        poster_ens: ens.clone(),
    };
    feed.post(&render_offer(&offer), None)
        .await
        .map_err(|e| CliError::Counterparty(format!("offer not posted: {e}")))?;
    info!(task = %args.task, price = args.price, "offer posted, watching for accepts");

    let orchestrator = Arc::new(runtime.orchestrator()?);
    let hirer = Arc::new(
        Hirer::new(runtime.wallet.address(), orchestrator).with_resolver(runtime.resolver()?),
    );

    let (result_tx, mut result_rx) = mpsc::channel(1);
    let handler = Arc::new(ClientIntents {
        hirer,
        task: args.task,
        input,
        path: runtime.payment_path,
        ens,
        hired: AtomicBool::new(false),
        results: result_tx,
    });
    let looper = AutonomousLoop::new(
        feed,
        handler,
        LoopConfig {
            poll_interval: Duration::from_secs(args.poll_secs.max(1)),
            ..Default::default()
        },
    );

    let (cancel_tx, cancel_rx) = oneshot::channel();
    let loop_task = tokio::spawn(async move { looper.run(cancel_rx).await });

    let outcome = tokio::select! {
        outcome = result_rx.recv() => outcome,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted before any accept");
            None
        }
    };
    let _ = cancel_tx.send(());
    let _ = loop_task.await;

    match outcome {
        Some(Ok(result)) => {
            println!(
                "{}",
                serde_json::to_string_pretty(&result).unwrap_or_else(|_| "{}".to_string())
            );
            Ok(())
        }
        Some(Err(e)) => {
            println!("{}", json!({ "status": "failed", "reason": e.to_string() }));
            Err(e.into())
        }
        None => Ok(()),
    }
}

/// Worker side: accept offers from others while idle
struct WorkerIntents {
    feed: Arc<dyn Feed>,
    machine: Arc<LoopStateMachine>,
    ens: String,
}

#[async_trait]
impl IntentHandler for WorkerIntents {
    async fn on_offer(&self, offer: Offer, item: &FeedItem) {
        if offer.poster_ens.eq_ignore_ascii_case(&self.ens) {
            return;
        }
        if self.machine.state() != LoopState::Idle {
            debug!(state = ?self.machine.state(), "busy; leaving the offer for others");
            return;
        }
        self.machine.transition(LoopState::OfferSeen);

        let accept = render_accept(&Accept {
            worker_ens: self.ens.clone(),
        });
        match self.feed.post(&accept, item.thread_id.as_deref()).await {
            Ok(_) => {
                info!(poster = %offer.poster_ens, task = %offer.task_type, "offer accepted");
                self.machine.transition(LoopState::AcceptSent);
            }
            Err(e) => {
                warn!(error = %e, "accept not posted; back to watching");
                self.machine.reset();
            }
        }
    }

    async fn on_accept(&self, _accept: Accept, _item: &FeedItem) {}
}

/// Client side: hire the first worker that accepts
struct ClientIntents {
    hirer: Arc<Hirer>,
    task: String,
    input: Value,
    path: PaymentPath,
    ens: String,
    hired: AtomicBool,
    results: mpsc::Sender<Result<JobResult, BrokerError>>,
}

#[async_trait]
impl IntentHandler for ClientIntents {
    async fn on_offer(&self, _offer: Offer, _item: &FeedItem) {}

    async fn on_accept(&self, accept: Accept, _item: &FeedItem) {
        if accept.worker_ens.eq_ignore_ascii_case(&self.ens) {
            return;
        }
        if self.hired.swap(true, Ordering::SeqCst) {
            debug!(worker = %accept.worker_ens, "already hiring; ignoring further accepts");
            return;
        }

        info!(worker = %accept.worker_ens, "accept observed, hiring");
        let result = self
            .hirer
            .hire(&accept.worker_ens, &self.task, self.input.clone(), self.path)
            .await;
        let _ = self.results.send(result).await;
    }
}
