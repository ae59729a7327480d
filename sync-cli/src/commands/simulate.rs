//! Sync two replicas through two engines on an in-memory network.
//!
//! The remote replica is attached first and accepts the connection, so it
//! latches host. The local replica connects, pulls the host's snapshot with
//! a sync request, then pushes its merged result back with a broadcast.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use taskflow_sync_client::{EngineConfig, MockNetwork, MockTransport, SyncEngine, SyncStatus};
use taskflow_sync_types::Snapshot;
use tokio::sync::mpsc;

use crate::config::read_snapshot;

const MERGE_TIMEOUT: Duration = Duration::from_secs(5);

/// What the simulation produced.
#[derive(Debug)]
pub struct Report {
    /// Local replica after pulling from the host.
    pub local: Snapshot,
    /// Remote replica after receiving the push.
    pub remote: Snapshot,
    /// Status changes of the connecting engine.
    pub local_trail: Vec<SyncStatus>,
    /// Status changes of the host engine.
    pub remote_trail: Vec<SyncStatus>,
}

/// One engine with the replica it serves.
struct Node {
    engine: SyncEngine<MockTransport>,
    trail: Arc<Mutex<Vec<SyncStatus>>>,
    merges: mpsc::UnboundedReceiver<Snapshot>,
}

impl Node {
    async fn start(
        network: &MockNetwork,
        config: EngineConfig,
        snapshot: Snapshot,
    ) -> Result<Self> {
        let replica = Arc::new(Mutex::new(snapshot));
        let source = Arc::clone(&replica);
        let engine = SyncEngine::new(config, network.transport(), move || {
            source.lock().unwrap_or_else(PoisonError::into_inner).clone()
        });

        let trail: Arc<Mutex<Vec<SyncStatus>>> = Arc::default();
        let log = Arc::clone(&trail);
        engine.set_status_change_handler(move |status| {
            log.lock().unwrap_or_else(PoisonError::into_inner).push(status);
        });

        let (tx, merges) = mpsc::unbounded_channel();
        engine.set_data_received_handler(move |merged: Snapshot| {
            *replica.lock().unwrap_or_else(PoisonError::into_inner) = merged.clone();
            let _ = tx.send(merged);
        });
        engine.set_error_handler(|failure| tracing::warn!(%failure, "sync error"));

        engine.initialize().await?;
        Ok(Self {
            engine,
            trail,
            merges,
        })
    }

    async fn next_merge(&mut self, what: &str) -> Result<Snapshot> {
        tokio::time::timeout(MERGE_TIMEOUT, self.merges.recv())
            .await
            .ok()
            .flatten()
            .with_context(|| format!("Timed out waiting for {what}"))
    }

    fn trail(&self) -> Vec<SyncStatus> {
        self.trail
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Run the simulate command.
pub async fn run(config: EngineConfig, local: &Path, remote: &Path) -> Result<Report> {
    let local_snapshot = read_snapshot(local).await?;
    let remote_snapshot = read_snapshot(remote).await?;

    let network = MockNetwork::new();
    let mut host = Node::start(&network, config.clone(), remote_snapshot).await?;
    let mut guest = Node::start(&network, config, local_snapshot).await?;
    tracing::info!(
        host = %host.engine.peer_id(),
        guest = %guest.engine.peer_id(),
        "engines attached"
    );

    guest
        .engine
        .connect_to_peer(host.engine.peer_id().as_str())
        .await?;
    let pulled = guest.next_merge("the host's snapshot").await?;

    guest.engine.broadcast_data(pulled.clone()).await;
    let pushed = host.next_merge("the guest's push").await?;

    guest.engine.disconnect().await;
    host.engine.disconnect().await;

    let report = Report {
        local: pulled,
        remote: pushed,
        local_trail: guest.trail(),
        remote_trail: host.trail(),
    };
    print_report(&report);
    Ok(report)
}

fn print_report(report: &Report) {
    println!("=== simulate ===");
    println!();
    println!("Local (connecting):");
    print_replica(&report.local, &report.local_trail);
    println!();
    println!("Remote (host):");
    print_replica(&report.remote, &report.remote_trail);
    println!();
    if report.local.tasks == report.remote.tasks {
        println!("Replicas converged on {} tasks.", report.local.tasks.len());
    } else {
        println!("Replicas differ.");
    }
}

fn print_replica(snapshot: &Snapshot, trail: &[SyncStatus]) {
    let trail: Vec<&str> = trail.iter().map(|s| s.as_str()).collect();
    println!("  Status:     {}", trail.join(" -> "));
    println!("  Tasks:      {}", snapshot.tasks.len());
    for task in &snapshot.tasks {
        let mark = if task.completed { "x" } else { " " };
        println!("    [{mark}] {} ({})", task.title, task.id);
    }
    println!("  Categories: {}", snapshot.categories.len());
}
