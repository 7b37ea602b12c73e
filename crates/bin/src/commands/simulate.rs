//! Simulate command - several clients edit one record until they converge.

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use rand::{Rng, SeedableRng, rngs::StdRng};
use recsync::{
    ClientId, ConnectionStatus, RecordEngine, RecordId, Subscription,
    operation::text::TextOp, sync::MemoryService,
};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cli::SimulateArgs;
use crate::output::{OutputFormat, print_fields, print_json, print_table};

const WORDS: &[&str] = &[
    "alpha", "bravo", "charlie", "delta", "echo", "foxtrot", "golf", "hotel",
];
const POLL_INTERVAL: Duration = Duration::from_millis(20);

type BoxError = Box<dyn std::error::Error>;

struct SimClient {
    id: ClientId,
    engine: RecordEngine<TextOp>,
    subscription: Subscription<TextOp>,
    updates: Arc<AtomicUsize>,
}

#[derive(Debug, Default, Serialize)]
struct Counters {
    edits: usize,
    undos: usize,
    redos: usize,
    /// Edits and reverts refused because they no longer applied.
    refused: usize,
    drops: usize,
}

#[derive(Debug, Serialize)]
struct ClientReport {
    client: String,
    version: u64,
    status: String,
    updates: usize,
    length: usize,
    converged: bool,
}

#[derive(Debug, Serialize)]
struct SimulationReport {
    seed: u64,
    clients: usize,
    rounds: usize,
    version: u64,
    value: String,
    converged: bool,
    counters: Counters,
    reports: Vec<ClientReport>,
}

/// Run the simulate command. Returns whether every client converged.
pub async fn run(args: &SimulateArgs, format: OutputFormat) -> Result<bool, BoxError> {
    let seed = args.seed.unwrap_or_else(rand::random);
    let mut rng = StdRng::seed_from_u64(seed);
    let config = args.engine.to_config();
    let service = Arc::new(MemoryService::<TextOp>::new());
    let record = RecordId::new("simulation");
    info!(seed, clients = args.clients, rounds = args.rounds, "Starting simulation");

    let mut clients = Vec::with_capacity(args.clients);
    for i in 0..args.clients {
        let engine = RecordEngine::new(service.clone(), config.clone());
        let updates = Arc::new(AtomicUsize::new(0));
        let counter = updates.clone();
        let subscription = engine
            .subscribe(record.clone(), move |_| {
                counter.fetch_add(1, Ordering::Relaxed);
            })
            .await?;
        clients.push(SimClient {
            id: ClientId::new(format!("client-{i}")),
            engine,
            subscription,
            updates,
        });
    }

    let mut counters = Counters::default();
    for round in 0..args.rounds {
        for client in &clients {
            act(&mut rng, client, &record, &mut counters).await?;
        }
        if args.drop_every > 0 && (round + 1) % args.drop_every == 0 {
            debug!(round, "Dropping connections");
            service.drop_connections();
            counters.drops += 1;
        }
        tokio::task::yield_now().await;
    }

    let settled = settle(
        &service,
        &clients,
        &record,
        Duration::from_secs(args.settle_timeout),
    )
    .await?;
    if !settled {
        warn!("Clients did not settle in time");
    }

    let snapshot = service.snapshot(&record);
    let (version, value) = snapshot
        .map(|snapshot| (snapshot.version, snapshot.value))
        .unwrap_or_default();

    let mut reports = Vec::with_capacity(clients.len());
    for client in &clients {
        let state = client.engine.record(&record).await?;
        reports.push(ClientReport {
            client: client.id.to_string(),
            version: state.version.get(),
            status: status_label(&state.status),
            updates: client.updates.load(Ordering::Relaxed),
            length: state.value.chars().count(),
            converged: state.version == version && state.value == value,
        });
    }
    let converged = reports.iter().all(|report| report.converged);

    for client in clients {
        client.subscription.close().await;
        client.engine.shutdown().await;
    }

    let report = SimulationReport {
        seed,
        clients: args.clients,
        rounds: args.rounds,
        version: version.get(),
        value,
        converged,
        counters,
        reports,
    };
    match format {
        OutputFormat::Human => print_report(&report),
        OutputFormat::Json => print_json(&report)?,
    }

    Ok(converged)
}

/// One random action by `client`: an edit, an undo or a redo.
async fn act(
    rng: &mut StdRng,
    client: &SimClient,
    record: &RecordId,
    counters: &mut Counters,
) -> Result<(), BoxError> {
    let roll = rng.gen_range(0..100);
    let result = if roll < 70 {
        let current = client.engine.record(record).await?;
        let op = random_edit(rng, &current.value);
        counters.edits += 1;
        client.engine.apply(record, &client.id, vec![op]).await
    } else if roll < 85 {
        counters.undos += 1;
        client.engine.undo(record, &client.id).await
    } else {
        counters.redos += 1;
        client.engine.redo(record, &client.id).await
    };

    match result {
        Ok(()) => Ok(()),
        // A remote change landed between reading the value and applying.
        Err(e) if e.is_invalid_operation() => {
            debug!(client = %client.id, "Action refused: {e}");
            counters.refused += 1;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn random_edit(rng: &mut StdRng, value: &str) -> TextOp {
    let len = value.chars().count();
    if len > 0 && rng.gen_bool(0.3) {
        let from = rng.gen_range(0..len);
        let to = rng.gen_range(from + 1..=len.min(from + 8));
        TextOp::delete_range(value, from, to)
    } else {
        let word = WORDS[rng.gen_range(0..WORDS.len())];
        TextOp::insert(rng.gen_range(0..=len), format!("{word} "))
    }
}

/// Wait until every client is connected and holds the authoritative state.
async fn settle(
    service: &MemoryService<TextOp>,
    clients: &[SimClient],
    record: &RecordId,
    limit: Duration,
) -> Result<bool, BoxError> {
    let deadline = Instant::now() + limit;
    loop {
        let (version, value) = service
            .snapshot(record)
            .map(|snapshot| (snapshot.version, snapshot.value))
            .unwrap_or_default();

        let mut settled = true;
        for client in clients {
            let state = client.engine.record(record).await?;
            if state.status != ConnectionStatus::Connected
                || state.version != version
                || state.value != value
            {
                settled = false;
                break;
            }
        }
        if settled {
            return Ok(true);
        }
        if Instant::now() >= deadline {
            return Ok(false);
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

fn status_label(status: &ConnectionStatus) -> String {
    match status {
        ConnectionStatus::Connecting => "connecting".to_string(),
        ConnectionStatus::Connected => "connected".to_string(),
        ConnectionStatus::Reconnecting { attempt } => format!("reconnecting ({attempt})"),
        ConnectionStatus::Disconnected => "disconnected".to_string(),
        ConnectionStatus::Unauthorized => "unauthorized".to_string(),
    }
}

fn print_report(report: &SimulationReport) {
    let counters = &report.counters;
    print_fields(&[
        ("Seed", report.seed.to_string()),
        ("Clients", report.clients.to_string()),
        ("Rounds", report.rounds.to_string()),
        ("Version", report.version.to_string()),
        (
            "Actions",
            format!(
                "{} edits, {} undos, {} redos, {} refused",
                counters.edits, counters.undos, counters.redos, counters.refused
            ),
        ),
        ("Drops", counters.drops.to_string()),
        (
            "Converged",
            if report.converged { "yes" } else { "NO" }.to_string(),
        ),
    ]);
    println!();

    let rows: Vec<Vec<String>> = report
        .reports
        .iter()
        .map(|r| {
            vec![
                r.client.clone(),
                r.version.to_string(),
                r.status.clone(),
                r.updates.to_string(),
                r.length.to_string(),
                if r.converged { "yes" } else { "no" }.to_string(),
            ]
        })
        .collect();
    print_table(
        &["CLIENT", "VERSION", "STATUS", "UPDATES", "LENGTH", "CONVERGED"],
        &rows,
    );
    println!();
    println!("{}", report.value);
}
