use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use anyhow::{Context, Result, anyhow, ensure};
use chrono::Utc;
use tokio::{
    signal, task,
    time::{self, Instant, MissedTickBehavior},
};
use tracing::{info, warn};

use host_traffic::{
    HostTable, ObserveStatus, TableConfig, aggregator,
    classify::{Classified, classify},
    report::{self, ReportFormat},
};

use crate::capture::{self, Capture, RingConfig};

/// Upper bound on how long an idle worker sleeps before rechecking shutdown.
const IDLE_POLL: Duration = Duration::from_millis(250);

pub struct ReportOptions {
    pub interval: Duration,
    pub format: ReportFormat,
    /// Rewritten on every report; stdout when unset.
    pub path: Option<PathBuf>,
}

pub struct NodeOptions {
    pub lan_ifaces: Vec<String>,
    pub table: TableConfig,
    pub report: ReportOptions,
    pub ring: RingConfig,
}

pub async fn run_node(opts: NodeOptions) -> Result<()> {
    ensure!(
        !opts.lan_ifaces.is_empty(),
        "at least one LAN interface is required"
    );
    ensure!(
        !opts.report.interval.is_zero(),
        "report interval must be greater than zero"
    );
    opts.table.validate().context("invalid table configuration")?;
    opts.ring.validate()?;

    let table = Arc::new(HostTable::with_config(&opts.table)?);
    let running = Arc::new(AtomicBool::new(true));
    info!(
        capacity = opts.table.capacity,
        tick = ?opts.table.tick_interval,
        expire_after = ?opts.table.expire_after(),
        ifaces = ?opts.lan_ifaces,
        "starting host traffic node"
    );

    let workers: Vec<_> = opts
        .lan_ifaces
        .iter()
        .map(|iface| {
            let iface = iface.clone();
            let table = table.clone();
            let running = running.clone();
            let ring = opts.ring;
            task::spawn(async move { worker_loop(&iface, ring, &table, &running).await })
        })
        .collect();

    let aggregator = task::spawn(aggregator::run(
        table.clone(),
        opts.table.tick_interval,
        running.clone(),
    ));

    let report = Arc::new(opts.report);
    let reporter = task::spawn(report_loop(table.clone(), report.clone(), running.clone()));

    signal::ctrl_c()
        .await
        .context("failed to wait for ctrl-c")?;
    info!("received shutdown signal, draining");
    running.store(false, Ordering::Relaxed);

    let mut first_err = None;
    for worker in workers {
        let outcome = match worker.await {
            Ok(result) => result,
            Err(err) => Err(anyhow!("capture worker panicked: {err}")),
        };
        if let Err(err) = outcome {
            first_err.get_or_insert(err);
        }
    }

    aggregator.abort();
    reporter.abort();
    let _ = aggregator.await;
    let _ = reporter.await;

    emit_report(&table, &report)?;
    first_err.map_or(Ok(()), Err)
}

/// Emits a report every interval, starting one interval after launch.
async fn report_loop(table: Arc<HostTable>, opts: Arc<ReportOptions>, running: Arc<AtomicBool>) {
    let mut ticker = time::interval_at(Instant::now() + opts.interval, opts.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if !running.load(Ordering::Relaxed) {
            break;
        }
        if let Err(err) = emit_report(&table, &opts) {
            warn!("failed to write report: {err:#}");
        }
    }
}

fn emit_report(table: &HostTable, opts: &ReportOptions) -> Result<()> {
    let hosts = table.snapshot();
    let rendered = report::render(opts.format, &hosts, Utc::now());
    match &opts.path {
        Some(path) => report::write_atomic(path, &rendered)
            .with_context(|| format!("failed to write report to {}", path.display())),
        None => {
            print!("{rendered}");
            if opts.format == ReportFormat::Json {
                println!();
            }
            Ok(())
        }
    }
}

#[derive(Debug, Default)]
struct WorkerStats {
    frames: u64,
    created: u64,
    dropped: u64,
    ignored: u64,
}

async fn worker_loop(
    iface: &str,
    ring: RingConfig,
    table: &HostTable,
    running: &AtomicBool,
) -> Result<()> {
    let gateway = capture::gateway_for(iface)?;
    let mut capture =
        Capture::open(iface, ring).with_context(|| format!("{iface}: capture setup failed"))?;
    let device = capture.iface().to_string();
    info!(iface, mac = %gateway.mac, local = ?gateway.local_addrs, "capturing routed traffic");
    let mut stats = WorkerStats::default();

    let mut on_frame = |frame: &[u8], pkttype| {
        stats.frames += 1;
        match classify(frame, pkttype, &device, &gateway) {
            Classified::Observe(obs) => {
                if table.observe(obs) == ObserveStatus::Created {
                    stats.created += 1;
                }
            }
            Classified::Drop => stats.dropped += 1,
            Classified::Ignore => stats.ignored += 1,
        }
    };

    let mut result = Ok(());
    while running.load(Ordering::Relaxed) {
        let mut drained = 0;
        for _ in 0..capture.block_count() {
            if !capture.next_block(&mut on_frame) {
                break;
            }
            drained += 1;
        }
        if drained == 0 {
            if let Err(err) = capture.wait(IDLE_POLL).await {
                result = Err(err);
                break;
            }
        }
    }

    info!(
        iface,
        frames = stats.frames,
        new_hosts = stats.created,
        dropped = stats.dropped,
        ignored = stats.ignored,
        "capture worker stopped"
    );
    result
}
