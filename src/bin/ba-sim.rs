//! Block-Ack reorder simulator.
//!
//! Drives a reorder engine with generated lossy, reordered traffic for one
//! peer, or replays a JSON-lines trace, then prints the engine counters.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin ba-sim -- --frames 20000 --window 32 --loss 2 --reorder 12
//! cargo run --bin ba-sim -- --trace capture.jsonl --stats-port 8080
//! ```
//!
//! # Trace format
//!
//! One JSON object per line:
//!
//! ```text
//! {"op":"start","tid":0,"buffer_size":64,"sn":100}
//! {"op":"frame","tid":0,"sn":101}
//! {"op":"update","tid":0,"sn":110}
//! {"op":"sleep","ms":150}
//! {"op":"stop","tid":0}
//! ```

use ba_reorder::{
    DeliveredFrame, PeerAddress, Release, ReorderConfig, ReorderEngine, ReorderStats, SeqNum,
    StatsServer, TeardownRequest, Tid,
};
use log::{debug, error, info, warn};
use rand_core::{OsRng, RngCore, SeedableRng};
use rand_xorshift::XorShiftRng;
use serde::Deserialize;
use std::io::BufRead;
use std::process::exit;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const SIM_PEER: PeerAddress = PeerAddress::new([0x02, 0x00, 0x5e, 0x00, 0x53, 0x01]);

struct Options {
    frames: u32,
    window: u16,
    loss_percent: u32,
    reorder_depth: usize,
    seed: Option<u64>,
    trace: Option<String>,
    config: Option<String>,
    stats_port: Option<u16>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            frames: 10_000,
            window: 64,
            loss_percent: 1,
            reorder_depth: 8,
            seed: None,
            trace: None,
            config: None,
            stats_port: None,
        }
    }
}

fn print_usage(program: &str) {
    println!("Block-Ack reorder simulator");
    println!();
    println!("Usage:");
    println!("  {} [OPTIONS]", program);
    println!();
    println!("Options:");
    println!("  --frames N        Frames to generate (default 10000)");
    println!("  --window N        Block-Ack window size, 1-64 (default 64)");
    println!("  --loss PCT        Percent of frames dropped (default 1)");
    println!("  --reorder N       Frames shuffled together (default 8)");
    println!("  --seed N          Traffic seed (default random)");
    println!("  --trace FILE      Replay a JSON-lines trace instead");
    println!("  --config FILE     Engine config JSON");
    println!("  --stats-port PORT Serve /stats and run until Ctrl+C");
    println!("  --help            Show this help");
}

fn parse_args() -> Result<Options, String> {
    let args: Vec<String> = std::env::args().collect();
    let program = args.first().map(String::as_str).unwrap_or("ba-sim");
    let mut options = Options::default();
    let mut iter = args.iter().skip(1);

    while let Some(arg) = iter.next() {
        let name = arg.as_str();
        let mut value = |option: &str| {
            iter.next()
                .cloned()
                .ok_or_else(|| format!("{} needs a value", option))
        };
        match name {
            "--frames" => options.frames = parse_number(&value(name)?, name)?,
            "--window" => options.window = parse_number(&value(name)?, name)?,
            "--loss" => options.loss_percent = parse_number(&value(name)?, name)?,
            "--reorder" => options.reorder_depth = parse_number(&value(name)?, name)?,
            "--seed" => options.seed = Some(parse_number(&value(name)?, name)?),
            "--trace" => options.trace = Some(value(name)?),
            "--config" => options.config = Some(value(name)?),
            "--stats-port" => options.stats_port = Some(parse_number(&value(name)?, name)?),
            "--help" | "-h" => {
                print_usage(program);
                exit(0);
            }
            other => return Err(format!("unknown option {} (see --help)", other)),
        }
    }

    if options.loss_percent > 100 {
        return Err("--loss must be 0-100".to_string());
    }
    Ok(options)
}

fn parse_number<T: std::str::FromStr>(value: &str, name: &str) -> Result<T, String> {
    value
        .parse()
        .map_err(|_| format!("{}: invalid number '{}'", name, value))
}

/// Draw a value in `0..bound`.
fn below(rng: &mut impl RngCore, bound: u32) -> u32 {
    if bound == 0 {
        return 0;
    }
    rng.next_u32() % bound
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum TraceEvent {
    Start { tid: u8, buffer_size: u16, sn: u16 },
    Frame { tid: u8, sn: u16 },
    Update { tid: u8, sn: u16 },
    Stop { tid: u8 },
    Sleep { ms: u64 },
}

/// Frame payload: the order in which the simulator sent it.
type SimFrame = u32;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let options = match parse_args() {
        Ok(options) => options,
        Err(e) => {
            eprintln!("Error: {}", e);
            exit(2);
        }
    };

    let config = match options.config.as_deref().map(load_config).transpose() {
        Ok(config) => config.unwrap_or_default(),
        Err(e) => {
            error!("{}", e);
            exit(1);
        }
    };

    let stats = Arc::new(ReorderStats::new());
    let _stats_server = options.stats_port.and_then(|port| {
        match StatsServer::start(None, port, Arc::clone(&stats)) {
            Ok(server) => {
                info!("Stats at http://localhost:{}/stats", server.port());
                Some(server)
            }
            Err(e) => {
                warn!("Failed to start stats server: {}", e);
                None
            }
        }
    });

    let (frames_tx, frames_rx) = mpsc::unbounded_channel::<DeliveredFrame<SimFrame>>();
    let (teardown_tx, teardown_rx) = mpsc::unbounded_channel::<TeardownRequest>();
    let spawned = ReorderEngine::<SimFrame>::spawn_with_stats(
        config,
        frames_tx,
        teardown_tx,
        Arc::clone(&stats),
    );
    let (engine, engine_task) = match spawned {
        Ok(spawned) => spawned,
        Err(e) => {
            error!("{}", e);
            exit(1);
        }
    };

    let consumer = tokio::spawn(consume(frames_rx, teardown_rx));

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl+C received, stopping");
            ctrl_c.cancel();
        }
    });

    let result = match &options.trace {
        Some(path) => replay(&engine, path, &cancel).await,
        None => generate(&engine, &options, config, &cancel).await,
    };
    if let Err(e) = result {
        error!("{}", e);
    }

    if options.stats_port.is_some() && !cancel.is_cancelled() {
        info!("Traffic done, serving stats until Ctrl+C");
        cancel.cancelled().await;
    }

    engine.shutdown();
    if let Err(e) = engine_task.await {
        error!("Engine task failed: {}", e);
    }
    drop(engine);

    match consumer.await {
        Ok(report) => report.log(),
        Err(e) => error!("Consumer task failed: {}", e),
    }
    println!("{}", stats.to_json());
}

fn load_config(path: &str) -> Result<ReorderConfig, String> {
    let json = std::fs::read_to_string(path).map_err(|e| format!("{}: {}", path, e))?;
    ReorderConfig::from_json(&json).map_err(|e| format!("{}: {}", path, e))
}

/// Generate `options.frames` frames with loss and local reordering.
async fn generate(
    engine: &ReorderEngine<SimFrame>,
    options: &Options,
    config: ReorderConfig,
    cancel: &CancellationToken,
) -> Result<(), String> {
    let seed = options.seed.unwrap_or_else(|| OsRng.next_u64());
    let mut rng = XorShiftRng::seed_from_u64(seed);
    let tid = Tid::new(0).map_err(|e| e.to_string())?;
    let start = SeqNum::new(below(&mut rng, 4096) as u16);

    info!(
        "Generating {} frames (window {}, loss {}%, reorder depth {}, seed {})",
        options.frames, options.window, options.loss_percent, options.reorder_depth, seed
    );
    engine
        .session_start(SIM_PEER, tid, options.window, start)
        .await
        .map_err(|e| e.to_string())?;

    let depth = options.reorder_depth.max(1);
    let mut sent: SimFrame = 0;
    let mut next = start;
    let mut remaining = options.frames;

    while remaining > 0 && !cancel.is_cancelled() {
        let burst = remaining.min(depth as u32);
        let mut block: Vec<SeqNum> = (0..burst).map(|i| next.add(i as u16)).collect();
        next = next.add(burst as u16);
        remaining -= burst;

        // Fisher-Yates within the burst
        for i in (1..block.len()).rev() {
            let j = below(&mut rng, i as u32 + 1) as usize;
            block.swap(i, j);
        }

        for sn in block {
            if below(&mut rng, 100) < options.loss_percent {
                debug!("Dropping sn {}", sn);
                continue;
            }
            engine
                .admit_frame(SIM_PEER, tid, sn, sent)
                .await
                .map_err(|e| e.to_string())?;
            sent += 1;
        }
    }

    // Aging resolves one hole per expiry; wait until the final losses drain
    while !cancel.is_cancelled() {
        let snapshot = engine
            .session_snapshot(SIM_PEER, tid)
            .await
            .map_err(|e| e.to_string())?;
        match snapshot {
            Some(snapshot) if snapshot.occupied > 0 => {
                tokio::time::sleep(config.reorder_age_timeout).await
            }
            _ => break,
        }
    }
    Ok(())
}

/// Replay a JSON-lines trace.
async fn replay(
    engine: &ReorderEngine<SimFrame>,
    path: &str,
    cancel: &CancellationToken,
) -> Result<(), String> {
    let file = std::fs::File::open(path).map_err(|e| format!("{}: {}", path, e))?;
    let mut sent: SimFrame = 0;

    for (number, line) in std::io::BufReader::new(file).lines().enumerate() {
        if cancel.is_cancelled() {
            break;
        }
        let line = line.map_err(|e| format!("{}: {}", path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        let event: TraceEvent = serde_json::from_str(&line)
            .map_err(|e| format!("{}:{}: {}", path, number + 1, e))?;
        let tid = |raw: u8| Tid::new(raw).map_err(|e| format!("{}:{}: {}", path, number + 1, e));

        let result = match event {
            TraceEvent::Start {
                tid: raw,
                buffer_size,
                sn,
            } => {
                engine
                    .session_start(SIM_PEER, tid(raw)?, buffer_size, sn)
                    .await
            }
            TraceEvent::Frame { tid: raw, sn } => {
                sent += 1;
                engine.admit_frame(SIM_PEER, tid(raw)?, sn, sent).await
            }
            TraceEvent::Update { tid: raw, sn } => {
                engine.update_window(SIM_PEER, tid(raw)?, sn).await
            }
            TraceEvent::Stop { tid: raw } => engine.session_stop(SIM_PEER, tid(raw)?).await,
            TraceEvent::Sleep { ms } => {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(())
            }
        };
        if let Err(e) = result {
            warn!("{}:{}: {}", path, number + 1, e);
        }
    }
    Ok(())
}

/// What the receive side observed.
#[derive(Debug, Default)]
struct Report {
    delivered: usize,
    in_order: usize,
    passed_through: usize,
    flushed: usize,
    /// In-order deliveries whose send order went backwards.
    resequenced: usize,
    order_violations: usize,
    teardowns: usize,
}

impl Report {
    fn log(&self) {
        info!(
            "Delivered {} frames: {} in order, {} passed through, {} flushed",
            self.delivered, self.in_order, self.passed_through, self.flushed
        );
        info!(
            "{} frames resequenced, {} teardown requests",
            self.resequenced, self.teardowns
        );
        if self.order_violations > 0 {
            error!("{} in-order deliveries went backwards", self.order_violations);
        }
    }
}

async fn consume(
    mut frames: mpsc::UnboundedReceiver<DeliveredFrame<SimFrame>>,
    mut teardowns: mpsc::UnboundedReceiver<TeardownRequest>,
) -> Report {
    let mut report = Report::default();
    let mut last_in_order: Option<SeqNum> = None;
    let mut last_sent: Option<SimFrame> = None;

    loop {
        tokio::select! {
            frame = frames.recv() => {
                let Some(frame) = frame else { break };
                report.delivered += 1;
                match frame.release {
                    Release::InOrder => {
                        report.in_order += 1;
                        if let Some(prev) = last_in_order {
                            if frame.sequence_number.is_older(prev) {
                                report.order_violations += 1;
                            }
                        }
                        if last_sent.is_some_and(|prev| frame.frame < prev) {
                            report.resequenced += 1;
                        }
                        last_in_order = Some(frame.sequence_number);
                        last_sent = Some(frame.frame);
                    }
                    Release::PassThrough(reason) => {
                        debug!("sn {} passed through ({})", frame.sequence_number, reason);
                        report.passed_through += 1;
                    }
                    Release::Flush => report.flushed += 1,
                }
            }
            Some(request) = teardowns.recv() => {
                warn!("Control plane: {}", request);
                report.teardowns += 1;
            }
        }
    }
    report
}
