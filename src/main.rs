use clap::Parser;
use mysqlscope::protocol::mysql::WireTime;
use mysqlscope::{capture, cli, config, display, manager, recording, replay, stats};
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn main() {
    let args = cli::Cli::parse();

    let log_level = match args.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    let config = match config::load_config(&args) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error: {}", err);
            process::exit(1);
        }
    };

    if let Err(err) = run(&config) {
        eprintln!("error: {}", err);
        process::exit(1);
    }
}

fn run(config: &config::RuntimeConfig) -> Result<(), Box<dyn std::error::Error>> {
    let stats = stats::SharedStats::new(config.patterns.clone());

    let recorder = match &config.record_for_replay {
        Some(path) => Some(recording::RecordingWriter::create(path)?),
        None => None,
    };
    let replay_ctx = if config.replay {
        Some(replay::ReplayShared::new(
            config.replay_opts.clone(),
            Arc::clone(&stats),
        ))
    } else {
        None
    };

    let mut mgr = manager::StreamManager::new(
        manager::ManagerConfig {
            server_ip: config.server_ip,
            server_port: config.server_port,
            slow_queries: config.n_slow,
            link_offset: config.link_offset,
        },
        Arc::clone(&stats),
        recorder,
        replay_ctx,
    );

    // Ctrl-C ends input processing; the teardown below still runs so
    // workers join and reports are written.
    let running = Arc::new(AtomicBool::new(true));
    let running_flag = running.clone();
    ctrlc::set_handler(move || {
        running_flag.store(false, Ordering::SeqCst);
        eprintln!("\nInterrupt received, stopping...");
    })?;

    let mut progress = ProgressTicker::new(config.progress);

    if recording::looks_like_recording(&config.input)? {
        tracing::info!(file = %config.input.display(), "reading recording");
        let mut reader = recording::RecordingReader::open(&config.input)?;
        while running.load(Ordering::SeqCst) {
            match reader.next_record()? {
                Some(record) => mgr.process_record(record)?,
                None => break,
            }
            progress.tick(&mgr);
        }
    } else {
        let mut cap = capture::engine::open_file(&config.input)?;
        while running.load(Ordering::SeqCst) {
            let packet = match cap.next_packet() {
                Ok(packet) => packet,
                Err(pcap::Error::NoMorePackets) => break,
                Err(e) => return Err(Box::new(e)),
            };
            let ts = WireTime::new(
                packet.header.ts.tv_sec as i64,
                packet.header.ts.tv_usec as i64,
            );
            mgr.process_frame(ts, packet.data)?;
            progress.tick(&mgr);
        }
    }

    // Joins every replay worker and closes the recording file.
    mgr.finish()?;

    display::print_slow_queries(
        &mgr.slow_queries(),
        &config.replay_opts,
        config.explain,
        config.analyze,
    );

    if let Some(path) = &config.csv {
        stats::write_pattern_csv(path, &stats.queries.lock().unwrap())?;
    }
    if let Some(path) = &config.table_stats {
        stats::write_table_stats(path, &stats.tables.lock().unwrap())?;
    }

    display::print_summary(&mgr);
    Ok(())
}

/// Once-per-second progress reporting, when enabled.
struct ProgressTicker {
    enabled: bool,
    last: Instant,
}

impl ProgressTicker {
    fn new(enabled: bool) -> Self {
        ProgressTicker {
            enabled,
            last: Instant::now(),
        }
    }

    fn tick(&mut self, mgr: &manager::StreamManager) {
        if !self.enabled {
            return;
        }
        let now = Instant::now();
        if now.duration_since(self.last) >= Duration::from_secs(1) {
            display::print_progress(mgr);
            self.last = now;
        }
    }
}
