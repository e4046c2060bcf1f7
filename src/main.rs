use std::{
    env,
    io::{self, BufRead},
    path::PathBuf,
    thread,
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use crossbeam_channel::{RecvTimeoutError, bounded, never};
use graph_stage::{
    Pipeline, PipelineConfig,
    pipeline::{LoggingPresenter, build_engine, load_graph},
};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

fn main() -> Result<()> {
    env_logger::init();

    let config = match env::args_os().nth(1).map(PathBuf::from) {
        Some(path) => PipelineConfig::load(&path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    let graph = load_graph(&config).context("failed to load graph description")?;
    let engine = build_engine(&config.engine).context("failed to build graph engine")?;
    let mut pipeline = Pipeline::start(&config, &graph, engine, LoggingPresenter::default())
        .context("failed to start pipeline")?;
    pipeline
        .attach_source(&config.source)
        .context("failed to start frame source")?;

    wait_for_exit(&pipeline, config.pipeline.run_for_secs.map(Duration::from_secs));

    let stats = pipeline.stop();
    log::info!(
        "submitted {} frames, throttled {}, reclaimed {}, failed {}; {} batches presented, {} dropped, {} malformed payloads",
        stats.throttle.submitted,
        stats.throttle.throttled,
        stats.throttle.reclaimed,
        stats.throttle.failed,
        stats.dispatch.batches_sent,
        stats.dispatch.batches_dropped,
        stats.dispatch.malformed,
    );
    Ok(())
}

/// Blocks until Enter is pressed, the run time elapses, or the source ends.
fn wait_for_exit(pipeline: &Pipeline, run_for: Option<Duration>) {
    let enter_rx = match run_for {
        Some(_) => never(),
        None => {
            eprintln!("press Enter to stop");
            let (enter_tx, enter_rx) = bounded::<()>(1);
            thread::spawn(move || {
                let mut line = String::new();
                if let Ok(read) = io::stdin().lock().read_line(&mut line) {
                    if read > 0 {
                        let _ = enter_tx.send(());
                    }
                }
            });
            enter_rx
        }
    };

    let started = Instant::now();
    loop {
        match enter_rx.recv_timeout(POLL_INTERVAL) {
            Ok(()) => return,
            Err(RecvTimeoutError::Timeout) => {}
            // stdin closed without a line; keep running
            Err(RecvTimeoutError::Disconnected) => thread::sleep(POLL_INTERVAL),
        }

        if pipeline.source_finished() {
            log::info!("frame source finished");
            return;
        }
        if run_for.is_some_and(|limit| started.elapsed() >= limit) {
            return;
        }
    }
}
