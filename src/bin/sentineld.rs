//! sentineld - wildlife camera alert daemon
//!
//! This daemon:
//! 1. Loads configuration (JSON file named by SENTINEL_CONFIG, then env overrides)
//! 2. Starts one isolated session per configured camera, each on its own thread
//! 3. Samples frames through the detector and alerts on novel detections
//! 4. Stops all sessions on Ctrl-C and prints a summary per camera

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use wildlife_sentinel::{
    SentinelConfig, SessionContext, SessionOptions, SessionReport, StreamSupervisor,
};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Watch camera streams and alert on novel wildlife detections"
)]
struct Args {
    /// JSON configuration file. Defaults are used when absent.
    #[arg(long, env = "SENTINEL_CONFIG")]
    config: Option<PathBuf>,

    /// Only run the camera(s) with this id. May be repeated.
    #[arg(long = "camera")]
    cameras: Vec<String>,

    /// Log alert payloads instead of posting them; clip upload is skipped.
    #[arg(long, env = "SENTINEL_DRY_RUN")]
    dry_run: bool,

    /// Stop each session after this many captured frames.
    #[arg(long)]
    max_frames: Option<u64>,
}

/// Raise `stop` when a session thread could not be spawned, so the sessions
/// already running wind down and the error gets reported.
fn stop_on_spawn_failure<T>(
    spawned: std::io::Result<T>,
    stop: &AtomicBool,
) -> std::io::Result<T> {
    if spawned.is_err() {
        stop.store(true, Ordering::SeqCst);
    }
    spawned
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut cfg = SentinelConfig::load_from(args.config.as_deref())?;

    if !args.cameras.is_empty() {
        cfg.cameras.retain(|camera| args.cameras.contains(&camera.id));
        if cfg.cameras.is_empty() {
            return Err(anyhow!(
                "no configured camera matches {:?}",
                args.cameras
            ));
        }
    }

    log::info!(
        "sentineld {} starting: {} camera(s), backend {}{}",
        env!("CARGO_PKG_VERSION"),
        cfg.cameras.len(),
        cfg.backend.url,
        if args.dry_run { " (dry run)" } else { "" }
    );
    if cfg.media.is_none() {
        log::info!("clip upload disabled (no Cloudinary credentials)");
    }

    let stop = AtomicBool::new(false);
    let stop_ref = &stop;
    // The Ctrl-C handler needs a 'static flag; the watcher forwards it to `stop`.
    let signal = std::sync::Arc::new(AtomicBool::new(false));
    let signal_handler = signal.clone();
    ctrlc::set_handler(move || {
        signal_handler.store(true, Ordering::SeqCst);
    })
    .expect("error setting Ctrl-C handler");

    let options = SessionOptions {
        dry_run: args.dry_run,
    };
    let max_frames = args.max_frames;
    let cfg = &cfg;

    let results: Vec<Result<SessionReport>> = std::thread::scope(|scope| {
        let handles: Vec<_> = cfg
            .cameras
            .iter()
            .map(|camera| {
                let spawned = std::thread::Builder::new()
                    .name(format!("session-{}", camera.id))
                    .spawn_scoped(scope, move || -> Result<SessionReport> {
                        let context = match SessionContext::from_config(cfg, camera, options) {
                            Ok(context) => context,
                            Err(e) => {
                                // A session that cannot start takes the others down with it.
                                stop_ref.store(true, Ordering::SeqCst);
                                return Err(e);
                            }
                        };
                        let mut supervisor = StreamSupervisor::new(context);
                        Ok(supervisor.run(stop_ref, max_frames))
                    });
                stop_on_spawn_failure(spawned, stop_ref)
            })
            .collect();

        let watcher = scope.spawn(|| {
            while !stop_ref.load(Ordering::SeqCst) {
                if signal.load(Ordering::SeqCst) {
                    log::info!("shutdown signal received, stopping sessions...");
                    stop_ref.store(true, Ordering::SeqCst);
                    break;
                }
                std::thread::sleep(std::time::Duration::from_millis(100));
            }
        });

        let results: Vec<Result<SessionReport>> = handles
            .into_iter()
            .map(|handle| match handle {
                Ok(handle) => handle
                    .join()
                    .unwrap_or_else(|_| Err(anyhow!("session thread panicked"))),
                Err(e) => Err(anyhow!("failed to spawn session thread: {}", e)),
            })
            .collect();
        stop_ref.store(true, Ordering::SeqCst);
        let _ = watcher.join();
        results
    });

    let mut first_error = None;
    for result in results {
        match result {
            Ok(report) => println!("{}\n", report),
            Err(e) => {
                log::error!("session failed to start: {:#}", e);
                first_error.get_or_insert(e);
            }
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
