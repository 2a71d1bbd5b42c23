use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use clap::Parser;

use strandrunner::config::Settings;
use strandrunner::hostfile::FileHostStore;
use strandrunner::oscsink::OscStreamSink;
use strandrunner::runner::{RunParams, Runner, RunnerHandle};
use strandrunner::script::capabilities::DEFAULT_CAPABILITIES;
use strandrunner::script::rhaiengine::RhaiEngine;
use strandrunner::timerqueue::SystemClock;
use strandrunner::transport::{HostStore, Strand, StrandTransport};

#[derive(Parser)]
struct Cli {
    /// TOML settings file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Lightshow program to run
    #[arg(short, long, value_name = "FILE")]
    script: Option<PathBuf>,

    /// Seconds before the program is stopped
    #[arg(short, long, default_value_t = 60.0)]
    limit: f64,

    /// Cross-fade from whatever the strand showed before
    #[arg(short, long)]
    fade: bool,

    /// New strand host, remembered for later starts
    #[arg(long, value_name = "HOST")]
    host: Option<String>,
}

fn create_transport(settings: &Settings) -> StrandTransport {
    let store = FileHostStore::new(settings.host_file.clone());
    let host = match store.load() {
        Ok(Some(host)) => host,
        Ok(None) => settings.default_host.clone(),
        Err(err) => {
            log::warn!(
                "Cannot read {}: {}",
                settings.host_file.display(),
                err
            );
            settings.default_host.clone()
        }
    };
    log::info!("Sending to strand at {}:{}", host, settings.port);

    let mut transport = match StrandTransport::new(&host, settings.port, Box::new(store)) {
        Ok(transport) => transport,
        Err(err) => panic!("Cannot set up strand output: {}", err),
    };

    for target in &settings.stream_targets {
        match OscStreamSink::new(*target) {
            Ok(sink) => transport.add_subscriber(Box::new(sink)),
            Err(err) => log::warn!("Cannot stream to {target}: {err}"),
        }
    }

    transport
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Cli::parse();
    let settings = Settings::load(args.config.as_deref());

    let transport = create_transport(&settings);
    let watermark = Duration::from_millis(settings.watermark_ms);

    let (runner, runner_thread) = match RunnerHandle::spawn(move |current| {
        Runner::new(
            RhaiEngine::new(DEFAULT_CAPABILITIES, watermark),
            transport,
            SystemClock::new(),
            current,
        )
    }) {
        Ok(spawned) => spawned,
        Err(error) => panic!("Failed to create thread: {}", error),
    };

    if let Some(host) = args.host.as_deref() {
        runner.set_host(host);
    }

    let canceled = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&canceled);
    if let Err(err) = ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst)) {
        log::warn!("Cannot install Ctrl-C handler: {err}");
    }

    let mut exit_code = 0;
    if let Some(path) = args.script.as_deref() {
        let code = match fs::read_to_string(path) {
            Ok(code) => code,
            Err(err) => panic!("Cannot read {}: {}", path.display(), err),
        };

        let (done_tx, done_rx) = mpsc::channel();
        let flag = Arc::clone(&canceled);
        let params = RunParams::new(
            code,
            args.limit,
            move || flag.load(Ordering::SeqCst),
            move |status, message| {
                let _ = done_tx.send((status, message));
            },
        )
        .with_fade(args.fade);
        runner.start(params);

        match done_rx.recv() {
            Ok((status, message)) => {
                log::info!("{} finished with {}: {}", path.display(), status, message);
                if status < 0 {
                    exit_code = 1;
                }
            }
            Err(_) => log::error!("Runner stopped before the program finished"),
        }
    } else {
        while !canceled.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(100));
        }
    }

    if let Some(info) = runner.current() {
        log::info!("Last run: {}", json::stringify(info.to_json()));
    }

    runner.shutdown();
    if runner_thread.join().is_err() {
        log::error!("Runner thread panicked");
    }
    std::process::exit(exit_code);
}
