// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use flowfile_core::api::{router, AppState};
use flowfile_core::cache::ResultCache;
use flowfile_core::config::EngineConfig;
use flowfile_core::engine::{stubs::stub_registry, FlowRunner, ProgressEvent, ProgressSink};
use flowfile_core::errors::FlowFileError;
use flowfile_core::flowfile::load_flow_file;
use flowfile_core::worker::WorkerClient;

const EXIT_LOAD_ERROR: i32 = 1;
const EXIT_VALIDATION_ERROR: i32 = 2;
const EXIT_EXECUTION_FAILED: i32 = 3;
const EXIT_CANCELLED: i32 = 130;

#[derive(Parser)]
#[command(name = "flowfile-core", about = "Flow execution engine", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a flow file to completion and print the run summary.
    Run {
        flow_path: PathBuf,
    },
    /// Serve the control-plane HTTP API.
    Serve {
        #[arg(long, default_value = "127.0.0.1:63578")]
        bind: String,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let code = match cli.command {
        Command::Run { flow_path } => run_command(flow_path).await,
        Command::Serve { bind } => serve_command(bind).await,
    };
    std::process::exit(code);
}

async fn run_command(flow_path: PathBuf) -> i32 {
    let config = EngineConfig::from_env();
    let mut graph = match load_flow_file(&flow_path) {
        Ok(graph) => graph,
        Err(err @ FlowFileError::Invalid { .. }) => {
            error!("{err}");
            return EXIT_VALIDATION_ERROR;
        }
        Err(err) => {
            error!("{err}");
            return EXIT_LOAD_ERROR;
        }
    };
    if let Some(workers) = config.max_parallel_workers {
        graph.settings_mut().max_parallel_workers = workers;
    }

    let cache = Arc::new(ResultCache::new(config.cache_dir.clone(), graph.flow_id()));
    let mut runner = FlowRunner::new(cache, Arc::new(stub_registry()));
    if let Some(url) = &config.worker_url {
        runner = runner.with_worker(Arc::new(WorkerClient::new(url.clone())));
    }

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, cancelling run");
                cancel.cancel();
            }
        });
    }

    let (sink, progress) = if graph.settings().show_detailed_progress {
        let (sink, mut receiver) = ProgressSink::channel();
        let printer = tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                match event {
                    ProgressEvent::NodeStarted { node_id } => {
                        eprintln!("  node {node_id} started");
                    }
                    ProgressEvent::NodeProgress { node_id, progress } => {
                        eprintln!("  node {node_id}: {progress}%");
                    }
                    ProgressEvent::NodeFinished {
                        node_id,
                        state,
                        was_cached,
                    } => {
                        eprintln!(
                            "  node {node_id} -> {state:?}{}",
                            if was_cached { " (cached)" } else { "" }
                        );
                    }
                    _ => {}
                }
            }
        });
        (sink, Some(printer))
    } else {
        (ProgressSink::disabled(), None)
    };

    let outcome = runner.run(&mut graph, &[], cancel, sink).await;
    if let Some(printer) = progress {
        let _ = printer.await;
    }

    match outcome {
        Ok(info) => {
            match serde_json::to_string_pretty(&info) {
                Ok(summary) => println!("{summary}"),
                Err(err) => error!("could not serialize run summary: {err}"),
            }
            if info.cancelled {
                EXIT_CANCELLED
            } else if info.success {
                0
            } else {
                EXIT_EXECUTION_FAILED
            }
        }
        Err(err) => {
            error!("planning failed: {err}");
            EXIT_VALIDATION_ERROR
        }
    }
}

async fn serve_command(bind: String) -> i32 {
    let config = EngineConfig::from_env();
    let state = Arc::new(AppState::new(config, Arc::new(stub_registry())));
    let app = router(state);

    let listener = match tokio::net::TcpListener::bind(&bind).await {
        Ok(listener) => listener,
        Err(err) => {
            error!("could not bind {bind}: {err}");
            return EXIT_LOAD_ERROR;
        }
    };
    info!("serving control plane on {bind}");
    if let Err(err) = axum::serve(listener, app).await {
        error!("server error: {err}");
        return EXIT_EXECUTION_FAILED;
    }
    0
}
