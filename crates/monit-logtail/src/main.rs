// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::process::ExitCode;
use std::{env, io, sync::Arc};

use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use monit_agent::{
    config::AgentConfig,
    emitter::{Emitter, SocketEmitter},
    logtail::{LogTail, TailReader},
    workdir::WorkDir,
};

#[tokio::main]
pub async fn main() -> ExitCode {
    let log_level = env::var("MONIT_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());
    let filter = match EnvFilter::try_new(log_level) {
        Ok(filter) => filter,
        Err(e) => {
            eprintln!("could not parse log level in configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("setting default subscriber failed: {e}");
        return ExitCode::FAILURE;
    }

    let config = match AgentConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    let target = match config.tail_file() {
        Ok(target) => target.to_path_buf(),
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    // The forwarder binary owns and provisions the directory.
    let workdir = match WorkDir::resolve(config.workdir.as_deref()) {
        Ok(workdir) => workdir,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let pipe: Arc<dyn Emitter> = Arc::new(SocketEmitter::new(workdir.forwarder_socket()));
    let logger: Arc<dyn Emitter> = Arc::new(SocketEmitter::new(workdir.logger_socket()));
    let tail = Arc::new(LogTail::new(&target, pipe, Some(logger)));

    if let Err(e) = tail.open().await {
        error!("{e}");
        return ExitCode::FAILURE;
    }
    info!("Tailing {}", target.display());

    let shutdown = CancellationToken::new();
    let updater = tokio::spawn({
        let tail = Arc::clone(&tail);
        let shutdown = shutdown.clone();
        async move { tail.update(shutdown).await }
    });

    if let Err(e) = signal_wait().await {
        error!("Failed to install signal handlers: {e}");
    }
    info!("Got signal to terminate");
    shutdown.cancel();

    match updater.await {
        Ok(Ok(())) => ExitCode::SUCCESS,
        Ok(Err(e)) => {
            error!("{e}");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("Log tail task failed: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn signal_wait() -> io::Result<()> {
    let mut sig_int = signal(SignalKind::interrupt())?;
    let mut sig_term = signal(SignalKind::terminate())?;
    let mut sig_hup = signal(SignalKind::hangup())?;

    tokio::select! {
        _ = sig_int.recv() => {},
        _ = sig_term.recv() => {},
        _ = sig_hup.recv() => {},
    }
    Ok(())
}
