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
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use monit_agent::{
    config::AgentConfig,
    constants::{FORWARDER_LISTENER_NAME, LOGGER_LISTENER_NAME},
    emitter::{Emitter, SocketEmitter},
    forwarder::Forwarder,
    listener::DatagramListener,
    logger::Logger,
    upstream::TcpClient,
    workdir::WorkDir,
};

#[tokio::main]
pub async fn main() -> ExitCode {
    let log_level = env::var("MONIT_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());
    let env_filter = format!("rustls=off,{}", log_level);
    let filter = match EnvFilter::try_new(env_filter) {
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
    let upstream = match config.upstream() {
        Ok(upstream) => upstream,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let workdir = match WorkDir::resolve(config.workdir.as_deref()).and_then(|workdir| {
        workdir.setup()?;
        Ok(workdir)
    }) {
        Ok(workdir) => workdir,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    debug!("Working directory {}", workdir.root().display());

    let log_pipe: Arc<dyn Emitter> = Arc::new(SocketEmitter::new(workdir.logger_socket()));

    let logger = Logger::new(
        Arc::new(DatagramListener::with_name(
            LOGGER_LISTENER_NAME,
            workdir.logger_socket(),
            None,
        )),
        workdir.log_file(),
    );
    if let Err(e) = logger.listen_and_log().await {
        error!("Failed to start logger: {e}");
        return ExitCode::FAILURE;
    }

    let forwarder = Forwarder::new(Some(Arc::clone(&log_pipe)))
        .with_upstream(TcpClient::new(upstream, Some(Arc::clone(&log_pipe))))
        .with_downstream(Arc::new(DatagramListener::with_name(
            FORWARDER_LISTENER_NAME,
            workdir.forwarder_socket(),
            Some(Arc::clone(&log_pipe)),
        )));

    if let Err(e) = forwarder.run().await {
        error!("Failed to start forwarder: {e}");
        if let Err(e) = logger.close().await {
            error!("Failed to close logger: {e}");
        }
        return ExitCode::FAILURE;
    }
    info!(
        "Forwarding {} to upstream",
        workdir.forwarder_socket().display()
    );

    if let Err(e) = signal_wait().await {
        error!("Failed to install signal handlers: {e}");
    }
    info!("Got signal to terminate");

    let mut code = ExitCode::SUCCESS;
    if let Err(e) = forwarder.close().await {
        error!("Failed to close forwarder: {e}");
        code = ExitCode::FAILURE;
    }
    if let Err(e) = logger.close().await {
        error!("Failed to close logger: {e}");
        code = ExitCode::FAILURE;
    }
    code
}

async fn signal_wait() -> io::Result<()> {
    let mut sig_int = signal(SignalKind::interrupt())?;
    let mut sig_term = signal(SignalKind::terminate())?;
    let mut sig_quit = signal(SignalKind::quit())?;

    tokio::select! {
        _ = sig_int.recv() => {},
        _ = sig_term.recv() => {},
        _ = sig_quit.recv() => {},
    }
    Ok(())
}
