// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

mod common;

use common::{capture_server::CaptureServer, helpers::wait_until, mocks::RecordingEmitter};
use monit_agent::{
    constants::{FORWARDER_LISTENER_NAME, LOGGER_LISTENER_NAME, LOGTAIL_UPDATE},
    emitter::{Emitter, SocketEmitter},
    event::{Event, Severity},
    forwarder::Forwarder,
    listener::{close_channel, DatagramListener, Listener},
    logger::Logger,
    logtail::{LogTail, TailReader},
    shutdown::ShutdownGroup,
    upstream::{TcpClient, Upstream},
    workdir::WorkDir,
};
use std::io::Write;
use std::sync::Arc;
use tokio::net::UnixDatagram;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

#[tokio::test]
async fn tail_emits_appended_lines_in_order() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("app.log");
    std::fs::write(&path, "before\n").expect("seed file");

    let pipe = RecordingEmitter::default();
    let tail = LogTail::new(&path, Arc::new(pipe.clone()), None);
    tail.open().await.expect("open tail");

    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .open(&path)
        .expect("append handle");
    file.write_all(b"a\nb\n").expect("append lines");

    let report = tail.poll().await.expect("tail cycle");
    assert_eq!(report.lines, 2);
    assert_eq!(pipe.messages(), vec!["a", "b"]);
    for event in pipe.events() {
        assert_eq!(event.kind, LOGTAIL_UPDATE);
        assert_eq!(event.payload.source, path.display().to_string());
        assert_eq!(event.payload.level, Severity::Info);
    }
    assert_eq!(tail.cursor().await.offset, 11);
}

#[tokio::test]
async fn listener_delivers_datagrams_in_order() {
    let dir = tempfile::tempdir().expect("tempdir");
    let sock = dir.path().join("in.sock");
    let listener = DatagramListener::new(&sock);
    let group = ShutdownGroup::new();
    let (tx, mut rx) = mpsc::channel(100);
    let (closer, signal) = close_channel();

    listener
        .listen(tx, signal, &group)
        .await
        .expect("listen on socket");

    let client = UnixDatagram::unbound().expect("client socket");
    client
        .send_to(b"Test message one", &sock)
        .await
        .expect("send one");
    client
        .send_to(b"Test message two", &sock)
        .await
        .expect("send two");

    let first = timeout(Duration::from_secs(2), rx.recv()).await.expect("first");
    let second = timeout(Duration::from_secs(2), rx.recv()).await.expect("second");
    assert_eq!(first.as_deref(), Some(&b"Test message one"[..]));
    assert_eq!(second.as_deref(), Some(&b"Test message two"[..]));

    assert!(closer.close().await);
    timeout(Duration::from_secs(2), group.wait())
        .await
        .expect("listener workers exit");
    assert!(!sock.exists());
}

#[tokio::test]
async fn forwarder_relays_datagrams_to_upstream() {
    let server = CaptureServer::start().await;
    let dir = tempfile::tempdir().expect("tempdir");
    let workdir = WorkDir::new(dir.path());
    workdir.setup().expect("workdir");

    let forwarder = Forwarder::new(None)
        .with_upstream(TcpClient::new(Upstream::new("127.0.0.1", server.port()), None))
        .with_downstream(Arc::new(DatagramListener::with_name(
            FORWARDER_LISTENER_NAME,
            workdir.forwarder_socket(),
            None,
        )));
    forwarder.run().await.expect("forwarder running");

    let client = UnixDatagram::unbound().expect("client socket");
    client
        .send_to(b"message one.", workdir.forwarder_socket())
        .await
        .expect("send one");
    client
        .send_to(b"message two.", workdir.forwarder_socket())
        .await
        .expect("send two");

    let capture = &server;
    let delivered = wait_until(Duration::from_secs(2), move || async move {
        capture.received_string() == "message one.message two."
    })
    .await;
    assert!(delivered, "received {:?}", server.received_string());

    forwarder.close().await.expect("forwarder closed");
    let hung_up = wait_until(Duration::from_secs(2), move || async move {
        capture.closed_connections() == 1
    })
    .await;
    assert!(hung_up);
    assert!(!workdir.forwarder_socket().exists());
}

#[tokio::test]
async fn logger_writes_placeholder_for_malformed_messages() {
    let dir = tempfile::tempdir().expect("tempdir");
    let workdir = WorkDir::new(dir.path());
    workdir.setup().expect("workdir");

    let logger = Logger::new(
        Arc::new(DatagramListener::with_name(
            LOGGER_LISTENER_NAME,
            workdir.logger_socket(),
            None,
        )),
        workdir.log_file(),
    );
    logger.listen_and_log().await.expect("logger running");

    let client = UnixDatagram::unbound().expect("client socket");
    client
        .send_to(b"this is not json", workdir.logger_socket())
        .await
        .expect("send garbage");
    let emitter = SocketEmitter::new(workdir.logger_socket());
    emitter
        .emit(&Event::new(
            "FORWARDER_LOG",
            "forwarder",
            "still alive",
            Severity::Notice,
        ))
        .await
        .expect("emit event");

    let log_file = workdir.log_file();
    let log_file = &log_file;
    let written = wait_until(Duration::from_secs(2), move || async move {
        std::fs::read_to_string(log_file)
            .map(|contents| contents.contains("5: FORWARDER_LOG forwarder still alive"))
            .unwrap_or(false)
    })
    .await;
    assert!(written);

    logger.close().await.expect("logger closed");
    let contents = std::fs::read_to_string(workdir.log_file()).expect("log file");
    assert!(contents.lines().any(|line| line == "failed to parse log event"));
}

#[tokio::test]
async fn tail_pipes_through_forwarder_to_upstream() {
    let server = CaptureServer::start().await;
    let dir = tempfile::tempdir().expect("tempdir");
    let workdir = WorkDir::new(dir.path());
    workdir.setup().expect("workdir");

    let forwarder = Forwarder::new(None)
        .with_upstream(TcpClient::new(Upstream::new("127.0.0.1", server.port()), None))
        .with_downstream(Arc::new(DatagramListener::new(workdir.forwarder_socket())));
    forwarder.run().await.expect("forwarder running");

    let target = dir.path().join("app.log");
    let pipe: Arc<dyn Emitter> = Arc::new(SocketEmitter::new(workdir.forwarder_socket()));
    let tail = LogTail::new(&target, pipe, None);
    tail.open().await.expect("open tail");
    std::fs::write(&target, "GET /health 200\n").expect("write line");
    tail.poll().await.expect("tail cycle");

    let capture = &server;
    let delivered = wait_until(Duration::from_secs(2), move || async move {
        capture.received_string().contains("GET /health 200")
    })
    .await;
    assert!(delivered);

    let event = Event::from_bytes(&server.received()).expect("upstream gets the event json");
    assert_eq!(event.kind, LOGTAIL_UPDATE);
    assert_eq!(event.payload.message, "GET /health 200");

    tail.close().await.expect("close tail");
    forwarder.close().await.expect("forwarder closed");
}
