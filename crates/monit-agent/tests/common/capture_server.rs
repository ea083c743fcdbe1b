// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! TCP server recording every byte it receives

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;

#[derive(Clone)]
pub struct CaptureServer {
    pub addr: SocketAddr,
    received: Arc<Mutex<Vec<u8>>>,
    closed: Arc<AtomicUsize>,
}

impl CaptureServer {
    /// Start a capture server on a random port
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind capture server");
        let addr = listener.local_addr().expect("Failed to get local addr");
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        let closed = Arc::new(AtomicUsize::new(0));
        let hangups = closed.clone();

        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let sink = sink.clone();
                let hangups = hangups.clone();
                tokio::spawn(async move {
                    let mut buf = [0u8; 4096];
                    loop {
                        match stream.read(&mut buf).await {
                            Ok(0) | Err(_) => break,
                            Ok(n) => sink.lock().expect("capture lock").extend_from_slice(&buf[..n]),
                        }
                    }
                    hangups.fetch_add(1, Ordering::SeqCst);
                });
            }
        });

        CaptureServer {
            addr,
            received,
            closed,
        }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn received(&self) -> Vec<u8> {
        self.received.lock().expect("capture lock").clone()
    }

    /// Number of client connections that reached end of stream.
    pub fn closed_connections(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn received_string(&self) -> String {
        String::from_utf8_lossy(&self.received()).into_owned()
    }
}
