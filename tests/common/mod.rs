//! Scripted in-process TCP server used by the integration tests to drive
//! `Client` end-to-end against scripted, verbatim byte replies.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub struct MockServer {
    pub addr: SocketAddr,
}

impl MockServer {
    /// Binds an ephemeral port and runs `script` against the first
    /// accepted connection, in the background.
    pub async fn start<F, Fut>(script: F) -> Self
    where
        F: FnOnce(TcpStream) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local_addr");
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            script(stream).await;
        });
        Self { addr }
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }
}

/// Reads exactly `expected.len()` bytes off `stream` and asserts they
/// match, failing fast instead of hanging the suite if the client never
/// sends them.
pub async fn expect_bytes(stream: &mut TcpStream, expected: &[u8]) {
    let mut buf = vec![0u8; expected.len()];
    tokio::time::timeout(Duration::from_secs(2), stream.read_exact(&mut buf))
        .await
        .expect("timed out waiting for client bytes")
        .expect("stream closed before expected bytes arrived");
    assert_eq!(buf, expected);
}

/// Writes `chunks` to `stream` one at a time with a short pause between
/// each, so a reader on the other end observes them as separate reads
/// rather than one coalesced write.
pub async fn send_chunks(stream: &mut TcpStream, chunks: &[&[u8]]) {
    for chunk in chunks {
        stream.write_all(chunk).await.expect("write chunk");
        stream.flush().await.expect("flush chunk");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
