//! With tolerance=2, two consecutive creation failures defer the next
//! attempt by at least the breaker's open period; a successful probe once
//! the server starts cooperating resets the breaker and lets the pool
//! reach `Ready`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use kvpipe::{commands, Client};

#[tokio::test]
async fn s6_breaker_opens_then_recovers() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accept_setup = Arc::new(AtomicBool::new(false));

    let server_flag = accept_setup.clone();
    tokio::spawn(async move {
        loop {
            let (mut stream, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => return,
            };
            let flag = server_flag.clone();
            tokio::spawn(async move {
                if !flag.load(Ordering::SeqCst) {
                    // Simulate a failing child: drop the socket without
                    // answering the setup command, forcing `SetupFailed`.
                    drop(stream);
                    return;
                }
                let mut buf = [0u8; 256];
                if stream.read(&mut buf).await.unwrap_or(0) == 0 {
                    return;
                }
                let _ = stream.write_all(b"+OK\r\n").await;
                // Hold the connection open for the rest of the test.
                let _ = stream.read(&mut buf).await;
            });
        }
    });

    let client = Client::builder(addr.ip().to_string(), addr.port())
        .connections(1)
        .connect_timeout(Duration::from_millis(200))
        .request_timeout(Duration::from_millis(200))
        .setup_commands(vec![commands::set("handshake", "ok")])
        .breaker_tolerance(2)
        .breaker_open_periods(Duration::from_millis(40), Duration::from_millis(40))
        .half_open_timeout(Duration::from_millis(150))
        .build()
        .expect("build client");

    let early = client
        .wait_until_connected(Duration::from_millis(60), 1)
        .await;
    assert!(
        early.is_err(),
        "pool should not be ready while every setup attempt fails"
    );

    // Let the breaker cycle through several open/half-open episodes while
    // the server keeps refusing, then let the next probe through.
    tokio::time::sleep(Duration::from_millis(250)).await;
    accept_setup.store(true, Ordering::SeqCst);

    client
        .wait_until_connected(Duration::from_secs(2), 1)
        .await
        .expect("pool recovers once the breaker permits a successful probe");
}
