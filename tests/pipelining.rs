//! A reply that arrives after its caller has already given up to a
//! client-side timeout must not corrupt correlation for requests sent
//! afterward on the same connection.

mod common;

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use kvpipe::{commands, Client, KvError, RValue};

const REQUEST_TIMEOUT: Duration = Duration::from_millis(100);
const SERVER_DELAY: Duration = Duration::from_millis(180);

#[tokio::test]
async fn late_reply_after_timeout_does_not_corrupt_the_next_reply() {
    let server = common::MockServer::start(|mut stream| async move {
        // First request ("slow"): read it, then sleep well past the
        // client's own request timeout before replying.
        let mut buf = [0u8; 4096];
        let n = stream.read(&mut buf).await.expect("read first command");
        assert!(n > 0);
        tokio::time::sleep(SERVER_DELAY).await;
        stream.write_all(b"$3\r\nold\r\n").await.unwrap();

        // Second request ("fast") was written by the client while we were
        // asleep; it is already sitting in our socket buffer.
        let n = stream.read(&mut buf).await.expect("read second command");
        assert!(n > 0);
        stream.write_all(b"$3\r\nnew\r\n").await.unwrap();
    })
    .await;

    let client = Client::builder(server.host(), server.port())
        .connections(1)
        .request_timeout(REQUEST_TIMEOUT)
        .build()
        .expect("build client");
    client
        .wait_until_connected(Duration::from_secs(2), 1)
        .await
        .expect("pool became ready");

    let first = client.execute(commands::get("slow")).await;
    assert!(matches!(first, Err(KvError::RequestTimeout { .. })));

    let second = client.execute(commands::get("fast")).await.unwrap();
    assert_eq!(second, RValue::BulkString(Some(b"new".to_vec())));
}
