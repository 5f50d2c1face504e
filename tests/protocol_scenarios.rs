//! End-to-end protocol scenarios, run against a scripted in-process
//! server that returns bytes verbatim.

mod common;

use std::time::Duration;

use tokio::io::AsyncWriteExt;

use kvpipe::{commands, extractors, Client, KvError, RValue};

async fn connected_client(server: &common::MockServer) -> Client {
    let client = Client::builder(server.host(), server.port())
        .connections(1)
        .request_timeout(Duration::from_secs(2))
        .build()
        .expect("build client");
    client
        .wait_until_connected(Duration::from_secs(2), 1)
        .await
        .expect("pool became ready");
    client
}

#[tokio::test]
async fn s1_simple_get_round_trip() {
    let server = common::MockServer::start(|mut stream| async move {
        common::expect_bytes(&mut stream, b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n").await;
        stream.write_all(b"$3\r\nbar\r\n").await.unwrap();
    })
    .await;

    let client = connected_client(&server).await;
    let reply = extractors::execute_bytes(&client, commands::get("foo"))
        .await
        .unwrap();
    assert_eq!(reply, Some(b"bar".to_vec()));
}

#[tokio::test]
async fn s2_null_bulk() {
    let server = common::MockServer::start(|mut stream| async move {
        common::expect_bytes(&mut stream, b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n").await;
        stream.write_all(b"$-1\r\n").await.unwrap();
    })
    .await;

    let client = connected_client(&server).await;
    let reply = extractors::execute_bytes(&client, commands::get("foo"))
        .await
        .unwrap();
    assert_eq!(reply, None);
}

#[tokio::test]
async fn s3_error_reply() {
    let server = common::MockServer::start(|mut stream| async move {
        common::expect_bytes(&mut stream, b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n").await;
        stream.write_all(b"-WRONGTYPE bad\r\n").await.unwrap();
    })
    .await;

    let client = connected_client(&server).await;
    let err = client.execute(commands::get("foo")).await.unwrap_err();
    match err {
        KvError::ErrorReply { message, .. } => assert_eq!(message, "WRONGTYPE bad"),
        other => panic!("expected ErrorReply, got {other:?}"),
    }
}

#[tokio::test]
async fn s4_reply_split_across_chunks() {
    let server = common::MockServer::start(|mut stream| async move {
        common::expect_bytes(&mut stream, b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n").await;
        common::send_chunks(&mut stream, &[b"$5\r", b"\nhel", b"lo\r\n"]).await;
    })
    .await;

    let client = connected_client(&server).await;
    let reply = extractors::execute_bytes(&client, commands::get("foo"))
        .await
        .unwrap();
    assert_eq!(reply, Some(b"hello".to_vec()));
}

#[tokio::test]
async fn s5_pipelined_correlation() {
    let expected_wire: Vec<u8> = [commands::del("a"), commands::del("b"), commands::del("c")]
        .iter()
        .flat_map(|c| c.encode())
        .collect();

    let server = common::MockServer::start(move |mut stream| async move {
        common::expect_bytes(&mut stream, &expected_wire).await;
        stream.write_all(b":1\r\n:2\r\n:3\r\n").await.unwrap();
    })
    .await;

    let client = connected_client(&server).await;
    let (a, b, c) = tokio::join!(
        client.execute(commands::del("a")),
        client.execute(commands::del("b")),
        client.execute(commands::del("c")),
    );
    assert_eq!(a.unwrap(), RValue::Integer(1));
    assert_eq!(b.unwrap(), RValue::Integer(2));
    assert_eq!(c.unwrap(), RValue::Integer(3));
}

#[tokio::test]
async fn quit_resolves_on_the_servers_ok_reply_not_just_on_eof() {
    let server = common::MockServer::start(|mut stream| async move {
        common::expect_bytes(&mut stream, b"*1\r\n$4\r\nQUIT\r\n").await;
        // A real server answers QUIT before closing the socket; the
        // actor must resolve the close on this reply, not wait for EOF.
        stream.write_all(b"+OK\r\n").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(stream);
    })
    .await;

    let client = connected_client(&server).await;
    client
        .execute_connection_close(commands::quit())
        .await
        .expect("quit resolves as a close, not an unexpected reply");
}

#[tokio::test]
async fn quit_still_resolves_on_bare_eof_with_no_reply() {
    let server = common::MockServer::start(|mut stream| async move {
        common::expect_bytes(&mut stream, b"*1\r\n$4\r\nQUIT\r\n").await;
        drop(stream);
    })
    .await;

    let client = connected_client(&server).await;
    client
        .execute_connection_close(commands::quit())
        .await
        .expect("quit resolves once the peer closes without replying");
}
