use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use webtuna_peer::{
    generate_key, run_connect, serve_share, ConnectOptions, HandshakeConfig, RelayConfig,
    RelayServer, ShareListener, SupervisorConfig,
};

const WAIT: Duration = Duration::from_secs(10);

/// Local service that answers every read with `pong:<bytes>`. The receiver
/// yields once for each connection the service sees end.
async fn pong_service() -> (u16, mpsc::UnboundedReceiver<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (closed_tx, closed_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let closed_tx = closed_tx.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 256];
                loop {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            let mut reply = b"pong:".to_vec();
                            reply.extend_from_slice(&buf[..n]);
                            if socket.write_all(&reply).await.is_err() {
                                break;
                            }
                        }
                    }
                }
                let _ = closed_tx.send(());
            });
        }
    });
    (port, closed_rx)
}

async fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

async fn wait_for_connect(addr: SocketAddr) -> TcpStream {
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        match TcpStream::connect(addr).await {
            Ok(stream) => return stream,
            Err(err) if tokio::time::Instant::now() >= deadline => {
                panic!("local listener never came up: {err}")
            }
            Err(_) => tokio::time::sleep(Duration::from_millis(25)).await,
        }
    }
}

async fn request(stream: &mut TcpStream, body: &[u8]) -> Vec<u8> {
    stream.write_all(body).await.unwrap();
    let mut buf = vec![0u8; 5 + body.len()];
    tokio::time::timeout(WAIT, stream.read_exact(&mut buf))
        .await
        .expect("reply timed out")
        .unwrap();
    buf
}

#[tokio::test]
async fn tunnels_concurrent_streams_through_relay() {
    let shutdown = CancellationToken::new();

    let relay = RelayServer::bind("127.0.0.1:0", RelayConfig::default())
        .await
        .unwrap();
    let relay_addr = relay.local_addr().to_string();
    tokio::spawn(relay.run(shutdown.clone()));

    let (source_port, mut closed) = pong_service().await;
    let key = generate_key();
    let listener = ShareListener::register(&relay_addr, &key).await.unwrap();
    tokio::spawn(serve_share(listener, source_port, shutdown.clone()));

    let local_port = free_port().await;
    tokio::spawn(run_connect(
        ConnectOptions {
            relay: relay_addr,
            key,
            local_port,
            handshake: HandshakeConfig::default(),
            supervisor: SupervisorConfig {
                retry_delay: Duration::from_millis(100),
            },
        },
        shutdown.clone(),
    ));

    let local: SocketAddr = ([127, 0, 0, 1], local_port).into();
    let mut first = wait_for_connect(local).await;
    let mut second = TcpStream::connect(local).await.unwrap();

    assert_eq!(request(&mut first, b"a").await, b"pong:a");
    assert_eq!(request(&mut second, b"b").await, b"pong:b");

    // Closing one stream ends exactly its service connection.
    drop(first);
    tokio::time::timeout(WAIT, closed.recv())
        .await
        .expect("service connection should end")
        .unwrap();
    assert_eq!(request(&mut second, b"again").await, b"pong:again");
    assert_eq!(
        closed.try_recv(),
        Err(mpsc::error::TryRecvError::Empty),
        "second stream must stay open"
    );

    shutdown.cancel();
}
