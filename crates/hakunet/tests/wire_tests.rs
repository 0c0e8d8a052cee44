//! Wire-level interoperability: a hand-rolled peer speaking raw frames must
//! interoperate with a real endpoint, since the format is meant to be
//! implementable independently.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::time::timeout;

use hakunet::proto::{Envelope, FrameCodec, Value};
use hakunet::{Server, ServerBuilder};

const WAIT: Duration = Duration::from_secs(5);

async fn spawn_server(builder: ServerBuilder) -> (SocketAddr, Arc<Server>) {
    let server = Arc::new(builder.bind("127.0.0.1:0").await.unwrap());
    let addr = server.local_addr().unwrap();

    let accept = server.clone();
    tokio::spawn(async move {
        let _ = accept.run().await;
    });

    (addr, server)
}

#[tokio::test]
async fn test_raw_peer_call_round_trip() {
    // ["call","ping",42,[],{}] must come back as ["resp",42,"pong"].
    let builder = ServerBuilder::new().on_call("ping", |_args, _kwargs| async move {
        Ok(Value::from("pong"))
    });
    let (addr, _server) = spawn_server(builder).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let mut codec = FrameCodec::new();

    let call = Envelope::Call {
        method: "ping".into(),
        call_id: 42,
        args: vec![],
        kwargs: vec![],
    };
    codec
        .write_frame(&mut stream, &call.encode().unwrap())
        .await
        .unwrap();

    let payload = timeout(WAIT, codec.read_frame(&mut stream))
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let reply = Envelope::decode(&payload).unwrap().unwrap();

    assert_eq!(
        reply,
        Envelope::Response {
            call_id: 42,
            result: Value::from("pong"),
        }
    );
}

#[tokio::test]
async fn test_raw_peer_unknown_method_gets_error_response() {
    let (addr, _server) = spawn_server(ServerBuilder::new()).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let mut codec = FrameCodec::new();

    let call = Envelope::Call {
        method: "absent".into(),
        call_id: 7,
        args: vec![],
        kwargs: vec![],
    };
    codec
        .write_frame(&mut stream, &call.encode().unwrap())
        .await
        .unwrap();

    let payload = timeout(WAIT, codec.read_frame(&mut stream))
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    match Envelope::decode(&payload).unwrap().unwrap() {
        Envelope::ResponseError { call_id, message } => {
            assert_eq!(call_id, 7);
            assert!(message.contains("unknown method"));
        }
        other => panic!("expected error response, got {:?}", other),
    }
}

#[tokio::test]
async fn test_frames_carry_big_endian_length_prefix() {
    // An event emitted by a server context must arrive as
    // [8-byte BE length][MessagePack array], readable without the codec.
    let builder = ServerBuilder::new().on_event("echo", |ctx, args, _kwargs| async move {
        ctx.emit("echoed", args, vec![]).await
    });
    let (addr, _server) = spawn_server(builder).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let codec = FrameCodec::new();
    let event = Envelope::Event {
        name: "echo".into(),
        args: vec![Value::from("payload")],
        kwargs: vec![],
    };
    codec
        .write_frame(&mut stream, &event.encode().unwrap())
        .await
        .unwrap();

    let mut prefix = [0u8; 8];
    timeout(WAIT, stream.read_exact(&mut prefix))
        .await
        .unwrap()
        .unwrap();
    let length = u64::from_be_bytes(prefix) as usize;
    assert!(length > 0);

    let mut payload = vec![0u8; length];
    timeout(WAIT, stream.read_exact(&mut payload))
        .await
        .unwrap()
        .unwrap();

    let envelope = Envelope::decode(&payload).unwrap().unwrap();
    assert_eq!(
        envelope,
        Envelope::Event {
            name: "echoed".into(),
            args: vec![Value::from("payload")],
            kwargs: vec![],
        }
    );
}

#[tokio::test]
async fn test_close_marker_ends_server_session() {
    let (addr, server) = spawn_server(ServerBuilder::new()).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let codec = FrameCodec::new();

    // Make sure the connection is registered before closing it.
    let event = Envelope::Event {
        name: "noop".into(),
        args: vec![],
        kwargs: vec![],
    };
    codec
        .write_frame(&mut stream, &event.encode().unwrap())
        .await
        .unwrap();
    timeout(WAIT, async {
        while server.session_count() != 1 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    codec.write_close(&mut stream).await.unwrap();

    timeout(WAIT, async {
        while server.session_count() != 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}
