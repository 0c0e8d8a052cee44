//! Demo client: one ping call, one fire-and-forget event, and two `fib`
//! transactions interleaved on the same connection.
//!
//! Start `demo_server` first, then `cargo run --example demo_client`.

use std::time::Duration;

use anyhow::Result;
use hakunet::{ClientBuilder, Value};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let client = ClientBuilder::new()
        .on_event("reply", |_ctx, args, _kwargs| async move {
            println!("reply: {:?}", args);
            Ok(())
        })
        .on_transaction("fib", |tx, args| async move {
            let mut tx = tx;
            let tid = tx.id() & 0xff_ffff;
            let n = args[0].as_u64().unwrap_or(0);
            tx.send(Value::from(n)).await?;

            for i in 0..n {
                let now = tx.read().await?;
                println!("tid: {:06x}, fib_{}: {}", tid, i, now);
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            Ok(Value::Nil)
        })
        .connect("127.0.0.1:8000")
        .await?;

    println!("ping test: {}", client.call("ping", vec![], vec![]).await?);

    client
        .emit(
            "mes",
            vec![Value::from("A test message from the demo client.")],
            vec![],
        )
        .await?;

    let first = client.start_transaction("fib", vec![Value::from(10u64)]);
    let second = async {
        tokio::time::sleep(Duration::from_millis(40)).await;
        client.start_transaction("fib", vec![Value::from(10u64)]).await
    };
    let (first, second) = tokio::join!(first, second);
    first?;
    second?;

    client.close().await;
    Ok(())
}
