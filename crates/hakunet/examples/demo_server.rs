//! Demo server: answers `ping` calls, echoes `mes` events back as `reply`,
//! and streams Fibonacci numbers over a `fib` transaction.
//!
//! Run with `cargo run --example demo_server`, then start `demo_client`.

use anyhow::Result;
use hakunet::{ServerBuilder, Value};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let server = ServerBuilder::new()
        .on_event("mes", |ctx, args, _kwargs| async move {
            println!("mes: {:?}", args);
            ctx.emit("reply", vec![Value::from("reply-test")], vec![])
                .await
        })
        .on_call("ping", |_args, _kwargs| async move {
            println!("ping");
            Ok(Value::from("pong"))
        })
        .on_transaction("fib", |tx, _ctx| async move {
            let mut tx = tx;
            // fib(94) overflows u64; n is peer-controlled.
            let n = tx.read().await?.as_u64().unwrap_or(0).min(93);
            let (mut a, mut b) = (0u64, 1u64);
            for _ in 0..n {
                let next = a + b;
                a = b;
                b = next;
                tx.send(Value::from(a)).await?;
            }
            Ok(())
        })
        .bind("127.0.0.1:8000")
        .await?;

    server.run().await?;
    Ok(())
}
