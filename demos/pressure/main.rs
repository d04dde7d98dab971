use std::sync::Arc;
use std::time::Instant;

use minrpc::server::Server;
use minrpc::service::Service;
use minrpc::{Client, DecodeRecord, EncodeRecord};

const CLIENTS: usize = 4;
const CALLS_PER_CLIENT: i64 = 1000;

#[derive(Clone, Debug, Default)]
struct Args {
    num1: i64,
    num2: i64,
}

EncodeRecord!(Args, num1, num2);
DecodeRecord!(Args, num1, num2);

/// Hammers one server with several clients to eyeball throughput and
/// check that nothing deadlocks under sustained concurrent load.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_writer(std::io::stderr)
        .init();

    let service = Service::build("Arith")
        .expect("Arith is an exported name")
        .method("Sum", |args: Args, reply: &mut i64| {
            *reply = args.num1 + args.num2;
            Ok(())
        })
        .finish();
    let sum = service.method("Sum").expect("Sum is registered");

    let server = Server::new();
    server.register(service)?;
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = server.serve(listener).await;
    });

    let started = Instant::now();
    let mut workers = Vec::new();
    for _ in 0..CLIENTS {
        let addr = addr.to_string();
        workers.push(tokio::spawn(async move {
            let client = Arc::new(Client::dial_default(&addr).await?);
            let mut calls = Vec::new();
            for i in 0..CALLS_PER_CLIENT {
                let client = client.clone();
                calls.push(tokio::spawn(async move {
                    let reply: i64 =
                        client.call("Arith.Sum", &Args { num1: i, num2: i }).await?;
                    assert_eq!(reply, 2 * i);
                    Ok::<_, minrpc::RpcError>(())
                }));
            }
            for call in calls {
                call.await.expect("call task")?;
            }
            client.close().await?;
            Ok::<_, minrpc::RpcError>(())
        }));
    }
    for worker in workers {
        worker.await.expect("client task")?;
    }

    let elapsed = started.elapsed();
    let total = sum.num_calls();
    println!(
        "{total} calls across {CLIENTS} clients in {elapsed:?} ({:.0} calls/s)",
        total as f64 / elapsed.as_secs_f64()
    );
    Ok(())
}
