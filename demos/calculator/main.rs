use std::sync::Arc;

use minrpc::server::Server;
use minrpc::service::Service;
use minrpc::{Client, DecodeRecord, EncodeRecord};

/// Argument pair for the calculator service.
#[derive(Clone, Debug, Default)]
struct Args {
    num1: i64,
    num2: i64,
}

EncodeRecord!(Args, num1, num2);
DecodeRecord!(Args, num1, num2);

fn calculator() -> Service {
    Service::build("Calc")
        .expect("Calc is an exported name")
        .method("Sum", |args: Args, reply: &mut i64| {
            *reply = args.num1 + args.num2;
            Ok(())
        })
        .method("Div", |args: Args, reply: &mut i64| {
            if args.num2 == 0 {
                return Err("division by zero".to_string());
            }
            *reply = args.num1 / args.num2;
            Ok(())
        })
        .finish()
}

/// Demo RPC server and client in one process: registers a calculator
/// service, serves it on an ephemeral TCP port, and fires ten concurrent
/// calls at it.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_writer(std::io::stderr)
        .init();

    let server = Server::new();
    server.register(calculator())?;

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    println!("calculator server listening on {addr}");
    tokio::spawn(async move {
        let _ = server.serve(listener).await;
    });

    let client = Arc::new(Client::dial_default(&addr.to_string()).await?);

    let mut calls = Vec::new();
    for i in 0..10i64 {
        let client = client.clone();
        calls.push(tokio::spawn(async move {
            let args = Args { num1: i * 10, num2: i * 20 };
            let reply: i64 = client.call("Calc.Sum", &args).await?;
            println!("{} + {} = {}", args.num1, args.num2, reply);
            Ok::<_, minrpc::RpcError>(())
        }));
    }
    for call in calls {
        call.await??;
    }

    match client.call::<Args, i64>("Calc.Div", &Args { num1: 1, num2: 0 }).await {
        Ok(reply) => println!("1 / 0 = {reply}?!"),
        Err(e) => println!("1 / 0 failed as expected: {e}"),
    }

    client.close().await?;
    Ok(())
}
