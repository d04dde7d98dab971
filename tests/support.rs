#![allow(dead_code)]

use std::time::Duration;

use minrpc::server::Server;
use minrpc::service::Service;
use minrpc::{Client, DecodeRecord, EncodeRecord, Options};

/// Argument pair for the arithmetic test service.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Args {
    pub num1: i64,
    pub num2: i64,
}

EncodeRecord!(Args, num1, num2);
DecodeRecord!(Args, num1, num2);

/// Builds the `Arith` service used across the integration tests.
///
/// `Sum` and `Div` compute; `Nap` blocks for the requested number of
/// milliseconds, which is how the timeout tests make the server slow.
pub fn arith_service() -> Service {
    Service::build("Arith")
        .expect("Arith is an exported name")
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
        .method("Nap", |millis: u64, reply: &mut bool| {
            std::thread::sleep(Duration::from_millis(millis));
            *reply = true;
            Ok(())
        })
        .finish()
}

/// A server with the `Arith` service registered.
pub fn arith_server() -> Server {
    let server = Server::new();
    server.register(arith_service()).expect("register Arith");
    server
}

/// Serves `server` on an ephemeral TCP port and returns the address.
pub async fn tcp_server_addr(server: Server) -> std::net::SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind listener");
    let addr = listener.local_addr().expect("listener address");
    tokio::spawn(async move {
        let _ = server.serve(listener).await;
    });
    addr
}

/// Connects a client to `server` over an in-memory pipe.
pub async fn connected_client(server: Server, options: Options) -> Client {
    let (client_side, server_side) = tokio::io::duplex(64 * 1024);
    tokio::spawn(async move {
        let _ = server.serve_connection(server_side).await;
    });
    Client::with_stream(client_side, options)
        .await
        .expect("client handshake")
}
