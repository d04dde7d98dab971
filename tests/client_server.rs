use std::sync::Arc;

use minrpc::protocol::codec::binary::BinaryCodec;
use minrpc::protocol::codec::register_codec;
use minrpc::server::{default_server, Server};
use minrpc::service::Service;
use minrpc::{Client, Options, RpcError};

mod support;

use support::{arith_server, arith_service, connected_client, tcp_server_addr, Args};

#[tokio::test]
async fn sum_round_trip() {
    let client = connected_client(arith_server(), Options::default()).await;

    let reply: i64 = client
        .call("Arith.Sum", &Args { num1: 1, num2: 2 })
        .await
        .expect("Arith.Sum");
    assert_eq!(reply, 3);
    assert!(client.is_available());
}

#[tokio::test]
async fn user_errors_travel_in_the_reply_header() {
    let client = connected_client(arith_server(), Options::default()).await;

    let err = client
        .call::<Args, i64>("Arith.Div", &Args { num1: 1, num2: 0 })
        .await
        .expect_err("division by zero must fail");
    assert!(
        matches!(&err, RpcError::Server(msg) if msg == "division by zero"),
        "unexpected error: {err:?}"
    );

    // The connection is still healthy after an error reply.
    let reply: i64 = client
        .call("Arith.Div", &Args { num1: 6, num2: 2 })
        .await
        .expect("Arith.Div");
    assert_eq!(reply, 3);
}

#[tokio::test]
async fn unresolvable_requests_get_dispatch_errors() {
    let client = connected_client(arith_server(), Options::default()).await;

    for service_method in ["Arith.Mul", "Nope.Sum", "malformed", ".Sum", "Arith."] {
        let err = client
            .call::<Args, i64>(service_method, &Args { num1: 1, num2: 2 })
            .await
            .expect_err("unresolvable request must fail");
        assert!(
            matches!(&err, RpcError::Server(msg) if msg.contains("dispatch error")),
            "unexpected error for {service_method:?}: {err:?}"
        );
    }
    assert!(client.is_available());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_calls_on_one_client() {
    let client = Arc::new(connected_client(arith_server(), Options::default()).await);

    let mut tasks = Vec::new();
    for i in 0..10i64 {
        let client = client.clone();
        tasks.push(tokio::spawn(async move {
            let args = Args { num1: i * 10, num2: i * 20 };
            let reply: i64 = client.call("Arith.Sum", &args).await.expect("Arith.Sum");
            assert_eq!(reply, i * 30);
        }));
    }
    for task in tasks {
        task.await.expect("call task");
    }
    assert!(client.is_available());
}

#[tokio::test]
async fn sequence_numbers_start_at_one_and_increase() {
    let client = connected_client(arith_server(), Options::default()).await;

    let first = client
        .go::<Args, i64>("Arith.Sum", &Args { num1: 1, num2: 1 })
        .await
        .expect("go");
    let second = client
        .go::<Args, i64>("Arith.Sum", &Args { num1: 2, num2: 2 })
        .await
        .expect("go");

    assert_eq!(first.seq(), 1);
    assert_eq!(second.seq(), 2);
    assert_eq!(first.join().await.expect("first reply"), 2);
    assert_eq!(second.join().await.expect("second reply"), 4);
}

#[tokio::test]
async fn method_call_counts_are_tracked() {
    let service = arith_service();
    let sum = service.method("Sum").expect("Sum is registered");

    let server = Server::new();
    server.register(service).expect("register Arith");
    let client = connected_client(server, Options::default()).await;

    for i in 0..3 {
        let _: i64 = client
            .call("Arith.Sum", &Args { num1: i, num2: i })
            .await
            .expect("Arith.Sum");
    }
    assert_eq!(sum.num_calls(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn many_clients_over_tcp() {
    let addr = tcp_server_addr(arith_server()).await;

    let mut tasks = Vec::new();
    for c in 0..3i64 {
        tasks.push(tokio::spawn(async move {
            let client = Client::dial_default(&addr.to_string()).await.expect("dial");
            for i in 0..10i64 {
                let args = Args { num1: c * 100 + i, num2: i };
                let reply: i64 = client.call("Arith.Sum", &args).await.expect("Arith.Sum");
                assert_eq!(reply, c * 100 + 2 * i);
            }
            client.close().await.expect("close");
        }));
    }
    for task in tasks {
        task.await.expect("client task");
    }
}

#[tokio::test]
async fn default_server_handles_calls() {
    let service = Service::build("Defaulted")
        .expect("exported name")
        .method("Double", |n: i64, reply: &mut i64| {
            *reply = n * 2;
            Ok(())
        })
        .finish();
    minrpc::server::register(service).expect("register on default server");

    let addr = tcp_server_addr(default_server().clone()).await;
    let client = Client::dial_default(&addr.to_string()).await.expect("dial");

    let reply: i64 = client.call("Defaulted.Double", &21i64).await.expect("Defaulted.Double");
    assert_eq!(reply, 42);
}

#[tokio::test]
async fn negotiates_a_custom_codec() {
    register_codec("application/x-binary-alias", BinaryCodec::over);

    let options = Options { codec: "application/x-binary-alias".to_string(), ..Options::default() };
    let client = connected_client(arith_server(), options).await;

    let reply: i64 = client
        .call("Arith.Sum", &Args { num1: 20, num2: 22 })
        .await
        .expect("Arith.Sum");
    assert_eq!(reply, 42);
}

#[tokio::test]
async fn server_disconnect_fails_outstanding_calls() {
    let (client_side, server_side) = tokio::io::duplex(64 * 1024);
    let client = Client::with_stream(client_side, Options::default())
        .await
        .expect("client handshake");

    // Nobody ever serves the other end.
    drop(server_side);

    let err = client
        .call::<Args, i64>("Arith.Sum", &Args { num1: 1, num2: 2 })
        .await
        .expect_err("call against a dead connection must fail");
    assert!(
        !matches!(err, RpcError::Server(_)),
        "error should be connection-level, got {err:?}"
    );
}
