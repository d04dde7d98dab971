use minrpc::server::Server;
use minrpc::service::Service;
use minrpc::RpcError;

mod support;

#[test]
fn unexported_service_names_are_rejected() {
    for name in ["arith", "", "lower.Case", "Upper.Case", "_Arith"] {
        let err = Service::build(name).err().unwrap_or_else(|| {
            panic!("service name {name:?} should have been rejected")
        });
        assert!(matches!(err, RpcError::InvalidArgument(_)), "unexpected error: {err:?}");
    }
}

#[test]
fn exported_service_names_are_accepted() {
    for name in ["Arith", "Echo2", "Überdienst"] {
        Service::build(name).expect("exported name");
    }
}

#[test]
fn methods_with_unusable_names_are_skipped() {
    let service = Service::build("Skippy")
        .expect("exported name")
        .method("", |_: u64, _: &mut u64| Ok(()))
        .method("a.b", |_: u64, _: &mut u64| Ok(()))
        .method("Ok", |_: u64, _: &mut u64| Ok(()))
        .finish();

    assert_eq!(service.num_methods(), 1);
    assert!(service.method("Ok").is_some());
    assert!(service.method("").is_none());
    assert!(service.method("a.b").is_none());
}

#[test]
fn zero_method_services_are_legal() {
    let service = Service::build("Hollow").expect("exported name").finish();
    assert_eq!(service.num_methods(), 0);

    let server = Server::new();
    server.register(service).expect("register zero-method service");
}

#[test]
fn duplicate_registration_fails() {
    let server = Server::new();
    server.register(support::arith_service()).expect("first registration");

    let err = server
        .register(support::arith_service())
        .expect_err("second registration must fail");
    assert!(
        matches!(&err, RpcError::InvalidArgument(msg) if msg.contains("already registered")),
        "unexpected error: {err:?}"
    );
}
