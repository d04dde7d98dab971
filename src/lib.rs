//! minrpc - a minimal connection-oriented RPC framework
//!
//! This library provides a small, complete remote-procedure-call stack over
//! any stream transport: message framing with a per-connection handshake, a
//! pluggable codec layer, a multiplexing client, and a concurrent server
//! with typed service registration.
//!
//! ## Main Components
//!
//! - `service`: how user code becomes callable. A [`service::Service`] is
//!   built from plain closures of shape `Fn(args, &mut reply) ->
//!   Result<(), String>`; argument and reply types are fixed at
//!   registration time.
//!
//! - `server`: accepts connections, performs the handshake, and runs a
//!   request loop per connection that dispatches each request to its own
//!   task and serializes replies through a send lock.
//!
//! - `client`: owns one connection, multiplexes any number of concurrent
//!   calls over it, and demultiplexes replies back to callers by sequence
//!   number in a single receive task.
//!
//! - `protocol`: the wire layer - tagged binary value encoding, the codec
//!   abstraction and registry, and the JSON-line handshake record.
//!
//! ## Wire protocol
//!
//! A connection starts with one `Options` record (fixed JSON-line format)
//! naming the codec for everything that follows. After that, each request
//! and each reply is a `(Header, body)` frame pair encoded by the
//! negotiated codec; the server echoes the client's sequence number so
//! replies can arrive in any order.
//!
//! ## Usage
//!
//! Build a [`service::Service`], register it with a [`server::Server`]
//! (or the process-wide [`server::default_server`]), and point
//! [`client::Client::dial`] at it. The `demos/` directory contains
//! runnable examples.

pub mod client;
pub mod error;
pub mod protocol;
pub mod server;
pub mod service;

pub use client::{Call, Client};
pub use error::RpcError;
pub use protocol::handshake::Options;
pub use protocol::{wire, Header};
pub use server::Server;
pub use service::Service;
