//! Server side: accept loop, per-connection request loop, and dispatch.
//!
//! Each accepted connection is handled by its own task. After the
//! handshake selects a codec, the connection task reads `(header, body)`
//! pairs and spawns one handler task per request; replies are serialized
//! through a send lock so a header and its body always reach the wire
//! contiguously. When the read side ends, the loop drains the in-flight
//! handlers and closes the codec.
//!
//! A process-wide default server is available through [`default_server`]
//! with free [`register`] and [`serve`] conveniences for the common
//! single-server case.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};
use std::time::Duration;

use anyhow::anyhow;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time;
use tracing::{debug, error, info, warn};

use crate::error::RpcError;
use crate::protocol::codec::{self, CodecRead, CodecWrite, Transport};
use crate::protocol::handshake;
use crate::protocol::{Header, HANDSHAKE_MAGIC};
use crate::service::{Method, Service};

/// Sentinel body sent with every error reply. The client discards it but
/// must still receive a frame to keep the stream aligned.
const EMPTY_BODY: &[u8] = &[];

type SharedWriter = Arc<Mutex<Box<dyn CodecWrite>>>;

/// RPC server: a registry of services plus connection handling.
///
/// Cloning is cheap and clones share the service registry, which is how
/// the accept loop hands the server to per-connection tasks.
#[derive(Clone, Default)]
pub struct Server {
    services: Arc<RwLock<HashMap<String, Arc<Service>>>>,
}

impl Server {
    pub fn new() -> Server {
        Server::default()
    }

    /// Registers a service. Registration is insert-only; a second service
    /// under the same name is refused.
    pub fn register(&self, service: Service) -> Result<(), RpcError> {
        let mut services = self.services.write().expect("service map lock poisoned");
        let name = service.name().to_string();
        if services.contains_key(&name) {
            return Err(RpcError::InvalidArgument(format!(
                "service {name:?} already registered"
            )));
        }
        info!(service = %name, methods = service.num_methods(), "registered service");
        services.insert(name, Arc::new(service));
        Ok(())
    }

    /// Resolves a `"Service.Method"` name against the registry.
    fn resolve(&self, service_method: &str) -> Result<Arc<Method>, RpcError> {
        let (service_name, method_name) = match service_method.split_once('.') {
            Some((s, m)) if !s.is_empty() && !m.is_empty() && !m.contains('.') => (s, m),
            _ => {
                return Err(RpcError::Dispatch(format!(
                    "malformed service method {service_method:?}"
                )))
            }
        };

        let service = self
            .services
            .read()
            .expect("service map lock poisoned")
            .get(service_name)
            .cloned()
            .ok_or_else(|| RpcError::Dispatch(format!("service {service_name:?} not found")))?;
        service.method(method_name).ok_or_else(|| {
            RpcError::Dispatch(format!("method {method_name:?} not found on {service_name:?}"))
        })
    }

    /// Accepts connections forever, spawning a task per connection.
    ///
    /// Returns only when the listener itself fails.
    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        loop {
            let (socket, peer) = listener.accept().await?;
            info!(%peer, "accepting connection");
            let server = self.clone();
            tokio::spawn(async move {
                if let Err(e) = server.serve_connection(socket).await {
                    debug!(%peer, "connection ended: {e:#}");
                }
            });
        }
    }

    /// Runs the handshake and request loop over any duplex stream.
    ///
    /// A bad magic constant or an unregistered codec tag drops the
    /// connection without a reply.
    pub async fn serve_connection(&self, stream: impl Transport) -> anyhow::Result<()> {
        let mut stream: Box<dyn Transport> = Box::new(stream);
        let options = handshake::read_options(&mut stream).await?;

        if options.magic != HANDSHAKE_MAGIC {
            warn!(magic = options.magic, "dropping connection: bad magic");
            return Err(RpcError::BadMagic(options.magic).into());
        }
        let Some(make_codec) = codec::lookup_codec(&options.codec) else {
            warn!(codec = %options.codec, "dropping connection: unknown codec");
            return Err(RpcError::UnknownCodec(options.codec).into());
        };

        let (reader, writer) = make_codec(stream);
        self.serve_codec(reader, writer, options.handle_timeout).await
    }

    async fn serve_codec(
        &self,
        mut reader: Box<dyn CodecRead>,
        writer: Box<dyn CodecWrite>,
        handle_timeout: Duration,
    ) -> anyhow::Result<()> {
        let writer: SharedWriter = Arc::new(Mutex::new(writer));
        let mut handlers: JoinSet<()> = JoinSet::new();

        let mut result = 'serve: loop {
            // A panicking handler must take the connection down with it,
            // not leave its caller waiting forever.
            while let Some(finished) = handlers.try_join_next() {
                if let Err(e) = finished {
                    if e.is_panic() {
                        break 'serve Err(anyhow!("request handler panicked"));
                    }
                }
            }

            let mut header = Header::default();
            if let Err(e) = reader.read_header(&mut header).await {
                match e {
                    RpcError::Eof => {
                        debug!("client finished sending requests");
                        break Ok(());
                    }
                    other => break Err(anyhow!(other).context("reading request header")),
                }
            }

            // The body is consumed unconditionally so the stream stays
            // aligned even when the request cannot be dispatched.
            let body = match reader.read_body().await {
                Ok(body) => body,
                Err(e) => {
                    warn!(seq = header.seq, "failed to read request body: {e}");
                    header.error = error_string(e);
                    send_reply(&writer, &header, EMPTY_BODY).await;
                    continue;
                }
            };

            match self.resolve(&header.service_method) {
                Err(e) => {
                    debug!(seq = header.seq, service_method = %header.service_method, "{e}");
                    header.error = error_string(e);
                    send_reply(&writer, &header, EMPTY_BODY).await;
                }
                Ok(method) => {
                    handlers.spawn(handle_request(
                        writer.clone(),
                        header,
                        body,
                        method,
                        handle_timeout,
                    ));
                }
            }
        };

        while let Some(finished) = handlers.join_next().await {
            if let Err(e) = finished {
                if e.is_panic() && result.is_ok() {
                    result = Err(anyhow!("request handler panicked"));
                }
            }
        }
        if let Err(e) = writer.lock().await.close().await {
            debug!("closing codec: {e}");
        }
        result
    }
}

/// Runs one request to completion and writes its reply.
async fn handle_request(
    writer: SharedWriter,
    mut header: Header,
    body: Vec<u8>,
    method: Arc<Method>,
    handle_timeout: Duration,
) {
    // The invoke always runs on a blocking task: user methods are free to
    // block without stalling the connection's reader, and an overrun can
    // be abandoned: the user call keeps going, its result is dropped.
    let invoke = tokio::task::spawn_blocking(move || method.call(&body));
    let outcome = if handle_timeout.is_zero() {
        invoke.await.unwrap_or_else(|join_err| Err(unwind_or_cancelled(join_err)))
    } else {
        match time::timeout(handle_timeout, invoke).await {
            Ok(finished) => {
                finished.unwrap_or_else(|join_err| Err(unwind_or_cancelled(join_err)))
            }
            Err(_) => {
                warn!(seq = header.seq, service_method = %header.service_method,
                    "abandoning request after {handle_timeout:?}");
                Err(RpcError::HandleTimeout)
            }
        }
    };

    match outcome {
        Ok(reply) => send_reply(&writer, &header, &reply).await,
        Err(e) => {
            header.error = error_string(e);
            send_reply(&writer, &header, EMPTY_BODY).await;
        }
    }
}

/// Propagates a handler panic onto the handler task; any other join
/// failure becomes an error reply.
fn unwind_or_cancelled(join_err: tokio::task::JoinError) -> RpcError {
    if join_err.is_panic() {
        std::panic::resume_unwind(join_err.into_panic());
    }
    RpcError::Server("request handler was cancelled".to_string())
}

async fn send_reply(writer: &SharedWriter, header: &Header, body: &[u8]) {
    let mut writer = writer.lock().await;
    if let Err(e) = writer.write(header, body).await {
        error!(seq = header.seq, "failed to write reply: {e}");
    }
}

/// The error string placed in a reply header. User errors travel verbatim;
/// framework errors keep their kind prefix.
fn error_string(err: RpcError) -> String {
    match err {
        RpcError::Server(msg) => msg,
        other => other.to_string(),
    }
}

/// Process-wide default server.
pub fn default_server() -> &'static Server {
    static DEFAULT_SERVER: OnceLock<Server> = OnceLock::new();
    DEFAULT_SERVER.get_or_init(Server::new)
}

/// Registers a service with the default server.
pub fn register(service: Service) -> Result<(), RpcError> {
    default_server().register(service)
}

/// Serves connections on the default server.
pub async fn serve(listener: TcpListener) -> std::io::Result<()> {
    default_server().serve(listener).await
}
