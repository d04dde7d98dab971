//! Service registration and dispatch.
//!
//! A [`Service`] is a named bundle of methods a server exposes. Methods are
//! registered as plain closures of shape `Fn(args, &mut reply) -> Result<(),
//! String>`; argument and reply types are fixed at registration time through
//! the [`Encode`]/[`Decode`] bounds, so eligibility is checked by the
//! compiler rather than inspected at runtime.
//!
//! Dispatch works on encoded payloads: the server hands a method the raw
//! body bytes of a request and gets back the encoded reply, which keeps the
//! registry object-safe and the connection loop ignorant of user types.
//!
//! Service names appear on the wire in `"Service.Method"` form. A service
//! name must be exported: non-empty, no `.`, and starting with an uppercase
//! letter.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::warn;

use crate::error::RpcError;
use crate::protocol::wire::{decode_from, encode_to_vec, Decode, Encode};

type InvokeFn = Box<dyn Fn(&[u8]) -> Result<Vec<u8>, RpcError> + Send + Sync>;

/// One registered method: a type-erased invoker plus its call counter.
pub struct Method {
    name: String,
    invoke: InvokeFn,
    calls: AtomicU64,
}

impl Method {
    /// Name the method was registered under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of times this method has been invoked.
    pub fn num_calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    /// Decodes the argument payload, runs the user function, and returns
    /// the encoded reply.
    pub(crate) fn call(&self, payload: &[u8]) -> Result<Vec<u8>, RpcError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        (self.invoke)(payload)
    }
}

impl std::fmt::Debug for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Method")
            .field("name", &self.name)
            .field("calls", &self.num_calls())
            .finish()
    }
}

/// A named bundle of methods, immutable once built.
#[derive(Debug)]
pub struct Service {
    name: String,
    methods: HashMap<String, Arc<Method>>,
}

impl Service {
    /// Starts building a service under an exported name.
    pub fn build(name: &str) -> Result<ServiceBuilder, RpcError> {
        validate_service_name(name)?;
        Ok(ServiceBuilder { name: name.to_string(), methods: HashMap::new() })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Looks up a method by name.
    pub fn method(&self, name: &str) -> Option<Arc<Method>> {
        self.methods.get(name).cloned()
    }

    pub fn num_methods(&self) -> usize {
        self.methods.len()
    }
}

/// Builder collecting typed method registrations for one service.
pub struct ServiceBuilder {
    name: String,
    methods: HashMap<String, Arc<Method>>,
}

impl ServiceBuilder {
    /// Registers `f` under `name`.
    ///
    /// The reply starts from `R::default()` before `f` runs, so container
    /// replies begin empty rather than null. An error returned by `f`
    /// travels to the caller as an opaque string in the reply header.
    ///
    /// A name that cannot appear in `"Service.Method"` form is skipped with
    /// a warning, mirroring how ineligible methods are silently omitted.
    pub fn method<A, R, F>(mut self, name: &str, f: F) -> Self
    where
        A: Decode + Default + 'static,
        R: Encode + Default + 'static,
        F: Fn(A, &mut R) -> Result<(), String> + Send + Sync + 'static,
    {
        if name.is_empty() || name.contains('.') {
            warn!(service = %self.name, method = %name, "skipping method with unusable name");
            return self;
        }

        let invoke: InvokeFn = Box::new(move |payload| {
            let mut cursor = Cursor::new(payload);
            let args: A = decode_from(&mut cursor)
                .map_err(|e| RpcError::Decode(format!("cannot decode arguments: {e}")))?;
            let mut reply = R::default();
            f(args, &mut reply).map_err(RpcError::Server)?;
            encode_to_vec(&reply)
                .map_err(|e| RpcError::InvalidArgument(format!("cannot encode reply: {e}")))
        });

        let method = Arc::new(Method {
            name: name.to_string(),
            invoke,
            calls: AtomicU64::new(0),
        });
        if self.methods.insert(name.to_string(), method).is_some() {
            warn!(service = %self.name, method = %name, "method registered twice, keeping the later one");
        }
        self
    }

    /// Finishes the service. A service with no methods is legal but almost
    /// certainly a mistake, so it is flagged.
    pub fn finish(self) -> Service {
        if self.methods.is_empty() {
            warn!(service = %self.name, "service has no registered methods");
        }
        Service { name: self.name, methods: self.methods }
    }
}

fn validate_service_name(name: &str) -> Result<(), RpcError> {
    if name.is_empty() {
        return Err(RpcError::InvalidArgument("service name is empty".to_string()));
    }
    if name.contains('.') {
        return Err(RpcError::InvalidArgument(format!(
            "service name {name:?} must not contain '.'"
        )));
    }
    if !name.chars().next().is_some_and(char::is_uppercase) {
        return Err(RpcError::InvalidArgument(format!(
            "service name {name:?} is not exported"
        )));
    }
    Ok(())
}
