//! Client side: dialing, concurrent calls, and the receive loop.
//!
//! A [`Client`] owns one connection. Many tasks may issue calls against it
//! concurrently; a single receive task demultiplexes replies back to their
//! callers by sequence number.
//!
//! Two locks keep this sound. The async send lock wraps the codec write
//! half and is held across call registration plus the write, so a header
//! and its body reach the wire contiguously and sequence numbers on the
//! wire strictly increase. The sync state lock guards the pending-call map,
//! the sequence counter, and the closing/shutdown flags. Both locks are
//! taken together only when the connection is being torn down, send lock
//! first; taking them in the other order anywhere would deadlock against an
//! in-progress send.

use std::collections::HashMap;
use std::io::Cursor;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, trace, warn};

use crate::error::RpcError;
use crate::protocol::codec::{self, CodecRead, CodecWrite, Transport};
use crate::protocol::handshake::{self, Options};
use crate::protocol::wire::{decode_from, encode_to_vec, Decode, Encode};
use crate::protocol::Header;

/// Raw outcome of one call: the encoded reply body, or the terminal error.
type Outcome = Result<Vec<u8>, RpcError>;

struct State {
    /// Next sequence number to assign; the first call gets 1.
    seq: u64,
    /// Completion slots for calls still waiting on a reply. Membership
    /// here is exactly "the call is outstanding".
    pending: HashMap<u64, oneshot::Sender<Outcome>>,
    /// Set by [`Client::close`].
    closing: bool,
    /// Set when the receive loop dies and the connection is unusable.
    shutdown: bool,
}

struct Shared {
    /// Send lock. Also the codec write half's home.
    writer: Mutex<Box<dyn CodecWrite>>,
    state: StdMutex<State>,
}

impl Shared {
    fn forget(&self, seq: u64) {
        let mut state = self.state.lock().expect("client state lock poisoned");
        state.pending.remove(&seq);
    }

    /// Tears down every outstanding call with `err`.
    ///
    /// Send lock before state lock: a sender mid-`go` either finished
    /// registering (and is terminated here) or has not started (and will
    /// see the shutdown flag).
    async fn terminate_calls(&self, err: RpcError) {
        let _writer = self.writer.lock().await;
        let mut state = self.state.lock().expect("client state lock poisoned");
        state.shutdown = true;
        for (_, done) in state.pending.drain() {
            let _ = done.send(Err(err.clone()));
        }
    }
}

/// One in-flight call, resolved by [`Call::join`].
///
/// Dropping an unresolved call cancels it: the pending entry disappears
/// and the eventual reply is read and discarded by the receive loop.
pub struct Call<R> {
    seq: u64,
    service_method: String,
    done: oneshot::Receiver<Outcome>,
    shared: Arc<Shared>,
    _reply: PhantomData<fn() -> R>,
}

impl<R> Call<R> {
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn service_method(&self) -> &str {
        &self.service_method
    }
}

impl<R: Decode + Default> Call<R> {
    /// Waits for the reply and decodes it.
    pub async fn join(mut self) -> Result<R, RpcError> {
        let outcome = match (&mut self.done).await {
            Ok(outcome) => outcome,
            // Sender gone without a completion: the client was dropped.
            Err(_) => Err(RpcError::Closed),
        };
        let body = outcome?;

        let mut cursor = Cursor::new(body.as_slice());
        let reply: R = decode_from(&mut cursor)
            .map_err(|e| RpcError::Decode(format!("cannot decode reply: {e}")))?;
        if cursor.position() as usize != body.len() {
            return Err(RpcError::Decode("trailing bytes after reply".to_string()));
        }
        Ok(reply)
    }
}

impl<R> Drop for Call<R> {
    fn drop(&mut self) {
        // Harmless after completion; the entry is already gone.
        self.shared.forget(self.seq);
    }
}

/// RPC client over a single connection.
pub struct Client {
    shared: Arc<Shared>,
    receiver: JoinHandle<()>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").finish_non_exhaustive()
    }
}

impl Client {
    /// Connects over TCP and performs the handshake, all bounded by
    /// `options.connect_timeout` (zero means no limit).
    pub async fn dial(addr: &str, options: Options) -> Result<Client, RpcError> {
        let connect_timeout = options.connect_timeout;
        let setup = async {
            let socket = TcpStream::connect(addr).await?;
            Client::with_stream(socket, options).await
        };
        if connect_timeout.is_zero() {
            setup.await
        } else {
            time::timeout(connect_timeout, setup)
                .await
                .map_err(|_| RpcError::ConnectTimeout)?
        }
    }

    /// [`Client::dial`] with the default options.
    pub async fn dial_default(addr: &str) -> Result<Client, RpcError> {
        Client::dial(addr, Options::default()).await
    }

    /// Builds a client over an already-established duplex stream.
    ///
    /// Writes the handshake, constructs the codec named by the options,
    /// and starts the receive loop.
    pub async fn with_stream(
        stream: impl Transport,
        options: Options,
    ) -> Result<Client, RpcError> {
        let make_codec = codec::lookup_codec(&options.codec)
            .ok_or_else(|| RpcError::UnknownCodec(options.codec.clone()))?;

        let mut stream: Box<dyn Transport> = Box::new(stream);
        handshake::write_options(&mut stream, &options).await?;
        let (reader, writer) = make_codec(stream);

        let shared = Arc::new(Shared {
            writer: Mutex::new(writer),
            state: StdMutex::new(State {
                seq: 1,
                pending: HashMap::new(),
                closing: false,
                shutdown: false,
            }),
        });
        let receiver = tokio::spawn(receive_loop(reader, shared.clone()));
        Ok(Client { shared, receiver })
    }

    /// Starts a call and returns its handle without waiting for the reply.
    ///
    /// A write failure still yields a handle; the failure is delivered
    /// through it.
    pub async fn go<A, R>(&self, service_method: &str, args: &A) -> Result<Call<R>, RpcError>
    where
        A: Encode,
        R: Decode + Default,
    {
        let payload = encode_to_vec(args)
            .map_err(|e| RpcError::InvalidArgument(format!("cannot encode arguments: {e}")))?;

        let mut writer = self.shared.writer.lock().await;

        let (seq, done) = {
            let mut state = self.shared.state.lock().expect("client state lock poisoned");
            if state.closing || state.shutdown {
                return Err(RpcError::Closed);
            }
            let seq = state.seq;
            state.seq += 1;
            let (tx, rx) = oneshot::channel();
            state.pending.insert(seq, tx);
            (seq, rx)
        };

        let header = Header {
            service_method: service_method.to_string(),
            seq,
            error: String::new(),
        };
        if let Err(e) = writer.write(&header, &payload).await {
            warn!(seq, service_method, "request write failed: {e}");
            let slot = {
                let mut state = self.shared.state.lock().expect("client state lock poisoned");
                state.pending.remove(&seq)
            };
            if let Some(slot) = slot {
                let _ = slot.send(Err(e));
            }
        }
        drop(writer);

        Ok(Call {
            seq,
            service_method: service_method.to_string(),
            done,
            shared: self.shared.clone(),
            _reply: PhantomData,
        })
    }

    /// Calls a method and waits for its reply.
    pub async fn call<A, R>(&self, service_method: &str, args: &A) -> Result<R, RpcError>
    where
        A: Encode,
        R: Decode + Default,
    {
        self.go(service_method, args).await?.join().await
    }

    /// [`Client::call`] bounded by `deadline` (zero means no limit).
    ///
    /// On expiry the call is cancelled: its pending entry is removed and a
    /// reply arriving later is read and discarded.
    pub async fn call_timeout<A, R>(
        &self,
        service_method: &str,
        args: &A,
        deadline: Duration,
    ) -> Result<R, RpcError>
    where
        A: Encode,
        R: Decode + Default,
    {
        let call = self.go(service_method, args).await?;
        if deadline.is_zero() {
            return call.join().await;
        }
        match time::timeout(deadline, call.join()).await {
            Ok(outcome) => outcome,
            Err(_) => Err(RpcError::Cancelled),
        }
    }

    /// False once the client is closing or the connection has shut down.
    pub fn is_available(&self) -> bool {
        let state = self.shared.state.lock().expect("client state lock poisoned");
        !state.closing && !state.shutdown
    }

    /// Closes the client: outstanding calls complete with an error and the
    /// codec is released. Closing twice is an error.
    pub async fn close(&self) -> Result<(), RpcError> {
        {
            let mut state = self.shared.state.lock().expect("client state lock poisoned");
            if state.closing {
                return Err(RpcError::Closed);
            }
            state.closing = true;
        }
        self.receiver.abort();
        self.shared.terminate_calls(RpcError::Closed).await;
        self.shared.writer.lock().await.close().await
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.receiver.abort();
        // Dropping the completion senders resolves any call handle that
        // outlives the client; its join reports the client as closed.
        let mut state = self.shared.state.lock().expect("client state lock poisoned");
        state.shutdown = true;
        state.pending.clear();
    }
}

/// The one reader of the connection.
///
/// Replies are matched to pending calls by sequence number. A reply with
/// no pending call belongs to a cancelled caller and is discarded after
/// its body has been consumed. The loop ends on the first read failure,
/// which is fanned out to everything still pending.
async fn receive_loop(mut reader: Box<dyn CodecRead>, shared: Arc<Shared>) {
    let err = loop {
        let mut header = Header::default();
        if let Err(e) = reader.read_header(&mut header).await {
            break e;
        }

        let slot = {
            let mut state = shared.state.lock().expect("client state lock poisoned");
            state.pending.remove(&header.seq)
        };

        match slot {
            None => {
                trace!(seq = header.seq, "discarding reply with no pending call");
                if let Err(e) = reader.read_body().await {
                    break e;
                }
            }
            Some(done) if !header.error.is_empty() => {
                let body = reader.read_body().await;
                let _ = done.send(Err(RpcError::Server(header.error)));
                if let Err(e) = body {
                    break e;
                }
            }
            Some(done) => match reader.read_body().await {
                Ok(body) => {
                    let _ = done.send(Ok(body));
                }
                Err(e) => {
                    let _ = done.send(Err(e.clone()));
                    break e;
                }
            },
        }
    };

    match &err {
        RpcError::Eof => debug!("server closed the connection"),
        other => debug!("receive loop ended: {other}"),
    }
    shared.terminate_calls(err).await;
}
