use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use bytes::BytesMut;
use dbgp_codec::{Command, FrameCodec};

use crate::errors::TransportError;
use crate::responses::{self, Element};
use crate::types::TransactionId;

/// How often the accept loop checks for cancellation.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(100);

const READ_CHUNK_SIZE: usize = 1024;

/// Sole source of transaction ids for the lifetime of one connection.
#[derive(Debug, Default)]
pub struct TransactionAllocator {
    counter: TransactionId,
}

impl TransactionAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment, then return the new id. A fresh allocator yields 1, 2, 3...
    pub fn next(&mut self) -> TransactionId {
        self.counter += 1;
        self.counter
    }

    pub fn reset(&mut self) {
        self.counter = 0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenOutcome {
    /// An engine connected; the session is now live.
    Connected,
    /// The wait was cancelled before any engine showed up.
    Cancelled,
}

/// Cross-thread handle for tearing a session down.
///
/// `listen` and `receive` both block on the owning thread; the only way to
/// get them back is to trip the cancel flag (ends the accept poll loop) and
/// shut the socket down (fails a blocked read immediately, rather than
/// waiting on a timeout that does not exist).
#[derive(Clone, Default)]
pub struct SessionController {
    cancel: Arc<AtomicBool>,
    stream: Arc<Mutex<Option<TcpStream>>>,
}

impl SessionController {
    pub fn disconnect(&self) {
        self.cancel.store(true, Ordering::SeqCst);
        if let Some(stream) = self.stream.lock().unwrap().take() {
            tracing::debug!("shutting down session socket");
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

/// One DBGp connection: the accept/listen lifecycle, the socket, the inbound
/// byte buffer and the transaction counter.
///
/// The protocol is strictly synchronous: one command, one reply, in order.
/// There is never more than one outstanding request, so the session needs no
/// request store or locking of its own.
pub struct ProtocolSession {
    stream: Option<TcpStream>,
    buffer: BytesMut,
    codec: FrameCodec,
    transactions: TransactionAllocator,
    controller: SessionController,
}

impl Default for ProtocolSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolSession {
    pub fn new() -> Self {
        Self {
            stream: None,
            buffer: BytesMut::new(),
            codec: FrameCodec::default(),
            transactions: TransactionAllocator::new(),
            controller: SessionController::default(),
        }
    }

    /// Handle for cancelling `listen` or aborting a blocked `receive` from
    /// another thread.
    pub fn controller(&self) -> SessionController {
        self.controller.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Bind on `port` and wait for the engine to connect back.
    ///
    /// The listener polls non-blocking on a short interval so a concurrent
    /// [`SessionController::disconnect`] aborts the wait. Once a peer is
    /// accepted the stream switches to blocking mode with no read timeout.
    #[tracing::instrument(skip(self))]
    pub fn listen(&mut self, port: u16) -> Result<ListenOutcome, TransportError> {
        let listener = bind_reusable(port)?;
        listener.set_nonblocking(true)?;
        tracing::debug!(port, "waiting for engine connection");

        loop {
            if self.controller.cancel.load(Ordering::SeqCst) {
                tracing::debug!("listen cancelled");
                return Ok(ListenOutcome::Cancelled);
            }

            match listener.accept() {
                Ok((stream, addr)) => {
                    tracing::debug!(%addr, "engine connected");
                    stream.set_nonblocking(false)?;
                    stream.set_read_timeout(None)?;
                    *self.controller.stream.lock().unwrap() = Some(stream.try_clone()?);
                    self.stream = Some(stream);
                    return Ok(ListenOutcome::Connected);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Encode and transmit one command under a freshly allocated transaction
    /// id, which is returned.
    pub fn send(&mut self, command: &Command) -> Result<TransactionId, TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;
        let transaction_id = self.transactions.next();
        let frame = command.encode(transaction_id);
        stream.write_all(&frame)?;
        stream.flush()?;
        tracing::debug!(verb = command.verb(), transaction_id, "sent command");
        Ok(transaction_id)
    }

    /// Block until a complete reply frame arrives, then parse its XML body.
    ///
    /// A shutdown of the socket from another thread fails the blocked read
    /// with a connection error instead of hanging forever.
    pub fn receive(&mut self) -> Result<Element, TransportError> {
        loop {
            if let Some(body) = self.codec.decode(&mut self.buffer)? {
                let text = String::from_utf8(body)
                    .map_err(|_| TransportError::Protocol("reply body is not utf8".into()))?;
                tracing::trace!(body = %text, "received reply");
                return responses::parse_document(&text);
            }

            let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;
            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = stream.read(&mut chunk)?;
            if read == 0 {
                return Err(TransportError::Closed);
            }
            self.buffer.extend_from_slice(&chunk[..read]);
        }
    }

    /// One synchronous request/reply pair.
    pub fn request(&mut self, command: &Command) -> Result<Element, TransportError> {
        self.send(command)?;
        self.receive()
    }

    /// Idempotent teardown: close the socket if open, drop buffered bytes,
    /// reset the transaction counter. Never fails, even when called twice or
    /// on a session that never connected.
    pub fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
            tracing::debug!("session closed");
        }
        self.controller.stream.lock().unwrap().take();
        self.buffer.clear();
        self.transactions.reset();
    }
}

impl Drop for ProtocolSession {
    fn drop(&mut self) {
        self.close();
    }
}

fn bind_reusable(port: u16) -> Result<TcpListener, TransportError> {
    let address = SocketAddr::from(([0, 0, 0, 0], port));
    let socket = socket2::Socket::new(socket2::Domain::IPV4, socket2::Type::STREAM, None)?;
    socket.set_reuse_address(true)?;
    socket.bind(&address.into())?;
    socket.listen(1)?;
    Ok(socket.into())
}
