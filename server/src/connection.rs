//! Byte-stream transports the dispatcher runs over
//!
//! The dispatcher only needs readiness notifications plus non-blocking reads
//! and writes. Both traits are implemented for tokio's TCP types and for an
//! in-process pair used by tests and embedders.

use crate::error::QueueError;
use crate::ring_queue::RingQueue;
use std::cell::RefCell;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::rc::Rc;
use std::task::{Context, Poll, Waker};
use tokio::net::{TcpListener, TcpStream};

/// One accepted client connection.
///
/// `try_read` returning `Ok(0)` means the peer closed its side.
/// `WouldBlock` from either `try_` method means readiness was stale and the
/// caller should poll again.
pub trait Connection {
    fn poll_read_ready(&self, cx: &mut Context<'_>) -> Poll<io::Result<()>>;

    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize>;

    fn poll_write_ready(&self, cx: &mut Context<'_>) -> Poll<io::Result<()>>;

    fn try_write(&self, buf: &[u8]) -> io::Result<usize>;

    /// Releases the connection. Dropping it is enough for most transports.
    fn close(self)
    where
        Self: Sized,
    {
        drop(self);
    }
}

/// Source of new connections.
pub trait Listener {
    type Conn: Connection;

    fn poll_accept(&self, cx: &mut Context<'_>) -> Poll<io::Result<(Self::Conn, SocketAddr)>>;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

/// Most bytes one connection may have queued before it counts as stalled.
pub const WRITE_BUFFER_MAX: usize = 64 * shared::MSG_MAX_SIZE;

/// Bytes queued for one connection that its transport has not taken yet.
///
/// Nothing here ever waits: a peer that stops reading only fills its own
/// buffer, and overflowing it is reported as a write failure.
#[derive(Debug, Default)]
pub struct WriteBuffer {
    bytes: Vec<u8>,
}

impl WriteBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `data` behind whatever is already waiting.
    pub fn push(&mut self, data: &[u8]) -> io::Result<()> {
        if self.bytes.len() + data.len() > WRITE_BUFFER_MAX {
            return Err(io::Error::new(
                io::ErrorKind::WouldBlock,
                format!("{} bytes already waiting", self.bytes.len()),
            ));
        }
        self.bytes
            .try_reserve(data.len())
            .map_err(|e| io::Error::new(io::ErrorKind::OutOfMemory, e))?;
        self.bytes.extend_from_slice(data);
        Ok(())
    }

    /// Hands the connection as much as it takes right now. `WouldBlock`
    /// leaves the rest queued for the next write readiness.
    pub fn write_to<C: Connection + ?Sized>(&mut self, conn: &C) -> io::Result<()> {
        let mut written = 0;
        let result = loop {
            if written == self.bytes.len() {
                break Ok(());
            }
            match conn.try_write(&self.bytes[written..]) {
                Ok(0) => break Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break Ok(()),
                Err(e) => break Err(e),
            }
        };
        self.bytes.drain(..written);
        result
    }

    pub fn clear(&mut self) {
        self.bytes.clear();
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl Connection for TcpStream {
    fn poll_read_ready(&self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        TcpStream::poll_read_ready(self, cx)
    }

    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize> {
        TcpStream::try_read(self, buf)
    }

    fn poll_write_ready(&self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        TcpStream::poll_write_ready(self, cx)
    }

    fn try_write(&self, buf: &[u8]) -> io::Result<usize> {
        TcpStream::try_write(self, buf)
    }
}

impl Listener for TcpListener {
    type Conn = TcpStream;

    fn poll_accept(&self, cx: &mut Context<'_>) -> Poll<io::Result<(TcpStream, SocketAddr)>> {
        TcpListener::poll_accept(self, cx)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        TcpListener::local_addr(self)
    }
}

#[derive(Default)]
struct Pipe {
    inbound: RingQueue<Vec<u8>>,
    partial: Vec<u8>,
    outbound: Vec<u8>,
    hung_up: bool,
    closed: bool,
    broken: bool,
    stalled: bool,
    read_waker: Option<Waker>,
    write_waker: Option<Waker>,
}

impl Pipe {
    fn wake(&mut self) {
        if let Some(waker) = self.read_waker.take() {
            waker.wake();
        }
    }
}

/// In-process connection. Clones share the same pipe: the server holds one
/// end and the test drives the other through `send`, `hang_up` and
/// `take_output`.
///
/// Every `send` is delivered as its own read, so tests control framing.
#[derive(Clone, Default)]
pub struct MemoryConnection {
    pipe: Rc<RefCell<Pipe>>,
}

impl std::fmt::Debug for MemoryConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryConnection").finish_non_exhaustive()
    }
}

impl MemoryConnection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues bytes for the server to read.
    pub fn send(&self, bytes: impl AsRef<[u8]>) -> Result<(), QueueError> {
        let mut pipe = self.pipe.borrow_mut();
        pipe.inbound.put(bytes.as_ref().to_vec())?;
        pipe.wake();
        Ok(())
    }

    /// Closes the client side; the server reads end-of-stream once the
    /// pending input is consumed.
    pub fn hang_up(&self) {
        let mut pipe = self.pipe.borrow_mut();
        pipe.hung_up = true;
        pipe.wake();
    }

    /// Makes every later write from the server fail.
    pub fn break_pipe(&self) {
        self.pipe.borrow_mut().broken = true;
    }

    /// Stops taking output, like a peer whose receive window is full.
    pub fn stall_writes(&self) {
        self.pipe.borrow_mut().stalled = true;
    }

    /// Takes output again and wakes a server waiting to write.
    pub fn resume_writes(&self) {
        let mut pipe = self.pipe.borrow_mut();
        pipe.stalled = false;
        if let Some(waker) = pipe.write_waker.take() {
            waker.wake();
        }
    }

    /// Drains everything the server has written so far.
    pub fn take_output(&self) -> String {
        let bytes = std::mem::take(&mut self.pipe.borrow_mut().outbound);
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// Drains server output split into lines, terminators removed.
    pub fn take_lines(&self) -> Vec<String> {
        self.take_output().lines().map(str::to_string).collect()
    }

    /// True once the server has closed its end.
    pub fn is_closed(&self) -> bool {
        self.pipe.borrow().closed
    }
}

impl Connection for MemoryConnection {
    fn poll_read_ready(&self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let mut pipe = self.pipe.borrow_mut();
        if pipe.closed {
            return Poll::Ready(Err(io::ErrorKind::NotConnected.into()));
        }
        if !pipe.partial.is_empty() || !pipe.inbound.is_empty() || pipe.hung_up {
            return Poll::Ready(Ok(()));
        }
        pipe.read_waker = Some(cx.waker().clone());
        Poll::Pending
    }

    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut pipe = self.pipe.borrow_mut();
        if pipe.partial.is_empty() {
            match pipe.inbound.pop() {
                Some(frame) => pipe.partial = frame,
                None if pipe.hung_up => return Ok(0),
                None => return Err(io::ErrorKind::WouldBlock.into()),
            }
        }

        let len = buf.len().min(pipe.partial.len());
        buf[..len].copy_from_slice(&pipe.partial[..len]);
        pipe.partial.drain(..len);
        Ok(len)
    }

    fn poll_write_ready(&self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let mut pipe = self.pipe.borrow_mut();
        if pipe.stalled && !pipe.closed {
            pipe.write_waker = Some(cx.waker().clone());
            return Poll::Pending;
        }
        Poll::Ready(Ok(()))
    }

    fn try_write(&self, buf: &[u8]) -> io::Result<usize> {
        let mut pipe = self.pipe.borrow_mut();
        if pipe.closed {
            return Err(io::ErrorKind::NotConnected.into());
        }
        if pipe.broken || pipe.hung_up {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        if pipe.stalled {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        pipe.outbound.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn close(self) {
        let mut pipe = self.pipe.borrow_mut();
        pipe.closed = true;
        pipe.read_waker = None;
        pipe.write_waker = None;
    }
}

#[derive(Default)]
struct AcceptQueue {
    pending: RingQueue<MemoryConnection>,
    failure: Option<io::ErrorKind>,
    next_port: u16,
    waker: Option<Waker>,
}

impl AcceptQueue {
    fn wake(&mut self) {
        if let Some(waker) = self.waker.take() {
            waker.wake();
        }
    }
}

/// In-process listener handing out `MemoryConnection`s.
#[derive(Clone, Default)]
pub struct MemoryListener {
    queue: Rc<RefCell<AcceptQueue>>,
}

impl MemoryListener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a connection to this listener and returns the client end.
    pub fn connect(&self) -> Result<MemoryConnection, QueueError> {
        let conn = MemoryConnection::new();
        let mut queue = self.queue.borrow_mut();
        queue.pending.put(conn.clone())?;
        queue.wake();
        Ok(conn)
    }

    /// Makes the next accept fail with `kind`, as when the process is out
    /// of descriptors. Queued connections stay queued.
    pub fn fail_accept(&self, kind: io::ErrorKind) {
        let mut queue = self.queue.borrow_mut();
        queue.failure = Some(kind);
        queue.wake();
    }
}

impl Listener for MemoryListener {
    type Conn = MemoryConnection;

    fn poll_accept(&self, cx: &mut Context<'_>) -> Poll<io::Result<(MemoryConnection, SocketAddr)>> {
        let mut queue = self.queue.borrow_mut();
        if let Some(kind) = queue.failure.take() {
            return Poll::Ready(Err(kind.into()));
        }
        match queue.pending.pop() {
            Some(conn) => {
                queue.next_port = queue.next_port.wrapping_add(1);
                let peer = SocketAddr::from((Ipv4Addr::LOCALHOST, queue.next_port));
                Poll::Ready(Ok((conn, peer)))
            }
            None => {
                queue.waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)))
    }
}
