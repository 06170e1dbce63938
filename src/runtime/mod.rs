//! Tokio adapters for the transport's external interfaces.
//!
//! - [`UdpLink`]: non-blocking [`Link`] over a clone of the loop's socket
//! - [`TimerQueue`]: [`Scheduler`] whose timers are tokio tasks that post
//!   fired events to a channel
//! - [`EventLoop`]: owns a [`SecureTransport`] and feeds it datagrams and
//!   timer events, one at a time, from a single task
//!
//! Timer tasks never touch the transport. They only send on the channel, and
//! the loop hands each event to the transport on its next turn.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::trace;

use crate::core::{Link, LinkError, Scheduler, SessionDelegate, TimerEvent, TimerHandle};
use crate::crypto::StaticKeypair;
use crate::transport::{SecureTransport, TransportConfig, TransportError};

/// Receive buffer size; larger than any datagram the transport sends.
pub const RECV_BUFFER_SIZE: usize = 65535;

/// Transport driven by the tokio adapters.
pub type UdpTransport<D> = SecureTransport<UdpLink, TimerQueue, D>;

/// [`Link`] over a UDP socket.
///
/// Sends go straight to a non-blocking std socket, so they never wait on the
/// reactor.
#[derive(Debug)]
pub struct UdpLink {
    socket: std::net::UdpSocket,
}

impl UdpLink {
    /// Wrap a socket, switching it to non-blocking mode.
    pub fn new(socket: std::net::UdpSocket) -> io::Result<Self> {
        socket.set_nonblocking(true)?;
        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl Link for UdpLink {
    type Address = SocketAddr;

    /// A full send buffer is reported like any other failure; reliable
    /// messages are retransmitted later.
    fn send(&mut self, datagram: &[u8], destination: &SocketAddr) -> Result<(), LinkError> {
        self.socket.send_to(datagram, destination)?;
        Ok(())
    }
}

/// Fired timer, as delivered on the [`TimerQueue`] channel.
pub type FiredTimer = (TimerHandle, TimerEvent);

/// [`Scheduler`] backed by tokio sleeps.
///
/// Must be used from within a Tokio runtime.
#[derive(Debug)]
pub struct TimerQueue {
    tx: mpsc::UnboundedSender<FiredTimer>,
    armed: HashMap<TimerHandle, AbortHandle>,
    next_handle: u64,
}

impl TimerQueue {
    /// Create a queue and the receiver fired timers arrive on.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<FiredTimer>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let queue = Self {
            tx,
            armed: HashMap::new(),
            next_handle: 1,
        };
        (queue, rx)
    }

    /// Mark a fired timer as consumed.
    ///
    /// Returns `false` if it was canceled after firing, in which case the
    /// event must be ignored.
    pub fn complete(&mut self, handle: TimerHandle) -> bool {
        self.armed.remove(&handle).is_some()
    }

    /// Timers scheduled and neither fired nor canceled.
    pub fn armed(&self) -> usize {
        self.armed.len()
    }
}

impl Scheduler for TimerQueue {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }

    fn schedule_after(&mut self, delay: Duration, event: TimerEvent) -> TimerHandle {
        let handle = TimerHandle(self.next_handle);
        self.next_handle += 1;

        let tx = self.tx.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // The loop may be gone; nothing left to notify.
            let _ = tx.send((handle, event));
        });
        self.armed.insert(handle, task.abort_handle());
        handle
    }

    fn cancel(&mut self, handle: TimerHandle) {
        if let Some(task) = self.armed.remove(&handle) {
            task.abort();
        }
    }
}

impl Drop for TimerQueue {
    fn drop(&mut self) {
        for task in self.armed.values() {
            task.abort();
        }
    }
}

/// What one [`EventLoop::turn`] did.
#[derive(Debug)]
pub enum Turn {
    /// A datagram was processed. `dropped` holds the reason it was discarded.
    Received {
        source: SocketAddr,
        dropped: Option<TransportError>,
    },
    /// A timer fired and was handled.
    Timer(TimerEvent),
    /// A timer fired after being canceled and was ignored.
    Idle,
}

/// Single-task driver for a [`UdpTransport`].
pub struct EventLoop<D: SessionDelegate> {
    transport: UdpTransport<D>,
    socket: UdpSocket,
    timers: mpsc::UnboundedReceiver<FiredTimer>,
    recv_buffer: Vec<u8>,
}

impl<D: SessionDelegate> EventLoop<D> {
    /// Bind a UDP socket and build a transport on it.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn bind(
        addr: SocketAddr,
        config: TransportConfig,
        keypair: StaticKeypair,
        delegate: D,
    ) -> io::Result<Self> {
        let std_socket = std::net::UdpSocket::bind(addr)?;
        let link = UdpLink::new(std_socket.try_clone()?)?;
        std_socket.set_nonblocking(true)?;
        let socket = UdpSocket::from_std(std_socket)?;
        let (scheduler, timers) = TimerQueue::new();
        Ok(Self {
            transport: SecureTransport::new(config, keypair, link, scheduler, delegate),
            socket,
            timers,
            recv_buffer: vec![0u8; RECV_BUFFER_SIZE],
        })
    }

    pub fn transport(&self) -> &UdpTransport<D> {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut UdpTransport<D> {
        &mut self.transport
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Wait for one datagram or timer and hand it to the transport.
    ///
    /// Cancel safe: dropping the future before it completes loses nothing.
    pub async fn turn(&mut self) -> io::Result<Turn> {
        enum Ready {
            Datagram(io::Result<(usize, SocketAddr)>),
            Timer(Option<FiredTimer>),
        }

        let ready = tokio::select! {
            received = self.socket.recv_from(&mut self.recv_buffer) => Ready::Datagram(received),
            fired = self.timers.recv() => Ready::Timer(fired),
        };

        match ready {
            Ready::Datagram(received) => {
                let (len, source) = received?;
                trace!(%source, len, "datagram received");
                let dropped = self
                    .transport
                    .on_receive(&self.recv_buffer[..len], source)
                    .err();
                Ok(Turn::Received { source, dropped })
            }
            Ready::Timer(Some((handle, event))) => {
                if !self.transport.scheduler_mut().complete(handle) {
                    return Ok(Turn::Idle);
                }
                self.transport.handle_timer(event);
                Ok(Turn::Timer(event))
            }
            // The queue owns the sender, so this only happens mid-teardown.
            Ready::Timer(None) => Ok(Turn::Idle),
        }
    }

    /// Run turns until `done` holds or `limit` elapses.
    ///
    /// Returns whether `done` was reached.
    pub async fn run_until(
        &mut self,
        mut done: impl FnMut(&UdpTransport<D>) -> bool,
        limit: Duration,
    ) -> io::Result<bool> {
        let deadline = tokio::time::Instant::now() + limit;
        while !done(&self.transport) {
            match tokio::time::timeout_at(deadline, self.turn()).await {
                Ok(turn) => {
                    turn?;
                }
                Err(_) => return Ok(false),
            }
        }
        Ok(true)
    }
}

impl<D: SessionDelegate> std::fmt::Debug for EventLoop<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoop")
            .field("transport", &self.transport)
            .field("local_addr", &self.socket.local_addr().ok())
            .finish_non_exhaustive()
    }
}
