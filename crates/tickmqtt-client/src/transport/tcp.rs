//! Non-blocking TCP transport on mio.

use std::io::{self, Read, Write};
use std::net::ToSocketAddrs;
use std::time::Duration;

use bytes::BytesMut;
use mio::net::TcpStream;
use mio::{Events, Interest, Poll, Token};
use tickmqtt_core::frame;

use super::{Transport, TransportEvent};
use crate::config::DEFAULT_RECEIVE_BUFFER_SIZE;
use crate::options::BrokerAddress;

const SOCKET: Token = Token(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SocketState {
    Closed,
    Connecting,
    Connected,
}

/// Plain TCP transport. Reads are framed into single packets before they
/// are reported.
pub struct TcpTransport {
    poll: Poll,
    events: Events,
    stream: Option<TcpStream>,
    state: SocketState,
    read_buf: BytesMut,
    chunk: Vec<u8>,
    maximum_packet_size: Option<u32>,
    pending: Vec<TransportEvent>,
}

impl TcpTransport {
    pub fn new() -> io::Result<Self> {
        Self::with_buffer_size(DEFAULT_RECEIVE_BUFFER_SIZE)
    }

    /// `buffer_size` is the socket read chunk size.
    pub fn with_buffer_size(buffer_size: usize) -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(16),
            stream: None,
            state: SocketState::Closed,
            read_buf: BytesMut::with_capacity(buffer_size),
            chunk: vec![0u8; buffer_size.max(1)],
            maximum_packet_size: None,
            pending: Vec::new(),
        })
    }

    fn open(&mut self, address: &BrokerAddress) -> io::Result<()> {
        let addr = (address.host.as_str(), address.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "Could not resolve address"))?;

        let mut stream = TcpStream::connect(addr)?;
        self.poll
            .registry()
            .register(&mut stream, SOCKET, Interest::READABLE | Interest::WRITABLE)?;
        self.stream = Some(stream);
        self.state = SocketState::Connecting;
        Ok(())
    }

    /// A writable event while connecting means the connect finished, one
    /// way or the other.
    fn finish_connect(&mut self) {
        let Some(stream) = self.stream.as_ref() else {
            return;
        };
        let result = match stream.take_error() {
            Ok(Some(e)) | Err(e) => Err(e),
            Ok(None) => stream.peer_addr().map(|_| ()),
        };
        match result {
            Ok(()) => {
                if let Err(e) = stream.set_nodelay(true) {
                    log::debug!("set_nodelay failed: {}", e);
                }
                self.state = SocketState::Connected;
                self.pending.push(TransportEvent::Connected(true));
            }
            Err(e) if e.kind() == io::ErrorKind::NotConnected => {}
            Err(e) => {
                log::debug!("connect failed: {}", e);
                self.teardown();
                self.pending.push(TransportEvent::Connected(false));
            }
        }
    }

    fn handle_read(&mut self) {
        let Some(stream) = self.stream.as_mut() else {
            return;
        };

        let mut closed = false;
        loop {
            match stream.read(&mut self.chunk) {
                Ok(0) => {
                    closed = true;
                    break;
                }
                Ok(n) => self.read_buf.extend_from_slice(&self.chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.pending.push(TransportEvent::Error(e.to_string()));
                    self.teardown();
                    return;
                }
            }
        }

        match frame::drain_frames(&mut self.read_buf, self.maximum_packet_size) {
            Ok(frames) => self
                .pending
                .extend(frames.into_iter().map(TransportEvent::Data)),
            Err(e) => {
                self.pending.push(TransportEvent::Malformed(e));
                self.read_buf.clear();
            }
        }

        if closed {
            self.teardown();
            self.pending.push(TransportEvent::Disconnected);
        }
    }

    fn teardown(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = self.poll.registry().deregister(&mut stream);
        }
        self.state = SocketState::Closed;
        self.read_buf.clear();
    }
}

impl Transport for TcpTransport {
    fn connect(&mut self, address: &BrokerAddress) -> bool {
        self.teardown();
        match self.open(address) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("connect to {} failed: {}", address, e);
                false
            }
        }
    }

    fn send(&mut self, bytes: &[u8]) -> io::Result<usize> {
        if self.state != SocketState::Connected {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "socket not connected"));
        }
        let Some(stream) = self.stream.as_mut() else {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "socket not connected"));
        };
        match stream.write(bytes) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn close(&mut self) -> bool {
        let was_open = self.stream.is_some();
        if let Some(stream) = self.stream.as_ref() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
        self.teardown();
        was_open
    }

    fn is_connected(&self) -> bool {
        self.state == SocketState::Connected
    }

    fn poll_events(&mut self, out: &mut Vec<TransportEvent>) {
        if self.stream.is_some() {
            if let Err(e) = self.poll.poll(&mut self.events, Some(Duration::ZERO)) {
                if e.kind() != io::ErrorKind::Interrupted {
                    self.pending.push(TransportEvent::Error(e.to_string()));
                }
            }

            let mut readable = false;
            let mut writable = false;
            for event in self.events.iter() {
                if event.token() == SOCKET {
                    readable |= event.is_readable() || event.is_read_closed();
                    writable |= event.is_writable() || event.is_error();
                }
            }

            if writable && self.state == SocketState::Connecting {
                self.finish_connect();
            }
            if readable && self.state == SocketState::Connected {
                self.handle_read();
            }
        }
        out.append(&mut self.pending);
    }

    fn set_maximum_packet_size(&mut self, maximum: Option<u32>) {
        self.maximum_packet_size = maximum;
    }
}
