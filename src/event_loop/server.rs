//! TCP servers and their accepted peers.
//!
//! A server is a non-blocking listener bound to loopback.  Each accept
//! readiness accepts one connection; each peer readiness performs one read
//! into the loop's receive buffer.  No framing is applied: whatever a read
//! returns is handed to `did_receive_data` as-is.

use std::io::{self, Read};
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::os::fd::AsRawFd;

use log::{debug, error, info, trace, warn};

use super::backend::{Reactor, Token};
use super::slots::{PeerSource, ServerSource};
use super::{EventClass, EventId, EventLoop, RESERVED_EVENT_ID};
use crate::error::EventLoopError;

/// Decide whether to keep a freshly accepted connection.
pub type ShouldAcceptFn<C> = fn(&mut EventLoop<C>, &mut C, EventId, SocketAddr) -> bool;

/// A connection was accepted: `(server id, peer id, remote address)`.
pub type DidAcceptFn<C> = fn(&mut EventLoop<C>, &mut C, EventId, EventId, SocketAddr);

/// Bytes arrived from a peer: `(server id, peer id, data)`.
pub type DidReceiveDataFn<C> = fn(&mut EventLoop<C>, &mut C, EventId, EventId, &[u8]);

/// The remote end closed or the connection failed: `(server id, peer id)`.
pub type PeerDidDisconnectFn<C> = fn(&mut EventLoop<C>, &mut C, EventId, EventId);

pub(crate) struct ServerCallbacks<C> {
    pub should_accept: Option<ShouldAcceptFn<C>>,
    pub did_accept: Option<DidAcceptFn<C>>,
    pub did_receive_data: Option<DidReceiveDataFn<C>>,
    pub peer_did_disconnect: Option<PeerDidDisconnectFn<C>>,
}

// fn pointers are Copy whatever `C` is; derive would demand `C: Copy`.
impl<C> Clone for ServerCallbacks<C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C> Copy for ServerCallbacks<C> {}

impl<C> Default for ServerCallbacks<C> {
    fn default() -> Self {
        Self {
            should_accept: None,
            did_accept: None,
            did_receive_data: None,
            peer_did_disconnect: None,
        }
    }
}

/// Everything needed to start a server.  Callbacks are optional; a server
/// without `should_accept` accepts every connection.
///
/// ```ignore
/// let server = ServerDescriptor::new(1, 7750)
///     .did_accept(on_accept)
///     .did_receive_data(on_data);
/// event_loop.add_server(server)?;
/// ```
pub struct ServerDescriptor<C> {
    pub id: EventId,
    /// Loopback port; 0 lets the kernel pick (see [`EventLoop::local_port`]).
    pub port: u16,
    callbacks: ServerCallbacks<C>,
}

impl<C> ServerDescriptor<C> {
    pub fn new(id: EventId, port: u16) -> Self {
        Self {
            id,
            port,
            callbacks: ServerCallbacks::default(),
        }
    }

    #[must_use]
    pub fn should_accept(mut self, f: ShouldAcceptFn<C>) -> Self {
        self.callbacks.should_accept = Some(f);
        self
    }

    #[must_use]
    pub fn did_accept(mut self, f: DidAcceptFn<C>) -> Self {
        self.callbacks.did_accept = Some(f);
        self
    }

    #[must_use]
    pub fn did_receive_data(mut self, f: DidReceiveDataFn<C>) -> Self {
        self.callbacks.did_receive_data = Some(f);
        self
    }

    #[must_use]
    pub fn peer_did_disconnect(mut self, f: PeerDidDisconnectFn<C>) -> Self {
        self.callbacks.peer_did_disconnect = Some(f);
        self
    }
}

impl<C> EventLoop<C> {
    // -----------------------------------------------------------------------
    // Servers
    // -----------------------------------------------------------------------

    /// Bind a loopback listener and start accepting.
    pub fn add_server(&mut self, descriptor: ServerDescriptor<C>) -> Result<(), EventLoopError> {
        let ServerDescriptor {
            id,
            port,
            callbacks,
        } = descriptor;
        self.check_new_id(EventClass::Server, id, self.servers.contains_active(id))?;

        let listener = bind_loopback(port).map_err(|e| {
            error!("EventLoop: failed to listen on 127.0.0.1:{port} for server {id}: {e}");
            EventLoopError::Io(e)
        })?;
        let raw = listener.as_raw_fd();
        let bound = listener.local_addr().map(|a| a.port()).unwrap_or(port);

        let index = self.servers.insert(
            id,
            ServerSource {
                listener: Some(listener),
                callbacks,
            },
        );
        if let Err(e) = self.reactor.register(raw, Token::new(EventClass::Server, index)) {
            error!("EventLoop: failed to register server {id}: {e}");
            self.servers.vacate(index);
            return Err(EventLoopError::Io(e));
        }

        info!("EventLoop: server {id} listening on 127.0.0.1:{bound}");
        Ok(())
    }

    /// Close every peer of the server (without disconnect callbacks), then
    /// the listener itself.
    pub fn remove_server(&mut self, id: EventId) {
        let Some(index) = self.servers.find_active(id) else {
            warn!("EventLoop: no server {id} to remove");
            return;
        };

        for peer in self.peers.active_indices(|r| r.source.server_id == id) {
            if let Some(peer_id) = self.peers.deactivate(peer, &self.reactor) {
                debug!("EventLoop: closed peer {peer_id} of server {id}");
            }
        }

        self.servers.deactivate(index, &self.reactor);
        info!("EventLoop: removed server {id}");
    }

    pub fn has_server(&self, id: EventId) -> bool {
        id != RESERVED_EVENT_ID && self.servers.contains_active(id)
    }

    pub fn has_server_peer(&self, id: EventId) -> bool {
        id != RESERVED_EVENT_ID && self.peers.contains_active(id)
    }

    /// Number of connected peers belonging to server `id`.
    pub fn server_peer_count(&self, id: EventId) -> usize {
        self.peers
            .active_indices(|r| r.source.server_id == id)
            .len()
    }

    /// Remote address of a connected peer.
    pub fn peer_address(&self, peer_id: EventId) -> Option<SocketAddr> {
        let index = self.peers.find_active(peer_id)?;
        self.peers.active(index).map(|r| r.source.address)
    }

    /// Port the server is actually bound to.
    pub fn local_port(&self, id: EventId) -> Option<u16> {
        let index = self.servers.find_active(id)?;
        let listener = self.servers.active(index)?.source.listener.as_ref()?;
        listener.local_addr().ok().map(|a| a.port())
    }

    pub(super) fn server_ready(&mut self, index: usize, ctx: &mut C) {
        let Some(record) = self.servers.active(index) else {
            return;
        };
        let server_id = record.id;
        let callbacks = record.source.callbacks;
        let Some(listener) = &record.source.listener else {
            return;
        };

        let (stream, address) = match listener.accept() {
            Ok(accepted) => accepted,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
            Err(e) => {
                error!("EventLoop: accept failed on server {server_id}: {e}");
                return;
            }
        };

        if let Err(e) = stream.set_nonblocking(true) {
            error!("EventLoop: failed to configure peer from {address}: {e}");
            return;
        }

        if let Some(should_accept) = callbacks.should_accept {
            if !should_accept(self, ctx, server_id, address) {
                debug!("EventLoop: server {server_id} rejected {address}");
                close(stream);
                return;
            }
            // The callback may have removed its own server.
            if self.servers.active(index).is_none() {
                close(stream);
                return;
            }
        }

        let Some(peer_id) = self.allocate_peer_id() else {
            error!("EventLoop: no free peer id for {address}");
            close(stream);
            return;
        };

        let raw = stream.as_raw_fd();
        let peer_index = self.peers.insert(
            peer_id,
            PeerSource {
                stream: Some(stream),
                server_id,
                address,
                callbacks,
            },
        );
        if let Err(e) = self
            .reactor
            .register(raw, Token::new(EventClass::ServerPeer, peer_index))
        {
            error!("EventLoop: failed to register peer {peer_id}: {e}");
            self.peers.vacate(peer_index);
            return;
        }

        debug!("EventLoop: server {server_id} accepted peer {peer_id} from {address}");
        if let Some(did_accept) = callbacks.did_accept {
            did_accept(self, ctx, server_id, peer_id, address);
        }
    }

    pub(super) fn peer_ready(&mut self, index: usize, ctx: &mut C) {
        let Some(record) = self.peers.active(index) else {
            return;
        };
        let peer_id = record.id;
        let server_id = record.source.server_id;
        let callbacks = record.source.callbacks;
        let Some(stream) = &record.source.stream else {
            return;
        };

        let mut buffer = core::mem::take(&mut self.receive_buffer);
        let result = (&*stream).read(&mut buffer);

        match result {
            Ok(0) => {
                self.receive_buffer = buffer;
                self.disconnect_peer(index, server_id, peer_id, callbacks, ctx);
            }
            Ok(n) => {
                trace!("EventLoop: peer {peer_id} sent {n} bytes");
                if let Some(did_receive_data) = callbacks.did_receive_data {
                    did_receive_data(self, ctx, server_id, peer_id, &buffer[..n]);
                }
                self.receive_buffer = buffer;
            }
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::Interrupted =>
            {
                self.receive_buffer = buffer;
            }
            Err(e) => {
                self.receive_buffer = buffer;
                debug!("EventLoop: read from peer {peer_id} failed: {e}");
                self.disconnect_peer(index, server_id, peer_id, callbacks, ctx);
            }
        }
    }

    fn disconnect_peer(
        &mut self,
        index: usize,
        server_id: EventId,
        peer_id: EventId,
        callbacks: ServerCallbacks<C>,
        ctx: &mut C,
    ) {
        debug!("EventLoop: peer {peer_id} of server {server_id} disconnected");
        if let Some(peer_did_disconnect) = callbacks.peer_did_disconnect {
            peer_did_disconnect(self, ctx, server_id, peer_id);
        }
        // Removing the server from the callback already closed this peer.
        self.peers.deactivate(index, &self.reactor);
    }

    /// Next free peer id, scanning forward from the last one handed out.
    fn allocate_peer_id(&mut self) -> Option<EventId> {
        for _ in 0..=u32::from(u16::MAX) {
            let candidate = self.next_peer_id;
            self.next_peer_id = self.next_peer_id.wrapping_add(1);
            if candidate != RESERVED_EVENT_ID && !self.peers.contains_active(candidate) {
                return Some(candidate);
            }
        }
        None
    }
}

fn bind_loopback(port: u16) -> io::Result<TcpListener> {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, port))?;
    listener.set_nonblocking(true)?;
    Ok(listener)
}

fn close(stream: TcpStream) {
    // The peer may already be gone; dropping closes the socket regardless.
    let _ = stream.shutdown(std::net::Shutdown::Both);
}
