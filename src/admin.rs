//! Administrative control channel.
//!
//! A loopback TCP server accepting newline-terminated ASCII commands:
//!
//! | command          | effect                                       |
//! |------------------|----------------------------------------------|
//! | `stop` / `quit`  | stop the event loop (the process then exits) |
//! | `status`         | log state, current bird and output levels    |
//!
//! Commands are case-insensitive.  Nothing is written back to the peer.
//!
//! TCP delivers a byte stream, so a command may arrive split across reads.
//! Bytes are buffered per peer and only newline-terminated lines are acted
//! on; a line longer than [`MAX_LINE_LENGTH`] is discarded up to its
//! newline.

use std::collections::HashMap;
use std::net::SocketAddr;

use log::{info, warn};

use crate::controller::{Controller, ControllerLoop};
use crate::error::EventLoopError;
use crate::event_loop::{EventId, ServerDescriptor};

/// Server id the admin channel registers under.
pub const ADMIN_SERVER_ID: EventId = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminCommand {
    Stop,
    Status,
}

/// Longest command line kept while waiting for its newline.
pub const MAX_LINE_LENGTH: usize = 256;

#[derive(Debug, Default)]
struct PendingLine {
    bytes: Vec<u8>,
    /// The current line outgrew the limit; drop everything up to `\n`.
    overflowed: bool,
}

/// Partial command lines of the connected admin peers.
#[derive(Debug, Default)]
pub struct AdminSessions {
    pending: HashMap<EventId, PendingLine>,
}

impl AdminSessions {
    /// Append `data` from `peer` and return the lines it completed.
    pub fn feed(&mut self, peer: EventId, data: &[u8]) -> Vec<String> {
        let line = self.pending.entry(peer).or_default();
        let mut complete = Vec::new();

        for &byte in data {
            if byte == b'\n' {
                if !line.overflowed {
                    complete.push(String::from_utf8_lossy(&line.bytes).into_owned());
                }
                line.bytes.clear();
                line.overflowed = false;
            } else if line.overflowed {
                continue;
            } else if line.bytes.len() == MAX_LINE_LENGTH {
                warn!("Admin: peer {peer} sent a line over {MAX_LINE_LENGTH} bytes, discarding it");
                line.bytes.clear();
                line.overflowed = true;
            } else {
                line.bytes.push(byte);
            }
        }

        complete
    }

    /// Forget whatever `peer` left unfinished.
    pub fn close(&mut self, peer: EventId) {
        self.pending.remove(&peer);
    }

    /// Bytes buffered for `peer` while waiting for a newline.
    pub fn buffered(&self, peer: EventId) -> usize {
        self.pending.get(&peer).map_or(0, |l| l.bytes.len())
    }
}

/// Parse one line.  `None` for anything unrecognised.
pub fn parse_command(line: &str) -> Option<AdminCommand> {
    let line = line.trim();
    if line.eq_ignore_ascii_case("stop") || line.eq_ignore_ascii_case("quit") {
        Some(AdminCommand::Stop)
    } else if line.eq_ignore_ascii_case("status") {
        Some(AdminCommand::Status)
    } else {
        None
    }
}

/// Start listening for admin connections on `127.0.0.1:port`.
pub fn install(event_loop: &mut ControllerLoop, port: u16) -> Result<(), EventLoopError> {
    event_loop.add_server(
        ServerDescriptor::new(ADMIN_SERVER_ID, port)
            .did_accept(admin_accepted)
            .did_receive_data(admin_received)
            .peer_did_disconnect(admin_disconnected),
    )
}

fn admin_accepted(
    _: &mut ControllerLoop,
    _: &mut Controller,
    _: EventId,
    peer: EventId,
    address: SocketAddr,
) {
    info!("Admin: peer {peer} connected from {address}");
}

fn admin_received(
    event_loop: &mut ControllerLoop,
    ctrl: &mut Controller,
    _: EventId,
    peer: EventId,
    data: &[u8],
) {
    let lines = ctrl.admin_sessions.feed(peer, data);
    for line in lines.iter().map(|l| l.trim()).filter(|l| !l.is_empty()) {
        match parse_command(line) {
            Some(AdminCommand::Stop) => {
                info!("Admin: peer {peer} requested stop");
                event_loop.stop();
            }
            Some(AdminCommand::Status) => log_status(ctrl),
            None => warn!("Admin: unknown command {line:?} from peer {peer}"),
        }
    }
}

fn admin_disconnected(
    _: &mut ControllerLoop,
    ctrl: &mut Controller,
    _: EventId,
    peer: EventId,
) {
    ctrl.admin_sessions.close(peer);
    info!("Admin: peer {peer} disconnected");
}

fn log_status(ctrl: &Controller) {
    info!(
        "Admin: state {}, bird {}/{}, {} pecks remaining",
        ctrl.state(),
        ctrl.current_bird(),
        ctrl.bird_count(),
        ctrl.pecks_remaining()
    );
    for output in ctrl.outputs() {
        info!("Admin:   {} = {}", output.name(), u8::from(output.value()));
    }
}
