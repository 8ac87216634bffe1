//! TCP server and peer handling over loopback.

use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::{Duration, Instant};

use woodpeckers::error::EventLoopError;
use woodpeckers::event_loop::{EventClass, EventId, EventLoop, ServerDescriptor};

#[derive(Default)]
struct Peers {
    accepted: Vec<(EventId, EventId)>,
    received: Vec<(EventId, Vec<u8>)>,
    disconnected: Vec<EventId>,
    asked: usize,
}

type PeerLoop = EventLoop<Peers>;

const SERVER: EventId = 10;

fn accepted(_: &mut PeerLoop, p: &mut Peers, server: EventId, peer: EventId, _: SocketAddr) {
    p.accepted.push((server, peer));
}

fn received(_: &mut PeerLoop, p: &mut Peers, _: EventId, peer: EventId, data: &[u8]) {
    p.received.push((peer, data.to_vec()));
}

fn disconnected(_: &mut PeerLoop, p: &mut Peers, _: EventId, peer: EventId) {
    p.disconnected.push(peer);
}

fn reject(_: &mut PeerLoop, p: &mut Peers, _: EventId, _: SocketAddr) -> bool {
    p.asked += 1;
    false
}

fn remove_own_server(el: &mut PeerLoop, p: &mut Peers, server: EventId, peer: EventId, data: &[u8]) {
    p.received.push((peer, data.to_vec()));
    el.remove_server(server);
}

fn full_descriptor() -> ServerDescriptor<Peers> {
    ServerDescriptor::new(SERVER, 0)
        .did_accept(accepted)
        .did_receive_data(received)
        .peer_did_disconnect(disconnected)
}

fn start(descriptor: ServerDescriptor<Peers>) -> (PeerLoop, u16) {
    let mut el = EventLoop::new().expect("event loop");
    el.add_server(descriptor).expect("server");
    let port = el.local_port(SERVER).expect("bound port");
    (el, port)
}

fn connect(port: u16) -> TcpStream {
    let stream = TcpStream::connect(("127.0.0.1", port)).expect("connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    stream
}

/// Pass until `done` holds, giving up after two seconds.
fn pump(el: &mut PeerLoop, p: &mut Peers, done: impl Fn(&Peers) -> bool) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !done(p) && Instant::now() < deadline {
        el.run_once(100, p);
    }
    assert!(done(p), "condition not reached in time");
}

/// True once the server side has closed the connection.
fn closed_by_server(stream: &mut TcpStream) -> bool {
    let mut buf = [0u8; 8];
    match stream.read(&mut buf) {
        Ok(0) => true,
        Err(e) => e.kind() == ErrorKind::ConnectionReset,
        Ok(_) => false,
    }
}

#[test]
fn server_registration_follows_has_semantics() {
    let (mut el, _) = start(full_descriptor());
    let mut p = Peers::default();
    assert!(el.has_server(SERVER));

    let err = el.add_server(ServerDescriptor::new(SERVER, 0)).unwrap_err();
    assert!(matches!(
        err,
        EventLoopError::Conflict {
            class: EventClass::Server,
            id: SERVER
        }
    ));

    el.remove_server(SERVER);
    assert!(!el.has_server(SERVER));
    el.run_once(0, &mut p);
    assert!(!el.has_server(SERVER));

    el.add_server(ServerDescriptor::new(SERVER, 0)).unwrap();
    assert!(el.has_server(SERVER));
}

#[test]
fn binding_a_taken_port_fails_without_registering() {
    let (mut el, port) = start(full_descriptor());
    let err = el.add_server(ServerDescriptor::new(11, port)).unwrap_err();
    assert!(matches!(err, EventLoopError::Io(_)));
    assert!(!el.has_server(11));
}

#[test]
fn accepts_receives_and_reports_disconnect() {
    let (mut el, port) = start(full_descriptor());
    let mut p = Peers::default();

    let mut client = connect(port);
    pump(&mut el, &mut p, |p| !p.accepted.is_empty());
    let (server, peer) = p.accepted[0];
    assert_eq!(server, SERVER);
    assert!(el.has_server_peer(peer));
    assert_eq!(el.server_peer_count(SERVER), 1);
    assert!(el.peer_address(peer).is_some());

    client.write_all(b"hello").unwrap();
    pump(&mut el, &mut p, |p| !p.received.is_empty());
    assert_eq!(p.received[0], (peer, b"hello".to_vec()));

    drop(client);
    pump(&mut el, &mut p, |p| !p.disconnected.is_empty());
    assert_eq!(p.disconnected, [peer]);

    el.run_once(0, &mut p);
    assert!(!el.has_server_peer(peer));
    assert_eq!(el.server_peer_count(SERVER), 0);
}

#[test]
fn concurrent_peers_get_distinct_ids() {
    let (mut el, port) = start(full_descriptor());
    let mut p = Peers::default();

    let _a = connect(port);
    let _b = connect(port);
    let _c = connect(port);
    pump(&mut el, &mut p, |p| p.accepted.len() == 3);

    let mut ids: Vec<_> = p.accepted.iter().map(|&(_, peer)| peer).collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 3);
}

#[test]
fn server_without_should_accept_always_accepts() {
    let (mut el, port) = start(ServerDescriptor::new(SERVER, 0).did_accept(accepted));
    let mut p = Peers::default();

    let _client = connect(port);
    pump(&mut el, &mut p, |p| p.accepted.len() == 1);
}

#[test]
fn rejected_connection_is_closed_without_did_accept() {
    let (mut el, port) = start(full_descriptor().should_accept(reject));
    let mut p = Peers::default();

    let mut client = connect(port);
    pump(&mut el, &mut p, |p| p.asked == 1);

    assert!(p.accepted.is_empty());
    assert_eq!(el.server_peer_count(SERVER), 0);
    assert!(closed_by_server(&mut client));

    // No disconnect callback either: there never was a peer.
    el.run_once(50, &mut p);
    assert!(p.disconnected.is_empty());
}

#[test]
fn removing_a_server_closes_its_peers_silently() {
    let (mut el, port) = start(full_descriptor());
    let mut p = Peers::default();

    let mut client = connect(port);
    pump(&mut el, &mut p, |p| p.accepted.len() == 1);
    let (_, peer) = p.accepted[0];

    el.remove_server(SERVER);
    assert!(!el.has_server_peer(peer));
    assert!(closed_by_server(&mut client));

    el.run_once(50, &mut p);
    assert!(p.disconnected.is_empty());
    assert!(!el.has_server(SERVER));
}

#[test]
fn server_removed_from_its_own_receive_callback() {
    let descriptor = ServerDescriptor::new(SERVER, 0)
        .did_accept(accepted)
        .did_receive_data(remove_own_server)
        .peer_did_disconnect(disconnected);
    let (mut el, port) = start(descriptor);
    let mut p = Peers::default();

    let mut client = connect(port);
    pump(&mut el, &mut p, |p| p.accepted.len() == 1);
    client.write_all(b"bye").unwrap();
    pump(&mut el, &mut p, |p| p.received.len() == 1);

    assert!(!el.has_server(SERVER));
    el.run_once(50, &mut p);
    assert!(p.disconnected.is_empty());
}
