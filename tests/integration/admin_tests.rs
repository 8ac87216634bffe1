//! Admin control channel over a real loopback connection.

use std::io::Write;
use std::net::TcpStream;
use std::thread;
use std::time::{Duration, Instant};

use woodpeckers::admin::{self, ADMIN_SERVER_ID};
use woodpeckers::{Controller, ControllerLoop, StateId};

fn admin_loop() -> (ControllerLoop, u16) {
    let mut el = ControllerLoop::new().unwrap();
    admin::install(&mut el, 0).unwrap();
    let port = el.local_port(ADMIN_SERVER_ID).unwrap();
    (el, port)
}

fn send_from_thread(port: u16, script: &'static [u8]) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
        stream.write_all(script).unwrap();
        // Hold the connection open until the loop has had a chance to read.
        thread::sleep(Duration::from_millis(200));
    })
}

#[test]
fn stop_command_ends_a_running_controller() {
    let (mut el, port) = admin_loop();
    let mut ctrl = Controller::with_seed(5);
    ctrl.add_memory_output("beak").unwrap();
    ctrl.add_bird("woody", &[], &[], &["beak"]).unwrap();

    let client = send_from_thread(port, b"status\nbogus\nSTOP\n");

    let start = Instant::now();
    ctrl.run(&mut el);
    client.join().unwrap();

    assert!(start.elapsed() < Duration::from_secs(5));
    assert!(!el.is_running());
    assert_ne!(ctrl.state(), StateId::Initial);
}

#[test]
fn quit_is_an_alias_for_stop() {
    let (mut el, port) = admin_loop();
    let mut ctrl = Controller::with_seed(6);

    let client = send_from_thread(port, b"  quit  \n");
    el.run(&mut ctrl);
    client.join().unwrap();
    assert!(!el.is_running());
}

#[test]
fn unknown_commands_do_not_stop_the_loop() {
    let (mut el, port) = admin_loop();
    let mut ctrl = Controller::with_seed(7);
    let stop = el.stop_handle();

    let client = send_from_thread(port, b"status\nreboot\n");
    let stopper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(400));
        stop.stop();
    });

    let start = Instant::now();
    el.run(&mut ctrl);
    client.join().unwrap();
    stopper.join().unwrap();

    // Only the external stop ended the run.
    assert!(start.elapsed() >= Duration::from_millis(350));
    assert!(el.has_server(ADMIN_SERVER_ID));
}

#[test]
fn command_split_across_reads_is_reassembled() {
    let (mut el, port) = admin_loop();
    let mut ctrl = Controller::with_seed(8);
    let stop = el.stop_handle();

    let client = thread::spawn(move || {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
        stream.set_nodelay(true).unwrap();
        stream.write_all(b"st").unwrap();
        thread::sleep(Duration::from_millis(200));
        stream.write_all(b"op\n").unwrap();
        thread::sleep(Duration::from_millis(200));
    });
    // Fallback so a missed command fails the test instead of hanging it.
    let fallback = thread::spawn(move || {
        thread::sleep(Duration::from_millis(3000));
        stop.stop();
    });

    let start = Instant::now();
    el.run(&mut ctrl);
    let elapsed = start.elapsed();
    client.join().unwrap();

    assert!(elapsed >= Duration::from_millis(150), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(2000), "{elapsed:?}");
    fallback.join().unwrap();
}

#[test]
fn unterminated_command_is_not_acted_on() {
    let (mut el, port) = admin_loop();
    let mut ctrl = Controller::with_seed(9);
    let stop = el.stop_handle();

    let client = send_from_thread(port, b"stop");
    let stopper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(400));
        stop.stop();
    });

    let start = Instant::now();
    el.run(&mut ctrl);
    client.join().unwrap();
    stopper.join().unwrap();

    assert!(start.elapsed() >= Duration::from_millis(350));
}
