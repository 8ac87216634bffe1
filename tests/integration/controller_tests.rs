//! Controller driven by the real event loop.

use std::time::{Duration, Instant};

use woodpeckers::controller::{PECKING_TIMER, STARTUP_TIMER, WAITING_TIMER};
use woodpeckers::error::SetupError;
use woodpeckers::{Controller, ControllerLoop, StateId};

use crate::mock_output::{Journal, RecordingOutput, journal, writes_to};

fn scenario_controller(journal: &Journal) -> Controller {
    let mut ctrl = Controller::with_seed(42);
    ctrl.set_min_wait(1000);
    ctrl.set_max_wait(1000);
    ctrl.set_min_pecks(2);
    ctrl.set_max_pecks(2);
    ctrl.set_peck_wait(100);
    ctrl.add_output(Box::new(RecordingOutput::new("back", journal)))
        .unwrap();
    ctrl.add_output(Box::new(RecordingOutput::new("forward", journal)))
        .unwrap();
    ctrl.add_bird("woody", &[], &["back"], &["forward"]).unwrap();
    ctrl
}

/// Pass until the Controller reaches `state`, or panic after `limit`.
fn run_until(el: &mut ControllerLoop, ctrl: &mut Controller, state: StateId, limit: Duration) {
    let deadline = Instant::now() + limit;
    while ctrl.state() != state {
        assert!(
            Instant::now() < deadline,
            "stuck in {} waiting for {state}",
            ctrl.state()
        );
        el.run_once(100, ctrl);
    }
}

#[test]
fn start_enters_startup_with_everything_low() {
    let journal = journal();
    let mut ctrl = scenario_controller(&journal);
    let mut el = ControllerLoop::new().unwrap();

    ctrl.start(&mut el);

    assert_eq!(ctrl.state(), StateId::Startup);
    assert_eq!(writes_to(&journal, "back", 0), [false]);
    assert_eq!(writes_to(&journal, "forward", 0), [false]);
    assert!(el.has_timer(STARTUP_TIMER));
    assert!(!el.has_timer(WAITING_TIMER));
}

#[test]
fn startup_pulses_each_output_then_rests() {
    let journal = journal();
    let mut ctrl = scenario_controller(&journal);
    let mut el = ControllerLoop::new().unwrap();

    ctrl.start(&mut el);
    let from = journal.borrow().len();
    run_until(&mut el, &mut ctrl, StateId::Waiting, Duration::from_secs(3));

    // Sweep (true, false) per output, then the rest pose.
    assert_eq!(writes_to(&journal, "back", from), [true, false, true]);
    assert_eq!(writes_to(&journal, "forward", from), [true, false, false]);
    assert!(!el.has_timer(STARTUP_TIMER));
    assert!(el.has_timer(WAITING_TIMER));
}

#[test]
fn one_waiting_pecking_cycle_produces_four_peck_ticks() {
    let journal = journal();
    let mut ctrl = scenario_controller(&journal);
    let mut el = ControllerLoop::new().unwrap();

    ctrl.start(&mut el);
    run_until(&mut el, &mut ctrl, StateId::Waiting, Duration::from_secs(3));
    let baseline = (
        ctrl.output("back").unwrap().value(),
        ctrl.output("forward").unwrap().value(),
    );
    assert_eq!(baseline, (true, false));

    let from = journal.borrow().len();
    run_until(&mut el, &mut ctrl, StateId::Pecking, Duration::from_secs(3));
    assert!(el.has_timer(PECKING_TIMER));
    assert!(!el.has_timer(WAITING_TIMER));
    run_until(&mut el, &mut ctrl, StateId::Waiting, Duration::from_secs(3));

    let forward = writes_to(&journal, "forward", from);
    let back = writes_to(&journal, "back", from);
    assert_eq!(forward, [true, false, true, false]);
    assert_eq!(back, [false, true, false, true]);
    assert!(forward.iter().zip(&back).all(|(f, b)| f != b));

    assert_eq!(
        (
            ctrl.output("back").unwrap().value(),
            ctrl.output("forward").unwrap().value()
        ),
        baseline
    );
    assert!(!el.has_timer(PECKING_TIMER));
    assert!(el.has_timer(WAITING_TIMER));
}

#[test]
fn dwell_with_equal_bounds_is_exact() {
    let journal = journal();
    let mut ctrl = scenario_controller(&journal);
    ctrl.set_min_wait(300);
    ctrl.set_max_wait(300);
    let mut el = ControllerLoop::new().unwrap();

    ctrl.start(&mut el);
    run_until(&mut el, &mut ctrl, StateId::Waiting, Duration::from_secs(3));
    assert_eq!(el.timer_period(WAITING_TIMER), Some(300));

    let start = Instant::now();
    run_until(&mut el, &mut ctrl, StateId::Pecking, Duration::from_secs(3));
    assert!(start.elapsed() >= Duration::from_millis(250));
}

#[test]
fn two_birds_alternate() {
    let journal = journal();
    let mut ctrl = scenario_controller(&journal);
    ctrl.set_min_wait(10);
    ctrl.set_max_wait(10);
    ctrl.set_min_pecks(1);
    ctrl.set_max_pecks(1);
    ctrl.set_peck_wait(10);
    ctrl.add_output(Box::new(RecordingOutput::new("forward2", &journal)))
        .unwrap();
    ctrl.add_bird("pica", &[], &[], &["forward2"]).unwrap();
    let mut el = ControllerLoop::new().unwrap();

    ctrl.start(&mut el);
    run_until(&mut el, &mut ctrl, StateId::Waiting, Duration::from_secs(3));
    let from = journal.borrow().len();

    for expected in [1, 0] {
        run_until(&mut el, &mut ctrl, StateId::Pecking, Duration::from_secs(1));
        run_until(&mut el, &mut ctrl, StateId::Waiting, Duration::from_secs(1));
        assert_eq!(ctrl.current_bird(), expected);
    }

    assert_eq!(writes_to(&journal, "forward", from), [true, false]);
    assert_eq!(writes_to(&journal, "forward2", from), [true, false]);
}

#[test]
fn setup_validation_rejects_without_mutation() {
    let journal = journal();
    let mut ctrl = scenario_controller(&journal);

    let dup = ctrl.add_output(Box::new(RecordingOutput::new("back", &journal)));
    assert_eq!(dup, Err(SetupError::DuplicateOutput("back".into())));
    assert_eq!(ctrl.output_count(), 2);

    let dangling = ctrl.add_bird("ghost", &[], &["nope"], &[]);
    assert!(matches!(dangling, Err(SetupError::UnknownOutput { .. })));
    assert_eq!(ctrl.bird_count(), 1);
}
