//! State table, enter/exit actions and timer handlers.
//!
//! Each timed state arms its timer on entry and removes it on exit, so a
//! transition always leaves exactly one Controller timer registered.
//!
//! ```text
//!  state     on_enter                          timer (id)         on_exit
//!  ───────   ───────────────────────────────   ────────────────   ────────────
//!  Initial   all outputs low                   -                  -
//!  Startup   reset sweep                       STARTUP_WAIT (1)   remove (1)
//!  Waiting   pick dwell in [minWait, maxWait)  dwell (2)          remove (2)
//!  Pecking   pick count in [minPecks,maxPecks) peckWait (3)       remove (3)
//! ```

use log::{debug, error, info};

use super::random::random_in_range;
use super::{
    Controller, ControllerLoop, PECKING_TIMER, STARTUP_TIMER, STARTUP_WAIT_MS, StateDescriptor,
    StateId, Sweep, WAITING_TIMER,
};
use crate::event_loop::EventId;

// ═══════════════════════════════════════════════════════════════════════════
//  Table builder
// ═══════════════════════════════════════════════════════════════════════════

pub fn build_state_table() -> [StateDescriptor; StateId::COUNT] {
    [
        StateDescriptor {
            id: StateId::Initial,
            on_enter: Some(initial_enter),
            on_exit: None,
        },
        StateDescriptor {
            id: StateId::Startup,
            on_enter: Some(startup_enter),
            on_exit: Some(startup_exit),
        },
        StateDescriptor {
            id: StateId::Waiting,
            on_enter: Some(waiting_enter),
            on_exit: Some(waiting_exit),
        },
        StateDescriptor {
            id: StateId::Pecking,
            on_enter: Some(pecking_enter),
            on_exit: Some(pecking_exit),
        },
    ]
}

/// Arm the timer that drives `state`.  On failure the sequencer stalls in
/// that state.
fn arm(
    event_loop: &mut ControllerLoop,
    state: StateId,
    id: EventId,
    period_ms: u32,
    handler: fn(&mut ControllerLoop, &mut Controller, EventId),
) -> bool {
    match event_loop.add_timer(id, period_ms, Some(handler)) {
        Ok(()) => true,
        Err(e) => {
            error!("Controller: {state} could not arm timer {id} ({period_ms} ms), sequencer stalled: {e}");
            false
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  INITIAL
// ═══════════════════════════════════════════════════════════════════════════

fn initial_enter(ctrl: &mut Controller, _: &mut ControllerLoop) {
    ctrl.set_all_outputs(false);
}

// ═══════════════════════════════════════════════════════════════════════════
//  STARTUP: pulse every output once, in order
// ═══════════════════════════════════════════════════════════════════════════

fn startup_enter(ctrl: &mut Controller, event_loop: &mut ControllerLoop) {
    ctrl.sweep = Sweep::default();
    arm(event_loop, StateId::Startup, STARTUP_TIMER, STARTUP_WAIT_MS, startup_fired);
}

fn startup_exit(_: &mut Controller, event_loop: &mut ControllerLoop) {
    event_loop.remove_timer(STARTUP_TIMER);
}

fn startup_fired(event_loop: &mut ControllerLoop, ctrl: &mut Controller, _: EventId) {
    let Sweep { index, pulse } = ctrl.sweep;

    if index < ctrl.outputs.len() {
        let pulse = !pulse;
        ctrl.set_output(index, pulse);
        ctrl.sweep = Sweep {
            index: if pulse { index } else { index + 1 },
            pulse,
        };
        debug!(
            "Controller: startup pulse {} on '{}'",
            pulse,
            ctrl.outputs[index].name()
        );
        if pulse || index + 1 < ctrl.outputs.len() {
            return;
        }
    }

    rest_pose(ctrl);
    ctrl.change_state(event_loop, StateId::Waiting);
}

/// Statics and backs high, forwards low, for every bird.
fn rest_pose(ctrl: &mut Controller) {
    let Controller { birds, outputs, .. } = ctrl;
    for bird in birds.iter() {
        for &i in bird.statics().iter().chain(bird.backs()) {
            outputs[i].set_value(true);
        }
        for &i in bird.forwards() {
            outputs[i].set_value(false);
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  WAITING: randomized dwell
// ═══════════════════════════════════════════════════════════════════════════

fn waiting_enter(ctrl: &mut Controller, event_loop: &mut ControllerLoop) {
    let timing = ctrl.timing;
    let dwell = random_in_range(&mut ctrl.rng, timing.min_wait, timing.max_wait);
    info!("Controller: waiting {dwell} ms");
    arm(event_loop, StateId::Waiting, WAITING_TIMER, dwell, waiting_fired);
}

fn waiting_exit(_: &mut Controller, event_loop: &mut ControllerLoop) {
    event_loop.remove_timer(WAITING_TIMER);
}

fn waiting_fired(event_loop: &mut ControllerLoop, ctrl: &mut Controller, _: EventId) {
    ctrl.change_state(event_loop, StateId::Pecking);
}

// ═══════════════════════════════════════════════════════════════════════════
//  PECKING: alternate the current bird, then hand over to the next
// ═══════════════════════════════════════════════════════════════════════════

fn pecking_enter(ctrl: &mut Controller, event_loop: &mut ControllerLoop) {
    let timing = ctrl.timing;
    ctrl.pecks_remaining = random_in_range(&mut ctrl.rng, timing.min_pecks, timing.max_pecks);
    ctrl.peck_polarity = false;

    match ctrl.birds.get(ctrl.current_bird) {
        Some(bird) => info!(
            "Controller: '{}' pecking {} times",
            bird.name(),
            ctrl.pecks_remaining
        ),
        None => info!("Controller: no birds to peck"),
    }

    arm(event_loop, StateId::Pecking, PECKING_TIMER, timing.peck_wait, pecking_fired);
}

fn pecking_exit(_: &mut Controller, event_loop: &mut ControllerLoop) {
    event_loop.remove_timer(PECKING_TIMER);
}

fn pecking_fired(event_loop: &mut ControllerLoop, ctrl: &mut Controller, _: EventId) {
    if ctrl.birds.is_empty() {
        ctrl.change_state(event_loop, StateId::Waiting);
        return;
    }

    let polarity = !ctrl.peck_polarity;
    ctrl.peck_polarity = polarity;

    {
        let Controller {
            birds,
            outputs,
            current_bird,
            ..
        } = &mut *ctrl;
        let bird = &birds[*current_bird];
        for &i in bird.backs() {
            outputs[i].set_value(!polarity);
        }
        for &i in bird.forwards() {
            outputs[i].set_value(polarity);
        }
    }

    // One peck completes on each return to rest.
    if polarity {
        return;
    }
    ctrl.pecks_remaining = ctrl.pecks_remaining.saturating_sub(1);
    if ctrl.pecks_remaining > 0 {
        return;
    }

    ctrl.current_bird = (ctrl.current_bird + 1) % ctrl.birds.len();
    ctrl.change_state(event_loop, StateId::Waiting);
}
