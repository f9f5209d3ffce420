// Trigger sources and consumers.

use crate::node::{AudioNode, NodeDescription, NodeIo, TickContext};
use crate::plug::PlugType;
use crate::registry::{NodeTypeRegistration, NodeTypeRegistry};

pub(crate) fn register_trigger_nodes(registry: &mut NodeTypeRegistry) {
    registry.register(
        NodeTypeRegistration::new("trigger.timer", || Box::new(IntervalTimer::new()))
            .display_name("Interval Timer")
            .input_default("interval", PlugType::Float, "1")
            .input("reset", PlugType::Trigger)
            .output("fire", PlugType::Trigger),
    );
    registry.register(
        NodeTypeRegistration::new("trigger.counter", || Box::new(TriggerCounter::new()))
            .display_name("Counter")
            .input("increment", PlugType::Trigger)
            .input("reset", PlugType::Trigger)
            .input_default("max", PlugType::Int, "0")
            .output("count", PlugType::Int)
            .output("wrapped", PlugType::Trigger),
    );
    registry.register(
        NodeTypeRegistration::new("trigger.event", || Box::new(EventBridge))
            .display_name("Event Bridge")
            .input("event", PlugType::String)
            .output("fire", PlugType::Trigger),
    );
}

// ═══════════════════════════════════════════════════════════════════
// Interval Timer
// ═══════════════════════════════════════════════════════════════════

/// Fires its trigger output every `interval` seconds of graph time. Fires
/// at most once per tick; the remainder carries over, so long-run timing
/// doesn't drift with the block size.
pub struct IntervalTimer {
    elapsed: f32,
}

impl IntervalTimer {
    pub fn new() -> Self {
        Self { elapsed: 0.0 }
    }
}

impl Default for IntervalTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioNode for IntervalTimer {
    fn handle_trigger(
        &mut self,
        _ctx: &mut TickContext<'_>,
        _io: &mut NodeIo<'_>,
        _input_socket: usize,
    ) {
        // reset input
        self.elapsed = 0.0;
    }

    fn tick(&mut self, ctx: &mut TickContext<'_>, io: &mut NodeIo<'_>, dt: f32) {
        if ctx.is_passthrough {
            return;
        }
        let interval = io.input_float(0, 1.0);
        if interval <= 0.0 {
            return;
        }

        self.elapsed += dt;
        if self.elapsed >= interval {
            self.elapsed %= interval;
            ctx.fire_trigger(0);
        }
    }

    fn describe(&self, d: &mut NodeDescription) {
        d.add(format!("elapsed: {:.3}s", self.elapsed));
    }
}

// ═══════════════════════════════════════════════════════════════════
// Counter
// ═══════════════════════════════════════════════════════════════════

/// Counts incoming triggers; wraps to zero at `max` (0 = unbounded) and
/// fires its "wrapped" output on the wrap.
pub struct TriggerCounter {
    count: i32,
}

impl TriggerCounter {
    pub fn new() -> Self {
        Self { count: 0 }
    }
}

impl Default for TriggerCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioNode for TriggerCounter {
    fn handle_trigger(
        &mut self,
        ctx: &mut TickContext<'_>,
        io: &mut NodeIo<'_>,
        input_socket: usize,
    ) {
        match input_socket {
            0 => {
                self.count += 1;
                let max = io.input_int(2, 0);
                if max > 0 && self.count >= max {
                    self.count = 0;
                    ctx.fire_trigger(1);
                }
            }
            1 => self.count = 0,
            _ => {}
        }
    }

    fn tick(&mut self, _ctx: &mut TickContext<'_>, io: &mut NodeIo<'_>, _dt: f32) {
        io.set_output_int(0, self.count);
    }

    fn describe(&self, d: &mut NodeDescription) {
        d.add(format!("count: {}", self.count));
    }
}

// ═══════════════════════════════════════════════════════════════════
// Event Bridge (graph events -> trigger)
// ═══════════════════════════════════════════════════════════════════

/// Fires once per tick in which the named graph event was active.
pub struct EventBridge;

impl AudioNode for EventBridge {
    fn tick(&mut self, ctx: &mut TickContext<'_>, io: &mut NodeIo<'_>, _dt: f32) {
        let name = io.input_string(0, "");
        if name.is_empty() {
            return;
        }
        if ctx.events().iter().any(|e| e == name) {
            ctx.fire_trigger(0);
        }
    }
}
