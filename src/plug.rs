// src/plug.rs
//
// Typed sockets. An output plug owns its backing value; an input plug stores
// non-owning (node id, socket index) references resolved through the graph's
// node arena at read time.
//
// Signal inputs allow fan-in: any number of producers, summed lazily at most
// once per traversal tick. All other types are single-producer.

use crate::error::GraphError;
use crate::graph_def::NodeId;
use crate::signal::{Signal, audio_buffer_add};

/// Socket value type tag. Connections require an exact match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlugType {
    Bool,
    Int,
    Float,
    String,
    Signal,
    Trigger,
}

impl PlugType {
    /// Type name as it appears in registry schemas and definition files.
    pub fn name(self) -> &'static str {
        match self {
            PlugType::Bool => "bool",
            PlugType::Int => "int",
            PlugType::Float => "float",
            PlugType::String => "string",
            PlugType::Signal => "signal",
            PlugType::Trigger => "trigger",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "bool" => Some(PlugType::Bool),
            "int" => Some(PlugType::Int),
            "float" => Some(PlugType::Float),
            "string" => Some(PlugType::String),
            "signal" => Some(PlugType::Signal),
            "trigger" => Some(PlugType::Trigger),
            _ => None,
        }
    }
}

/// Owned socket storage. Output plugs and input literals hold one of these.
#[derive(Debug, Clone)]
pub enum PlugValue {
    Bool(bool),
    Int(i32),
    Float(f32),
    Str(String),
    Signal(Signal),
    Trigger,
}

impl PlugValue {
    pub fn new(plug_type: PlugType) -> Self {
        match plug_type {
            PlugType::Bool => PlugValue::Bool(false),
            PlugType::Int => PlugValue::Int(0),
            PlugType::Float => PlugValue::Float(0.0),
            PlugType::String => PlugValue::Str(String::new()),
            PlugType::Signal => PlugValue::Signal(Signal::new()),
            PlugType::Trigger => PlugValue::Trigger,
        }
    }

    pub fn plug_type(&self) -> PlugType {
        match self {
            PlugValue::Bool(_) => PlugType::Bool,
            PlugValue::Int(_) => PlugType::Int,
            PlugValue::Float(_) => PlugType::Float,
            PlugValue::Str(_) => PlugType::String,
            PlugValue::Signal(_) => PlugType::Signal,
            PlugValue::Trigger => PlugType::Trigger,
        }
    }

    /// Parse a literal string per the declared socket type.
    pub fn parse(plug_type: PlugType, value: &str) -> Result<Self, GraphError> {
        let err = || GraphError::LiteralParse {
            plug_type,
            value: value.to_owned(),
        };

        match plug_type {
            PlugType::Bool => match value {
                "true" | "1" => Ok(PlugValue::Bool(true)),
                "false" | "0" | "" => Ok(PlugValue::Bool(false)),
                _ => Err(err()),
            },
            PlugType::Int => value.parse().map(PlugValue::Int).map_err(|_| err()),
            PlugType::Float => value.parse().map(PlugValue::Float).map_err(|_| err()),
            PlugType::String => Ok(PlugValue::Str(value.to_owned())),
            PlugType::Signal => {
                let scalar: f32 = value.parse().map_err(|_| err())?;
                Ok(PlugValue::Signal(Signal::from_scalar(scalar)))
            }
            PlugType::Trigger => Err(err()),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PlugValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            PlugValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f32> {
        match self {
            PlugValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PlugValue::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_signal(&self) -> Option<&Signal> {
        match self {
            PlugValue::Signal(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_signal_mut(&mut self) -> Option<&mut Signal> {
        match self {
            PlugValue::Signal(v) => Some(v),
            _ => None,
        }
    }

    /// Editor-facing snapshot of the value as a string. Signals report their
    /// scalar (or block mean) rather than a full buffer.
    pub fn display_value(&self) -> String {
        match self {
            PlugValue::Bool(v) => v.to_string(),
            PlugValue::Int(v) => v.to_string(),
            PlugValue::Float(v) => v.to_string(),
            PlugValue::Str(v) => v.clone(),
            PlugValue::Signal(v) => v.mean().to_string(),
            PlugValue::Trigger => String::new(),
        }
    }
}

/// Reference to an output socket on some node, resolved through the graph
/// arena. Identity of a connection for by-identity removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlugRef {
    pub node: NodeId,
    pub socket: usize,
}

/// Fan-in state of a signal input: ordered producer list and the cached sum,
/// recomputed at most once per traversal tick.
#[derive(Debug, Default)]
pub struct FanIn {
    sources: Vec<PlugRef>,
    sum: Option<Box<Signal>>,
    last_update_tick: i64,
}

impl FanIn {
    fn new() -> Self {
        Self {
            sources: Vec::new(),
            sum: None,
            last_update_tick: -1,
        }
    }

    pub fn sources(&self) -> &[PlugRef] {
        &self.sources
    }

    fn push(&mut self, source: PlugRef) {
        self.sources.push(source);
        if self.sources.len() >= 2 && self.sum.is_none() {
            // allocate the accumulator on the edit path, not during the tick
            self.sum = Some(Box::new(Signal::new()));
        }
        self.last_update_tick = -1;
    }

    fn remove(&mut self, source: PlugRef) -> bool {
        let Some(pos) = self.sources.iter().position(|s| *s == source) else {
            return false;
        };

        // exactly one entry; duplicates each stand for one wire
        self.sources.remove(pos);
        if self.sources.len() < 2 {
            self.sum = None;
        }
        self.last_update_tick = -1;
        true
    }

    /// Recompute the cached sum if this traversal tick hasn't yet. `resolve`
    /// maps a producer reference to its current output signal; unresolvable
    /// producers contribute nothing.
    pub fn refresh<'g>(
        &mut self,
        traversal_id: i64,
        resolve: impl Fn(PlugRef) -> Option<&'g Signal>,
    ) {
        if self.sources.len() < 2 || self.last_update_tick == traversal_id {
            return;
        }
        self.last_update_tick = traversal_id;

        let sum = self.sum.get_or_insert_with(|| Box::new(Signal::new()));

        let mut all_scalar = true;
        let mut any_scalar = false;
        let mut scalar_sum = 0.0f32;

        for source in &self.sources {
            match resolve(*source) {
                Some(signal) if signal.is_scalar() => {
                    scalar_sum += signal.scalar();
                    any_scalar = true;
                }
                Some(_) => all_scalar = false,
                None => {}
            }
        }

        if all_scalar {
            sum.set_scalar(scalar_sum);
        } else if any_scalar {
            // pre-summed scalars broadcast once, vectors accumulated on top
            sum.set_scalar(scalar_sum);
            sum.expand();
            sum.set_vector();
            for source in &self.sources {
                if let Some(signal) = resolve(*source) {
                    if !signal.is_scalar() {
                        audio_buffer_add(sum.samples_mut(), signal.samples());
                    }
                }
            }
        } else {
            let mut first = true;
            for source in &self.sources {
                let Some(signal) = resolve(*source) else {
                    continue;
                };
                if first {
                    sum.set(signal);
                    first = false;
                } else {
                    sum.add(signal);
                }
            }
            if first {
                sum.set_zero();
            }
        }
    }

    /// The cached sum; only meaningful with two or more sources, after
    /// `refresh` for the current tick.
    pub fn sum(&self) -> Option<&Signal> {
        debug_assert!(self.sources.len() >= 2);
        self.sum.as_deref()
    }
}

/// One node input socket.
#[derive(Debug)]
pub struct InputPlug {
    plug_type: PlugType,
    /// Single producer (all non-signal types).
    conn: Option<PlugRef>,
    /// Owned immediate value, used while no producer is wired.
    literal: Option<PlugValue>,
    /// Fan-in producers (signal type only).
    pub fan_in: FanIn,
    /// One-shot mark consumed at the start of this node's next traversal.
    pub is_triggered: bool,
}

impl InputPlug {
    pub fn new(plug_type: PlugType) -> Self {
        Self {
            plug_type,
            conn: None,
            literal: None,
            fan_in: FanIn::new(),
            is_triggered: false,
        }
    }

    #[inline]
    pub fn plug_type(&self) -> PlugType {
        self.plug_type
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some() || !self.fan_in.sources().is_empty() || self.literal.is_some()
    }

    pub fn conn(&self) -> Option<PlugRef> {
        self.conn
    }

    pub fn literal(&self) -> Option<&PlugValue> {
        self.literal.as_ref()
    }

    /// Wire a producer into this input. Signal inputs accumulate fan-in;
    /// every other type takes a single producer and refuses a second one
    /// (explicit disconnect required, last-write-wins is not a policy here).
    pub fn connect_to(&mut self, source: PlugRef, source_type: PlugType) -> Result<(), GraphError> {
        if source_type != self.plug_type {
            return Err(GraphError::TypeMismatch {
                expected: self.plug_type,
                found: source_type,
            });
        }

        if self.plug_type == PlugType::Signal {
            self.fan_in.push(source);
        } else {
            if self.conn.is_some() {
                return Err(GraphError::AlreadyConnected);
            }
            self.conn = Some(source);
        }

        Ok(())
    }

    /// Remove one wire by identity. For signal inputs this removes exactly
    /// one matching fan-in entry; for other types it clears the producer if
    /// it matches.
    pub fn remove_connection(&mut self, source: PlugRef) -> Result<(), GraphError> {
        if self.plug_type == PlugType::Signal {
            if self.fan_in.remove(source) {
                return Ok(());
            }
            return Err(GraphError::NotConnected);
        }

        if self.conn == Some(source) {
            self.conn = None;
            Ok(())
        } else {
            Err(GraphError::NotConnected)
        }
    }

    /// Clear the single producer and the immediate literal. Fan-in entries
    /// are left alone; they are removed per-wire by `remove_connection`.
    pub fn disconnect(&mut self) {
        self.conn = None;
        self.literal = None;
    }

    /// Parse and install an immediate literal per the socket's type.
    pub fn set_literal(&mut self, value: &str) -> Result<(), GraphError> {
        self.literal = Some(PlugValue::parse(self.plug_type, value)?);
        Ok(())
    }

    pub fn clear_literal(&mut self) {
        self.literal = None;
    }

    /// Consume the one-shot trigger mark.
    pub fn take_trigger(&mut self) -> bool {
        std::mem::replace(&mut self.is_triggered, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_refuses_type_mismatch() {
        let mut input = InputPlug::new(PlugType::Float);
        let err = input
            .connect_to(PlugRef { node: 1, socket: 0 }, PlugType::Int)
            .unwrap_err();
        assert!(matches!(err, GraphError::TypeMismatch { .. }));
        assert!(!input.is_connected());
    }

    #[test]
    fn non_signal_input_is_single_producer() {
        let mut input = InputPlug::new(PlugType::Int);
        let a = PlugRef { node: 1, socket: 0 };
        let b = PlugRef { node: 2, socket: 0 };

        input.connect_to(a, PlugType::Int).unwrap();
        assert_eq!(
            input.connect_to(b, PlugType::Int),
            Err(GraphError::AlreadyConnected)
        );

        input.remove_connection(a).unwrap();
        input.connect_to(b, PlugType::Int).unwrap();
        assert_eq!(input.conn(), Some(b));
    }

    #[test]
    fn signal_input_accumulates_fan_in() {
        let mut input = InputPlug::new(PlugType::Signal);
        let a = PlugRef { node: 1, socket: 0 };
        let b = PlugRef { node: 2, socket: 0 };

        input.connect_to(a, PlugType::Signal).unwrap();
        input.connect_to(b, PlugType::Signal).unwrap();
        input.connect_to(a, PlugType::Signal).unwrap();
        assert_eq!(input.fan_in.sources(), &[a, b, a]);

        // removing by identity takes exactly one duplicate
        input.remove_connection(a).unwrap();
        assert_eq!(input.fan_in.sources(), &[b, a]);
    }

    #[test]
    fn fan_in_sums_mixed_scalars_and_vectors() {
        let scalar_a = Signal::from_scalar(2.0);
        let scalar_b = Signal::from_scalar(3.0);
        let mut vector = Signal::new();
        vector.set_vector();
        for (i, v) in vector.samples_mut().iter_mut().enumerate() {
            *v = i as f32;
        }

        let refs = [
            PlugRef { node: 0, socket: 0 },
            PlugRef { node: 1, socket: 0 },
            PlugRef { node: 2, socket: 0 },
        ];
        let signals = [&scalar_a, &scalar_b, &vector];

        let mut fan_in = FanIn::new();
        for r in refs {
            fan_in.push(r);
        }

        fan_in.refresh(1, |r| Some(signals[r.node as usize]));
        let sum = fan_in.sum().unwrap();
        assert!(!sum.is_scalar());
        assert_eq!(sum.samples()[0], 5.0);
        assert_eq!(sum.samples()[10], 15.0);
    }

    #[test]
    fn fan_in_all_scalar_sum_stays_scalar() {
        let a = Signal::from_scalar(5.0);
        let b = Signal::from_scalar(3.0);
        let signals = [&a, &b];

        let mut fan_in = FanIn::new();
        fan_in.push(PlugRef { node: 0, socket: 0 });
        fan_in.push(PlugRef { node: 1, socket: 0 });

        fan_in.refresh(7, |r| Some(signals[r.node as usize]));
        let sum = fan_in.sum().unwrap();
        assert!(sum.is_scalar());
        assert_eq!(sum.scalar(), 8.0);
    }

    #[test]
    fn fan_in_refresh_is_memoized_per_tick() {
        let a = Signal::from_scalar(1.0);
        let mut fan_in = FanIn::new();
        fan_in.push(PlugRef { node: 0, socket: 0 });
        fan_in.push(PlugRef { node: 0, socket: 0 });

        fan_in.refresh(1, |_| Some(&a));
        assert_eq!(fan_in.sum().unwrap().scalar(), 2.0);

        // same tick: cache hit, resolver not consulted, sum unchanged
        fan_in.refresh(1, |_| None);
        assert_eq!(fan_in.sum().unwrap().scalar(), 2.0);

        // next tick: recomputed against the new resolver
        fan_in.refresh(2, |_| None);
        assert_eq!(fan_in.sum().unwrap().scalar(), 0.0);
    }

    #[test]
    fn literal_parsing_follows_socket_type() {
        let mut f = InputPlug::new(PlugType::Float);
        f.set_literal("0.5").unwrap();
        assert_eq!(f.literal().unwrap().as_float(), Some(0.5));

        let mut b = InputPlug::new(PlugType::Bool);
        b.set_literal("true").unwrap();
        assert_eq!(b.literal().unwrap().as_bool(), Some(true));
        assert!(b.set_literal("maybe").is_err());

        let mut s = InputPlug::new(PlugType::Signal);
        s.set_literal("4.25").unwrap();
        assert_eq!(s.literal().unwrap().as_signal().unwrap().scalar(), 4.25);

        let mut t = InputPlug::new(PlugType::Trigger);
        assert!(t.set_literal("x").is_err());
    }

    #[test]
    fn disconnect_clears_producer_and_literal() {
        let mut input = InputPlug::new(PlugType::Float);
        input.set_literal("1.0").unwrap();
        input
            .connect_to(PlugRef { node: 3, socket: 1 }, PlugType::Float)
            .unwrap();
        assert!(input.is_connected());

        input.disconnect();
        assert!(!input.is_connected());
    }
}
