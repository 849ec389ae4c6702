//! The recording tracker.
//!
//! Stands in for the runtime tracker type: each contract member the
//! evaluator dispatches to appends a [`TraceEvent`]. Activations are numbered
//! from 1 in entry order, and so are state-machine instance ids.

use std::fmt;

use ordered_float::OrderedFloat;
use statetrace_core::{StoreFamily, TrackerMember};

/// A logged value, in the shape of the overload that received it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TraceValue {
    Bool(bool),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(OrderedFloat<f32>),
    F64(OrderedFloat<f64>),
    Decimal { mantissa: i128, scale: u8 },
    String(Option<String>),
    /// Rendering of the referenced object; `None` for null.
    Object(Option<String>),
    Pointer { is_null: bool },
    /// Little-endian bytes of an unmanaged value.
    Unmanaged(Vec<u8>),
}

impl fmt::Display for TraceValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceValue::Bool(v) => write!(f, "{v}"),
            TraceValue::U8(v) => write!(f, "{v}"),
            TraceValue::U16(v) => write!(f, "{v}"),
            TraceValue::U32(v) => write!(f, "{v}"),
            TraceValue::U64(v) => write!(f, "{v}"),
            TraceValue::F32(v) => write!(f, "{v}"),
            TraceValue::F64(v) => write!(f, "{v}"),
            TraceValue::Decimal { mantissa, scale } => write!(f, "{mantissa}e-{scale}"),
            TraceValue::String(Some(s)) => write!(f, "{s:?}"),
            TraceValue::Object(Some(s)) => write!(f, "{{{s}}}"),
            TraceValue::String(None) | TraceValue::Object(None) => f.write_str("null"),
            TraceValue::Pointer { is_null } => {
                f.write_str(if *is_null { "null" } else { "ptr" })
            }
            TraceValue::Unmanaged(bytes) => {
                f.write_str("[")?;
                for (i, byte) in bytes.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{byte:02x}")?;
                }
                f.write_str("]")
            }
        }
    }
}

/// One call the tracker received.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TraceEvent {
    Entered {
        activation: u64,
        method: u32,
        lambda: Option<u32>,
        instance: Option<u64>,
    },
    Store {
        activation: u64,
        family: StoreFamily,
        index: u32,
        value: TraceValue,
    },
    Alias {
        activation: u64,
        member: TrackerMember,
        source: u32,
        target: u32,
    },
    Returned {
        activation: u64,
    },
}

impl TraceEvent {
    pub fn activation(&self) -> u64 {
        match self {
            TraceEvent::Entered { activation, .. }
            | TraceEvent::Store { activation, .. }
            | TraceEvent::Alias { activation, .. }
            | TraceEvent::Returned { activation } => *activation,
        }
    }
}

impl fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceEvent::Entered {
                activation,
                method,
                lambda,
                instance,
            } => {
                write!(f, "#{activation} enter {method}")?;
                if let Some(lambda) = lambda {
                    write!(f, ".{lambda}")?;
                }
                if let Some(instance) = instance {
                    write!(f, " @{instance}")?;
                }
                Ok(())
            }
            TraceEvent::Store {
                activation,
                family,
                index,
                value,
            } => {
                let family = match family {
                    StoreFamily::Local => "local",
                    StoreFamily::Parameter => "param",
                };
                write!(f, "#{activation} {family}[{index}] = {value}")
            }
            TraceEvent::Alias {
                activation,
                member,
                source,
                target,
            } => write!(f, "#{activation} {member}({source}, {target})"),
            TraceEvent::Returned { activation } => write!(f, "#{activation} return"),
        }
    }
}

/// Records every tracker call in order.
#[derive(Debug, Default)]
pub struct RecordingTracker {
    events: Vec<TraceEvent>,
    activations: u64,
    instance_ids: u64,
}

impl RecordingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start an activation and return its handle.
    pub fn enter(&mut self, method: u32, lambda: Option<u32>, instance: Option<u64>) -> u64 {
        self.activations += 1;
        let activation = self.activations;
        tracing::trace!(activation, method, ?lambda, ?instance, "enter");
        self.events.push(TraceEvent::Entered {
            activation,
            method,
            lambda,
            instance,
        });
        activation
    }

    pub fn new_instance_id(&mut self) -> u64 {
        self.instance_ids += 1;
        self.instance_ids
    }

    pub fn store(&mut self, activation: u64, family: StoreFamily, index: u32, value: TraceValue) {
        tracing::trace!(activation, ?family, index, %value, "store");
        self.events.push(TraceEvent::Store {
            activation,
            family,
            index,
            value,
        });
    }

    pub fn alias(&mut self, activation: u64, member: TrackerMember, source: u32, target: u32) {
        self.events.push(TraceEvent::Alias {
            activation,
            member,
            source,
            target,
        });
    }

    pub fn returned(&mut self, activation: u64) {
        tracing::trace!(activation, "return");
        self.events.push(TraceEvent::Returned { activation });
    }

    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    /// Take the recorded events, leaving the counters as they are.
    pub fn take_events(&mut self) -> Vec<TraceEvent> {
        std::mem::take(&mut self.events)
    }
}
