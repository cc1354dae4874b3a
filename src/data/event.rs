use serde::{Deserialize, Serialize};

/// Class of an event, decided by the tree it was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventClass {
    Signal,
    Background,
}

impl EventClass {
    pub const ALL: [EventClass; 2] = [EventClass::Signal, EventClass::Background];

    /// Output unit of the classifier for this class.
    pub fn index(self) -> usize {
        match self {
            EventClass::Signal => 0,
            EventClass::Background => 1,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            EventClass::Signal => "signal",
            EventClass::Background => "background",
        }
    }
}

/// One flattened image together with its class and weight.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageEvent {
    pub image: Vec<f32>,
    pub class: EventClass,
    pub weight: f32,
}
