//! Requesters: vehicles competing for right-of-way.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::network::{Position, SegmentId};

/// Identifier of a vehicle in the simulation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VehicleId(String);

impl VehicleId {
    /// Creates a vehicle id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VehicleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VehicleId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for VehicleId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Vehicle type name as reported by the simulation (e.g. `veh_ambulance`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VehicleClass(String);

impl VehicleClass {
    /// Creates a class name.
    #[must_use]
    pub fn new(class: impl Into<String>) -> Self {
        Self(class.into())
    }

    /// Returns the class as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VehicleClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VehicleClass {
    fn from(class: &str) -> Self {
        Self(class.to_string())
    }
}

/// Snapshot of one vehicle, observed fresh each tick.
#[derive(Debug, Clone, PartialEq)]
pub struct Requester {
    /// Vehicle id.
    pub id: VehicleId,
    /// Vehicle type.
    pub class: VehicleClass,
    /// Current position.
    pub position: Position,
    /// Segment the vehicle is currently on.
    pub segment: SegmentId,
    /// Planned route.
    pub route: Vec<SegmentId>,
    /// Index of the current route leg.
    pub route_index: usize,
}

impl Requester {
    /// Segment after the current route leg, if any.
    #[must_use]
    pub fn next_segment(&self) -> Option<&SegmentId> {
        self.route.get(self.route_index.checked_add(1)?)
    }

    /// True when the vehicle is inside a junction.
    #[must_use]
    pub fn is_inside_junction(&self) -> bool {
        self.segment.is_internal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn requester(route: &[&str], index: usize) -> Requester {
        Requester {
            id: VehicleId::from("v"),
            class: VehicleClass::from("veh_ambulance"),
            position: Position::default(),
            segment: SegmentId::from(route[index.min(route.len() - 1)]),
            route: route.iter().map(|s| SegmentId::from(*s)).collect(),
            route_index: index,
        }
    }

    #[test]
    fn next_segment_follows_route() {
        let r = requester(&["a", "b", "c"], 0);
        assert_eq!(r.next_segment().map(SegmentId::as_str), Some("b"));
    }

    #[test]
    fn final_leg_has_no_next_segment() {
        let r = requester(&["a", "b"], 1);
        assert!(r.next_segment().is_none());
        let past_end = requester(&["a", "b"], 7);
        assert!(past_end.next_segment().is_none());
    }
}
