//! Road-network types: segments, junctions and their controlled links.
//!
//! Junctions are the contended resource. A `Junction` value is a per-tick view
//! assembled from collaborator queries; it is never cached across ticks.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::signal::SignalState;

/// Planar position in simulation distance units.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    /// X coordinate.
    pub x: f64,
    /// Y coordinate.
    pub y: f64,
}

impl Position {
    /// Creates a position.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another position.
    #[must_use]
    pub fn distance_to(&self, other: &Self) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    /// Linear interpolation towards `other`; `t` is clamped to `[0, 1]`.
    #[must_use]
    pub fn lerp(&self, other: &Self, t: f64) -> Self {
        let t = t.clamp(0.0, 1.0);
        Self {
            x: self.x + (other.x - self.x) * t,
            y: self.y + (other.y - self.y) * t,
        }
    }
}

/// Identifier of a road segment (an edge in the network).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SegmentId(String);

impl SegmentId {
    /// Prefix the simulation uses for segments inside a junction.
    pub const INTERNAL_PREFIX: char = ':';

    /// Creates a segment id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true for intra-junction segments.
    #[must_use]
    pub fn is_internal(&self) -> bool {
        self.0.starts_with(Self::INTERNAL_PREFIX)
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SegmentId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for SegmentId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Identifier of a signal-controlled junction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JunctionId(String);

impl JunctionId {
    /// Creates a junction id.
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

impl fmt::Display for JunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JunctionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for JunctionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// One directional movement through a junction that the signal grants or denies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlledLink {
    /// Segment the movement enters the junction from.
    pub source: SegmentId,
    /// Segment the movement leaves the junction on.
    pub target: SegmentId,
    /// Movement never conflicts with a protected approach and may share its green.
    #[serde(default)]
    pub compatible: bool,
}

impl ControlledLink {
    /// Creates a link that conflicts with other approaches.
    #[must_use]
    pub fn new(source: impl Into<SegmentId>, target: impl Into<SegmentId>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            compatible: false,
        }
    }

    /// Creates a link that is compatible with any override green.
    #[must_use]
    pub fn compatible(source: impl Into<SegmentId>, target: impl Into<SegmentId>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            compatible: true,
        }
    }
}

/// Per-tick view of a junction.
#[derive(Debug, Clone, PartialEq)]
pub struct Junction {
    /// Junction id.
    pub id: JunctionId,
    /// Junction centre.
    pub position: Position,
    /// Controlled links in collaborator order. The order is significant.
    pub links: Vec<ControlledLink>,
    /// Current signal state, one colour per controlled link.
    pub state: SignalState,
}

impl Junction {
    /// Number of controlled links.
    #[must_use]
    pub fn link_count(&self) -> usize {
        self.links.len()
    }
}
