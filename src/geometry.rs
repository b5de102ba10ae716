//! Detection geometry and approach (lane) resolution.

use crate::network::Junction;
use crate::vehicle::Requester;

/// Default detection radius in simulation distance units.
pub const DEFAULT_DETECTION_RADIUS: f64 = 50.0;

/// Decides whether a requester is approaching a junction, and on which link.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LaneResolver {
    detection_radius: f64,
}

impl Default for LaneResolver {
    fn default() -> Self {
        Self::new(DEFAULT_DETECTION_RADIUS)
    }
}

impl LaneResolver {
    /// Creates a resolver with the given detection radius.
    #[must_use]
    pub const fn new(detection_radius: f64) -> Self {
        Self { detection_radius }
    }

    /// Detection radius in use.
    #[must_use]
    pub const fn detection_radius(&self) -> f64 {
        self.detection_radius
    }

    /// Returns true if `distance` lies within the detection zone (inclusive).
    #[must_use]
    pub fn in_range(&self, distance: f64) -> bool {
        distance <= self.detection_radius
    }

    /// Resolves the approach link index together with the distance to the junction.
    ///
    /// Links are scanned in collaborator order; the first link whose source is
    /// the requester's current segment or the next segment of its route wins.
    #[must_use]
    pub fn resolve_with_distance(&self, requester: &Requester, junction: &Junction) -> Option<(usize, f64)> {
        if requester.is_inside_junction() {
            return None;
        }

        let distance = requester.position.distance_to(&junction.position);
        if !self.in_range(distance) {
            return None;
        }

        let next = requester.next_segment();
        junction
            .links
            .iter()
            .position(|link| link.source == requester.segment || next.is_some_and(|n| link.source == *n))
            .map(|index| (index, distance))
    }

    /// Resolves the approach link index a requester is using at a junction.
    #[must_use]
    pub fn resolve(&self, requester: &Requester, junction: &Junction) -> Option<usize> {
        self.resolve_with_distance(requester, junction).map(|(index, _)| index)
    }
}
