//! Candidate ranking: which junctions a requester is approaching, nearest first.

use crate::geometry::LaneResolver;
use crate::network::{Junction, JunctionId};
use crate::vehicle::Requester;

/// A junction a requester is approaching, valid for one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    /// Junction being approached.
    pub junction: JunctionId,
    /// Distance from the requester to the junction centre.
    pub distance: f64,
    /// Controlled link index the requester will use.
    pub approach: usize,
}

/// Ranks every junction the requester is approaching, ascending by distance.
///
/// The sort is stable: equal distances keep the junction enumeration order.
#[must_use]
pub fn rank(resolver: &LaneResolver, requester: &Requester, junctions: &[Junction]) -> Vec<Candidate> {
    let mut out: Vec<Candidate> = junctions
        .iter()
        .filter_map(|junction| {
            resolver
                .resolve_with_distance(requester, junction)
                .map(|(approach, distance)| Candidate {
                    junction: junction.id.clone(),
                    distance,
                    approach,
                })
        })
        .collect();

    out.sort_by(|a, b| a.distance.total_cmp(&b.distance));
    out
}
