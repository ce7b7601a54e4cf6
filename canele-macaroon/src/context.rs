//! Verification contexts: the constraint state a proof search accumulates
//!
//! A context holds two families of structural constraints, both keyed by a
//! caller-chosen UUID string: memberships (sets that may only shrink) and
//! ranges (intervals that may only intersect). Narrowing is monotone; an
//! attempt to widen an established constraint is reported as a recoverable
//! conflict, which the verifier answers by backtracking.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use canele_core::MacaroonError;

/// Accumulated structural constraints observed so far in a proof search
///
/// Contexts compare structurally over the two constraint maps and clone
/// deeply, so every branch of a verification can carry its own copy.
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash)]
pub struct VerificationContext {
    memberships: BTreeMap<String, BTreeSet<String>>,
    ranges: BTreeMap<String, (i64, i64)>,
}

impl VerificationContext {
    /// Create an empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Narrow the membership constraint under `uuid` to `members`
    ///
    /// The first call for a UUID establishes the set. Every later call must
    /// present a subset of what is already established; the presented set
    /// becomes the new constraint.
    ///
    /// # Errors
    /// `MembershipNotSubset` if `members` contains an element the established
    /// set does not permit. The context is left unchanged in that case.
    pub fn add_membership(
        &mut self,
        uuid: &str,
        members: BTreeSet<String>,
    ) -> Result<(), MacaroonError> {
        if let Some(existing) = self.memberships.get(uuid) {
            if !members.is_subset(existing) {
                return Err(MacaroonError::MembershipNotSubset {
                    uuid: uuid.to_string(),
                });
            }
        }
        self.memberships.insert(uuid.to_string(), members);
        Ok(())
    }

    /// Narrow the range constraint under `uuid` to `[lower, upper]`
    ///
    /// The first call for a UUID establishes the range; later calls replace
    /// it with the intersection.
    ///
    /// # Errors
    /// `InvalidRangeBounds` if `lower > upper`; `DisjointRanges` if the new
    /// range does not overlap the established one. The context is left
    /// unchanged in either case.
    pub fn add_range(&mut self, uuid: &str, lower: i64, upper: i64) -> Result<(), MacaroonError> {
        if lower > upper {
            return Err(MacaroonError::InvalidRangeBounds { lower, upper });
        }
        let narrowed = match self.ranges.get(uuid) {
            None => (lower, upper),
            Some(&(established_lower, established_upper)) => {
                if lower > established_upper || upper < established_lower {
                    return Err(MacaroonError::DisjointRanges {
                        uuid: uuid.to_string(),
                    });
                }
                (lower.max(established_lower), upper.min(established_upper))
            }
        };
        self.ranges.insert(uuid.to_string(), narrowed);
        Ok(())
    }

    /// Drop the membership constraint under `uuid`, returning it if present
    pub fn remove_membership(&mut self, uuid: &str) -> Option<BTreeSet<String>> {
        self.memberships.remove(uuid)
    }

    /// Drop the range constraint under `uuid`, returning it if present
    pub fn remove_range(&mut self, uuid: &str) -> Option<(i64, i64)> {
        self.ranges.remove(uuid)
    }

    /// The membership constraint under `uuid`, if established
    pub fn membership(&self, uuid: &str) -> Option<&BTreeSet<String>> {
        self.memberships.get(uuid)
    }

    /// The range constraint under `uuid`, if established
    pub fn range(&self, uuid: &str) -> Option<(i64, i64)> {
        self.ranges.get(uuid).copied()
    }

    /// A copy of all membership constraints
    pub fn copy_of_memberships(&self) -> BTreeMap<String, BTreeSet<String>> {
        self.memberships.clone()
    }

    /// A copy of all range constraints
    pub fn copy_of_ranges(&self) -> BTreeMap<String, (i64, i64)> {
        self.ranges.clone()
    }

    /// The UUIDs with an established membership constraint
    pub fn membership_uuids(&self) -> BTreeSet<String> {
        self.memberships.keys().cloned().collect()
    }

    /// The UUIDs with an established range constraint
    pub fn range_uuids(&self) -> BTreeSet<String> {
        self.ranges.keys().cloned().collect()
    }
}

impl fmt::Display for VerificationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VerificationContext{{")?;
        let mut first = true;
        for (uuid, (lower, upper)) in &self.ranges {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{uuid} ∈ [{lower}, {upper}]")?;
            first = false;
        }
        for (uuid, members) in &self.memberships {
            if !first {
                write!(f, ", ")?;
            }
            let joined = members.iter().cloned().collect::<Vec<_>>().join(", ");
            write!(f, "{uuid} ∈ [{joined}]")?;
            first = false;
        }
        write!(f, "}}")
    }
}
