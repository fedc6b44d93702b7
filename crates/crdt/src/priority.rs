//! Priority computation shared by every register kind (spec §4.3
//! "Priority"): `max(parent_priorities) + 1` for a local write, or taken
//! verbatim off the incoming delta for a remote one.

/// Priority for a new local delta given the priorities of the field heads
/// it supersedes. A field with no heads yet (the first write) gets `1`.
#[must_use]
pub fn next_priority(parent_priorities: &[u64]) -> u64 {
    1 + parent_priorities.iter().copied().max().unwrap_or(0)
}
