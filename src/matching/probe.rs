//! Probe order for reciprocal-compatibility searches
//!
//! A requester may only pair with someone whose gender satisfies the
//! requester's preference and whose own preference the requester satisfies.
//! The table below lists the queues that can hold such partners, most
//! specific first.

use crate::types::{Gender, Intent, Preference};

/// Queues to search for a partner of `requester`, in order. Targets that the
/// skip rule excludes are omitted and duplicates appear once.
pub fn probe_targets(requester: Intent) -> Vec<Intent> {
    let seeking_me = requester.gender.as_preference();

    let candidates = match requester.preference.as_gender() {
        Some(wanted) => vec![
            Intent::new(wanted, seeking_me),
            Intent::new(wanted, Preference::Any),
        ],
        None => vec![
            Intent::new(Gender::Female, Preference::Any),
            Intent::new(Gender::Male, Preference::Any),
            Intent::new(Gender::Female, seeking_me),
            Intent::new(Gender::Male, seeking_me),
        ],
    };

    let mut targets: Vec<Intent> = Vec::with_capacity(candidates.len());
    for target in candidates {
        if is_probed(target) && !targets.contains(&target) {
            targets.push(target);
        }
    }
    targets
}

/// Other-gender queues are only searched when they accept anyone
pub fn is_probed(target: Intent) -> bool {
    target.gender != Gender::Other || target.preference == Preference::Any
}
