//! Desired vs. actual role membership.
//!
//! Every pass recomputes the diff from scratch, so applying it twice is
//! harmless: once the cache reflects a change, the next diff is empty.

use rolesync_client::AttributeFetch;
use rolesync_core::{ChangeKind, GroupId, MemberRecord, RoleChange, RoleId};

/// The change for one member, given whether its tag points at the group
/// and whether it currently holds the role.
#[must_use]
pub fn decide(should_have_role: bool, has_role: bool) -> Option<ChangeKind> {
    match (should_have_role, has_role) {
        (true, false) => Some(ChangeKind::Add),
        (false, true) => Some(ChangeKind::Remove),
        _ => None,
    }
}

/// Result of diffing one group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diff {
    pub changes: Vec<RoleChange>,
    /// Role holders left alone because the fetch was truncated before
    /// reaching their record.
    pub withheld: usize,
}

/// Diff the cached members of a group against the fetched attributes.
///
/// When `attributes` is incomplete, members without a fetched record are
/// skipped entirely: absence from a truncated fetch says nothing about
/// their tag.
#[must_use]
pub fn compute_changes(
    members: &[MemberRecord],
    group_id: &GroupId,
    role_id: &RoleId,
    attributes: &AttributeFetch,
) -> Diff {
    let mut diff = Diff::default();

    for member in members {
        let has_role = member.has_role(role_id);
        let record = attributes.get(&member.member_id);

        if record.is_none() && !attributes.complete {
            if has_role {
                diff.withheld += 1;
            }
            continue;
        }

        let should_have_role = record.is_some_and(|r| r.belongs_to(group_id));
        match decide(should_have_role, has_role) {
            Some(ChangeKind::Add) => diff.changes.push(RoleChange::add(member)),
            Some(ChangeKind::Remove) => diff.changes.push(RoleChange::remove(member)),
            None => {}
        }
    }

    diff
}
