//! Administrator-or-self access predicate.
//!
//! Callers evaluate [`authorize`] before invoking ledger operations; the
//! settlement engine itself never checks permissions.

use crate::entities::member;

/// Who is asking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    /// Not signed in
    Anonymous,
    /// A regular member
    Member {
        /// The member's id
        member_id: i64,
    },
    /// A ledger administrator
    Admin {
        /// The administrator's own member id
        member_id: i64,
    },
}

impl Actor {
    /// Actor for a signed-in member.
    #[must_use]
    pub const fn from_member(member: &member::Model) -> Self {
        if member.is_admin {
            Self::Admin {
                member_id: member.id,
            }
        } else {
            Self::Member {
                member_id: member.id,
            }
        }
    }
}

/// What is being accessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    /// A member's own record
    MemberRecord(i64),
    /// A member's balance and its movements
    MemberBalance(i64),
    /// A member's payments and what they still owe
    MemberPayments(i64),
    /// Settling payments, editing the dues catalog or the cashbox
    Administration,
}

impl Resource {
    const fn owner(self) -> Option<i64> {
        match self {
            Self::MemberRecord(id) | Self::MemberBalance(id) | Self::MemberPayments(id) => Some(id),
            Self::Administration => None,
        }
    }
}

/// Outcome of [`authorize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Permitted
    Allow,
    /// Refused
    Deny,
}

impl Access {
    /// `true` for [`Access::Allow`].
    #[must_use]
    pub const fn is_allowed(self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Administrators may do anything; members may only read their own data.
#[must_use]
pub const fn authorize(actor: &Actor, resource: Resource) -> Access {
    match (*actor, resource.owner()) {
        (Actor::Admin { .. }, _) => Access::Allow,
        (Actor::Member { member_id }, Some(owner)) if member_id == owner => Access::Allow,
        _ => Access::Deny,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admin_allowed_everywhere() {
        let admin = Actor::Admin { member_id: 1 };
        assert!(authorize(&admin, Resource::Administration).is_allowed());
        assert!(authorize(&admin, Resource::MemberBalance(7)).is_allowed());
    }

    #[test]
    fn test_member_reads_only_itself() {
        let member = Actor::Member { member_id: 7 };
        assert_eq!(authorize(&member, Resource::MemberRecord(7)), Access::Allow);
        assert_eq!(authorize(&member, Resource::MemberPayments(7)), Access::Allow);
        assert_eq!(authorize(&member, Resource::MemberBalance(8)), Access::Deny);
        assert_eq!(authorize(&member, Resource::Administration), Access::Deny);
    }

    #[test]
    fn test_anonymous_denied() {
        assert_eq!(
            authorize(&Actor::Anonymous, Resource::MemberRecord(1)),
            Access::Deny
        );
        assert_eq!(
            authorize(&Actor::Anonymous, Resource::Administration),
            Access::Deny
        );
    }
}
