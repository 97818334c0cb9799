//! Member dispatch with visibility pass-through.
//!
//! The association proxy forwards calls to its resolved target without
//! widening what the target exposes. Targets opt in by implementing
//! [`Dispatch`]: a capability interface naming each member's visibility
//! plus a raw entry point. The checked path refuses restricted members
//! with the same error an unknown member produces; the raw entry point is
//! the target's own escape hatch, which the proxy mirrors.

use crate::error::{Error, Result, VisibilityError};
use crate::record::Record;
use crate::value::Value;

/// Visibility of a dispatchable member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberVisibility {
    /// Reachable through the ordinary call path.
    Public,
    /// Reachable only through the escape hatch.
    Restricted,
}

/// Capability interface for targets that accept forwarded calls.
pub trait Dispatch {
    /// Visibility of a named member, `None` if the member does not exist.
    fn member_visibility(&self, member: &str) -> Option<MemberVisibility>;

    /// Invoke a member without a visibility check.
    ///
    /// Implementations should fail with a method-not-found style
    /// [`VisibilityError`] for unknown members.
    fn dispatch(&self, member: &str, args: &[Value]) -> Result<Value>;
}

/// Invoke a member through the ordinary, visibility-checked path.
///
/// Restricted members fail exactly like unknown ones.
pub fn checked_call<T: Record + Dispatch>(
    target: &T,
    member: &str,
    args: &[Value],
) -> Result<Value> {
    match target.member_visibility(member) {
        Some(MemberVisibility::Public) => target.dispatch(member, args),
        Some(MemberVisibility::Restricted) => Err(Error::Visibility(VisibilityError::restricted(
            member,
            T::KIND,
        ))),
        None => Err(Error::Visibility(VisibilityError::undefined(
            member,
            T::KIND,
        ))),
    }
}
