//! Identity snapshots and the ordered privilege drop.
//!
//! CRITICAL: group ids are changed BEFORE user ids.

mod identity;
mod transition;
mod validation;

pub use identity::{IdentityOps, IdentitySnapshot, SystemIdentity};
pub use transition::{
    Dropped, ExecPermit, Initial, Lowered, Privileges, TemporarilyDropped,
};
pub use validation::{verify_dropped, verify_effective};
