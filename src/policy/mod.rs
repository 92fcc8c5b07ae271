//! Interface boundaries to the rest of the system's security policy.
//!
//! Policy content is produced elsewhere; these modules only find it and hand
//! it to the kernel.

pub mod apparmor;
pub mod cookie;
pub mod selinux;
pub mod user_data;
