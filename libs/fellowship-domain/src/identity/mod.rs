//! Identity domain module
//!
//! Principals and sessions come from the identity provider. The `users`
//! mirror record is the one piece of identity state this platform writes.

mod entity;
mod ids;

pub use entity::{Principal, Session, UserRecord};
pub use ids::UserId;
