//! Remote identity verification.
//!
//! - [`IdentityClient`] - verifies bearer tokens against the provider
//! - [`TokenBlacklist`] - revocation lookup consulted before calling out
//! - [`GroupRef`] - normalized group membership

pub mod blacklist;
pub mod client;
pub mod groups;

pub use blacklist::{NoBlacklist, TokenBlacklist};
pub use client::{Identity, IdentityClient};
pub use groups::{GROUP_NAMESPACE, GroupRef};
