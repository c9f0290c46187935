//! Session state: records, durable storage, lifecycle service and the
//! encrypted cookie.
//!
//! - [`Session`] - session record
//! - [`SessionStorage`] - durable backend trait
//! - [`InMemorySessionStorage`] - single-node backend
//! - [`SessionStore`] - lifecycle service (create, get, renew, regenerate, evict)
//! - [`SessionCookies`] - AES-256-GCM cookie codec

pub mod cookie;
pub mod memory;
pub mod model;
pub mod storage;
pub mod store;

pub use cookie::{CookieCipher, CookieRead, KeyError, SessionCookies, generate_key, parse_key};
pub use memory::InMemorySessionStorage;
pub use model::{ClientInfo, Session, SessionData, generate_session_id, short_id};
pub use storage::SessionStorage;
pub use store::SessionStore;
