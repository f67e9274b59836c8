//! User sessions.
//!
//! A session is the per-user polling state: its queries, lifecycle status,
//! counters and recent finds. The supervisor keeps sessions alive across
//! stop/start; only an explicit reset clears them.

mod error;
mod settings;
mod status;
mod user;

pub use error::SessionError;
pub use settings::SessionSettings;
pub use status::SessionStatus;
pub use user::{
    RECENT_PRODUCTS_CAPACITY, RecentProduct, SEEN_ITEMS_CAPACITY, SessionSnapshot, UserSession,
};
