//! Typed representations of GoGevgelija API data.
//!
//! These mirror the wire format of the backend; field absence is tolerated
//! with defaults so older server versions keep parsing.

pub mod item;
pub mod listing;
pub mod user;

pub use item::Item;
pub use listing::Listing;
pub use user::UserProfile;
