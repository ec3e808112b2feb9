//! External collaborators the sync layer depends on.
//!
//! Both are traits so tests and the websocket layer never need a live
//! identity provider or database.

pub mod access;
pub mod identity;
