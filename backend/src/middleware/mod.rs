//! Request extractors shared by handlers

pub mod actor;

pub use actor::{Actor, ACTOR_HEADER};
