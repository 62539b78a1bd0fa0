// src/api/mod.rs

pub mod error;
pub mod identity;

pub use error::{ChatError, ChatResult};
pub use identity::{Identity, USER_ID_HEADER};
