//! API route handlers.

pub mod chat;
pub mod collaborators;
pub mod requests;
pub mod upload;
