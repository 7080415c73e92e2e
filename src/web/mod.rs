//! HTTP surfaces: the streaming chat endpoint and the admin editor for
//! the live system-message file.

pub mod admin;
pub mod chat;
