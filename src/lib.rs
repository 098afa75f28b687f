//! # textify
//!
//! Room-based chat with an `@ai` assistant.
//!
//! The server side is [`service::ChatService`] over a SQLite [`store::ChatStore`],
//! exposed by the HTTP [`web::Server`]. Messages starting with `@ai` are
//! answered by an [`assistant::Assistant`] that walks a fallback chain of
//! generative-text models.
//!
//! The client side polls the server through [`client::ChatApi`] and keeps a
//! local list consistent with it in [`engine::Reconciler`]: optimistic sends
//! appear immediately, are replaced in place on confirmation, and are never
//! duplicated by a concurrent poll. [`session::ChatSession`] drives the
//! reconciler on tokio and fires [`sounds::Cue`]s.

pub mod assistant;
pub mod cli;
pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod models;
pub mod providers;
pub mod service;
pub mod session;
pub mod sounds;
pub mod store;
pub mod transcript;
pub mod web;
