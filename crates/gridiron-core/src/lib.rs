// Library root: re-exports all modules so integration tests and the
// `gridiron-live` binary can access the crate's public API.

pub mod animation;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod game;
pub mod protocol;
pub mod resync;
