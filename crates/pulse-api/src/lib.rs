pub mod auth;
pub mod conversations;
pub mod error;
pub mod media;
pub mod messages;
pub mod middleware;
pub mod participants;
pub mod polls;
