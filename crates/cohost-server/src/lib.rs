pub mod client;
pub mod handlers;
pub mod layout;
pub mod relay;
pub mod server;

pub use layout::{JsonFileStore, LayoutStore, LayoutSurface};
pub use relay::{ReactionConfig, Relay};
pub use server::{start, ServerConfig, ServerHandle};
