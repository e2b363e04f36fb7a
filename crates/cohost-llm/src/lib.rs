pub mod catalog;
pub mod local;

pub mod mock;

pub use local::{LocalBackend, LocalConfig};
pub use mock::{MockBackend, MockReply};
