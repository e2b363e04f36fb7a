pub mod capability;
pub mod errors;
pub mod events;
pub mod layout;

pub use capability::{
    CapabilityStatus, GenerateOptions, GenerationBackend, ModelState, ProgressKind, ProgressNotice,
};
pub use errors::CapabilityError;
pub use events::{OverlayEvent, Role};
pub use layout::{LayoutPatch, LayoutSettings};
