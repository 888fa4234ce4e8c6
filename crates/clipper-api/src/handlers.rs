//! Request handlers.

pub mod clips;
pub mod events;
pub mod files;
pub mod health;
pub mod upload;

pub use clips::*;
pub use events::*;
pub use files::*;
pub use health::*;
pub use upload::*;
