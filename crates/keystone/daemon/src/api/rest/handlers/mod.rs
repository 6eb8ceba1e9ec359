//! API request handlers

mod credentials;
mod entities;
mod events;
mod health;

pub use credentials::*;
pub use entities::*;
pub use events::*;
pub use health::*;
