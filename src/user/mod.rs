pub mod manager;
mod models;

pub use manager::{UserError, UserManager};
pub use models::{LoadState, StatSnapshot, StatValues, User};
