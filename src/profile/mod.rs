pub mod manager;
pub mod types;

pub use manager::ProfileManager;
pub use types::{BrowserProfile, CreateProfileRequest};
