pub mod manager;

pub use manager::{RefreshPolicy, TokenManager};
