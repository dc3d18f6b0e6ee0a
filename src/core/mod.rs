pub mod api;
pub mod cache;
pub mod keyring;
pub mod models;
pub mod store;
