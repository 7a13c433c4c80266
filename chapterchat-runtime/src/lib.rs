pub mod backend;
pub mod client;
pub mod config_store;
pub mod credential_store;
pub mod error;
pub mod files;
pub mod stt;

pub use backend::HttpBackend;
pub use client::{NoRefresh, RequestClass, RequestOptions, ResilientClient, TokenRefresher};
pub use config_store::ConfigStore;
pub use credential_store::FileCredentialStore;
pub use error::ClientError;
