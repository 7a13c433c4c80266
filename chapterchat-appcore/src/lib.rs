pub mod microphone;
pub mod oauth;
pub mod service;

pub use service::{AppService, SignInError};
