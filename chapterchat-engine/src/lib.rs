pub mod notifications;
pub mod recording;
pub mod session;
pub mod traits;
