pub mod config;
pub mod connection;
pub mod otp;
pub mod registration;
pub mod registry;
pub mod relay;
pub mod server;
pub mod session;
pub mod shutdown;
pub mod state;
pub mod store;
