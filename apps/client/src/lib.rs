pub mod config;
pub mod console;
pub mod handshake;
pub mod prompt;
pub mod session;

pub use handshake::{ClientState, Handshake};
pub use session::{ClientSession, IncomingMessage};
