//! relaychat shared library: wire envelope, framing, identities and the
//! error taxonomy shared between the relay server and its clients.

pub mod constants;
pub mod envelope;
pub mod error;
pub mod frame;
pub mod ids;
