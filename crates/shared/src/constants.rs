/// Default relay host.
pub const DEFAULT_HOST: &str = "127.0.0.1";
/// Default relay port.
pub const DEFAULT_PORT: u16 = 12345;
/// Number of decimal digits in an issued one-time passcode.
pub const DEFAULT_OTP_LENGTH: usize = 6;
/// Seconds an issued OTP stays valid before the server reissues it.
pub const DEFAULT_OTP_EXPIRY_SECS: u64 = 10;
/// Longest configurable OTP validity window: one day.
pub const MAX_OTP_EXPIRY_SECS: u64 = 86_400;
/// Maximum length of a single newline-delimited frame: 64 KiB.
pub const MAX_FRAME_BYTES: usize = 64 * 1024;
/// Maximum length for a uid.
pub const MAX_UID_LENGTH: usize = 64;
