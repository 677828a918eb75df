use rand::Rng;
use subtle::ConstantTimeEq;

/// Issues fixed-length decimal one-time passcodes.
#[derive(Debug, Clone, Copy)]
pub struct OtpIssuer {
    length: usize,
}

impl OtpIssuer {
    /// `length` must be 1..=9 so the code space fits in a `u32`; the server
    /// config enforces this.
    pub fn new(length: usize) -> Self {
        Self {
            length: length.clamp(1, 9),
        }
    }

    pub fn length(&self) -> usize {
        self.length
    }

    /// A fresh zero-padded code, e.g. "042918".
    pub fn issue(&self) -> String {
        let bound = 10u32.pow(self.length as u32);
        format!(
            "{:0width$}",
            rand::rng().random_range(0..bound),
            width = self.length
        )
    }
}

/// Constant-time comparison of an echoed code against the issued one.
pub fn otp_matches(issued: &str, echoed: &str) -> bool {
    issued.as_bytes().ct_eq(echoed.as_bytes()).into()
}
