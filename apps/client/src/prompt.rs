use std::sync::Arc;

use async_trait::async_trait;
use relaychat_shared::envelope::Otp;
use relaychat_shared::error::RelayError;
use tokio::io::{AsyncBufRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::console::{prompt_line, Terminal, OTP_PROMPT};

/// Supplies the value to echo for an issued OTP.
#[async_trait]
pub trait OtpPrompt: Send + Sync {
    async fn obtain(&self, issued: &Otp) -> Result<String, RelayError>;
}

/// Echoes the code exactly as received.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoEcho;

#[async_trait]
impl OtpPrompt for AutoEcho {
    async fn obtain(&self, issued: &Otp) -> Result<String, RelayError> {
        Ok(issued.otp.clone())
    }
}

/// Always answers with the same value.
#[derive(Debug, Clone)]
pub struct FixedOtp(pub String);

#[async_trait]
impl OtpPrompt for FixedOtp {
    async fn obtain(&self, _issued: &Otp) -> Result<String, RelayError> {
        Ok(self.0.clone())
    }
}

/// Asks the user to type the code, reading from the terminal the rest of
/// the front end shares.
pub struct ConsoleOtp<R, W> {
    terminal: Arc<Mutex<Terminal<R, W>>>,
}

impl<R, W> ConsoleOtp<R, W> {
    pub fn new(terminal: Arc<Mutex<Terminal<R, W>>>) -> Self {
        Self { terminal }
    }
}

#[async_trait]
impl<R, W> OtpPrompt for ConsoleOtp<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn obtain(&self, issued: &Otp) -> Result<String, RelayError> {
        let mut terminal = self.terminal.lock().await;
        let Terminal { input, output } = &mut *terminal;
        output
            .write_all(format!("Verification code for {}: {}\n", issued.uid, issued.otp).as_bytes())
            .await?;
        prompt_line(input, output, OTP_PROMPT)
            .await?
            .ok_or_else(|| RelayError::TransportFailure("input closed before the code was entered".into()))
    }
}
