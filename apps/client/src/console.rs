//! Line-oriented terminal front end.

use relaychat_shared::error::RelayError;
use relaychat_shared::ids::Uid;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Lines, Stdin, Stdout};

pub const WELCOME: &str = "relaychat: end-to-end relayed chat";
pub const NAME_PROMPT: &str = "Display name: ";
pub const UID_PROMPT: &str = "Phone number (your uid): ";
pub const USAGE: &str = "Type `<destination_uid> <message>` to send, Ctrl-D to quit.";
pub const OTP_PROMPT: &str = "Enter the code: ";

/// The one line reader and writer every prompt goes through.
///
/// Input is buffered, so a second reader over the same stream would lose
/// whatever this one has already read ahead.
pub struct Terminal<R, W> {
    pub input: Lines<R>,
    pub output: W,
}

impl<R: AsyncBufRead + Unpin, W: AsyncWrite + Unpin> Terminal<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self {
            input: input.lines(),
            output,
        }
    }
}

impl Terminal<BufReader<Stdin>, Stdout> {
    pub fn stdio() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
    }
}

/// Print `prompt` and read one trimmed line. `None` on EOF.
pub async fn prompt_line<R, W>(reader: &mut Lines<R>, writer: &mut W, prompt: &str) -> Result<Option<String>, RelayError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    writer.write_all(prompt.as_bytes()).await?;
    writer.flush().await?;

    Ok(reader.next_line().await?.map(|line| line.trim().to_string()))
}

/// Keep prompting until a valid uid is entered.
pub async fn prompt_uid<R, W>(reader: &mut Lines<R>, writer: &mut W) -> Result<Option<Uid>, RelayError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        let Some(line) = prompt_line(reader, writer, UID_PROMPT).await? else {
            return Ok(None);
        };
        match Uid::parse(&line) {
            Ok(uid) => return Ok(Some(uid)),
            Err(e) => {
                writer.write_all(format!("{e}\n").as_bytes()).await?;
            }
        }
    }
}

/// Split `<destination_uid> <text>` into its parts.
pub fn parse_outgoing(line: &str) -> Result<(Uid, &str), RelayError> {
    let line = line.trim();
    let (destination, text) = line
        .split_once(char::is_whitespace)
        .ok_or_else(|| RelayError::MalformedEnvelope("expected `<destination_uid> <message>`".into()))?;
    let text = text.trim_start();
    if text.is_empty() {
        return Err(RelayError::MalformedEnvelope("message text is empty".into()));
    }
    Ok((Uid::parse(destination)?, text))
}
