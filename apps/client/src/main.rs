use std::sync::Arc;

use tokio::sync::Mutex;
use tracing_subscriber::EnvFilter;

use relaychat_client::config::ClientConfig;
use relaychat_client::console::{self, parse_outgoing, Terminal};
use relaychat_client::prompt::{AutoEcho, ConsoleOtp, OtpPrompt};
use relaychat_client::{ClientSession, Handshake};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let mut config = ClientConfig::load()?;
    if std::env::args().any(|arg| arg == "--manual-otp") {
        config.manual_otp = true;
    }

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    // Shared with the OTP prompt so no buffered input is lost between them.
    let terminal = Arc::new(Mutex::new(Terminal::stdio()));

    println!("{}", console::WELCOME);
    let (name, uid) = {
        let mut guard = terminal.lock().await;
        let Terminal { input, output } = &mut *guard;
        let Some(name) = console::prompt_line(input, output, console::NAME_PROMPT).await? else {
            return Ok(());
        };
        let Some(uid) = console::prompt_uid(input, output).await? else {
            return Ok(());
        };
        (name, uid)
    };

    let prompt: Arc<dyn OtpPrompt> = if config.manual_otp {
        Arc::new(ConsoleOtp::new(terminal.clone()))
    } else {
        Arc::new(AutoEcho)
    };
    let mut session = ClientSession::connect(&config, Handshake::generate(uid.clone()), prompt).await?;
    session.wait_registered().await?;

    let greeting = if name.is_empty() { uid.to_string() } else { name };
    println!("Registered as {uid}. Welcome, {greeting}.");
    println!("{}", console::USAGE);

    loop {
        tokio::select! {
            // `next_line` is cancel safe, so losing the race drops no input.
            line = async { terminal.lock().await.input.next_line().await } => {
                let Some(line) = line? else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match parse_outgoing(&line) {
                    Ok((destination, text)) => {
                        if let Err(e) = session.send_message(destination, text).await {
                            eprintln!("send failed: {e}");
                        }
                    }
                    Err(e) => eprintln!("{e}"),
                }
            }
            message = session.next_message() => match message {
                Some(message) => println!("[{}] {}", message.from, message.text),
                None => {
                    eprintln!("disconnected from relay");
                    break;
                }
            },
        }
    }

    session.close().await;
    Ok(())
}
