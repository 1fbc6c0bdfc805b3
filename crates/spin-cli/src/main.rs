//! # spin-cli
//!
//! Line-oriented terminal client for the spin.de chat.
//!
//! Credentials and endpoints come from `SPIN_*` environment variables (see
//! [`config::CliConfig`]). Events are printed as they arrive; lines typed on
//! stdin are parsed into session commands.

mod config;

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use spin_net::{spawn_client, ClientCommand, HttpFetcher, MemoryDirectory, Moderation, SessionEvent};
use spin_shared::UserStatus;

use crate::config::CliConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,spin_net=debug,spin_cli=debug")),
        )
        .init();

    info!("Starting spin-cli v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = CliConfig::from_env();
    if config.username.is_empty() || config.password.is_empty() {
        anyhow::bail!("SPIN_USERNAME and SPIN_PASSWORD must be set");
    }
    info!(
        user = %config.username,
        server = %config.server,
        port = config.port,
        secure_login = config.secure_login,
        "Loaded configuration"
    );

    // -----------------------------------------------------------------------
    // 3. Spawn the session
    // -----------------------------------------------------------------------
    let fetcher = Arc::new(HttpFetcher::new()?);
    let (cmd_tx, mut event_rx) = spawn_client(
        config.client_config(),
        fetcher,
        Box::new(MemoryDirectory::new()),
    )?;

    // -----------------------------------------------------------------------
    // 4. Pump stdin and events until the session ends
    // -----------------------------------------------------------------------
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            event = event_rx.recv() => match event {
                Some(event) => print_event(&event),
                None => {
                    info!("Session ended");
                    break;
                }
            },
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => match parse_input(&line) {
                    Ok(Some(cmd)) => {
                        if cmd_tx.send(cmd).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(usage) => println!("usage: {usage}"),
                },
                Ok(None) => {
                    stdin_open = false;
                    let _ = cmd_tx.send(ClientCommand::Shutdown).await;
                }
                Err(e) => {
                    warn!(error = %e, "Could not read stdin");
                    stdin_open = false;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down");
                let _ = cmd_tx.send(ClientCommand::Shutdown).await;
                stdin_open = false;
            }
        }
    }

    Ok(())
}

fn print_event(event: &SessionEvent) {
    match event {
        SessionEvent::Ready => println!("* connected"),
        SessionEvent::Disconnected => println!("* disconnected by server"),
        SessionEvent::ConnectionLost { reason } => {
            error!(%reason, "Connection lost");
            println!("* connection lost: {reason}");
        }
        SessionEvent::Notice { title, text } => println!("* {title}: {text}"),
        SessionEvent::PrivateMessage {
            from,
            text,
            auto_reply,
            at,
        } => {
            let tag = if *auto_reply { " (auto)" } else { "" };
            println!("[{}] <{from}>{tag} {text}", at.format("%H:%M"));
        }
        SessionEvent::ChatMessage {
            room,
            from,
            text,
            mentions_me,
            at,
        } => {
            let mark = if *mentions_me { "!" } else { "" };
            println!("[{}] #{room} <{from}>{mark} {text}", at.format("%H:%M"));
        }
        SessionEvent::ChatSystem { room, text, .. } => println!("#{room} * {text}"),
        SessionEvent::ChatTopic { room, topic } => println!("#{room} topic: {topic}"),
        SessionEvent::ChatJoined { room, .. } => println!("* joined #{room}"),
        SessionEvent::ChatLeft { room, message } => println!("* left #{room}: {message}"),
        SessionEvent::JoinFailed { room, reason } => println!("* cannot join #{room}: {reason}"),
        SessionEvent::ChatUserJoined { room, user, .. } => println!("#{room} + {user}"),
        SessionEvent::ChatUserLeft { room, user, reason } => match reason {
            Some(reason) => println!("#{room} - {user} ({reason})"),
            None => println!("#{room} - {user}"),
        },
        SessionEvent::BuddyPresence { name, presence } => println!("* {name} is {presence:?}"),
        SessionEvent::NewMail { subject, from, url } => {
            println!("* new mail from {from}: {subject} ({url})")
        }
        SessionEvent::RoomListed { name } => println!("  #{name}"),
        SessionEvent::RoomListFinished => println!("* end of room list"),
        SessionEvent::MessageFailed { user } => println!("* message to {user} not delivered"),
        SessionEvent::CommandRejected { reason } => println!("* rejected: {reason}"),
        other => tracing::debug!(event = ?other, "Event"),
    }
}

/// Parse one input line. `Ok(None)` for blank lines, `Err(usage)` for a
/// malformed command.
fn parse_input(line: &str) -> Result<Option<ClientCommand>, &'static str> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (verb, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();

    let two = |usage| {
        rest.split_once(' ')
            .map(|(a, b)| (a.to_string(), b.trim().to_string()))
            .filter(|(_, b)| !b.is_empty())
            .ok_or(usage)
    };
    let one = |usage| {
        if rest.is_empty() {
            Err(usage)
        } else {
            Ok(rest.to_string())
        }
    };

    let cmd = match verb {
        "/join" => ClientCommand::JoinChat(one("/join <room>")?),
        "/part" => ClientCommand::LeaveChat(one("/part <room>")?),
        "/msg" => {
            let (to, text) = two("/msg <user> <text>")?;
            ClientCommand::SendIm { to, text }
        }
        "/say" => {
            let (room, text) = two("/say <room> <text>")?;
            ClientCommand::ChatSend { room, text }
        }
        "/away" => ClientCommand::SetStatus(UserStatus::Away(rest.to_string())),
        "/back" => ClientCommand::SetStatus(UserStatus::Available),
        "/rooms" => ClientCommand::RequestRoomList,
        "/ignore" => ClientCommand::Ignore(one("/ignore <user>")?),
        "/unignore" => ClientCommand::Unignore(one("/unignore <user>")?),
        "/kick" => {
            let (room, user) = two("/kick <room> <user>")?;
            ClientCommand::Moderate(Moderation::Kick { room, user })
        }
        "/quit" => ClientCommand::Shutdown,
        _ => return Err("/join /part /msg /say /away /back /rooms /ignore /unignore /kick /quit"),
    };
    Ok(Some(cmd))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_messages() {
        assert!(matches!(
            parse_input("/msg bob hi there"),
            Ok(Some(ClientCommand::SendIm { to, text })) if to == "bob" && text == "hi there"
        ));
        assert!(matches!(
            parse_input("/say lobby /me waves"),
            Ok(Some(ClientCommand::ChatSend { room, text })) if room == "lobby" && text == "/me waves"
        ));
        assert!(matches!(parse_input("/msg bob"), Err("/msg <user> <text>")));
    }

    #[test]
    fn test_parse_status_and_rooms() {
        assert!(matches!(
            parse_input("/away"),
            Ok(Some(ClientCommand::SetStatus(UserStatus::Away(m)))) if m.is_empty()
        ));
        assert!(matches!(
            parse_input("/back"),
            Ok(Some(ClientCommand::SetStatus(UserStatus::Available)))
        ));
        assert!(matches!(
            parse_input("  /join  lobby "),
            Ok(Some(ClientCommand::JoinChat(room))) if room == "lobby"
        ));
        assert!(matches!(parse_input("/part"), Err("/part <room>")));
    }

    #[test]
    fn test_parse_blank_and_unknown() {
        assert!(matches!(parse_input("   "), Ok(None)));
        assert!(parse_input("hello").is_err());
        assert!(matches!(parse_input("/quit"), Ok(Some(ClientCommand::Shutdown))));
    }
}
