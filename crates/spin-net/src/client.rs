//! Session driver with the tokio mpsc command/notification pattern.
//!
//! The driver owns the socket, the timers and the [`Session`] on a single
//! tokio task. Web fetches run as their own tasks and report back over a
//! channel, so the session itself never blocks and never needs a lock.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use spin_shared::constants::{DEFAULT_CHAT_HOST, DEFAULT_CHAT_PORT, KEEPALIVE_INTERVAL_SECS};
use spin_shared::UserStatus;

use crate::directory::Directory;
use crate::error::{Result, TransportError, ValidationError, WebError};
use crate::events::SessionEvent;
use crate::moderation::Moderation;
use crate::session::{Session, SessionConfig};
use crate::transport::NonBlockingIo;
use crate::web::{FetchReply, WebFetcher, WebRequest};

type FetchOutcome = (WebRequest, std::result::Result<FetchReply, WebError>);

// ---------------------------------------------------------------------------
// Command / configuration types
// ---------------------------------------------------------------------------

/// Commands sent *into* the session task.
#[derive(Debug)]
pub enum ClientCommand {
    SendIm { to: String, text: String },
    ChatSend { room: String, text: String },
    JoinChat(String),
    LeaveChat(String),
    SetStatus(UserStatus),
    RequestRoomList,
    CancelRoomList,
    Ignore(String),
    Unignore(String),
    Moderate(Moderation),
    /// Close the session and stop the task.
    Shutdown,
}

/// Configuration for spawning a client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub session: SessionConfig,
    /// Chat server host name.
    pub host: String,
    pub port: u16,
    pub keepalive_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            host: DEFAULT_CHAT_HOST.to_string(),
            port: DEFAULT_CHAT_PORT,
            keepalive_interval: Duration::from_secs(KEEPALIVE_INTERVAL_SECS),
        }
    }
}

/// Spawn a chat session in a background tokio task.
///
/// The task logs in through `fetcher`, connects to the chat server and then
/// runs until the server disconnects, a fatal error occurs, or
/// [`ClientCommand::Shutdown`] is received. A fatal error is reported as a
/// final [`SessionEvent::ConnectionLost`].
///
/// Commands sent before the connection is up are held and applied in order
/// once the chat login has been queued.
///
/// # Returns
///
/// `(command_tx, event_rx)`
pub fn spawn_client(
    config: ClientConfig,
    fetcher: Arc<dyn WebFetcher>,
    directory: Box<dyn Directory>,
) -> Result<(mpsc::Sender<ClientCommand>, mpsc::Receiver<SessionEvent>)> {
    let session = Session::new(config.session.clone(), directory)?;

    let (cmd_tx, cmd_rx) = mpsc::channel::<ClientCommand>(256);
    let (event_tx, event_rx) = mpsc::channel::<SessionEvent>(256);

    tokio::spawn(async move {
        let mut driver = Driver {
            session,
            fetcher,
            cmd_rx,
            event_tx,
            fetch_tasks: Vec::new(),
        };
        driver.run(&config).await;
    });

    Ok((cmd_tx, event_rx))
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// How the driver loop ended without a fatal error.
enum Exit {
    Shutdown,
    Closed,
}

struct Driver {
    session: Session,
    fetcher: Arc<dyn WebFetcher>,
    cmd_rx: mpsc::Receiver<ClientCommand>,
    event_tx: mpsc::Sender<SessionEvent>,
    fetch_tasks: Vec<JoinHandle<()>>,
}

impl Driver {
    async fn run(&mut self, config: &ClientConfig) {
        let outcome = self.drive(config).await;

        // Nothing in flight may report into a closed session.
        for task in self.fetch_tasks.drain(..) {
            task.abort();
        }

        match outcome {
            Ok(Exit::Shutdown) => info!("Session shutdown requested"),
            Ok(Exit::Closed) => info!("Session closed by server"),
            Err(e) => {
                error!(error = %e, "Session failed");
                self.session.teardown();
                self.flush_events().await;
                let _ = self
                    .event_tx
                    .send(SessionEvent::ConnectionLost {
                        reason: e.to_string(),
                    })
                    .await;
                return;
            }
        }
        self.session.teardown();
        self.flush_events().await;
    }

    async fn drive(&mut self, config: &ClientConfig) -> Result<Exit> {
        let mut deferred = Vec::new();

        // --- Web login ---
        let request = self.session.login_request()?;
        let reply = {
            let fetcher = Arc::clone(&self.fetcher);
            let login = fetcher.fetch_json(&request);
            tokio::pin!(login);
            loop {
                tokio::select! {
                    reply = &mut login => break reply,
                    cmd = self.cmd_rx.recv() => match cmd {
                        Some(ClientCommand::Shutdown) | None => return Ok(Exit::Shutdown),
                        Some(cmd) => deferred.push(cmd),
                    },
                }
            }
        };
        self.session.on_login_reply(reply)?;
        if !self.flush_events().await {
            return Ok(Exit::Shutdown);
        }

        // --- Chat connection ---
        info!(host = %config.host, port = config.port, "Connecting to chat server");
        let mut stream = {
            let connect = TcpStream::connect((config.host.as_str(), config.port));
            tokio::pin!(connect);
            loop {
                tokio::select! {
                    stream = &mut connect => break stream.map_err(TransportError::Io)?,
                    cmd = self.cmd_rx.recv() => match cmd {
                        Some(ClientCommand::Shutdown) | None => return Ok(Exit::Shutdown),
                        Some(cmd) => deferred.push(cmd),
                    },
                }
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "Could not disable Nagle");
        }

        self.session.begin_chat_login()?;
        for cmd in deferred {
            self.apply(cmd);
        }

        let result = self.main_loop(&mut stream, config.keepalive_interval).await;
        if let Some(farewell) = self.session.teardown() {
            if let Err(e) = NonBlockingIo::try_write(&mut stream, farewell) {
                debug!(error = %e, "Farewell not sent");
            }
        }
        result
    }

    async fn main_loop(&mut self, stream: &mut TcpStream, keepalive: Duration) -> Result<Exit> {
        let (fetch_tx, mut fetch_rx) = mpsc::channel::<FetchOutcome>(64);
        let mut keepalive = time::interval_at(time::Instant::now() + keepalive, keepalive);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            self.spawn_fetches(&fetch_tx);
            if !self.flush_events().await {
                return Ok(Exit::Shutdown);
            }
            if self.session.is_closed() {
                return Ok(Exit::Closed);
            }

            let wants_write = self.session.wants_write();
            let deadline = self.session.watchdog_deadline().map(time::Instant::from_std);

            tokio::select! {
                ready = stream.readable() => {
                    ready.map_err(TransportError::Io)?;
                    self.session.on_readable(stream)?;
                }
                ready = stream.writable(), if wants_write => {
                    ready.map_err(TransportError::Io)?;
                    self.session.on_writable(stream)?;
                }
                _ = keepalive.tick() => {
                    self.session.on_keepalive(std::time::Instant::now());
                }
                _ = sleep_until_deadline(deadline), if deadline.is_some() => {
                    self.session.check_watchdog(std::time::Instant::now())?;
                }
                Some((request, reply)) = fetch_rx.recv() => {
                    self.session.on_fetch_complete(request, reply)?;
                }
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(ClientCommand::Shutdown) | None => return Ok(Exit::Shutdown),
                    Some(cmd) => self.apply(cmd),
                },
            }
        }
    }

    /// Run queued web requests as tasks reporting into `tx`.
    fn spawn_fetches(&mut self, tx: &mpsc::Sender<FetchOutcome>) {
        self.fetch_tasks.retain(|task| !task.is_finished());
        for request in self.session.take_fetches() {
            debug!(url = %request.url, kind = ?request.kind, "Starting fetch");
            let fetcher = Arc::clone(&self.fetcher);
            let tx = tx.clone();
            self.fetch_tasks.push(tokio::spawn(async move {
                let reply = fetcher.fetch(&request).await;
                let _ = tx.send((request, reply)).await;
            }));
        }
    }

    /// Forward pending events. Returns `false` once the receiver is gone.
    async fn flush_events(&mut self) -> bool {
        for event in self.session.take_events() {
            if self.event_tx.send(event).await.is_err() {
                info!("Event channel closed, shutting down session");
                return false;
            }
        }
        true
    }

    fn apply(&mut self, cmd: ClientCommand) {
        let session = &mut self.session;
        let result: std::result::Result<(), ValidationError> = match cmd {
            ClientCommand::SendIm { to, text } => session.send_im(&to, &text),
            ClientCommand::ChatSend { room, text } => session.chat_send(&room, &text),
            ClientCommand::JoinChat(room) => session.join_chat(&room),
            ClientCommand::LeaveChat(room) => session.leave_chat(&room),
            ClientCommand::SetStatus(status) => session.set_status(status),
            ClientCommand::RequestRoomList => session.request_room_list(),
            ClientCommand::CancelRoomList => {
                session.cancel_room_list();
                Ok(())
            }
            ClientCommand::Ignore(user) => session.ignore(&user),
            ClientCommand::Unignore(user) => session.unignore(&user),
            ClientCommand::Moderate(action) => session.moderate(action),
            ClientCommand::Shutdown => Ok(()),
        };

        if let Err(e) = result {
            warn!(error = %e, "Command rejected");
            session.emit(SessionEvent::CommandRejected {
                reason: e.to_string(),
            });
        }
    }
}

async fn sleep_until_deadline(deadline: Option<time::Instant>) {
    match deadline {
        Some(at) => time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::io;
    use std::time::Instant;

    use async_trait::async_trait;
    use serde_json::{json, Value};
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    use super::*;
    use crate::bringup::Milestone;
    use crate::directory::MemoryDirectory;
    use crate::error::SessionError;
    use crate::web::FetchKind;

    const E2E: &[u8] = b"a\nh bob#0#a#hello\nJp\n";

    /// Stream that hands out one scripted chunk per read.
    #[derive(Default)]
    struct Chunks {
        reads: VecDeque<Vec<u8>>,
        written: Vec<u8>,
    }

    impl NonBlockingIo for Chunks {
        fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.reads.pop_front() {
                Some(data) => {
                    buf[..data.len()].copy_from_slice(&data);
                    Ok(data.len())
                }
                None => Err(io::ErrorKind::WouldBlock.into()),
            }
        }

        fn try_write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }
    }

    fn logged_in() -> Session {
        let config = SessionConfig {
            username: "alice".into(),
            password: "secret".into(),
            ..Default::default()
        };
        let mut session = Session::new(config, Box::new(MemoryDirectory::new())).unwrap();
        session
            .on_login_reply(Ok(json!({"status": "OK ", "session": "tok", "username": "alice"})))
            .unwrap();
        session.begin_chat_login().unwrap();
        session
    }

    #[test]
    fn test_login_ping_and_message_at_every_split() {
        for split in 1..E2E.len() {
            let mut session = logged_in();
            session.on_keepalive(Instant::now());
            assert!(session.watchdog_deadline().is_some());

            let mut io = Chunks {
                reads: VecDeque::from([E2E[..split].to_vec(), E2E[split..].to_vec()]),
                ..Default::default()
            };
            session.on_readable(&mut io).unwrap();
            session.on_readable(&mut io).unwrap();

            assert!(session.gate().is_marked(Milestone::ChatLogin), "split {split}");
            assert!(session.watchdog_deadline().is_none(), "split {split}");
            let messages: Vec<_> = session
                .take_events()
                .into_iter()
                .filter_map(|e| match e {
                    SessionEvent::PrivateMessage { from, text, .. } => Some((from, text)),
                    _ => None,
                })
                .collect();
            assert_eq!(messages, vec![("bob".to_string(), "hello".to_string())], "split {split}");
        }
    }

    fn private_messages(events: Vec<SessionEvent>) -> Vec<String> {
        events
            .into_iter()
            .filter_map(|e| match e {
                SessionEvent::PrivateMessage { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_fatal_frame_stops_the_rest_of_the_read() {
        let mut session = logged_in();
        let mut io = Chunks {
            reads: VecDeque::from([b"e\nh bob#0#a#late\n".to_vec()]),
            ..Default::default()
        };

        assert!(matches!(
            session.on_readable(&mut io),
            Err(SessionError::AuthenticationFailed(_))
        ));
        assert!(private_messages(session.take_events()).is_empty());
    }

    #[test]
    fn test_disconnect_stops_the_rest_of_the_read() {
        let mut session = logged_in();
        let mut io = Chunks {
            reads: VecDeque::from([b"a\n".to_vec()]),
            ..Default::default()
        };
        session.on_readable(&mut io).unwrap();
        session.on_friends_reply(Ok(json!([]))).unwrap();
        session.on_mail_reply(Ok(json!([]))).unwrap();
        session.on_prefs_reply(Ok(json!({"prefsok": 1}))).unwrap();
        assert!(session.is_ready());
        session.take_events();

        io.reads
            .push_back(b"h bob#0#a#before\ne\nh bob#0#a#after\n".to_vec());
        session.on_readable(&mut io).unwrap();

        let events = session.take_events();
        assert!(events.contains(&SessionEvent::Disconnected));
        assert_eq!(private_messages(events), vec!["before".to_string()]);
        assert!(session.is_closed());
    }

    #[test]
    fn test_watchdog_expires_once() {
        let mut session = logged_in();
        let start = Instant::now();
        session.on_keepalive(start);
        let deadline = session.watchdog_deadline().unwrap();

        assert!(session.check_watchdog(start).is_ok());
        assert!(matches!(
            session.check_watchdog(deadline),
            Err(SessionError::Transport(TransportError::PingTimeout))
        ));
        assert!(session.check_watchdog(deadline).is_ok());
    }

    #[test]
    fn test_rejected_command_becomes_event() {
        let (_cmd_tx, cmd_rx) = mpsc::channel(1);
        let (event_tx, _event_rx) = mpsc::channel(1);
        let mut driver = Driver {
            session: logged_in(),
            fetcher: Arc::new(FakeWeb),
            cmd_rx,
            event_tx,
            fetch_tasks: Vec::new(),
        };
        driver.session.take_events();

        driver.apply(ClientCommand::JoinChat("a#b".into()));
        let events = driver.session.take_events();
        assert!(matches!(
            events.as_slice(),
            [SessionEvent::CommandRejected { .. }]
        ));
    }

    struct FakeWeb;

    #[async_trait]
    impl WebFetcher for FakeWeb {
        async fn fetch_json(&self, request: &WebRequest) -> std::result::Result<Value, WebError> {
            Ok(match request.kind {
                FetchKind::Login => {
                    json!({"status": "OK ", "session": "tok", "username": "alice"})
                }
                FetchKind::Friends => json!([["1", "bob", 1, "", 0, "", 0]]),
                FetchKind::Mail => json!([]),
                FetchKind::Prefs => json!({"prefsok": 1}),
                FetchKind::BuddyIcon { .. } => Value::Null,
            })
        }

        async fn fetch_bytes(
            &self,
            _url: &str,
            _session: Option<&str>,
        ) -> std::result::Result<Vec<u8>, WebError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_driver_reaches_ready_and_says_goodbye() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (read, mut write) = socket.into_split();
            let mut lines = BufReader::new(read).lines();
            let mut seen = Vec::new();
            while let Some(line) = lines.next_line().await.unwrap() {
                if line == "aalice#tok" {
                    write.write_all(b"a\n").await.unwrap();
                }
                let done = line == "e";
                seen.push(line);
                if done {
                    break;
                }
            }
            seen
        });

        let config = ClientConfig {
            session: SessionConfig {
                username: "alice".into(),
                password: "secret".into(),
                ..Default::default()
            },
            host: "127.0.0.1".into(),
            port,
            ..Default::default()
        };
        let (cmd_tx, mut event_rx) =
            spawn_client(config, Arc::new(FakeWeb), Box::new(MemoryDirectory::new())).unwrap();

        // Sent before the socket exists; must still arrive after the login.
        cmd_tx
            .send(ClientCommand::JoinChat("lobby".into()))
            .await
            .unwrap();

        loop {
            match event_rx.recv().await {
                Some(SessionEvent::Ready) => break,
                Some(SessionEvent::ConnectionLost { reason }) => panic!("lost: {reason}"),
                Some(_) => {}
                None => panic!("event channel closed before ready"),
            }
        }

        cmd_tx.send(ClientCommand::Shutdown).await.unwrap();
        while event_rx.recv().await.is_some() {}

        let seen = server.await.unwrap();
        let login = seen.iter().position(|l| l == "aalice#tok").unwrap();
        let join = seen.iter().position(|l| l == "clobby").unwrap();
        assert_eq!(seen[0], "Aprpl-spin");
        assert!(join > login);
        assert_eq!(seen.last().map(String::as_str), Some("e"));
    }
}
