/// Default chat server host
pub const DEFAULT_CHAT_HOST: &str = "www.spin.de";

/// Default chat server TCP port
pub const DEFAULT_CHAT_PORT: u16 = 3003;

/// Plain HTTP base of the web API
pub const WEB_BASE: &str = "http://www.spin.de";

/// HTTPS base used for the login request when secure login is enabled
pub const SECURE_WEB_BASE: &str = "https://www.spin.de";

/// Web API paths
pub const LOGIN_PATH: &str = "/api/login";
pub const FRIENDS_PATH: &str = "/api/friends";
pub const MAIL_PATH: &str = "/api/readmail";
pub const PREFS_PATH: &str = "/api/prefs";
pub const SET_SESSION_PATH: &str = "/login/setsession";

/// Prefix of the `status` field in a successful login reply
pub const LOGIN_OK_PREFIX: &str = "OK ";

/// Client identification sent right after the TCP connect
pub const CLIENT_ID: &str = "prpl-spin";
pub const CLIENT_INFO: &str = "I'm a bot.";

/// Scratch buffer size for one non-blocking socket read
pub const READ_CHUNK_SIZE: usize = 1024;

/// Keepalive ping period in seconds
pub const KEEPALIVE_INTERVAL_SECS: u64 = 30;

/// Seconds to wait for a pong before the session is torn down
pub const PING_TIMEOUT_SECS: u64 = 60;

/// Farewell frame written best-effort on teardown
pub const DISCONNECT_FRAME: &[u8] = b"e\n";

/// Fixed width of one friend list tuple
pub const FRIEND_ENTRY_LEN: usize = 7;

/// Minimum width of one mail list tuple
pub const MAIL_ENTRY_MIN_LEN: usize = 8;
