//! Engine configuration. This is the in-process equivalent of the Java original's bot builder —
//! in scope per the external interfaces list, unlike a YAML-file reader for it (out of scope;
//! build values directly, or read your own config format and construct `EngineConfig`).

use std::time::Duration;

use irc_core_common::ChanName;

/// One entry in the `servers` list: a `(hostname, port)` pair tried in order.
#[derive(Debug, Clone)]
pub struct ServerEntry {
    pub host: String,
    pub port: u16,
}

impl ServerEntry {
    pub fn new(host: impl Into<String>, port: u16) -> ServerEntry {
        ServerEntry {
            host: host.into(),
            port,
        }
    }
}

/// SASL PLAIN authentication credentials.
#[derive(Debug, Clone)]
pub struct SaslAuth {
    pub username: String,
    pub password: String,
}

/// WEBIRC gateway credentials (for bots proxying on behalf of web clients).
#[derive(Debug, Clone)]
pub struct WebircAuth {
    pub password: String,
    pub username: String,
    pub hostname: String,
    pub address: String,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Servers to try, in order. DNS is resolved, and each resolved IP tried in order, for each
    /// entry before moving to the next.
    pub servers: Vec<ServerEntry>,

    /// Use TLS for all server entries.
    pub tls: bool,

    pub name: String,
    pub login: String,
    pub real_name: String,

    /// Fallback nicks to try, in order, if `name` (the primary registration nick, spec §6) is
    /// taken. If those are also all taken, registration fails with
    /// `IrcErrorReason::NickCollision`.
    pub nick_alternatives: Vec<String>,

    pub server_password: Option<String>,
    pub webirc: Option<WebircAuth>,

    /// Negotiate IRCv3 CAP at all.
    pub cap_enabled: bool,
    /// Capabilities to REQ once CAP LS responds, subject to server support.
    pub capabilities: Vec<String>,

    pub sasl_auth: Option<SaslAuth>,

    pub auto_reconnect: bool,
    /// -1 means infinite. Counts attempts since the last successful registration (see
    /// `Connection::in_run_attempts`).
    pub auto_reconnect_attempts: i64,
    pub auto_reconnect_delay: Duration,

    pub socket_connect_timeout: Duration,
    /// Also used by the keepalive pinger as its liveness timeout.
    pub socket_timeout: Duration,

    pub local_address: Option<std::net::IpAddr>,

    /// Maximum line length, including the CRLF terminator. Default 512 per RFC 2812.
    pub max_line_length: usize,

    pub ident_server_enabled: bool,

    pub snapshots_enabled: bool,
    pub shutdown_hook_enabled: bool,

    /// Minimum spacing between non-bypass outbound lines.
    pub message_delay: Duration,

    /// Channels to join once registration completes (and to re-join, with the same keys, on
    /// reconnect). Channels joined/parted at runtime update `Client`'s own bookkeeping instead, see
    /// `Connection::reconnect_channels`.
    pub auto_join: Vec<(ChanName, Option<String>)>,
}

impl EngineConfig {
    /// A config with every optional feature disabled and IRC-standard defaults otherwise. Callers
    /// fill in `servers`/`name`/`login`/`real_name`/`nick_alternatives` and flip on what they need.
    pub fn new(
        name: impl Into<String>,
        login: impl Into<String>,
        real_name: impl Into<String>,
        nick_alternatives: Vec<String>,
    ) -> EngineConfig {
        EngineConfig {
            servers: Vec::new(),
            tls: false,
            name: name.into(),
            login: login.into(),
            real_name: real_name.into(),
            nick_alternatives,
            server_password: None,
            webirc: None,
            cap_enabled: false,
            capabilities: Vec::new(),
            sasl_auth: None,
            auto_reconnect: true,
            auto_reconnect_attempts: -1,
            auto_reconnect_delay: Duration::from_secs(15),
            socket_connect_timeout: Duration::from_secs(10),
            socket_timeout: Duration::from_secs(60),
            local_address: None,
            max_line_length: 512,
            ident_server_enabled: false,
            snapshots_enabled: true,
            shutdown_hook_enabled: false,
            message_delay: Duration::from_millis(500),
            auto_join: Vec::new(),
        }
    }
}
