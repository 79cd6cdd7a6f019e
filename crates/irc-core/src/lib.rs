#![recursion_limit = "512"]
#![allow(clippy::cognitive_complexity)]

mod config;
mod dao;
mod dcc;
mod error;
mod events;
mod identd;
mod identity;
mod listener;
mod output;
mod parser;
mod pinger;
mod serverinfo;
mod snapshot;
mod stream;
mod utils;

pub use irc_core_common::{CaseMapping, ChanName, ChanNameRef};
pub use irc_core_wire as wire;
pub use irc_core_wire::UserHostmask;

pub use config::{EngineConfig, SaslAuth, ServerEntry, WebircAuth};
pub use dao::{Channel, ChannelTopic, User, UserLevel};
pub use dcc::{DccHandler, DccRecordInfo, DccType};
pub use error::{EngineError, IoError, IrcError, IrcErrorReason};
pub use events::{DisconnectCause, Event, MessageTarget, ModeTarget, WhoEntry, WhoisEvent};
pub use identd::{IdentKey, IdentServer};
pub use listener::{ChannelEventSink, EventSink};
pub use serverinfo::ServerInfo;
pub use snapshot::{ChannelSnapshot, DaoSnapshot, UserSnapshot};
pub use stream::{DefaultSocketFactory, SocketFactory, Stream, StreamError};

use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::FutureExt;
use futures::select;
use tokio::io::AsyncReadExt;
use tokio::sync::{mpsc, Notify};

use output::{CapFacade, IrcFacade, Raw};
use parser::{InputParser, ParseOutcome};
use pinger::Pinger;

#[macro_use]
extern crate log;

//
// Public API
//

/// One line a caller asked to send, queued for the main loop to forward to whichever socket is
/// live for the current connection attempt (there is no live socket between attempts: the line is
/// just dropped, same as a `Raw::send` on a lagging/closed writer).
enum Cmd {
    Raw(String),
    RawNow(String),
    Quit(Option<String>),
}

/// What the state mutex guards (spec §4.1, §5): the INIT/CONNECTED/DISCONNECTED phase plus the
/// bits that have to survive a reconnect (the attempt counters, the channels to rejoin).
struct ConnState {
    phase: Phase,
    stop_reconnect: bool,
    /// Channels (with keys) currently joined, captured right before tearing a connection down so
    /// the next registration can rejoin them (spec scenario S5).
    reconnect_channels: Vec<(ChanName, Option<String>)>,
    total_attempts: u64,
    /// Attempts since the last successful registration; reset to 0 on `ParseOutcome::Registered`
    /// (open question in spec §9, resolved that way — see DESIGN.md).
    in_run_attempts: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Init,
    Connected,
    Disconnected,
}

/// Forwards every event to the caller's sink, additionally handing `Event::Dcc` records to the
/// configured `DccHandler` collaborator before the event reaches the sink (spec §6: "the engine
/// unwraps the CTCP DCC framing and hands the parsed record to whatever implements this").
struct DccDispatchSink<'a> {
    inner: &'a mut dyn EventSink,
    dcc_handler: Option<&'a Mutex<dyn DccHandler>>,
}

impl<'a> EventSink for DccDispatchSink<'a> {
    fn on_event(&mut self, event: Event) {
        if let Event::Dcc { from, record, peer_addr } = &event {
            if let Some(dcc) = self.dcc_handler {
                dcc.lock().unwrap().handle_dcc(from.clone(), record.clone(), *peer_addr);
            }
        }
        self.inner.on_event(event);
    }
}

/// The connection lifecycle engine (spec §4.1). One instance owns exactly one outbound connection
/// attempt at a time; `start` drives DNS fan-out, registration, the read loop, and reconnection
/// until a caller asks it to stop or the retry budget runs out. Cheap to clone: every clone shares
/// the same state and can call the output methods or `stop_reconnect`/`close` concurrently with
/// the clone that's running `start`.
#[derive(Clone)]
pub struct Client {
    config: Arc<EngineConfig>,
    socket_factory: Arc<dyn SocketFactory>,
    ident_server: Option<Arc<dyn IdentServer>>,
    dcc_handler: Option<Arc<Mutex<dyn DccHandler>>>,
    parser: Arc<Mutex<InputParser>>,
    state: Arc<Mutex<ConnState>>,
    close_notify: Arc<Notify>,
    started: Arc<AtomicBool>,
    shutdown_hook_installed: Arc<AtomicBool>,
    cmd_tx: mpsc::Sender<Cmd>,
    cmd_rx: Arc<Mutex<Option<mpsc::Receiver<Cmd>>>>,
}

impl Client {
    /// A client with the default socket factory and no ident/DCC collaborators. Use
    /// [`Client::with_collaborators`] to plug in your own.
    pub fn new(config: EngineConfig) -> Client {
        Client::with_collaborators(config, Arc::new(DefaultSocketFactory), None, None)
    }

    pub fn with_collaborators(
        config: EngineConfig,
        socket_factory: Arc<dyn SocketFactory>,
        ident_server: Option<Arc<dyn IdentServer>>,
        dcc_handler: Option<Arc<Mutex<dyn DccHandler>>>,
    ) -> Client {
        let seed_nick = config.name.clone();
        let (cmd_tx, cmd_rx) = mpsc::channel(100);
        Client {
            config: Arc::new(config),
            socket_factory,
            ident_server,
            dcc_handler,
            parser: Arc::new(Mutex::new(InputParser::new(&seed_nick))),
            state: Arc::new(Mutex::new(ConnState {
                phase: Phase::Init,
                stop_reconnect: false,
                reconnect_channels: Vec::new(),
                total_attempts: 0,
                in_run_attempts: 0,
            })),
            close_notify: Arc::new(Notify::new()),
            started: Arc::new(AtomicBool::new(false)),
            shutdown_hook_installed: Arc::new(AtomicBool::new(false)),
            cmd_tx,
            cmd_rx: Arc::new(Mutex::new(Some(cmd_rx))),
        }
    }

    /// Runs the reconnect loop until a caller stops it, the retry budget is exhausted, or the
    /// server refuses registration for a non-transient reason. Calling this a second time on the
    /// same `Client` (from any clone) is a programming error: it panics, the same way calling
    /// `shutdown` twice would in the original design.
    pub async fn start(&self, sink: impl EventSink + 'static) -> Result<(), EngineError> {
        if self.started.swap(true, Ordering::SeqCst) {
            panic!("Client::start called twice on the same connection");
        }
        let cmd_rx = self
            .cmd_rx
            .lock()
            .unwrap()
            .take()
            .expect("Client::start called twice on the same connection");
        let mut sink = Box::new(sink) as Box<dyn EventSink>;
        let result = self.run(cmd_rx, sink.as_mut()).await;
        sink.shutdown();
        if let Some(dcc) = &self.dcc_handler {
            dcc.lock().unwrap().close();
        }
        result
    }

    /// No more reconnect attempts after the current one ends (spec §4.1 `stopReconnect`).
    /// Idempotent.
    pub fn stop_reconnect(&self) {
        self.state.lock().unwrap().stop_reconnect = true;
    }

    /// Forcibly shuts the live socket, if there is one. The read loop observes this and treats it
    /// like the caller asked to disconnect (spec §4.1 `close`). Safe to call at any time,
    /// including when there's no connection currently up.
    pub fn close(&self) {
        self.close_notify.notify_waiters();
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().unwrap().phase == Phase::Connected
    }

    pub fn current_nick(&self) -> String {
        self.parser.lock().unwrap().dao().bot_nick().to_owned()
    }

    pub fn is_logged_in(&self) -> bool {
        self.parser.lock().unwrap().logged_in()
    }

    pub fn server_info(&self) -> ServerInfo {
        self.parser.lock().unwrap().server_info().clone()
    }

    pub fn get_channel(&self, name: &ChanNameRef) -> Option<Channel> {
        self.parser.lock().unwrap().dao().get_channel(name).cloned()
    }

    pub fn get_all_channels(&self) -> Vec<Channel> {
        self.parser.lock().unwrap().dao().get_all_channels().cloned().collect()
    }

    pub fn get_user(&self, nick: &str) -> Option<User> {
        let parser = self.parser.lock().unwrap();
        parser.dao().get_user(parser.server_info().case_mapping, nick).cloned()
    }

    pub fn get_all_users(&self) -> Vec<User> {
        self.parser.lock().unwrap().dao().get_all_users().cloned().collect()
    }

    //
    // Output: queued (flood-controlled) by default, `_now` variants bypass the queue. These are
    // the caller-facing equivalent of `output::IrcFacade`, which is reserved for the registration/
    // keepalive traffic `InputParser` itself needs to send (spec §4.4).
    //

    pub fn raw_line(&self, line: impl Into<String>) {
        self.send_cmd(Cmd::Raw(line.into()));
    }

    pub fn raw_line_now(&self, line: impl Into<String>) {
        self.send_cmd(Cmd::RawNow(line.into()));
    }

    pub fn join(&self, chan: &ChanNameRef, key: Option<&str>) {
        self.raw_line(irc_core_wire::join_with_keys(&[(chan.display(), key)]));
    }

    pub fn part(&self, chan: &ChanNameRef, reason: Option<&str>) {
        self.raw_line(irc_core_wire::part(chan.display(), reason));
    }

    pub fn privmsg(&self, target: &str, msg: &str) {
        self.raw_line(irc_core_wire::privmsg(target, msg));
    }

    pub fn action(&self, target: &str, msg: &str) {
        self.raw_line(irc_core_wire::action(target, msg));
    }

    pub fn notice(&self, target: &str, msg: &str) {
        self.raw_line(irc_core_wire::notice(target, msg));
    }

    pub fn nick(&self, new_nick: &str) {
        self.raw_line(irc_core_wire::nick(new_nick));
    }

    pub fn away(&self, msg: Option<&str>) {
        self.raw_line(irc_core_wire::away(msg));
    }

    pub fn mode(&self, target: &str, modestring: &str, args: &[&str]) {
        self.raw_line(irc_core_wire::mode(target, modestring, args));
    }

    pub fn topic(&self, chan: &ChanNameRef, topic: Option<&str>) {
        self.raw_line(irc_core_wire::topic(chan.display(), topic));
    }

    pub fn kick(&self, chan: &ChanNameRef, nick: &str, reason: Option<&str>) {
        self.raw_line(irc_core_wire::kick(chan.display(), nick, reason));
    }

    pub fn invite(&self, nick: &str, chan: &ChanNameRef) {
        self.raw_line(irc_core_wire::invite(nick, chan.display()));
    }

    pub fn whois(&self, nick: &str) {
        self.raw_line(irc_core_wire::whois(nick));
    }

    pub fn who(&self, mask: &str) {
        self.raw_line(irc_core_wire::who(mask));
    }

    pub fn names(&self, chan: &ChanNameRef) {
        self.raw_line(irc_core_wire::names(chan.display()));
    }

    /// Sends a CTCP DCC request (e.g. a SEND/CHAT offer) to `target`. The inbound half (parsing
    /// and dispatching to the `DccHandler` collaborator) lives in `InputParser`/`dcc`.
    pub fn dcc_request(&self, target: &str, args: &str) {
        self.raw_line(irc_core_wire::ctcp_request(target, "DCC", Some(args)));
    }

    /// Requests a clean disconnect: sends QUIT (bypassing the flood queue) and lets the read loop
    /// observe the server close (or our own EOF after flushing). Does not itself stop reconnects;
    /// pair with `stop_reconnect` for a permanent shutdown.
    pub fn quit(&self, reason: Option<String>) {
        self.send_cmd(Cmd::Quit(reason));
    }

    /// Splits `msg` into chunks that fit a PRIVMSG/NOTICE to `target` within the configured max
    /// line length, accounting for our own hostmask the way the server will echo it back to other
    /// members (conservative worst case if we don't know our hostname yet). Adapted from the
    /// teacher's own `Client::split_message`.
    pub fn split_message<'a>(&self, target: &str, msg: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        let bot_nick = self.current_nick();
        let overhead = irc_core_wire::privmsg(target, "").len() + bot_nick.len() + "!~x@255.255.255.255".len();
        let limit = self.config.max_line_length.saturating_sub(overhead + 2);
        utils::split_iterator(msg, limit)
    }

    fn send_cmd(&self, cmd: Cmd) {
        if let Err(err) = self.cmd_tx.try_send(cmd) {
            debug!("dropping a command, main loop lagging or gone: {:?}", err);
        }
    }

    async fn run(&self, mut cmd_rx: mpsc::Receiver<Cmd>, sink: &mut dyn EventSink) -> Result<(), EngineError> {
        loop {
            let attempt = {
                let mut st = self.state.lock().unwrap();
                st.total_attempts += 1;
                st.in_run_attempts += 1;
                st.total_attempts
            };
            sink.on_event(Event::ConnectAttemptStart { attempt });

            match self.connect_once().await {
                Ok((stream, connected_host, connected_port)) => {
                    let cause = self
                        .run_connection(stream, connected_host, connected_port, &mut cmd_rx, sink)
                        .await;
                    match cause {
                        Some(DisconnectCause::Irc(err)) if !err.reason.is_transient() => {
                            self.teardown(Some(DisconnectCause::Irc(err.clone())), sink);
                            return Err(EngineError::Irc(err));
                        }
                        other => self.teardown(other, sink),
                    }
                    if self.state.lock().unwrap().stop_reconnect {
                        return Ok(());
                    }
                }
                Err(failures) => {
                    let remaining = self.remaining_attempts();
                    sink.on_event(Event::ConnectAttemptFailed { remaining_attempts: remaining, failures });
                    if self.state.lock().unwrap().stop_reconnect {
                        return Ok(());
                    }
                    if !self.config.auto_reconnect || remaining == Some(0) {
                        return Err(EngineError::Io(IoError {
                            host: self.config.servers.first().map(|s| s.host.clone()).unwrap_or_default(),
                            port: self.config.servers.first().map(|s| s.port).unwrap_or(0),
                            source: std::io::Error::new(std::io::ErrorKind::Other, "exhausted all servers"),
                        }));
                    }
                }
            }

            if !self.config.auto_reconnect {
                return Ok(());
            }
            if !self.interruptible_sleep(self.config.auto_reconnect_delay).await {
                return Ok(());
            }
            if self.state.lock().unwrap().stop_reconnect {
                return Ok(());
            }
        }
    }

    /// DNS-resolves and tries every `(host, port)` entry in order, and every resolved IP for each
    /// entry in order, returning the first socket that connects (spec §4.1 step 4). On total
    /// failure, returns every attempt's `IoError` in the order they were tried.
    async fn connect_once(&self) -> Result<(Stream, String, u16), Vec<IoError>> {
        let mut failures = Vec::new();
        for entry in &self.config.servers {
            let addrs = match resolve(entry.host.clone(), entry.port).await {
                Ok(addrs) => addrs,
                Err(source) => {
                    failures.push(IoError { host: entry.host.clone(), port: entry.port, source });
                    continue;
                }
            };
            for addr in addrs {
                let attempt = tokio::time::timeout(
                    self.config.socket_connect_timeout,
                    self.socket_factory
                        .connect(addr, &entry.host, self.config.tls, self.config.local_address),
                )
                .await;
                match attempt {
                    Ok(Ok(stream)) => return Ok((stream, entry.host.clone(), entry.port)),
                    Ok(Err(err)) => failures.push(IoError {
                        host: entry.host.clone(),
                        port: entry.port,
                        source: to_io_error(err),
                    }),
                    Err(_elapsed) => failures.push(IoError {
                        host: entry.host.clone(),
                        port: entry.port,
                        source: std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"),
                    }),
                }
            }
        }
        Err(failures)
    }

    /// Runs one live connection end to end: ident registration, the registration handshake, and
    /// the read loop. Returns the cause the connection ended for, if any is known.
    async fn run_connection(
        &self,
        stream: Stream,
        connected_host: String,
        connected_port: u16,
        cmd_rx: &mut mpsc::Receiver<Cmd>,
        sink: &mut dyn EventSink,
    ) -> Option<DisconnectCause> {
        let peer_addr = stream.peer_addr().ok();
        let local_addr = stream.local_addr().ok();

        self.state.lock().unwrap().phase = Phase::Connected;

        let ident_key = match (peer_addr, local_addr) {
            (Some(peer), Some(local)) if self.config.ident_server_enabled => {
                let key = IdentKey {
                    remote_addr: peer.ip(),
                    remote_port: peer.port(),
                    local_port: local.port(),
                };
                if let Some(is) = &self.ident_server {
                    is.register(key, self.config.login.clone());
                }
                Some(key)
            }
            _ => None,
        };

        let (read_half, write_half) = tokio::io::split(stream);
        let (out_tx, out_rx) = mpsc::channel(100);
        tokio::spawn(output::spawn_writer(write_half, out_rx, self.config.message_delay));

        let raw = Raw::new(out_tx, self.config.max_line_length);
        let irc = IrcFacade::new(raw.clone());
        let cap = CapFacade::new(raw.clone());

        let seed_nick = self.config.name.clone();
        *self.parser.lock().unwrap() = InputParser::new(&seed_nick);

        let reconnect_channels = self.state.lock().unwrap().reconnect_channels.clone();

        {
            let mut parser = self.parser.lock().unwrap();
            parser.start_registration(&self.config, &irc, &cap);
        }

        let (mut pinger, mut ping_rx) = Pinger::new(self.config.socket_timeout);

        let mut read_half = read_half;
        let mut parse_buf: Vec<u8> = Vec::with_capacity(1024);
        let mut dcc_sink = DccDispatchSink { inner: sink, dcc_handler: self.dcc_handler.as_deref() };

        let cause = 'conn: loop {
            let mut read_buf = [0u8; 4096];
            select! {
                cmd = cmd_rx.recv().fuse() => {
                    match cmd {
                        None => break 'conn None,
                        Some(Cmd::Raw(line)) => raw.raw_line(line),
                        Some(Cmd::RawNow(line)) => raw.raw_line_now(line),
                        Some(Cmd::Quit(reason)) => {
                            raw.raw_line_now(irc_core_wire::quit(reason));
                            break 'conn Some(DisconnectCause::Requested);
                        }
                    }
                }
                _ = self.close_notify.notified().fuse() => break 'conn None,
                ping_ev = ping_rx.recv().fuse() => {
                    match ping_ev {
                        None | Some(pinger::Event::Disconnect) => break 'conn None,
                        Some(pinger::Event::SendPing) => {
                            irc.ping_now(&unix_timestamp_placeholder());
                        }
                    }
                }
                read = read_half.read(&mut read_buf).fuse() => {
                    match read {
                        Err(err) => {
                            break 'conn Some(DisconnectCause::Io(IoError {
                                host: connected_host.clone(),
                                port: connected_port,
                                source: err,
                            }));
                        }
                        Ok(0) => break 'conn None,
                        Ok(n) => {
                            parse_buf.extend_from_slice(&read_buf[..n]);
                            let mut fatal = None;
                            while let Some(parsed) = irc_core_wire::parse_irc_msg(&mut parse_buf) {
                                pinger.reset();
                                match parsed {
                                    Err(err) => {
                                        dcc_sink.on_event(Event::Exception { message: format!("parsing line: {}", err) });
                                    }
                                    Ok(msg) => {
                                        let outcome = {
                                            let mut parser = self.parser.lock().unwrap();
                                            parser.handle_line(
                                                msg,
                                                &self.config,
                                                &reconnect_channels,
                                                &irc,
                                                &cap,
                                                &mut dcc_sink,
                                            )
                                        };
                                        match outcome {
                                            ParseOutcome::Continue => {}
                                            ParseOutcome::Registered => {
                                                self.state.lock().unwrap().in_run_attempts = 0;
                                                self.maybe_install_shutdown_hook();
                                            }
                                            ParseOutcome::Fatal(err) => {
                                                fatal = Some(err);
                                                break;
                                            }
                                        }
                                    }
                                }
                            }
                            if let Some(err) = fatal {
                                break 'conn Some(DisconnectCause::Irc(err));
                            }
                        }
                    }
                }
            }
        };

        if let Some(key) = ident_key {
            if let Some(is) = &self.ident_server {
                is.unregister(key);
            }
        }

        // An ERROR line, if one arrived, is a richer cause than a bare EOF/IO error.
        let from_error_line = self.parser.lock().unwrap().take_disconnect_cause();
        from_error_line.or(cause)
    }

    /// Captures reconnect-channel state, emits `Disconnect`, and moves the phase to DISCONNECTED.
    /// Shared between the "attempt ended cleanly/fatally" and "never connected" paths.
    fn teardown(&self, cause: Option<DisconnectCause>, sink: &mut dyn EventSink) {
        let snapshot = if self.config.snapshots_enabled {
            let parser = self.parser.lock().unwrap();
            Some(parser.dao().create_snapshot(parser.server_info()))
        } else {
            None
        };

        let next_reconnect_channels = if self.config.auto_reconnect {
            let parser = self.parser.lock().unwrap();
            parser
                .dao()
                .get_all_channels()
                .map(|c| (c.name.clone(), c.key.clone()))
                .collect()
        } else {
            Vec::new()
        };

        {
            let mut st = self.state.lock().unwrap();
            st.phase = Phase::Disconnected;
            st.reconnect_channels = next_reconnect_channels;
        }

        sink.on_event(Event::Disconnect { snapshot, cause });
    }

    /// Registers a best-effort process-exit cleanup the first time a connection completes
    /// registration, if `shutdown_hook_enabled` (spec §4.1, 001 handling). Holds only weak
    /// references, so it no-ops once every `Client` handle has been dropped instead of keeping the
    /// engine alive just to answer Ctrl-C.
    fn maybe_install_shutdown_hook(&self) {
        if !self.config.shutdown_hook_enabled {
            return;
        }
        if self.shutdown_hook_installed.swap(true, Ordering::SeqCst) {
            return;
        }
        let weak_state = Arc::downgrade(&self.state);
        let weak_notify = Arc::downgrade(&self.close_notify);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            if let (Some(state), Some(notify)) = (weak_state.upgrade(), weak_notify.upgrade()) {
                state.lock().unwrap().stop_reconnect = true;
                notify.notify_waiters();
            }
        });
    }

    fn remaining_attempts(&self) -> Option<u64> {
        if self.config.auto_reconnect_attempts < 0 {
            return None;
        }
        let budget = self.config.auto_reconnect_attempts as u64;
        let used = self.state.lock().unwrap().in_run_attempts;
        Some(budget.saturating_sub(used))
    }

    /// Sleeps `duration`, but returns `false` early if `close` is called during the wait — that's
    /// treated as "give up on reconnecting", not just "disconnect the current attempt".
    async fn interruptible_sleep(&self, duration: Duration) -> bool {
        select! {
            _ = tokio::time::sleep(duration).fuse() => true,
            _ = self.close_notify.notified().fuse() => false,
        }
    }
}

fn to_io_error(err: StreamError) -> std::io::Error {
    match err {
        StreamError::IoError(e) => e,
        #[cfg(feature = "tls")]
        StreamError::TlsError(e) => std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
    }
}

/// Blocking DNS resolution, off the async executor (spec §4.1 step 4's "resolved off-thread" note
/// — std's `ToSocketAddrs` has no async equivalent).
async fn resolve(host: String, port: u16) -> Result<Vec<SocketAddr>, std::io::Error> {
    tokio::task::spawn_blocking(move || (host.as_str(), port).to_socket_addrs().map(|it| it.collect()))
        .await
        .unwrap_or_else(|join_err| Err(std::io::Error::new(std::io::ErrorKind::Other, join_err.to_string())))
}

/// Placeholder PING argument: any echoed string works as a liveness probe, the server doesn't
/// interpret it. A real timestamp isn't available without a clock dependency the rest of the
/// engine doesn't otherwise need.
fn unix_timestamp_placeholder() -> String {
    "keepalive".to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(auto_reconnect: bool) -> EngineConfig {
        let mut cfg = EngineConfig::new("bot", "bot", "Test Bot", vec!["bot".to_owned(), "bot_".to_owned()]);
        cfg.auto_reconnect = auto_reconnect;
        cfg
    }

    struct NullSink;
    impl EventSink for NullSink {
        fn on_event(&mut self, _event: Event) {}
    }

    #[derive(Default)]
    struct RecordingSink {
        events: Vec<Event>,
    }
    impl EventSink for RecordingSink {
        fn on_event(&mut self, event: Event) {
            self.events.push(event);
        }
    }

    struct RecordingDcc {
        seen: Vec<UserHostmask>,
    }
    impl DccHandler for RecordingDcc {
        fn handle_dcc(&mut self, from: UserHostmask, _record: DccRecordInfo, _peer_addr: SocketAddr) {
            self.seen.push(from);
        }
    }

    fn hostmask(nick: &str) -> UserHostmask {
        irc_core_wire::UserHostmask::new(nick)
    }

    #[test]
    fn new_client_has_init_defaults() {
        let client = Client::new(config(true));
        assert!(!client.is_connected());
        assert!(!client.is_logged_in());
        assert_eq!(client.current_nick(), "bot");
    }

    #[test]
    fn remaining_attempts_is_unbounded_by_default() {
        let client = Client::new(config(true));
        assert_eq!(client.remaining_attempts(), None);
    }

    #[test]
    fn remaining_attempts_counts_down_from_the_budget() {
        let mut cfg = config(true);
        cfg.auto_reconnect_attempts = 3;
        let client = Client::new(cfg);
        client.state.lock().unwrap().in_run_attempts = 2;
        assert_eq!(client.remaining_attempts(), Some(1));
    }

    #[test]
    fn split_message_breaks_long_lines_into_multiple_chunks() {
        let mut cfg = config(true);
        cfg.max_line_length = 40;
        let client = Client::new(cfg);
        let msg = "this message is much longer than the configured line length allows for one line";
        let chunks: Vec<&str> = client.split_message("#chan", msg).collect();
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.len() <= 40);
        }
    }

    #[tokio::test]
    async fn connect_once_with_no_servers_configured_fails_with_no_attempts() {
        let client = Client::new(config(true));
        let failures = client.connect_once().await.expect_err("no servers should never succeed");
        assert!(failures.is_empty());
    }

    #[tokio::test]
    async fn start_gives_up_immediately_when_reconnect_is_disabled_and_dialing_fails() {
        let client = Client::new(config(false));
        let result = client.start(NullSink).await;
        assert!(matches!(result, Err(EngineError::Io(_))));
    }

    #[tokio::test]
    #[should_panic(expected = "twice")]
    async fn starting_the_same_client_twice_panics() {
        let client = Client::new(config(false));
        let _ = client.start(NullSink).await;
        let _ = client.start(NullSink).await;
    }

    #[test]
    fn teardown_captures_joined_channels_for_the_next_reconnect_when_enabled() {
        let client = Client::new(config(true));
        {
            let mut parser = client.parser.lock().unwrap();
            let cid = parser.dao_mut().get_or_create_channel(ChanNameRef::new("#rust"));
            parser.dao_mut().get_channel_mut(cid).unwrap().key = Some("secret".to_owned());
        }
        let mut sink = RecordingSink::default();
        client.teardown(Some(DisconnectCause::Requested), &mut sink);

        let state = client.state.lock().unwrap();
        assert_eq!(state.phase, Phase::Disconnected);
        assert_eq!(state.reconnect_channels.len(), 1);
        assert_eq!(state.reconnect_channels[0].1, Some("secret".to_owned()));
        assert!(matches!(sink.events.last(), Some(Event::Disconnect { .. })));
    }

    #[test]
    fn teardown_drops_reconnect_channels_when_auto_reconnect_is_disabled() {
        let client = Client::new(config(false));
        {
            let mut parser = client.parser.lock().unwrap();
            parser.dao_mut().get_or_create_channel(ChanNameRef::new("#rust"));
        }
        let mut sink = NullSink;
        client.teardown(None, &mut sink);
        assert!(client.state.lock().unwrap().reconnect_channels.is_empty());
    }

    #[test]
    fn dcc_dispatch_sink_forwards_to_both_the_handler_and_the_caller_sink() {
        let mut inner = RecordingSink::default();
        let dcc = Mutex::new(RecordingDcc { seen: Vec::new() });
        {
            let mut dispatch = DccDispatchSink { inner: &mut inner, dcc_handler: Some(&dcc) };
            dispatch.on_event(Event::Dcc {
                from: hostmask("alice"),
                record: DccRecordInfo {
                    dcc_type: DccType::CHAT,
                    argument: "chat".to_owned(),
                    file_size: None,
                },
                peer_addr: "127.0.0.1:1234".parse().unwrap(),
            });
        }
        assert_eq!(dcc.lock().unwrap().seen, vec![hostmask("alice")]);
        assert_eq!(inner.events.len(), 1);
    }
}
