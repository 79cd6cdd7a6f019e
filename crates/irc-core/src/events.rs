//! Tagged sum of event variants emitted to the listener sink. Replaces the deep inheritance /
//! marker-interface style of the original (`GenericChannelUserEvent` and friends) — a capability
//! predicate like "this happened in a channel" is just a match on the variant.

use std::net::SocketAddr;

use irc_core_common::ChanName;
use irc_core_wire::UserHostmask;

use crate::error::{IoError, IrcError};
use crate::snapshot::DaoSnapshot;

#[derive(Debug)]
pub enum Event {
    ConnectAttemptStart {
        attempt: u64,
    },
    /// `failures` preserves the order candidates were tried in, one entry per `(host, port)` that
    /// failed this attempt.
    ConnectAttemptFailed {
        remaining_attempts: Option<u64>,
        failures: Vec<IoError>,
    },
    /// Socket handshake reached protocol registration stage (`INIT -> CONNECTED`).
    Connect,
    /// `cause` is `None` for a clean shutdown the caller requested.
    Disconnect {
        snapshot: Option<DaoSnapshot>,
        cause: Option<DisconnectCause>,
    },

    NickChange {
        old_nick: String,
        new_nick: String,
    },

    Message {
        from: UserHostmask,
        target: MessageTarget,
        text: String,
    },
    Notice {
        from: Option<UserHostmask>,
        target: MessageTarget,
        text: String,
    },

    Join {
        chan: ChanName,
        who: UserHostmask,
    },
    Part {
        chan: ChanName,
        who: UserHostmask,
        message: Option<String>,
    },
    Kick {
        chan: ChanName,
        by: UserHostmask,
        target_nick: String,
        comment: Option<String>,
    },
    Quit {
        who: UserHostmask,
        message: Option<String>,
        channels: Vec<ChanName>,
    },

    /// One event per mode letter in the mode string (spec §4.3 "emit per-letter events"), rather
    /// than one event for the whole string — callers that want level/op-up notifications don't
    /// have to re-tokenize `modestring` themselves.
    Mode {
        target: ModeTarget,
        by: Option<UserHostmask>,
        adding: bool,
        letter: char,
        arg: Option<String>,
    },
    Topic {
        chan: ChanName,
        by: Option<UserHostmask>,
        topic: Option<String>,
    },
    Invite {
        chan: ChanName,
        by: UserHostmask,
        target_nick: String,
    },
    Away {
        who: UserHostmask,
        message: Option<String>,
    },
    /// `account-notify` CAP.
    Account {
        who: UserHostmask,
        account: Option<String>,
    },

    Cap {
        subcommand: String,
        params: Vec<String>,
    },

    ActionCtcp {
        from: UserHostmask,
        target: MessageTarget,
        text: String,
    },
    VersionRequest {
        from: UserHostmask,
    },
    /// TIME/PING/FINGER/CLIENTINFO CTCP requests: known sub-protocols the core doesn't answer
    /// itself (answering is an application policy choice), surfaced uniformly.
    CtcpRequest {
        from: UserHostmask,
        kind: String,
        args: String,
    },
    UnknownCtcp {
        from: UserHostmask,
        command: String,
        args: String,
    },
    Dcc {
        from: UserHostmask,
        record: crate::dcc::DccRecordInfo,
        peer_addr: SocketAddr,
    },

    Whois(Box<WhoisEvent>),
    Who {
        chan: ChanName,
        entries: Vec<WhoEntry>,
    },

    ChannelJoinError {
        chan: ChanName,
        message: String,
    },

    /// A caught exception: either a line the parser couldn't handle, or a listener handler panic/
    /// error. Never propagates into protocol state (spec §7).
    Exception {
        message: String,
    },

    IrcError(IrcError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageTarget {
    Chan(ChanName),
    User(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModeTarget {
    Chan(ChanName),
    User(String),
}

#[derive(Debug)]
pub struct WhoisEvent {
    pub nick: String,
    pub login: Option<String>,
    pub hostname: Option<String>,
    pub realname: Option<String>,
    pub server: Option<String>,
    pub server_info: Option<String>,
    pub is_operator: bool,
    pub idle_seconds: Option<u64>,
    pub channels: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct WhoEntry {
    pub nick: String,
    pub login: String,
    pub hostname: String,
    pub server: String,
    pub realname: String,
    pub is_away: bool,
    pub is_operator: bool,
}

#[derive(Debug)]
pub enum DisconnectCause {
    Io(IoError),
    Irc(IrcError),
    Error(String),
    Requested,
}
