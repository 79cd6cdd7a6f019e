#![allow(clippy::write_with_newline)]

//! IRC wire protocol message parsers and generators.
//!
//! This library is for implementing clients rather than servers or services, and does not support
//! the IRC message format in full generality. Covers RFC 1459 / RFC 2812 line grammar, the CTCP
//! sub-protocol, and the handful of IRCv3 extensions (CAP, SASL AUTHENTICATE, away-notify,
//! account-notify) the core engine needs.

use std::str;

use irc_core_common::ChanName;

pub fn pass(pass: &str) -> String {
    format!("PASS {}\r\n", pass)
}

// FIXME: Option<String> because going from Option<String> to Option<&str> is too painful...
pub fn quit(reason: Option<String>) -> String {
    match reason {
        None => "QUIT\r\n".to_string(),
        Some(reason) => format!("QUIT :{}\r\n", reason),
    }
}

pub fn user(hostname: &str, realname: &str) -> String {
    format!("USER {} 8 * :{}\r\n", hostname, realname)
}

pub fn nick(arg: &str) -> String {
    format!("NICK {}\r\n", arg)
}

pub fn ping(arg: &str) -> String {
    format!("PING {}\r\n", arg)
}

pub fn pong(arg: &str) -> String {
    format!("PONG {}\r\n", arg)
}

pub fn join<'a, I>(chans: I) -> String
where
    I: IntoIterator<Item = &'a ChanName>,
{
    let chans = chans.into_iter().map(|c| c.display()).collect::<Vec<_>>();
    format!("JOIN {}\r\n", chans.join(","))
}

pub fn join_with_keys(chans: &[(&str, Option<&str>)]) -> String {
    let names = chans.iter().map(|(c, _)| *c).collect::<Vec<_>>().join(",");
    let keys: Vec<&str> = chans.iter().filter_map(|(_, k)| *k).collect();
    if keys.is_empty() {
        format!("JOIN {}\r\n", names)
    } else {
        format!("JOIN {} {}\r\n", names, keys.join(","))
    }
}

pub fn part(chan: &str, reason: Option<&str>) -> String {
    match reason {
        None => format!("PART {}\r\n", chan),
        Some(reason) => format!("PART {} :{}\r\n", chan, reason),
    }
}

pub fn privmsg(msgtarget: &str, msg: &str) -> String {
    // IRC messages need to be shorter than 512 bytes (see RFC 1459 or 2812). This should be dealt
    // with at call sites as we can't show how we split messages into multiple messages in the UI
    // at this point.
    assert!(msgtarget.len() + msg.len() + 12 <= 512);
    format!("PRIVMSG {} :{}\r\n", msgtarget, msg)
}

pub fn notice(msgtarget: &str, msg: &str) -> String {
    assert!(msgtarget.len() + msg.len() + 11 <= 512);
    format!("NOTICE {} :{}\r\n", msgtarget, msg)
}

pub fn action(msgtarget: &str, msg: &str) -> String {
    assert!(msgtarget.len() + msg.len() + 21 <= 512); // See comments in `privmsg`
    format!("PRIVMSG {} :\x01ACTION {}\x01\r\n", msgtarget, msg)
}

pub fn away(msg: Option<&str>) -> String {
    match msg {
        None => "AWAY\r\n".to_string(),
        Some(msg) => format!("AWAY :{}\r\n", msg),
    }
}

pub fn mode(target: &str, modestring: &str, args: &[&str]) -> String {
    if args.is_empty() {
        format!("MODE {} {}\r\n", target, modestring)
    } else {
        format!("MODE {} {} {}\r\n", target, modestring, args.join(" "))
    }
}

pub fn topic(chan: &str, topic: Option<&str>) -> String {
    match topic {
        None => format!("TOPIC {}\r\n", chan),
        Some(topic) => format!("TOPIC {} :{}\r\n", chan, topic),
    }
}

pub fn kick(chan: &str, nick: &str, reason: Option<&str>) -> String {
    match reason {
        None => format!("KICK {} {}\r\n", chan, nick),
        Some(reason) => format!("KICK {} {} :{}\r\n", chan, nick, reason),
    }
}

pub fn invite(nick: &str, chan: &str) -> String {
    format!("INVITE {} {}\r\n", nick, chan)
}

pub fn whois(nick: &str) -> String {
    format!("WHOIS {}\r\n", nick)
}

pub fn who(mask: &str) -> String {
    format!("WHO {}\r\n", mask)
}

pub fn names(chan: &str) -> String {
    format!("NAMES {}\r\n", chan)
}

pub fn cap_ls() -> String {
    "CAP LS 302\r\n".to_string()
}

pub fn cap_req(cap_identifiers: &[&str]) -> String {
    format!("CAP REQ :{}\r\n", cap_identifiers.join(" "))
}

pub fn cap_end() -> String {
    "CAP END\r\n".to_string()
}

pub fn authenticate(msg: &str) -> String {
    format!("AUTHENTICATE {}\r\n", msg)
}

pub fn ctcp_request(target: &str, command: &str, args: Option<&str>) -> String {
    match args {
        None => format!("PRIVMSG {} :\x01{}\x01\r\n", target, command),
        Some(args) => format!("PRIVMSG {} :\x01{} {}\x01\r\n", target, command, args),
    }
}

/// A user identity as it appears in a message prefix: `nick!login@host`. Any part may be
/// unknown — servers may omit `login`/`host` for their own messages, and `Pfx::Ambiguous`
/// carries a bare name with neither.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct UserHostmask {
    pub nick: String,
    pub login: Option<String>,
    pub hostname: Option<String>,
}

impl UserHostmask {
    pub fn new(nick: impl Into<String>) -> UserHostmask {
        UserHostmask {
            nick: nick.into(),
            login: None,
            hostname: None,
        }
    }

    /// `nick!login@host`, omitting parts that are unknown.
    pub fn display(&self) -> String {
        match (&self.login, &self.hostname) {
            (Some(login), Some(host)) => format!("{}!{}@{}", self.nick, login, host),
            (Some(login), None) => format!("{}!{}", self.nick, login),
            (None, Some(host)) => format!("{}@{}", self.nick, host),
            (None, None) => self.nick.clone(),
        }
    }
}

/// Sender of a message ("prefix" in the RFC). Instead of returning a `String` we parse prefix part
/// of the message according to the RFC because users of this library sometimes need to distinguish
/// a server from a user.
///
/// (Note that the ambiguity in the RFC makes this a best-effort thing. When we get a message from
/// e.g. "foo" it's not possible to know whether "foo" is a server or a user.)
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Pfx {
    /// Sender is a server.
    Server(String),

    /// Sender is a user.
    User(UserHostmask),

    /// Could be a server or nick, it's unclear. According to the RFC if we have something
    /// like "localhost" which doesn't have '!', '@', or a character that 'servername' can have but
    /// 'nickname' cannot, we can't tell whether the sender is a server or a nick. In those cases
    /// we return this variant.
    Ambiguous(String),
}

impl Pfx {
    /// Nick if this prefix names a user (treating the ambiguous case as a nick, which is the
    /// right call in membership contexts — bare names there are always nicks).
    pub fn nick(&self) -> Option<&str> {
        match self {
            Pfx::User(hostmask) => Some(&hostmask.nick),
            Pfx::Ambiguous(name) => Some(name),
            Pfx::Server(_) => None,
        }
    }
}

// RFC 2812 section 2.3.1
fn parse_pfx(pfx: &str) -> Pfx {
    match pfx.find(&['!', '@'][..]) {
        Some(idx) => {
            let nick = pfx[..idx].to_owned();
            let rest = &pfx[idx..];
            let (login, hostname) = match rest.find('@') {
                Some(at_idx) if rest.as_bytes()[0] == b'!' => {
                    let login = &rest[1..at_idx];
                    let host = &rest[at_idx + 1..];
                    (
                        if login.is_empty() {
                            None
                        } else {
                            Some(login.to_owned())
                        },
                        Some(host.to_owned()),
                    )
                }
                Some(at_idx) => (None, Some(rest[at_idx + 1..].to_owned())),
                None => (Some(rest[1..].to_owned()), None),
            };
            Pfx::User(UserHostmask {
                nick,
                login,
                hostname,
            })
        }
        None => {
            // Chars that nicks can have but servernames cannot
            match pfx.find(&['[', ']', '\\', '`', '_', '^', '{', '|', '}'][..]) {
                Some(_) => Pfx::User(UserHostmask::new(pfx.to_owned())),
                None => {
                    // Nicks can't have '.'
                    match pfx.find('.') {
                        Some(_) => Pfx::Server(pfx.to_owned()),
                        None => Pfx::Ambiguous(pfx.to_owned()),
                    }
                }
            }
        }
    }
}

/// Target of a message
///
/// Masks are not parsed, as rules for masks are not clear in RFC 2818 (for example, `#x.y` can be
/// a channel name or a host mask, there is no way to disambiguate), and in practice servers use
/// masks that are not valid according to the RFC. The rule we follow is: if a target starts with
/// a channel-type sigil it's a `Chan`, otherwise it's a `User`.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum MsgTarget {
    Chan(ChanName),
    User(String),
}

impl MsgTarget {
    pub fn parse(s: &str, chan_types: &str) -> MsgTarget {
        if s.chars().next().map(|c| chan_types.contains(c)) == Some(true) {
            MsgTarget::Chan(ChanName::new(s.to_owned()))
        } else {
            MsgTarget::User(s.to_owned())
        }
    }
}

/// A client-to-client protocol message. See <https://modern.ircdocs.horse/ctcp.html>
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum CTCP {
    Action,
    Version,
    Time,
    Ping,
    Finger,
    ClientInfo,
    Dcc,
    Other(String),
}

impl CTCP {
    fn parse(s: &str) -> CTCP {
        match s {
            "ACTION" => CTCP::Action,
            "VERSION" => CTCP::Version,
            "TIME" => CTCP::Time,
            "PING" => CTCP::Ping,
            "FINGER" => CTCP::Finger,
            "CLIENTINFO" => CTCP::ClientInfo,
            "DCC" => CTCP::Dcc,
            other => CTCP::Other(other.to_owned()),
        }
    }
}

/// An IRC command or reply
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Cmd {
    /// A PRIVMSG or NOTICE. Check `is_notice` field.
    PRIVMSG {
        target: MsgTarget,
        msg: String,
        is_notice: bool,
        ctcp: Option<(CTCP, String)>,
    },

    JOIN {
        chan: ChanName,
        key: Option<String>,
    },

    PART {
        chan: ChanName,
        msg: Option<String>,
    },

    QUIT {
        msg: Option<String>,
    },

    NICK {
        nick: String,
    },

    PING {
        server: String,
    },

    PONG {
        server: String,
    },

    ERROR {
        msg: String,
    },

    TOPIC {
        chan: ChanName,
        topic: Option<String>,
    },

    MODE {
        target: String,
        modestring: String,
        args: Vec<String>,
    },

    KICK {
        chan: ChanName,
        nick: String,
        comment: Option<String>,
    },

    INVITE {
        nick: String,
        chan: ChanName,
    },

    /// `away-notify` CAP: someone's away status changed.
    AWAY {
        msg: Option<String>,
    },

    /// `account-notify` CAP.
    ACCOUNT {
        account: Option<String>,
    },

    CAP {
        client: String,
        subcommand: String,
        params: Vec<String>,
    },

    AUTHENTICATE {
        param: String,
    },

    /// An IRC message other than the ones listed above.
    Other {
        cmd: String,
        params: Vec<String>,
    },

    /// Numeric replies are kept generic as there are just too many replies and we probably only
    /// need to handle a small subset of them.
    Reply {
        num: u16,
        params: Vec<String>,
    },
}

/// An IRC message
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Msg {
    /// Sender of a message. According to RFC 2812 it's optional:
    ///
    /// > If the prefix is missing from the message, it is assumed to have originated from the
    /// > connection from which it was received from.
    pub pfx: Option<Pfx>,
    pub cmd: Cmd,
}

/// An intermediate type used during parsing.
enum MsgType<'a> {
    Cmd(&'a str),
    Num(u16),
}

/// Try to read an IRC message off a buffer. Drops the message when parsing is successful.
/// Otherwise the buffer is left unchanged. Accepts a bare `\n` terminator too (inbound lines
/// may use CR, LF, or CRLF; only CRLF is ever produced by this crate's own generators).
pub fn parse_irc_msg(buf: &mut Vec<u8>) -> Option<Result<Msg, String>> {
    let nl_idx = buf.iter().position(|b| *b == b'\n')?;

    let mut end = nl_idx;
    if end > 0 && buf[end - 1] == b'\r' {
        end -= 1;
    }

    let msg_owned: String = String::from_utf8_lossy(&buf[0..end]).to_string();
    let msg: &str = &msg_owned;

    let ret = if msg.is_empty() {
        // Blank line (e.g. a stray CRLF): nothing to parse, nothing to report either.
        buf.drain(0..nl_idx + 1);
        return parse_irc_msg(buf);
    } else {
        parse_one_message(msg)
    };
    buf.drain(0..nl_idx + 1);

    Some(ret)
}

// NB. 'msg' does not contain the line terminator.
fn parse_one_message(mut msg: &str) -> Result<Msg, String> {
    let pfx: Option<Pfx> = {
        if let Some(':') = msg.chars().next() {
            // parse prefix
            let ws_idx = msg.find(' ').ok_or(format!(
                "Can't find prefix terminator (' ') in msg: {:?}",
                msg
            ))?;
            let pfx = &msg[1..ws_idx]; // consume ':'
            msg = &msg[ws_idx + 1..]; // consume ' '
            Some(parse_pfx(pfx))
        } else {
            None
        }
    };

    let msg_ty: MsgType = {
        let ws_idx = msg.find(' ').unwrap_or(msg.len());
        let cmd = &msg[..ws_idx];
        msg = if ws_idx == msg.len() {
            ""
        } else {
            &msg[ws_idx + 1..]
        };
        match cmd.parse::<u16>() {
            Ok(num) => MsgType::Num(num),
            Err(_) => MsgType::Cmd(cmd),
        }
    };

    let params = parse_params(msg);
    let cmd = match msg_ty {
        MsgType::Cmd("PRIVMSG") | MsgType::Cmd("NOTICE") if params.len() == 2 => {
            let is_notice = matches!(msg_ty, MsgType::Cmd("NOTICE"));
            let target = params[0];
            let body = params[1];
            let target = MsgTarget::parse(target, "#&+!");

            match parse_ctcp(body) {
                Some((kind, ctcp_args)) => Cmd::PRIVMSG {
                    target,
                    msg: ctcp_args.clone(),
                    is_notice,
                    ctcp: Some((kind, ctcp_args)),
                },
                None => Cmd::PRIVMSG {
                    target,
                    msg: body.to_owned(),
                    is_notice,
                    ctcp: None,
                },
            }
        }
        MsgType::Cmd("JOIN") if !params.is_empty() => Cmd::JOIN {
            chan: ChanName::new(params[0].to_owned()),
            key: params.get(1).map(|s| (*s).to_owned()),
        },
        MsgType::Cmd("PART") if params.len() == 1 || params.len() == 2 => {
            let mb_msg = if params.len() == 2 {
                Some(params[1].to_owned())
            } else {
                None
            };
            Cmd::PART {
                chan: ChanName::new(params[0].to_owned()),
                msg: mb_msg,
            }
        }
        MsgType::Cmd("QUIT") if params.is_empty() || params.len() == 1 => {
            let mb_msg = params.first().map(|s| (*s).to_owned());
            Cmd::QUIT { msg: mb_msg }
        }
        MsgType::Cmd("NICK") if params.len() == 1 => Cmd::NICK {
            nick: params[0].to_owned(),
        },
        MsgType::Cmd("PING") if params.len() == 1 => Cmd::PING {
            server: params[0].to_owned(),
        },
        MsgType::Cmd("PONG") if !params.is_empty() => Cmd::PONG {
            server: params[0].to_owned(),
        },
        MsgType::Cmd("ERROR") if params.len() == 1 => Cmd::ERROR {
            msg: params[0].to_owned(),
        },
        MsgType::Cmd("TOPIC") if params.len() == 1 || params.len() == 2 => Cmd::TOPIC {
            chan: ChanName::new(params[0].to_owned()),
            topic: params.get(1).map(|s| (*s).to_owned()),
        },
        MsgType::Cmd("MODE") if !params.is_empty() => Cmd::MODE {
            target: params[0].to_owned(),
            modestring: params.get(1).map(|s| (*s).to_owned()).unwrap_or_default(),
            args: params[2.min(params.len())..]
                .iter()
                .map(|s| (*s).to_owned())
                .collect(),
        },
        MsgType::Cmd("KICK") if params.len() == 2 || params.len() == 3 => Cmd::KICK {
            chan: ChanName::new(params[0].to_owned()),
            nick: params[1].to_owned(),
            comment: params.get(2).map(|s| (*s).to_owned()),
        },
        MsgType::Cmd("INVITE") if params.len() == 2 => Cmd::INVITE {
            nick: params[0].to_owned(),
            chan: ChanName::new(params[1].to_owned()),
        },
        MsgType::Cmd("AWAY") => Cmd::AWAY {
            msg: params.first().map(|s| (*s).to_owned()),
        },
        MsgType::Cmd("ACCOUNT") if params.len() == 1 => Cmd::ACCOUNT {
            account: if params[0] == "*" {
                None
            } else {
                Some(params[0].to_owned())
            },
        },
        MsgType::Cmd("CAP") if params.len() >= 2 => {
            let subcommand = params[1].to_owned();
            let cap_params = params
                .get(2)
                .map(|s| s.split(' ').map(|s| s.to_owned()).collect())
                .unwrap_or_default();
            Cmd::CAP {
                client: params[0].to_owned(),
                subcommand,
                params: cap_params,
            }
        }
        MsgType::Cmd("AUTHENTICATE") if params.len() == 1 => Cmd::AUTHENTICATE {
            param: params[0].to_owned(),
        },
        MsgType::Num(n) => Cmd::Reply {
            num: n,
            params: params.into_iter().map(|s| s.to_owned()).collect(),
        },
        MsgType::Cmd(cmd) => Cmd::Other {
            cmd: cmd.to_owned(),
            params: params.into_iter().map(|s| s.to_owned()).collect(),
        },
    };

    Ok(Msg { pfx, cmd })
}

/// Unwrap a CTCP-framed PRIVMSG/NOTICE body: `\x01VERB args\x01` -> `(verb, args)`.
fn parse_ctcp(body: &str) -> Option<(CTCP, String)> {
    if body.is_empty() || body.as_bytes()[0] != 0x01 {
        return None;
    }
    let mut rest = &body[1..];
    if let Some(stripped) = rest.strip_suffix('\x01') {
        rest = stripped;
    }
    match rest.find(' ') {
        Some(idx) => Some((CTCP::parse(&rest[..idx]), rest[idx + 1..].to_owned())),
        None => Some((CTCP::parse(rest), String::new())),
    }
}

fn parse_params(chrs: &str) -> Vec<&str> {
    // Spec:
    //
    //     params     =  *14( SPACE middle ) [ SPACE ":" trailing ]
    //                =/ 14( SPACE middle ) [ SPACE [ ":" ] trailing ]
    //
    //     nospcrlfcl =  %x01-09 / %x0B-0C / %x0E-1F / %x21-39 / %x3B-FF
    //                     ; any octet except NUL, CR, LF, " " and ":"
    //     middle     =  nospcrlfcl *( ":" / nospcrlfcl )
    //     trailing   =  *( ":" / " " / nospcrlfcl )

    let mut params = Vec::new();
    let mut char_indices = chrs.char_indices();

    while let Some((idx, c)) = char_indices.next() {
        if c == ':' {
            params.push(&chrs[idx + 1..]); // Skip ':'
            break;
        }

        if params.len() == 14 {
            params.push(&chrs[idx..]);
            break;
        }

        if c == ' ' {
            continue;
        }

        loop {
            match char_indices.next() {
                Some((idx_, c)) => {
                    if c == ' ' {
                        params.push(&chrs[idx..idx_]);
                        break;
                    }
                }
                None => {
                    params.push(&chrs[idx..]);
                    break;
                }
            }
        }
    }

    params
}

/// Nicks in NAMES (353) replies may have membership prefixes (op, voice, ...).
/// Returns `(levels, nick)` where `levels` is the prefix characters, unparsed —
/// callers resolve them against the server's advertised PREFIX token.
pub fn split_name_prefix(name: &str) -> (&str, &str) {
    let split = name
        .find(|c: char| c.is_alphanumeric() || c == '_' || c == '[' || c == ']' || c == '\\')
        .unwrap_or(0);
    (&name[..split], &name[split..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_params() {
        assert_eq!(parse_params("p1 p2 p3"), vec!["p1", "p2", "p3"]);
        let empty: Vec<&str> = vec![];
        assert_eq!(parse_params(""), empty);
        assert_eq!(parse_params(":foo bar baz "), vec!["foo bar baz "]);
        assert_eq!(parse_params(":"), vec![""]);

        let params = parse_params("1 2 3 4 5 6 7 8 9 10 11 12 13 14 blah blah blah");
        assert_eq!(params.len(), 15);
        assert_eq!(params[params.len() - 1], "blah blah blah");
    }

    #[test]
    fn test_privmsg_parsing() {
        let mut buf = vec![];
        write!(
            &mut buf,
            ":nick!~nick@unaffiliated/nick PRIVMSG tiny :a b c\r\n"
        )
        .unwrap();
        assert_eq!(
            parse_irc_msg(&mut buf).unwrap().unwrap(),
            Msg {
                pfx: Some(Pfx::User(UserHostmask {
                    nick: "nick".to_owned(),
                    login: Some("~nick".to_owned()),
                    hostname: Some("unaffiliated/nick".to_owned()),
                })),
                cmd: Cmd::PRIVMSG {
                    target: MsgTarget::User("tiny".to_owned()),
                    msg: "a b c".to_owned(),
                    is_notice: false,
                    ctcp: None,
                },
            }
        );
        assert_eq!(buf.len(), 0);
    }

    #[test]
    fn test_join_with_key_parsing() {
        let mut buf = vec![];
        write!(&mut buf, ":tiny!~tiny@192.168.0.1 JOIN #haskell key1\r\n").unwrap();
        assert_eq!(
            parse_irc_msg(&mut buf).unwrap().unwrap(),
            Msg {
                pfx: Some(Pfx::User(UserHostmask {
                    nick: "tiny".to_owned(),
                    login: Some("~tiny".to_owned()),
                    hostname: Some("192.168.0.1".to_owned()),
                })),
                cmd: Cmd::JOIN {
                    chan: ChanName::new("#haskell".to_owned()),
                    key: Some("key1".to_owned()),
                },
            }
        );
    }

    #[test]
    fn test_mode_parsing() {
        let mut buf = vec![];
        write!(&mut buf, ":op!u@h MODE #chan +ov alice bob\r\n").unwrap();
        assert_eq!(
            parse_irc_msg(&mut buf).unwrap().unwrap().cmd,
            Cmd::MODE {
                target: "#chan".to_owned(),
                modestring: "+ov".to_owned(),
                args: vec!["alice".to_owned(), "bob".to_owned()],
            }
        );
    }

    #[test]
    fn test_kick_parsing() {
        let mut buf = vec![];
        write!(&mut buf, ":op!u@h KICK #chan alice :spamming\r\n").unwrap();
        assert_eq!(
            parse_irc_msg(&mut buf).unwrap().unwrap().cmd,
            Cmd::KICK {
                chan: ChanName::new("#chan".to_owned()),
                nick: "alice".to_owned(),
                comment: Some("spamming".to_owned()),
            }
        );
    }

    #[test]
    fn test_numeric_parsing() {
        let mut buf = vec![];
        write!(
            &mut buf,
            ":barjavel.freenode.net 001 tiny :Welcome to the freenode Internet Relay Chat Network tiny\r\n"
        ).unwrap();
        write!(
            &mut buf,
            ":barjavel.freenode.net 005 tiny_test CHANTYPES=# EXCEPTS INVEX \
             CHANMODES=eIbq,k,flj,CFLMPQScgimnprstz CHANLIMIT=#:120 PREFIX=(ov)@+ \
             MAXLIST=bqeI:100 MODES=4 NETWORK=freenode STATUSMSG=@+ CALLERID=g \
             CASEMAPPING=rfc1459 :are supported by this server\r\n"
        )
        .unwrap();

        let mut msgs = vec![];
        while let Some(Ok(msg)) = parse_irc_msg(&mut buf) {
            assert_eq!(
                msg.pfx,
                Some(Pfx::Server("barjavel.freenode.net".to_owned()))
            );
            msgs.push(msg);
        }

        assert_eq!(msgs.len(), 2);
    }

    #[test]
    fn test_part_parsing() {
        let mut buf = vec![];
        write!(&mut buf, ":tiny!~tiny@123.123.123.123 PART #haskell\r\n").unwrap();
        assert_eq!(
            parse_irc_msg(&mut buf).unwrap().unwrap(),
            Msg {
                pfx: Some(Pfx::User(UserHostmask {
                    nick: "tiny".to_owned(),
                    login: Some("~tiny".to_owned()),
                    hostname: Some("123.123.123.123".to_owned()),
                })),
                cmd: Cmd::PART {
                    chan: ChanName::new("#haskell".to_owned()),
                    msg: None,
                },
            }
        );
    }

    #[test]
    fn test_ctcp_action_parsing() {
        let mut buf = vec![];
        write!(
            &mut buf,
            ":dan!u@localhost PRIVMSG #ircv3 :\x01ACTION writes some specs!\x01\r\n"
        )
        .unwrap();
        assert_eq!(
            parse_irc_msg(&mut buf).unwrap().unwrap().cmd,
            Cmd::PRIVMSG {
                target: MsgTarget::Chan(ChanName::new("#ircv3".to_owned())),
                msg: "writes some specs!".to_owned(),
                is_notice: false,
                ctcp: Some((CTCP::Action, "writes some specs!".to_owned())),
            }
        );
        assert_eq!(buf.len(), 0);
    }

    #[test]
    fn test_ctcp_version_parsing() {
        let mut buf = vec![];
        write!(&mut buf, ":a!b@c PRIVMSG target :\x01VERSION\x01\r\n").unwrap();
        assert_eq!(
            parse_irc_msg(&mut buf).unwrap().unwrap().cmd,
            Cmd::PRIVMSG {
                target: MsgTarget::User("target".to_owned()),
                msg: "".to_owned(),
                is_notice: false,
                ctcp: Some((CTCP::Version, "".to_owned())),
            }
        );
    }

    #[test]
    fn test_ctcp_unknown_parsing() {
        let mut buf = vec![];
        write!(&mut buf, ":a!b@c PRIVMSG target :\x01FOO\x01\r\n").unwrap();
        assert_eq!(
            parse_irc_msg(&mut buf).unwrap().unwrap().cmd,
            Cmd::PRIVMSG {
                target: MsgTarget::User("target".to_owned()),
                msg: "".to_owned(),
                is_notice: false,
                ctcp: Some((CTCP::Other("FOO".to_owned()), "".to_owned())),
            }
        );
    }

    #[test]
    fn test_error_parsing() {
        let mut buf = vec![];
        write!(
            &mut buf,
            "ERROR :Closing Link: 212.252.143.51 (Excess Flood)\r\n"
        )
        .unwrap();
        assert_eq!(
            parse_irc_msg(&mut buf).unwrap().unwrap(),
            Msg {
                pfx: None,
                cmd: Cmd::ERROR {
                    msg: "Closing Link: 212.252.143.51 (Excess Flood)".to_owned(),
                },
            },
        );
    }

    #[test]
    fn test_bare_lf_accepted() {
        let mut buf = vec![];
        write!(&mut buf, "PING :x\n").unwrap();
        assert_eq!(
            parse_irc_msg(&mut buf).unwrap().unwrap().cmd,
            Cmd::PING {
                server: "x".to_owned()
            }
        );
    }

    #[test]
    fn test_parse_pfx() {
        use Pfx::*;
        assert_eq!(parse_pfx("xyz"), Ambiguous("xyz".to_string()));
        assert_eq!(parse_pfx("xy.z"), Server("xy.z".to_string()));
        assert_eq!(
            parse_pfx("osa1!osa1@x.y.im"),
            User(UserHostmask {
                nick: "osa1".to_string(),
                login: Some("osa1".to_string()),
                hostname: Some("x.y.im".to_string()),
            })
        );
    }
}
