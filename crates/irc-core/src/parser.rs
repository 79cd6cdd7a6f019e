//! `InputParser` (spec §4.3): turns one parsed inbound `Msg` into DAO mutations and `Event`s.
//! Owns the DAO and `ServerInfo` so the connection engine only has to hand it lines and facades —
//! same shape as `state::State::update`, generalized to the new event/DAO types and with CAP/SASL
//! negotiation folded in as just another branch of the same dispatch, the way the original does it
//! rather than as a separate pre-registration handshake loop.

use std::collections::HashMap;

use base64::{engine::general_purpose::STANDARD, Engine as _};

use irc_core_common::{ChanName, ChanNameRef};
use irc_core_wire::{Cmd, Msg, MsgTarget, Pfx, CTCP};

use crate::config::{EngineConfig, SaslAuth};
use crate::dao::{Channel, Dao, LookupContext, UserId};
use crate::dcc::DccRecord;
use crate::error::{IrcError, IrcErrorReason};
use crate::events::{DisconnectCause, Event, MessageTarget, ModeTarget, WhoEntry, WhoisEvent};
use crate::identity::resolve_pfx;
use crate::listener::EventSink;
use crate::output::{CapFacade, IrcFacade};
use crate::serverinfo::{ChanModeClass, ServerInfo};

/// What the engine should do after a line was handled.
pub enum ParseOutcome {
    Continue,
    /// Numeric 001 arrived: registration is complete, auto-join was sent.
    Registered,
    /// Registration was refused outright; the connection attempt should not be retried as-is.
    Fatal(IrcError),
}

struct WhoisBuilder {
    nick: String,
    login: Option<String>,
    hostname: Option<String>,
    realname: Option<String>,
    server: Option<String>,
    server_info: Option<String>,
    is_operator: bool,
    idle_seconds: Option<u64>,
    channels: Vec<String>,
}

impl WhoisBuilder {
    fn new(nick: &str) -> WhoisBuilder {
        WhoisBuilder {
            nick: nick.to_owned(),
            login: None,
            hostname: None,
            realname: None,
            server: None,
            server_info: None,
            is_operator: false,
            idle_seconds: None,
            channels: Vec::new(),
        }
    }

    fn finish(self) -> WhoisEvent {
        WhoisEvent {
            nick: self.nick,
            login: self.login,
            hostname: self.hostname,
            realname: self.realname,
            server: self.server,
            server_info: self.server_info,
            is_operator: self.is_operator,
            idle_seconds: self.idle_seconds,
            channels: self.channels,
        }
    }
}

pub struct InputParser {
    dao: Dao,
    server_info: ServerInfo,
    logged_in: bool,
    /// PASS/NICK/USER sent once, either immediately (CAP disabled) or from the CAP LS handler.
    introduced: bool,
    /// `None` while we're registering as `cfg.name` (spec §6's primary registration nick);
    /// `Some(i)` once a 433 has pushed us onto `cfg.nick_alternatives[i]`.
    nick_alt_idx: Option<usize>,
    disconnect_cause: Option<DisconnectCause>,
    whois_inflight: HashMap<String, WhoisBuilder>,
    who_inflight: HashMap<String, Vec<WhoEntry>>,
}

impl InputParser {
    pub fn new(bot_nick: &str) -> InputParser {
        InputParser {
            dao: Dao::new(bot_nick),
            server_info: ServerInfo::new(),
            logged_in: false,
            introduced: false,
            nick_alt_idx: None,
            disconnect_cause: None,
            whois_inflight: HashMap::new(),
            who_inflight: HashMap::new(),
        }
    }

    pub fn dao(&self) -> &Dao {
        &self.dao
    }

    pub fn dao_mut(&mut self) -> &mut Dao {
        &mut self.dao
    }

    pub fn server_info(&self) -> &ServerInfo {
        &self.server_info
    }

    pub fn logged_in(&self) -> bool {
        self.logged_in
    }

    pub fn take_disconnect_cause(&mut self) -> Option<DisconnectCause> {
        self.disconnect_cause.take()
    }

    /// Kicks off registration (spec §4.1 step 5): CAP LS first if negotiation is on, otherwise
    /// PASS/NICK/USER directly. The rest of CAP negotiation, if any, continues inline as CAP/
    /// AUTHENTICATE lines arrive in `handle_line`.
    pub fn start_registration(&mut self, cfg: &EngineConfig, irc: &IrcFacade, cap: &CapFacade) {
        self.logged_in = false;
        self.introduced = false;
        self.nick_alt_idx = None;
        if cfg.cap_enabled {
            cap.ls();
        } else {
            self.send_registration(cfg, irc);
        }
    }

    fn send_registration(&mut self, cfg: &EngineConfig, irc: &IrcFacade) {
        if let Some(webirc) = &cfg.webirc {
            irc.webirc_now(webirc);
        }
        if let Some(password) = &cfg.server_password {
            irc.pass_now(password);
        }
        let nick = match self.nick_alt_idx {
            None => &cfg.name,
            Some(i) => &cfg.nick_alternatives[i],
        };
        irc.nick_now(nick);
        irc.user_now(&cfg.login, &cfg.real_name);
        self.introduced = true;
    }

    pub fn handle_line(
        &mut self,
        msg: Msg,
        cfg: &EngineConfig,
        reconnect_channels: &[(ChanName, Option<String>)],
        irc: &IrcFacade,
        cap: &CapFacade,
        sink: &mut dyn EventSink,
    ) -> ParseOutcome {
        let Msg { pfx, cmd } = msg;
        match cmd {
            Cmd::PING { server } => {
                irc.pong_now(&server);
            }
            Cmd::PONG { .. } => {}
            Cmd::ERROR { msg } => {
                self.disconnect_cause = Some(DisconnectCause::Error(msg));
            }
            Cmd::JOIN { chan, key } => self.handle_join(pfx, chan, key, sink),
            Cmd::PART { chan, msg } => self.handle_part(pfx, chan, msg, sink),
            Cmd::KICK { chan, nick, comment } => self.handle_kick(pfx, chan, nick, comment, sink),
            Cmd::QUIT { msg } => self.handle_quit(pfx, msg, sink),
            Cmd::NICK { nick } => self.handle_nick(pfx, nick, sink),
            Cmd::MODE { target, modestring, args } => {
                let by = self.resolve_opt(&pfx, LookupContext::Membership);
                self.apply_mode_string(&target, &modestring, &args, by.map(|(hm, _)| hm), sink);
            }
            Cmd::TOPIC { chan, topic } => self.handle_topic_cmd(pfx, chan, topic, sink),
            Cmd::INVITE { nick, chan } => self.handle_invite(pfx, nick, chan, sink),
            Cmd::AWAY { msg } => self.handle_away(pfx, msg, sink),
            Cmd::ACCOUNT { account } => self.handle_account(pfx, account, sink),
            Cmd::PRIVMSG { target, msg, is_notice, ctcp } => {
                self.handle_privmsg(pfx, target, msg, is_notice, ctcp, sink)
            }
            Cmd::CAP { subcommand, params, .. } => {
                self.handle_cap(subcommand, params, cfg, irc, cap, sink)
            }
            Cmd::AUTHENTICATE { param } => self.handle_authenticate(param, cfg, cap),
            Cmd::Other { .. } => {}
            Cmd::Reply { num, params } => {
                return self.handle_reply(num, params, cfg, reconnect_channels, irc, cap, sink);
            }
        }
        ParseOutcome::Continue
    }

    fn resolve_opt(
        &mut self,
        pfx: &Option<Pfx>,
        ctx: LookupContext,
    ) -> Option<(irc_core_wire::UserHostmask, Option<UserId>)> {
        let pfx = pfx.as_ref()?;
        resolve_pfx(&mut self.dao, self.server_info.case_mapping, pfx, ctx)
    }

    fn handle_join(&mut self, pfx: Option<Pfx>, chan: ChanName, key: Option<String>, sink: &mut dyn EventSink) {
        let Some((hostmask, uid)) = self.resolve_opt(&pfx, LookupContext::Membership) else {
            return;
        };
        let chan_id = self.dao.get_or_create_channel(&chan);
        if let Some(uid) = uid {
            self.dao.add_user_to_channel(uid, chan_id, Default::default());
        }
        if hostmask.nick == self.dao.bot_nick() {
            if let Some(key) = key {
                if let Some(channel) = self.dao.get_channel_mut(&chan) {
                    channel.key = Some(key);
                }
            }
        }
        sink.on_event(Event::Join { chan, who: hostmask });
    }

    fn handle_part(&mut self, pfx: Option<Pfx>, chan: ChanName, msg: Option<String>, sink: &mut dyn EventSink) {
        let Some((hostmask, uid)) = self.resolve_opt(&pfx, LookupContext::Membership) else {
            return;
        };
        if hostmask.nick == self.dao.bot_nick() {
            if let Some(chan_id) = self.dao.get_channel(&chan).map(|c| c.id) {
                self.dao.remove_channel(chan_id);
            }
        } else if let (Some(uid), Some(chan_id)) = (uid, self.dao.get_channel(&chan).map(|c| c.id)) {
            self.dao.remove_user_from_channel(uid, chan_id);
        }
        sink.on_event(Event::Part { chan, who: hostmask, message: msg });
    }

    fn handle_kick(
        &mut self,
        pfx: Option<Pfx>,
        chan: ChanName,
        target_nick: String,
        comment: Option<String>,
        sink: &mut dyn EventSink,
    ) {
        let Some((by, _)) = self.resolve_opt(&pfx, LookupContext::Membership) else {
            return;
        };
        let cm = self.server_info.case_mapping;
        if cm.eq(&target_nick, self.dao.bot_nick()) {
            if let Some(chan_id) = self.dao.get_channel(&chan).map(|c| c.id) {
                self.dao.remove_channel(chan_id);
            }
        } else if let Some(target_id) = self.dao.get_user(cm, &target_nick).map(|u| u.id) {
            if let Some(chan_id) = self.dao.get_channel(&chan).map(|c| c.id) {
                self.dao.remove_user_from_channel(target_id, chan_id);
            }
        }
        sink.on_event(Event::Kick { chan, by, target_nick, comment });
    }

    fn handle_quit(&mut self, pfx: Option<Pfx>, msg: Option<String>, sink: &mut dyn EventSink) {
        let Some((hostmask, uid)) = self.resolve_opt(&pfx, LookupContext::Membership) else {
            return;
        };
        let channels = match uid {
            Some(uid) if uid != self.dao.bot_user_id() => self.dao.remove_user_everywhere(uid),
            _ => Vec::new(),
        };
        sink.on_event(Event::Quit { who: hostmask, message: msg, channels });
    }

    fn handle_nick(&mut self, pfx: Option<Pfx>, new_nick: String, sink: &mut dyn EventSink) {
        let Some(pfx) = pfx else { return };
        let Some(old_nick) = pfx.nick().map(|s| s.to_owned()) else {
            return;
        };
        let cm = self.server_info.case_mapping;
        if self.dao.get_user(cm, &old_nick).is_some() {
            self.dao.rename_user(cm, &old_nick, &new_nick);
        }
        sink.on_event(Event::NickChange { old_nick, new_nick });
    }

    fn handle_topic_cmd(&mut self, pfx: Option<Pfx>, chan: ChanName, topic: Option<String>, sink: &mut dyn EventSink) {
        let by = self.resolve_opt(&pfx, LookupContext::Membership).map(|(hm, _)| hm);
        if let Some(channel) = self.dao.get_channel_mut(&chan) {
            channel.topic = topic.clone().map(|text| crate::dao::ChannelTopic {
                text,
                setter: by.as_ref().map(|hm| hm.nick.clone()),
                set_at: None,
            });
        }
        sink.on_event(Event::Topic { chan, by, topic });
    }

    fn handle_invite(&mut self, pfx: Option<Pfx>, target_nick: String, chan: ChanName, sink: &mut dyn EventSink) {
        let Some((by, _)) = self.resolve_opt(&pfx, LookupContext::Membership) else {
            return;
        };
        sink.on_event(Event::Invite { chan, by, target_nick });
    }

    fn handle_away(&mut self, pfx: Option<Pfx>, msg: Option<String>, sink: &mut dyn EventSink) {
        let Some((who, uid)) = self.resolve_opt(&pfx, LookupContext::Membership) else {
            return;
        };
        if let Some(uid) = uid {
            self.dao.set_user_away(uid, msg.clone());
        }
        sink.on_event(Event::Away { who, message: msg });
    }

    fn handle_account(&mut self, pfx: Option<Pfx>, account: Option<String>, sink: &mut dyn EventSink) {
        let Some((who, _)) = self.resolve_opt(&pfx, LookupContext::Membership) else {
            return;
        };
        sink.on_event(Event::Account { who, account });
    }

    fn handle_privmsg(
        &mut self,
        pfx: Option<Pfx>,
        target: MsgTarget,
        body: String,
        is_notice: bool,
        ctcp: Option<(CTCP, String)>,
        sink: &mut dyn EventSink,
    ) {
        let ctx = if matches!(target, MsgTarget::Chan(_)) {
            LookupContext::Membership
        } else {
            LookupContext::Transient
        };
        let resolved = self.resolve_opt(&pfx, ctx);
        let event_target = convert_target(target.clone());

        match ctcp {
            Some((CTCP::Action, text)) => {
                let Some((from, _)) = resolved else { return };
                sink.on_event(Event::ActionCtcp { from, target: event_target, text });
            }
            Some((CTCP::Version, _)) => {
                let Some((from, _)) = resolved else { return };
                sink.on_event(Event::VersionRequest { from });
            }
            Some((CTCP::Time, args)) => self.emit_ctcp_request(resolved, "TIME", args, sink),
            Some((CTCP::Ping, args)) => self.emit_ctcp_request(resolved, "PING", args, sink),
            Some((CTCP::Finger, args)) => self.emit_ctcp_request(resolved, "FINGER", args, sink),
            Some((CTCP::ClientInfo, args)) => self.emit_ctcp_request(resolved, "CLIENTINFO", args, sink),
            Some((CTCP::Dcc, args)) => {
                let Some((from, _)) = resolved else { return };
                let receiver = match &target {
                    MsgTarget::User(u) => u.clone(),
                    MsgTarget::Chan(_) => self.dao.bot_nick().to_owned(),
                };
                match DccRecord::new(&from.nick, &receiver, &args) {
                    Ok(record) => sink.on_event(Event::Dcc {
                        from,
                        record: record.info(),
                        peer_addr: *record.address(),
                    }),
                    Err(err) => sink.on_event(Event::Exception {
                        message: format!("couldn't parse DCC request: {}", err),
                    }),
                }
            }
            Some((CTCP::Other(command), args)) => {
                let Some((from, _)) = resolved else { return };
                sink.on_event(Event::UnknownCtcp { from, command, args });
            }
            None => {
                if is_notice {
                    sink.on_event(Event::Notice {
                        from: resolved.map(|(hm, _)| hm),
                        target: event_target,
                        text: body,
                    });
                } else if let Some((from, _)) = resolved {
                    sink.on_event(Event::Message { from, target: event_target, text: body });
                }
            }
        }
    }

    fn emit_ctcp_request(
        &self,
        resolved: Option<(irc_core_wire::UserHostmask, Option<UserId>)>,
        kind: &str,
        args: String,
        sink: &mut dyn EventSink,
    ) {
        if let Some((from, _)) = resolved {
            sink.on_event(Event::CtcpRequest { from, kind: kind.to_owned(), args });
        }
    }

    fn handle_cap(
        &mut self,
        subcommand: String,
        params: Vec<String>,
        cfg: &EngineConfig,
        irc: &IrcFacade,
        cap: &CapFacade,
        sink: &mut dyn EventSink,
    ) {
        match subcommand.as_str() {
            "LS" => {
                if !self.introduced {
                    self.send_registration(cfg, irc);
                }
                let offered: Vec<&str> = params
                    .iter()
                    .map(|c| c.split('=').next().unwrap_or(c.as_str()))
                    .collect();
                let mut wanted: Vec<&str> = cfg
                    .capabilities
                    .iter()
                    .map(|s| s.as_str())
                    .filter(|c| offered.contains(c))
                    .collect();
                if cfg.sasl_auth.is_some() && offered.contains(&"sasl") && !wanted.contains(&"sasl") {
                    wanted.push("sasl");
                }
                if wanted.is_empty() {
                    cap.end();
                } else {
                    cap.req(&wanted);
                }
            }
            "ACK" => {
                if params.iter().any(|c| c == "sasl") {
                    cap.authenticate("PLAIN");
                } else {
                    cap.end();
                }
            }
            "NAK" => {
                warn!("server rejected requested capabilities: {:?}", params);
                cap.end();
            }
            _ => {}
        }
        sink.on_event(Event::Cap { subcommand, params });
    }

    fn handle_authenticate(&mut self, param: String, cfg: &EngineConfig, cap: &CapFacade) {
        if param == "+" {
            if let Some(auth) = &cfg.sasl_auth {
                send_sasl_credentials(auth, cap);
            }
        }
    }

    fn handle_reply(
        &mut self,
        num: u16,
        params: Vec<String>,
        cfg: &EngineConfig,
        reconnect_channels: &[(ChanName, Option<String>)],
        irc: &IrcFacade,
        cap: &CapFacade,
        sink: &mut dyn EventSink,
    ) -> ParseOutcome {
        match num {
            // RPL_WELCOME
            1 => {
                if let Some(confirmed) = params.first() {
                    let old = self.dao.bot_nick().to_owned();
                    if &old != confirmed {
                        self.dao.rename_user(self.server_info.case_mapping, &old, confirmed);
                    }
                }
                self.logged_in = true;
                self.nick_alt_idx = None;
                sink.on_event(Event::Connect);
                let channels: &[(ChanName, Option<String>)] =
                    if reconnect_channels.is_empty() { &cfg.auto_join } else { reconnect_channels };
                for (chan, key) in channels {
                    irc.join(chan.as_ref(), key.as_deref());
                }
                return ParseOutcome::Registered;
            }
            // RPL_YOURHOST / RPL_CREATED: nothing to capture
            2 | 3 => {}
            // RPL_MYINFO
            4 => {
                self.server_info.server_name = params.get(1).cloned();
                self.server_info.server_version = params.get(2).cloned();
            }
            // RPL_ISUPPORT
            5 => {
                let upper = params.len().saturating_sub(1);
                for token in params.iter().take(upper).skip(1) {
                    self.server_info.apply_isupport_token(token);
                }
            }
            // WHOIS replies don't create `User`s (spec §4.3: not a membership context), but if the
            // subject is already known — e.g. shares a channel with us — its attributes are the
            // latest the server has, so the DAO record is refreshed alongside the builder.
            311 => {
                if let Some(nick) = params.get(1) {
                    let login = params.get(2).cloned();
                    let hostname = params.get(3).cloned();
                    let realname = params.get(5).cloned();
                    if let Some(realname) = &realname {
                        if let Some(uid) = self.dao.get_user(self.server_info.case_mapping, nick).map(|u| u.id) {
                            self.dao.set_user_realname(uid, realname.clone());
                        }
                    }
                    let b = self.whois_inflight.entry(nick.clone()).or_insert_with(|| WhoisBuilder::new(nick));
                    b.login = login;
                    b.hostname = hostname;
                    b.realname = realname;
                }
            }
            312 => {
                if let Some(nick) = params.get(1) {
                    let server = params.get(2).cloned();
                    if let Some(server) = &server {
                        if let Some(uid) = self.dao.get_user(self.server_info.case_mapping, nick).map(|u| u.id) {
                            self.dao.set_user_server(uid, server.clone());
                        }
                    }
                    let b = self.whois_inflight.entry(nick.clone()).or_insert_with(|| WhoisBuilder::new(nick));
                    b.server = server;
                    b.server_info = params.get(3).cloned();
                }
            }
            313 => {
                if let Some(nick) = params.get(1) {
                    if let Some(uid) = self.dao.get_user(self.server_info.case_mapping, nick).map(|u| u.id) {
                        self.dao.set_user_server_operator(uid, true);
                    }
                    let b = self.whois_inflight.entry(nick.clone()).or_insert_with(|| WhoisBuilder::new(nick));
                    b.is_operator = true;
                }
            }
            317 => {
                if let Some(nick) = params.get(1) {
                    let idle = params.get(2).and_then(|s| s.parse::<u64>().ok());
                    let b = self.whois_inflight.entry(nick.clone()).or_insert_with(|| WhoisBuilder::new(nick));
                    b.idle_seconds = idle;
                }
            }
            319 => {
                if let Some(nick) = params.get(1) {
                    let chans: Vec<String> = params
                        .get(2)
                        .map(|s| s.split_whitespace().map(|c| irc_core_wire::split_name_prefix(c).1.to_owned()).collect())
                        .unwrap_or_default();
                    let b = self.whois_inflight.entry(nick.clone()).or_insert_with(|| WhoisBuilder::new(nick));
                    b.channels.extend(chans);
                }
            }
            // RPL_ENDOFWHOIS
            318 => {
                if let Some(nick) = params.first() {
                    if let Some(b) = self.whois_inflight.remove(nick) {
                        sink.on_event(Event::Whois(Box::new(b.finish())));
                    }
                }
            }
            // A WHO reply is a membership context (spec §3), so it promotes the subject to a
            // `User` the same way a NAMES reply does, and keeps its realname/server/operator/
            // away fields current rather than only reporting them through `WhoEntry`.
            352 => {
                if let (Some(chan), Some(user), Some(host), Some(server), Some(nick), Some(flags)) = (
                    params.get(1),
                    params.get(2),
                    params.get(3),
                    params.get(4),
                    params.get(5),
                    params.get(6),
                ) {
                    let realname = params
                        .get(7)
                        .map(|s| s.split_once(' ').map(|(_, rest)| rest).unwrap_or("").to_owned())
                        .unwrap_or_default();
                    let is_away = flags.starts_with('G');
                    let is_operator = flags.contains('*');

                    let cm = self.server_info.case_mapping;
                    let hostmask = irc_core_wire::UserHostmask {
                        nick: nick.clone(),
                        login: Some(user.clone()),
                        hostname: Some(host.clone()),
                    };
                    if let Some(uid) = self.dao.get_or_create_user(cm, &hostmask, LookupContext::Membership) {
                        self.dao.set_user_realname(uid, realname.clone());
                        self.dao.set_user_server(uid, server.clone());
                        self.dao.set_user_server_operator(uid, is_operator);
                        self.dao.touch_user(uid);
                    }

                    let entry = WhoEntry {
                        nick: nick.clone(),
                        login: user.clone(),
                        hostname: host.clone(),
                        server: server.clone(),
                        realname,
                        is_away,
                        is_operator,
                    };
                    self.who_inflight.entry(chan.clone()).or_default().push(entry);
                }
            }
            // RPL_ENDOFWHO
            315 => {
                if let Some(chan) = params.get(1) {
                    if let Some(entries) = self.who_inflight.remove(chan) {
                        sink.on_event(Event::Who { chan: ChanName::new(chan.clone()), entries });
                    }
                }
            }
            332 => {
                if let Some(chan_s) = params.get(1) {
                    let chan = ChanNameRef::new(chan_s);
                    let topic = params.get(2).cloned();
                    self.dao.get_or_create_channel(chan);
                    if let Some(channel) = self.dao.get_channel_mut(chan) {
                        channel.topic = topic.map(|text| crate::dao::ChannelTopic { text, setter: None, set_at: None });
                    }
                }
            }
            333 => {
                if let Some(chan_s) = params.get(1) {
                    let chan = ChanNameRef::new(chan_s);
                    let setter = params.get(2).cloned();
                    let set_at = params.get(3).and_then(|s| s.parse::<u64>().ok());
                    if let Some(channel) = self.dao.get_channel_mut(chan) {
                        if let Some(topic) = &mut channel.topic {
                            topic.setter = setter;
                            topic.set_at = set_at;
                        }
                    }
                }
            }
            353 => {
                if let (Some(chan_s), Some(names)) = (params.get(2), params.get(3)) {
                    let chan = ChanNameRef::new(chan_s);
                    let chan_id = self.dao.get_or_create_channel(chan);
                    let cm = self.server_info.case_mapping;
                    for name in names.split_whitespace() {
                        let (prefixes, nick) = irc_core_wire::split_name_prefix(name);
                        let levels: crate::dao::LevelSet = prefixes
                            .chars()
                            .filter_map(|c| self.server_info.level_for_symbol(c))
                            .collect();
                        let hostmask = irc_core_wire::UserHostmask::new(nick);
                        if let Some(uid) = self.dao.get_or_create_user(cm, &hostmask, LookupContext::Membership) {
                            let mut existing = self.dao.user_levels(uid, chan_id);
                            existing.extend(levels);
                            self.dao.add_user_to_channel(uid, chan_id, existing);
                        }
                    }
                }
            }
            // RPL_ENDOFNAMES
            366 => {}
            324 => {
                if let Some(chan_s) = params.get(1) {
                    let chan = ChanNameRef::new(chan_s).to_owned();
                    let modestring = params.get(2).cloned().unwrap_or_default();
                    let args: Vec<String> = params.iter().skip(3).cloned().collect();
                    self.apply_mode_string(chan.display(), &modestring, &args, None, sink);
                }
            }
            329 => {
                if let Some(chan_s) = params.get(1) {
                    let chan = ChanNameRef::new(chan_s);
                    let created_at = params.get(2).and_then(|s| s.parse::<u64>().ok());
                    if let Some(channel) = self.dao.get_channel_mut(chan) {
                        channel.created_at = created_at;
                    }
                }
            }
            367 => self.push_list_entry(&params, 'b'),
            348 => self.push_list_entry(&params, 'e'),
            346 => self.push_list_entry(&params, 'I'),
            368 | 349 | 347 => {}
            432 | 433 => {
                if !self.logged_in {
                    // First collision (trying `cfg.name`) falls through to alternative 0; later
                    // collisions advance through the rest of `cfg.nick_alternatives` in order.
                    let next = match self.nick_alt_idx {
                        None if !cfg.nick_alternatives.is_empty() => Some(0),
                        Some(i) if i + 1 < cfg.nick_alternatives.len() => Some(i + 1),
                        _ => None,
                    };
                    if let Some(idx) = next {
                        self.nick_alt_idx = Some(idx);
                        irc.nick_now(&cfg.nick_alternatives[idx]);
                    } else {
                        return ParseOutcome::Fatal(IrcError {
                            reason: IrcErrorReason::NickCollision,
                            message: params.last().cloned().unwrap_or_default(),
                        });
                    }
                } else {
                    sink.on_event(Event::IrcError(IrcError {
                        reason: IrcErrorReason::Other,
                        message: params.last().cloned().unwrap_or_default(),
                    }));
                }
            }
            // ERR_YOUREBANNEDCREEP
            465 => {
                return ParseOutcome::Fatal(IrcError {
                    reason: IrcErrorReason::Banned,
                    message: params.last().cloned().unwrap_or_default(),
                });
            }
            471 | 473 | 474 | 475 => {
                if let Some(chan) = params.get(1) {
                    sink.on_event(Event::ChannelJoinError {
                        chan: ChanName::new(chan.clone()),
                        message: params.last().cloned().unwrap_or_default(),
                    });
                }
            }
            // RPL_SASLSUCCESS / ERR_SASLFAIL / ERR_SASLTOOLONG
            903 | 904 | 905 => {
                if num != 903 {
                    sink.on_event(Event::IrcError(IrcError {
                        reason: IrcErrorReason::Other,
                        message: params.last().cloned().unwrap_or_default(),
                    }));
                }
                cap.end();
            }
            _ => {}
        }
        ParseOutcome::Continue
    }

    fn push_list_entry(&mut self, params: &[String], letter: char) {
        let (Some(chan_s), Some(mask)) = (params.get(1), params.get(2)) else {
            return;
        };
        let chan = ChanNameRef::new(chan_s);
        if let Some(channel) = self.dao.get_channel_mut(chan) {
            if let Some(list) = list_field(channel, letter) {
                if !list.contains(mask) {
                    list.push(mask.clone());
                }
            }
        }
    }

    fn apply_mode_string(
        &mut self,
        target: &str,
        modestring: &str,
        args: &[String],
        by: Option<irc_core_wire::UserHostmask>,
        sink: &mut dyn EventSink,
    ) {
        let is_chan = target
            .chars()
            .next()
            .map(|c| self.server_info.chan_types.contains(c))
            .unwrap_or(false);
        let mut adding = true;
        let mut arg_iter = args.iter();
        for ch in modestring.chars() {
            match ch {
                '+' => adding = true,
                '-' => adding = false,
                letter => {
                    let arg = if is_chan {
                        self.apply_chan_mode(target, letter, adding, &mut arg_iter)
                    } else {
                        None
                    };
                    let mode_target = if is_chan {
                        ModeTarget::Chan(ChanName::new(target.to_owned()))
                    } else {
                        ModeTarget::User(target.to_owned())
                    };
                    sink.on_event(Event::Mode { target: mode_target, by: by.clone(), adding, letter, arg });
                }
            }
        }
    }

    fn apply_chan_mode(
        &mut self,
        target: &str,
        letter: char,
        adding: bool,
        args: &mut std::slice::Iter<String>,
    ) -> Option<String> {
        let cm = self.server_info.case_mapping;
        let chan_ref = ChanNameRef::new(target);

        if let Some(level) = self.server_info.level_for_mode(letter) {
            let nick_arg = args.next().cloned();
            if let Some(nick) = &nick_arg {
                if let Some(chan_id) = self.dao.get_channel(chan_ref).map(|c| c.id) {
                    if let Some(uid) = self.dao.get_user(cm, nick).map(|u| u.id) {
                        let mut levels = self.dao.user_levels(uid, chan_id);
                        if adding {
                            levels.insert(level);
                        } else {
                            levels.remove(&level);
                        }
                        self.dao.set_user_levels(uid, chan_id, levels);
                    }
                }
            }
            return nick_arg;
        }

        match self.server_info.chan_mode_class(letter) {
            Some(ChanModeClass::ListType) => {
                let arg = args.next().cloned();
                if let Some(mask) = &arg {
                    if let Some(channel) = self.dao.get_channel_mut(chan_ref) {
                        if let Some(list) = list_field(channel, letter) {
                            if adding {
                                if !list.contains(mask) {
                                    list.push(mask.clone());
                                }
                            } else {
                                list.retain(|m| m != mask);
                            }
                        }
                    }
                }
                arg
            }
            Some(ChanModeClass::AlwaysArg) => {
                let arg = args.next().cloned();
                if let Some(channel) = self.dao.get_channel_mut(chan_ref) {
                    set_boolean_or_arg_mode(channel, letter, adding, arg.clone());
                }
                arg
            }
            Some(ChanModeClass::SetArg) => {
                let arg = if adding { args.next().cloned() } else { None };
                if let Some(channel) = self.dao.get_channel_mut(chan_ref) {
                    set_boolean_or_arg_mode(channel, letter, adding, arg.clone());
                }
                arg
            }
            Some(ChanModeClass::Boolean) | None => {
                if self.server_info.chan_mode_class(letter).is_none() {
                    warn!("unknown channel mode letter '{}', treating as boolean", letter);
                }
                if let Some(channel) = self.dao.get_channel_mut(chan_ref) {
                    set_boolean_or_arg_mode(channel, letter, adding, None);
                }
                None
            }
        }
    }
}

fn set_boolean_or_arg_mode(channel: &mut Channel, letter: char, adding: bool, arg: Option<String>) {
    if adding {
        channel.modes.insert(letter, arg);
    } else {
        channel.modes.remove(&letter);
    }
}

fn list_field(channel: &mut Channel, letter: char) -> Option<&mut Vec<String>> {
    match letter {
        'b' => Some(&mut channel.bans),
        'e' => Some(&mut channel.excepts),
        'I' => Some(&mut channel.invites),
        _ => None,
    }
}

fn convert_target(target: MsgTarget) -> MessageTarget {
    match target {
        MsgTarget::Chan(c) => MessageTarget::Chan(c),
        MsgTarget::User(u) => MessageTarget::User(u),
    }
}

/// Chunks the base64-encoded `AUTHENTICATE` payload per the IRCv3 SASL spec: 400-byte pieces, with
/// a trailing empty `AUTHENTICATE +` when the final piece is exactly 400 bytes (otherwise the
/// server can't tell a deliberate full chunk from the end of the payload).
fn send_sasl_credentials(auth: &SaslAuth, cap: &CapFacade) {
    let raw = format!("{}\0{}\0{}", auth.username, auth.username, auth.password);
    let encoded = STANDARD.encode(raw.as_bytes());
    if encoded.is_empty() {
        cap.authenticate("+");
        return;
    }
    let mut last_len = 0;
    for chunk in encoded.as_bytes().chunks(400) {
        last_len = chunk.len();
        // `encoded` is base64 text, pure ASCII, so this is always valid UTF-8.
        cap.authenticate(std::str::from_utf8(chunk).unwrap());
    }
    if last_len == 400 {
        cap.authenticate("+");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::UserLevel;

    struct FakeSink {
        events: Vec<Event>,
    }

    impl FakeSink {
        fn new() -> FakeSink {
            FakeSink { events: Vec::new() }
        }
    }

    impl EventSink for FakeSink {
        fn on_event(&mut self, event: Event) {
            self.events.push(event);
        }
    }

    fn test_cfg(nicks: &[&str]) -> EngineConfig {
        let mut cfg = EngineConfig::new("bot", "bot", "Bot", nicks.iter().map(|s| s.to_string()).collect());
        cfg.max_line_length = 512;
        cfg
    }

    fn server_msg(cmd: Cmd) -> Msg {
        Msg { pfx: Some(Pfx::Server("irc.example.org".to_owned())), cmd }
    }

    fn user_msg(nick: &str, cmd: Cmd) -> Msg {
        Msg { pfx: Some(Pfx::User(irc_core_wire::UserHostmask::new(nick))), cmd }
    }

    #[test]
    fn registration_emits_connect_and_autojoin() {
        let cfg = test_cfg(&["bot"]);
        let mut parser = InputParser::new("bot");
        let (tx, mut rx) = tokio::sync::mpsc::channel(64);
        let raw = crate::output::Raw::new(tx, 512);
        let irc = IrcFacade::new(raw.clone());
        let cap = CapFacade::new(raw);
        let mut sink = FakeSink::new();

        parser.start_registration(&cfg, &irc, &cap);
        assert!(rx.try_recv().is_ok()); // NICK
        assert!(rx.try_recv().is_ok()); // USER

        let outcome = parser.handle_line(
            server_msg(Cmd::Reply { num: 1, params: vec!["bot".to_owned(), "welcome".to_owned()] }),
            &cfg,
            &[],
            &irc,
            &cap,
            &mut sink,
        );
        assert!(matches!(outcome, ParseOutcome::Registered));
        assert!(parser.logged_in());
        assert!(sink.events.iter().any(|e| matches!(e, Event::Connect)));
    }

    #[test]
    fn who_reply_promotes_user_and_populates_attributes() {
        let cfg = test_cfg(&["bot"]);
        let mut parser = InputParser::new("bot");
        let (tx, _rx) = tokio::sync::mpsc::channel(64);
        let raw = crate::output::Raw::new(tx, 512);
        let irc = IrcFacade::new(raw.clone());
        let cap = CapFacade::new(raw);
        let mut sink = FakeSink::new();

        parser.handle_line(
            server_msg(Cmd::Reply {
                num: 352,
                params: vec![
                    "bot".to_owned(),
                    "#test".to_owned(),
                    "alice_login".to_owned(),
                    "alice.host".to_owned(),
                    "irc.example.org".to_owned(),
                    "alice".to_owned(),
                    "H*".to_owned(),
                    "0 Alice Realname".to_owned(),
                ],
            }),
            &cfg,
            &[],
            &irc,
            &cap,
            &mut sink,
        );

        let cm = parser.server_info().case_mapping;
        let alice = parser.dao().get_user(cm, "alice").expect("WHO reply should promote alice to a User");
        assert_eq!(alice.login.as_deref(), Some("alice_login"));
        assert_eq!(alice.hostname.as_deref(), Some("alice.host"));
        assert_eq!(alice.realname.as_deref(), Some("Alice Realname"));
        assert_eq!(alice.server.as_deref(), Some("irc.example.org"));
        assert!(alice.server_operator);
        assert!(alice.last_activity.is_some());
    }

    #[test]
    fn whois_reply_refreshes_an_already_known_user_but_does_not_create_one() {
        let cfg = test_cfg(&["bot"]);
        let mut parser = InputParser::new("bot");
        let (tx, _rx) = tokio::sync::mpsc::channel(64);
        let raw = crate::output::Raw::new(tx, 512);
        let irc = IrcFacade::new(raw.clone());
        let cap = CapFacade::new(raw);
        let mut sink = FakeSink::new();
        let cm = parser.server_info().case_mapping;

        // bob is a stranger: WHOIS about him never creates a DAO User (spec §4.3: not a
        // membership context).
        parser.handle_line(
            server_msg(Cmd::Reply {
                num: 313,
                params: vec!["bot".to_owned(), "bob".to_owned(), "is an IRC operator".to_owned()],
            }),
            &cfg,
            &[],
            &irc,
            &cap,
            &mut sink,
        );
        assert!(parser.dao().get_user(cm, "bob").is_none());

        // alice is already known (e.g. from a shared channel); WHOIS about her refreshes her
        // existing record.
        let cid = parser.dao_mut().get_or_create_channel(ChanNameRef::new("#test"));
        let alice_id = parser
            .dao_mut()
            .get_or_create_user(cm, &irc_core_wire::UserHostmask::new("alice"), LookupContext::Membership)
            .unwrap();
        parser.dao_mut().add_user_to_channel(alice_id, cid, Default::default());

        parser.handle_line(
            server_msg(Cmd::Reply {
                num: 312,
                params: vec!["bot".to_owned(), "alice".to_owned(), "irc.example.org".to_owned(), "A server".to_owned()],
            }),
            &cfg,
            &[],
            &irc,
            &cap,
            &mut sink,
        );
        let alice = parser.dao().get_user(cm, "alice").unwrap();
        assert_eq!(alice.server.as_deref(), Some("irc.example.org"));
    }

    #[test]
    fn names_reply_populates_membership() {
        let cfg = test_cfg(&["bot"]);
        let mut parser = InputParser::new("bot");
        let (tx, _rx) = tokio::sync::mpsc::channel(64);
        let raw = crate::output::Raw::new(tx, 512);
        let irc = IrcFacade::new(raw.clone());
        let cap = CapFacade::new(raw);
        let mut sink = FakeSink::new();

        parser.handle_line(
            server_msg(Cmd::Reply {
                num: 353,
                params: vec![
                    "bot".to_owned(),
                    "=".to_owned(),
                    "#test".to_owned(),
                    "@alice +bob carol".to_owned(),
                ],
            }),
            &cfg,
            &[],
            &irc,
            &cap,
            &mut sink,
        );

        let members = parser.dao().channel_members(ChanNameRef::new("#test"));
        assert_eq!(members.len(), 3);
        let alice = members.iter().find(|(u, _)| u.nick == "alice").unwrap();
        assert!(alice.1.contains(&UserLevel::Op));
    }

    /// Scenario S3: `name="bot"` is sent first; a 433 falls back to `nick_alternatives[0]`
    /// (`"bot_"`); a second 433 with no alternatives left is fatal.
    #[test]
    fn nick_collision_falls_back_then_fails() {
        let cfg = test_cfg(&["bot_"]);
        let mut parser = InputParser::new("bot");
        let (tx, mut rx) = tokio::sync::mpsc::channel(64);
        let raw = crate::output::Raw::new(tx, 512);
        let irc = IrcFacade::new(raw.clone());
        let cap = CapFacade::new(raw);
        let mut sink = FakeSink::new();

        parser.start_registration(&cfg, &irc, &cap);
        assert!(rx.try_recv().is_ok()); // NICK bot (the primary nick, per spec §6)
        assert!(rx.try_recv().is_ok()); // USER

        let outcome = parser.handle_line(
            server_msg(Cmd::Reply { num: 433, params: vec!["*".to_owned(), "bot".to_owned(), "in use".to_owned()] }),
            &cfg,
            &[],
            &irc,
            &cap,
            &mut sink,
        );
        assert!(matches!(outcome, ParseOutcome::Continue));
        assert!(rx.try_recv().is_ok()); // NICK bot_ (the first alternative)

        let outcome = parser.handle_line(
            server_msg(Cmd::Reply { num: 433, params: vec!["*".to_owned(), "bot_".to_owned(), "in use".to_owned()] }),
            &cfg,
            &[],
            &irc,
            &cap,
            &mut sink,
        );
        assert!(matches!(outcome, ParseOutcome::Fatal(_)));
    }

    /// With no `nick_alternatives` configured at all, a 433 on the primary nick is immediately
    /// fatal rather than panicking on an empty-vec index.
    #[test]
    fn nick_collision_with_no_alternatives_is_immediately_fatal() {
        let cfg = test_cfg(&[]);
        let mut parser = InputParser::new("bot");
        let (tx, mut rx) = tokio::sync::mpsc::channel(64);
        let raw = crate::output::Raw::new(tx, 512);
        let irc = IrcFacade::new(raw.clone());
        let cap = CapFacade::new(raw);
        let mut sink = FakeSink::new();

        parser.start_registration(&cfg, &irc, &cap);
        let _ = rx.try_recv();
        let _ = rx.try_recv();

        let outcome = parser.handle_line(
            server_msg(Cmd::Reply { num: 433, params: vec!["*".to_owned(), "bot".to_owned(), "in use".to_owned()] }),
            &cfg,
            &[],
            &irc,
            &cap,
            &mut sink,
        );
        assert!(matches!(outcome, ParseOutcome::Fatal(_)));
    }

    #[test]
    fn ctcp_action_is_unwrapped() {
        let cfg = test_cfg(&["bot"]);
        let mut parser = InputParser::new("bot");
        let (tx, _rx) = tokio::sync::mpsc::channel(64);
        let raw = crate::output::Raw::new(tx, 512);
        let irc = IrcFacade::new(raw.clone());
        let cap = CapFacade::new(raw);
        let mut sink = FakeSink::new();

        parser.handle_line(
            user_msg(
                "alice",
                Cmd::PRIVMSG {
                    target: MsgTarget::User("bot".to_owned()),
                    msg: "waves".to_owned(),
                    is_notice: false,
                    ctcp: Some((CTCP::Action, "waves".to_owned())),
                },
            ),
            &cfg,
            &[],
            &irc,
            &cap,
            &mut sink,
        );

        assert!(sink.events.iter().any(|e| matches!(e, Event::ActionCtcp { text, .. } if text == "waves")));
    }

    #[test]
    fn quit_removes_user_from_every_channel() {
        let cfg = test_cfg(&["bot"]);
        let mut parser = InputParser::new("bot");
        let (tx, _rx) = tokio::sync::mpsc::channel(64);
        let raw = crate::output::Raw::new(tx, 512);
        let irc = IrcFacade::new(raw.clone());
        let cap = CapFacade::new(raw);
        let mut sink = FakeSink::new();

        for chan in ["#a", "#b"] {
            parser.handle_line(
                user_msg("alice", Cmd::JOIN { chan: ChanName::new(chan.to_owned()), key: None }),
                &cfg,
                &[],
                &irc,
                &cap,
                &mut sink,
            );
        }

        parser.handle_line(
            user_msg("alice", Cmd::QUIT { msg: Some("bye".to_owned()) }),
            &cfg,
            &[],
            &irc,
            &cap,
            &mut sink,
        );

        let quit_event = sink.events.iter().find_map(|e| match e {
            Event::Quit { channels, .. } => Some(channels.len()),
            _ => None,
        });
        assert_eq!(quit_event, Some(2));
        assert!(parser.dao().get_user(irc_core_common::CaseMapping::Rfc1459, "alice").is_none());
    }
}
