//! User/Channel relational store.
//!
//! The original object graph has `User`s pointing at the `Channel`s they're in and vice versa —
//! a cycle. Per the design note on replacing cyclic object graphs, this is an arena: two maps
//! keyed by an opaque id, plus a membership relation `(user_id, channel_id) -> level set`. Reverse
//! indices (`user_channels`/`channel_users`) are maintained alongside the relation so that the
//! symmetric-membership invariant is just "these two indices agree", and so callers don't have to
//! scan the relation to answer "what channels is this user in".

use std::collections::{HashMap, HashSet};

use irc_core_common::{CaseMapping, ChanName, ChanNameRef};
use irc_core_wire::UserHostmask;

use crate::serverinfo::ServerInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChanId(u64);

/// Channel membership flag, learned from ISUPPORT PREFIX. Ordered worst-to-best so that
/// `UserLevel::highest` over a level set is a plain `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum UserLevel {
    Voice,
    HalfOp,
    Op,
    SuperOp,
    Owner,
}

pub type LevelSet = HashSet<UserLevel>;

#[derive(Debug, Clone)]
pub struct User {
    pub id: UserId,
    pub nick: String,
    pub login: Option<String>,
    pub hostname: Option<String>,
    pub realname: Option<String>,
    pub server: Option<String>,
    pub away_message: Option<String>,
    pub server_operator: bool,
    pub last_activity: Option<std::time::Instant>,
    /// Cache of the nick index key this user is currently filed under, so `rename_user`/
    /// `remove_user` never have to guess which `CaseMapping` produced the existing entry.
    folded_nick: String,
}

impl User {
    fn new(id: UserId, hostmask: &UserHostmask, folded_nick: String) -> User {
        User {
            id,
            nick: hostmask.nick.clone(),
            login: hostmask.login.clone(),
            hostname: hostmask.hostname.clone(),
            realname: None,
            server: None,
            away_message: None,
            server_operator: false,
            last_activity: None,
            folded_nick,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChannelTopic {
    pub text: String,
    pub setter: Option<String>,
    pub set_at: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct Channel {
    pub id: ChanId,
    pub name: ChanName,
    pub topic: Option<ChannelTopic>,
    pub created_at: Option<u64>,
    pub key: Option<String>,
    /// Non-list channel modes: boolean modes map to `None`, arg modes to `Some(arg)`.
    pub modes: HashMap<char, Option<String>>,
    pub bans: Vec<String>,
    pub excepts: Vec<String>,
    pub invites: Vec<String>,
}

impl Channel {
    fn new(id: ChanId, name: ChanName) -> Channel {
        Channel {
            id,
            name,
            topic: None,
            created_at: None,
            key: None,
            modes: HashMap::new(),
            bans: Vec::new(),
            excepts: Vec::new(),
            invites: Vec::new(),
        }
    }
}

/// Where a nick was observed, for the identity promotion rule (spec §4.3): a membership context
/// creates a `User` on miss, any other context only ever gets a transient hostmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupContext {
    Membership,
    Transient,
}

pub struct Dao {
    bot_user_id: UserId,
    next_user_id: u64,
    next_chan_id: u64,

    users: HashMap<UserId, User>,
    /// Folded nick -> id. Authoritative nick index (invariant 2).
    nick_index: HashMap<String, UserId>,

    channels: HashMap<ChanId, Channel>,
    /// Normalized channel name -> id.
    chan_index: HashMap<String, ChanId>,

    membership: HashMap<(UserId, ChanId), LevelSet>,
    user_channels: HashMap<UserId, HashSet<ChanId>>,
    channel_users: HashMap<ChanId, HashSet<UserId>>,
}

impl Dao {
    /// A fresh DAO with just the bot's own `User` entry (invariant 3: the bot user always exists).
    pub fn new(bot_nick: &str) -> Dao {
        let bot_user_id = UserId(0);
        let folded = CaseMapping::default().fold(bot_nick);
        let mut users = HashMap::new();
        users.insert(
            bot_user_id,
            User::new(bot_user_id, &UserHostmask::new(bot_nick), folded.clone()),
        );
        let mut nick_index = HashMap::new();
        nick_index.insert(folded, bot_user_id);

        Dao {
            bot_user_id,
            next_user_id: 1,
            next_chan_id: 0,
            users,
            nick_index,
            channels: HashMap::new(),
            chan_index: HashMap::new(),
            membership: HashMap::new(),
            user_channels: HashMap::new(),
            channel_users: HashMap::new(),
        }
    }

    pub fn bot_user_id(&self) -> UserId {
        self.bot_user_id
    }

    pub fn bot_nick(&self) -> &str {
        &self.users[&self.bot_user_id].nick
    }

    fn fold(cm: CaseMapping, nick: &str) -> String {
        cm.fold(nick)
    }

    pub fn get_user(&self, cm: CaseMapping, nick: &str) -> Option<&User> {
        self.nick_index
            .get(&Self::fold(cm, nick))
            .and_then(|id| self.users.get(id))
    }

    pub fn get_user_by_id(&self, id: UserId) -> Option<&User> {
        self.users.get(&id)
    }

    pub fn set_user_away(&mut self, id: UserId, message: Option<String>) {
        if let Some(user) = self.users.get_mut(&id) {
            user.away_message = message;
        }
    }

    pub fn set_user_realname(&mut self, id: UserId, realname: String) {
        if let Some(user) = self.users.get_mut(&id) {
            user.realname = Some(realname);
        }
    }

    pub fn set_user_server(&mut self, id: UserId, server: String) {
        if let Some(user) = self.users.get_mut(&id) {
            user.server = Some(server);
        }
    }

    pub fn set_user_server_operator(&mut self, id: UserId, flag: bool) {
        if let Some(user) = self.users.get_mut(&id) {
            user.server_operator = flag;
        }
    }

    pub fn touch_user(&mut self, id: UserId) {
        if let Some(user) = self.users.get_mut(&id) {
            user.last_activity = Some(std::time::Instant::now());
        }
    }

    pub fn get_channel(&self, name: &ChanNameRef) -> Option<&Channel> {
        self.chan_index
            .get(&name.normalized())
            .and_then(|id| self.channels.get(id))
    }

    pub fn get_channel_mut(&mut self, name: &ChanNameRef) -> Option<&mut Channel> {
        if let Some(id) = self.chan_index.get(&name.normalized()) {
            self.channels.get_mut(id)
        } else {
            None
        }
    }

    pub fn get_all_channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.values()
    }

    pub fn get_all_users(&self) -> impl Iterator<Item = &User> {
        self.users.values()
    }

    /// Channels a user participates in.
    pub fn user_channel_names(&self, id: UserId) -> Vec<ChanName> {
        match self.user_channels.get(&id) {
            None => Vec::new(),
            Some(ids) => ids
                .iter()
                .filter_map(|cid| self.channels.get(cid))
                .map(|c| c.name.clone())
                .collect(),
        }
    }

    /// Members of a channel with their level sets.
    pub fn channel_members(&self, chan: &ChanNameRef) -> Vec<(&User, &LevelSet)> {
        let Some(&cid) = self.chan_index.get(&chan.normalized()) else {
            return Vec::new();
        };
        match self.channel_users.get(&cid) {
            None => Vec::new(),
            Some(uids) => uids
                .iter()
                .filter_map(|uid| {
                    let user = self.users.get(uid)?;
                    let levels = self.membership.get(&(*uid, cid))?;
                    Some((user, levels))
                })
                .collect(),
        }
    }

    /// Lookup by case-mapped nick; create if absent. `ctx` decides whether a miss creates a new
    /// `User` (membership context) or leaves the DAO untouched (transient context — caller gets
    /// `None` and should use the raw hostmask directly in the emitted event).
    pub fn get_or_create_user(
        &mut self,
        cm: CaseMapping,
        hostmask: &UserHostmask,
        ctx: LookupContext,
    ) -> Option<UserId> {
        let folded = Self::fold(cm, &hostmask.nick);
        if let Some(&id) = self.nick_index.get(&folded) {
            // Authoritative latest hostmask info (spec §4.3 identity promotion rule).
            let user = self.users.get_mut(&id).unwrap();
            if hostmask.login.is_some() {
                user.login = hostmask.login.clone();
            }
            if hostmask.hostname.is_some() {
                user.hostname = hostmask.hostname.clone();
            }
            return Some(id);
        }

        match ctx {
            LookupContext::Transient => None,
            LookupContext::Membership => {
                let id = UserId(self.next_user_id);
                self.next_user_id += 1;
                self.users.insert(id, User::new(id, hostmask, folded.clone()));
                self.nick_index.insert(folded, id);
                Some(id)
            }
        }
    }

    pub fn get_or_create_channel(&mut self, name: &ChanNameRef) -> ChanId {
        let key = name.normalized();
        if let Some(&id) = self.chan_index.get(&key) {
            return id;
        }
        let id = ChanId(self.next_chan_id);
        self.next_chan_id += 1;
        self.channels.insert(id, Channel::new(id, name.to_owned()));
        self.chan_index.insert(key, id);
        id
    }

    /// Idempotent.
    pub fn add_user_to_channel(&mut self, user: UserId, chan: ChanId, levels: LevelSet) {
        self.membership.insert((user, chan), levels);
        self.user_channels.entry(user).or_default().insert(chan);
        self.channel_users.entry(chan).or_default().insert(user);
    }

    pub fn user_levels(&self, user: UserId, chan: ChanId) -> LevelSet {
        self.membership
            .get(&(user, chan))
            .cloned()
            .unwrap_or_default()
    }

    pub fn set_user_levels(&mut self, user: UserId, chan: ChanId, levels: LevelSet) {
        self.membership.insert((user, chan), levels);
    }

    /// Idempotent; cascades to remove `user` if its channel set empties and it is not the bot
    /// (invariant 4).
    pub fn remove_user_from_channel(&mut self, user: UserId, chan: ChanId) {
        self.membership.remove(&(user, chan));
        if let Some(chans) = self.user_channels.get_mut(&user) {
            chans.remove(&chan);
            if chans.is_empty() && user != self.bot_user_id {
                self.remove_user(user);
            }
        }
        if let Some(users) = self.channel_users.get_mut(&chan) {
            users.remove(&user);
        }
    }

    fn remove_user(&mut self, id: UserId) {
        if let Some(user) = self.users.remove(&id) {
            self.nick_index.remove(&user.folded_nick);
        }
        self.user_channels.remove(&id);
    }

    /// Removes every membership of `user` (a QUIT). Returns the channel names it was in.
    pub fn remove_user_everywhere(&mut self, user: UserId) -> Vec<ChanName> {
        let chans: Vec<ChanId> = self
            .user_channels
            .get(&user)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default();
        let names = chans
            .iter()
            .filter_map(|c| self.channels.get(c).map(|c| c.name.clone()))
            .collect();
        for chan in chans {
            self.remove_user_from_channel(user, chan);
        }
        names
    }

    /// Removes the channel entirely (our own PART/KICK from it).
    pub fn remove_channel(&mut self, chan: ChanId) {
        if let Some(users) = self.channel_users.remove(&chan) {
            for user in users {
                if let Some(set) = self.user_channels.get_mut(&user) {
                    set.remove(&chan);
                    if set.is_empty() && user != self.bot_user_id {
                        self.remove_user(user);
                    }
                }
                self.membership.remove(&(user, chan));
            }
        }
        if let Some(chan) = self.channels.remove(&chan) {
            self.chan_index.remove(&chan.name.normalized());
        }
    }

    /// Rekeys the nick index atomically; updates the bot's own cached nick if applicable.
    /// Identity-preserving: the same `UserId` is reachable under `new_nick`, and `old_nick` is
    /// gone from the index (testable property 3).
    pub fn rename_user(&mut self, cm: CaseMapping, old_nick: &str, new_nick: &str) {
        let folded_old = Self::fold(cm, old_nick);
        let Some(id) = self.nick_index.remove(&folded_old) else {
            return;
        };
        let folded_new = Self::fold(cm, new_nick);
        self.nick_index.insert(folded_new.clone(), id);
        if let Some(user) = self.users.get_mut(&id) {
            user.nick = new_nick.to_owned();
            user.folded_nick = folded_new;
        }
    }

    /// Clears all state.
    pub fn close(&mut self) {
        self.users.clear();
        self.nick_index.clear();
        self.channels.clear();
        self.chan_index.clear();
        self.membership.clear();
        self.user_channels.clear();
        self.channel_users.clear();
    }

    /// Returns a deeply frozen copy with stable data that may outlive `close()`.
    pub fn create_snapshot(&self, server_info: &ServerInfo) -> crate::snapshot::DaoSnapshot {
        crate::snapshot::DaoSnapshot::capture(self, server_info)
    }

    pub(crate) fn users_map(&self) -> &HashMap<UserId, User> {
        &self.users
    }

    pub(crate) fn channels_map(&self) -> &HashMap<ChanId, Channel> {
        &self.channels
    }

    pub(crate) fn membership_map(&self) -> &HashMap<(UserId, ChanId), LevelSet> {
        &self.membership
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hm(nick: &str) -> UserHostmask {
        UserHostmask::new(nick)
    }

    #[test]
    fn bot_user_always_exists() {
        let dao = Dao::new("bot");
        assert_eq!(dao.get_user(CaseMapping::Rfc1459, "bot").unwrap().nick, "bot");
    }

    #[test]
    fn membership_is_symmetric() {
        let mut dao = Dao::new("bot");
        let uid = dao
            .get_or_create_user(CaseMapping::Rfc1459, &hm("alice"), LookupContext::Membership)
            .unwrap();
        let cid = dao.get_or_create_channel(ChanNameRef::new("#test"));
        dao.add_user_to_channel(uid, cid, [UserLevel::Voice].into_iter().collect());

        assert!(dao
            .user_channel_names(uid)
            .iter()
            .any(|c| c.as_ref() == ChanNameRef::new("#test")));
        assert!(dao
            .channel_members(ChanNameRef::new("#test"))
            .iter()
            .any(|(u, _)| u.id == uid));
    }

    #[test]
    fn empty_channel_set_removes_non_bot_user() {
        let mut dao = Dao::new("bot");
        let uid = dao
            .get_or_create_user(CaseMapping::Rfc1459, &hm("alice"), LookupContext::Membership)
            .unwrap();
        let cid = dao.get_or_create_channel(ChanNameRef::new("#test"));
        dao.add_user_to_channel(uid, cid, LevelSet::new());
        dao.remove_user_from_channel(uid, cid);

        assert!(dao.get_user(CaseMapping::Rfc1459, "alice").is_none());
    }

    #[test]
    fn bot_survives_zero_memberships() {
        let dao = Dao::new("bot");
        assert!(dao.get_user(CaseMapping::Rfc1459, "bot").is_some());
    }

    #[test]
    fn rename_is_identity_preserving() {
        let mut dao = Dao::new("bot");
        let uid = dao
            .get_or_create_user(CaseMapping::Rfc1459, &hm("alice"), LookupContext::Membership)
            .unwrap();
        dao.rename_user(CaseMapping::Rfc1459, "alice", "alicia");

        assert!(dao.get_user(CaseMapping::Rfc1459, "alice").is_none());
        assert_eq!(dao.get_user(CaseMapping::Rfc1459, "alicia").unwrap().id, uid);
    }

    #[test]
    fn quit_cascade_removes_from_all_channels() {
        let mut dao = Dao::new("bot");
        let uid = dao
            .get_or_create_user(CaseMapping::Rfc1459, &hm("alice"), LookupContext::Membership)
            .unwrap();
        let a = dao.get_or_create_channel(ChanNameRef::new("#a"));
        let b = dao.get_or_create_channel(ChanNameRef::new("#b"));
        dao.add_user_to_channel(uid, a, LevelSet::new());
        dao.add_user_to_channel(uid, b, LevelSet::new());

        let left = dao.remove_user_everywhere(uid);
        assert_eq!(left.len(), 2);
        assert!(dao.get_user(CaseMapping::Rfc1459, "alice").is_none());
        assert!(dao.channel_members(ChanNameRef::new("#a")).is_empty());
        assert!(dao.channel_members(ChanNameRef::new("#b")).is_empty());
    }

    #[test]
    fn get_or_create_user_is_idempotent_and_updates_hostmask() {
        let mut dao = Dao::new("bot");
        let uid1 = dao
            .get_or_create_user(CaseMapping::Rfc1459, &hm("alice"), LookupContext::Membership)
            .unwrap();
        let mut hm2 = hm("alice");
        hm2.login = Some("al".to_owned());
        hm2.hostname = Some("example.org".to_owned());
        let uid2 = dao
            .get_or_create_user(CaseMapping::Rfc1459, &hm2, LookupContext::Membership)
            .unwrap();
        assert_eq!(uid1, uid2);
        let user = dao.get_user(CaseMapping::Rfc1459, "alice").unwrap();
        assert_eq!(user.login.as_deref(), Some("al"));
        assert_eq!(user.hostname.as_deref(), Some("example.org"));
    }

    #[test]
    fn transient_context_never_mutates_dao() {
        let mut dao = Dao::new("bot");
        let id = dao.get_or_create_user(CaseMapping::Rfc1459, &hm("ghost"), LookupContext::Transient);
        assert!(id.is_none());
        assert!(dao.get_user(CaseMapping::Rfc1459, "ghost").is_none());
    }
}
