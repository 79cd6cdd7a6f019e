//! Copy-on-disconnect immutable view of the DAO, published in `Event::Disconnect`. Deeply frozen:
//! mutating the live DAO after `create_snapshot()` can never change a field reachable from here
//! (testable property 6).

use std::collections::HashMap;

use irc_core_common::ChanName;

use crate::dao::{Dao, UserLevel};
use crate::serverinfo::ServerInfo;

#[derive(Debug, Clone)]
pub struct UserSnapshot {
    pub nick: String,
    pub login: Option<String>,
    pub hostname: Option<String>,
    pub realname: Option<String>,
    pub away_message: Option<String>,
    pub server_operator: bool,
    pub channels: Vec<ChanName>,
}

#[derive(Debug, Clone)]
pub struct ChannelSnapshot {
    pub name: ChanName,
    pub topic: Option<String>,
    pub members: Vec<(String, Vec<UserLevel>)>,
}

#[derive(Debug, Clone)]
pub struct DaoSnapshot {
    pub users: Vec<UserSnapshot>,
    pub channels: Vec<ChannelSnapshot>,
    pub network: Option<String>,
}

impl DaoSnapshot {
    pub(crate) fn capture(dao: &Dao, server_info: &ServerInfo) -> DaoSnapshot {
        let users = dao
            .users_map()
            .values()
            .map(|u| UserSnapshot {
                nick: u.nick.clone(),
                login: u.login.clone(),
                hostname: u.hostname.clone(),
                realname: u.realname.clone(),
                away_message: u.away_message.clone(),
                server_operator: u.server_operator,
                channels: dao.user_channel_names(u.id),
            })
            .collect();

        let mut members_by_chan: HashMap<_, Vec<(String, Vec<UserLevel>)>> = HashMap::new();
        for ((user_id, chan_id), levels) in dao.membership_map() {
            if let Some(user) = dao.get_user_by_id(*user_id) {
                let mut levels: Vec<UserLevel> = levels.iter().copied().collect();
                levels.sort();
                members_by_chan
                    .entry(*chan_id)
                    .or_default()
                    .push((user.nick.clone(), levels));
            }
        }

        let channels = dao
            .channels_map()
            .values()
            .map(|c| ChannelSnapshot {
                name: c.name.clone(),
                topic: c.topic.as_ref().map(|t| t.text.clone()),
                members: members_by_chan.remove(&c.id).unwrap_or_default(),
            })
            .collect();

        DaoSnapshot {
            users,
            channels,
            network: server_info.network.clone(),
        }
    }
}
