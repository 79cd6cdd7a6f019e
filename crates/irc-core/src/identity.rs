//! Identity promotion rule (spec §4.3): on any inbound line with a hostmask prefix, look the user
//! up by case-mapped nick. If found, refresh login/hostname (the incoming values are always the
//! latest). If not found and the context is a membership context, create a `User`; otherwise leave
//! the DAO untouched and hand the event a transient hostmask.

use irc_core_common::CaseMapping;
use irc_core_wire::{Pfx, UserHostmask};

use crate::dao::{Dao, LookupContext, UserId};

/// Resolves an inbound prefix against the DAO. Server prefixes (`Pfx::Server`) never promote —
/// there's no user to look up. `Pfx::Ambiguous` is treated as a bare nick, matching
/// `UserHostmask::nick()`'s rule that bare names in membership contexts are nicks.
///
/// Every line with a resolvable hostmask is evidence the sender is active, so this also refreshes
/// `User::last_activity` (spec §3) for whichever user it resolved to.
pub fn resolve_pfx(dao: &mut Dao, cm: CaseMapping, pfx: &Pfx, ctx: LookupContext) -> Option<(UserHostmask, Option<UserId>)> {
    let hostmask = match pfx {
        Pfx::User(hostmask) => hostmask.clone(),
        Pfx::Ambiguous(nick) => UserHostmask::new(nick.clone()),
        Pfx::Server(_) => return None,
    };
    let id = dao.get_or_create_user(cm, &hostmask, ctx);
    if let Some(uid) = id {
        dao.touch_user(uid);
    }
    Some((hostmask, id))
}
