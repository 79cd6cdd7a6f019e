//! Capture of 004/005 (ISUPPORT) values: prefix modes, channel types, channel-mode classes, max
//! targets, case mapping. Fed by `InputParser`, read by the DAO's mode-parsing code and by the
//! pinger/PING-target logic.

use std::collections::HashMap;

use irc_core_common::CaseMapping;

use crate::dao::UserLevel;

/// CHANMODES classes from ISUPPORT: A (list), B (always takes an arg), C (arg when set, none when
/// unset), D (boolean, never takes an arg).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChanModeClass {
    ListType,
    AlwaysArg,
    SetArg,
    Boolean,
}

#[derive(Debug, Clone)]
pub struct ServerInfo {
    /// From 004: server name and daemon version.
    pub server_name: Option<String>,
    pub server_version: Option<String>,

    /// PREFIX=(ov)@+ decoded into mode-letter -> UserLevel, in the order declared (best first).
    pub prefix_levels: Vec<(char, UserLevel)>,
    /// The matching symbol for each mode letter, same order as `prefix_levels` (e.g. '@' for 'o').
    pub prefix_symbols: HashMap<char, char>,

    pub chan_modes: HashMap<char, ChanModeClass>,
    pub case_mapping: CaseMapping,
    pub chan_types: String,
    pub network: Option<String>,
    pub max_targets: Option<u32>,
}

impl Default for ServerInfo {
    fn default() -> Self {
        ServerInfo {
            server_name: None,
            server_version: None,
            prefix_levels: default_prefix_levels(),
            prefix_symbols: default_prefix_symbols(),
            chan_modes: HashMap::new(),
            case_mapping: CaseMapping::default(),
            chan_types: "#&".to_owned(),
            network: None,
            max_targets: None,
        }
    }
}

fn default_prefix_levels() -> Vec<(char, UserLevel)> {
    vec![('o', UserLevel::Op), ('v', UserLevel::Voice)]
}

fn default_prefix_symbols() -> HashMap<char, char> {
    [('o', '@'), ('v', '+')].into_iter().collect()
}

/// The mode letters every ircd in practice uses for these levels, regardless of what order a
/// particular PREFIX token lists them in.
fn conventional_level(mode: char) -> Option<UserLevel> {
    match mode {
        'q' => Some(UserLevel::Owner),
        'a' => Some(UserLevel::SuperOp),
        'o' => Some(UserLevel::Op),
        'h' => Some(UserLevel::HalfOp),
        'v' => Some(UserLevel::Voice),
        _ => None,
    }
}

/// For a mode letter PREFIX doesn't use conventionally: best-ranked (`i == 0`) maps to `Op`,
/// worst-ranked (`i == n - 1`) maps to `Voice`, evenly spread in between.
fn fallback_level(i: usize, n: usize) -> UserLevel {
    const RANGE: [UserLevel; 3] = [UserLevel::Op, UserLevel::HalfOp, UserLevel::Voice];
    if n <= 1 {
        return UserLevel::Op;
    }
    let idx = i * (RANGE.len() - 1) / (n - 1);
    RANGE[idx]
}

impl ServerInfo {
    pub fn new() -> ServerInfo {
        ServerInfo::default()
    }

    /// Level for a mode letter (e.g. `'o'` -> `Op`), if PREFIX declared it.
    pub fn level_for_mode(&self, mode: char) -> Option<UserLevel> {
        self.prefix_levels
            .iter()
            .find(|(m, _)| *m == mode)
            .map(|(_, l)| *l)
    }

    /// Level for a NAMES-reply prefix symbol (e.g. `'@'` -> `Op`).
    pub fn level_for_symbol(&self, symbol: char) -> Option<UserLevel> {
        self.prefix_symbols
            .iter()
            .find(|(_, s)| **s == symbol)
            .and_then(|(mode, _)| self.level_for_mode(*mode))
    }

    pub fn chan_mode_class(&self, mode: char) -> Option<ChanModeClass> {
        self.chan_modes.get(&mode).copied()
    }

    /// Feed an ISUPPORT (005) token, e.g. `"PREFIX=(ov)@+"` or `"CASEMAPPING=rfc1459"`.
    pub fn apply_isupport_token(&mut self, token: &str) {
        let (key, value) = match token.split_once('=') {
            Some((k, v)) => (k, Some(v)),
            None => (token, None),
        };

        match key {
            "PREFIX" => {
                if let Some(value) = value {
                    self.parse_prefix(value);
                }
            }
            "CHANMODES" => {
                if let Some(value) = value {
                    self.parse_chanmodes(value);
                }
            }
            "CASEMAPPING" => {
                if let Some(value) = value {
                    self.case_mapping = CaseMapping::parse(value);
                }
            }
            "CHANTYPES" => {
                if let Some(value) = value {
                    self.chan_types = value.to_owned();
                }
            }
            "NETWORK" => {
                self.network = value.map(|v| v.to_owned());
            }
            "MAXTARGETS" => {
                self.max_targets = value.and_then(|v| v.parse().ok());
            }
            _ => {}
        }
    }

    /// `(ov)@+` -> `[('o', Op), ('v', Voice)]` plus the matching symbol table. Levels earlier in
    /// the PREFIX string rank higher (spec's default `(ov)@+` has op outrank voice).
    fn parse_prefix(&mut self, value: &str) {
        let Some(close) = value.find(')') else {
            return;
        };
        if !value.starts_with('(') {
            return;
        }
        let modes = &value[1..close];
        let symbols = &value[close + 1..];
        if modes.len() != symbols.len() {
            return;
        }

        let n = modes.len();
        let mut prefix_levels = Vec::with_capacity(n);
        let mut prefix_symbols = HashMap::with_capacity(n);
        for (i, (mode, symbol)) in modes.chars().zip(symbols.chars()).enumerate() {
            let level = conventional_level(mode).unwrap_or_else(|| fallback_level(i, n));
            prefix_levels.push((mode, level));
            prefix_symbols.insert(mode, symbol);
        }
        self.prefix_levels = prefix_levels;
        self.prefix_symbols = prefix_symbols;
    }

    fn parse_chanmodes(&mut self, value: &str) {
        let mut classes = HashMap::new();
        let groups: Vec<&str> = value.split(',').collect();
        let tagged = [
            ChanModeClass::ListType,
            ChanModeClass::AlwaysArg,
            ChanModeClass::SetArg,
            ChanModeClass::Boolean,
        ];
        for (group, class) in groups.into_iter().zip(tagged.into_iter()) {
            for c in group.chars() {
                classes.insert(c, class);
            }
        }
        self.chan_modes = classes;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_prefix_is_op_voice() {
        let info = ServerInfo::new();
        assert_eq!(info.level_for_mode('o'), Some(UserLevel::Op));
        assert_eq!(info.level_for_mode('v'), Some(UserLevel::Voice));
        assert_eq!(info.level_for_symbol('@'), Some(UserLevel::Op));
        assert_eq!(info.level_for_symbol('+'), Some(UserLevel::Voice));
    }

    #[test]
    fn parses_five_level_prefix() {
        let mut info = ServerInfo::new();
        info.apply_isupport_token("PREFIX=(qaohv)~&@%+");
        assert_eq!(info.level_for_mode('q'), Some(UserLevel::Owner));
        assert_eq!(info.level_for_mode('a'), Some(UserLevel::SuperOp));
        assert_eq!(info.level_for_mode('o'), Some(UserLevel::Op));
        assert_eq!(info.level_for_mode('h'), Some(UserLevel::HalfOp));
        assert_eq!(info.level_for_mode('v'), Some(UserLevel::Voice));
        assert_eq!(info.level_for_symbol('~'), Some(UserLevel::Owner));
    }

    #[test]
    fn parses_chanmodes_classes() {
        let mut info = ServerInfo::new();
        info.apply_isupport_token("CHANMODES=eIbq,k,flj,CFLMPQScgimnprstz");
        assert_eq!(info.chan_mode_class('b'), Some(ChanModeClass::ListType));
        assert_eq!(info.chan_mode_class('k'), Some(ChanModeClass::AlwaysArg));
        assert_eq!(info.chan_mode_class('l'), Some(ChanModeClass::SetArg));
        assert_eq!(info.chan_mode_class('n'), Some(ChanModeClass::Boolean));
    }

    #[test]
    fn parses_casemapping_and_chantypes() {
        let mut info = ServerInfo::new();
        info.apply_isupport_token("CASEMAPPING=ascii");
        info.apply_isupport_token("CHANTYPES=#&+");
        assert_eq!(info.case_mapping, CaseMapping::Ascii);
        assert_eq!(info.chan_types, "#&+");
    }
}
