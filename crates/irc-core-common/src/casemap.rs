//! Nick case folding per the server's advertised ISUPPORT CASEMAPPING token.
//!
//! Unlike channel names (folded with a single fixed rule, see `ChanName`), nick
//! equality depends on what the server tells us in 005 CASEMAPPING. Until we've
//! seen that numeric we default to `Rfc1459`, matching every ircd still in
//! widespread use.

/// Nick (and, in RFC 1459 terms, "nickname") case-folding rule learned from
/// ISUPPORT CASEMAPPING.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseMapping {
    /// `{`, `}`, `|`, `^` fold onto `[`, `]`, `\`, `~` in addition to ASCII
    /// lowercasing. The default for servers that never send CASEMAPPING.
    Rfc1459,
    /// Like `Rfc1459` but `^` does not fold onto `~`.
    Rfc1459Strict,
    /// Plain ASCII lowercasing, no special-case punctuation.
    Ascii,
}

impl Default for CaseMapping {
    fn default() -> Self {
        CaseMapping::Rfc1459
    }
}

impl CaseMapping {
    /// Parse a CASEMAPPING ISUPPORT value. Unknown values fall back to the
    /// RFC 1459 default rather than erroring — servers occasionally send
    /// nonstandard values (e.g. `ascii` vs `ASCII`).
    pub fn parse(value: &str) -> CaseMapping {
        match value.to_ascii_lowercase().as_str() {
            "ascii" => CaseMapping::Ascii,
            "rfc1459-strict" => CaseMapping::Rfc1459Strict,
            _ => CaseMapping::Rfc1459,
        }
    }

    fn fold_char(self, c: char) -> char {
        match self {
            CaseMapping::Ascii => c.to_ascii_lowercase(),
            CaseMapping::Rfc1459Strict => match c {
                '[' => '{',
                ']' => '}',
                '\\' => '|',
                _ => c.to_ascii_lowercase(),
            },
            CaseMapping::Rfc1459 => match c {
                '[' => '{',
                ']' => '}',
                '\\' => '|',
                '~' => '^',
                _ => c.to_ascii_lowercase(),
            },
        }
    }

    /// Fold a nick to its canonical form for use as a DAO index key.
    pub fn fold(self, nick: &str) -> String {
        nick.chars().map(|c| self.fold_char(c)).collect()
    }

    /// Case-insensitive (under this mapping) nick equality.
    pub fn eq(self, a: &str, b: &str) -> bool {
        self.fold(a) == self.fold(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_is_plain_lowercase() {
        assert!(CaseMapping::Ascii.eq("Foo[Bar]", "foo[bar]"));
        assert!(!CaseMapping::Ascii.eq("Foo[Bar]", "foo{bar}"));
    }

    #[test]
    fn rfc1459_folds_brackets_and_tilde() {
        let cm = CaseMapping::Rfc1459;
        assert!(cm.eq("Foo[Bar]", "foo{bar}"));
        assert!(cm.eq("a~b", "A^B"));
    }

    #[test]
    fn rfc1459_strict_does_not_fold_tilde() {
        let cm = CaseMapping::Rfc1459Strict;
        assert!(cm.eq("Foo[Bar]", "foo{bar}"));
        assert!(!cm.eq("a~b", "A^B"));
    }

    #[test]
    fn parse_falls_back_to_rfc1459() {
        assert_eq!(CaseMapping::parse("ascii"), CaseMapping::Ascii);
        assert_eq!(
            CaseMapping::parse("rfc1459-strict"),
            CaseMapping::Rfc1459Strict
        );
        assert_eq!(CaseMapping::parse("bogus"), CaseMapping::Rfc1459);
    }
}
