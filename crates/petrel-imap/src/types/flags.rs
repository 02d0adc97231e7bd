//! Message flags.
//!
//! System flags are kept in a compact bitset; custom keywords (including
//! Gmail labels surfaced as keywords) live in an ordered list beside it.

/// A single message flag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Flag {
    /// Message has been read.
    Seen,
    /// Message has been answered.
    Answered,
    /// Message is flagged for special attention.
    Flagged,
    /// Message is marked for deletion.
    Deleted,
    /// Message is a draft.
    Draft,
    /// Message is recent (first session to see it).
    Recent,
    /// Custom keyword flag (e.g. `$Forwarded`, `$MDNSent`, Gmail labels).
    Keyword(String),
}

impl Flag {
    /// Parses a flag string. Unknown atoms become keywords.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "\\SEEN" => Self::Seen,
            "\\ANSWERED" => Self::Answered,
            "\\FLAGGED" => Self::Flagged,
            "\\DELETED" => Self::Deleted,
            "\\DRAFT" => Self::Draft,
            "\\RECENT" => Self::Recent,
            _ => Self::Keyword(s.to_string()),
        }
    }

    /// Returns the flag as an IMAP string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Seen => "\\Seen",
            Self::Answered => "\\Answered",
            Self::Flagged => "\\Flagged",
            Self::Deleted => "\\Deleted",
            Self::Draft => "\\Draft",
            Self::Recent => "\\Recent",
            Self::Keyword(s) => s,
        }
    }

    const fn bit(&self) -> u8 {
        match self {
            Self::Seen => 1 << 0,
            Self::Answered => 1 << 1,
            Self::Flagged => 1 << 2,
            Self::Deleted => 1 << 3,
            Self::Draft => 1 << 4,
            Self::Recent => 1 << 5,
            Self::Keyword(_) => 0,
        }
    }
}

impl std::fmt::Display for Flag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Collection of message flags: a system-flag bitset plus an ordered
/// custom-keyword list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Flags {
    bits: u8,
    keywords: Vec<String>,
}

impl Flags {
    /// Creates an empty flags collection.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            bits: 0,
            keywords: Vec::new(),
        }
    }

    /// Creates flags from a list.
    #[must_use]
    pub fn from_vec(flags: Vec<Flag>) -> Self {
        let mut out = Self::new();
        for f in flags {
            out.insert(f);
        }
        out
    }

    /// Adds a flag. Keywords are deduplicated but keep insertion order.
    pub fn insert(&mut self, flag: Flag) {
        match flag {
            Flag::Keyword(kw) => {
                if !self.keywords.iter().any(|k| k.eq_ignore_ascii_case(&kw)) {
                    self.keywords.push(kw);
                }
            }
            f => self.bits |= f.bit(),
        }
    }

    /// Removes a flag.
    pub fn remove(&mut self, flag: &Flag) {
        match flag {
            Flag::Keyword(kw) => self.keywords.retain(|k| !k.eq_ignore_ascii_case(kw)),
            f => self.bits &= !f.bit(),
        }
    }

    /// Returns true if the flag is present.
    #[must_use]
    pub fn contains(&self, flag: &Flag) -> bool {
        match flag {
            Flag::Keyword(kw) => self.keywords.iter().any(|k| k.eq_ignore_ascii_case(kw)),
            f => self.bits & f.bit() != 0,
        }
    }

    /// Returns true if the message has been seen.
    #[must_use]
    pub const fn is_seen(&self) -> bool {
        self.bits & (1 << 0) != 0
    }

    /// Returns true if the message is marked for deletion.
    #[must_use]
    pub const fn is_deleted(&self) -> bool {
        self.bits & (1 << 3) != 0
    }

    /// Returns true if the message is a draft.
    #[must_use]
    pub const fn is_draft(&self) -> bool {
        self.bits & (1 << 4) != 0
    }

    /// Returns the custom keywords in insertion order.
    #[must_use]
    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    /// Returns an iterator over all flags, system flags first.
    pub fn iter(&self) -> impl Iterator<Item = Flag> + '_ {
        const SYSTEM: [Flag; 6] = [
            Flag::Seen,
            Flag::Answered,
            Flag::Flagged,
            Flag::Deleted,
            Flag::Draft,
            Flag::Recent,
        ];
        SYSTEM
            .into_iter()
            .filter(|f| self.bits & f.bit() != 0)
            .chain(self.keywords.iter().cloned().map(Flag::Keyword))
    }

    /// Returns true if there are no flags at all.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.bits == 0 && self.keywords.is_empty()
    }

    /// Keeps only the flags also present in `permitted`, honoring the
    /// `\*` wildcard for keywords.
    #[must_use]
    pub fn intersect_permitted(&self, permitted: &PermanentFlags) -> Self {
        let mut out = Self::new();
        for f in self.iter() {
            if permitted.allows(&f) {
                out.insert(f);
            }
        }
        out
    }
}

impl std::fmt::Display for Flags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for flag in self.iter() {
            if !first {
                write!(f, " ")?;
            }
            write!(f, "{flag}")?;
            first = false;
        }
        Ok(())
    }
}

/// The PERMANENTFLAGS set reported by SELECT.
///
/// Tracks which flags survive the session and whether the server accepts
/// arbitrary new keywords (`\*`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermanentFlags {
    flags: Flags,
    accepts_new_keywords: bool,
    /// Whether a PERMANENTFLAGS response was seen at all; absent means
    /// everything is assumed settable.
    reported: bool,
}

impl PermanentFlags {
    /// Builds the set from a parsed flag list, recognizing the `\*` atom.
    #[must_use]
    pub fn from_reported(raw: &[String]) -> Self {
        let mut flags = Flags::new();
        let mut accepts_new_keywords = false;
        for s in raw {
            if s == "\\*" {
                accepts_new_keywords = true;
            } else {
                flags.insert(Flag::parse(s));
            }
        }
        Self {
            flags,
            accepts_new_keywords,
            reported: true,
        }
    }

    /// Returns true if the given flag may be stored permanently.
    #[must_use]
    pub fn allows(&self, flag: &Flag) -> bool {
        if !self.reported {
            return true;
        }
        match flag {
            Flag::Keyword(_) => self.accepts_new_keywords || self.flags.contains(flag),
            f => self.flags.contains(f),
        }
    }

    /// Returns true if the server accepts arbitrary new keywords.
    #[must_use]
    pub const fn accepts_new_keywords(&self) -> bool {
        self.accepts_new_keywords || !self.reported
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parse_system_flags() {
        assert_eq!(Flag::parse("\\Seen"), Flag::Seen);
        assert_eq!(Flag::parse("\\SEEN"), Flag::Seen);
        assert_eq!(Flag::parse("\\Deleted"), Flag::Deleted);
        assert_eq!(Flag::parse("$Forwarded"), Flag::Keyword("$Forwarded".into()));
    }

    #[test]
    fn insert_and_contains() {
        let mut flags = Flags::new();
        flags.insert(Flag::Seen);
        flags.insert(Flag::Keyword("$Label1".into()));
        assert!(flags.is_seen());
        assert!(flags.contains(&Flag::Keyword("$label1".into())));
        assert!(!flags.is_deleted());
    }

    #[test]
    fn keyword_dedup_keeps_order() {
        let mut flags = Flags::new();
        flags.insert(Flag::Keyword("b".into()));
        flags.insert(Flag::Keyword("a".into()));
        flags.insert(Flag::Keyword("B".into()));
        assert_eq!(flags.keywords(), &["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn display_space_separated() {
        let flags = Flags::from_vec(vec![Flag::Seen, Flag::Deleted]);
        assert_eq!(flags.to_string(), "\\Seen \\Deleted");
    }

    #[test]
    fn permanent_flags_wildcard() {
        let permitted =
            PermanentFlags::from_reported(&["\\Seen".into(), "\\Deleted".into(), "\\*".into()]);
        assert!(permitted.allows(&Flag::Seen));
        assert!(permitted.allows(&Flag::Keyword("$Custom".into())));
        assert!(!permitted.allows(&Flag::Draft));
    }

    #[test]
    fn permanent_flags_without_wildcard_rejects_keywords() {
        let permitted = PermanentFlags::from_reported(&["\\Seen".into()]);
        assert!(!permitted.allows(&Flag::Keyword("$Custom".into())));
        assert!(!permitted.accepts_new_keywords());
    }

    #[test]
    fn unreported_permits_everything() {
        let permitted = PermanentFlags::default();
        assert!(permitted.allows(&Flag::Keyword("anything".into())));
    }

    #[test]
    fn intersect_permitted_drops_unsettable() {
        let mut flags = Flags::from_vec(vec![Flag::Seen, Flag::Deleted]);
        flags.insert(Flag::Keyword("$Junk".into()));
        let permitted = PermanentFlags::from_reported(&["\\Seen".into(), "\\Deleted".into()]);
        let kept = flags.intersect_permitted(&permitted);
        assert!(kept.is_seen());
        assert!(kept.is_deleted());
        assert!(kept.keywords().is_empty());
    }
}
