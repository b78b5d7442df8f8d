//! Core tmux domain identifiers.
//!
//! tmux names entities with a sigil plus a number: panes are `%N`, windows
//! are `@N`, sessions are `$N`. These are first-class domain values and are
//! never conflated with the core's own opaque identifiers.

use std::fmt;
use std::str::FromStr;

macro_rules! tmux_id {
    ($(#[$doc:meta])* $name:ident, $sigil:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($sigil, "{}"), self.0)
            }
        }

        impl FromStr for $name {
            type Err = ();

            /// Parse from the sigil-prefixed form (`%5`, `@2`, `$0`).
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let digits = s.strip_prefix($sigil).ok_or(())?;
                digits.parse().map(Self).map_err(|_| ())
            }
        }
    };
}

tmux_id!(
    /// tmux pane ID (e.g. `%0`, `%1`).
    TmuxPaneId,
    "%"
);
tmux_id!(
    /// tmux window ID (e.g. `@0`, `@1`).
    TmuxWindowId,
    "@"
);
tmux_id!(
    /// tmux session ID (e.g. `$0`, `$1`).
    TmuxSessionId,
    "$"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pane_id() {
        assert_eq!("%5".parse(), Ok(TmuxPaneId(5)));
        assert_eq!("%123".parse(), Ok(TmuxPaneId(123)));
        assert!("@5".parse::<TmuxPaneId>().is_err());
        assert!("%".parse::<TmuxPaneId>().is_err());
        assert!("%x".parse::<TmuxPaneId>().is_err());
    }

    #[test]
    fn test_parse_window_id() {
        assert_eq!("@5".parse(), Ok(TmuxWindowId(5)));
        assert!("%5".parse::<TmuxWindowId>().is_err());
    }

    #[test]
    fn test_roundtrip_display() {
        assert_eq!(TmuxPaneId(7).to_string(), "%7");
        assert_eq!(TmuxWindowId(2).to_string(), "@2");
        assert_eq!(TmuxSessionId(0).to_string(), "$0");
        assert_eq!(
            TmuxPaneId(7).to_string().parse::<TmuxPaneId>(),
            Ok(TmuxPaneId(7))
        );
    }
}
