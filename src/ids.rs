//! Opaque identifiers for core entities.
//!
//! These are random 128-bit tokens assigned at creation time. They are never
//! derived from tmux identifiers (`%N`, `@N`, `$N`), which are separate
//! domain values owned by the tmux module.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! opaque_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        pub struct $name(Uuid);

        impl $name {
            /// Allocate a fresh identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                // Short form: first uuid group is enough for log correlation.
                let s = self.0.as_simple().to_string();
                write!(f, "{}", &s[..8])
            }
        }
    };
}

opaque_id!(
    /// Identifies a native pane (a leaf of a tab's layout tree).
    PaneId
);
opaque_id!(
    /// Identifies a tab in the workspace.
    TabId
);
opaque_id!(
    /// Identifies a child process tracked by the PTY session manager.
    PtySessionId
);
opaque_id!(
    /// Identifies one tmux control-mode connection (one `tmux -CC` child).
    ControlSessionId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(PaneId::new(), PaneId::new());
        assert_ne!(TabId::new(), TabId::new());
    }

    #[test]
    fn test_display_is_short() {
        let id = PtySessionId::new();
        assert_eq!(id.to_string().len(), 8);
    }
}
