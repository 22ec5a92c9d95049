//! Session identity for the conversation on screen.
//!
//! A brand-new conversation has no server id until the backend announces one.
//! The first submit mints a placeholder so the user message and the reply can
//! be attributed to something; the placeholder is swapped for the real id once
//! `session-created` (or a provider's system init) arrives.

use chrono::{DateTime, Utc};
use std::collections::HashSet;

use crate::backends::utils::{is_placeholder_session_id, placeholder_session_id};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionIdentity {
    #[default]
    NoSession,
    Pending {
        placeholder: String,
    },
    Confirmed {
        id: String,
    },
}

/// What a confirmation or system init did to the view identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityChange {
    Unchanged,
    /// The view had no id at all and adopted this one.
    Adopted(String),
    /// A placeholder was confirmed; entries must be re-attributed.
    Replaced { placeholder: String, real: String },
    /// The backend moved the running conversation to a new session.
    Rollover { from: String, to: String },
    /// The id belongs to some other conversation.
    Ignored,
}

#[derive(Debug, Default)]
pub struct SessionReconciler {
    identity: SessionIdentity,
    /// Former placeholders and superseded ids of the same logical conversation.
    aliases: HashSet<String>,
    awaiting_reply: bool,
}

impl SessionReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reconciler for an existing session opened from the sidebar.
    pub fn confirmed(id: impl Into<String>) -> Self {
        Self {
            identity: SessionIdentity::Confirmed { id: id.into() },
            ..Default::default()
        }
    }

    pub fn identity(&self) -> &SessionIdentity {
        &self.identity
    }

    pub fn concrete_id(&self) -> Option<&str> {
        match &self.identity {
            SessionIdentity::Confirmed { id } => Some(id),
            _ => None,
        }
    }

    pub fn placeholder(&self) -> Option<&str> {
        match &self.identity {
            SessionIdentity::Pending { placeholder, .. } => Some(placeholder),
            _ => None,
        }
    }

    /// Concrete id if known, otherwise the placeholder.
    pub fn active_view_id(&self) -> Option<&str> {
        match &self.identity {
            SessionIdentity::NoSession => None,
            SessionIdentity::Pending { placeholder, .. } => Some(placeholder),
            SessionIdentity::Confirmed { id } => Some(id),
        }
    }

    pub fn is_awaiting_reply(&self) -> bool {
        self.awaiting_reply
    }

    /// Called on every submit. Mints a placeholder for a brand-new conversation
    /// and returns the id new entries should be attributed to.
    pub fn begin_submit(&mut self, now: DateTime<Utc>) -> String {
        self.awaiting_reply = true;
        match &self.identity {
            SessionIdentity::NoSession => {
                let placeholder = placeholder_session_id(now.timestamp_millis());
                log::debug!("Minted placeholder session {}", placeholder);
                self.identity = SessionIdentity::Pending {
                    placeholder: placeholder.clone(),
                };
                placeholder
            }
            SessionIdentity::Pending { placeholder, .. } => placeholder.clone(),
            SessionIdentity::Confirmed { id } => id.clone(),
        }
    }

    /// The turn ended; a different id after this point is not a rollover.
    pub fn finish_turn(&mut self) {
        self.awaiting_reply = false;
    }

    /// Handle `session-created`.
    ///
    /// Only a placeholder (or a view still waiting for its first id) is
    /// replaced. Once the view has a concrete id, other ids belong to other
    /// conversations; rollover is announced through the system init instead.
    pub fn confirm(&mut self, real_id: &str) -> IdentityChange {
        match &self.identity {
            SessionIdentity::NoSession => {
                // Only adopt if this client started the conversation.
                if !self.awaiting_reply {
                    return IdentityChange::Ignored;
                }
                self.identity = SessionIdentity::Confirmed {
                    id: real_id.to_string(),
                };
                IdentityChange::Adopted(real_id.to_string())
            }
            SessionIdentity::Pending { placeholder, .. } => {
                let placeholder = placeholder.clone();
                log::info!("Session {} confirmed as {}", placeholder, real_id);
                self.aliases.insert(placeholder.clone());
                self.identity = SessionIdentity::Confirmed {
                    id: real_id.to_string(),
                };
                IdentityChange::Replaced {
                    placeholder,
                    real: real_id.to_string(),
                }
            }
            SessionIdentity::Confirmed { id } if id == real_id => IdentityChange::Unchanged,
            SessionIdentity::Confirmed { id } => {
                log::debug!("Session {} created while viewing {}", real_id, id);
                IdentityChange::Ignored
            }
        }
    }

    /// Handle a provider system init announcing `init_id`.
    pub fn on_system_init(&mut self, init_id: &str) -> IdentityChange {
        match &self.identity {
            SessionIdentity::NoSession => {
                self.identity = SessionIdentity::Confirmed {
                    id: init_id.to_string(),
                };
                IdentityChange::Adopted(init_id.to_string())
            }
            SessionIdentity::Pending { .. } => self.confirm(init_id),
            SessionIdentity::Confirmed { id } if id == init_id => IdentityChange::Unchanged,
            SessionIdentity::Confirmed { .. } => self.roll_over(init_id),
        }
    }

    fn roll_over(&mut self, to: &str) -> IdentityChange {
        let from = match &self.identity {
            SessionIdentity::Confirmed { id } if self.awaiting_reply => id.clone(),
            _ => return IdentityChange::Ignored,
        };
        log::info!("Session {} rolled over to {}", from, to);
        self.aliases.insert(from.clone());
        self.identity = SessionIdentity::Confirmed { id: to.to_string() };
        IdentityChange::Rollover {
            from,
            to: to.to_string(),
        }
    }

    /// Whether `id` names the conversation on screen, under any of its ids.
    pub fn is_same_conversation(&self, id: &str) -> bool {
        self.active_view_id() == Some(id) || self.aliases.contains(id)
    }

    /// Show another conversation (or a blank one with `None`).
    pub fn switch_to(&mut self, id: Option<&str>) {
        self.identity = match id {
            Some(id) if is_placeholder_session_id(id) => SessionIdentity::Pending {
                placeholder: id.to_string(),
            },
            Some(id) => SessionIdentity::Confirmed { id: id.to_string() },
            None => SessionIdentity::NoSession,
        };
        self.aliases.clear();
        self.awaiting_reply = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(millis: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(millis).unwrap()
    }

    #[test]
    fn test_placeholder_minted_once_then_confirmed() {
        let mut identity = SessionReconciler::new();
        assert_eq!(identity.active_view_id(), None);

        let first = identity.begin_submit(at(1_000));
        assert_eq!(first, "new-session-1000");
        assert_eq!(identity.begin_submit(at(2_000)), first);

        let change = identity.confirm("abc123");
        assert_eq!(
            change,
            IdentityChange::Replaced {
                placeholder: first.clone(),
                real: "abc123".to_string()
            }
        );
        assert_eq!(identity.concrete_id(), Some("abc123"));
        assert!(identity.is_same_conversation(&first));
        assert!(identity.is_same_conversation("abc123"));
        assert!(!identity.is_same_conversation("other"));
    }

    #[test]
    fn test_direct_confirmation_without_placeholder() {
        let mut identity = SessionReconciler::new();
        assert_eq!(identity.on_system_init("s1"), IdentityChange::Adopted("s1".to_string()));
        assert_eq!(identity.identity(), &SessionIdentity::Confirmed { id: "s1".into() });
        assert_eq!(identity.on_system_init("s1"), IdentityChange::Unchanged);
    }

    #[test]
    fn test_session_created_for_idle_view_is_ignored() {
        let mut identity = SessionReconciler::new();
        assert_eq!(identity.confirm("from-another-tab"), IdentityChange::Ignored);
        assert_eq!(identity.identity(), &SessionIdentity::NoSession);
    }

    #[test]
    fn test_rollover_only_while_awaiting_reply() {
        let mut identity = SessionReconciler::confirmed("old");
        assert_eq!(identity.on_system_init("new"), IdentityChange::Ignored);

        identity.begin_submit(at(5));
        assert_eq!(
            identity.on_system_init("new"),
            IdentityChange::Rollover {
                from: "old".to_string(),
                to: "new".to_string()
            }
        );
        assert_eq!(identity.concrete_id(), Some("new"));
        assert!(identity.is_same_conversation("old"));
    }

    #[test]
    fn test_switch_clears_aliases() {
        let mut identity = SessionReconciler::new();
        let placeholder = identity.begin_submit(at(7));
        identity.confirm("abc");
        identity.finish_turn();

        identity.switch_to(Some("xyz"));

        assert!(!identity.is_same_conversation(&placeholder));
        assert!(!identity.is_awaiting_reply());
        identity.switch_to(None);
        assert_eq!(identity.identity(), &SessionIdentity::NoSession);
    }

    #[test]
    fn test_session_created_never_replaces_confirmed_view() {
        let mut identity = SessionReconciler::confirmed("s");
        identity.begin_submit(at(9));

        assert_eq!(identity.confirm("a1"), IdentityChange::Ignored);
        assert_eq!(identity.concrete_id(), Some("s"));
        assert!(identity.is_awaiting_reply());
        assert!(!identity.is_same_conversation("a1"));
    }

    #[test]
    fn test_switch_back_to_placeholder_stays_pending() {
        let mut identity = SessionReconciler::new();
        let placeholder = identity.begin_submit(at(11));
        identity.switch_to(Some("other"));

        identity.switch_to(Some(&placeholder));

        assert_eq!(identity.concrete_id(), None);
        assert_eq!(identity.placeholder(), Some(placeholder.as_str()));
        assert_eq!(
            identity.confirm("real"),
            IdentityChange::Replaced {
                placeholder,
                real: "real".to_string()
            }
        );
    }
}
