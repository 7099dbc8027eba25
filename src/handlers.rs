//! Handler registry
//!
//! Tasks that report a change notify handlers by name. Notifications are
//! queued per host and nothing runs until the host's task phase is over;
//! [`HandlerRegistry::flush`] then hands back the handlers to run:
//!
//! - **Deduplicated**: a handler notified by many tasks runs once
//! - **Declaration order**: handlers fire in the order they were declared,
//!   not the order they were notified
//! - **Once per play**: a handler that already fired for a host is not
//!   fired again by later notifications in the same play
//!
//! # Listen Directive
//!
//! Handlers can answer to extra notification names using `listen`:
//!
//! ```yaml
//! handlers:
//!   - name: restart web services
//!     listen:
//!       - restart nginx
//!       - restart apache
//!     command: systemctl restart web.target
//! ```
//!
//! A notification matching several handlers queues all of them.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;

pub use crate::playbook::Handler;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HandlerError {
    #[error("no handler named or listening for '{name}'")]
    Unknown { name: String },
}

/// Pending and fired handlers, keyed by host
#[derive(Debug, Clone, Default)]
pub struct HandlerRegistry {
    handlers: Arc<[Handler]>,
    pending: HashMap<String, BTreeSet<usize>>,
    fired: HashMap<String, HashSet<usize>>,
}

impl HandlerRegistry {
    pub fn new(handlers: impl Into<Arc<[Handler]>>) -> Self {
        Self {
            handlers: handlers.into(),
            pending: HashMap::new(),
            fired: HashMap::new(),
        }
    }

    /// All handlers, in declaration order
    pub fn handlers(&self) -> &[Handler] {
        &self.handlers
    }

    /// Queue every handler answering to `name` for `host`.
    ///
    /// Returns the number of handlers newly queued; a repeat notification
    /// returns 0.
    pub fn notify(&mut self, host: &str, name: &str) -> Result<usize, HandlerError> {
        let matches: Vec<usize> = self
            .handlers
            .iter()
            .enumerate()
            .filter(|(_, h)| h.answers_to(name))
            .map(|(idx, _)| idx)
            .collect();

        if matches.is_empty() {
            return Err(HandlerError::Unknown {
                name: name.to_string(),
            });
        }

        let pending = self.pending.entry(host.to_string()).or_default();
        Ok(matches.into_iter().filter(|idx| pending.insert(*idx)).count())
    }

    /// Names of the handlers queued for `host`, in declaration order
    pub fn pending(&self, host: &str) -> Vec<&str> {
        self.pending
            .get(host)
            .map(|set| set.iter().map(|&idx| self.handlers[idx].name.as_str()).collect())
            .unwrap_or_default()
    }

    pub fn has_pending(&self, host: &str) -> bool {
        self.pending.get(host).is_some_and(|set| !set.is_empty())
    }

    /// Take the queued handlers for `host`, in declaration order.
    ///
    /// Handlers that already fired for this host are dropped. A second
    /// flush without new notifications returns nothing.
    pub fn flush(&mut self, host: &str) -> Vec<Handler> {
        let Some(pending) = self.pending.remove(host) else {
            return Vec::new();
        };
        let fired = self.fired.entry(host.to_string()).or_default();

        pending
            .into_iter()
            .filter(|idx| fired.insert(*idx))
            .map(|idx| self.handlers[idx].clone())
            .collect()
    }

    /// Drop queued notifications for `host` without firing them
    pub fn discard(&mut self, host: &str) -> usize {
        self.pending.remove(host).map_or(0, |set| set.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playbook::Task;

    fn handler(name: &str) -> Handler {
        Handler::new(Task::new(name, "debug"))
    }

    fn registry() -> HandlerRegistry {
        HandlerRegistry::new(vec![
            handler("reload config"),
            handler("restart web").with_listen("web changed"),
            handler("restart cache").with_listen("web changed"),
        ])
    }

    fn names(handlers: &[Handler]) -> Vec<&str> {
        handlers.iter().map(|h| h.name.as_str()).collect()
    }

    #[test]
    fn test_flush_in_declaration_order() {
        let mut reg = registry();
        reg.notify("web1", "restart web").unwrap();
        reg.notify("web1", "reload config").unwrap();

        assert_eq!(names(&reg.flush("web1")), vec!["reload config", "restart web"]);
    }

    #[test]
    fn test_dedup_and_idempotent_flush() {
        let mut reg = registry();
        assert_eq!(reg.notify("web1", "reload config").unwrap(), 1);
        assert_eq!(reg.notify("web1", "reload config").unwrap(), 0);
        assert_eq!(reg.notify("web1", "reload config").unwrap(), 0);

        assert_eq!(reg.flush("web1").len(), 1);
        assert!(reg.flush("web1").is_empty());
    }

    #[test]
    fn test_listen_queues_all_matches() {
        let mut reg = registry();
        assert_eq!(reg.notify("web1", "web changed").unwrap(), 2);
        assert_eq!(reg.pending("web1"), vec!["restart web", "restart cache"]);
    }

    #[test]
    fn test_hosts_are_isolated() {
        let mut reg = registry();
        reg.notify("web1", "reload config").unwrap();

        assert!(reg.flush("web2").is_empty());
        assert!(reg.has_pending("web1"));
    }

    #[test]
    fn test_fires_once_per_play() {
        let mut reg = registry();
        reg.notify("web1", "reload config").unwrap();
        assert_eq!(reg.flush("web1").len(), 1);

        reg.notify("web1", "reload config").unwrap();
        assert!(reg.flush("web1").is_empty());
    }

    #[test]
    fn test_unknown_handler() {
        let mut reg = registry();
        assert_eq!(
            reg.notify("web1", "nope"),
            Err(HandlerError::Unknown {
                name: "nope".to_string()
            })
        );
    }

    #[test]
    fn test_discard() {
        let mut reg = registry();
        reg.notify("web1", "web changed").unwrap();
        assert_eq!(reg.discard("web1"), 2);
        assert!(reg.flush("web1").is_empty());
    }
}
