use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::ChatError;

use super::session::{Group, Session, SessionFactory};

/// Process-scoped registry of one session per local identity.
///
/// Sessions are created and opened on first access and stay memoized until
/// [`SessionDirectory::close`]. Creation is double-checked under the write lock,
/// so concurrent callers for the same identity share one session.
pub struct SessionDirectory {
    factory: Arc<dyn SessionFactory>,
    sessions: RwLock<HashMap<String, Arc<dyn Session>>>,
}

impl SessionDirectory {
    pub fn new(factory: Arc<dyn SessionFactory>) -> Self {
        Self {
            factory,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn session_for(&self, identity: &str) -> Result<Arc<dyn Session>, ChatError> {
        if let Some(session) = self.read_sessions()?.get(identity) {
            return Ok(session.clone());
        }

        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| ChatError::Transport("session directory lock poisoned".to_string()))?;
        if let Some(session) = sessions.get(identity) {
            return Ok(session.clone());
        }

        let session = self.factory.create(identity)?;
        session.open(&[])?;
        log::info!("Opened session for {identity}");
        sessions.insert(identity.to_string(), session.clone());
        Ok(session)
    }

    /// Closes and forgets the identity's session. Closing an unknown identity is a no-op.
    pub fn close(&self, identity: &str) -> Result<(), ChatError> {
        let removed = self
            .sessions
            .write()
            .map_err(|_| ChatError::Transport("session directory lock poisoned".to_string()))?
            .remove(identity);
        if let Some(session) = removed {
            session.close()?;
            log::info!("Closed session for {identity}");
        }
        Ok(())
    }

    pub fn watch(&self, identity: &str, peer_ids: &[String], enable: bool) -> Result<(), ChatError> {
        if peer_ids.is_empty() {
            return Ok(());
        }
        let session = self.session_for(identity)?;
        if enable {
            session.watch_peers(peer_ids)
        } else {
            session.unwatch_peers(peer_ids)
        }
    }

    pub fn group(&self, identity: &str, group_id: &str) -> Result<Arc<dyn Group>, ChatError> {
        self.session_for(identity)?.group(group_id)
    }

    pub fn is_active(&self, identity: &str) -> bool {
        self.read_sessions()
            .map(|sessions| sessions.contains_key(identity))
            .unwrap_or(false)
    }

    fn read_sessions(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, HashMap<String, Arc<dyn Session>>>, ChatError> {
        self.sessions
            .read()
            .map_err(|_| ChatError::Transport("session directory lock poisoned".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    use super::*;
    use crate::common::WireMessage;

    #[derive(Default)]
    struct CountingFactory {
        created: AtomicUsize,
        watched: Arc<Mutex<Vec<String>>>,
    }

    struct StubSession {
        identity: String,
        opened: AtomicUsize,
        closed: AtomicUsize,
        watched: Arc<Mutex<Vec<String>>>,
    }

    impl Session for StubSession {
        fn identity(&self) -> &str {
            &self.identity
        }
        fn open(&self, _watch: &[String]) -> Result<(), ChatError> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn close(&self) -> Result<(), ChatError> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn is_open(&self) -> bool {
            self.opened.load(Ordering::SeqCst) > self.closed.load(Ordering::SeqCst)
        }
        fn send_message(&self, _wire: &WireMessage) -> Result<(), ChatError> {
            Ok(())
        }
        fn watch_peers(&self, peer_ids: &[String]) -> Result<(), ChatError> {
            let mut watched = self.watched.lock().unwrap();
            for id in peer_ids {
                if !watched.contains(id) {
                    watched.push(id.clone());
                }
            }
            Ok(())
        }
        fn unwatch_peers(&self, peer_ids: &[String]) -> Result<(), ChatError> {
            self.watched.lock().unwrap().retain(|id| !peer_ids.contains(id));
            Ok(())
        }
        fn group(&self, group_id: &str) -> Result<Arc<dyn Group>, ChatError> {
            Err(ChatError::Transport(format!("no group {group_id}")))
        }
    }

    impl SessionFactory for CountingFactory {
        fn create(&self, identity: &str) -> Result<Arc<dyn Session>, ChatError> {
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(StubSession {
                identity: identity.to_string(),
                opened: AtomicUsize::new(0),
                closed: AtomicUsize::new(0),
                watched: self.watched.clone(),
            }))
        }
    }

    #[test]
    fn session_is_created_once_and_opened() {
        let factory = Arc::new(CountingFactory::default());
        let directory = SessionDirectory::new(factory.clone());

        let first = directory.session_for("alice").unwrap();
        let second = directory.session_for("alice").unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert!(first.is_open());
        assert_eq!(factory.created.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn concurrent_first_access_shares_one_session() {
        let factory = Arc::new(CountingFactory::default());
        let directory = Arc::new(SessionDirectory::new(factory.clone()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let directory = directory.clone();
                thread::spawn(move || directory.session_for("bob").unwrap())
            })
            .collect();
        let sessions: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(factory.created.load(Ordering::SeqCst), 1);
        assert!(sessions.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[test]
    fn close_drops_the_session_and_next_access_recreates() {
        let factory = Arc::new(CountingFactory::default());
        let directory = SessionDirectory::new(factory.clone());

        let first = directory.session_for("carol").unwrap();
        directory.close("carol").unwrap();
        assert!(!first.is_open());
        assert!(!directory.is_active("carol"));
        directory.close("carol").unwrap();

        directory.session_for("carol").unwrap();
        assert_eq!(factory.created.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unwatch_is_idempotent() {
        let factory = Arc::new(CountingFactory::default());
        let directory = SessionDirectory::new(factory.clone());
        let peers = vec!["p1".to_string(), "p2".to_string()];

        directory.watch("dave", &peers, true).unwrap();
        directory.watch("dave", &peers, true).unwrap();
        assert_eq!(factory.watched.lock().unwrap().len(), 2);

        directory.watch("dave", &peers, false).unwrap();
        directory.watch("dave", &peers, false).unwrap();
        assert!(factory.watched.lock().unwrap().is_empty());
    }
}
