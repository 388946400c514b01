//! Session lifecycle: clone, disjoin, close.
//!
//! A [`Session`] is an opaque handle bound one-to-one to a resolved
//! runtime instance. Cloning produces a *joined* child that shares
//! implementation-level resources (e.g. a device context) with its
//! parent; disjoining severs the relation symmetrically without
//! destroying either session; closing releases the session's resources
//! and, once the last session referencing a bound implementation is
//! gone, the implementation itself is unbound (its library reference
//! dropped).
//!
//! # State machine
//!
//! ```text
//! Active  ⇄  Joined  →  Closed (terminal)
//! ```
//!
//! Parent/child links are back-references only - neither side owns the
//! other. Sessions assume single-threaded ownership with explicit
//! hand-off; the dispatcher does not serialize concurrent calls on one
//! session.

use crate::error::{Error, Result};
use crate::runtime::RuntimeSession;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tracing::debug;

/// Lifecycle state of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Bound and independent.
    Active,
    /// Bound, with a live parent or at least one live child.
    Joined,
    /// Closed; every further operation fails with `InvalidHandle`.
    Closed,
}

struct SessionCore {
    state: SessionState,
    /// The bound runtime instance; dropped at close, which releases the
    /// implementation (and its library, once no other session holds it).
    runtime: Option<Box<dyn RuntimeSession>>,
    parent: Option<Weak<Mutex<SessionCore>>>,
    children: Vec<Weak<Mutex<SessionCore>>>,
    /// The owning loader's live-session counter.
    live: Arc<AtomicUsize>,
    /// Runtime name, for diagnostics.
    name: String,
}

impl SessionCore {
    /// Re-derive Active/Joined from the remaining relations.
    fn refresh_join_state(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        let joined = self.parent.is_some() || !self.children.is_empty();
        self.state = if joined {
            SessionState::Joined
        } else {
            SessionState::Active
        };
    }
}

/// A live session bound to one resolved runtime implementation.
///
/// Not `Clone`: the handle models exclusive caller ownership. Cooperating
/// sessions are created with [`Session::clone_session`], which is a
/// runtime-level clone, not a handle copy.
pub struct Session {
    core: Arc<Mutex<SessionCore>>,
}

impl Session {
    pub(crate) fn new(
        runtime: Box<dyn RuntimeSession>,
        live: Arc<AtomicUsize>,
        name: String,
    ) -> Self {
        live.fetch_add(1, Ordering::Relaxed);
        debug!(runtime = %name, "session created");
        Self {
            core: Arc::new(Mutex::new(SessionCore {
                state: SessionState::Active,
                runtime: Some(runtime),
                parent: None,
                children: Vec::new(),
                live,
                name,
            })),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.core.lock().unwrap().state
    }

    /// True while this session has a live parent or child relation.
    pub fn is_joined(&self) -> bool {
        self.state() == SessionState::Joined
    }

    /// Name of the bound runtime implementation.
    pub fn runtime_name(&self) -> String {
        self.core.lock().unwrap().name.clone()
    }

    /// Clone this session into a joined child.
    ///
    /// The child shares the implementation instance's shareable resources
    /// with this session; both end up in the *Joined* state. Fails with
    /// [`Error::NotImplemented`] when the bound runtime has no clonable
    /// context, and with [`Error::InvalidHandle`] on a closed session.
    pub fn clone_session(&self) -> Result<Session> {
        let mut core = self.core.lock().unwrap();
        if core.state == SessionState::Closed {
            return Err(Error::InvalidHandle("session is closed"));
        }
        let Some(runtime) = core.runtime.as_ref() else {
            return Err(Error::InvalidHandle("session has no bound runtime"));
        };

        let child_runtime = runtime.clone_session()?;
        let child_core = Arc::new(Mutex::new(SessionCore {
            state: SessionState::Joined,
            runtime: Some(child_runtime),
            parent: Some(Arc::downgrade(&self.core)),
            children: Vec::new(),
            live: Arc::clone(&core.live),
            name: core.name.clone(),
        }));
        core.live.fetch_add(1, Ordering::Relaxed);
        core.children.push(Arc::downgrade(&child_core));
        core.state = SessionState::Joined;
        debug!(runtime = %core.name, "session cloned into joined child");

        Ok(Session { core: child_core })
    }

    /// Sever every parent/child relation of this session, symmetrically.
    ///
    /// Legal only while *Joined*: an unjoined session fails with
    /// [`Error::NotJoined`], a closed one with [`Error::InvalidHandle`].
    /// Afterwards the session is *Active*; relations on the other side
    /// are cleared as well, and the former peers fall back to *Active*
    /// when this was their last relation.
    pub fn disjoin(&self) -> Result<()> {
        {
            let core = self.core.lock().unwrap();
            match core.state {
                SessionState::Closed => return Err(Error::InvalidHandle("session is closed")),
                SessionState::Active => return Err(Error::NotJoined),
                SessionState::Joined => {}
            }
        }
        detach_relations(&self.core);
        let mut core = self.core.lock().unwrap();
        core.refresh_join_state();
        debug!(runtime = %core.name, "session disjoined");
        Ok(())
    }

    /// Route one opaque processing call to the bound runtime.
    pub fn process(&self, opcode: u32, payload: &mut [u8]) -> Result<()> {
        let mut core = self.core.lock().unwrap();
        if core.state == SessionState::Closed {
            return Err(Error::InvalidHandle("session is closed"));
        }
        let Some(runtime) = core.runtime.as_mut() else {
            return Err(Error::InvalidHandle("session has no bound runtime"));
        };
        runtime.process(opcode, payload)
    }

    /// Close the session and release its resources.
    ///
    /// Legal from *Active* or *Joined*; any remaining join relations are
    /// cleared first. The transition to *Closed* is final: closing twice,
    /// or any other operation after close, fails with
    /// [`Error::InvalidHandle`] and leaves other live sessions untouched.
    pub fn close(&self) -> Result<()> {
        {
            let core = self.core.lock().unwrap();
            if core.state == SessionState::Closed {
                return Err(Error::InvalidHandle("session already closed"));
            }
        }
        detach_relations(&self.core);

        let mut core = self.core.lock().unwrap();
        // Dropping the runtime box releases the implementation instance;
        // the library itself unbinds with its last session reference.
        core.runtime = None;
        core.state = SessionState::Closed;
        core.live.fetch_sub(1, Ordering::Relaxed);
        debug!(runtime = %core.name, "session closed");
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Dropping an open handle closes it; a second close is a no-op.
        let _ = self.close();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let core = self.core.lock().unwrap();
        f.debug_struct("Session")
            .field("runtime", &core.name)
            .field("state", &core.state)
            .field("children", &core.children.len())
            .finish()
    }
}

/// Clear this session's relations and the matching back-references on
/// the other side.
///
/// Locks are taken one session at a time, never nested: concurrent use
/// of one session from several threads is outside the contract, but
/// lifecycle calls on *different* sessions must not deadlock.
fn detach_relations(core_arc: &Arc<Mutex<SessionCore>>) {
    let (parent, children) = {
        let mut core = core_arc.lock().unwrap();
        (core.parent.take(), std::mem::take(&mut core.children))
    };
    let self_weak = Arc::downgrade(core_arc);

    if let Some(parent_weak) = parent {
        if let Some(parent_arc) = parent_weak.upgrade() {
            let mut parent = parent_arc.lock().unwrap();
            parent.children.retain(|w| !w.ptr_eq(&self_weak));
            parent.refresh_join_state();
        }
    }

    for child_weak in children {
        if let Some(child_arc) = child_weak.upgrade() {
            let mut child = child_arc.lock().unwrap();
            child.parent = None;
            child.refresh_join_state();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    /// Fake runtime session sharing a "device context" across clones.
    struct FakeSession {
        ctx: Arc<AtomicUsize>,
        clonable: bool,
    }

    impl FakeSession {
        fn new(clonable: bool) -> Self {
            Self {
                ctx: Arc::new(AtomicUsize::new(0)),
                clonable,
            }
        }
    }

    impl RuntimeSession for FakeSession {
        fn clone_session(&self) -> Result<Box<dyn RuntimeSession>> {
            if !self.clonable {
                return Err(Error::NotImplemented("clone_session"));
            }
            Ok(Box::new(FakeSession {
                ctx: Arc::clone(&self.ctx),
                clonable: true,
            }))
        }

        fn process(&mut self, _opcode: u32, _payload: &mut [u8]) -> Result<()> {
            self.ctx.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    fn session(clonable: bool) -> (Session, Arc<AtomicUsize>) {
        let live = Arc::new(AtomicUsize::new(0));
        let s = Session::new(
            Box::new(FakeSession::new(clonable)),
            Arc::clone(&live),
            "fake".into(),
        );
        (s, live)
    }

    #[test]
    fn test_clone_joins_both_sides() {
        let (parent, live) = session(true);
        assert_eq!(parent.state(), SessionState::Active);

        let child = parent.clone_session().unwrap();
        assert_eq!(parent.state(), SessionState::Joined);
        assert_eq!(child.state(), SessionState::Joined);
        assert_eq!(live.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_clone_unsupported_is_distinct_from_not_found() {
        let (parent, _) = session(false);
        let err = parent.clone_session().unwrap_err();
        assert!(matches!(err, Error::NotImplemented(_)));
        // Parent is unaffected by the failed clone.
        assert_eq!(parent.state(), SessionState::Active);
    }

    #[test]
    fn test_disjoin_restores_both_sides_to_active() {
        let (parent, _) = session(true);
        let child = parent.clone_session().unwrap();

        child.disjoin().unwrap();
        assert_eq!(child.state(), SessionState::Active);
        assert_eq!(parent.state(), SessionState::Active);
    }

    #[test]
    fn test_disjoin_unjoined_fails() {
        let (s, _) = session(true);
        assert!(matches!(s.disjoin(), Err(Error::NotJoined)));
    }

    #[test]
    fn test_parent_stays_joined_while_other_children_remain() {
        let (parent, _) = session(true);
        let child_a = parent.clone_session().unwrap();
        let child_b = parent.clone_session().unwrap();

        child_a.disjoin().unwrap();
        assert_eq!(parent.state(), SessionState::Joined);

        child_b.disjoin().unwrap();
        assert_eq!(parent.state(), SessionState::Active);
    }

    #[test]
    fn test_close_clears_relations() {
        let (parent, live) = session(true);
        let child = parent.clone_session().unwrap();

        // Close the parent without disjoining first.
        parent.close().unwrap();
        assert_eq!(parent.state(), SessionState::Closed);
        assert_eq!(child.state(), SessionState::Active);
        assert_eq!(live.load(Ordering::Relaxed), 1);

        child.close().unwrap();
        assert_eq!(live.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_double_close_fails_without_corrupting_others() {
        let (parent, live) = session(true);
        let child = parent.clone_session().unwrap();
        child.disjoin().unwrap();

        child.close().unwrap();
        assert!(matches!(child.close(), Err(Error::InvalidHandle(_))));

        // The sibling session is still fully usable.
        assert!(parent.process(1, &mut []).is_ok());
        parent.close().unwrap();
        assert_eq!(live.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_operations_after_close_fail() {
        let (s, _) = session(true);
        s.close().unwrap();
        assert!(matches!(s.clone_session(), Err(Error::InvalidHandle(_))));
        assert!(matches!(s.disjoin(), Err(Error::InvalidHandle(_))));
        assert!(matches!(s.process(0, &mut []), Err(Error::InvalidHandle(_))));
    }

    #[test]
    fn test_clones_share_implementation_context() {
        let ctx = Arc::new(AtomicUsize::new(0));
        let parent = Session::new(
            Box::new(FakeSession {
                ctx: Arc::clone(&ctx),
                clonable: true,
            }),
            Arc::new(AtomicUsize::new(0)),
            "fake".into(),
        );
        let child = parent.clone_session().unwrap();

        parent.process(0, &mut []).unwrap();
        child.process(0, &mut []).unwrap();

        // Both calls hit the same shared context.
        assert_eq!(ctx.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_drop_closes_open_session() {
        let (s, live) = session(true);
        assert_eq!(live.load(Ordering::Relaxed), 1);
        drop(s);
        assert_eq!(live.load(Ordering::Relaxed), 0);
    }
}
