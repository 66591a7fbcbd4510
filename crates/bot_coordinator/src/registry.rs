//! Tenant -> live session map.
//!
//! At most one session is registered per tenant. Registration always wins
//! (last handshake is authoritative) and hands the displaced entry back to the
//! caller, who is responsible for closing it. Removal is conditional on the
//! session id so a late disconnect from a replaced session never evicts its
//! successor.
//!
//! [`SessionRegistry::try_register`] also enforces the duplicate-session and
//! session-limit rules. Both are decided while the tenant's entry is locked,
//! and the tenant count is kept in an atomic so the limit check never has to
//! walk the map.

use crate::error::RegisterError;
use bot_protocol::{SessionId, TenantId};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Clone)]
pub struct RegisteredSession<H> {
    pub session_id: SessionId,
    pub handle: H,
}

#[derive(Debug)]
pub struct SessionRegistry<H> {
    sessions: DashMap<TenantId, RegisteredSession<H>>,
    /// Number of occupied tenants. Raised before a vacant entry is filled,
    /// lowered after an entry is removed, so it never undercounts.
    tenants: AtomicUsize,
}

impl<H: Clone> SessionRegistry<H> {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            tenants: AtomicUsize::new(0),
        }
    }

    /// Makes `handle` the tenant's session and returns whatever it replaced.
    pub fn register(
        &self,
        tenant_id: TenantId,
        session_id: SessionId,
        handle: H,
    ) -> Option<RegisteredSession<H>> {
        let registered = RegisteredSession { session_id, handle };
        match self.sessions.entry(tenant_id) {
            Entry::Occupied(mut occupied) => Some(occupied.insert(registered)),
            Entry::Vacant(vacant) => {
                self.tenants.fetch_add(1, Ordering::AcqRel);
                vacant.insert(registered);
                None
            }
        }
    }

    /// Registers `handle` unless the handshake repeats the tenant's current
    /// session id, or the tenant is new and `max_sessions` tenants are
    /// already registered. A tenant replacing its own session is always
    /// admitted.
    ///
    /// # Returns
    ///
    /// The displaced session, if the tenant had one.
    ///
    /// # Errors
    ///
    /// * [`RegisterError::DuplicateSession`] if `session_id` is already the
    ///   tenant's registered session.
    /// * [`RegisterError::AtCapacity`] if the tenant is new and the limit is
    ///   reached.
    pub fn try_register(
        &self,
        tenant_id: TenantId,
        session_id: SessionId,
        handle: H,
        max_sessions: usize,
    ) -> Result<Option<RegisteredSession<H>>, RegisterError> {
        let registered = RegisteredSession { session_id, handle };
        match self.sessions.entry(tenant_id) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().session_id == session_id {
                    return Err(RegisterError::DuplicateSession(session_id));
                }
                Ok(Some(occupied.insert(registered)))
            }
            Entry::Vacant(vacant) => {
                self.tenants
                    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                        (count < max_sessions).then_some(count + 1)
                    })
                    .map_err(|_| RegisterError::AtCapacity(max_sessions))?;
                vacant.insert(registered);
                Ok(None)
            }
        }
    }

    pub fn lookup(&self, tenant_id: TenantId) -> Option<H> {
        self.sessions.get(&tenant_id).map(|entry| entry.handle.clone())
    }

    pub fn lookup_session(&self, tenant_id: TenantId) -> Option<RegisteredSession<H>> {
        self.sessions.get(&tenant_id).map(|entry| entry.value().clone())
    }

    /// Removes the tenant's entry only if it still belongs to `session_id`.
    /// Returns whether anything was removed.
    pub fn unregister(&self, tenant_id: TenantId, session_id: SessionId) -> bool {
        let removed = self
            .sessions
            .remove_if(&tenant_id, |_, registered| registered.session_id == session_id)
            .is_some();
        if removed {
            self.tenants.fetch_sub(1, Ordering::AcqRel);
        }
        removed
    }

    pub fn contains(&self, tenant_id: TenantId) -> bool {
        self.sessions.contains_key(&tenant_id)
    }

    /// Number of registered tenants.
    pub fn len(&self) -> usize {
        self.tenants.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn tenants(&self) -> Vec<TenantId> {
        self.sessions.iter().map(|entry| *entry.key()).collect()
    }

    /// Point-in-time copy of every entry. Holds no shard locks once returned.
    pub fn snapshot(&self) -> Vec<(TenantId, RegisteredSession<H>)> {
        self.sessions
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }
}

impl<H: Clone> Default for SessionRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}
