//! Session manager - one long-lived transport per server
//!
//! Each server gets a slot. The slot's async mutex is held for the whole of
//! a start, call or stop, so calls on one session never interleave and the
//! state observed by other callers is never a transient one.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::Utc;
use log::{debug, info, warn};

use super::record::{SessionRecord, SessionStore};
use super::state::{SessionHandle, SessionState};
use crate::binding::BindingResolver;
use crate::config::{BusyPolicy, SessionConfig};
use crate::error::{Result, ToolshedError};
use crate::id::generate_session_id;
use crate::invoker::{InvocationResult, call_within, close_within, connect_within};
use crate::transport::{Connector, Transport};
use crate::value::StructuredValue;

/// Default bound on closing a session's transport
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Where live sessions are recorded, and who hosts them
#[derive(Debug, Clone)]
pub struct Persistence {
    pub store: SessionStore,
    pub pid: u32,
    pub socket_path: PathBuf,
}

/// An established session
struct LiveSession {
    handle: SessionHandle,
    transport: Box<dyn Transport>,
    last_activity: Instant,
    record: Option<SessionRecord>,
}

/// Snapshot readable without waiting for an in-flight call
#[derive(Debug, Clone, Default)]
struct SlotStatus {
    state: SessionState,
    handle: Option<SessionHandle>,
}

#[derive(Default)]
struct Slot {
    status: Mutex<SlotStatus>,
    live: tokio::sync::Mutex<Option<LiveSession>>,
}

impl Slot {
    fn set(&self, state: SessionState, handle: Option<SessionHandle>) {
        let mut status = lock(&self.status);
        debug_assert!(
            status.state == state || status.state.can_transition_to(state),
            "invalid session transition {} -> {}",
            status.state,
            state
        );
        status.state = state;
        status.handle = handle;
    }

    fn state(&self) -> SessionState {
        lock(&self.status).state
    }
}

/// Owns the live session of each server
pub struct SessionManager {
    resolver: Arc<BindingResolver>,
    connector: Arc<dyn Connector>,
    config: SessionConfig,
    connect_timeout: Duration,
    close_timeout: Duration,
    persistence: Option<Persistence>,
    // Slots are never removed, so two starts always meet on the same mutex
    slots: Mutex<HashMap<String, Arc<Slot>>>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("config", &self.config)
            .field("persistence", &self.persistence)
            .finish()
    }
}

impl SessionManager {
    pub fn new(
        resolver: Arc<BindingResolver>,
        connector: Arc<dyn Connector>,
        config: SessionConfig,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            resolver,
            connector,
            config,
            connect_timeout,
            close_timeout: CLOSE_TIMEOUT,
            persistence: None,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Give up on closing a transport after this long
    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Record sessions on disk as they start, are used and end
    pub fn with_persistence(mut self, persistence: Persistence) -> Self {
        self.persistence = Some(persistence);
        self
    }

    fn slot(&self, server: &str) -> Arc<Slot> {
        let mut slots = lock(&self.slots);
        Arc::clone(slots.entry(server.to_string()).or_default())
    }

    fn existing_slot(&self, server: &str) -> Option<Arc<Slot>> {
        lock(&self.slots).get(server).cloned()
    }

    /// Current state for a server
    pub fn state(&self, server: &str) -> SessionState {
        self.existing_slot(server).map(|slot| slot.state()).unwrap_or_default()
    }

    /// Handle of the server's session if its transport is still alive.
    ///
    /// A dead session is discarded. A session with a call in flight counts
    /// as alive.
    pub async fn live_handle(&self, server: &str) -> Option<SessionHandle> {
        let slot = self.existing_slot(server)?;
        let Ok(mut live) = slot.live.try_lock() else {
            return lock(&slot.status).handle.clone();
        };
        let session = live.as_mut()?;
        if session.transport.is_alive() {
            return Some(session.handle.clone());
        }

        warn!("Session {} for {} found dead", session.handle.id, server);
        slot.set(SessionState::Dead, None);
        self.discard(&slot, &mut live).await;
        None
    }

    /// Start a session, or return the one already running.
    ///
    /// `SessionStartFailed` if the server cannot be reached; the state is
    /// back to `Absent` afterwards.
    pub async fn start(&self, server: &str) -> Result<SessionHandle> {
        let descriptor = self.resolver.server(server)?;
        let slot = self.slot(server);
        let mut live = slot.live.lock().await;

        if let Some(session) = live.as_mut() {
            if session.transport.is_alive() {
                debug!("Reusing session {} for {}", session.handle.id, server);
                return Ok(session.handle.clone());
            }
            warn!("Session {} for {} found dead; replacing", session.handle.id, server);
            slot.set(SessionState::Dead, None);
            self.discard(&slot, &mut live).await;
        }

        slot.set(SessionState::Starting, None);
        let transport = match connect_within(
            self.connector.as_ref(),
            server,
            &descriptor.transport,
            self.connect_timeout,
        )
        .await
        {
            Ok(transport) => transport,
            Err(e) => {
                slot.set(SessionState::Absent, None);
                warn!("Session start for {} failed: {}", server, e);
                return Err(ToolshedError::SessionStartFailed {
                    server: server.to_string(),
                    reason: e.detail(),
                });
            }
        };

        let handle = SessionHandle {
            id: generate_session_id(),
            server: server.to_string(),
            created_at: Utc::now(),
        };
        let mut session = LiveSession {
            handle: handle.clone(),
            transport,
            last_activity: Instant::now(),
            record: None,
        };

        if let Some(persistence) = &self.persistence {
            let record = SessionRecord::new(&handle, persistence.pid, &persistence.socket_path);
            if let Err(e) = persistence.store.put(&record) {
                self.close_quietly(&mut session).await;
                slot.set(SessionState::Absent, None);
                return Err(ToolshedError::SessionStartFailed {
                    server: server.to_string(),
                    reason: format!("failed to record session: {}", e),
                });
            }
            session.record = Some(record);
        }

        *live = Some(session);
        slot.set(SessionState::Active, Some(handle.clone()));
        info!("Session {} started for {}", handle.id, server);
        Ok(handle)
    }

    /// Call a tool on the server's active session. Never starts one.
    pub async fn call(&self, server: &str, tool: &str, params: &StructuredValue) -> Result<InvocationResult> {
        let binding = self.resolver.resolve(server, tool)?;
        let Some(slot) = self.existing_slot(server) else {
            return Err(ToolshedError::NoActiveSession(server.to_string()));
        };

        let mut live = match self.config.busy_policy {
            BusyPolicy::Queue => slot.live.lock().await,
            BusyPolicy::Fail => slot
                .live
                .try_lock()
                .map_err(|_| ToolshedError::SessionBusy(server.to_string()))?,
        };
        let Some(session) = live.as_mut() else {
            return Err(ToolshedError::NoActiveSession(server.to_string()));
        };

        if !session.transport.is_alive() {
            slot.set(SessionState::Dead, None);
            self.discard(&slot, &mut live).await;
            return Err(ToolshedError::SessionDied {
                server: server.to_string(),
                reason: "transport closed".to_string(),
            });
        }

        debug!("Session call {} on {}", binding.target(), session.handle.id);
        let result = call_within(session.transport.as_mut(), &binding, params, self.config.call_timeout()).await;

        match result {
            Ok(value) => {
                session.last_activity = Instant::now();
                if let (Some(record), Some(persistence)) = (session.record.as_mut(), &self.persistence) {
                    record.touch();
                    if let Err(e) = persistence.store.put(record) {
                        warn!("Failed to update session record for {}: {}", server, e);
                    }
                }
                Ok(value)
            }
            Err(e @ ToolshedError::Timeout { .. }) => {
                warn!("{}; tearing down session", e);
                slot.set(SessionState::Dead, None);
                self.discard(&slot, &mut live).await;
                Err(e)
            }
            Err(e @ ToolshedError::TransportUnavailable { .. }) => {
                warn!("Session for {} died: {}", server, e);
                slot.set(SessionState::Dead, None);
                self.discard(&slot, &mut live).await;
                Err(ToolshedError::SessionDied {
                    server: server.to_string(),
                    reason: e.detail(),
                })
            }
            Err(e) => {
                session.last_activity = Instant::now();
                Err(e)
            }
        }
    }

    /// Stop the server's session. Returns whether there was one.
    pub async fn stop(&self, server: &str) -> Result<bool> {
        let Some(slot) = self.existing_slot(server) else {
            return Ok(false);
        };
        let mut live = slot.live.lock().await;
        let Some(mut session) = live.take() else {
            return Ok(false);
        };

        slot.set(SessionState::Stopping, None);
        self.close_quietly(&mut session).await;
        self.forget(&session);
        slot.set(SessionState::Absent, None);
        info!("Session {} for {} stopped", session.handle.id, server);
        Ok(true)
    }

    /// Stop sessions idle for longer than the configured bound.
    ///
    /// Sessions with a call in flight are not idle. Returns the servers
    /// whose sessions were stopped.
    pub async fn reap_idle(&self) -> Vec<String> {
        let Some(limit) = self.config.idle_timeout() else {
            return Vec::new();
        };

        let slots: Vec<(String, Arc<Slot>)> = lock(&self.slots)
            .iter()
            .map(|(server, slot)| (server.clone(), Arc::clone(slot)))
            .collect();

        let mut reaped = Vec::new();
        for (server, slot) in slots {
            let Ok(mut live) = slot.live.try_lock() else {
                continue;
            };
            let idle = live.as_ref().is_some_and(|s| s.last_activity.elapsed() >= limit);
            if !idle {
                continue;
            }
            if let Some(mut session) = live.take() {
                slot.set(SessionState::Stopping, None);
                self.close_quietly(&mut session).await;
                self.forget(&session);
                slot.set(SessionState::Absent, None);
                info!("Session {} for {} stopped after {:?} idle", session.handle.id, server, limit);
                reaped.push(server);
            }
        }
        reaped
    }

    /// Stop every session
    pub async fn shutdown(&self) {
        let servers: Vec<String> = lock(&self.slots).keys().cloned().collect();
        for server in servers {
            if let Err(e) = self.stop(&server).await {
                warn!("Failed to stop session for {}: {}", server, e);
            }
        }
    }

    /// Drop a dead session: close what is left, forget the record
    async fn discard(&self, slot: &Slot, live: &mut Option<LiveSession>) {
        if let Some(mut session) = live.take() {
            self.close_quietly(&mut session).await;
            self.forget(&session);
        }
        slot.set(SessionState::Absent, None);
    }

    async fn close_quietly(&self, session: &mut LiveSession) {
        close_within(session.transport.as_mut(), &session.handle.server, self.close_timeout).await;
    }

    fn forget(&self, session: &LiveSession) {
        let Some(persistence) = &self.persistence else {
            return;
        };
        if let Err(e) = persistence.store.remove_if(&session.handle.server, &session.handle.id) {
            warn!("Failed to remove session record for {}: {}", session.handle.server, e);
        }
    }
}
