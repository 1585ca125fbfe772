//! Session registry: provisional → real id binding and the per-session
//! writer lock.
//!
//! One index maps every known id (provisional and real) to a shared
//! [`SessionSlot`].  Locking discipline:
//!
//! - the outer index `RwLock` is held only for lookups, inserts and the
//!   eviction sweep, never across an await;
//! - each slot carries a `Semaphore(1)`; holding its permit (via
//!   [`TurnGuard`]) is what makes a caller the session's single writer;
//! - binding requires a `TurnGuard`, so it is serialized per session.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use uuid::Uuid;

use sb_domain::config::{BusyPolicy, SessionsConfig};
use sb_domain::trace::TraceEvent;

use crate::error::SessionError;
use crate::session_id::{generate_provisional, is_real_id, SessionRef};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session slot
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug)]
struct SlotState {
    provisional_id: Option<String>,
    real_id: Option<String>,
    created_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
    writer: Option<Uuid>,
    turns: u64,
    evicted: bool,
}

/// One logical session, reachable from both of its ids.
#[derive(Debug)]
pub struct SessionSlot {
    state: Mutex<SlotState>,
    lock: Arc<Semaphore>,
}

impl SessionSlot {
    fn new(provisional_id: Option<String>, real_id: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            state: Mutex::new(SlotState {
                provisional_id,
                real_id,
                created_at: now,
                last_activity: now,
                writer: None,
                turns: 0,
                evicted: false,
            }),
            lock: Arc::new(Semaphore::new(1)),
        }
    }

    /// The id the session is currently known by: the real id once bound,
    /// the provisional id before.
    pub fn session_id(&self) -> String {
        let st = self.state.lock();
        st.real_id
            .clone()
            .or_else(|| st.provisional_id.clone())
            .unwrap_or_default()
    }

    pub fn real_id(&self) -> Option<String> {
        self.state.lock().real_id.clone()
    }

    pub fn provisional_id(&self) -> Option<String> {
        self.state.lock().provisional_id.clone()
    }

    pub fn is_busy(&self) -> bool {
        self.lock.available_permits() == 0
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let st = self.state.lock();
        SessionSnapshot {
            session_id: st
                .real_id
                .clone()
                .or_else(|| st.provisional_id.clone())
                .unwrap_or_default(),
            provisional_id: st.provisional_id.clone(),
            real_id: st.real_id.clone(),
            created_at: st.created_at,
            last_activity: st.last_activity,
            busy: self.is_busy(),
            turns: st.turns,
        }
    }

    fn keys(&self) -> Vec<String> {
        let st = self.state.lock();
        st.provisional_id
            .iter()
            .chain(st.real_id.iter())
            .cloned()
            .collect()
    }
}

/// Point-in-time view of a session for introspection.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub provisional_id: Option<String>,
    pub real_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub busy: bool,
    pub turns: u64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn guard
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Exclusive writer access to one session for the duration of a turn.
/// Dropping it releases the lock and refreshes last-activity.
pub struct TurnGuard {
    slot: Arc<SessionSlot>,
    writer: Uuid,
    created: bool,
    _permit: OwnedSemaphorePermit,
}

impl TurnGuard {
    pub fn slot(&self) -> &Arc<SessionSlot> {
        &self.slot
    }

    pub fn session_id(&self) -> String {
        self.slot.session_id()
    }

    /// The runtime session to resume, if the session is already bound.
    pub fn resume_id(&self) -> Option<String> {
        self.slot.real_id()
    }

    pub fn is_bound(&self) -> bool {
        self.slot.real_id().is_some()
    }

    /// Whether this turn created the in-memory session.
    pub fn created(&self) -> bool {
        self.created
    }

    pub fn writer(&self) -> Uuid {
        self.writer
    }
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        let mut st = self.slot.state.lock();
        if st.writer == Some(self.writer) {
            st.writer = None;
        }
        st.last_activity = Utc::now();
    }
}

/// Result of [`SessionRegistry::bind`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindOutcome {
    /// The real id is now attached to the session.
    Bound { provisional_id: Option<String> },
    /// The same real id was already bound; nothing changed.
    AlreadyBound,
    /// A different real id is bound, or the id belongs to another session.
    Rejected,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct SessionRegistry {
    index: RwLock<HashMap<String, Arc<SessionSlot>>>,
    tombstones: Mutex<HashMap<String, DateTime<Utc>>>,
    busy_policy: BusyPolicy,
    busy_wait: Duration,
    idle_threshold: chrono::Duration,
    tombstone_retention: chrono::Duration,
}

impl SessionRegistry {
    pub fn new(config: &SessionsConfig) -> Self {
        Self {
            index: RwLock::new(HashMap::new()),
            tombstones: Mutex::new(HashMap::new()),
            busy_policy: config.busy_policy,
            busy_wait: Duration::from_secs(config.busy_wait_secs),
            idle_threshold: chrono::Duration::minutes(i64::from(config.idle_evict_minutes)),
            tombstone_retention: chrono::Duration::hours(i64::from(
                config.tombstone_retention_hours,
            )),
        }
    }

    /// Resolve a reference to its slot, creating one when the id is new.
    ///
    /// Returns `(slot, created)`.
    pub fn resolve(&self, session_ref: &SessionRef) -> Result<(Arc<SessionSlot>, bool), SessionError> {
        let id = session_ref.as_str();

        if let Some(slot) = self.index.read().get(id) {
            return Ok((slot.clone(), false));
        }

        if session_ref.is_provisional() && self.tombstones.lock().contains_key(id) {
            return Err(SessionError::SessionExpired(id.to_owned()));
        }

        let mut index = self.index.write();
        if let Some(slot) = index.get(id) {
            return Ok((slot.clone(), false));
        }

        let slot = Arc::new(match session_ref {
            SessionRef::Provisional(p) => SessionSlot::new(Some(p.clone()), None),
            // A real id with no in-memory state: the runtime still knows it.
            SessionRef::Real(r) => SessionSlot::new(None, Some(r.clone())),
        });
        index.insert(id.to_owned(), slot.clone());
        drop(index);

        TraceEvent::SessionCreated {
            session_id: id.to_owned(),
            provisional: session_ref.is_provisional(),
        }
        .emit();

        Ok((slot, true))
    }

    /// Resolve (or create) the session and take its writer lock.
    ///
    /// With `None` a fresh provisional session is started.
    pub async fn begin_turn(&self, session_ref: Option<&SessionRef>) -> Result<TurnGuard, SessionError> {
        let session_ref = match session_ref {
            Some(r) => r.clone(),
            None => SessionRef::Provisional(generate_provisional()),
        };

        // The slot may be evicted between resolve and acquire; retrying
        // re-runs resolution against the post-eviction index.
        loop {
            let (slot, created) = self.resolve(&session_ref)?;
            let permit = self.acquire(&slot, session_ref.as_str()).await?;

            let mut st = slot.state.lock();
            if st.evicted {
                drop(st);
                drop(permit);
                continue;
            }
            let writer = Uuid::new_v4();
            st.writer = Some(writer);
            st.turns += 1;
            st.last_activity = Utc::now();
            drop(st);

            return Ok(TurnGuard {
                slot,
                writer,
                created,
                _permit: permit,
            });
        }
    }

    async fn acquire(&self, slot: &Arc<SessionSlot>, id: &str) -> Result<OwnedSemaphorePermit, SessionError> {
        let busy = || SessionError::SessionBusy(id.to_owned());

        if let Ok(permit) = slot.lock.clone().try_acquire_owned() {
            return Ok(permit);
        }

        match self.busy_policy {
            BusyPolicy::FailFast => Err(busy()),
            BusyPolicy::Wait => {
                match tokio::time::timeout(self.busy_wait, slot.lock.clone().acquire_owned()).await {
                    Ok(Ok(permit)) => Ok(permit),
                    Ok(Err(_closed)) => Err(busy()),
                    Err(_elapsed) => Err(busy()),
                }
            }
        }
    }

    /// Attach the runtime's real id to the guarded session.
    ///
    /// Idempotent for the same id; a second, different id is refused and
    /// the existing binding is kept.
    pub fn bind(&self, guard: &TurnGuard, real_id: &str) -> Result<BindOutcome, SessionError> {
        if !is_real_id(real_id) {
            return Err(SessionError::InvalidSessionId(real_id.to_owned()));
        }

        let slot = guard.slot();
        let mut index = self.index.write();
        let mut st = slot.state.lock();

        if st.writer != Some(guard.writer()) {
            tracing::warn!(real_id, "bind attempted without holding the session lock");
            return Ok(BindOutcome::Rejected);
        }

        match st.real_id.as_deref() {
            Some(existing) if existing == real_id => return Ok(BindOutcome::AlreadyBound),
            Some(existing) => {
                tracing::warn!(
                    existing,
                    offered = real_id,
                    "session already bound to a different real id"
                );
                return Ok(BindOutcome::Rejected);
            }
            None => {}
        }

        if let Some(other) = index.get(real_id) {
            if !Arc::ptr_eq(other, slot) {
                tracing::warn!(real_id, "real id already owned by another session");
                return Ok(BindOutcome::Rejected);
            }
        }

        st.real_id = Some(real_id.to_owned());
        index.insert(real_id.to_owned(), slot.clone());
        let provisional_id = st.provisional_id.clone();
        drop(st);
        drop(index);

        TraceEvent::SessionBound {
            provisional_id: provisional_id.clone().unwrap_or_default(),
            real_id: real_id.to_owned(),
        }
        .emit();

        Ok(BindOutcome::Bound { provisional_id })
    }

    /// Evict sessions idle for longer than the threshold.
    pub fn evict_idle(&self) -> usize {
        self.evict_idle_at(Utc::now())
    }

    /// [`Self::evict_idle`] against an explicit clock.  Also prunes
    /// tombstones older than the retention window.
    pub fn evict_idle_at(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.idle_threshold;
        let mut index = self.index.write();

        let mut seen: Vec<Arc<SessionSlot>> = Vec::new();
        for slot in index.values() {
            if !seen.iter().any(|s| Arc::ptr_eq(s, slot)) {
                seen.push(slot.clone());
            }
        }

        let mut evicted = 0;
        for slot in seen {
            // Holding the permit while marking keeps a racing turn out.
            let Ok(_permit) = slot.lock.clone().try_acquire_owned() else {
                continue;
            };
            let mut st = slot.state.lock();
            if st.last_activity > cutoff {
                continue;
            }
            st.evicted = true;
            let idle_secs = (now - st.last_activity).num_seconds().max(0) as u64;
            let provisional = st.provisional_id.clone();
            let session_id = st.real_id.clone().or_else(|| provisional.clone()).unwrap_or_default();
            drop(st);

            for key in slot.keys() {
                index.remove(&key);
            }
            if let Some(p) = provisional {
                self.tombstones.lock().insert(p, now);
            }
            evicted += 1;

            TraceEvent::SessionEvicted {
                session_id,
                idle_secs,
            }
            .emit();
        }
        drop(index);

        let retention_cutoff = now - self.tombstone_retention;
        self.tombstones.lock().retain(|_, at| *at > retention_cutoff);

        if evicted > 0 {
            tracing::info!(evicted, "idle sessions evicted");
        }
        evicted
    }

    /// Look up a session by either of its ids.
    pub fn get(&self, id: &str) -> Option<SessionSnapshot> {
        self.index.read().get(id).map(|slot| slot.snapshot())
    }

    /// All in-memory sessions, each listed once.
    pub fn snapshot(&self) -> Vec<SessionSnapshot> {
        let index = self.index.read();
        let mut seen: Vec<&Arc<SessionSlot>> = Vec::new();
        for slot in index.values() {
            if !seen.iter().any(|s| Arc::ptr_eq(s, slot)) {
                seen.push(slot);
            }
        }
        let mut out: Vec<SessionSnapshot> = seen.into_iter().map(|s| s.snapshot()).collect();
        out.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        out
    }

    /// Number of distinct in-memory sessions.
    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.read().is_empty()
    }

    pub fn tombstone_count(&self) -> usize {
        self.tombstones.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(policy: BusyPolicy) -> SessionRegistry {
        SessionRegistry::new(&SessionsConfig {
            busy_policy: policy,
            busy_wait_secs: 1,
            ..Default::default()
        })
    }

    fn pref(id: &str) -> SessionRef {
        SessionRef::parse(id).unwrap()
    }

    #[tokio::test]
    async fn provisional_binds_and_both_ids_resolve() {
        let reg = registry(BusyPolicy::FailFast);
        let guard = reg.begin_turn(Some(&pref("pending-1000"))).await.unwrap();
        assert!(guard.created());
        assert_eq!(
            reg.bind(&guard, "sdk-abc").unwrap(),
            BindOutcome::Bound {
                provisional_id: Some("pending-1000".into())
            }
        );
        drop(guard);

        let by_prov = reg.begin_turn(Some(&pref("pending-1000"))).await.unwrap();
        assert_eq!(by_prov.session_id(), "sdk-abc");
        assert_eq!(by_prov.resume_id().as_deref(), Some("sdk-abc"));
        let slot = by_prov.slot().clone();
        drop(by_prov);

        let by_real = reg.begin_turn(Some(&pref("sdk-abc"))).await.unwrap();
        assert!(Arc::ptr_eq(by_real.slot(), &slot));
        assert_eq!(reg.len(), 1);
    }

    #[tokio::test]
    async fn binding_is_immutable() {
        let reg = registry(BusyPolicy::FailFast);
        let guard = reg.begin_turn(Some(&pref("pending-1"))).await.unwrap();
        reg.bind(&guard, "real-a").unwrap();
        assert_eq!(reg.bind(&guard, "real-a").unwrap(), BindOutcome::AlreadyBound);
        assert_eq!(reg.bind(&guard, "real-b").unwrap(), BindOutcome::Rejected);
        assert_eq!(guard.session_id(), "real-a");
        assert!(reg.get("real-b").is_none());
    }

    #[tokio::test]
    async fn real_id_owned_elsewhere_is_rejected() {
        let reg = registry(BusyPolicy::FailFast);
        let a = reg.begin_turn(Some(&pref("pending-1"))).await.unwrap();
        reg.bind(&a, "shared").unwrap();
        let b = reg.begin_turn(Some(&pref("pending-2"))).await.unwrap();
        assert_eq!(reg.bind(&b, "shared").unwrap(), BindOutcome::Rejected);
    }

    #[tokio::test]
    async fn invalid_real_id_is_refused() {
        let reg = registry(BusyPolicy::FailFast);
        let guard = reg.begin_turn(None).await.unwrap();
        assert!(matches!(
            reg.bind(&guard, "pending-5"),
            Err(SessionError::InvalidSessionId(_))
        ));
    }

    #[tokio::test]
    async fn fail_fast_reports_busy() {
        let reg = registry(BusyPolicy::FailFast);
        let first = reg.begin_turn(Some(&pref("sdk-abc"))).await.unwrap();
        let second = reg.begin_turn(Some(&pref("sdk-abc"))).await;
        assert!(matches!(second, Err(SessionError::SessionBusy(_))));
        drop(first);
        assert!(reg.begin_turn(Some(&pref("sdk-abc"))).await.is_ok());
    }

    #[tokio::test]
    async fn wait_policy_queues_until_release() {
        let reg = Arc::new(registry(BusyPolicy::Wait));
        let first = reg.begin_turn(Some(&pref("sdk-abc"))).await.unwrap();

        let reg2 = reg.clone();
        let waiter = tokio::spawn(async move {
            reg2.begin_turn(Some(&pref("sdk-abc"))).await.map(|g| g.session_id())
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(first);
        assert_eq!(waiter.await.unwrap().unwrap(), "sdk-abc");
    }

    #[tokio::test(start_paused = true)]
    async fn wait_policy_times_out() {
        let reg = registry(BusyPolicy::Wait);
        let _first = reg.begin_turn(Some(&pref("sdk-abc"))).await.unwrap();
        let second = reg.begin_turn(Some(&pref("sdk-abc"))).await;
        assert!(matches!(second, Err(SessionError::SessionBusy(_))));
    }

    #[tokio::test]
    async fn eviction_tombstones_provisional_ids() {
        let reg = registry(BusyPolicy::FailFast);
        let guard = reg.begin_turn(Some(&pref("pending-1000"))).await.unwrap();
        reg.bind(&guard, "sdk-abc").unwrap();
        drop(guard);

        let later = Utc::now() + chrono::Duration::hours(2);
        assert_eq!(reg.evict_idle_at(later), 1);
        assert!(reg.is_empty());

        assert!(matches!(
            reg.begin_turn(Some(&pref("pending-1000"))).await,
            Err(SessionError::SessionExpired(_))
        ));

        // The real id re-hydrates as a fresh in-memory session.
        let resumed = reg.begin_turn(Some(&pref("sdk-abc"))).await.unwrap();
        assert!(resumed.created());
        assert_eq!(resumed.resume_id().as_deref(), Some("sdk-abc"));
    }

    #[tokio::test]
    async fn eviction_skips_busy_sessions() {
        let reg = registry(BusyPolicy::FailFast);
        let _guard = reg.begin_turn(Some(&pref("sdk-busy"))).await.unwrap();
        let later = Utc::now() + chrono::Duration::hours(2);
        assert_eq!(reg.evict_idle_at(later), 0);
        assert!(reg.get("sdk-busy").unwrap().busy);
    }

    #[tokio::test]
    async fn tombstones_expire_after_retention() {
        let reg = registry(BusyPolicy::FailFast);
        drop(reg.begin_turn(Some(&pref("pending-7"))).await.unwrap());

        let t1 = Utc::now() + chrono::Duration::hours(2);
        reg.evict_idle_at(t1);
        assert_eq!(reg.tombstone_count(), 1);

        reg.evict_idle_at(t1 + chrono::Duration::hours(25));
        assert_eq!(reg.tombstone_count(), 0);
        assert!(reg.begin_turn(Some(&pref("pending-7"))).await.is_ok());
    }

    #[tokio::test]
    async fn snapshot_lists_each_session_once() {
        let reg = registry(BusyPolicy::FailFast);
        let g = reg.begin_turn(Some(&pref("pending-1"))).await.unwrap();
        reg.bind(&g, "real-1").unwrap();
        drop(g);
        drop(reg.begin_turn(Some(&pref("pending-2"))).await.unwrap());

        let snap = reg.snapshot();
        assert_eq!(snap.len(), 2);
        assert!(snap.iter().any(|s| s.session_id == "real-1"
            && s.provisional_id.as_deref() == Some("pending-1")));
    }
}
