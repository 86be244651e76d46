//! Session lifecycle: expiry checks, proactive token refresh, passcode-session
//! expiry and the periodic health check.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::api::{AuthApi, RefreshRequest};

use super::clock::{Clock, SystemClock};
use super::policy::SessionPolicy;
use super::record::{AuthRoute, SessionRecord};
use super::store::SessionStore;
use super::timer::CancellableTimer;

/// Buffer size for the lifecycle event channel.
/// Subscribers that fall this far behind skip ahead to the newest events.
const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Lifecycle transitions, broadcast to any interested UI layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Timers armed for a restored or newly started session
    Initialized,
    SignedIn,
    TokenRefreshed,
    /// A transient refresh failure; another attempt follows after `delay`
    RefreshRetrying { attempt: u32, delay: Duration },
    /// Hard expiry: the user must authenticate again
    SessionExpired,
    /// Soft expiry: the passcode must be entered again
    PasscodeSessionExpired,
    SignedOut,
}

struct Timers {
    refresh: CancellableTimer,
    passcode: CancellableTimer,
    health: CancellableTimer,
}

struct Inner {
    store: Arc<SessionStore>,
    api: Arc<dyn AuthApi>,
    clock: Arc<dyn Clock>,
    policy: SessionPolicy,
    timers: Mutex<Timers>,
    initialized: AtomicBool,
    /// Held for the whole refresh; holds the refresh token the last settled
    /// refresh started from.
    refresh_guard: tokio::sync::Mutex<Option<String>>,
    refresh_generation: AtomicU64,
    /// Bumped by every `cleanup()`; a refresh that sees it move gives up.
    cleanup_epoch: AtomicU64,
    events: broadcast::Sender<SessionEvent>,
}

/// Owns the session record's lifecycle.
///
/// Clone is cheap; all clones drive the same timers and store. Timer tasks
/// only hold weak references, so dropping every handle lets pending timers
/// lapse without effect.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    pub fn new(
        store: Arc<SessionStore>,
        api: Arc<dyn AuthApi>,
        clock: Arc<dyn Clock>,
        policy: SessionPolicy,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                store,
                api,
                clock,
                policy,
                timers: Mutex::new(Timers {
                    refresh: CancellableTimer::new("token-refresh"),
                    passcode: CancellableTimer::new("passcode-session"),
                    health: CancellableTimer::new("health-check"),
                }),
                initialized: AtomicBool::new(false),
                refresh_guard: tokio::sync::Mutex::new(None),
                refresh_generation: AtomicU64::new(0),
                cleanup_epoch: AtomicU64::new(0),
                events,
            }),
        }
    }

    /// Manager on the system clock with the default policy.
    pub fn with_defaults(store: Arc<SessionStore>, api: Arc<dyn AuthApi>) -> Self {
        Self::new(store, api, Arc::new(SystemClock), SessionPolicy::default())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn store(&self) -> &SessionStore {
        &self.inner.store
    }

    pub(crate) fn api(&self) -> &dyn AuthApi {
        self.inner.api.as_ref()
    }

    pub fn policy(&self) -> &SessionPolicy {
        &self.inner.policy
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    pub fn snapshot(&self) -> SessionRecord {
        self.inner.store.snapshot()
    }

    pub fn subscribe(&self) -> tokio::sync::watch::Receiver<SessionRecord> {
        self.inner.store.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn route(&self) -> AuthRoute {
        let now = self.now();
        self.inner.store.read(|r| r.route(now))
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::SeqCst)
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.inner.events.send(event);
    }

    fn timers(&self) -> MutexGuard<'_, Timers> {
        self.inner.timers.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn downgrade(&self) -> Weak<Inner> {
        Arc::downgrade(&self.inner)
    }

    fn upgrade(weak: &Weak<Inner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    // =========================================================================
    // Expiry math
    // =========================================================================

    /// True when `expires_at` is now or in the past.
    pub fn is_token_expired(&self, expires_at: DateTime<Utc>) -> bool {
        expires_at <= self.now()
    }

    /// Time left until `expires_at`, zero once it has passed.
    pub fn time_until_expiry(&self, expires_at: DateTime<Utc>) -> Duration {
        (expires_at - self.now()).to_std().unwrap_or(Duration::ZERO)
    }

    /// Whether the session is authenticated and holds both tokens.
    pub fn is_session_valid(&self) -> bool {
        self.inner.store.read(SessionRecord::is_session_valid)
    }

    pub fn update_last_activity(&self) {
        let now = self.now();
        self.inner.store.update(|r| r.last_activity_at = Some(now));
    }

    // =========================================================================
    // Token refresh
    // =========================================================================

    /// Rotate the token pair through the auth backend.
    ///
    /// Fails closed: a missing refresh token, a terminal rejection, or
    /// running out of retries for transient failures all end in a hard
    /// expiry. Concurrent callers are serialized; a caller that waited behind
    /// a refresh of the same token which settled in the meantime returns
    /// without a second request. A `cleanup()` while a refresh is in flight
    /// makes it give up without touching the record.
    pub async fn refresh_token(&self) {
        let observed = self.inner.refresh_generation.load(Ordering::SeqCst);
        let observed_token = self.inner.store.read(|r| r.refresh_token.clone());

        let mut last_source = self.inner.refresh_guard.lock().await;
        if self.inner.refresh_generation.load(Ordering::SeqCst) != observed
            && *last_source == observed_token
        {
            debug!("Token refresh completed while waiting, skipping");
            return;
        }

        let source = self.inner.store.read(|r| r.refresh_token.clone());
        if self.refresh_locked().await {
            *last_source = source;
            self.inner.refresh_generation.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Explicit user-triggered retry.
    pub async fn force_refresh(&self) {
        self.refresh_token().await;
    }

    /// Returns whether the refresh settled: tokens rotated or the session
    /// expired. Abandoned and discarded refreshes return false.
    async fn refresh_locked(&self) -> bool {
        let store = &self.inner.store;
        let current = store.read(|r| r.refresh_token.clone().filter(|_| r.is_authenticated));
        let Some(refresh_token) = current else {
            warn!("No refresh token available or not authenticated");
            self.handle_session_expired();
            return true;
        };

        let epoch = self.inner.cleanup_epoch.load(Ordering::SeqCst);
        let cleaned_up = || self.inner.cleanup_epoch.load(Ordering::SeqCst) != epoch;

        let request = RefreshRequest {
            refresh_token: refresh_token.clone(),
        };
        let retry = &self.inner.policy.retry;
        let mut attempt = 0;

        loop {
            attempt += 1;
            info!(attempt, "Refreshing access token");

            let result = self.inner.api.refresh_token(&request).await;
            if cleaned_up() {
                debug!("Session manager cleaned up during refresh, discarding result");
                return false;
            }

            match result {
                Ok(response) => {
                    let expires_at = response.expires_at;
                    let applied = store.update_if(|r| {
                        if !r.is_authenticated || !r.holds_refresh_token(&refresh_token) {
                            return false;
                        }
                        r.rotate_tokens(response.access_token, response.refresh_token, expires_at);
                        true
                    });

                    if !applied {
                        warn!("Session changed while refreshing, discarding new tokens");
                        return false;
                    }

                    info!("Token refreshed successfully");
                    self.emit(SessionEvent::TokenRefreshed);
                    if let Some(expires_at) = expires_at {
                        self.schedule_token_refresh(expires_at);
                    }
                    return true;
                }
                Err(e) if e.is_retryable() && attempt < retry.max_attempts => {
                    let delay = retry.backoff(attempt);
                    warn!(
                        error = %e,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Token refresh failed, backing off"
                    );
                    self.emit(SessionEvent::RefreshRetrying { attempt, delay });
                    tokio::time::sleep(delay).await;

                    if cleaned_up() {
                        debug!("Session manager cleaned up during backoff, abandoning refresh");
                        return false;
                    }
                    if !store.read(|r| r.is_authenticated && r.holds_refresh_token(&refresh_token)) {
                        debug!("Session changed during backoff, abandoning refresh");
                        return false;
                    }
                }
                Err(e) => {
                    error!(error = %e, attempt, retryable = e.is_retryable(), "Token refresh failed");
                    if !store.read(|r| r.holds_refresh_token(&refresh_token)) {
                        return false;
                    }
                    self.handle_session_expired();
                    return true;
                }
            }
        }
    }

    fn spawn_refresh(&self) {
        let weak = self.downgrade();
        tokio::spawn(async move {
            if let Some(manager) = Self::upgrade(&weak) {
                manager.refresh_token().await;
            }
        });
    }

    /// Arm the refresh timer to fire one renewal buffer before `expires_at`.
    ///
    /// Any pending refresh timer is cancelled first. When the token is
    /// already inside the buffer, the refresh starts right away instead.
    pub fn schedule_token_refresh(&self, expires_at: DateTime<Utc>) {
        let delay = self
            .time_until_expiry(expires_at)
            .saturating_sub(self.inner.policy.refresh_buffer);

        let mut timers = self.timers();
        timers.refresh.cancel();

        if delay > Duration::ZERO {
            info!(minutes = delay.as_secs() / 60, "Scheduling token refresh");
            let weak = self.downgrade();
            timers.refresh.arm(delay, async move {
                if let Some(manager) = Self::upgrade(&weak) {
                    manager.refresh_token().await;
                }
            });
        } else {
            drop(timers);
            info!("Token expired or expiring soon, refreshing immediately");
            self.spawn_refresh();
        }
    }

    // =========================================================================
    // Expiry handling
    // =========================================================================

    /// Hard expiry: stop every timer and clear the session record.
    pub fn handle_session_expired(&self) {
        info!("Primary session expired, clearing all session data");
        self.cleanup();
        self.inner.store.update(SessionRecord::clear_expired_session);
        self.emit(SessionEvent::SessionExpired);
    }

    /// Soft expiry: clear only the passcode session.
    pub fn handle_passcode_session_expired(&self) {
        info!("Passcode session expired, keeping primary session");
        self.timers().passcode.cancel();
        self.inner.store.update(SessionRecord::clear_passcode_session);
        self.emit(SessionEvent::PasscodeSessionExpired);
    }

    /// Arm the passcode timer for `expires_at`, or expire right away if due.
    pub fn schedule_passcode_session_expiry(&self, expires_at: DateTime<Utc>) {
        let delay = self.time_until_expiry(expires_at);

        let mut timers = self.timers();
        timers.passcode.cancel();

        if delay > Duration::ZERO {
            info!(minutes = delay.as_secs() / 60, "Scheduling passcode session expiry");
            let weak = self.downgrade();
            timers.passcode.arm(delay, async move {
                if let Some(manager) = Self::upgrade(&weak) {
                    manager.handle_passcode_session_expired();
                }
            });
        } else {
            drop(timers);
            debug!("Passcode session already expired");
            self.handle_passcode_session_expired();
        }
    }

    // =========================================================================
    // Startup and teardown
    // =========================================================================

    /// Validate the restored record and arm the lifecycle timers.
    ///
    /// Safe to call from every entry point; only the first call on an active
    /// session does anything until `cleanup()` runs.
    pub fn initialize(&self) {
        if self
            .inner
            .initialized
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Session manager already initialized");
            return;
        }

        let record = self.snapshot();
        if !record.is_session_valid() {
            debug!("No active session to initialize");
            self.inner.initialized.store(false, Ordering::SeqCst);
            return;
        }

        let now = self.now();
        if record.check_token_expiry(now) {
            info!("Primary session expired before initialization");
            self.handle_session_expired();
            return;
        }

        if let Some(expires_at) = record.passcode_session_expires_at {
            if record.check_passcode_session_expiry(now) {
                self.handle_passcode_session_expired();
            } else {
                self.schedule_passcode_session_expiry(expires_at);
            }
        }

        self.update_last_activity();
        self.schedule_health_check();

        info!("Session management initialized");
        self.emit(SessionEvent::Initialized);
    }

    fn schedule_health_check(&self) {
        let weak = self.downgrade();
        let interval = self.inner.policy.health_check_interval;
        self.timers().health.arm(interval, async move {
            if let Some(manager) = Self::upgrade(&weak) {
                manager.run_health_check().await;
            }
        });
    }

    async fn run_health_check(&self) {
        let (active, expired) = {
            let now = self.now();
            self.inner
                .store
                .read(|r| (r.is_authenticated && r.access_token.is_some(), r.check_token_expiry(now)))
        };

        if active {
            info!("Running session health check");
            if expired {
                info!("Primary session expired during health check");
                self.handle_session_expired();
                return;
            }
            self.refresh_token().await;
        }

        if self.is_initialized() {
            self.schedule_health_check();
        }
    }

    /// Cancel every timer and mark the manager uninitialized. Idempotent.
    pub fn cleanup(&self) {
        debug!("Cleaning up session timers");
        {
            let mut timers = self.timers();
            timers.refresh.cancel();
            timers.passcode.cancel();
            timers.health.cancel();
        }
        self.inner.cleanup_epoch.fetch_add(1, Ordering::SeqCst);
        self.inner.initialized.store(false, Ordering::SeqCst);
    }

    #[cfg(test)]
    pub(crate) fn refresh_timer_armed(&self) -> bool {
        self.timers().refresh.is_armed()
    }

    #[cfg(test)]
    pub(crate) fn passcode_timer_armed(&self) -> bool {
        self.timers().passcode.is_armed()
    }

    #[cfg(test)]
    pub(crate) fn health_timer_armed(&self) -> bool {
        self.timers().health.is_armed()
    }
}
