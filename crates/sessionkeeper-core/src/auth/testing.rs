//! Test doubles shared by the auth module's unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::broadcast;

use crate::api::{
    ApiError, AuthApi, CreatePasscodeRequest, Credentials, PasscodeVerification, RefreshRequest,
    RefreshResponse, RegisterResponse, SessionGrant, VerifyEmailRequest, VerifyPasscodeRequest,
};

use super::clock::TokioClock;
use super::manager::{SessionEvent, SessionManager};
use super::persistence::MemorySessionPersistence;
use super::policy::SessionPolicy;
use super::record::SessionRecord;
use super::store::SessionStore;

/// Fixed wall-clock origin for manager tests.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 16, 9, 0, 0).unwrap()
}

/// Authenticated record issued at `t0()` with the default 7-day window.
pub fn active_record() -> SessionRecord {
    let mut record = SessionRecord::default();
    record.start_primary_session("at".into(), "rt".into(), t0(), None, chrono::Duration::days(7));
    record
}

/// Manager over an in-memory store whose clock starts at `t0()` and follows
/// tokio's (paused) clock.
pub fn manager_with(record: SessionRecord, api: ScriptedAuthApi) -> (SessionManager, Arc<ScriptedAuthApi>) {
    let persistence = Arc::new(MemorySessionPersistence::new());
    let store = Arc::new(SessionStore::open(persistence));
    store.update(|r| *r = record);

    let api = Arc::new(api);
    let manager = SessionManager::new(
        store,
        api.clone(),
        Arc::new(TokioClock::new(t0())),
        SessionPolicy::default(),
    );
    (manager, api)
}

/// Let spawned tasks run until they block again.
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

pub fn drain(events: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

/// `AuthApi` that replays queued responses and counts calls.
///
/// Unscripted calls fail with `ApiError::Unauthorized`.
#[derive(Default)]
pub struct ScriptedAuthApi {
    refresh: Mutex<VecDeque<Result<RefreshResponse, ApiError>>>,
    login: Mutex<VecDeque<Result<SessionGrant, ApiError>>>,
    verify_email: Mutex<VecDeque<Result<SessionGrant, ApiError>>>,
    verify_passcode: Mutex<VecDeque<Result<PasscodeVerification, ApiError>>>,
    logout_fails: Mutex<bool>,
    refresh_latency: Mutex<Duration>,
    refresh_calls: AtomicUsize,
    logout_calls: AtomicUsize,
    register_calls: AtomicUsize,
    create_passcode_calls: AtomicUsize,
}

fn pop<T>(queue: &Mutex<VecDeque<Result<T, ApiError>>>) -> Result<T, ApiError> {
    queue
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or(Err(ApiError::Unauthorized))
}

impl ScriptedAuthApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_refresh(&self, response: Result<RefreshResponse, ApiError>) {
        self.refresh.lock().unwrap().push_back(response);
    }

    pub fn push_login(&self, response: Result<SessionGrant, ApiError>) {
        self.login.lock().unwrap().push_back(response);
    }

    pub fn push_verify_email(&self, response: Result<SessionGrant, ApiError>) {
        self.verify_email.lock().unwrap().push_back(response);
    }

    pub fn push_verify_passcode(&self, response: Result<PasscodeVerification, ApiError>) {
        self.verify_passcode.lock().unwrap().push_back(response);
    }

    pub fn set_refresh_latency(&self, latency: Duration) {
        *self.refresh_latency.lock().unwrap() = latency;
    }

    pub fn fail_logout(&self) {
        *self.logout_fails.lock().unwrap() = true;
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn logout_calls(&self) -> usize {
        self.logout_calls.load(Ordering::SeqCst)
    }

    pub fn register_calls(&self) -> usize {
        self.register_calls.load(Ordering::SeqCst)
    }

    pub fn create_passcode_calls(&self) -> usize {
        self.create_passcode_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthApi for ScriptedAuthApi {
    async fn login(&self, _credentials: &Credentials) -> Result<SessionGrant, ApiError> {
        pop(&self.login)
    }

    async fn register(&self, credentials: &Credentials) -> Result<RegisterResponse, ApiError> {
        self.register_calls.fetch_add(1, Ordering::SeqCst);
        Ok(RegisterResponse {
            identifier: credentials.email.clone(),
        })
    }

    async fn verify_email(&self, _request: &VerifyEmailRequest) -> Result<SessionGrant, ApiError> {
        pop(&self.verify_email)
    }

    async fn refresh_token(&self, _request: &RefreshRequest) -> Result<RefreshResponse, ApiError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        let latency = *self.refresh_latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        pop(&self.refresh)
    }

    async fn logout(&self, _access_token: Option<&str>) -> Result<(), ApiError> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        if *self.logout_fails.lock().unwrap() {
            Err(ApiError::ServerError("logout unavailable".into()))
        } else {
            Ok(())
        }
    }

    async fn verify_passcode(
        &self,
        _access_token: Option<&str>,
        _request: &VerifyPasscodeRequest,
    ) -> Result<PasscodeVerification, ApiError> {
        pop(&self.verify_passcode)
    }

    async fn create_passcode(
        &self,
        _access_token: Option<&str>,
        _request: &CreatePasscodeRequest,
    ) -> Result<(), ApiError> {
        self.create_passcode_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
