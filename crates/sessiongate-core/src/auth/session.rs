use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::storage::{CorruptRecord, TokenAttributes, TokenStorage};
use super::token::{self, Claims};
use crate::api::{AuthError, AuthGateway};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub email: String,
}

/// In-memory record of the current authentication state.
///
/// `access_token == None` means logged out, and then every other field is
/// `None` as well.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub user: Option<User>,
    /// Token expiry in seconds since the epoch
    pub expires_at: Option<i64>,
}

impl Session {
    fn from_claims(access_token: String, refresh_token: Option<String>, claims: Claims) -> Self {
        Self {
            access_token: Some(access_token),
            refresh_token,
            user: Some(User {
                id: claims.user_id,
                email: claims.email,
            }),
            expires_at: Some(claims.exp),
        }
    }

    pub fn is_logged_out(&self) -> bool {
        self.access_token.is_none()
    }

    /// Whether the session has an expiry that has passed at `now`.
    /// A session without an expiry never expires.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at
            .map(|exp| token::is_expired_at(exp, now))
            .unwrap_or(false)
    }

    fn clear(&mut self) {
        *self = Session::default();
    }
}

/// What `restore_from_storage` found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// A valid token was loaded into the session
    Restored,
    /// Storage holds no token
    NothingStored,
    /// The session already had a token; storage was not consulted further
    AlreadyAuthenticated,
    /// The stored token had expired and was cleared
    Expired,
    /// The stored token could not be decoded and was cleared
    Invalid,
    /// Storage could not be read; the session is left as it was
    StorageUnavailable,
}

/// Owner of the application's single `Session`.
///
/// Constructed once by the composition root and shared as
/// `Arc<SessionStore>`. Every read and mutation goes through the methods
/// below.
pub struct SessionStore {
    state: RwLock<Session>,
    gateway: Arc<dyn AuthGateway>,
    storage: Arc<dyn TokenStorage>,
    production: bool,
    /// Held for the duration of a login so logins never interleave
    login_permit: Mutex<()>,
}

impl SessionStore {
    /// Create a logged-out store
    pub fn new(
        gateway: Arc<dyn AuthGateway>,
        storage: Arc<dyn TokenStorage>,
        production: bool,
    ) -> Self {
        Self {
            state: RwLock::new(Session::default()),
            gateway,
            storage,
            production,
            login_permit: Mutex::new(()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Session> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Session> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Copy of the current session
    pub fn snapshot(&self) -> Session {
        self.read().clone()
    }

    pub fn access_token(&self) -> Option<String> {
        self.read().access_token.clone()
    }

    pub fn user(&self) -> Option<User> {
        self.read().user.clone()
    }

    pub fn expires_at(&self) -> Option<i64> {
        self.read().expires_at
    }

    /// `Authorization` header value for outgoing requests, if a token is held
    pub fn authorization_header(&self) -> Option<String> {
        self.read()
            .access_token
            .as_ref()
            .map(|token| format!("Bearer {}", token))
    }

    /// Clear `session` and the persisted token. Callers hold the write guard,
    /// so no other mutation can land between the two.
    fn clear_locked(&self, session: &mut Session) {
        session.clear();
        if let Err(e) = self.storage.clear() {
            warn!(error = %e, "Failed to clear persisted token");
        }
    }

    // =========================================================================
    // Login / Logout
    // =========================================================================

    /// Exchange credentials for tokens and replace the session with the
    /// decoded identity. On failure the session is untouched.
    pub async fn login(&self, email: &str, password: &str) -> Result<(), AuthError> {
        let _permit = self.login_permit.lock().await;

        let pair = self.gateway.obtain_tokens(email, password).await.map_err(|e| {
            error!(error = %e, "Login failed");
            e
        })?;

        let claims = token::decode_claims(&pair.access).map_err(|e| {
            error!(error = %e, "Login returned an undecodable access token");
            AuthError::InvalidToken(e)
        })?;
        let user_id = claims.user_id;

        {
            let mut session = self.write();
            if let Err(e) = self
                .storage
                .write_token(&pair.access, TokenAttributes::for_session(self.production))
            {
                warn!(error = %e, "Failed to persist access token");
            }
            *session = Session::from_claims(pair.access, Some(pair.refresh), claims);
        }

        info!(user_id, "Login successful");
        Ok(())
    }

    /// Clear the session and the persisted token. Safe to call when already
    /// logged out.
    pub fn logout(&self) {
        let was_logged_in = {
            let mut session = self.write();
            let was = !session.is_logged_out();
            self.clear_locked(&mut session);
            was
        };

        if was_logged_in {
            info!("Logged out");
        }
    }

    // =========================================================================
    // Validity
    // =========================================================================

    /// Log out if the session has expired at `now`. Returns whether it did.
    pub fn expire_if_needed(&self, now: DateTime<Utc>) -> bool {
        if !self.read().is_expired(now) {
            return false;
        }

        // Re-check under the write guard: a login may have replaced the session
        let mut session = self.write();
        if session.is_logged_out() || !session.is_expired(now) {
            return false;
        }
        debug!(expires_at = ?session.expires_at, "Session expired");
        self.clear_locked(&mut session);
        true
    }

    /// True if a token is held and it has not expired. An expired session is
    /// logged out as a side effect.
    pub fn check_auth(&self) -> bool {
        self.check_auth_at(Utc::now())
    }

    pub fn check_auth_at(&self, now: DateTime<Utc>) -> bool {
        if self.read().is_logged_out() {
            return false;
        }
        !self.expire_if_needed(now)
    }

    pub fn is_logged_in(&self) -> bool {
        self.is_logged_in_at(Utc::now())
    }

    pub fn is_logged_in_at(&self, now: DateTime<Utc>) -> bool {
        self.access_token().is_some() && self.check_auth_at(now)
    }

    // =========================================================================
    // Restore
    // =========================================================================

    /// Load the persisted token into an empty session. Undecodable, corrupt
    /// or expired records log out and clear storage; no failure reaches the
    /// caller.
    pub fn restore_from_storage(&self) -> RestoreOutcome {
        self.restore_from_storage_at(Utc::now())
    }

    pub fn restore_from_storage_at(&self, now: DateTime<Utc>) -> RestoreOutcome {
        let mut session = self.write();

        let stored = match self.storage.read_token() {
            Ok(Some(stored)) => stored,
            Ok(None) => return RestoreOutcome::NothingStored,
            Err(e) if e.downcast_ref::<CorruptRecord>().is_some() => {
                if !session.is_logged_out() {
                    return RestoreOutcome::AlreadyAuthenticated;
                }
                warn!(error = %e, "Persisted token record is corrupt, clearing");
                self.clear_locked(&mut session);
                return RestoreOutcome::Invalid;
            }
            Err(e) => {
                warn!(error = %e, "Persisted token unavailable");
                return RestoreOutcome::StorageUnavailable;
            }
        };

        if !session.is_logged_out() {
            return RestoreOutcome::AlreadyAuthenticated;
        }

        let claims = match token::decode_claims(&stored) {
            Ok(claims) => claims,
            Err(e) => {
                warn!(error = %e, "Persisted token could not be decoded, clearing");
                self.clear_locked(&mut session);
                return RestoreOutcome::Invalid;
            }
        };

        if token::is_expired_at(claims.exp, now) {
            info!(exp = claims.exp, "Persisted token expired, clearing");
            self.clear_locked(&mut session);
            return RestoreOutcome::Expired;
        }

        let user_id = claims.user_id;
        *session = Session::from_claims(stored, None, claims);

        info!(user_id, "Session restored from storage");
        RestoreOutcome::Restored
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiClient, TokenPair};
    use crate::auth::storage::{FileStorage, MemoryStorage, NoStorage, StoredToken};
    use crate::auth::token::testing::mint;
    use async_trait::async_trait;
    use chrono::Duration;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Mutex as StdMutex, OnceLock};
    use std::thread::JoinHandle;

    /// Gateway that always issues the same pair
    struct IssuingGateway {
        access: String,
        refresh: String,
    }

    #[async_trait]
    impl AuthGateway for IssuingGateway {
        async fn obtain_tokens(&self, _email: &str, _password: &str) -> Result<TokenPair, AuthError> {
            Ok(TokenPair {
                access: self.access.clone(),
                refresh: self.refresh.clone(),
            })
        }
    }

    struct RejectingGateway;

    #[async_trait]
    impl AuthGateway for RejectingGateway {
        async fn obtain_tokens(&self, _email: &str, _password: &str) -> Result<TokenPair, AuthError> {
            Err(AuthError::Rejected {
                status: 401,
                message: "invalid credentials".to_string(),
            })
        }
    }

    /// Gateway that records how many requests overlap
    struct SlowGateway {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        access: String,
    }

    #[async_trait]
    impl AuthGateway for SlowGateway {
        async fn obtain_tokens(&self, _email: &str, _password: &str) -> Result<TokenPair, AuthError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(TokenPair {
                access: self.access.clone(),
                refresh: "r".to_string(),
            })
        }
    }

    /// Storage whose `save` starts a logout on another thread and then
    /// takes a while to finish writing
    #[derive(Default)]
    struct LogoutDuringSave {
        inner: MemoryStorage,
        store: OnceLock<Arc<SessionStore>>,
        logout: StdMutex<Option<JoinHandle<()>>>,
    }

    impl TokenStorage for LogoutDuringSave {
        fn load(&self) -> anyhow::Result<Option<StoredToken>> {
            self.inner.load()
        }

        fn save(&self, token: &StoredToken) -> anyhow::Result<()> {
            if let Some(store) = self.store.get() {
                let store = store.clone();
                *self.logout.lock().unwrap() = Some(std::thread::spawn(move || store.logout()));
            }
            std::thread::sleep(std::time::Duration::from_millis(50));
            self.inner.save(token)
        }

        fn clear(&self) -> anyhow::Result<()> {
            self.inner.clear()
        }
    }

    fn in_an_hour() -> i64 {
        (Utc::now() + Duration::hours(1)).timestamp()
    }

    fn issuing(access: String) -> Arc<dyn AuthGateway> {
        Arc::new(IssuingGateway {
            access,
            refresh: "r1".to_string(),
        })
    }

    fn logged_in_store(exp: i64, storage: Arc<dyn TokenStorage>) -> SessionStore {
        let store = SessionStore::new(issuing(mint(1, "a@b.com", exp)), storage, false);
        *store.write() = Session::from_claims(
            mint(1, "a@b.com", exp),
            Some("r1".to_string()),
            Claims {
                user_id: 1,
                email: "a@b.com".to_string(),
                exp,
            },
        );
        store
    }

    #[test]
    fn test_new_store_is_logged_out() {
        let store = SessionStore::new(Arc::new(RejectingGateway), Arc::new(NoStorage), false);
        assert_eq!(store.snapshot(), Session::default());
        assert!(!store.is_logged_in());
        assert!(!store.check_auth());
        assert_eq!(store.authorization_header(), None);
    }

    #[tokio::test]
    async fn test_login_sets_all_fields_and_persists() {
        let access = mint(42, "a@b.com", in_an_hour());
        let storage = Arc::new(MemoryStorage::new());
        let store = SessionStore::new(issuing(access.clone()), storage.clone(), true);

        store.login("a@b.com", "x").await.unwrap();

        assert!(store.is_logged_in());
        let session = store.snapshot();
        assert_eq!(session.access_token.as_deref(), Some(access.as_str()));
        assert_eq!(session.refresh_token.as_deref(), Some("r1"));
        assert_eq!(
            session.user,
            Some(User {
                id: 42,
                email: "a@b.com".to_string()
            })
        );
        assert!(session.expires_at.is_some());
        assert_eq!(store.authorization_header(), Some(format!("Bearer {}", access)));

        let stored = storage.load().unwrap().unwrap();
        assert_eq!(stored.value, access);
        assert!(stored.attributes.secure);
    }

    #[tokio::test]
    async fn test_rejected_login_leaves_session_unchanged() {
        let storage = Arc::new(MemoryStorage::new());
        let store = SessionStore::new(Arc::new(RejectingGateway), storage.clone(), false);

        let err = store.login("a@b.com", "bad").await.unwrap_err();
        assert_eq!(err.to_string(), "invalid credentials");
        assert_eq!(store.snapshot(), Session::default());
        assert_eq!(storage.read_token().unwrap(), None);
    }

    #[tokio::test]
    async fn test_rejected_login_keeps_existing_session() {
        let store = logged_in_store(in_an_hour(), Arc::new(NoStorage));
        let before = store.snapshot();
        let store = SessionStore {
            gateway: Arc::new(RejectingGateway),
            ..store
        };

        assert!(store.login("a@b.com", "bad").await.is_err());
        assert_eq!(store.snapshot(), before);
    }

    #[tokio::test]
    async fn test_login_with_undecodable_token_fails() {
        let store = SessionStore::new(issuing("garbage".to_string()), Arc::new(NoStorage), false);
        let err = store.login("a@b.com", "x").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken(_)));
        assert!(store.snapshot().is_logged_out());
    }

    #[tokio::test]
    async fn test_login_against_http_backend_surfaces_detail() {
        use serde_json::json;
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/users/token/"))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(json!({"detail": "invalid credentials"})),
            )
            .mount(&server)
            .await;

        let gateway = Arc::new(ApiClient::new(server.uri()).unwrap());
        let store = SessionStore::new(gateway, Arc::new(MemoryStorage::new()), false);

        let err = store.login("a@b.com", "x").await.unwrap_err();
        assert_eq!(err.to_string(), "invalid credentials");
        assert_eq!(store.snapshot(), Session::default());
    }

    #[tokio::test]
    async fn test_concurrent_logins_are_serialized() {
        let gateway = Arc::new(SlowGateway {
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            access: mint(5, "c@d.com", in_an_hour()),
        });
        let store = Arc::new(SessionStore::new(
            gateway.clone(),
            Arc::new(NoStorage),
            false,
        ));

        let a = tokio::spawn({
            let store = store.clone();
            async move { store.login("c@d.com", "x").await }
        });
        let b = tokio::spawn({
            let store = store.clone();
            async move { store.login("c@d.com", "x").await }
        });
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        assert_eq!(gateway.max_in_flight.load(Ordering::SeqCst), 1);
        assert!(store.is_logged_in());
    }

    #[tokio::test]
    async fn test_logout_during_login_persist_leaves_no_orphan_token() {
        let storage = Arc::new(LogoutDuringSave::default());
        let store = Arc::new(SessionStore::new(
            issuing(mint(3, "x@y.com", in_an_hour())),
            storage.clone(),
            false,
        ));
        let _ = storage.store.set(store.clone());

        store.login("x@y.com", "pw").await.unwrap();
        let logout = storage.logout.lock().unwrap().take().unwrap();
        logout.join().unwrap();

        // The logout ran after the whole login, so both sides are empty
        assert!(store.snapshot().is_logged_out());
        assert_eq!(storage.read_token().unwrap(), None);
        let fresh = SessionStore::new(Arc::new(RejectingGateway), storage, false);
        assert_eq!(fresh.restore_from_storage(), RestoreOutcome::NothingStored);
    }

    #[test]
    fn test_expire_if_needed_keeps_session_replaced_after_check() {
        let store = logged_in_store(in_an_hour(), Arc::new(NoStorage));
        let after_expiry = Utc::now() + Duration::hours(2);

        // Logged out between the caller's read and the write: nothing to expire
        store.logout();
        assert!(!store.expire_if_needed(after_expiry));
    }

    #[test]
    fn test_logout_is_idempotent() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .write_token("t", TokenAttributes::for_session(false))
            .unwrap();
        let store = logged_in_store(in_an_hour(), storage.clone());

        store.logout();
        let first = store.snapshot();
        store.logout();

        assert_eq!(first, Session::default());
        assert_eq!(store.snapshot(), first);
        assert_eq!(storage.read_token().unwrap(), None);
    }

    #[test]
    fn test_check_auth_expires_session() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .write_token("t", TokenAttributes::for_session(false))
            .unwrap();
        let exp = (Utc::now() - Duration::seconds(5)).timestamp();
        let store = logged_in_store(exp, storage.clone());

        assert!(!store.check_auth());
        assert_eq!(store.access_token(), None);
        assert_eq!(store.snapshot(), Session::default());
        assert_eq!(storage.read_token().unwrap(), None);
    }

    #[test]
    fn test_check_auth_without_expiry_is_valid() {
        let store = SessionStore::new(Arc::new(RejectingGateway), Arc::new(NoStorage), false);
        store.write().access_token = Some("opaque".to_string());
        assert!(store.check_auth());
        assert!(store.is_logged_in());
    }

    #[test]
    fn test_is_expired_is_pure() {
        let exp = 1_700_000_000;
        let session = Session {
            access_token: Some("t".to_string()),
            expires_at: Some(exp),
            ..Default::default()
        };
        let at = |ms| DateTime::<Utc>::from_timestamp_millis(ms).unwrap();
        assert!(!session.is_expired(at(exp * 1000 - 1)));
        assert!(session.is_expired(at(exp * 1000)));
        // Querying did not change anything
        assert_eq!(session.access_token.as_deref(), Some("t"));
        assert!(!Session::default().is_expired(at(0)));
    }

    #[test]
    fn test_expire_if_needed_uses_given_time() {
        let exp = in_an_hour();
        let store = logged_in_store(exp, Arc::new(NoStorage));
        assert!(!store.expire_if_needed(Utc::now()));
        assert!(store.is_logged_in());

        let later = DateTime::<Utc>::from_timestamp(exp, 0).unwrap();
        assert!(store.expire_if_needed(later));
        assert!(store.snapshot().is_logged_out());
        // Nothing left to expire
        assert!(!store.expire_if_needed(later));
    }

    #[tokio::test]
    async fn test_login_then_restore_in_fresh_store() {
        let access = mint(9, "r@t.com", in_an_hour());
        let storage: Arc<dyn TokenStorage> = Arc::new(MemoryStorage::new());
        let first = SessionStore::new(issuing(access.clone()), storage.clone(), false);
        first.login("r@t.com", "x").await.unwrap();

        let fresh = SessionStore::new(Arc::new(RejectingGateway), storage, false);
        assert_eq!(fresh.restore_from_storage(), RestoreOutcome::Restored);

        let restored = fresh.snapshot();
        let original = first.snapshot();
        assert_eq!(restored.access_token, original.access_token);
        assert_eq!(restored.expires_at, original.expires_at);
        assert_eq!(restored.user, original.user);
        assert_eq!(restored.refresh_token, None);
        assert!(fresh.is_logged_in());
    }

    #[test]
    fn test_restore_expired_token_clears_storage() {
        let storage = Arc::new(MemoryStorage::new());
        let exp = (Utc::now() - Duration::seconds(1)).timestamp();
        storage
            .write_token(&mint(1, "a@b.com", exp), TokenAttributes::for_session(false))
            .unwrap();
        let store = SessionStore::new(Arc::new(RejectingGateway), storage.clone(), false);

        assert_eq!(store.restore_from_storage(), RestoreOutcome::Expired);
        assert!(store.snapshot().is_logged_out());
        assert_eq!(storage.read_token().unwrap(), None);
    }

    #[test]
    fn test_restore_garbage_token_clears_storage() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .write_token("definitely.not.jwt", TokenAttributes::for_session(false))
            .unwrap();
        let store = SessionStore::new(Arc::new(RejectingGateway), storage.clone(), false);

        assert_eq!(store.restore_from_storage(), RestoreOutcome::Invalid);
        assert!(store.snapshot().is_logged_out());
        assert_eq!(storage.read_token().unwrap(), None);
    }

    #[test]
    fn test_restore_corrupt_file_record_clears_it() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth-token.json");
        std::fs::write(&path, "not json").unwrap();
        let storage = Arc::new(FileStorage::new(dir.path().to_path_buf()));
        let store = SessionStore::new(Arc::new(RejectingGateway), storage.clone(), false);

        assert_eq!(store.restore_from_storage(), RestoreOutcome::Invalid);
        assert!(store.snapshot().is_logged_out());
        assert!(!path.exists());
        assert_eq!(store.restore_from_storage(), RestoreOutcome::NothingStored);
    }

    #[test]
    fn test_restore_keeps_in_memory_token() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .write_token(&mint(2, "other@b.com", in_an_hour()), TokenAttributes::for_session(false))
            .unwrap();
        let store = logged_in_store(in_an_hour(), storage);
        let before = store.snapshot();

        assert_eq!(store.restore_from_storage(), RestoreOutcome::AlreadyAuthenticated);
        assert_eq!(store.snapshot(), before);
    }

    #[test]
    fn test_restore_with_nothing_stored() {
        let store = SessionStore::new(Arc::new(RejectingGateway), Arc::new(NoStorage), false);
        assert_eq!(store.restore_from_storage(), RestoreOutcome::NothingStored);
        assert!(store.snapshot().is_logged_out());
    }
}
