//! The session manager: token lifecycle, refresh and the 401 retry policy

use chrono::Utc;
use log::{debug, error, info, warn};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};

use crate::error::{
    AuthError, LOGIN_FAILED, MFA_DISABLE_FAILED, MFA_SETUP_FAILED, MFA_VERIFICATION_FAILED,
    REGISTRATION_FAILED, SESSION_EXPIRED,
};
use crate::fetch::{self, ApiRequest, Fetch};
use crate::guard::Access;
use crate::session::{token_expires_at, SessionState, StoredTokens};
use crate::store::TokenStore;
use crate::types::{
    LoginOutcome, LoginRequest, LoginResponse, MfaChallenge, MfaMethod, MfaSetupRequest,
    MfaSetupResponse, MfaVerifyRequest, RefreshRequest, RefreshResponse, RegisterRequest, User,
};
use crate::AuthOptions;

const REQUEST_FAILED: &str = "Request failed";
const USER_FETCH_FAILED: &str = "Failed to load user";

/// Auth クライアント
///
/// Owns the session for one application. Create it once, call
/// [`SessionManager::restore`] at startup and share it by reference (or in an
/// `Arc`) with everything that needs authenticated access. Dropping the
/// manager closes every [`SessionManager::subscribe`] receiver.
pub struct SessionManager {
    fetch: Fetch,
    store: Arc<dyn TokenStore>,
    options: AuthOptions,
    state: watch::Sender<SessionState>,
    /// Held for the whole of a refresh; concurrent refreshes queue here
    refresh_lock: Mutex<()>,
    /// Held while the store and the in-memory tokens change together
    session_lock: Mutex<()>,
}

impl SessionManager {
    /// 新しい SessionManager を作成
    pub fn new(
        base_url: &str,
        http_client: Client,
        store: Arc<dyn TokenStore>,
        options: AuthOptions,
    ) -> Result<Self, AuthError> {
        let (state, _) = watch::channel(SessionState::initial());
        Ok(Self {
            fetch: Fetch::new(http_client, base_url)?,
            store,
            options,
            state,
            refresh_lock: Mutex::new(()),
            session_lock: Mutex::new(()),
        })
    }

    pub fn base_url(&self) -> &str {
        self.fetch.base_url()
    }

    pub fn options(&self) -> &AuthOptions {
        &self.options
    }

    /// Snapshot of the current session
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Receive every session transition
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().is_authenticated()
    }

    pub fn current_user(&self) -> Option<User> {
        self.state.borrow().current_user().cloned()
    }

    /// Decide whether a protected surface may be shown
    pub fn authorize(&self, required_role: Option<&str>) -> Access {
        self.state.borrow().authorize(required_role)
    }

    /// Restore the persisted session at startup.
    ///
    /// Never fails: any error, including a timeout, leaves an anonymous
    /// session and an empty token store.
    pub async fn restore(&self) {
        self.update(|s| {
            s.loading = true;
            s.last_error = None;
        });

        let result = match tokio::time::timeout(self.options.restore_timeout, self.load_session())
            .await
        {
            Ok(result) => result,
            Err(_) => Err(AuthError::Timeout),
        };

        match result {
            Ok(true) => info!("Session restored"),
            Ok(false) => debug!("No persisted session to restore"),
            Err(err) => {
                warn!("Session restore failed, continuing anonymously: {}", err);
                self.clear_session().await;
            }
        }

        self.update(|s| s.loading = false);
    }

    async fn load_session(&self) -> Result<bool, AuthError> {
        let Some(tokens) = self.store.load().await? else {
            return Ok(false);
        };

        self.update(|s| s.tokens = Some(tokens));
        self.fetch_current_user().await?;
        Ok(true)
    }

    /// Create an account. The session is not touched.
    pub async fn register(
        &self,
        email: &str,
        username: &str,
        password: &str,
    ) -> Result<Value, AuthError> {
        self.begin_operation();
        let result = self.request_register(email, username, password).await;
        self.track(result)
    }

    async fn request_register(
        &self,
        email: &str,
        username: &str,
        password: &str,
    ) -> Result<Value, AuthError> {
        let request = ApiRequest::post("/auth/register").json(&RegisterRequest {
            email,
            username,
            password,
        })?;
        let response = self.fetch.send(&request, None).await?;

        fetch::read_json(response, REGISTRATION_FAILED)
            .await
            .map_err(|e| e.into_operation_error(AuthError::Registration))
    }

    /// メール・パスワードでログイン
    ///
    /// When the account has a second factor the challenge is returned and no
    /// tokens are stored; finish with [`SessionManager::verify_mfa`].
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginOutcome, AuthError> {
        self.begin_operation();
        let result = self.password_login(email, password).await;
        self.track(result)
    }

    async fn password_login(&self, email: &str, password: &str) -> Result<LoginOutcome, AuthError> {
        let request = ApiRequest::post("/auth/login").json(&LoginRequest { email, password })?;
        let response = self.fetch.send(&request, None).await?;

        let body: Value = fetch::read_json(response, LOGIN_FAILED)
            .await
            .map_err(|e| e.into_operation_error(AuthError::Authentication))?;

        if body
            .get("mfa_required")
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            let challenge: MfaChallenge = serde_json::from_value(body)?;
            info!("Login for user {} needs a second factor", challenge.id);
            return Ok(LoginOutcome::MfaRequired(challenge));
        }

        let login: LoginResponse = serde_json::from_value(body)?;
        self.establish_session(&login).await?;
        Ok(LoginOutcome::Authenticated(login))
    }

    /// MFAチャレンジの検証
    ///
    /// The code is checked by the service; success here is the only proof
    /// that it was valid.
    pub async fn verify_mfa(&self, user_id: &str, code: &str) -> Result<LoginResponse, AuthError> {
        self.begin_operation();
        let result = self.mfa_verify(user_id, code).await;
        self.track(result)
    }

    async fn mfa_verify(&self, user_id: &str, code: &str) -> Result<LoginResponse, AuthError> {
        let request = ApiRequest::post("/auth/mfa/verify").json(&MfaVerifyRequest { user_id, code })?;
        let response = self.fetch.send(&request, None).await?;

        let login: LoginResponse = fetch::read_json(response, MFA_VERIFICATION_FAILED)
            .await
            .map_err(|e| e.into_operation_error(AuthError::Mfa))?;

        self.establish_session(&login).await?;
        Ok(login)
    }

    /// Persist freshly issued tokens and load the profile they belong to.
    ///
    /// If the profile cannot be loaded the previous session is put back.
    async fn establish_session(&self, login: &LoginResponse) -> Result<User, AuthError> {
        let previous = self.state();
        let tokens = StoredTokens::new(login.access_token.clone(), login.refresh_token.clone());
        self.persist_tokens(tokens).await?;

        match self.fetch_current_user().await {
            Ok(user) => {
                info!("Authenticated as {}", user.id);
                Ok(user)
            }
            Err(err) => {
                warn!("Tokens were issued but the profile could not be loaded: {}", err);
                self.rollback(previous).await;
                Err(err)
            }
        }
    }

    async fn rollback(&self, previous: SessionState) {
        let _guard = self.session_lock.lock().await;
        let Some(tokens) = previous.tokens else {
            self.clear_locked().await;
            return;
        };

        if let Err(err) = self.store.save(&tokens).await {
            error!("Failed to restore previous tokens: {}", err);
            self.clear_locked().await;
            return;
        }
        self.update(|s| {
            s.tokens = Some(tokens);
            s.user = previous.user;
        });
    }

    /// Enable a second factor for the signed-in user
    pub async fn setup_mfa(&self, method: MfaMethod) -> Result<MfaSetupResponse, AuthError> {
        self.begin_operation();
        let result = self.mfa_setup(method).await;
        self.track(result)
    }

    async fn mfa_setup(&self, method: MfaMethod) -> Result<MfaSetupResponse, AuthError> {
        let request = ApiRequest::post("/auth/mfa/setup").json(&MfaSetupRequest { method })?;
        let setup: MfaSetupResponse = self
            .execute_with(&request, MFA_SETUP_FAILED)
            .await
            .map_err(|e| e.into_operation_error(AuthError::Mfa))?;

        // mfa_enabled changed on the server
        self.fetch_current_user().await?;
        Ok(setup)
    }

    /// Remove the second factor of the signed-in user
    pub async fn disable_mfa(&self) -> Result<Value, AuthError> {
        self.begin_operation();
        let result = self.mfa_disable().await;
        self.track(result)
    }

    async fn mfa_disable(&self) -> Result<Value, AuthError> {
        let request = ApiRequest::post("/auth/mfa/disable").json(&serde_json::json!({}))?;
        let body: Value = self
            .execute_with(&request, MFA_DISABLE_FAILED)
            .await
            .map_err(|e| e.into_operation_error(AuthError::Mfa))?;

        self.fetch_current_user().await?;
        Ok(body)
    }

    /// セッションをリフレッシュ
    ///
    /// Exchanges the refresh token for a new access token. Any failure ends
    /// the session it was started for. Callers that arrive while
    /// another refresh is running share its result.
    pub async fn refresh(&self) -> Result<(), AuthError> {
        self.begin_operation();
        let seen = self.access_token();
        let result = {
            let _guard = self.refresh_lock.lock().await;
            match (seen, self.access_token()) {
                (Some(seen), Some(current)) if seen != current => {
                    debug!("Access token was renewed by a concurrent refresh");
                    Ok(())
                }
                _ => self.refresh_locked().await,
            }
        };
        self.track(result)
    }

    /// Refresh on behalf of a call that was made with `stale`.
    ///
    /// Callers that queued behind another refresh find the token already
    /// replaced and reuse it instead of refreshing again.
    async fn refresh_if_stale(&self, stale: &str) -> Result<(), AuthError> {
        let _guard = self.refresh_lock.lock().await;

        match self.access_token() {
            Some(current) if current != stale => {
                debug!("Access token was renewed by a concurrent refresh");
                Ok(())
            }
            Some(_) => self.refresh_locked().await,
            None => Err(AuthError::SessionExpired(SESSION_EXPIRED.to_string())),
        }
    }

    /// Caller must hold `refresh_lock`
    async fn refresh_locked(&self) -> Result<(), AuthError> {
        let refresh_token = self.state.borrow().refresh_token().map(str::to_string);
        let Some(refresh_token) = refresh_token else {
            warn!("Refresh requested without a refresh token, ending session");
            self.clear_session().await;
            return Err(AuthError::NoRefreshToken);
        };

        debug!("Refreshing access token");
        match self.renew(&refresh_token).await {
            Ok(true) => {
                info!("Access token refreshed");
                Ok(())
            }
            Ok(false) => {
                info!("Session changed during refresh, discarding renewed tokens");
                Err(AuthError::SessionExpired(SESSION_EXPIRED.to_string()))
            }
            Err(err) => {
                warn!("Token refresh failed, ending session: {}", err);
                self.clear_session_if(|s| s.refresh_token() == Some(refresh_token.as_str()))
                    .await;
                Err(err)
            }
        }
    }

    /// Returns false when the session no longer holds `refresh_token` by the
    /// time the service answers. Nothing is persisted in that case.
    async fn renew(&self, refresh_token: &str) -> Result<bool, AuthError> {
        let request = ApiRequest::post("/auth/refresh").json(&RefreshRequest { refresh_token })?;
        let response = self.fetch.send(&request, None).await?;

        if !response.status().is_success() {
            let (_, message) = fetch::rejection(response, SESSION_EXPIRED).await;
            return Err(AuthError::SessionExpired(message));
        }

        let renewed: RefreshResponse = response.json().await?;
        // the refresh token is reused unless the service rotates it
        let tokens = StoredTokens::new(
            renewed.access_token,
            renewed.refresh_token.or_else(|| Some(refresh_token.to_string())),
        );
        self.persist_renewed(refresh_token, tokens).await
    }

    /// Clear the session locally. Idempotent and infallible.
    pub async fn logout(&self) {
        self.clear_session().await;
        info!("Logged out");
    }

    /// Tell the service the session is over, then [`SessionManager::logout`].
    ///
    /// The remote call is best effort; its failure does not keep the local
    /// session alive.
    pub async fn sign_out(&self) {
        if self.options.revoke_on_sign_out {
            if let Some(token) = self.access_token() {
                let request = ApiRequest::post("/auth/logout");
                match self.fetch.send(&request, Some(&token)).await {
                    Ok(response) if response.status().is_success() => {
                        debug!("Session revoked on the server")
                    }
                    Ok(response) => debug!("Server refused sign-out: {}", response.status()),
                    Err(err) => debug!("Sign-out request failed: {}", err),
                }
            }
        }
        self.logout().await;
    }

    /// Send an authenticated request and parse its JSON body.
    ///
    /// A 401 triggers one refresh and one retry with the new token. If the
    /// refresh fails, or the retry is rejected again, the session ends and
    /// [`AuthError::SessionExpired`] is returned. Other failures are returned
    /// as [`AuthError::Api`].
    pub async fn execute<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, AuthError> {
        self.execute_with(&request, REQUEST_FAILED).await
    }

    /// Like [`SessionManager::execute`] but hands back the successful response
    pub async fn execute_raw(&self, request: ApiRequest) -> Result<Response, AuthError> {
        self.send_authorized(&request, REQUEST_FAILED).await
    }

    async fn execute_with<T: DeserializeOwned>(
        &self,
        request: &ApiRequest,
        default_message: &str,
    ) -> Result<T, AuthError> {
        let response = self.send_authorized(request, default_message).await?;
        fetch::read_json(response, default_message).await
    }

    async fn send_authorized(
        &self,
        request: &ApiRequest,
        default_message: &str,
    ) -> Result<Response, AuthError> {
        let token = self.access_token().ok_or(AuthError::NotAuthenticated)?;
        let token = self.refresh_if_expiring(token).await?;

        let response = self.fetch.send(request, Some(&token)).await?;
        if !fetch::is_unauthorized(&response) {
            return accept(response, default_message).await;
        }

        let (_, message) = fetch::rejection(response, SESSION_EXPIRED).await;
        debug!(
            "{} {} was rejected with 401, refreshing",
            request.method(),
            request.path()
        );

        if let Err(err) = self.refresh_if_stale(&token).await {
            debug!("Refresh after 401 failed: {}", err);
            self.clear_session_if(|s| s.access_token() == Some(token.as_str()))
                .await;
            return Err(AuthError::SessionExpired(message));
        }

        let token = self
            .access_token()
            .ok_or_else(|| AuthError::SessionExpired(message.clone()))?;
        let retry = self.fetch.send(request, Some(&token)).await?;

        if fetch::is_unauthorized(&retry) {
            let (_, message) = fetch::rejection(retry, SESSION_EXPIRED).await;
            warn!("Request rejected again after refresh, ending session");
            self.clear_session_if(|s| s.access_token() == Some(token.as_str()))
                .await;
            return Err(AuthError::SessionExpired(message));
        }
        accept(retry, default_message).await
    }

    /// Refresh ahead of time when the access token is a JWT about to expire
    async fn refresh_if_expiring(&self, token: String) -> Result<String, AuthError> {
        if !self.options.auto_refresh_token || self.state.borrow().refresh_token().is_none() {
            return Ok(token);
        }
        let Some(expires_at) = token_expires_at(&token) else {
            return Ok(token);
        };

        let leeway = chrono::Duration::from_std(self.options.refresh_leeway)
            .unwrap_or_else(|_| chrono::Duration::zero());
        if expires_at - leeway > Utc::now() {
            return Ok(token);
        }

        debug!("Access token expires at {}, refreshing first", expires_at);
        if let Err(err) = self.refresh_if_stale(&token).await {
            debug!("Proactive refresh failed: {}", err);
            self.clear_session_if(|s| s.access_token() == Some(token.as_str()))
                .await;
            return Err(AuthError::SessionExpired(err.message()));
        }
        self.access_token()
            .ok_or_else(|| AuthError::SessionExpired(SESSION_EXPIRED.to_string()))
    }

    /// Load the profile for the current access token
    pub(crate) async fn fetch_current_user(&self) -> Result<User, AuthError> {
        let user: User = self
            .execute_with(&ApiRequest::get("/auth/user"), USER_FETCH_FAILED)
            .await?;

        // a concurrent logout wins over a late profile
        self.update(|s| {
            if s.tokens.is_some() {
                s.user = Some(user.clone());
            }
        });
        Ok(user)
    }

    /// Persist first; memory only changes once the store has the tokens
    async fn persist_tokens(&self, tokens: StoredTokens) -> Result<(), AuthError> {
        let _guard = self.session_lock.lock().await;
        self.store.save(&tokens).await?;
        self.update(|s| s.tokens = Some(tokens));
        Ok(())
    }

    /// Like `persist_tokens`, but only while the session still holds the
    /// refresh token that was exchanged. A logout or a new login in the
    /// meantime wins.
    async fn persist_renewed(
        &self,
        exchanged: &str,
        tokens: StoredTokens,
    ) -> Result<bool, AuthError> {
        let _guard = self.session_lock.lock().await;
        let current = self.state.borrow().refresh_token() == Some(exchanged);
        if !current {
            return Ok(false);
        }

        self.store.save(&tokens).await?;
        let mut applied = false;
        self.state.send_modify(|s| {
            if s.refresh_token() == Some(exchanged) {
                s.tokens = Some(tokens);
                applied = true;
            }
        });
        Ok(applied)
    }

    async fn clear_session(&self) {
        let _guard = self.session_lock.lock().await;
        self.clear_locked().await;
    }

    /// End the session only if it is still the one `still_current` expects
    async fn clear_session_if(&self, still_current: impl Fn(&SessionState) -> bool) {
        let _guard = self.session_lock.lock().await;
        let current = still_current(&*self.state.borrow());
        if current {
            self.clear_locked().await;
        } else {
            debug!("Session was replaced meanwhile, keeping it");
        }
    }

    /// Caller must hold `session_lock`
    async fn clear_locked(&self) {
        if let Err(err) = self.store.clear().await {
            error!("Failed to clear persisted tokens: {}", err);
        }
        self.update(SessionState::clear);
    }

    fn access_token(&self) -> Option<String> {
        self.state.borrow().access_token().map(str::to_string)
    }

    fn update(&self, modify: impl FnOnce(&mut SessionState)) {
        self.state.send_modify(modify);
    }

    fn begin_operation(&self) {
        self.update(|s| s.last_error = None);
    }

    fn track<T>(&self, result: Result<T, AuthError>) -> Result<T, AuthError> {
        if let Err(err) = &result {
            let message = err.message();
            self.update(|s| s.last_error = Some(message));
        }
        result
    }
}

async fn accept(response: Response, default_message: &str) -> Result<Response, AuthError> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(fetch::failure(response, default_message).await)
    }
}
