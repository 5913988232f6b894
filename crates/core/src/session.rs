//! The signed-in session and its persistence.

mod storage;

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use sophia_backend::{
    AuthBundle, Identity, LoginOutcome, LoginRequest, OtpChallenge,
    OtpRequest, User,
};

use crate::{Error, Gateway};
pub use storage::{FileStorage, MemoryStorage, Storage};

/// The storage key of the persisted user record.
pub const USER_KEY: &str = "user";
/// The storage key of the persisted credential bundle.
pub const AUTH_KEY: &str = "auth";

/// Holds the signed-in identity and keeps it in sync with the storage and
/// the gateway credential.
///
/// At most one identity is installed at a time. Failed logins never install
/// a partial identity.
#[derive(Debug)]
pub struct SessionStore {
    gateway: Gateway,
    storage: Arc<dyn Storage>,
    identity: Option<Identity>,
    pending_challenge: Option<OtpChallenge>,
}

impl SessionStore {
    /// Creates an empty session store.
    pub fn new<S: Storage + 'static>(gateway: Gateway, storage: S) -> Self {
        Self {
            gateway,
            storage: Arc::new(storage),
            identity: None,
            pending_challenge: None,
        }
    }

    /// Installs the persisted identity, if both entries are present and
    /// well-formed. Returns whether an identity was installed.
    ///
    /// Unreadable or malformed entries are treated as absent.
    pub fn restore(&mut self) -> bool {
        let user = self.load_entry::<User>(USER_KEY);
        let auth = self.load_entry::<AuthBundle>(AUTH_KEY);
        let (Some(user), Some(auth)) = (user, auth) else {
            debug!("no session to restore");
            return false;
        };
        debug!("restored session of {:?}", user.username);
        self.install(Identity { user, auth }, false);
        true
    }

    /// Logs in with email and password.
    ///
    /// When the server asks for a one-time code, nothing is installed and
    /// the challenge is remembered until [`SessionStore::verify_otp`]
    /// completes it.
    pub async fn login(
        &mut self,
        email: &str,
        password: &str,
    ) -> Result<LoginOutcome, Error> {
        let req = LoginRequest {
            email: email.to_owned(),
            password: password.to_owned(),
        };
        let outcome = self
            .gateway
            .login(&req)
            .await
            .map_err(|err| err.with_fallback("Login failed"))?;
        match &outcome {
            LoginOutcome::Authenticated(identity) => {
                self.install(identity.clone(), true);
            }
            LoginOutcome::OtpRequired(challenge) => {
                debug!("one-time code required");
                self.pending_challenge = Some(challenge.clone());
            }
        }
        Ok(outcome)
    }

    /// Completes a login with the one-time code sent to `email`.
    pub async fn verify_otp(
        &mut self,
        email: &str,
        otp: &str,
    ) -> Result<Identity, Error> {
        let req = OtpRequest {
            email: email.to_owned(),
            otp: otp.to_owned(),
        };
        let identity = self
            .gateway
            .verify_otp(&req)
            .await
            .map_err(|err| err.with_fallback("OTP verification failed"))?;
        self.install(identity.clone(), true);
        Ok(identity)
    }

    /// Forgets the identity, the persisted entries, the pending challenge
    /// and the gateway credential.
    pub fn logout(&mut self) {
        self.identity = None;
        self.pending_challenge = None;
        self.gateway.set_credential(None);
        for key in [USER_KEY, AUTH_KEY] {
            if let Err(err) = self.storage.remove(key) {
                warn!("failed to remove `{key}`: {err}");
            }
        }
        debug!("logged out");
    }

    /// Returns the installed identity.
    #[inline]
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// Returns whether an identity is installed.
    #[inline]
    pub fn is_logged_in(&self) -> bool {
        self.identity.is_some()
    }

    /// Returns the challenge of a login that is waiting for its code.
    #[inline]
    pub fn pending_challenge(&self) -> Option<&OtpChallenge> {
        self.pending_challenge.as_ref()
    }

    /// Returns the gateway the session authenticates.
    #[inline]
    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    fn install(&mut self, identity: Identity, persist: bool) {
        self.gateway.set_credential(Some(&identity.auth.access_token));
        if persist
            && self.save_entry(USER_KEY, &identity.user)
            && !self.save_entry(AUTH_KEY, &identity.auth)
        {
            // A user without its credential would outlive this session.
            if let Err(err) = self.storage.remove(USER_KEY) {
                warn!("failed to remove `{USER_KEY}`: {err}");
            }
        }
        self.pending_challenge = None;
        self.identity = Some(identity);
    }

    fn load_entry<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.storage.load(key) {
            Ok(raw) => raw?,
            Err(err) => {
                warn!("failed to load `{key}`: {err}");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!("ignoring malformed `{key}`: {err}");
                None
            }
        }
    }

    /// Returns whether the entry was written.
    fn save_entry<T: Serialize>(&self, key: &str, value: &T) -> bool {
        let result = serde_json::to_string(value)
            .map_err(std::io::Error::other)
            .and_then(|raw| self.storage.save(key, &raw));
        if let Err(err) = &result {
            // The identity stays installed for this process.
            warn!("failed to persist `{key}`: {err}");
        }
        result.is_ok()
    }
}
