use std::fmt;
use std::str::FromStr;

use log::error;
use uuid::Uuid;

use crate::form::LoginForm;

pub struct AuthAttempt {
    user: String,
    pass: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionId(Uuid);

impl From<LoginForm> for AuthAttempt {
    fn from(form: LoginForm) -> Self {
        Self {
            user: form.username,
            pass: form.password,
        }
    }
}

impl AuthAttempt {
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Checks the attempted password against a stored bcrypt hash.
    /// A malformed hash counts as a mismatch.
    pub fn verify(&self, pwhash: &str) -> bool {
        bcrypt::verify(&self.pass, pwhash).unwrap_or_else(|e| {
            error!("couldn't verify password for {}: {e:?}", self.user);
            false
        })
    }
}

pub fn hash_password(pass: &str, cost: u32) -> Result<String, bcrypt::BcryptError> {
    bcrypt::hash(pass, cost)
}

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl FromStr for SessionId {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::try_parse(s).map(Self).map_err(|_| ())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "{}", self.0)
    }
}
