use std::{result, str::FromStr, sync::Arc};

use log::{debug, error, info, trace};
use warp::http;

use crate::auth::{self, AuthAttempt, SessionId};
use crate::backend::{Backend, FindError, InsertError};
use crate::feedback::Feedback;
use crate::form::{FeedbackForm, RegisterForm};
use crate::user::{NewUser, User};

pub use crate::backend::Taken;

pub struct FeedBox {
    backend: Backend,
    hash_cost: u32,
    // checked against when the user doesn't exist, so both failures cost the same
    dummy_hash: String,
}

/// A request whose session resolved to a user.
///
/// `USER_MATCH` is only true once the session user has been checked against
/// the owner of whatever is about to be changed.
pub struct FeedBoxAuthed<const USER_MATCH: bool = false> {
    sync: Arc<FeedBox>,
    session_id: SessionId,
    username: String,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Error {
    Internal,
    Unauthorized,
    Forbidden,
    NotFound,
    Taken(Taken),
}

pub type Result<T> = result::Result<T, Error>;

impl From<Error> for http::StatusCode {
    fn from(e: Error) -> Self {
        match e {
            Error::Internal => http::StatusCode::INTERNAL_SERVER_ERROR,
            Error::Unauthorized => http::StatusCode::UNAUTHORIZED,
            Error::Forbidden => http::StatusCode::FORBIDDEN,
            Error::NotFound => http::StatusCode::NOT_FOUND,
            Error::Taken(_) => http::StatusCode::CONFLICT,
        }
    }
}

impl warp::reject::Reject for Error {}

impl From<FindError> for Error {
    fn from(e: FindError) -> Self {
        match e {
            FindError::NotFound => Error::NotFound,
            FindError::Internal => Error::Internal,
        }
    }
}

impl FeedBox {
    pub fn new(backend: Backend, hash_cost: u32) -> result::Result<Self, bcrypt::BcryptError> {
        let dummy_hash = auth::hash_password("", hash_cost)?;

        Ok(Self {
            backend,
            hash_cost,
            dummy_hash,
        })
    }

    pub async fn register(self: &Arc<Self>, form: RegisterForm) -> Result<FeedBoxAuthed<true>> {
        let RegisterForm {
            username,
            password,
            email,
            first_name,
            last_name,
        } = form;

        let cost = self.hash_cost;
        let pwhash = tokio::task::spawn_blocking(move || auth::hash_password(&password, cost))
            .await
            .map_err(|e| {
                error!("password hashing task failed: {e:?}");
                Error::Internal
            })?
            .map_err(|e| {
                error!("couldn't hash password for {username}: {e:?}");
                Error::Internal
            })?;

        let user = NewUser {
            username,
            pwhash,
            email,
            first_name,
            last_name,
        };

        self.backend.insert_user(&user).await.map_err(|e| match e {
            InsertError::Taken(taken) => Error::Taken(taken),
            InsertError::Internal => Error::Internal,
        })?;

        info!("{} registered", user.username);

        self.start_session(user.username, None).await
    }

    pub async fn login(self: &Arc<Self>, auth_attempt: AuthAttempt) -> Result<(FeedBoxAuthed<true>, User)> {
        let username = auth_attempt.user().to_string();

        let user = match self.backend.find_user(&username).await {
            Ok(user) => Some(user),
            Err(FindError::NotFound) => None,
            Err(e) => {
                error!("couldn't authenticate user {}: {e:?}", username);
                return Err(Error::Internal);
            }
        };

        let pwhash = user
            .as_ref()
            .map_or_else(|| self.dummy_hash.clone(), |u| u.pwhash.clone());

        let verified = tokio::task::spawn_blocking(move || auth_attempt.verify(&pwhash))
            .await
            .map_err(|e| {
                error!("password check task failed: {e:?}");
                Error::Internal
            })?;

        let user = match user {
            Some(user) if verified => user,
            Some(_) => {
                error!("wrong password for user {}", username);
                return Err(Error::Unauthorized);
            }
            None => {
                error!("rejecting non-existant user {}", username);
                return Err(Error::Unauthorized);
            }
        };

        let db_session_id = match user.session_id {
            Some(ref id) => {
                let session_id = SessionId::from_str(id).map_err(|()| {
                    error!("invalid stored session_id: {:?}", user.session_id);
                    Error::Internal
                })?;
                Some(session_id)
            }
            None => None,
        };

        let authed = self.start_session(user.username.clone(), db_session_id).await?;
        Ok((authed, user))
    }

    async fn start_session(
        self: &Arc<Self>,
        username: String,
        existing: Option<SessionId>,
    ) -> Result<FeedBoxAuthed<true>> {
        let session_id = match existing {
            Some(id) => {
                // another browser is already logged in, share its session
                info!("{username} login: reusing session");
                id
            }
            None => {
                let session_id = SessionId::new();

                if !self
                    .backend
                    .update_user(&username, Some(&session_id.to_string()))
                    .await
                {
                    error!("couldn't login user {}", username);
                    return Err(Error::Internal);
                }

                info!("{username} login: new session created");
                session_id
            }
        };

        Ok(FeedBoxAuthed {
            sync: Arc::clone(self),
            session_id,
            username,
        })
    }

    pub async fn authenticate(self: &Arc<Self>, session_id: SessionId) -> Result<FeedBoxAuthed> {
        let session_str = session_id.to_string();

        let users = self
            .backend
            .users_with_session(&session_str)
            .await
            .map_err(|()| Error::Internal)?;

        match &users[..] {
            [] => {
                debug!("no user found for session {session_id}");
                Err(Error::Unauthorized)
            }
            [user] => {
                trace!("found user {} by session", user.username);
                Ok(FeedBoxAuthed {
                    sync: Arc::clone(self),
                    session_id,
                    username: user.username.clone(),
                })
            }
            _ => {
                error!("multiple users found for session {session_id}");
                Err(Error::Internal)
            }
        }
    }
}

impl<const USER_MATCH: bool> FeedBoxAuthed<USER_MATCH> {
    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub async fn find_user(&self, username: &str) -> Result<User> {
        self.sync.backend.find_user(username).await.map_err(|e| {
            debug!("{} looking up {username}: {e:?}", self.username);
            e.into()
        })
    }

    /// Any logged-in user may look at anyone's page.
    pub async fn user_page(&self, username: &str) -> Result<(User, Vec<Feedback>)> {
        let user = self.find_user(username).await?;

        let feedback = self
            .sync
            .backend
            .feedback_for_user(username)
            .await
            .map_err(|()| Error::Internal)?;

        trace!("{} viewing {username}, {} feedback", self.username, feedback.len());

        Ok((user, feedback))
    }

    pub async fn logout(&self) -> Result<()> {
        let username = &self.username;
        info!("{username} logout");

        self.sync
            .backend
            .update_user(username, None)
            .await
            .then_some(())
            .ok_or(Error::Internal)
    }
}

impl FeedBoxAuthed {
    pub fn with_user(self, username: &str) -> Result<FeedBoxAuthed<true>> {
        if username == self.username {
            Ok(FeedBoxAuthed {
                sync: self.sync,
                session_id: self.session_id,
                username: self.username,
            })
        } else {
            info!(
                "{} isn't {username}, refusing to act on their behalf",
                self.username,
            );
            Err(Error::Forbidden)
        }
    }

    /// Loads feedback for modification, which only its owner may do.
    pub async fn feedback(self, id: i64) -> Result<(FeedBoxAuthed<true>, Feedback)> {
        let feedback = self.sync.backend.find_feedback(id).await?;

        let owner = match feedback.username.as_deref() {
            Some(owner) => self.with_user(owner)?,
            None => {
                info!("{} tried to modify orphaned feedback {id}", self.username);
                return Err(Error::Forbidden);
            }
        };

        Ok((owner, feedback))
    }
}

impl FeedBoxAuthed<true> {
    pub async fn delete_account(self) -> Result<()> {
        let username = &self.username;

        match self.sync.backend.delete_user(username).await {
            Ok(true) => {
                info!("{username} deleted their account");
                Ok(())
            }
            Ok(false) => Err(Error::NotFound),
            Err(()) => Err(Error::Internal),
        }
    }

    pub async fn add_feedback(&self, form: &FeedbackForm) -> Result<i64> {
        let username = &self.username;

        let id = self
            .sync
            .backend
            .insert_feedback(username, &form.title, &form.content)
            .await
            .map_err(|()| Error::Internal)?;

        info!("{username} added feedback {id}");
        Ok(id)
    }

    pub async fn update_feedback(&self, feedback: &Feedback, form: &FeedbackForm) -> Result<()> {
        debug_assert!(feedback.is_owned_by(&self.username));

        self.sync
            .backend
            .update_feedback(feedback.id, &form.title, &form.content)
            .await
            .map_err(|()| Error::Internal)?;

        info!("{} updated feedback {}", self.username, feedback.id);
        Ok(())
    }

    pub async fn delete_feedback(&self, feedback: Feedback) -> Result<()> {
        debug_assert!(feedback.is_owned_by(&self.username));

        self.sync
            .backend
            .delete_feedback(feedback.id)
            .await
            .map_err(|()| Error::Internal)?;

        info!("{} deleted feedback {}", self.username, feedback.id);
        Ok(())
    }
}

#[cfg(test)]
pub mod test {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use crate::backend;
    use crate::form::LoginForm;

    pub async fn create_feedbox() -> Arc<FeedBox> {
        let db = backend::test::create_db().await;
        Arc::new(FeedBox::new(db, 4).unwrap())
    }

    fn registration(username: &str, password: &str) -> RegisterForm {
        RegisterForm {
            username: username.into(),
            password: password.into(),
            email: format!("{username}@example.com"),
            first_name: "First".into(),
            last_name: "Last".into(),
        }
    }

    fn attempt(username: &str, password: &str) -> AuthAttempt {
        LoginForm {
            username: username.into(),
            password: password.into(),
        }
        .into()
    }

    #[tokio::test]
    async fn register_then_login() {
        let feedbox = create_feedbox().await;

        let registered = feedbox.register(registration("alice", "pw")).await.unwrap();
        assert_eq!(registered.username(), "alice");

        let (authed, user) = feedbox.login(attempt("alice", "pw")).await.unwrap();
        assert_eq!(user.first_name, "First");
        assert_ne!(user.pwhash, "pw");
        // second login shares the session made at registration
        assert_eq!(authed.session_id(), registered.session_id());

        assert_eq!(
            feedbox.login(attempt("alice", "wrong")).await.err(),
            Some(Error::Unauthorized)
        );
        assert_eq!(
            feedbox.login(attempt("nobody", "pw")).await.err(),
            Some(Error::Unauthorized)
        );
    }

    #[tokio::test]
    async fn unknown_users_pay_for_a_hash_too() {
        assert!(FeedBox::new(backend::test::create_db().await, 3).is_err());

        let feedbox = create_feedbox().await;
        assert!(feedbox.dummy_hash.starts_with("$2b$04$"));
        assert!(bcrypt::verify("", &feedbox.dummy_hash).unwrap());

        // an empty password against the dummy hash still isn't a login
        assert_eq!(
            feedbox.login(attempt("nobody", "")).await.err(),
            Some(Error::Unauthorized)
        );
    }

    #[tokio::test]
    async fn hashing_leaves_the_runtime_free() {
        let db = backend::test::create_db().await;
        let feedbox = Arc::new(FeedBox::new(db, 10).unwrap());

        let ticks = Arc::new(AtomicUsize::new(0));
        let ticker = tokio::spawn({
            let ticks = Arc::clone(&ticks);
            async move {
                loop {
                    ticks.fetch_add(1, Ordering::Relaxed);
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
            }
        });

        feedbox.register(registration("alice", "pw")).await.unwrap();
        feedbox.login(attempt("alice", "pw")).await.unwrap();
        ticker.abort();

        // two cost-10 hashes take tens of milliseconds; the ticker ran meanwhile
        assert!(ticks.load(Ordering::Relaxed) >= 10);
    }

    #[tokio::test]
    async fn register_rejects_duplicates() {
        let feedbox = create_feedbox().await;
        feedbox.register(registration("alice", "pw")).await.unwrap();

        let err = feedbox.register(registration("alice", "pw")).await.err();
        assert_eq!(err, Some(Error::Taken(Taken::Username)));

        let mut form = registration("bob", "pw");
        form.email = "alice@example.com".into();
        let err = feedbox.register(form).await.err();
        assert_eq!(err, Some(Error::Taken(Taken::Email)));
    }

    #[tokio::test]
    async fn sessions_resolve_until_logout() {
        let feedbox = create_feedbox().await;
        let registered = feedbox.register(registration("alice", "pw")).await.unwrap();
        let session = *registered.session_id();

        let authed = feedbox.authenticate(session).await.unwrap();
        assert_eq!(authed.username(), "alice");

        authed.logout().await.unwrap();
        assert_eq!(
            feedbox.authenticate(session).await.err(),
            Some(Error::Unauthorized)
        );

        // logging in again mints a fresh session
        let (authed, _) = feedbox.login(attempt("alice", "pw")).await.unwrap();
        assert_ne!(*authed.session_id(), session);
    }

    #[tokio::test]
    async fn only_owner_may_touch_feedback() {
        let feedbox = create_feedbox().await;
        let alice = feedbox.register(registration("alice", "pw")).await.unwrap();
        let bob = feedbox.register(registration("bob", "pw")).await.unwrap();
        let alice_session = *alice.session_id();
        let bob_session = *bob.session_id();

        let form = FeedbackForm {
            title: "hello".into(),
            content: "world".into(),
        };
        let id = alice.add_feedback(&form).await.unwrap();

        let bob = feedbox.authenticate(bob_session).await.unwrap();
        assert_eq!(bob.feedback(id).await.err(), Some(Error::Forbidden));

        let alice = feedbox.authenticate(alice_session).await.unwrap();
        assert_eq!(alice.with_user("bob").err(), Some(Error::Forbidden));

        let alice = feedbox.authenticate(alice_session).await.unwrap();
        let (owner, fb) = alice.feedback(id).await.unwrap();
        assert_eq!(owner.username(), "alice");
        assert_eq!(fb.title, "hello");

        owner.delete_feedback(fb).await.unwrap();

        let alice = feedbox.authenticate(alice_session).await.unwrap();
        assert_eq!(alice.feedback(id).await.err(), Some(Error::NotFound));
    }

    #[tokio::test]
    async fn orphaned_feedback_belongs_to_nobody() {
        let feedbox = create_feedbox().await;
        let alice = feedbox.register(registration("alice", "pw")).await.unwrap();
        let session = *alice.session_id();

        sqlx::query("INSERT INTO feedback (id, title, content, username) VALUES (7, 't', 'c', NULL)")
            .execute(&feedbox.backend.0)
            .await
            .unwrap();

        let alice = feedbox.authenticate(session).await.unwrap();
        assert_eq!(alice.feedback(7).await.err(), Some(Error::Forbidden));
    }

    #[tokio::test]
    async fn deleting_account_takes_feedback_with_it() {
        let feedbox = create_feedbox().await;
        let alice = feedbox.register(registration("alice", "pw")).await.unwrap();
        let session = *alice.session_id();

        let form = FeedbackForm {
            title: "t".into(),
            content: "c".into(),
        };
        let id = alice.add_feedback(&form).await.unwrap();

        alice.delete_account().await.unwrap();

        assert_eq!(
            feedbox.authenticate(session).await.err(),
            Some(Error::Unauthorized)
        );
        assert!(matches!(
            feedbox.backend.find_feedback(id).await,
            Err(FindError::NotFound)
        ));
    }
}
