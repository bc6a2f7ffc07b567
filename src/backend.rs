use std::future::Future;
use std::path::{Path, PathBuf};

use log::{error, info};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{query, query_as, Pool, Sqlite, Transaction};

use crate::feedback::Feedback;
use crate::user::{NewUser, User};

type Result<T> = std::result::Result<T, ()>;

pub struct Backend(pub Pool<Sqlite>);

#[derive(Debug)]
pub enum FindError {
    NotFound,
    Internal,
}

#[derive(Debug)]
pub enum InsertError {
    Taken(Taken),
    Internal,
}

/// Which unique column an insert collided with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Taken {
    Username,
    Email,
}

fn into_sql(path: &Path) -> PathBuf {
    path.join("feedbox.db")
}

impl Backend {
    pub async fn new(data_dir: &Path) -> std::result::Result<Self, sqlx::Error> {
        let db_path = into_sql(data_dir);

        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new().connect_with(options).await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        info!("Using {}", db_path.display());
        Ok(Self(pool))
    }
}

impl Backend {
    async fn transact<'t, T, R, F>(&self, transaction: T) -> Result<R>
    where
        T: FnOnce(Transaction<'t, Sqlite>) -> F,
        F: Future<Output = Result<(Transaction<'t, Sqlite>, R)>>,
    {
        let tx = self.0.begin().await.map_err(|e| {
            error!("error beginning transaction: {:?}", e);
        })?;

        let (tx, r) = transaction(tx).await?;

        tx.commit().await.map_err(|e| {
            error!("error committing transaction: {:?}", e);
        })?;

        Ok(r)
    }
}

fn unique_violation(e: &sqlx::Error) -> Option<Taken> {
    let sqlx::Error::Database(db_err) = e else {
        return None;
    };

    // SQLITE_CONSTRAINT_PRIMARYKEY, SQLITE_CONSTRAINT_UNIQUE
    match db_err.code().as_deref() {
        Some("1555") | Some("2067") => {}
        _ => return None,
    }

    if db_err.message().contains("users.email") {
        Some(Taken::Email)
    } else {
        Some(Taken::Username)
    }
}

impl Backend {
    pub async fn find_user(&self, username: &str) -> std::result::Result<User, FindError> {
        query_as::<_, User>(
            "
            SELECT username, pwhash, email, first_name, last_name, session_id
            FROM users
            WHERE username = ?
            ",
        )
        .bind(username)
        .fetch_one(&self.0)
        .await
        .map_err(|e| {
            if matches!(e, sqlx::Error::RowNotFound) {
                FindError::NotFound
            } else {
                error!("couldn't find user {username}: {e:?}");
                FindError::Internal
            }
        })
    }

    pub async fn insert_user(&self, user: &NewUser) -> std::result::Result<(), InsertError> {
        query(
            "
            INSERT INTO users
            (username, pwhash, email, first_name, last_name)
            VALUES
            (?, ?, ?, ?, ?) -- `session_id` <- NULL
            ",
        )
        .bind(&user.username)
        .bind(&user.pwhash)
        .bind(&user.email)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .execute(&self.0)
        .await
        .map(|_| ())
        .map_err(|e| match unique_violation(&e) {
            Some(taken) => {
                info!("can't register {}: {taken:?} taken", user.username);
                InsertError::Taken(taken)
            }
            None => {
                error!("error inserting user: {e:?}");
                InsertError::Internal
            }
        })
    }

    /// session_id: set to None to logout / make NULL
    pub async fn update_user(&self, username: &str, session_id: Option<&str>) -> bool {
        query(
            "
            UPDATE users
            SET session_id = ?
            WHERE username = ?
            ",
        )
        .bind(session_id)
        .bind(username)
        .execute(&self.0)
        .await
        .map_err(|e| {
            error!("update user: {e}");
            e
        })
        .is_ok()
    }

    pub async fn users_with_session(&self, session_id: &str) -> Result<Vec<User>> {
        query_as::<_, User>(
            "
            SELECT username, pwhash, email, first_name, last_name, session_id
            FROM users
            WHERE session_id = ?
            ",
        )
        .bind(session_id)
        .fetch_all(&self.0)
        .await
        .map_err(|e| {
            error!("couldn't query for session {session_id}: {e:?}");
        })
    }

    /// Removes the user and everything they own. Returns false if there was no such user.
    pub async fn delete_user(&self, username: &str) -> Result<bool> {
        let deleted = self
            .transact(|mut tx| async move {
                let feedback = query("DELETE FROM feedback WHERE username = ?")
                    .bind(username)
                    .execute(&mut tx)
                    .await
                    .map_err(|e| {
                        error!("error deleting feedback mid-transaction: {e:?}");
                    })?
                    .rows_affected();

                let users = query("DELETE FROM users WHERE username = ?")
                    .bind(username)
                    .execute(&mut tx)
                    .await
                    .map_err(|e| {
                        error!("error deleting user mid-transaction: {e:?}");
                    })?
                    .rows_affected();

                info!("deleted user {username}: {feedback} feedback removed");

                Ok((tx, users > 0))
            })
            .await?;

        Ok(deleted)
    }
}

impl Backend {
    pub async fn feedback_for_user(&self, username: &str) -> Result<Vec<Feedback>> {
        query_as::<_, Feedback>(
            "
            SELECT id, title, content, username
            FROM feedback
            WHERE username = ?
            ORDER BY id
            ",
        )
        .bind(username)
        .fetch_all(&self.0)
        .await
        .map_err(|e| {
            error!("error selecting feedback for {username}: {e:?}");
        })
    }

    pub async fn find_feedback(&self, id: i64) -> std::result::Result<Feedback, FindError> {
        query_as::<_, Feedback>(
            "
            SELECT id, title, content, username
            FROM feedback
            WHERE id = ?
            ",
        )
        .bind(id)
        .fetch_one(&self.0)
        .await
        .map_err(|e| {
            if matches!(e, sqlx::Error::RowNotFound) {
                FindError::NotFound
            } else {
                error!("couldn't find feedback {id}: {e:?}");
                FindError::Internal
            }
        })
    }

    pub async fn insert_feedback(&self, username: &str, title: &str, content: &str) -> Result<i64> {
        query(
            "
            INSERT INTO feedback
            (title, content, username)
            VALUES
            (?, ?, ?)
            ",
        )
        .bind(title)
        .bind(content)
        .bind(username)
        .execute(&self.0)
        .await
        .map(|done| done.last_insert_rowid())
        .map_err(|e| {
            error!("error inserting feedback: {e:?}");
        })
    }

    pub async fn update_feedback(&self, id: i64, title: &str, content: &str) -> Result<()> {
        query(
            "
            UPDATE feedback
            SET title = ?, content = ?
            WHERE id = ?
            ",
        )
        .bind(title)
        .bind(content)
        .bind(id)
        .execute(&self.0)
        .await
        .map(|_| ())
        .map_err(|e| {
            error!("error updating feedback {id}: {e:?}");
        })
    }

    pub async fn delete_feedback(&self, id: i64) -> Result<()> {
        query("DELETE FROM feedback WHERE id = ?")
            .bind(id)
            .execute(&self.0)
            .await
            .map(|_| ())
            .map_err(|e| {
                error!("error deleting feedback {id}: {e:?}");
            })
    }
}

#[cfg(test)]
pub mod test {
    use std::str::FromStr;

    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

    use super::*;

    pub async fn create_db() -> Backend {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .unwrap()
            .foreign_keys(true);

        // a single connection keeps the in-memory db alive and shared
        let db = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .unwrap();

        sqlx::migrate!("./migrations").run(&db).await.unwrap();

        Backend(db)
    }

    pub fn new_user(username: &str) -> NewUser {
        NewUser {
            username: username.into(),
            pwhash: "$2b$04$not.a.real.hash".into(),
            email: format!("{username}@example.com"),
            first_name: "First".into(),
            last_name: "Last".into(),
        }
    }

    #[tokio::test]
    async fn user_round_trip() {
        let backend = create_db().await;

        backend.insert_user(&new_user("alice")).await.unwrap();

        let user = backend.find_user("alice").await.unwrap();
        assert_eq!(user.email, "alice@example.com");
        assert_eq!(user.session_id, None);

        assert!(matches!(
            backend.find_user("bob").await,
            Err(FindError::NotFound)
        ));
    }

    #[tokio::test]
    async fn duplicate_username_or_email() {
        let backend = create_db().await;
        backend.insert_user(&new_user("alice")).await.unwrap();

        let same_name = NewUser {
            email: "other@example.com".into(),
            ..new_user("alice")
        };
        assert!(matches!(
            backend.insert_user(&same_name).await,
            Err(InsertError::Taken(Taken::Username))
        ));

        let same_email = NewUser {
            email: "alice@example.com".into(),
            ..new_user("bob")
        };
        assert!(matches!(
            backend.insert_user(&same_email).await,
            Err(InsertError::Taken(Taken::Email))
        ));
    }

    #[tokio::test]
    async fn sessions() {
        let backend = create_db().await;
        backend.insert_user(&new_user("alice")).await.unwrap();

        assert!(backend.update_user("alice", Some("s1")).await);
        let users = backend.users_with_session("s1").await.unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].username, "alice");

        assert!(backend.update_user("alice", None).await);
        assert!(backend.users_with_session("s1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn deleting_user_removes_their_feedback() {
        let backend = create_db().await;
        backend.insert_user(&new_user("alice")).await.unwrap();
        backend.insert_user(&new_user("bob")).await.unwrap();

        backend.insert_feedback("alice", "a1", "...").await.unwrap();
        backend.insert_feedback("alice", "a2", "...").await.unwrap();
        let kept = backend.insert_feedback("bob", "b1", "...").await.unwrap();

        assert!(backend.delete_user("alice").await.unwrap());
        assert!(!backend.delete_user("alice").await.unwrap());

        assert!(backend.feedback_for_user("alice").await.unwrap().is_empty());
        let remaining = backend.feedback_for_user("bob").await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, kept);
    }

    #[tokio::test]
    async fn cascade_applies_without_backend_help() {
        let backend = create_db().await;
        backend.insert_user(&new_user("alice")).await.unwrap();
        let id = backend.insert_feedback("alice", "t", "c").await.unwrap();

        query("DELETE FROM users WHERE username = 'alice'")
            .execute(&backend.0)
            .await
            .unwrap();

        assert!(matches!(
            backend.find_feedback(id).await,
            Err(FindError::NotFound)
        ));
    }

    #[tokio::test]
    async fn feedback_crud() {
        let backend = create_db().await;
        backend.insert_user(&new_user("alice")).await.unwrap();

        let id = backend.insert_feedback("alice", "title", "body").await.unwrap();
        let fb = backend.find_feedback(id).await.unwrap();
        assert_eq!(
            fb,
            Feedback {
                id,
                title: "title".into(),
                content: "body".into(),
                username: Some("alice".into()),
            }
        );

        backend.update_feedback(id, "new", "words").await.unwrap();
        let fb = backend.find_feedback(id).await.unwrap();
        assert_eq!((fb.title.as_str(), fb.content.as_str()), ("new", "words"));

        backend.delete_feedback(id).await.unwrap();
        assert!(matches!(
            backend.find_feedback(id).await,
            Err(FindError::NotFound)
        ));
    }
}
