#[derive(Debug, Clone)]
#[derive(sqlx::FromRow)]
pub struct User {
    pub username: String,
    pub pwhash: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub session_id: Option<String>,
}

/// A user ready for insertion, password already hashed.
#[derive(Debug)]
pub struct NewUser {
    pub username: String,
    pub pwhash: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

impl User {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}
