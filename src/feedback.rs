#[derive(Debug, Clone)]
#[cfg_attr(test, derive(PartialEq, Eq))]
#[derive(sqlx::FromRow)]
pub struct Feedback {
    pub id: i64,
    pub title: String,
    pub content: String,
    // NULL: orphaned, nobody may edit it
    pub username: Option<String>,
}

impl Feedback {
    pub fn is_owned_by(&self, username: &str) -> bool {
        self.username.as_deref() == Some(username)
    }
}
