use serde::Deserialize;

// column widths from the schema
const USERNAME_MAX: usize = 20;
const EMAIL_MAX: usize = 50;
const NAME_MAX: usize = 30;
const TITLE_MAX: usize = 100;

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct RegisterForm {
    pub username: String,
    pub password: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct FeedbackForm {
    pub title: String,
    pub content: String,
}

#[derive(Debug, Default)]
pub struct FormErrors(Vec<(&'static str, String)>);

impl FormErrors {
    pub fn add(&mut self, field: &'static str, message: impl Into<String>) {
        self.0.push((field, message.into()));
    }

    pub fn single(field: &'static str, message: impl Into<String>) -> Self {
        let mut errors = Self::default();
        errors.add(field, message);
        errors
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn for_field<'a>(&'a self, field: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.0
            .iter()
            .filter(move |(f, _)| *f == field)
            .map(|(_, msg)| msg.as_str())
    }

    fn required(&mut self, field: &'static str, value: &str) -> bool {
        if value.trim().is_empty() {
            self.add(field, "This field is required.");
            false
        } else {
            true
        }
    }

    fn max_len(&mut self, field: &'static str, value: &str, max: usize) {
        if value.chars().count() > max {
            self.add(field, format!("Must be at most {max} characters."));
        }
    }

    fn into_result(self) -> Result<(), FormErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl RegisterForm {
    pub fn validate(&self) -> Result<(), FormErrors> {
        let mut errors = FormErrors::default();

        if errors.required("username", &self.username) {
            errors.max_len("username", &self.username, USERNAME_MAX);

            // usernames end up in urls, and must never be a `.` or `..` segment
            let mut chars = self.username.chars();
            let url_safe = chars.next().is_some_and(|c| c.is_ascii_alphanumeric())
                && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
            if !url_safe {
                errors.add(
                    "username",
                    "Must start with a letter or digit, then only letters, digits, '_', '-' and '.'.",
                );
            }
        }

        errors.required("password", &self.password);

        if errors.required("email", &self.email) {
            errors.max_len("email", &self.email, EMAIL_MAX);
            if !looks_like_email(&self.email) {
                errors.add("email", "Invalid email address.");
            }
        }

        if errors.required("first_name", &self.first_name) {
            errors.max_len("first_name", &self.first_name, NAME_MAX);
        }
        if errors.required("last_name", &self.last_name) {
            errors.max_len("last_name", &self.last_name, NAME_MAX);
        }

        errors.into_result()
    }
}

impl LoginForm {
    pub fn validate(&self) -> Result<(), FormErrors> {
        let mut errors = FormErrors::default();
        errors.required("username", &self.username);
        errors.required("password", &self.password);
        errors.into_result()
    }
}

impl FeedbackForm {
    pub fn validate(&self) -> Result<(), FormErrors> {
        let mut errors = FormErrors::default();
        if errors.required("title", &self.title) {
            errors.max_len("title", &self.title, TITLE_MAX);
        }
        errors.required("content", &self.content);
        errors.into_result()
    }
}

fn looks_like_email(s: &str) -> bool {
    match s.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
        }
        None => false,
    }
}
