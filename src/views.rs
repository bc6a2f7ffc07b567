use std::fmt::Write;

use crate::feedback::Feedback;
use crate::form::{FeedbackForm, FormErrors, LoginForm, RegisterForm};
use crate::user::User;

pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            c => out.push(c),
        }
    }
    out
}

fn layout(title: &str, flash: Option<&str>, body: &str) -> String {
    let flash = flash
        .map(|msg| format!("<p class=\"flash\">{}</p>\n", escape(msg)))
        .unwrap_or_default();

    format!(
        "<!DOCTYPE html>
<html>
<head><meta charset=\"utf-8\"><title>{title}</title></head>
<body>
{flash}{body}
</body>
</html>
",
        title = escape(title),
    )
}

fn errors(errors: &FormErrors, field: &str) -> String {
    errors
        .for_field(field)
        .map(|msg| format!("<span class=\"error\">{}</span>", escape(msg)))
        .collect()
}

fn input(out: &mut String, kind: &str, name: &str, label: &str, value: &str, errs: &FormErrors) {
    let _ = writeln!(
        out,
        "<label>{label} <input type=\"{kind}\" name=\"{name}\" value=\"{value}\"></label>{errors}<br>",
        value = escape(value),
        errors = errors(errs, name),
    );
}

fn feedback_fields(out: &mut String, form: &FeedbackForm, errs: &FormErrors) {
    input(out, "text", "title", "Title", &form.title, errs);
    let _ = writeln!(
        out,
        "<label>Content <textarea name=\"content\">{}</textarea></label>{}<br>",
        escape(&form.content),
        errors(errs, "content"),
    );
}

pub fn register(form: &RegisterForm, errs: &FormErrors, flash: Option<&str>) -> String {
    let mut body = String::from("<h1>Register</h1>\n<form method=\"POST\" action=\"/register\">\n");
    input(&mut body, "text", "username", "Username", &form.username, errs);
    // never echo a password back
    input(&mut body, "password", "password", "Password", "", errs);
    input(&mut body, "email", "email", "Email", &form.email, errs);
    input(&mut body, "text", "first_name", "First name", &form.first_name, errs);
    input(&mut body, "text", "last_name", "Last name", &form.last_name, errs);
    body.push_str("<button>Register</button>\n</form>\n<a href=\"/login\">Login</a>\n");

    layout("Register", flash, &body)
}

pub fn login(form: &LoginForm, errs: &FormErrors, flash: Option<&str>) -> String {
    let mut body = String::from("<h1>Login</h1>\n<form method=\"POST\" action=\"/login\">\n");
    input(&mut body, "text", "username", "Username", &form.username, errs);
    input(&mut body, "password", "password", "Password", "", errs);
    body.push_str("<button>Login</button>\n</form>\n<a href=\"/register\">Register</a>\n");

    layout("Login", flash, &body)
}

pub struct UserPage<'a> {
    pub user: &'a User,
    pub feedback: &'a [Feedback],
    pub viewer: &'a str,
    pub form: &'a FeedbackForm,
    pub errors: &'a FormErrors,
    pub flash: Option<&'a str>,
}

pub fn user_page(page: UserPage<'_>) -> String {
    let UserPage {
        user,
        feedback,
        viewer,
        form,
        errors: errs,
        flash,
    } = page;
    let owner = user.username == viewer;
    let username = escape(&user.username);

    let mut body = String::new();
    let _ = writeln!(body, "<h1>{}</h1>", escape(&user.full_name()));
    let _ = writeln!(
        body,
        "<ul>\n<li>Username: {username}</li>\n<li>Email: {}</li>\n</ul>",
        escape(&user.email),
    );

    body.push_str("<h2>Feedback</h2>\n<ul>\n");
    for fb in feedback {
        let _ = write!(
            body,
            "<li><b>{}</b> {}",
            escape(&fb.title),
            escape(&fb.content)
        );
        if owner {
            let _ = write!(
                body,
                " <a href=\"/feedback/{id}/update\">Edit</a> <a href=\"/feedback/{id}/delete\">Delete</a>",
                id = fb.id,
            );
        }
        body.push_str("</li>\n");
    }
    body.push_str("</ul>\n");

    if owner {
        let _ = writeln!(
            body,
            "<h2>Add feedback</h2>\n<form method=\"POST\" action=\"/users/{username}/feedback/add\">"
        );
        feedback_fields(&mut body, form, errs);
        body.push_str("<button>Add</button>\n</form>\n");

        let _ = writeln!(
            body,
            "<form method=\"POST\" action=\"/users/{username}/delete\"><button>Delete account</button></form>"
        );
    }

    body.push_str("<form method=\"POST\" action=\"/logout\"><button>Logout</button></form>\n");

    layout(&user.username, flash, &body)
}

pub fn update_feedback(id: i64, form: &FeedbackForm, errs: &FormErrors, flash: Option<&str>) -> String {
    let mut body = String::new();
    let _ = writeln!(
        body,
        "<h1>Edit feedback</h1>\n<form method=\"POST\" action=\"/feedback/{id}/update\">"
    );
    feedback_fields(&mut body, form, errs);
    body.push_str("<button>Save</button>\n</form>\n");

    layout("Edit feedback", flash, &body)
}

pub fn error_page(status: u16, message: &str) -> String {
    layout(
        message,
        None,
        &format!("<h1>{status}</h1>\n<p>{}</p>\n", escape(message)),
    )
}
