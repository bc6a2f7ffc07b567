use std::convert::Infallible;
use std::sync::Arc;

use cookie::{Cookie, SameSite};
use log::{debug, error};
use serde::de::DeserializeOwned;
use warp::http::{header, HeaderMap, HeaderValue, StatusCode};
use warp::reply::Response;
use warp::{Filter, Rejection, Reply};

use crate::auth::{AuthAttempt, SessionId};
use crate::feedbox::{Error, FeedBox, FeedBoxAuthed, Taken};
use crate::form::{FeedbackForm, FormErrors, LoginForm, RegisterForm};
use crate::views::{self, UserPage};

const SESSION_COOKIE: &str = "sessionid";
const FLASH_COOKIE: &str = "flash";
const SESSION_LIFETIME: time::Duration = time::Duration::weeks(2);
const FORM_LIMIT: u64 = 16 * 1024;

/// Everything a handler needs, handed to each one explicitly.
#[derive(Clone)]
pub struct Context {
    feedbox: Arc<FeedBox>,
    secure: bool,
}

/// The cookies we care about from a request.
#[derive(Debug, Default)]
pub struct Cookies {
    session_id: Option<SessionId>,
    flash: Option<String>,
}

impl Cookies {
    /// The header is decoded lossily; pairs that don't parse are skipped.
    fn from_headers(headers: &HeaderMap) -> Self {
        let mut cookies = Self::default();

        let raw = headers
            .get_all(header::COOKIE)
            .iter()
            .map(|v| String::from_utf8_lossy(v.as_bytes()))
            .collect::<Vec<_>>()
            .join("; ");

        for cookie in Cookie::split_parse_encoded(raw) {
            let cookie = match cookie {
                Ok(c) => c,
                Err(e) => {
                    debug!("ignoring unparseable cookie: {e}");
                    continue;
                }
            };

            match cookie.name() {
                SESSION_COOKIE => cookies.session_id = cookie.value().parse().ok(),
                FLASH_COOKIE => cookies.flash = Some(cookie.value().to_string()),
                _ => {}
            }
        }

        cookies
    }

    fn flash(&self) -> Option<&str> {
        self.flash.as_deref()
    }
}

impl Context {
    pub fn new(feedbox: Arc<FeedBox>, secure: bool) -> Self {
        Self { feedbox, secure }
    }

    fn cookie(&self, name: &'static str, value: String) -> Cookie<'static> {
        Cookie::build((name, value))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .secure(self.secure)
            .build()
    }

    fn with_session(&self, resp: Response, session_id: &SessionId) -> Response {
        let mut cookie = self.cookie(SESSION_COOKIE, session_id.to_string());
        cookie.set_max_age(SESSION_LIFETIME);
        add_cookie(resp, cookie)
    }

    fn with_flash(&self, resp: Response, message: impl Into<String>) -> Response {
        add_cookie(resp, self.cookie(FLASH_COOKIE, message.into()))
    }

    fn without(&self, resp: Response, name: &'static str) -> Response {
        let mut cookie = self.cookie(name, String::new());
        cookie.make_removal();
        add_cookie(resp, cookie)
    }

    /// An html page; showing it uses up any pending flash message.
    fn render(&self, cookies: &Cookies, html: String) -> Response {
        let resp = warp::reply::html(html).into_response();
        if cookies.flash.is_some() {
            self.without(resp, FLASH_COOKIE)
        } else {
            resp
        }
    }

    async fn session(&self, cookies: &Cookies) -> Result<FeedBoxAuthed, Error> {
        let session_id = cookies.session_id.ok_or(Error::Unauthorized)?;
        self.feedbox.authenticate(session_id).await
    }

    async fn logged_in(&self, cookies: &Cookies) -> Result<Option<FeedBoxAuthed>, Rejection> {
        match self.session(cookies).await {
            Ok(authed) => Ok(Some(authed)),
            Err(Error::Unauthorized) => Ok(None),
            Err(e) => Err(reject(e)),
        }
    }
}

fn reject(e: Error) -> Rejection {
    warp::reject::custom(e)
}

fn user_url(username: &str) -> String {
    format!("/users/{username}")
}

fn redirect(location: &str) -> Response {
    let mut resp = StatusCode::SEE_OTHER.into_response();
    match HeaderValue::from_str(location) {
        Ok(value) => {
            resp.headers_mut().insert(header::LOCATION, value);
        }
        Err(e) => error!("invalid redirect location {location:?}: {e}"),
    }
    resp
}

fn add_cookie(mut resp: Response, cookie: Cookie<'_>) -> Response {
    match HeaderValue::from_str(&cookie.encoded().to_string()) {
        Ok(value) => {
            resp.headers_mut().append(header::SET_COOKIE, value);
        }
        Err(e) => error!("couldn't set cookie {}: {e}", cookie.name()),
    }
    resp
}

fn error_page(status: StatusCode) -> Response {
    let html = views::error_page(status.as_u16(), status.canonical_reason().unwrap_or("Error"));
    warp::reply::with_status(warp::reply::html(html), status).into_response()
}

/// Resolves the session before anything reads the request body.
async fn require_session(
    ctx: Context,
    cookies: Cookies,
) -> Result<(Context, Cookies, FeedBoxAuthed), Rejection> {
    let authed = ctx.session(&cookies).await.map_err(reject)?;
    Ok((ctx, cookies, authed))
}

fn form<T: DeserializeOwned + Send>() -> impl Filter<Extract = (T,), Error = Rejection> + Clone {
    warp::body::content_length_limit(FORM_LIMIT).and(warp::body::form())
}

pub fn routes(ctx: Context) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let base = {
        let ctx = ctx.clone();
        warp::any()
            .map(move || ctx.clone())
            .and(warp::header::headers_cloned().map(|headers: HeaderMap| Cookies::from_headers(&headers)))
    };

    let index = warp::path::end()
        .and(warp::get())
        .map(|| redirect("/register"));

    let register = warp::path!("register")
        .and(warp::get())
        .and(base.clone())
        .and_then(register_page)
        .or(warp::path!("register")
            .and(warp::post())
            .and(base.clone())
            .and(form())
            .and_then(register))
        .unify();

    let login = warp::path!("login")
        .and(warp::get())
        .and(base.clone())
        .and_then(login_page)
        .or(warp::path!("login")
            .and(warp::post())
            .and(base.clone())
            .and(form())
            .and_then(login))
        .unify();

    let logout = warp::path!("logout")
        .and(warp::post())
        .and(base.clone())
        .and_then(logout);

    let users = warp::path!("users" / String)
        .and(warp::get())
        .and(base.clone())
        .and_then(user_page)
        .or(warp::path!("users" / String / "delete")
            .and(warp::post())
            .and(base.clone())
            .and_then(delete_user))
        .unify()
        .or(warp::path!("users" / String / "feedback" / "add")
            .and(warp::post())
            .and(base.clone().and_then(require_session).untuple_one())
            .and(form())
            .and_then(add_feedback))
        .unify();

    let feedback = warp::path!("feedback" / i64 / "update")
        .and(warp::get())
        .and(base.clone())
        .and_then(update_feedback_page)
        .or(warp::path!("feedback" / i64 / "update")
            .and(warp::post())
            .and(base.clone().and_then(require_session).untuple_one())
            .and(form())
            .and_then(update_feedback))
        .unify()
        .or(warp::path!("feedback" / i64 / "delete")
            .and(warp::get())
            .and(base)
            .and_then(delete_feedback))
        .unify();

    index
        .or(register)
        .unify()
        .or(login)
        .unify()
        .or(logout)
        .unify()
        .or(users)
        .unify()
        .or(feedback)
        .unify()
        .recover(move |err| handle_rejection(err, ctx.clone()))
}

async fn register_page(ctx: Context, cookies: Cookies) -> Result<Response, Rejection> {
    if let Some(authed) = ctx.logged_in(&cookies).await? {
        return Ok(redirect(&user_url(authed.username())));
    }

    let html = views::register(&RegisterForm::default(), &FormErrors::default(), cookies.flash());
    Ok(ctx.render(&cookies, html))
}

async fn register(ctx: Context, cookies: Cookies, form: RegisterForm) -> Result<Response, Rejection> {
    if let Some(authed) = ctx.logged_in(&cookies).await? {
        return Ok(redirect(&user_url(authed.username())));
    }

    let rerender = |errors: FormErrors| {
        ctx.render(&cookies, views::register(&form, &errors, cookies.flash()))
    };

    if let Err(errors) = form.validate() {
        return Ok(rerender(errors));
    }

    match ctx.feedbox.register(form.clone()).await {
        Ok(authed) => {
            let resp = redirect(&user_url(authed.username()));
            let resp = ctx.with_session(resp, authed.session_id());
            Ok(ctx.with_flash(resp, "Welcome! Successfully created your account"))
        }
        Err(Error::Taken(Taken::Username)) => Ok(rerender(FormErrors::single(
            "username",
            "That username is taken.",
        ))),
        Err(Error::Taken(Taken::Email)) => Ok(rerender(FormErrors::single(
            "email",
            "That email is already registered.",
        ))),
        Err(e) => Err(reject(e)),
    }
}

async fn login_page(ctx: Context, cookies: Cookies) -> Result<Response, Rejection> {
    if let Some(authed) = ctx.logged_in(&cookies).await? {
        return Ok(redirect(&user_url(authed.username())));
    }

    let html = views::login(&LoginForm::default(), &FormErrors::default(), cookies.flash());
    Ok(ctx.render(&cookies, html))
}

async fn login(ctx: Context, cookies: Cookies, form: LoginForm) -> Result<Response, Rejection> {
    if let Some(authed) = ctx.logged_in(&cookies).await? {
        return Ok(redirect(&user_url(authed.username())));
    }

    let rerender =
        |errors: FormErrors| ctx.render(&cookies, views::login(&form, &errors, cookies.flash()));

    if let Err(errors) = form.validate() {
        return Ok(rerender(errors));
    }

    match ctx.feedbox.login(AuthAttempt::from(form.clone())).await {
        Ok((authed, user)) => {
            let resp = redirect(&user_url(authed.username()));
            let resp = ctx.with_session(resp, authed.session_id());
            Ok(ctx.with_flash(resp, format!("Welcome back, {}!", user.first_name)))
        }
        Err(Error::Unauthorized) => Ok(rerender(FormErrors::single(
            "username",
            "Invalid username/password.",
        ))),
        Err(e) => Err(reject(e)),
    }
}

async fn logout(ctx: Context, cookies: Cookies) -> Result<Response, Rejection> {
    if let Some(authed) = ctx.logged_in(&cookies).await? {
        authed.logout().await.map_err(reject)?;
    }

    let resp = ctx.without(redirect("/login"), SESSION_COOKIE);
    Ok(ctx.with_flash(resp, "Successfully logged you out!"))
}

async fn user_page(username: String, ctx: Context, cookies: Cookies) -> Result<Response, Rejection> {
    let authed = ctx.session(&cookies).await.map_err(reject)?;
    let (user, feedback) = authed.user_page(&username).await.map_err(reject)?;

    let html = views::user_page(UserPage {
        user: &user,
        feedback: &feedback,
        viewer: authed.username(),
        form: &FeedbackForm::default(),
        errors: &FormErrors::default(),
        flash: cookies.flash(),
    });
    Ok(ctx.render(&cookies, html))
}

async fn delete_user(username: String, ctx: Context, cookies: Cookies) -> Result<Response, Rejection> {
    let authed = ctx.session(&cookies).await.map_err(reject)?;
    authed.find_user(&username).await.map_err(reject)?;

    let owner = match authed.with_user(&username) {
        Ok(owner) => owner,
        Err(Error::Forbidden) => return Ok(redirect(&user_url(&username))),
        Err(e) => return Err(reject(e)),
    };

    owner.delete_account().await.map_err(reject)?;

    Ok(ctx.without(redirect("/"), SESSION_COOKIE))
}

async fn add_feedback(
    username: String,
    ctx: Context,
    cookies: Cookies,
    authed: FeedBoxAuthed,
    form: FeedbackForm,
) -> Result<Response, Rejection> {
    authed.find_user(&username).await.map_err(reject)?;

    let owner = match authed.with_user(&username) {
        Ok(owner) => owner,
        Err(Error::Forbidden) => return Ok(redirect(&user_url(&username))),
        Err(e) => return Err(reject(e)),
    };

    if let Err(errors) = form.validate() {
        let (user, feedback) = owner.user_page(&username).await.map_err(reject)?;
        let html = views::user_page(UserPage {
            user: &user,
            feedback: &feedback,
            viewer: owner.username(),
            form: &form,
            errors: &errors,
            flash: cookies.flash(),
        });
        return Ok(ctx.render(&cookies, html));
    }

    owner.add_feedback(&form).await.map_err(reject)?;

    Ok(redirect(&user_url(&username)))
}

async fn update_feedback_page(id: i64, ctx: Context, cookies: Cookies) -> Result<Response, Rejection> {
    let authed = ctx.session(&cookies).await.map_err(reject)?;

    let feedback = match authed.feedback(id).await {
        Ok((_owner, feedback)) => feedback,
        Err(Error::Forbidden) => return Ok(redirect("/")),
        Err(e) => return Err(reject(e)),
    };

    let form = FeedbackForm {
        title: feedback.title,
        content: feedback.content,
    };
    let html = views::update_feedback(id, &form, &FormErrors::default(), cookies.flash());
    Ok(ctx.render(&cookies, html))
}

async fn update_feedback(
    id: i64,
    ctx: Context,
    cookies: Cookies,
    authed: FeedBoxAuthed,
    form: FeedbackForm,
) -> Result<Response, Rejection> {

    let (owner, feedback) = match authed.feedback(id).await {
        Ok(found) => found,
        Err(Error::Forbidden) => return Ok(redirect("/")),
        Err(e) => return Err(reject(e)),
    };

    if let Err(errors) = form.validate() {
        let html = views::update_feedback(id, &form, &errors, cookies.flash());
        return Ok(ctx.render(&cookies, html));
    }

    owner.update_feedback(&feedback, &form).await.map_err(reject)?;

    Ok(redirect(&user_url(owner.username())))
}

async fn delete_feedback(id: i64, ctx: Context, cookies: Cookies) -> Result<Response, Rejection> {
    let authed = ctx.session(&cookies).await.map_err(reject)?;

    let (owner, feedback) = match authed.feedback(id).await {
        Ok(found) => found,
        Err(Error::Forbidden) => return Ok(redirect("/")),
        Err(e) => return Err(reject(e)),
    };

    owner.delete_feedback(feedback).await.map_err(reject)?;

    Ok(redirect(&user_url(owner.username())))
}

async fn handle_rejection(err: Rejection, ctx: Context) -> Result<Response, Infallible> {
    if let Some(&e) = err.find::<Error>() {
        return Ok(match e {
            Error::Unauthorized => ctx.with_flash(redirect("/login"), "Please login first"),
            e => error_page(e.into()),
        });
    }

    let status = if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        StatusCode::METHOD_NOT_ALLOWED
    } else if err.find::<warp::body::BodyDeserializeError>().is_some() {
        StatusCode::BAD_REQUEST
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        StatusCode::PAYLOAD_TOO_LARGE
    } else if err.find::<warp::reject::UnsupportedMediaType>().is_some() {
        StatusCode::UNSUPPORTED_MEDIA_TYPE
    } else if err.find::<warp::reject::LengthRequired>().is_some() {
        StatusCode::LENGTH_REQUIRED
    } else if err.is_not_found() {
        StatusCode::NOT_FOUND
    } else {
        error!("unhandled rejection: {err:?}");
        StatusCode::INTERNAL_SERVER_ERROR
    };

    Ok(error_page(status))
}
