use crate::auth::{self, LoggedIn};
use crate::database::MovieStore;
use crate::flash::{self, flash, Level};
use crate::log_error;
use crate::model::*;
use actix_identity::Identity;
use actix_session::Session;
use actix_web::{web, HttpMessage, HttpRequest, HttpResponse};
use log::error;
use serde::Deserialize;

type Tera = web::Data<tera::Tera>;
type Store = web::Data<dyn MovieStore>;

#[derive(Debug, Clone, Copy)]
pub struct AuthSettings {
    pub bcrypt_cost: u32,
}

pub fn redirect(location: &str) -> HttpResponse {
    HttpResponse::Found()
        .insert_header(("location", location))
        .finish()
}

fn render(
    tera: &tera::Tera,
    session: &Session,
    user: Option<&str>,
    template: &str,
    mut ctx: tera::Context,
) -> actix_web::Result<HttpResponse> {
    ctx.insert("flashes", &flash::take(session));
    if let Some(user) = user {
        ctx.insert("user", user);
    }
    let body = tera
        .render(template, &ctx)
        .map_err(|err| log_error(err, "Template error"))?;
    Ok(HttpResponse::Ok().content_type("text/html").body(body))
}

fn identity_name(id: &Option<Identity>) -> Option<String> {
    id.as_ref().and_then(|id| id.id().ok())
}

#[derive(Deserialize)]
pub struct CredentialParams {
    name: String,
    password: String,
}

async fn register_form(
    id: Option<Identity>,
    tera: Tera,
    session: Session,
) -> actix_web::Result<HttpResponse> {
    let user = identity_name(&id);
    render(&tera, &session, user.as_deref(), "register.html", tera::Context::new())
}

async fn register(
    params: web::Form<CredentialParams>,
    tera: Tera,
    session: Session,
    store: Store,
    settings: web::Data<AuthSettings>,
) -> actix_web::Result<HttpResponse> {
    let CredentialParams { name, password } = params.into_inner();
    if name.is_empty() || password.is_empty() {
        flash(&session, Level::Danger, "Name and password are required.");
        return render(&tera, &session, None, "register.html", tera::Context::new());
    }
    let user = User {
        name,
        credential: Credential::Hashed(auth::hash(password, settings.bcrypt_cost).await?),
    };
    if !store
        .add_user(&user)
        .await
        .map_err(|err| log_error(err, "Database error"))?
    {
        flash(&session, Level::Danger, "That name is already taken.");
        return render(&tera, &session, None, "register.html", tera::Context::new());
    }
    log::info!("registered user {}", user.name);
    flash(
        &session,
        Level::Success,
        "Registration successful! Please log in.",
    );
    Ok(redirect("/login"))
}

async fn login_form(
    id: Option<Identity>,
    tera: Tera,
    session: Session,
) -> actix_web::Result<HttpResponse> {
    let user = identity_name(&id);
    render(&tera, &session, user.as_deref(), "login.html", tera::Context::new())
}

async fn login(
    req: HttpRequest,
    params: web::Form<CredentialParams>,
    tera: Tera,
    session: Session,
    store: Store,
) -> actix_web::Result<HttpResponse> {
    let CredentialParams { name, password } = params.into_inner();
    let valid = match store
        .find_user(&name)
        .await
        .map_err(|err| log_error(err, "Database error"))?
    {
        Some(user) => auth::verify(user, password).await?,
        None => false,
    };
    if valid {
        Identity::login(&req.extensions(), name).map_err(|err| log_error(err, "Session error"))?;
        flash(&session, Level::Success, "Login successful!");
        return Ok(redirect("/"));
    }
    flash(&session, Level::Danger, "Invalid name or password.");
    render(&tera, &session, None, "login.html", tera::Context::new())
}

async fn logout(_user: LoggedIn, id: Identity, session: Session) -> HttpResponse {
    id.logout();
    flash(&session, Level::Info, "You have been logged out.");
    redirect("/login")
}

async fn index(
    user: LoggedIn,
    tera: Tera,
    session: Session,
    store: Store,
) -> actix_web::Result<HttpResponse> {
    let movies = store
        .recommend_for(user.name())
        .await
        .map_err(|err| log_error(err, "Database error"))?;
    let mut ctx = tera::Context::new();
    ctx.insert("movies", &movies);
    render(&tera, &session, Some(user.name()), "index.html", ctx)
}

#[derive(Deserialize)]
pub struct SearchParams {
    movie: Option<String>,
}

async fn search(
    params: web::Form<SearchParams>,
    id: Option<Identity>,
    tera: Tera,
    session: Session,
    store: Store,
) -> actix_web::Result<HttpResponse> {
    let title = params.into_inner().movie.unwrap_or_default();
    let movies = store
        .similar_movies(&title)
        .await
        .map_err(|err| log_error(err, "Database error"))?;
    let mut ctx = tera::Context::new();
    ctx.insert("title", &title);
    ctx.insert("movies", &movies);
    let user = identity_name(&id);
    render(&tera, &session, user.as_deref(), "recommendations.html", ctx)
}

async fn like(
    user: LoggedIn,
    title: web::Path<String>,
    session: Session,
    store: Store,
) -> HttpResponse {
    let title = title.into_inner();
    match store.like_movie(user.name(), &title).await {
        Ok(Some(liked)) => flash(
            &session,
            Level::Success,
            format!(
                "You liked the movie: '{}'. Enjoy your spooky adventure!",
                liked
            ),
        ),
        Ok(None) => flash(
            &session,
            Level::Danger,
            "Failed to like the movie. It might not exist.",
        ),
        Err(err) => {
            error!(
                "Error liking movie '{}' for user '{}': {}",
                title,
                user.name(),
                err
            );
            flash(&session, Level::Danger, "An error occurred. Please try again.");
        }
    }
    redirect("/all_movies")
}

async fn about(
    id: Option<Identity>,
    tera: Tera,
    session: Session,
) -> actix_web::Result<HttpResponse> {
    let user = identity_name(&id);
    render(&tera, &session, user.as_deref(), "about.html", tera::Context::new())
}

#[derive(Deserialize)]
pub struct MovieParams {
    #[serde(default)]
    title: String,
    #[serde(default)]
    genres: String,
    #[serde(default)]
    overview: String,
    #[serde(default)]
    popularity: String,
    #[serde(default)]
    release_date: String,
}

fn non_blank(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

impl From<MovieParams> for NewMovie {
    fn from(params: MovieParams) -> Self {
        NewMovie {
            title: params.title,
            genres: params.genres,
            overview: non_blank(params.overview),
            popularity: params.popularity.trim().parse().ok(),
            release_date: non_blank(params.release_date),
        }
    }
}

async fn add_movie_form(
    user: LoggedIn,
    tera: Tera,
    session: Session,
) -> actix_web::Result<HttpResponse> {
    render(
        &tera,
        &session,
        Some(user.name()),
        "add_movie.html",
        tera::Context::new(),
    )
}

async fn add_movie(
    _user: LoggedIn,
    params: web::Form<MovieParams>,
    session: Session,
    store: Store,
) -> actix_web::Result<HttpResponse> {
    let movie = store
        .add_movie(params.into_inner().into())
        .await
        .map_err(|err| log_error(err, "Database error"))?;
    log::info!("added movie {:?} with id {:?}", movie.title, movie.id);
    flash(&session, Level::Success, "Movie added!");
    Ok(redirect("/all_movies"))
}

#[derive(Deserialize)]
pub struct ListParams {
    search_query: Option<String>,
}

async fn movies_page(
    user: &LoggedIn,
    search: Option<String>,
    tera: &tera::Tera,
    session: &Session,
    store: &dyn MovieStore,
) -> actix_web::Result<HttpResponse> {
    let movies = store
        .list_movies(search.as_deref())
        .await
        .map_err(|err| log_error(err, "Database error"))?;
    let mut ctx = tera::Context::new();
    ctx.insert("movies", &movies);
    ctx.insert("search_query", &search.unwrap_or_default());
    render(tera, session, Some(user.name()), "movies.html", ctx)
}

async fn all_movies(
    user: LoggedIn,
    tera: Tera,
    session: Session,
    store: Store,
) -> actix_web::Result<HttpResponse> {
    movies_page(&user, None, &tera, &session, store.get_ref()).await
}

async fn search_movies(
    user: LoggedIn,
    params: web::Form<ListParams>,
    tera: Tera,
    session: Session,
    store: Store,
) -> actix_web::Result<HttpResponse> {
    let search = params.into_inner().search_query;
    movies_page(&user, search, &tera, &session, store.get_ref()).await
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(index))
        .route("/register", web::get().to(register_form))
        .route("/register", web::post().to(register))
        .route("/login", web::get().to(login_form))
        .route("/login", web::post().to(login))
        .route("/logout", web::get().to(logout))
        .route("/search", web::post().to(search))
        .route("/like/{title}", web::post().to(like))
        .route("/about", web::get().to(about))
        .route("/add_movie", web::get().to(add_movie_form))
        .route("/add_movie", web::post().to(add_movie))
        .route("/all_movies", web::get().to(all_movies))
        .route("/all_movies", web::post().to(search_movies));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::tests::{new_movie, plain_user, temporary_db};
    use actix_web::body::MessageBody;
    use actix_web::cookie::{Cookie, Key};
    use actix_web::dev::ServiceResponse;
    use actix_web::http::{header, StatusCode};
    use actix_web::{test, App};
    use std::sync::Arc;

    fn templates() -> tera::Tera {
        tera::Tera::new(concat!(env!("CARGO_MANIFEST_DIR"), "/templates/**/*")).unwrap()
    }

    macro_rules! test_app {
        ($db:expr) => {
            test::init_service(
                App::new()
                    .wrap(crate::identity_middleware())
                    .wrap(crate::session_middleware(Key::generate()))
                    .app_data(web::Data::new(templates()))
                    .app_data(web::Data::from(Arc::new($db) as Arc<dyn MovieStore>))
                    .app_data(web::Data::new(AuthSettings { bcrypt_cost: 4 }))
                    .configure(configure),
            )
            .await
        };
    }

    fn location<B>(resp: &ServiceResponse<B>) -> String {
        resp.headers()
            .get(header::LOCATION)
            .unwrap()
            .to_str()
            .unwrap()
            .to_owned()
    }

    fn session_cookie<B>(resp: &ServiceResponse<B>) -> Option<Cookie<'static>> {
        resp.response()
            .cookies()
            .find(|c| c.name() == crate::SESSION_COOKIE)
            .map(|c| c.into_owned())
    }

    fn refresh<B>(cookie: &mut Cookie<'static>, resp: &ServiceResponse<B>) {
        if let Some(updated) = session_cookie(resp) {
            *cookie = updated;
        }
    }

    async fn body_text<B: MessageBody>(resp: ServiceResponse<B>) -> String {
        String::from_utf8(test::read_body(resp).await.to_vec()).unwrap()
    }

    #[actix_web::test]
    async fn anonymous_users_are_sent_to_login() {
        let app = test_app!(temporary_db());

        let resp = test::call_service(&app, test::TestRequest::get().uri("/").to_request()).await;
        assert_eq!(resp.status(), StatusCode::FOUND);
        assert_eq!(location(&resp), "/login");
        let cookie = session_cookie(&resp).unwrap();

        let req = test::TestRequest::get()
            .uri("/login")
            .cookie(cookie)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(body_text(resp)
            .await
            .contains("Please log in to access this page."));

        for uri in ["/like/Alien", "/add_movie", "/all_movies"] {
            let req = test::TestRequest::post().uri(uri).to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::FOUND, "{}", uri);
            assert_eq!(location(&resp), "/login");
        }

        let resp =
            test::call_service(&app, test::TestRequest::get().uri("/about").to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[actix_web::test]
    async fn login_checks_password() {
        let db = temporary_db();
        db.add_user(&plain_user("foo", "1234")).await.unwrap();
        let app = test_app!(db);

        for (name, password) in [("foo", "wrong"), ("nobody", "1234")] {
            let req = test::TestRequest::post()
                .uri("/login")
                .set_form([("name", name), ("password", password)])
                .to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::OK);
            assert!(body_text(resp).await.contains("Invalid name or password."));
        }

        let req = test::TestRequest::post()
            .uri("/login")
            .set_form([("name", "foo"), ("password", "1234")])
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FOUND);
        assert_eq!(location(&resp), "/");
        let cookie = session_cookie(&resp).unwrap();

        let req = test::TestRequest::get().uri("/").cookie(cookie).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_text(resp).await;
        assert!(body.contains("Login successful!"));
        assert!(body.contains("Recommended for you"));
        assert!(body.contains("Log out (foo)"));
    }

    #[actix_web::test]
    async fn register_then_log_in_and_out() {
        let db = temporary_db();
        let app = test_app!(db.clone());

        let req = test::TestRequest::post()
            .uri("/register")
            .set_form([("name", "newbie"), ("password", "secret")])
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FOUND);
        assert_eq!(location(&resp), "/login");
        let user = db.find_user("newbie").await.unwrap().unwrap();
        assert!(matches!(user.credential, Credential::Hashed(_)));

        let req = test::TestRequest::post()
            .uri("/register")
            .set_form([("name", "newbie"), ("password", "other")])
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(body_text(resp).await.contains("That name is already taken."));

        let req = test::TestRequest::post()
            .uri("/register")
            .set_form([("name", ""), ("password", "x")])
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert!(body_text(resp)
            .await
            .contains("Name and password are required."));

        let req = test::TestRequest::post()
            .uri("/login")
            .set_form([("name", "newbie"), ("password", "secret")])
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FOUND);
        let mut cookie = session_cookie(&resp).unwrap();

        let req = test::TestRequest::get()
            .uri("/logout")
            .cookie(cookie.clone())
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FOUND);
        assert_eq!(location(&resp), "/login");
        refresh(&mut cookie, &resp);

        let req = test::TestRequest::get()
            .uri("/login")
            .cookie(cookie.clone())
            .to_request();
        let resp = test::call_service(&app, req).await;
        refresh(&mut cookie, &resp);
        assert!(body_text(resp).await.contains("You have been logged out."));

        let req = test::TestRequest::get().uri("/").cookie(cookie).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FOUND);
    }

    #[actix_web::test]
    async fn likes_add_movies_and_listing() {
        let db = temporary_db();
        db.add_user(&plain_user("foo", "1234")).await.unwrap();
        db.add_user(&plain_user("bar", "1234")).await.unwrap();
        db.add_movie(new_movie("Alien", "Horror", "In space", 30.0))
            .await
            .unwrap();
        let app = test_app!(db.clone());

        let req = test::TestRequest::post()
            .uri("/login")
            .set_form([("name", "foo"), ("password", "1234")])
            .to_request();
        let resp = test::call_service(&app, req).await;
        let mut cookie = session_cookie(&resp).unwrap();

        let req = test::TestRequest::post()
            .uri("/add_movie")
            .cookie(cookie.clone())
            .set_form([
                ("title", "The Shining"),
                ("genres", "Horror, Thriller"),
                ("overview", "A hotel in winter"),
                ("popularity", "not a number"),
                ("release_date", "1980-05-23"),
            ])
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FOUND);
        assert_eq!(location(&resp), "/all_movies");
        refresh(&mut cookie, &resp);
        let added = db.list_movies(Some("Shining")).await.unwrap();
        assert_eq!(added.len(), 1);
        assert_eq!(added[0].popularity, None);
        assert_eq!(added[0].id, Some(2));

        db.like_movie("bar", "The Shining").await.unwrap();
        db.like_movie("bar", "Alien").await.unwrap();

        for _ in 0..2 {
            let req = test::TestRequest::post()
                .uri("/like/The%20Shining")
                .cookie(cookie.clone())
                .to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::FOUND);
            assert_eq!(location(&resp), "/all_movies");
            refresh(&mut cookie, &resp);
        }

        let req = test::TestRequest::get()
            .uri("/all_movies")
            .cookie(cookie.clone())
            .to_request();
        let resp = test::call_service(&app, req).await;
        refresh(&mut cookie, &resp);
        let body = body_text(resp).await;
        assert!(body.contains("You liked the movie"));
        assert!(body.contains("Enjoy your spooky adventure!"));
        assert!(body.find("<h3>Alien</h3>").unwrap() < body.find("<h3>The Shining</h3>").unwrap());

        let req = test::TestRequest::get()
            .uri("/")
            .cookie(cookie.clone())
            .to_request();
        let resp = test::call_service(&app, req).await;
        refresh(&mut cookie, &resp);
        let body = body_text(resp).await;
        assert!(body.contains("Alien"));
        assert!(body.contains("liked by 1 similar viewer"));

        let req = test::TestRequest::post()
            .uri("/like/Nope")
            .cookie(cookie.clone())
            .to_request();
        let resp = test::call_service(&app, req).await;
        refresh(&mut cookie, &resp);

        let req = test::TestRequest::post()
            .uri("/all_movies")
            .cookie(cookie.clone())
            .set_form([("search_query", "Shin")])
            .to_request();
        let resp = test::call_service(&app, req).await;
        let body = body_text(resp).await;
        assert!(body.contains("Failed to like the movie. It might not exist."));
        assert!(body.contains("The Shining"));
        assert!(!body.contains("<h3>Alien</h3>"));
    }

    #[actix_web::test]
    async fn search_is_public() {
        let db = temporary_db();
        db.add_movie(new_movie(
            "Scream",
            "Horror, Mystery",
            "A masked killer stalks a group of friends",
            1.0,
        ))
        .await
        .unwrap();
        db.add_movie(new_movie(
            "Scream 2",
            "Horror",
            "A masked killer stalks a group of students",
            1.0,
        ))
        .await
        .unwrap();
        let app = test_app!(db);

        let req = test::TestRequest::post()
            .uri("/search")
            .set_form([("movie", "Scream")])
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_text(resp).await;
        assert!(body.contains("<td>Scream 2</td>"));
        assert!(body.contains("Horror (1)"));

        let req = test::TestRequest::post()
            .uri("/search")
            .set_form([("other", "x")])
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(body_text(resp).await.contains("No similar movies found."));
    }
}
