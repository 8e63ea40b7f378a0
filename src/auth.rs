use crate::database::MovieStore;
use crate::flash::{flash, Level};
use crate::handlers::redirect;
use crate::log_error;
use crate::model::User;
use actix_identity::Identity;
use actix_session::SessionExt;
use actix_web::{dev::Payload, error, web, FromRequest, HttpRequest};
use futures_util::future::LocalBoxFuture;

/// The logged-in user, reloaded from the store on every request. Extracting
/// it on an anonymous request redirects to the login page instead.
pub struct LoggedIn(pub User);

impl LoggedIn {
    pub fn name(&self) -> &str {
        &self.0.name
    }
}

fn login_required(req: &HttpRequest) -> actix_web::Error {
    flash(
        &req.get_session(),
        Level::Info,
        "Please log in to access this page.",
    );
    error::InternalError::from_response("login required", redirect("/login")).into()
}

impl FromRequest for LoggedIn {
    type Error = actix_web::Error;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let req = req.clone();
        Box::pin(async move {
            let identity = match Identity::extract(&req).await {
                Ok(identity) => identity,
                Err(_) => return Err(login_required(&req)),
            };
            let name = identity
                .id()
                .map_err(|err| log_error(err, "Session error"))?;
            let store = req
                .app_data::<web::Data<dyn MovieStore>>()
                .ok_or_else(|| log_error("no store registered", "Configuration error"))?;
            match store
                .find_user(&name)
                .await
                .map_err(|err| log_error(err, "Database error"))?
            {
                Some(user) => Ok(LoggedIn(user)),
                None => {
                    log::info!("session for unknown user {}", name);
                    identity.logout();
                    Err(login_required(&req))
                }
            }
        })
    }
}

/// Checks a password against the stored credential off the async workers.
pub async fn verify(user: User, password: String) -> actix_web::Result<bool> {
    web::block(move || user.verify_password(&password))
        .await?
        .map_err(|err| log_error(err, "Verification error"))
}

pub async fn hash(password: String, cost: u32) -> actix_web::Result<String> {
    web::block(move || bcrypt::hash(password, cost))
        .await?
        .map_err(|err| log_error(err, "Hashing error"))
}
