//! Admin route guard: a static token from `Authorization: Bearer`,
//! `x-admin-token`, or the `token` query parameter.

use crate::error::{ErrorBody, ErrorKind};
use actix_web::{
    FromRequest, HttpRequest, HttpResponse, ResponseError,
    http::{
        StatusCode,
        header::{AUTHORIZATION, HeaderName},
    },
    web,
};
use futures_util::future::{Ready, ready};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use thiserror::Error as ThisError;

pub const X_ADMIN_TOKEN: HeaderName = HeaderName::from_static("x-admin-token");

/// Configured admin token, `None` closes every admin route.
///
/// Only a keyed digest of the token is kept. Candidates are digested with the
/// same per-process key and compared in constant time, independent of length.
#[derive(Clone)]
pub struct AdminToken {
    hmac: Hmac<Sha256>,
    expected: Option<Vec<u8>>,
}

impl AdminToken {
    pub fn new(token: Option<String>) -> Self {
        let key = rand::random::<[u8; 32]>();
        let hmac = Hmac::<Sha256>::new_from_slice(&key).expect("HMAC accepts keys of any length");
        let expected = token.map(|token| {
            let mut mac = hmac.clone();
            mac.update(token.as_bytes());
            mac.finalize().into_bytes().to_vec()
        });
        Self { hmac, expected }
    }

    fn matches(&self, given: &str) -> bool {
        let Some(expected) = &self.expected else {
            return false;
        };
        let mut mac = self.hmac.clone();
        mac.update(given.as_bytes());
        mac.verify_slice(expected).is_ok()
    }
}

#[derive(ThisError, Debug)]
#[error("forbidden")]
pub struct Forbidden;

impl ResponseError for Forbidden {
    fn status_code(&self) -> StatusCode {
        StatusCode::FORBIDDEN
    }

    fn error_response(&self) -> HttpResponse {
        ErrorBody::build(self, ErrorKind::Forbidden)
    }
}

#[derive(Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

fn given_token(req: &HttpRequest) -> Option<String> {
    let headers = req.headers();
    if let Some(bearer) = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        return Some(bearer.trim().to_owned());
    }
    if let Some(token) = headers.get(&X_ADMIN_TOKEN).and_then(|v| v.to_str().ok()) {
        return Some(token.trim().to_owned());
    }
    web::Query::<TokenQuery>::from_query(req.query_string())
        .ok()
        .and_then(|q| q.into_inner().token)
}

/// Extractor that only succeeds for requests carrying the admin token.
pub struct Admin;

impl FromRequest for Admin {
    type Error = Forbidden;
    type Future = Ready<Result<Self, Forbidden>>;

    fn from_request(req: &HttpRequest, _: &mut actix_web::dev::Payload) -> Self::Future {
        let allowed = req
            .app_data::<web::Data<AdminToken>>()
            .zip(given_token(req))
            .is_some_and(|(expected, given)| expected.matches(&given));
        if !allowed {
            tracing::warn!("rejected admin request to {}", req.path());
        }
        ready(if allowed { Ok(Admin) } else { Err(Forbidden) })
    }
}
