//! HTTP Basic identity binding: `email:password`, checked with argon2
//! against the hash stored for that email.

use argon2::{Argon2, PasswordHash, PasswordVerifier};
use axum::extract::FromRequestParts;
use axum::http::{HeaderMap, request::Parts};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use natter_core::{UserId, store::ChatStore};
use natter_hub::Broker;

use crate::{AppState, error::Error};

/// The authenticated caller. Every core operation takes this id explicitly.
#[derive(Debug, Clone, Copy)]
pub struct Identity(pub UserId);

/// Pull `(email, password)` out of an `Authorization: Basic` header.
pub fn basic_credentials(headers: &HeaderMap) -> Result<(String, String), Error> {
  let header_val = headers
    .get(axum::http::header::AUTHORIZATION)
    .and_then(|v| v.to_str().ok())
    .ok_or(Error::Unauthorized)?;

  let encoded = header_val
    .strip_prefix("Basic ")
    .ok_or(Error::Unauthorized)?;

  let decoded = B64.decode(encoded).map_err(|_| Error::Unauthorized)?;
  let creds   = std::str::from_utf8(&decoded).map_err(|_| Error::Unauthorized)?;

  let (email, password) = creds.split_once(':').ok_or(Error::Unauthorized)?;
  Ok((email.to_owned(), password.to_owned()))
}

/// Check `password` against a PHC string produced by argon2.
pub fn verify_password(password: &str, phc: &str) -> Result<(), Error> {
  let parsed_hash = PasswordHash::new(phc).map_err(|_| Error::Unauthorized)?;
  Argon2::default()
    .verify_password(password.as_bytes(), &parsed_hash)
    .map_err(|_| Error::Unauthorized)
}

impl<S, B> FromRequestParts<AppState<S, B>> for Identity
where
  S: ChatStore + 'static,
  B: Broker,
{
  type Rejection = Error;

  async fn from_request_parts(
    parts: &mut Parts,
    state: &AppState<S, B>,
  ) -> Result<Self, Self::Rejection> {
    let (email, password) = basic_credentials(&parts.headers)?;

    let Some((user, hash)) = state
      .hub
      .store()
      .credentials(&email)
      .await
      .map_err(Error::store)?
    else {
      tracing::debug!(email = %email, "unknown account");
      return Err(Error::Unauthorized);
    };

    verify_password(&password, &hash)?;
    Ok(Identity(user))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use axum::http::{HeaderValue, header};

  fn headers(value: &str) -> HeaderMap {
    let mut h = HeaderMap::new();
    h.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
    h
  }

  fn basic(user: &str, pass: &str) -> String {
    let encoded = B64.encode(format!("{user}:{pass}"));
    format!("Basic {encoded}")
  }

  fn hash(password: &str) -> String {
    use argon2::{PasswordHasher, password_hash::SaltString};
    use rand_core::OsRng;
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
      .hash_password(password.as_bytes(), &salt)
      .unwrap()
      .to_string()
  }

  #[test]
  fn parses_email_and_password() {
    let (email, password) =
      basic_credentials(&headers(&basic("a@example.com", "pa:ss"))).unwrap();
    assert_eq!(email, "a@example.com");
    assert_eq!(password, "pa:ss", "only the first colon separates");
  }

  #[test]
  fn missing_header() {
    assert!(matches!(basic_credentials(&HeaderMap::new()), Err(Error::Unauthorized)));
  }

  #[test]
  fn wrong_scheme() {
    assert!(matches!(
      basic_credentials(&headers("Bearer abc")),
      Err(Error::Unauthorized)
    ));
  }

  #[test]
  fn invalid_base64() {
    assert!(matches!(
      basic_credentials(&headers("Basic !!!not-base64!!!")),
      Err(Error::Unauthorized)
    ));
  }

  #[test]
  fn password_verification() {
    let phc = hash("secret");
    assert!(verify_password("secret", &phc).is_ok());
    assert!(matches!(verify_password("wrong", &phc), Err(Error::Unauthorized)));
    assert!(matches!(verify_password("secret", "not-a-hash"), Err(Error::Unauthorized)));
  }
}
