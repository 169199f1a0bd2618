use std::collections::BTreeMap;

use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::prelude::*;

use crate::api::AppState;

/// Rejects anything without valid basic credentials. The 401 carries a
/// realm so browsers put up their native prompt and replay the
/// credentials on later requests, the websocket upgrade included.
pub async fn require(
	State(state): State<AppState>,
	request: Request,
	next: Next,
) -> Response {
	if check(request.headers(), &state.accounts) {
		return next.run(request).await;
	}

	(
		StatusCode::UNAUTHORIZED,
		[(header::WWW_AUTHENTICATE, "Basic realm=\"steward\"")],
		"unauthorized",
	)
		.into_response()
}

pub fn check(headers: &HeaderMap, accounts: &BTreeMap<String, String>) -> bool {
	match parse_basic(headers) {
		Some((user, pass)) => accounts.get(&user).is_some_and(|expected| *expected == pass),
		None => false,
	}
}

fn parse_basic(headers: &HeaderMap) -> Option<(String, String)> {
	let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
	let encoded = value.strip_prefix("Basic ")?;
	let decoded = BASE64_STANDARD.decode(encoded).ok()?;
	let text = String::from_utf8(decoded).ok()?;
	let (user, pass) = text.split_once(':')?;
	Some((user.to_string(), pass.to_string()))
}

#[cfg(test)]
mod tests {
	use super::*;

	fn headers_with(value: &str) -> HeaderMap {
		let mut headers = HeaderMap::new();
		headers.insert(header::AUTHORIZATION, value.parse().unwrap());
		headers
	}

	fn accounts() -> BTreeMap<String, String> {
		let mut map = BTreeMap::new();
		map.insert("admin".to_string(), "hunter2".to_string());
		map
	}

	#[test]
	fn test_valid_credentials() {
		let encoded = BASE64_STANDARD.encode("admin:hunter2");
		let headers = headers_with(&format!("Basic {}", encoded));
		assert!(check(&headers, &accounts()));
	}

	#[test]
	fn test_wrong_password() {
		let encoded = BASE64_STANDARD.encode("admin:letmein");
		let headers = headers_with(&format!("Basic {}", encoded));
		assert!(!check(&headers, &accounts()));
	}

	#[test]
	fn test_unknown_user() {
		let encoded = BASE64_STANDARD.encode("root:hunter2");
		let headers = headers_with(&format!("Basic {}", encoded));
		assert!(!check(&headers, &accounts()));
	}

	#[test]
	fn test_password_may_contain_colons() {
		let mut map = accounts();
		map.insert("svc".to_string(), "a:b:c".to_string());
		let encoded = BASE64_STANDARD.encode("svc:a:b:c");
		let headers = headers_with(&format!("Basic {}", encoded));
		assert!(check(&headers, &map));
	}

	#[test]
	fn test_missing_or_malformed_header() {
		assert!(!check(&HeaderMap::new(), &accounts()));
		assert!(!check(&headers_with("Bearer token"), &accounts()));
		assert!(!check(&headers_with("Basic not-base64!!"), &accounts()));
	}
}
