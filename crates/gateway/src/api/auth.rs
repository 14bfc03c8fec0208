//! HTTP Basic-auth extraction wired into the permission lattice.
//!
//! A request with no `Authorization` header resolves to an empty username
//! and password, which `get_permission` maps to `all` when no `[auth]`
//! section is configured, or `""` (deny everything) when the section is
//! present but doesn't match. A denied request always comes back as a 401
//! carrying a Basic-auth challenge, never a 403: the client's one recourse
//! is to supply different credentials.

use axum::http::HeaderMap;
use base64::Engine;
use wsb_engine::permissions::{get_permission, verify_authorization, Action, Permission};

use crate::state::AppState;

pub fn permission_for(state: &AppState, headers: &HeaderMap) -> Permission {
    let (user, pass) = basic_credentials(headers).unwrap_or_default();
    get_permission(state.config.auth.as_ref(), &user, &pass)
}

fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let raw = headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?;
    let encoded = raw.strip_prefix("Basic ")?;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .ok()?;
    let text = String::from_utf8(decoded).ok()?;
    let (user, pass) = text.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

/// Enforces the authorization matrix for `action`. Returns `Unauthenticated`
/// on any denial — view-tier or mutating-tier alike — per the permission
/// gate's single-challenge contract.
pub fn authorize(state: &AppState, headers: &HeaderMap, action: Action) -> wsb_domain::Result<()> {
    let perm = permission_for(state, headers);
    if verify_authorization(perm, action) {
        Ok(())
    } else {
        Err(wsb_domain::Error::Unauthenticated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn missing_header_yields_empty_credentials() {
        let headers = HeaderMap::new();
        assert_eq!(basic_credentials(&headers), None);
    }

    #[test]
    fn decodes_basic_header() {
        let mut headers = HeaderMap::new();
        let encoded = base64::engine::general_purpose::STANDARD.encode("bob:secret");
        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Basic {encoded}")).unwrap(),
        );
        assert_eq!(
            basic_credentials(&headers),
            Some(("bob".to_string(), "secret".to_string()))
        );
    }

    #[test]
    fn unknown_verb_denies_every_permission_except_all() {
        assert!(!verify_authorization(Permission::Read, Action::Unknown));
        assert!(verify_authorization(Permission::All, Action::Unknown));
    }
}
