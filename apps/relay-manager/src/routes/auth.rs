use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap},
};

use crate::state::Actor;

use super::ApiError;

pub const USER_HEADER: &str = "x-relay-user-id";
pub const WORKSPACE_HEADER: &str = "x-relay-workspace-id";

#[async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        extract_actor(&parts.headers).ok_or(ApiError::Unauthorized)
    }
}

fn extract_actor(headers: &HeaderMap) -> Option<Actor> {
    Some(Actor {
        user_id: header_value(headers, USER_HEADER)?,
        workspace_id: header_value(headers, WORKSPACE_HEADER)?,
    })
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn requires_both_identity_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_HEADER, HeaderValue::from_static("u1"));
        assert!(extract_actor(&headers).is_none());

        headers.insert(WORKSPACE_HEADER, HeaderValue::from_static(" w1 "));
        let actor = extract_actor(&headers).unwrap();
        assert_eq!(actor.user_id, "u1");
        assert_eq!(actor.workspace_id, "w1");

        headers.insert(USER_HEADER, HeaderValue::from_static("  "));
        assert!(extract_actor(&headers).is_none());
    }
}
