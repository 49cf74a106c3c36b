use std::fmt;
use std::net::SocketAddr;

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::request::Parts;

use crate::AppError;

/// Who a request is from, without accounts: the first `X-Forwarded-For`
/// hop when a proxy supplied one, otherwise the peer address. Used as
/// the submission key and for creator checks, nothing stronger.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientIdentity(pub String);

impl ClientIdentity {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<S> FromRequestParts<S> for ClientIdentity
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(forwarded) = parts.headers.get("x-forwarded-for") {
            let value = forwarded
                .to_str()
                .map_err(|_| AppError::BadRequest("invalid x-forwarded-for header".into()))?;
            if let Some(first) = value
                .split(',')
                .next()
                .map(str::trim)
                .filter(|addr| !addr.is_empty())
            {
                return Ok(Self(first.to_owned()));
            }
        }

        let ConnectInfo(addr) = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .copied()
            .ok_or_else(|| AppError::BadRequest("client address unavailable".into()))?;
        Ok(Self(addr.ip().to_string()))
    }
}
