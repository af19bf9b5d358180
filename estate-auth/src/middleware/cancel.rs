use axum::{
    extract::{FromRequestParts, Request},
    http::request::Parts,
    middleware::Next,
    response::Response,
};
use std::convert::Infallible;
use tokio_util::sync::CancellationToken;

/// Cancellation signal for the current request. Store calls made on behalf
/// of the request observe it and give up once the client has gone away.
#[derive(Debug, Clone)]
pub struct RequestCancel(pub CancellationToken);

/// Attach a fresh token to every request. The token is cancelled when the
/// request future completes or is dropped mid-flight.
pub async fn cancellation_middleware(mut req: Request, next: Next) -> Response {
    let token = CancellationToken::new();
    let _guard = token.clone().drop_guard();
    req.extensions_mut().insert(RequestCancel(token));
    next.run(req).await
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for RequestCancel
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<RequestCancel>()
            .cloned()
            .unwrap_or_else(|| RequestCancel(CancellationToken::new())))
    }
}
