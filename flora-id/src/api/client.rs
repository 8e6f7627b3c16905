//! Client identity extractor

use crate::admission::{client_identity, credential_from_headers};
use crate::pipeline::ClientContext;
use axum::async_trait;
use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::request::Parts;
use std::convert::Infallible;
use std::net::SocketAddr;

#[async_trait]
impl<S> FromRequestParts<S> for ClientContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        // Absent when the router is driven without a socket (tests)
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);

        Ok(ClientContext::new(client_identity(&parts.headers, peer))
            .with_credential(credential_from_headers(&parts.headers)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    #[tokio::test]
    async fn test_identity_from_headers_and_socket() {
        let mut request = Request::builder()
            .header("x-forwarded-for", "198.51.100.4")
            .header("x-api-key", "k1")
            .body(())
            .unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo("127.0.0.1:9000".parse::<SocketAddr>().unwrap()));
        let (mut parts, _) = request.into_parts();

        let client = ClientContext::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(client.client_id, "198.51.100.4");
        assert_eq!(client.credential.as_deref(), Some("k1"));
    }

    #[tokio::test]
    async fn test_unknown_without_socket() {
        let (mut parts, _) = Request::builder().body(()).unwrap().into_parts();
        let client = ClientContext::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(client.client_id, "unknown");
        assert!(client.credential.is_none());
    }
}
