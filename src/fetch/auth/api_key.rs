use crate::fetch::client::HttpClient;
use anyhow::Result;
use async_trait::async_trait;
use reqwest::header::{HeaderName, HeaderValue};

/// An [`HttpClient`] wrapper that injects a credential as an HTTP header.
pub struct ApiKey<C> {
    inner: C,
    header_name: HeaderName,
    value: HeaderValue,
}

impl<C> ApiKey<C> {
    /// Fails when the header name or value contains forbidden characters.
    pub fn new(inner: C, header_name: &str, value: &str) -> Result<Self> {
        let mut value = HeaderValue::from_str(value)?;
        value.set_sensitive(true);
        Ok(Self {
            inner,
            header_name: HeaderName::from_bytes(header_name.as_bytes())?,
            value,
        })
    }

    /// `Authorization: Bearer <token>`.
    pub fn bearer(inner: C, token: &str) -> Result<Self> {
        Self::new(inner, "Authorization", &format!("Bearer {token}"))
    }
}

#[async_trait]
impl<C: HttpClient> HttpClient for ApiKey<C> {
    async fn execute(&self, mut req: reqwest::Request) -> reqwest::Result<reqwest::Response> {
        req.headers_mut()
            .insert(self.header_name.clone(), self.value.clone());
        self.inner.execute(req).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::BasicClient;

    #[test]
    fn test_bearer_header() {
        let client = ApiKey::bearer(BasicClient::new(), "abc").unwrap();
        assert_eq!(client.header_name, reqwest::header::AUTHORIZATION);
        assert_eq!(client.value.to_str().unwrap(), "Bearer abc");
        assert!(client.value.is_sensitive());
    }

    #[test]
    fn test_rejects_invalid_token() {
        assert!(ApiKey::bearer(BasicClient::new(), "bad\ntoken").is_err());
    }
}
