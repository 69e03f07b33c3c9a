use async_trait::async_trait;
use log::debug;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use serde::de::DeserializeOwned;
use url::Url;

use crate::config::CalendlyConfig;
use crate::error::{CalendlyError, Result};
use crate::models::{Collection, EventType, Resource, User};

/// The three read endpoints the tools need.
///
/// The token is passed per call; implementations hold no credentials.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CalendlyApi: Send + Sync {
    /// `GET /users/me`
    async fn current_user(&self, token: &str) -> Result<User>;

    /// `GET /event_types?user=<user_uri>`
    async fn event_types(&self, token: &str, user_uri: &str) -> Result<Vec<EventType>>;

    /// `GET /event_types/<id>`
    async fn event_type(&self, token: &str, id: &str) -> Result<EventType>;
}

/// Calendly API v2 client
#[derive(Debug, Clone)]
pub struct CalendlyClient {
    base_url: Url,
    client: reqwest::Client,
}

impl CalendlyClient {
    pub fn new(config: &CalendlyConfig) -> Result<Self> {
        let mut base_url = Url::parse(&config.api_base)?;
        if base_url.cannot_be_a_base() {
            return Err(CalendlyError::Config {
                msg: format!("api_base {} cannot be used as a base URL", config.api_base),
            });
        }
        // Url::join replaces the last segment unless the path ends with '/'
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CalendlyError::Config {
                msg: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self { base_url, client })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(self.base_url.join(path)?)
    }

    fn auth_headers(token: &str) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();

        let mut auth = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| {
            CalendlyError::Config {
                msg: "token contains characters not allowed in an HTTP header".to_string(),
            }
        })?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        Ok(headers)
    }

    /// Authenticated GET, decoding a 2xx body as `T`.
    async fn get_json<T: DeserializeOwned>(
        &self,
        token: &str,
        url: Url,
        query: &[(&str, &str)],
    ) -> Result<T> {
        if token.is_empty() {
            return Err(CalendlyError::EmptyToken);
        }

        debug!("Sending request: GET {}", url);

        let response = self
            .client
            .get(url.clone())
            .headers(Self::auth_headers(token)?)
            .query(query)
            .send()
            .await
            .map_err(|source| {
                let details = if source.is_timeout() {
                    "timeout"
                } else if source.is_connect() {
                    "connection error"
                } else {
                    "request error"
                };
                debug!("Calendly request failed ({}): {} - {}", url, details, source);
                CalendlyError::Http {
                    url: url.clone(),
                    source,
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let err_text = response.text().await.unwrap_or_default();
            debug!(
                "Calendly API error: HTTP {} {} - {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown Status"),
                err_text
            );
            return Err(CalendlyError::from_status(url, status, &err_text));
        }

        debug!("Response OK: {} {}", status.as_u16(), url);

        let bytes = response
            .bytes()
            .await
            .map_err(|source| CalendlyError::Http {
                url: url.clone(),
                source,
            })?;

        serde_json::from_slice(&bytes).map_err(|source| {
            debug!("Failed to parse JSON response from {}: {}", url, source);
            CalendlyError::Decode { url, source }
        })
    }
}

#[async_trait]
impl CalendlyApi for CalendlyClient {
    async fn current_user(&self, token: &str) -> Result<User> {
        let url = self.endpoint("users/me")?;
        let page: Resource<User> = self.get_json(token, url, &[]).await?;
        Ok(page.resource)
    }

    async fn event_types(&self, token: &str, user_uri: &str) -> Result<Vec<EventType>> {
        let url = self.endpoint("event_types")?;
        let page: Collection<EventType> = self.get_json(token, url, &[("user", user_uri)]).await?;
        Ok(page.collection)
    }

    async fn event_type(&self, token: &str, id: &str) -> Result<EventType> {
        let mut url = self.endpoint("event_types/")?;
        url.path_segments_mut()
            .map_err(|_| CalendlyError::Config {
                msg: "api_base cannot be used as a base URL".to_string(),
            })?
            .pop_if_empty()
            .push(id);
        let page: Resource<EventType> = self.get_json(token, url, &[]).await?;
        Ok(page.resource)
    }
}

/// Event type identifier: the last path segment of its URI.
///
/// A bare identifier without any `/` is returned unchanged. Trailing slashes
/// are ignored.
pub fn event_type_id(uri: &str) -> Result<&str> {
    let id = uri
        .trim()
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default();

    if id.is_empty() {
        return Err(CalendlyError::MissingField {
            field: "event type id",
            context: format!("event type URI '{uri}'"),
        });
    }
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(api_base: &str) -> CalendlyClient {
        let config = CalendlyConfig {
            api_base: api_base.to_string(),
            ..Default::default()
        };
        CalendlyClient::new(&config).unwrap()
    }

    #[test]
    fn event_type_id_takes_trailing_segment() {
        assert_eq!(
            event_type_id("https://api.calendly.com/event_types/123").unwrap(),
            "123"
        );
        assert_eq!(
            event_type_id("https://api.calendly.com/event_types/ABC-def/").unwrap(),
            "ABC-def"
        );
        assert_eq!(event_type_id("XYZ").unwrap(), "XYZ");
    }

    #[test]
    fn event_type_id_rejects_empty_input() {
        let err = event_type_id("   ").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
        assert!(event_type_id("/").is_err());
    }

    #[test]
    fn endpoints_keep_base_path() {
        let c = client("http://localhost:9999/v2");
        assert_eq!(
            c.endpoint("users/me").unwrap().as_str(),
            "http://localhost:9999/v2/users/me"
        );

        let c = client("https://api.calendly.com");
        assert_eq!(
            c.endpoint("event_types").unwrap().as_str(),
            "https://api.calendly.com/event_types"
        );
    }

    #[test]
    fn invalid_api_base_is_rejected() {
        let config = CalendlyConfig {
            api_base: "not a url".to_string(),
            ..Default::default()
        };
        assert!(CalendlyClient::new(&config).is_err());
    }

    #[tokio::test]
    async fn empty_token_never_reaches_the_network() {
        // port 9 is discard; the request must not be attempted at all
        let c = client("http://127.0.0.1:9");
        let err = c.current_user("").await.unwrap_err();
        assert!(matches!(err, CalendlyError::EmptyToken));
        assert_eq!(err.kind(), crate::error::ErrorKind::Auth);
    }

    #[test]
    fn auth_header_is_bearer() {
        let headers = CalendlyClient::auth_headers("abc").unwrap();
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer abc");
        assert!(headers.get(AUTHORIZATION).unwrap().is_sensitive());
    }
}
