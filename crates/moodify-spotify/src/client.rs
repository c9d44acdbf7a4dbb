//! Spotify Web API client: client-credentials token and track search.

use moodify_core::{CatalogError, TrackCatalog, TrackRecord};
use serde::Deserialize;
use std::fmt;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
const API_BASE_URL: &str = "https://api.spotify.com/v1";
const USER_AGENT: &str = concat!("moodify/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT_SECS: u64 = 30;
/// Refresh the token this long before Spotify says it expires.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Spotify application credentials.
#[derive(Clone)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
}

impl Credentials {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Clone)]
struct AccessToken {
    value: String,
    expires_at: Instant,
}

impl AccessToken {
    fn from_response(response: TokenResponse, now: Instant) -> Self {
        let lifetime = Duration::from_secs(response.expires_in).saturating_sub(TOKEN_EXPIRY_MARGIN);
        Self {
            value: response.access_token,
            expires_at: now + lifetime,
        }
    }

    fn is_fresh(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    tracks: TrackPage,
}

#[derive(Debug, Deserialize)]
struct TrackPage {
    /// Spotify sometimes returns `null` entries for unavailable tracks.
    #[serde(default)]
    items: Vec<Option<TrackItem>>,
}

#[derive(Debug, Deserialize)]
struct TrackItem {
    id: Option<String>,
    name: String,
    #[serde(default)]
    artists: Vec<ArtistItem>,
    #[serde(default)]
    external_urls: ExternalUrls,
}

#[derive(Debug, Deserialize)]
struct ArtistItem {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct ExternalUrls {
    spotify: Option<String>,
}

impl TrackItem {
    fn into_record(self) -> TrackRecord {
        let artist = self
            .artists
            .into_iter()
            .next()
            .map(|a| a.name)
            .unwrap_or_else(|| "Unknown artist".to_string());
        let link = self
            .external_urls
            .spotify
            .or_else(|| self.id.map(|id| format!("https://open.spotify.com/track/{id}")))
            .unwrap_or_default();
        TrackRecord {
            title: self.name,
            artist,
            link,
        }
    }
}

/// Extract track records from a search response body, keeping catalog order.
fn parse_search_response(body: &str, limit: usize) -> Result<Vec<TrackRecord>, CatalogError> {
    let response: SearchResponse =
        serde_json::from_str(body).map_err(|e| CatalogError::Parse(e.to_string()))?;
    Ok(response
        .tracks
        .items
        .into_iter()
        .flatten()
        .take(limit)
        .map(TrackItem::into_record)
        .collect())
}

/// Map a non-success search response to its catalog error.
fn status_error(
    status: reqwest::StatusCode,
    retry_after: Option<&str>,
    body: &str,
) -> Option<CatalogError> {
    if status.is_success() {
        return None;
    }
    Some(match status {
        reqwest::StatusCode::UNAUTHORIZED => CatalogError::Auth("access token rejected".into()),
        reqwest::StatusCode::TOO_MANY_REQUESTS => CatalogError::RateLimited {
            retry_after_secs: retry_after.and_then(|v| v.trim().parse().ok()),
        },
        _ => CatalogError::Api(status.as_u16(), body.trim().to_string()),
    })
}

/// Query parameters for a track search.
fn search_params(query: &str, limit: usize, market: Option<&str>) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("q", query.to_string()),
        ("type", "track".to_string()),
        ("limit", limit.to_string()),
    ];
    if let Some(market) = market {
        params.push(("market", market.to_string()));
    }
    params
}

/// Spotify Web API client.
pub struct SpotifyClient {
    http: reqwest::blocking::Client,
    credentials: Credentials,
    market: Option<String>,
    token: Mutex<Option<AccessToken>>,
}

impl SpotifyClient {
    /// Build a client. No request is made until the first search.
    pub fn new(credentials: Credentials, market: Option<String>) -> Result<Self, CatalogError> {
        if credentials.client_id.is_empty() || credentials.client_secret.is_empty() {
            return Err(CatalogError::Auth("client id and secret are required".into()));
        }

        let http = reqwest::blocking::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| CatalogError::Network(e.to_string()))?;

        Ok(Self {
            http,
            credentials,
            market,
            token: Mutex::new(None),
        })
    }

    /// Return a cached access token, fetching a new one when missing or stale.
    fn access_token(&self) -> Result<String, CatalogError> {
        let mut cached = self
            .token
            .lock()
            .map_err(|_| CatalogError::Auth("token cache poisoned".into()))?;

        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh(Instant::now())) {
            return Ok(token.value.clone());
        }

        tracing::debug!("requesting Spotify access token");

        let response = self
            .http
            .post(TOKEN_URL)
            .basic_auth(&self.credentials.client_id, Some(&self.credentials.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .map_err(|e| CatalogError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            return Err(CatalogError::Auth(format!("HTTP {}: {}", status.as_u16(), text.trim())));
        }

        let body: TokenResponse = response
            .json()
            .map_err(|e| CatalogError::Parse(e.to_string()))?;
        let token = AccessToken::from_response(body, Instant::now());
        let value = token.value.clone();
        *cached = Some(token);

        tracing::info!("obtained Spotify access token");
        Ok(value)
    }

    fn invalidate_token(&self) {
        if let Ok(mut cached) = self.token.lock() {
            *cached = None;
        }
    }
}

impl TrackCatalog for SpotifyClient {
    fn search_tracks(&self, query: &str, limit: usize) -> Result<Vec<TrackRecord>, CatalogError> {
        let token = self.access_token()?;
        let params = search_params(query, limit, self.market.as_deref());

        tracing::debug!(query, limit, "searching Spotify");

        let response = self
            .http
            .get(format!("{API_BASE_URL}/search"))
            .bearer_auth(token)
            .query(&params)
            .send()
            .map_err(|e| CatalogError::Network(e.to_string()))?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let text = response
            .text()
            .map_err(|e| CatalogError::Network(e.to_string()))?;

        if let Some(err) = status_error(status, retry_after.as_deref(), &text) {
            if matches!(err, CatalogError::Auth(_)) {
                self.invalidate_token();
            }
            return Err(err);
        }

        parse_search_response(&text, limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEARCH_BODY: &str = r#"{
        "tracks": {
            "href": "https://api.spotify.com/v1/search?query=genre%3Apop&type=track&offset=0&limit=5",
            "items": [
                {
                    "id": "1",
                    "name": "First Song",
                    "artists": [{"name": "Lead Artist"}, {"name": "Featured"}],
                    "external_urls": {"spotify": "https://open.spotify.com/track/1"}
                },
                {
                    "id": "2",
                    "name": "Second Song",
                    "artists": [{"name": "Solo"}],
                    "external_urls": {"spotify": "https://open.spotify.com/track/2"}
                }
            ],
            "total": 2
        }
    }"#;

    #[test]
    fn test_parse_search_response() {
        let tracks = parse_search_response(SEARCH_BODY, 5).unwrap();
        assert_eq!(tracks.len(), 2);
        assert_eq!(
            tracks[0],
            TrackRecord {
                title: "First Song".into(),
                artist: "Lead Artist".into(),
                link: "https://open.spotify.com/track/1".into(),
            }
        );
        assert_eq!(tracks[1].artist, "Solo");
    }

    #[test]
    fn test_parse_respects_limit() {
        let tracks = parse_search_response(SEARCH_BODY, 1).unwrap();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].title, "First Song");
    }

    #[test]
    fn test_parse_missing_artist_and_link() {
        let body = r#"{"tracks": {"items": [{"id": "abc", "name": "Lonely"}]}}"#;
        let tracks = parse_search_response(body, 5).unwrap();
        assert_eq!(tracks[0].artist, "Unknown artist");
        assert_eq!(tracks[0].link, "https://open.spotify.com/track/abc");
    }

    #[test]
    fn test_parse_empty_and_invalid() {
        let empty = parse_search_response(r#"{"tracks": {"items": []}}"#, 5).unwrap();
        assert!(empty.is_empty());
        assert!(matches!(
            parse_search_response(r#"{"error": {"status": 400}}"#, 5),
            Err(CatalogError::Parse(_))
        ));
    }

    #[test]
    fn test_parse_skips_null_items() {
        let body = r#"{"tracks": {"items": [
            null,
            {"id": "a", "name": "Kept", "artists": [{"name": "X"}]},
            null,
            {"id": "b", "name": "Also kept"}
        ]}}"#;
        let tracks = parse_search_response(body, 5).unwrap();
        let titles: Vec<_> = tracks.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["Kept", "Also kept"]);

        let limited = parse_search_response(body, 1).unwrap();
        assert_eq!(limited[0].title, "Kept");
    }

    #[test]
    fn test_status_error_mapping() {
        use reqwest::StatusCode;

        assert!(status_error(StatusCode::OK, None, "{}").is_none());
        assert!(matches!(
            status_error(StatusCode::UNAUTHORIZED, None, ""),
            Some(CatalogError::Auth(_))
        ));
        assert!(matches!(
            status_error(StatusCode::TOO_MANY_REQUESTS, Some("7"), ""),
            Some(CatalogError::RateLimited {
                retry_after_secs: Some(7)
            })
        ));
        assert!(matches!(
            status_error(StatusCode::TOO_MANY_REQUESTS, None, ""),
            Some(CatalogError::RateLimited {
                retry_after_secs: None
            })
        ));
        assert!(matches!(
            status_error(StatusCode::TOO_MANY_REQUESTS, Some("soon"), ""),
            Some(CatalogError::RateLimited {
                retry_after_secs: None
            })
        ));
        match status_error(StatusCode::INTERNAL_SERVER_ERROR, None, "  upstream down \n") {
            Some(CatalogError::Api(500, body)) => assert_eq!(body, "upstream down"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_invalidate_token_clears_cache() {
        let client = SpotifyClient::new(Credentials::new("id", "secret"), None).unwrap();
        *client.token.lock().unwrap() = Some(AccessToken {
            value: "cached".into(),
            expires_at: Instant::now() + Duration::from_secs(600),
        });
        assert_eq!(client.access_token().unwrap(), "cached");

        client.invalidate_token();
        assert!(client.token.lock().unwrap().is_none());
    }

    #[test]
    fn test_search_params() {
        let params = search_params("genre:pop", 5, None);
        assert_eq!(
            params,
            vec![
                ("q", "genre:pop".to_string()),
                ("type", "track".to_string()),
                ("limit", "5".to_string()),
            ]
        );
        let with_market = search_params("genre:edm", 5, Some("US"));
        assert_eq!(with_market.last(), Some(&("market", "US".to_string())));
    }

    #[test]
    fn test_token_freshness() {
        let now = Instant::now();
        let token = AccessToken::from_response(
            TokenResponse {
                access_token: "abc".into(),
                expires_in: 3600,
            },
            now,
        );
        assert!(token.is_fresh(now));
        assert!(token.is_fresh(now + Duration::from_secs(3500)));
        assert!(!token.is_fresh(now + Duration::from_secs(3550)));
    }

    #[test]
    fn test_short_lived_token_is_immediately_stale() {
        let now = Instant::now();
        let token = AccessToken::from_response(
            TokenResponse {
                access_token: "abc".into(),
                expires_in: 30,
            },
            now,
        );
        assert!(!token.is_fresh(now));
    }

    #[test]
    fn test_credentials_debug_redacts_secret() {
        let creds = Credentials::new("id123", "supersecret");
        let debug = format!("{creds:?}");
        assert!(debug.contains("id123"));
        assert!(!debug.contains("supersecret"));
    }

    #[test]
    fn test_new_requires_credentials() {
        let result = SpotifyClient::new(Credentials::new("", "secret"), None);
        assert!(matches!(result, Err(CatalogError::Auth(_))));
    }
}
