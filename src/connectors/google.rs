use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use tracing::{debug, warn};

use calmirror_core::{
    CanonicalRecord, ChangeBatch, EventSource, FetchPosition, MirrorError, MirrorResult,
    SyncCursor, normalize_interval,
};

use crate::config::{GoogleConfig, Tokens};

const REDIRECT_PORT: u16 = 8085;
const REDIRECT_URI: &str = "http://localhost:8085/callback";

const SCOPES: &[&str] = &["https://www.googleapis.com/auth/calendar.readonly"];

const AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const EVENTS_URL: &str = "https://www.googleapis.com/calendar/v3/calendars";

/// Events per listing page; the API caps maxResults at 2500
const PAGE_SIZE: u32 = 250;

/// Build the consent URL the user opens in their browser
fn consent_url(config: &GoogleConfig) -> Result<String> {
    let scope = SCOPES.join(" ");
    let url = url::Url::parse_with_params(
        AUTH_URL,
        &[
            ("client_id", config.client_id.as_str()),
            ("redirect_uri", REDIRECT_URI),
            ("response_type", "code"),
            ("scope", scope.as_str()),
            // Offline access so Google issues a refresh token
            ("access_type", "offline"),
            ("prompt", "consent"),
        ],
    )?;
    Ok(url.to_string())
}

/// Start a local HTTP server to receive the OAuth callback
/// Returns the authorization code
fn wait_for_callback() -> Result<String> {
    let listener = TcpListener::bind(format!("127.0.0.1:{}", REDIRECT_PORT))
        .with_context(|| format!("Failed to bind to port {}", REDIRECT_PORT))?;

    println!("Waiting for OAuth callback on port {}...", REDIRECT_PORT);

    let (mut stream, _) = listener.accept().context("Failed to accept connection")?;

    let mut reader = BufReader::new(&stream);
    let mut request_line = String::new();
    reader.read_line(&mut request_line)?;

    // Parse the request to get the code
    // Request line looks like: GET /callback?code=xxx&scope=yyy HTTP/1.1
    let url_part = request_line
        .split_whitespace()
        .nth(1)
        .context("Invalid request")?;

    let url = url::Url::parse(&format!("http://localhost{}", url_part))?;

    let code = url
        .query_pairs()
        .find(|(k, _)| k == "code")
        .map(|(_, v)| v.to_string())
        .context("No code in callback")?;

    // Send a response to the browser
    let response = "HTTP/1.1 200 OK\r\n\
        Content-Type: text/html\r\n\
        Connection: close\r\n\
        \r\n\
        <html><body>\
        <h1>Authentication successful!</h1>\
        <p>You can close this window and return to the terminal.</p>\
        </body></html>";

    stream.write_all(response.as_bytes())?;
    stream.flush()?;

    Ok(code)
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: String,
    #[serde(default)]
    expires_in: i64,
}

/// Calculate expires_at from expires_in
fn expires_at_from(expires_in: i64) -> Option<chrono::DateTime<chrono::Utc>> {
    if expires_in > 0 {
        Some(chrono::Utc::now() + chrono::Duration::seconds(expires_in))
    } else {
        None
    }
}

/// Run the full OAuth authentication flow
pub async fn authenticate(config: &GoogleConfig) -> Result<Tokens> {
    let auth_url = consent_url(config)?;

    println!("\nOpen this URL in your browser to authenticate:\n");
    println!("{}\n", auth_url);

    // Try to open the browser automatically
    if open::that(&auth_url).is_err() {
        println!("(Could not open browser automatically, please copy the URL above)");
    }

    // Wait for the callback
    let code = wait_for_callback()?;

    println!("\nReceived authorization code, exchanging for tokens...");

    let client = reqwest::Client::new();
    let response = client
        .post(TOKEN_URL)
        .form(&[
            ("client_id", config.client_id.as_str()),
            ("client_secret", config.client_secret.as_str()),
            ("code", code.as_str()),
            ("redirect_uri", REDIRECT_URI),
            ("grant_type", "authorization_code"),
        ])
        .send()
        .await
        .context("Failed to reach the token endpoint")?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!("Token exchange failed with {}: {}", status, body);
    }

    let token: TokenResponse = response
        .json()
        .await
        .context("Failed to parse token response")?;

    // Google only issues the refresh token on a fresh consent. Without it
    // every later sync would die as soon as the access token expires.
    if token.refresh_token.is_empty() {
        anyhow::bail!(
            "Google did not return a refresh token.\n\
            Revoke access at https://myaccount.google.com/permissions and run `calmirror-cli auth` again."
        );
    }

    println!("Authentication successful!");

    Ok(Tokens {
        access_token: token.access_token,
        refresh_token: token.refresh_token,
        expires_at: expires_at_from(token.expires_in),
    })
}

/// Refresh an expired access token
pub async fn refresh_access_token(config: &GoogleConfig, tokens: &Tokens) -> Result<Tokens> {
    let client = reqwest::Client::new();
    let response = client
        .post(TOKEN_URL)
        .form(&[
            ("client_id", config.client_id.as_str()),
            ("client_secret", config.client_secret.as_str()),
            ("refresh_token", tokens.refresh_token.as_str()),
            ("grant_type", "refresh_token"),
        ])
        .send()
        .await
        .context("Failed to reach the token endpoint")?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!("Token refresh failed with {}: {}", status, body);
    }

    let token: TokenResponse = response
        .json()
        .await
        .context("Failed to parse token response")?;

    // Google typically doesn't return a new refresh_token on refresh responses,
    // so preserve the original one if the response is empty
    let refresh_token = if token.refresh_token.is_empty() {
        tokens.refresh_token.clone()
    } else {
        token.refresh_token
    };

    Ok(Tokens {
        access_token: token.access_token,
        refresh_token,
        expires_at: expires_at_from(token.expires_in),
    })
}

/// One page of an events listing
#[derive(Debug, Deserialize)]
struct EventsPage {
    #[serde(default)]
    items: Vec<RawEvent>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
    #[serde(rename = "nextSyncToken")]
    next_sync_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(default)]
    id: String,
    #[serde(default)]
    status: String,
    summary: Option<String>,
    location: Option<String>,
    description: Option<String>,
    start: Option<RawEventTime>,
    end: Option<RawEventTime>,
}

#[derive(Debug, Deserialize)]
struct RawEventTime {
    date: Option<String>,
    #[serde(rename = "dateTime")]
    date_time: Option<String>,
}

impl RawEventTime {
    /// The wire value, whichever shape the API used
    fn value(&self) -> Option<&str> {
        self.date.as_deref().or(self.date_time.as_deref())
    }
}

/// What became of one raw event on its way to a canonical record
#[derive(Debug)]
enum Converted {
    Record(CanonicalRecord),
    /// Deletion tombstone; mirroring deletions is out of scope
    Cancelled,
    Dropped { id: String, reason: String },
}

fn convert_event(raw: RawEvent) -> Converted {
    // Incremental listings deliver deletions as cancelled stubs with most
    // fields missing, so check the status before anything else
    if raw.status == "cancelled" {
        return Converted::Cancelled;
    }

    // The id is the join key; without one the record can never be looked
    // up in the sink
    if raw.id.is_empty() {
        return Converted::Dropped {
            id: raw.id,
            reason: "no event id".to_string(),
        };
    }

    let title = match raw.summary.as_deref() {
        Some(s) if !s.is_empty() => s.to_string(),
        _ => {
            return Converted::Dropped {
                id: raw.id,
                reason: "no title".to_string(),
            }
        }
    };

    let start = raw.start.as_ref().and_then(RawEventTime::value);
    let end = raw.end.as_ref().and_then(RawEventTime::value);
    let (start, end) = match (start, end) {
        (Some(start), Some(end)) => (start, end),
        _ => {
            return Converted::Dropped {
                id: raw.id,
                reason: "no usable start/end".to_string(),
            }
        }
    };

    match normalize_interval(start, end) {
        Ok(interval) => Converted::Record(CanonicalRecord {
            external_id: raw.id,
            title,
            interval,
            location: raw.location.unwrap_or_default(),
            description: raw.description.unwrap_or_default(),
        }),
        Err(err) => Converted::Dropped {
            id: raw.id,
            reason: err.to_string(),
        },
    }
}

/// Reads a Google calendar through the sync token protocol: a cursor turns
/// the listing into a changes-only feed, no cursor lists everything.
pub struct GoogleCalendarSource {
    client: reqwest::Client,
    access_token: String,
    calendar_id: String,
}

impl GoogleCalendarSource {
    pub fn new(access_token: String, calendar_id: String) -> Self {
        GoogleCalendarSource {
            client: reqwest::Client::new(),
            access_token,
            calendar_id,
        }
    }

    /// Fetch one page of the events listing
    async fn list_page(
        &self,
        cursor: Option<&SyncCursor>,
        page_token: Option<&str>,
    ) -> MirrorResult<EventsPage> {
        let url = format!(
            "{}/{}/events",
            EVENTS_URL,
            urlencoding::encode(&self.calendar_id)
        );

        let mut query: Vec<(&str, String)> = vec![
            ("maxResults", PAGE_SIZE.to_string()),
            ("singleEvents", "true".to_string()),
        ];
        // Full listings stay unfiltered: the API refuses to issue a sync
        // token when the listing was restricted by time or ordering
        if let Some(cursor) = cursor {
            query.push(("syncToken", cursor.as_str().to_string()));
        }
        if let Some(token) = page_token {
            query.push(("pageToken", token.to_string()));
        }

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.access_token)
            .query(&query)
            .send()
            .await
            .map_err(|e| MirrorError::Source(format!("events request failed: {e}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::GONE {
            return Err(MirrorError::CursorExpired);
        }
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(MirrorError::Auth(
                "Google rejected the access token".to_string(),
            ));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MirrorError::Source(format!(
                "events listing returned {status}: {body}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| MirrorError::Source(format!("malformed events page: {e}")))
    }
}

#[async_trait]
impl EventSource for GoogleCalendarSource {
    async fn fetch_changes(&self, cursor: Option<&SyncCursor>) -> MirrorResult<ChangeBatch> {
        let mut records = Vec::new();
        let mut dropped = 0;
        let mut position = FetchPosition::start(cursor.cloned());

        loop {
            let page = self
                .list_page(position.cursor.as_ref(), position.page_token.as_deref())
                .await?;

            for raw in page.items {
                match convert_event(raw) {
                    Converted::Record(record) => records.push(record),
                    Converted::Cancelled => {}
                    Converted::Dropped { id, reason } => {
                        warn!(external_id = %id, %reason, "dropping unusable event");
                        dropped += 1;
                    }
                }
            }

            match (page.next_page_token, page.next_sync_token) {
                (Some(token), _) => position = position.advance_page(token),
                (None, Some(sync_token)) => {
                    debug!(fetched = records.len(), dropped, "events listing complete");
                    return Ok(ChangeBatch {
                        records,
                        next_cursor: SyncCursor::new(sync_token),
                        dropped,
                    });
                }
                // The API ends every listing with a sync token; a page with
                // neither token means we'd lose our place in the stream
                (None, None) => {
                    return Err(MirrorError::Source(
                        "events listing ended without a sync token".to_string(),
                    ))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use calmirror_core::Interval;
    use serde_json::json;

    fn test_config() -> GoogleConfig {
        GoogleConfig {
            client_id: "client-123.apps.googleusercontent.com".to_string(),
            client_secret: "shh".to_string(),
            calendar_id: "primary".to_string(),
        }
    }

    fn raw_event(value: serde_json::Value) -> RawEvent {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_consent_url_requests_offline_readonly_access() {
        let url = consent_url(&test_config()).unwrap();

        assert!(url.starts_with(AUTH_URL));
        assert!(url.contains("client-123.apps.googleusercontent.com"));
        assert!(url.contains("calendar.readonly"));
        assert!(url.contains("access_type=offline"));
        assert!(url.contains("prompt=consent"));
    }

    #[test]
    fn test_events_page_parses_both_time_shapes() {
        let page: EventsPage = serde_json::from_value(json!({
            "items": [
                {
                    "id": "ev-1",
                    "status": "confirmed",
                    "summary": "Standup",
                    "start": { "dateTime": "2024-03-01T09:00:00+09:00" },
                    "end": { "dateTime": "2024-03-01T09:15:00+09:00" }
                },
                {
                    "id": "ev-2",
                    "status": "confirmed",
                    "summary": "Offsite",
                    "start": { "date": "2024-03-08" },
                    "end": { "date": "2024-03-09" }
                }
            ],
            "nextSyncToken": "token-abc"
        }))
        .unwrap();

        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].start.as_ref().unwrap().value(), Some("2024-03-01T09:00:00+09:00"));
        assert_eq!(page.items[1].start.as_ref().unwrap().value(), Some("2024-03-08"));
        assert_eq!(page.next_page_token, None);
        assert_eq!(page.next_sync_token.as_deref(), Some("token-abc"));
    }

    #[test]
    fn test_convert_builds_timed_record() {
        let converted = convert_event(raw_event(json!({
            "id": "ev-1",
            "status": "confirmed",
            "summary": "Standup",
            "start": { "dateTime": "2024-03-01T09:00:00+09:00" },
            "end": { "dateTime": "2024-03-01T09:15:00+09:00" }
        })));

        match converted {
            Converted::Record(record) => {
                assert_eq!(record.external_id, "ev-1");
                assert_eq!(record.title, "Standup");
                assert_eq!(
                    record.interval,
                    Interval::Timed {
                        start: "2024-03-01T09:00:00.000+09:00".to_string(),
                        end: "2024-03-01T09:15:00.000+09:00".to_string(),
                    }
                );
                // Missing optional fields come through as empty strings
                assert_eq!(record.location, "");
                assert_eq!(record.description, "");
            }
            other => panic!("expected a record, got {other:?}"),
        }
    }

    #[test]
    fn test_convert_builds_all_day_record() {
        let converted = convert_event(raw_event(json!({
            "id": "ev-2",
            "status": "confirmed",
            "summary": "Offsite",
            "location": "Kyoto",
            "start": { "date": "2024-03-08" },
            "end": { "date": "2024-03-09" }
        })));

        match converted {
            Converted::Record(record) => {
                assert_eq!(
                    record.interval,
                    Interval::AllDay {
                        date: chrono::NaiveDate::from_ymd_opt(2024, 3, 8).unwrap(),
                    }
                );
                assert_eq!(record.location, "Kyoto");
            }
            other => panic!("expected a record, got {other:?}"),
        }
    }

    #[test]
    fn test_convert_drops_untitled_events() {
        let converted = convert_event(raw_event(json!({
            "id": "ev-3",
            "status": "confirmed",
            "start": { "date": "2024-03-08" },
            "end": { "date": "2024-03-09" }
        })));

        assert!(matches!(converted, Converted::Dropped { ref id, .. } if id == "ev-3"));
    }

    #[test]
    fn test_convert_drops_events_without_an_id() {
        let converted = convert_event(raw_event(json!({
            "status": "confirmed",
            "summary": "Standup",
            "start": { "dateTime": "2024-03-01T09:00:00+09:00" },
            "end": { "dateTime": "2024-03-01T09:15:00+09:00" }
        })));

        assert!(
            matches!(converted, Converted::Dropped { ref reason, .. } if reason == "no event id")
        );
    }

    #[test]
    fn test_convert_skips_cancelled_tombstones() {
        // Cancelled stubs carry no summary or times; they must not be
        // counted as drops
        let converted = convert_event(raw_event(json!({
            "id": "ev-4",
            "status": "cancelled"
        })));

        assert!(matches!(converted, Converted::Cancelled));
    }

    #[test]
    fn test_convert_drops_malformed_timestamps() {
        let converted = convert_event(raw_event(json!({
            "id": "ev-5",
            "status": "confirmed",
            "summary": "Broken",
            "start": { "dateTime": "tomorrow at noon" },
            "end": { "dateTime": "later" }
        })));

        match converted {
            Converted::Dropped { id, reason } => {
                assert_eq!(id, "ev-5");
                assert!(reason.contains("Malformed timestamp"));
            }
            other => panic!("expected a drop, got {other:?}"),
        }
    }
}
