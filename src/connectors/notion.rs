use async_trait::async_trait;
use serde_json::{json, Value};

use calmirror_core::{
    CanonicalRecord, Lookup, Materialization, MirrorError, MirrorResult, RecordSink, SinkRecord,
    normalize_interval,
};

use crate::config::NotionConfig;

const API_URL: &str = "https://api.notion.com/v1";
const NOTION_VERSION: &str = "2022-06-28";

/// Rate limits and server errors are worth retrying; other rejections are not
fn classify_status(status: reqwest::StatusCode, body: String) -> MirrorError {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        MirrorError::TransientWrite(format!("{status}: {body}"))
    } else if status == reqwest::StatusCode::UNAUTHORIZED {
        MirrorError::Auth("Notion rejected the integration token".to_string())
    } else {
        MirrorError::PermanentWrite(format!("{status}: {body}"))
    }
}

fn text_property(value: &str) -> Value {
    json!({ "rich_text": [{ "text": { "content": value } }] })
}

/// Property payload shared by create and update. The join key is not in
/// here: updates must never rewrite it.
fn content_properties(record: &CanonicalRecord) -> Value {
    json!({
        "Title": {
            "title": [{ "text": { "content": record.title } }]
        },
        "Date": {
            "date": {
                "start": record.interval.start_value(),
                "end": record.interval.end_value(),
            }
        },
        "Location": text_property(&record.location),
        "Description": text_property(&record.description),
    })
}

/// Concatenated plain text of a span array property
fn spans_text(spans: &Value) -> String {
    match spans.as_array() {
        Some(spans) => spans
            .iter()
            .filter_map(|span| {
                span["plain_text"]
                    .as_str()
                    .or_else(|| span["text"]["content"].as_str())
            })
            .collect(),
        None => String::new(),
    }
}

fn rich_text_value(property: &Value) -> String {
    spans_text(&property["rich_text"])
}

fn title_value(property: &Value) -> String {
    spans_text(&property["title"])
}

/// The stored start/end strings of a date property
fn date_values(property: &Value) -> Option<(String, Option<String>)> {
    let date = &property["date"];
    let start = date["start"].as_str()?.to_string();
    let end = date["end"].as_str().map(str::to_string);
    Some((start, end))
}

/// Read a page's mirrored fields back out of its property JSON.
///
/// A date the database reformatted beyond recognition parses to `None`,
/// which compares unequal to every interval and forces a repair write.
fn parse_page(page: &Value) -> SinkRecord {
    let properties = &page["properties"];

    let interval = date_values(&properties["Date"]).and_then(|(start, end)| {
        let end = end.unwrap_or_else(|| start.clone());
        normalize_interval(&start, &end).ok()
    });

    SinkRecord {
        sink_id: page["id"].as_str().unwrap_or_default().to_string(),
        external_id: rich_text_value(&properties["CalendarID"]),
        title: title_value(&properties["Title"]),
        interval,
        location: rich_text_value(&properties["Location"]),
        description: rich_text_value(&properties["Description"]),
    }
}

/// Writes canonical records into a Notion database, one page per event.
///
/// The database needs these properties: `CalendarID` (rich text, holds the
/// event's id), `Title` (title), `Date` (date), `Location` and
/// `Description` (rich text).
pub struct NotionSink {
    client: reqwest::Client,
    api_token: String,
    database_id: String,
}

impl NotionSink {
    pub fn new(config: &NotionConfig) -> Self {
        NotionSink {
            client: reqwest::Client::new(),
            api_token: config.api_token.clone(),
            database_id: config.database_id.clone(),
        }
    }

    /// Issue one API call and map HTTP failures onto the retry taxonomy
    async fn send(&self, request: reqwest::RequestBuilder) -> MirrorResult<Value> {
        let response = request
            .bearer_auth(&self.api_token)
            .header("Notion-Version", NOTION_VERSION)
            .send()
            .await
            .map_err(|e| MirrorError::TransientWrite(format!("request failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| MirrorError::TransientWrite(format!("malformed response: {e}")));
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status, body))
    }
}

#[async_trait]
impl RecordSink for NotionSink {
    async fn find_by_external_id(&self, external_id: &str) -> MirrorResult<Lookup> {
        let body = json!({
            "filter": {
                "property": "CalendarID",
                "rich_text": { "equals": external_id }
            }
        });

        let result = self
            .send(
                self.client
                    .post(format!("{}/databases/{}/query", API_URL, self.database_id))
                    .json(&body),
            )
            .await?;

        let pages = match result["results"].as_array() {
            Some(pages) => pages,
            None => {
                return Err(MirrorError::PermanentWrite(
                    "query response carried no results".to_string(),
                ))
            }
        };

        match pages.len() {
            0 => Ok(Lookup::NotFound),
            1 => Ok(Lookup::Found(parse_page(&pages[0]))),
            n => Ok(Lookup::Ambiguous(n)),
        }
    }

    async fn create(&self, record: &CanonicalRecord) -> MirrorResult<Materialization> {
        let mut properties = content_properties(record);
        // The join key is written once at creation and never touched again
        properties["CalendarID"] = text_property(&record.external_id);

        let body = json!({
            "parent": { "type": "database_id", "database_id": self.database_id },
            "properties": properties,
        });

        let page = self
            .send(self.client.post(format!("{API_URL}/pages")).json(&body))
            .await?;

        let sink_id = page["id"].as_str().unwrap_or_default().to_string();
        if sink_id.is_empty() {
            return Err(MirrorError::PermanentWrite(
                "page response carried no id".to_string(),
            ));
        }

        Ok(Materialization { sink_id })
    }

    async fn update(&self, sink_id: &str, record: &CanonicalRecord) -> MirrorResult<()> {
        let body = json!({ "properties": content_properties(record) });

        self.send(
            self.client
                .patch(format!("{API_URL}/pages/{sink_id}"))
                .json(&body),
        )
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use calmirror_core::Interval;

    fn timed_record() -> CanonicalRecord {
        CanonicalRecord {
            external_id: "ev-1".to_string(),
            title: "Standup".to_string(),
            interval: Interval::Timed {
                start: "2024-03-01T09:00:00.000+09:00".to_string(),
                end: "2024-03-01T09:15:00.000+09:00".to_string(),
            },
            location: "Tokyo".to_string(),
            description: "Daily".to_string(),
        }
    }

    #[test]
    fn test_content_properties_shape() {
        let properties = content_properties(&timed_record());

        assert_eq!(
            properties["Title"]["title"][0]["text"]["content"],
            "Standup"
        );
        assert_eq!(
            properties["Date"]["date"]["start"],
            "2024-03-01T09:00:00.000+09:00"
        );
        assert_eq!(
            properties["Date"]["date"]["end"],
            "2024-03-01T09:15:00.000+09:00"
        );
        assert_eq!(
            properties["Location"]["rich_text"][0]["text"]["content"],
            "Tokyo"
        );

        // Updates reuse this payload, so the join key must not be in it
        assert!(properties.get("CalendarID").is_none());
    }

    #[test]
    fn test_all_day_date_payload_has_no_end() {
        let record = CanonicalRecord {
            interval: Interval::AllDay {
                date: chrono::NaiveDate::from_ymd_opt(2024, 3, 8).unwrap(),
            },
            ..timed_record()
        };

        let properties = content_properties(&record);

        assert_eq!(properties["Date"]["date"]["start"], "2024-03-08");
        assert!(properties["Date"]["date"]["end"].is_null());
    }

    #[test]
    fn test_parse_page_reads_stored_fields_back() {
        let page = json!({
            "id": "page-123",
            "properties": {
                "CalendarID": {
                    "rich_text": [{ "plain_text": "ev-1" }]
                },
                "Title": {
                    "title": [{ "plain_text": "Standup" }]
                },
                "Date": {
                    "date": {
                        "start": "2024-03-01T09:00:00.000+09:00",
                        "end": "2024-03-01T09:15:00.000+09:00"
                    }
                },
                "Location": {
                    "rich_text": [{ "plain_text": "Tokyo" }]
                },
                "Description": {
                    "rich_text": [{ "plain_text": "Daily" }]
                }
            }
        });

        let stored = parse_page(&page);

        assert_eq!(stored.sink_id, "page-123");
        assert_eq!(stored.external_id, "ev-1");
        assert_eq!(stored.title, "Standup");
        assert_eq!(
            stored.interval,
            Some(Interval::Timed {
                start: "2024-03-01T09:00:00.000+09:00".to_string(),
                end: "2024-03-01T09:15:00.000+09:00".to_string(),
            })
        );
        assert_eq!(stored.location, "Tokyo");

        // What we stored reads back equal, so the next cycle skips it
        assert!(timed_record().content_eq(&stored));
    }

    #[test]
    fn test_empty_rich_text_reads_back_as_empty_string() {
        let page = json!({
            "id": "page-123",
            "properties": {
                "Location": { "rich_text": [] }
            }
        });

        assert_eq!(parse_page(&page).location, "");
    }

    #[test]
    fn test_parse_page_reads_all_day_date() {
        let page = json!({
            "id": "page-123",
            "properties": {
                "Date": { "date": { "start": "2024-03-08", "end": null } }
            }
        });

        let stored = parse_page(&page);

        assert_eq!(
            stored.interval,
            Some(Interval::AllDay {
                date: chrono::NaiveDate::from_ymd_opt(2024, 3, 8).unwrap(),
            })
        );
    }

    #[test]
    fn test_unreadable_date_parses_to_none() {
        let page = json!({
            "id": "page-123",
            "properties": {
                "Date": { "date": { "start": "next thursday" } }
            }
        });

        assert_eq!(parse_page(&page).interval, None);
    }

    #[test]
    fn test_status_classification() {
        assert!(classify_status(reqwest::StatusCode::TOO_MANY_REQUESTS, String::new()).is_transient());
        assert!(classify_status(reqwest::StatusCode::BAD_GATEWAY, String::new()).is_transient());
        assert!(!classify_status(reqwest::StatusCode::BAD_REQUEST, String::new()).is_transient());
        assert!(matches!(
            classify_status(reqwest::StatusCode::UNAUTHORIZED, String::new()),
            MirrorError::Auth(_)
        ));
    }
}
