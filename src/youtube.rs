/// YouTube Data API v3 live chat source.
///
/// `ChatService` is the seam between the tally pipeline and the network:
/// `YouTubeClient` talks to the real API with a blocking ureq agent, tests
/// plug in a scripted fake. Pagination and chat-id resolution are written
/// against the trait so they never see HTTP.

use crate::error::TallyError;
use chrono::{DateTime, FixedOffset};
use std::time::Duration;

/// A single chat message, timestamp already shifted to the configured offset.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub author: String,
    pub text: String,
    pub timestamp: DateTime<FixedOffset>,
}

/// One page of `liveChatMessages.list`.
#[derive(Debug, Clone, Default)]
pub struct MessagePage {
    pub messages: Vec<ChatMessage>,
    /// Cursor for the next page. `None` once the service reports no more pages.
    pub next_page_token: Option<String>,
}

/// Request/response access to the live chat API.
pub trait ChatService {
    /// Active live chat id of a video, `None` if the video is unknown or not live.
    fn active_live_chat_id(&self, video_id: &str) -> Result<Option<String>, TallyError>;

    /// Fetch one page of messages, starting at `page_token` (first page when `None`).
    fn list_messages(
        &self,
        live_chat_id: &str,
        page_token: Option<&str>,
    ) -> Result<MessagePage, TallyError>;
}

// ── Public API ──────────────────────────────────────────────────────

/// Resolve a video id to its active live chat id.
pub fn resolve_live_chat_id(
    service: &dyn ChatService,
    video_id: &str,
) -> Result<String, TallyError> {
    log::info!("Resolving live chat for video {video_id}");
    match service.active_live_chat_id(video_id)? {
        Some(id) => {
            log::info!("Live chat id: {id}");
            Ok(id)
        }
        None => Err(TallyError::NotFound(format!(
            "video {video_id} has no active live chat"
        ))),
    }
}

/// Pull every available message page, in delivery order.
///
/// Follows continuation tokens until the service returns none, or until
/// `max_pages`. Once at least one message has arrived, an empty page also
/// ends the loop: the chat is caught up, and YouTube keeps handing out tokens
/// for messages that do not exist yet. Empty pages before that are followed.
/// A failed request ends the loop and the messages gathered so far are returned.
pub fn fetch_all_messages(
    service: &dyn ChatService,
    live_chat_id: &str,
    max_pages: u32,
) -> Vec<ChatMessage> {
    let mut messages = Vec::new();
    let mut page_token: Option<String> = None;
    let mut pages = 0u32;

    loop {
        if pages >= max_pages {
            log::warn!("Stopped after {max_pages} pages; later messages were not fetched");
            break;
        }

        let page = match service.list_messages(live_chat_id, page_token.as_deref()) {
            Ok(p) => p,
            Err(e) => {
                log::warn!(
                    "Message fetch failed after {pages} page(s): {e}. Continuing with {} message(s).",
                    messages.len()
                );
                break;
            }
        };
        pages += 1;

        let count = page.messages.len();
        log::debug!("Page {pages}: {count} message(s)");
        messages.extend(page.messages);

        page_token = page.next_page_token.filter(|t| !t.is_empty());
        if page_token.is_none() {
            break;
        }
        if count == 0 && !messages.is_empty() {
            log::debug!("Empty page after {} message(s), chat is caught up", messages.len());
            break;
        }
    }

    log::info!("Fetched {} message(s) in {pages} page(s)", messages.len());
    messages
}

// ── HTTP client ─────────────────────────────────────────────────────

/// Blocking YouTube Data API client.
pub struct YouTubeClient {
    agent: ureq::Agent,
    base_url: String,
    api_key: String,
    max_results: u32,
    offset: FixedOffset,
}

impl YouTubeClient {
    pub fn new(
        base_url: &str,
        api_key: &str,
        max_results: u32,
        timeout: Duration,
        offset: FixedOffset,
    ) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build();
        Self {
            agent: ureq::Agent::new_with_config(config),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            max_results,
            offset,
        }
    }

    fn get_json(&self, path: &str, query: &[(&str, &str)]) -> Result<serde_json::Value, TallyError> {
        let url = format!("{}/{path}", self.base_url);
        let mut request = self
            .agent
            .get(&url)
            .header("User-Agent", concat!("study-tally/", env!("CARGO_PKG_VERSION")))
            .header("Accept", "application/json");
        for (k, v) in query {
            request = request.query(*k, *v);
        }
        let body: String = request
            .query("key", &self.api_key)
            .call()?
            .body_mut()
            .read_to_string()?;
        log::trace!("GET {path} → {body}");

        serde_json::from_str(&body).map_err(|e| TallyError::Parse(format!("{path}: {e}")))
    }
}

impl ChatService for YouTubeClient {
    fn active_live_chat_id(&self, video_id: &str) -> Result<Option<String>, TallyError> {
        let json = self.get_json(
            "videos",
            &[("part", "liveStreamingDetails"), ("id", video_id)],
        )?;
        Ok(parse_active_chat_id(&json))
    }

    fn list_messages(
        &self,
        live_chat_id: &str,
        page_token: Option<&str>,
    ) -> Result<MessagePage, TallyError> {
        let max_results = self.max_results.to_string();
        let mut query = vec![
            ("liveChatId", live_chat_id),
            ("part", "snippet,authorDetails"),
            ("maxResults", max_results.as_str()),
        ];
        if let Some(token) = page_token {
            query.push(("pageToken", token));
        }
        let json = self.get_json("liveChat/messages", &query)?;
        parse_message_page(&json, self.offset)
    }
}

// ── Response parsing ────────────────────────────────────────────────

/// Extract `items[0].liveStreamingDetails.activeLiveChatId`.
fn parse_active_chat_id(json: &serde_json::Value) -> Option<String> {
    json.get("items")?
        .as_array()?
        .first()?
        .get("liveStreamingDetails")?
        .get("activeLiveChatId")?
        .as_str()
        .filter(|id| !id.is_empty())
        .map(String::from)
}

/// Map a `liveChatMessages.list` response to a page. Items without an
/// author, text or parseable timestamp are skipped.
fn parse_message_page(
    json: &serde_json::Value,
    offset: FixedOffset,
) -> Result<MessagePage, TallyError> {
    let items = json
        .get("items")
        .and_then(|v| v.as_array())
        .ok_or_else(|| TallyError::Parse("message list without items".into()))?;

    let mut messages = Vec::with_capacity(items.len());
    for item in items {
        match parse_message(item, offset) {
            Some(m) => messages.push(m),
            None => log::debug!(
                "Skipping chat item without author/text/time: {}",
                item.get("id").and_then(|v| v.as_str()).unwrap_or("?")
            ),
        }
    }

    let next_page_token = json
        .get("nextPageToken")
        .and_then(|v| v.as_str())
        .filter(|t| !t.is_empty())
        .map(String::from);

    Ok(MessagePage {
        messages,
        next_page_token,
    })
}

fn parse_message(item: &serde_json::Value, offset: FixedOffset) -> Option<ChatMessage> {
    let snippet = item.get("snippet")?;
    let author = item
        .get("authorDetails")
        .and_then(|a| a.get("displayName"))
        .or_else(|| snippet.get("authorDisplayName"))
        .and_then(|v| v.as_str())?;
    let text = snippet.get("displayMessage").and_then(|v| v.as_str())?;
    let published = snippet.get("publishedAt").and_then(|v| v.as_str())?;
    let timestamp = DateTime::parse_from_rfc3339(published)
        .ok()?
        .with_timezone(&offset);

    Some(ChatMessage {
        author: author.to_string(),
        text: text.to_string(),
        timestamp,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    /// Scripted `ChatService`: hands out queued page results in order and
    /// records the token each call was made with.
    #[derive(Default)]
    pub(crate) struct FakeChat {
        pub chat_id: Option<String>,
        pub pages: RefCell<VecDeque<Result<MessagePage, TallyError>>>,
        pub calls: RefCell<Vec<Option<String>>>,
    }

    impl FakeChat {
        pub fn with_pages(pages: Vec<Result<MessagePage, TallyError>>) -> Self {
            Self {
                chat_id: Some("chat-1".into()),
                pages: RefCell::new(pages.into()),
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl ChatService for FakeChat {
        fn active_live_chat_id(&self, _video_id: &str) -> Result<Option<String>, TallyError> {
            Ok(self.chat_id.clone())
        }

        fn list_messages(
            &self,
            _live_chat_id: &str,
            page_token: Option<&str>,
        ) -> Result<MessagePage, TallyError> {
            self.calls.borrow_mut().push(page_token.map(String::from));
            self.pages
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Ok(MessagePage::default()))
        }
    }

    pub(crate) fn jst() -> FixedOffset {
        FixedOffset::east_opt(9 * 3600).unwrap()
    }

    pub(crate) fn message(author: &str, text: &str, rfc3339: &str) -> ChatMessage {
        ChatMessage {
            author: author.into(),
            text: text.into(),
            timestamp: DateTime::parse_from_rfc3339(rfc3339)
                .unwrap()
                .with_timezone(&jst()),
        }
    }

    fn page(messages: Vec<ChatMessage>, token: Option<&str>) -> MessagePage {
        MessagePage {
            messages,
            next_page_token: token.map(String::from),
        }
    }

    #[test]
    fn follows_tokens_until_exhausted() {
        let fake = FakeChat::with_pages(vec![
            Ok(page(vec![message("A", "開始", "2024-05-01T00:00:00Z")], Some("X"))),
            Ok(page(
                vec![
                    message("B", "開始", "2024-05-01T00:00:05Z"),
                    message("A", "終了", "2024-05-01T00:01:05Z"),
                ],
                None,
            )),
        ]);
        let messages = fetch_all_messages(&fake, "chat-1", 10);
        assert_eq!(*fake.calls.borrow(), vec![None, Some("X".to_string())]);
        let authors: Vec<_> = messages.iter().map(|m| m.author.as_str()).collect();
        assert_eq!(authors, vec!["A", "B", "A"]);
    }

    #[test]
    fn failure_returns_partial_result() {
        let fake = FakeChat::with_pages(vec![
            Ok(page(vec![message("A", "開始", "2024-05-01T00:00:00Z")], Some("X"))),
            Err(TallyError::Request("503 Service Unavailable".into())),
            Ok(page(vec![message("A", "終了", "2024-05-01T00:10:00Z")], None)),
        ]);
        let messages = fetch_all_messages(&fake, "chat-1", 10);
        assert_eq!(messages.len(), 1);
        assert_eq!(fake.calls.borrow().len(), 2);
    }

    #[test]
    fn empty_page_and_empty_token_end_pagination() {
        let fake = FakeChat::with_pages(vec![
            Ok(page(vec![message("A", "hi", "2024-05-01T00:00:00Z")], Some("X"))),
            Ok(page(vec![], Some("Y"))),
        ]);
        fetch_all_messages(&fake, "chat-1", 10);
        assert_eq!(fake.calls.borrow().len(), 2);

        let fake = FakeChat::with_pages(vec![Ok(page(
            vec![message("A", "hi", "2024-05-01T00:00:00Z")],
            Some(""),
        ))]);
        fetch_all_messages(&fake, "chat-1", 10);
        assert_eq!(fake.calls.borrow().len(), 1);
    }

    #[test]
    fn leading_empty_page_is_followed() {
        let fake = FakeChat::with_pages(vec![
            Ok(page(vec![], Some("X"))),
            Ok(page(
                vec![
                    message("A", "開始", "2024-05-01T00:00:00Z"),
                    message("A", "終了", "2024-05-01T00:30:00Z"),
                ],
                None,
            )),
        ]);
        let messages = fetch_all_messages(&fake, "chat-1", 10);
        assert_eq!(*fake.calls.borrow(), vec![None, Some("X".to_string())]);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].text, "開始");
    }

    #[test]
    fn empty_pages_only_stop_at_the_cap() {
        let pages: Vec<Result<MessagePage, TallyError>> = (0..10)
            .map(|i| Ok(page(vec![], Some(format!("T{i}").as_str()))))
            .collect();
        let fake = FakeChat::with_pages(pages);
        assert!(fetch_all_messages(&fake, "chat-1", 4).is_empty());
        assert_eq!(fake.calls.borrow().len(), 4);
    }

    #[test]
    fn page_cap_is_respected() {
        let pages: Vec<Result<MessagePage, TallyError>> = (0..5)
            .map(|i| {
                Ok(page(
                    vec![message("A", "hi", "2024-05-01T00:00:00Z")],
                    Some(format!("T{i}").as_str()),
                ))
            })
            .collect();
        let fake = FakeChat::with_pages(pages);
        let messages = fetch_all_messages(&fake, "chat-1", 3);
        assert_eq!(messages.len(), 3);
    }

    #[test]
    fn resolve_reports_missing_chat() {
        let fake = FakeChat::default();
        assert!(matches!(
            resolve_live_chat_id(&fake, "vid"),
            Err(TallyError::NotFound(_))
        ));
        let fake = FakeChat::with_pages(vec![]);
        assert_eq!(resolve_live_chat_id(&fake, "vid").unwrap(), "chat-1");
    }

    #[test]
    fn parses_video_details() {
        let json: serde_json::Value = serde_json::from_str(
            r#"{"kind":"youtube#videoListResponse","items":[{"id":"abc","liveStreamingDetails":{"actualStartTime":"2024-05-01T00:00:00Z","activeLiveChatId":"Cg0KC2FiYw"}}]}"#,
        )
        .unwrap();
        assert_eq!(parse_active_chat_id(&json), Some("Cg0KC2FiYw".to_string()));

        let ended: serde_json::Value = serde_json::from_str(
            r#"{"items":[{"id":"abc","liveStreamingDetails":{"actualEndTime":"2024-05-01T03:00:00Z"}}]}"#,
        )
        .unwrap();
        assert_eq!(parse_active_chat_id(&ended), None);

        let empty: serde_json::Value = serde_json::from_str(r#"{"items":[]}"#).unwrap();
        assert_eq!(parse_active_chat_id(&empty), None);
    }

    #[test]
    fn parses_message_page() {
        let json: serde_json::Value = serde_json::from_str(
            r#"{
                "nextPageToken": "GO0",
                "pollingIntervalMillis": 5000,
                "items": [
                    {"id":"m1","snippet":{"type":"textMessageEvent","publishedAt":"2024-05-01T14:59:30.123456+00:00","displayMessage":"開始"},"authorDetails":{"displayName":"Alice"}},
                    {"id":"m2","snippet":{"publishedAt":"2024-05-01T15:00:00Z","displayMessage":"終了","authorDisplayName":"Bob"}},
                    {"id":"m3","snippet":{"type":"tombstone","publishedAt":"2024-05-01T15:00:01Z"}}
                ]
            }"#,
        )
        .unwrap();
        let page = parse_message_page(&json, jst()).unwrap();
        assert_eq!(page.next_page_token.as_deref(), Some("GO0"));
        assert_eq!(page.messages.len(), 2);
        assert_eq!(page.messages[0].author, "Alice");
        assert_eq!(page.messages[1].author, "Bob");
        // 15:00Z is midnight the next day in JST
        assert_eq!(
            page.messages[1].timestamp.to_rfc3339(),
            "2024-05-02T00:00:00+09:00"
        );
    }

    #[test]
    fn page_without_items_is_a_parse_error() {
        let json: serde_json::Value =
            serde_json::from_str(r#"{"error":{"code":403,"message":"quota"}}"#).unwrap();
        assert!(matches!(
            parse_message_page(&json, jst()),
            Err(TallyError::Parse(_))
        ));
    }
}
