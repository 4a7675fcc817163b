//! Snippet suggestions from a chat-completion endpoint.
//!
//! The user's request, a description of every loaded table and an
//! instruction block for the chosen operation are sent as one prompt. The
//! first fenced code block of the reply is the suggested snippet.

use crate::config::Config;
use crate::error::{DashboardError, Result};
use crate::registry::TableRegistry;
use crate::table::PREVIEW_ROWS;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::future::Future;
use std::time::Duration;

lazy_static! {
    static ref CODE_BLOCK: Regex = Regex::new(r"(?s)```[^\n`]*\n(.*?)```").unwrap();
}

/// What the user wants a snippet for. Each kind gets its own instructions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Comparison,
    Formula,
    Formatting,
    Analysis,
}

impl OperationKind {
    fn instructions(&self) -> &'static str {
        match self {
            OperationKind::Comparison => {
                "Task type: comparison. Align the tables on their key columns with `compare` \
                 or `join ... outer`, keep the rows that need attention and store them in a \
                 variable named `result`."
            }
            OperationKind::Formula => {
                "Task type: formula. Compute new or changed columns with `map` or \
                 `name[Column] = expression`, then write the table back with \
                 `save \"<file name>\" = name` and also store it in `result`."
            }
            OperationKind::Formatting => {
                "Task type: formatting. Clean text columns with `format <Column> \
                 upper|lower|title|strip` or the text functions, then write the table back \
                 with `save \"<file name>\" = name` and also store it in `result`."
            }
            OperationKind::Analysis => {
                "Task type: analysis. Use `filter`, `aggregate`, `sort` and `head` to answer \
                 the request, `print` the findings and store the main table in `result`."
            }
        }
    }
}

const LANGUAGE_GUIDE: &str = r#"Write the answer in this pipeline language (it is not Python):
- One statement per line: `name = <pipeline>`, `print <pipeline>`, `save "key" = <pipeline>`, `name[Column] = <expression>`.
- A pipeline starts from `table("file name")` or a variable, followed by verbs, each introduced by `|` (a verb may start a new line).
- Verbs: filter <condition> | map <Column> = <expression> | select <cols> | drop <cols> | rename <Col> as <New>, ... | sort <Col> [asc|desc] | head <n> | join <table> on <Col> [= <OtherCol>] [inner|left|right|outer] | aggregate sum|mean|min|max|count(<Col>) [as Name], ... [by <cols>] | compare <table> on <Ref1> = <Ref2> values <Col1> = <Col2> | format <Col> upper|lower|title|strip | count
- Columns are written as bare names or in brackets when they contain spaces: [Order Total].
- Expressions: numbers, "text", true, false, null, + - * /, & (join as text), == != < <= > >=, and, or, not.
- Functions: upper, lower, title, strip, len, abs, round, concat, coalesce, is_empty, contains.
- Comments start with #."#;

/// Outcome of a suggestion request. Failures are values, never errors.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Suggestion {
    Snippet { code: String },
    Failed { message: String },
}

/// Describe every table for the prompt
///
/// One block per table in registry order: file name, columns, row count and
/// the first rows rendered as text.
pub fn describe_tables(registry: &TableRegistry) -> String {
    registry
        .iter()
        .map(|(name, table)| {
            format!(
                "File: {}\nColumns: {}\nNumber of rows: {}\nSample data:\n{}",
                name,
                table.column_names().join(", "),
                table.row_count(),
                table.render(PREVIEW_ROWS)
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn build_prompt(request: &str, kind: OperationKind, description: &str) -> String {
    format!(
        "{}\n\nData Description:\n{}\n\n{}\n\n{}\n\nReturn the snippet only, in a single code block without extra explanation. Refer to tables by their file names.",
        request.trim(),
        description,
        kind.instructions(),
        LANGUAGE_GUIDE
    )
}

/// First fenced code block of `text`, or all of it when there is none.
pub fn extract_snippet(text: &str) -> String {
    match CODE_BLOCK.captures(text).and_then(|c| c.get(1)) {
        Some(code) => code.as_str().trim().to_string(),
        None => text.trim().to_string(),
    }
}

/// One POST to the completion endpoint.
#[derive(Clone, Debug)]
pub struct CompletionRequest {
    pub url: String,
    pub api_key: String,
    pub body: serde_json::Value,
}

#[derive(Clone, Debug)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

/// Sends completion requests. Implemented over HTTP for the server and by
/// scripted fakes in tests.
pub trait CompletionTransport: Send + Sync {
    fn send(
        &self,
        request: &CompletionRequest,
    ) -> impl Future<Output = Result<TransportResponse>> + Send;
}

pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DashboardError::Config(format!("HTTP client: {}", e)))?;
        Ok(HttpTransport { client })
    }
}

impl CompletionTransport for HttpTransport {
    async fn send(&self, request: &CompletionRequest) -> Result<TransportResponse> {
        let response = self
            .client
            .post(&request.url)
            .bearer_auth(&request.api_key)
            .json(&request.body)
            .send()
            .await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(TransportResponse { status, body })
    }
}

/// Fixed-delay retry on rate limiting.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub attempts: usize,
    pub delay: Duration,
}

pub struct SuggestionGenerator<T> {
    transport: T,
    config: Config,
    retry: RetryPolicy,
}

impl<T: CompletionTransport> SuggestionGenerator<T> {
    pub fn new(transport: T, config: &Config) -> Self {
        SuggestionGenerator {
            transport,
            config: config.clone(),
            retry: RetryPolicy {
                attempts: config.suggest_retries.max(1),
                delay: config.suggest_retry_delay,
            },
        }
    }

    /// Ask for a snippet
    ///
    /// # Arguments
    /// * `request` - What the user wants, in their own words
    /// * `kind` - Which instruction block to send
    /// * `description` - Output of `describe_tables`
    ///
    /// # Returns
    /// * `Suggestion` - The snippet, or a failure message to show
    pub async fn suggest(&self, request: &str, kind: OperationKind, description: &str) -> Suggestion {
        let api_key = match self.config.require_api_key() {
            Ok(key) => key.to_string(),
            Err(err) => {
                log::warn!("suggestion requested without an API key");
                return Suggestion::Failed {
                    message: err.to_string(),
                };
            }
        };
        let request = CompletionRequest {
            url: self.config.api_url.clone(),
            api_key,
            body: json!({
                "model": self.config.model,
                "messages": [
                    {"role": "user", "content": build_prompt(request, kind, description)}
                ]
            }),
        };
        match self.complete(&request).await {
            Ok(text) => Suggestion::Snippet {
                code: extract_snippet(&text),
            },
            Err(err) => {
                log::error!("suggestion failed: {}", err);
                Suggestion::Failed {
                    message: err.to_string(),
                }
            }
        }
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            log::info!(
                "requesting suggestion from {} (attempt {})",
                self.config.model,
                attempt
            );
            let response = self.transport.send(request).await?;
            match response.status {
                200..=299 => return message_content(&response.body),
                429 if attempt < self.retry.attempts => {
                    log::warn!(
                        "rate limited, retrying in {}s ({}/{})",
                        self.retry.delay.as_secs(),
                        attempt,
                        self.retry.attempts
                    );
                    tokio::time::sleep(self.retry.delay).await;
                }
                status => {
                    return Err(DashboardError::Http {
                        status,
                        message: response.body.chars().take(300).collect(),
                    });
                }
            }
        }
    }
}

fn message_content(body: &str) -> Result<String> {
    let value: serde_json::Value = serde_json::from_str(body).map_err(|e| DashboardError::Http {
        status: 200,
        message: format!("response is not JSON: {}", e),
    })?;
    value
        .pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| DashboardError::Http {
            status: 200,
            message: "response has no choices[0].message.content".to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::CellValue;
    use crate::table::Table;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    struct Scripted {
        replies: Mutex<VecDeque<TransportResponse>>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(replies: Vec<(u16, &str)>) -> Self {
            Scripted {
                replies: Mutex::new(
                    replies
                        .into_iter()
                        .map(|(status, body)| TransportResponse {
                            status,
                            body: body.to_string(),
                        })
                        .collect(),
                ),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl CompletionTransport for Scripted {
        async fn send(&self, request: &CompletionRequest) -> Result<TransportResponse> {
            assert_eq!(request.body["model"], "test/model");
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| DashboardError::Network("no scripted reply".into()))
        }
    }

    const DELAY: Duration = Duration::from_secs(5);

    fn scripted(replies: Vec<(u16, &str)>, api_key: Option<&str>) -> SuggestionGenerator<Scripted> {
        let config = Config {
            api_key: api_key.map(str::to_string),
            model: "test/model".to_string(),
            suggest_retry_delay: DELAY,
            ..Config::default()
        };
        SuggestionGenerator::new(Scripted::new(replies), &config)
    }

    const REPLY: &str = r#"{"choices":[{"message":{"content":"Here:\n```text\nprint table(\"a.xlsx\") | count\n```\nDone."}}]}"#;

    #[tokio::test(start_paused = true)]
    async fn rate_limits_are_retried() {
        let generator = scripted(vec![(429, "slow down"), (429, "slow down"), (200, REPLY)], Some("k"));
        let started = Instant::now();
        let suggestion = generator.suggest("count rows", OperationKind::Analysis, "").await;
        assert!(started.elapsed() >= 2 * DELAY, "{:?}", started.elapsed());
        assert_eq!(
            suggestion,
            Suggestion::Snippet {
                code: "print table(\"a.xlsx\") | count".to_string()
            }
        );
        assert_eq!(generator.transport.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_stop_after_the_last_attempt() {
        let generator = scripted(vec![(429, "a"), (429, "b"), (429, "c"), (200, REPLY)], Some("k"));
        let started = Instant::now();
        let suggestion = generator.suggest("x", OperationKind::Formula, "").await;
        // no pause after the final refusal
        let elapsed = started.elapsed();
        assert!(elapsed >= 2 * DELAY && elapsed < 3 * DELAY, "{:?}", elapsed);
        match suggestion {
            Suggestion::Failed { message } => assert!(message.contains("429"), "{}", message),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(generator.transport.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn missing_key_fails_without_a_request() {
        let generator = scripted(vec![(200, REPLY)], None);
        match generator.suggest("x", OperationKind::Comparison, "").await {
            Suggestion::Failed { message } => assert!(message.contains("OPENROUTER_API_KEY")),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(generator.transport.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn server_errors_and_bad_bodies_fail() {
        let generator = scripted(vec![(500, "boom")], Some("k"));
        assert!(matches!(
            generator.suggest("x", OperationKind::Analysis, "").await,
            Suggestion::Failed { .. }
        ));
        let generator = scripted(vec![(200, "{\"choices\":[]}")], Some("k"));
        match generator.suggest("x", OperationKind::Analysis, "").await {
            Suggestion::Failed { message } => assert!(message.contains("choices")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn extract_takes_the_first_block_or_everything() {
        assert_eq!(extract_snippet("a\n```\nx = 1\n```\n```\ny\n```"), "x = 1");
        assert_eq!(extract_snippet("  print t  "), "print t");
    }

    #[test]
    fn description_lists_every_table() {
        let mut registry = TableRegistry::new();
        registry.insert(
            "a.xlsx",
            Table::from_rows(
                vec!["ID".into(), "Score".into()],
                (0..7).map(|i| vec![CellValue::Number(i as f64), 1.0.into()]).collect(),
            ),
        );
        registry.insert("b.xlsx", Table::new(vec!["K".into()]));
        let description = describe_tables(&registry);
        assert!(description.starts_with("File: a.xlsx\nColumns: ID, Score\nNumber of rows: 7\nSample data:\n"));
        assert!(description.contains("... (2 more rows)"));
        assert!(description.contains("File: b.xlsx"));
        assert_eq!(description, describe_tables(&registry));

        let prompt = build_prompt("find gaps", OperationKind::Comparison, &description);
        assert!(prompt.starts_with("find gaps\n\nData Description:\nFile: a.xlsx"));
        assert!(prompt.contains("Task type: comparison"));
    }
}
