//! Built-in `url_update` operation.
//!
//! A deliberately modest page fetcher: it retrieves the target URL,
//! optionally discovers same-host links one level deep, and writes one JSON
//! page record per fetch under the output directory. Its purpose is to
//! exercise the full tracked-operation contract (per-page progress,
//! per-page cancellation polls, and a `resume_from` checkpoint) without
//! pulling the scraping subsystem into this repository.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{Map, Value, json};
use url::Url;

use quarry_core::{Operation, OperationContext, OperationError};

/// Upper bound on pages fetched per run, discovery included.
const MAX_PAGES: usize = 25;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct UrlUpdateOperation {
    client: reqwest::Client,
    output_dir: PathBuf,
    checkpoint_sink: Option<Box<dyn Fn(Value) + Send + Sync>>,
}

impl UrlUpdateOperation {
    /// Fetcher writing page records under `output_dir/<dataset_name>/`.
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            client: reqwest::Client::new(),
            output_dir: output_dir.into(),
            checkpoint_sink: None,
        }
    }

    /// Install a sink invoked with the new checkpoint value after each page
    /// is written. The CLI wires this to the tracker so an interrupted run
    /// can skip pages it already has.
    pub fn with_checkpoint_sink(
        mut self,
        sink: impl Fn(Value) + Send + Sync + 'static,
    ) -> Self {
        self.checkpoint_sink = Some(Box::new(sink));
        self
    }

    async fn fetch(&self, url: &str) -> Result<(u16, String), OperationError> {
        let response = self
            .client
            .get(url)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| OperationError::failed(format!("fetch {url}: {e}")))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| OperationError::failed(format!("read {url}: {e}")))?;
        Ok((status, body))
    }

    fn write_record(
        &self,
        dataset_name: &str,
        index: usize,
        url: &str,
        status: u16,
        body: &str,
    ) -> Result<(), OperationError> {
        let dir = self.output_dir.join(dataset_name);
        std::fs::create_dir_all(&dir)
            .map_err(|e| OperationError::failed(format!("create {}: {e}", dir.display())))?;

        let record = json!({
            "url": url,
            "status": status,
            "fetched_at": chrono::Utc::now().to_rfc3339(),
            "content": body,
        });
        let path = dir.join(format!("page-{index:04}.json"));
        std::fs::write(&path, serde_json::to_string_pretty(&record).unwrap_or_default())
            .map_err(|e| OperationError::failed(format!("write {}: {e}", path.display())))
    }
}

/// Absolute same-host links found in `body`, deduplicated, the base URL
/// excluded.
fn discover_links(base: &Url, body: &str) -> Vec<String> {
    // Good enough for link discovery; this is not an HTML parser.
    let href = Regex::new(r#"href=["']([^"'#]+)["']"#).expect("static regex");
    let mut seen = std::collections::BTreeSet::new();
    let mut links = Vec::new();
    for capture in href.captures_iter(body) {
        let Ok(resolved) = base.join(&capture[1]) else {
            continue;
        };
        if resolved.scheme() != "http" && resolved.scheme() != "https" {
            continue;
        }
        if resolved.host_str() != base.host_str() {
            continue;
        }
        let mut resolved = resolved;
        resolved.set_fragment(None);
        if resolved == *base {
            continue;
        }
        let text = resolved.to_string();
        if seen.insert(text.clone()) {
            links.push(text);
        }
    }
    links
}

#[async_trait]
impl Operation for UrlUpdateOperation {
    fn kind(&self) -> &str {
        "url_update"
    }

    async fn run(&self, ctx: OperationContext) -> Result<Map<String, Value>, OperationError> {
        if ctx.cancellation.is_cancelled() {
            return Err(OperationError::Cancelled);
        }

        let url = ctx
            .param_str("url")
            .ok_or_else(|| OperationError::failed("missing 'url' parameter"))?
            .to_string();
        let dataset_name = ctx
            .param_str("dataset_name")
            .unwrap_or("dataset")
            .to_string();
        let recursive = ctx.param_bool("recursive", false);
        let resume_from = ctx
            .checkpoint
            .as_ref()
            .and_then(Value::as_u64)
            .unwrap_or(0) as usize;

        let base = Url::parse(&url)
            .map_err(|e| OperationError::failed(format!("invalid url '{url}': {e}")))?;

        ctx.progress.report(0.0, Some("fetching root page"));
        let (status, body) = self.fetch(&url).await?;

        let mut pages = vec![url.clone()];
        if recursive {
            pages.extend(discover_links(&base, &body));
            pages.truncate(MAX_PAGES);
        }
        let total = pages.len();

        let mut written = 0usize;
        for (index, page) in pages.iter().enumerate() {
            if ctx.cancellation.is_cancelled() {
                tracing::info!(completed = index, total, "Fetch cancelled");
                return Err(OperationError::Cancelled);
            }
            if index < resume_from {
                continue;
            }

            let (status, body) = if index == 0 {
                (status, body.clone())
            } else {
                self.fetch(page).await?
            };
            self.write_record(&dataset_name, index, page, status, &body)?;
            written += 1;

            let percent = (index + 1) as f64 / total as f64 * 100.0;
            ctx.progress
                .report(percent, Some(&format!("fetched {} of {total} pages", index + 1)));
            if let Some(sink) = &self.checkpoint_sink {
                sink(json!(index + 1));
            }
        }

        let mut result = Map::new();
        result.insert("pages".to_string(), json!(total));
        result.insert("fetched".to_string(), json!(written));
        result.insert("dataset".to_string(), json!(dataset_name));
        result.insert(
            "output_dir".to_string(),
            json!(self.output_dir.join(&dataset_name).display().to_string()),
        );
        Ok(result)
    }
}
