//! Source documents: chunking into text units and store access
//!
//! `Chunker` splits Markdown along block boundaries. `DocumentGateway`
//! reads documents through the document cache and applies partial
//! updates with an ordered list of fallback strategies.

use crate::cache::{apply_partial_update, TwoTierCache};
use crate::context::truncate;
use crate::store::{DocumentStore, StoreError};
use pulldown_cmark::{Event, Options, Parser, Tag};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::ops::Range;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One unit of text handed to the orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextUnit {
    /// Position in the document, starting at 0
    pub index: usize,
    pub content: String,
    /// Nearest heading above the unit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<String>,
}

/// Splits Markdown into ordered text units of at most `max_chars` characters
#[derive(Debug, Clone)]
pub struct Chunker {
    max_chars: usize,
}

struct Block {
    range: Range<usize>,
    heading: Option<String>,
}

impl Chunker {
    pub fn new(max_chars: usize) -> Self {
        Self {
            max_chars: max_chars.max(1),
        }
    }

    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    /// Chunk `text`. Headings start a new unit; short blocks are packed
    /// together; a block longer than the limit is split on the best
    /// boundary. Blank input yields no units.
    pub fn chunk(&self, text: &str) -> Vec<TextUnit> {
        let mut units: Vec<TextUnit> = Vec::new();
        let mut current = String::new();
        let mut heading: Option<String> = None;

        let flush = |current: &mut String, heading: &Option<String>, units: &mut Vec<TextUnit>| {
            if !current.trim().is_empty() {
                units.push(TextUnit {
                    index: units.len(),
                    content: std::mem::take(current),
                    heading: heading.clone(),
                });
            }
            current.clear();
        };

        for block in blocks(text) {
            let body = text[block.range].trim();
            if body.is_empty() {
                continue;
            }
            if let Some(title) = block.heading {
                flush(&mut current, &heading, &mut units);
                heading = Some(title);
            }

            let joined = current.chars().count() + 2 + body.chars().count();
            if !current.is_empty() && joined > self.max_chars {
                flush(&mut current, &heading, &mut units);
            }

            if body.chars().count() <= self.max_chars {
                if !current.is_empty() {
                    current.push_str("\n\n");
                }
                current.push_str(body);
                continue;
            }

            flush(&mut current, &heading, &mut units);
            let mut rest = body;
            while !rest.is_empty() {
                let piece = truncate(rest, self.max_chars);
                let piece = if piece.is_empty() {
                    // a single character wider than the budget
                    rest.chars().next().map_or(rest, |c| &rest[..c.len_utf8()])
                } else {
                    piece
                };
                current.push_str(piece);
                flush(&mut current, &heading, &mut units);
                rest = rest[piece.len()..].trim_start();
            }
        }
        flush(&mut current, &heading, &mut units);

        debug!(units = units.len(), max_chars = self.max_chars, "document chunked");
        units
    }
}

/// Top-level Markdown blocks with their byte ranges.
fn blocks(text: &str) -> Vec<Block> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut in_heading = false;
    let mut heading_text = String::new();

    let options = Options::ENABLE_TABLES | Options::ENABLE_TASKLISTS;
    for (event, range) in Parser::new_ext(text, options).into_offset_iter() {
        match event {
            Event::Start(tag) => {
                if depth == 0 {
                    start = range.start;
                    in_heading = matches!(tag, Tag::Heading { .. });
                    heading_text.clear();
                }
                depth += 1;
            }
            Event::End(_) => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    out.push(Block {
                        range: start..range.end,
                        heading: in_heading.then(|| heading_text.trim().to_string()),
                    });
                    in_heading = false;
                }
            }
            Event::Text(t) | Event::Code(t) if in_heading => heading_text.push_str(&t),
            _ if depth == 0 => out.push(Block {
                range,
                heading: None,
            }),
            _ => {}
        }
    }
    out
}

/// How a partial update reached the document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStrategy {
    /// Partial update through the document store
    StoreUpdate,
    /// Read, merge and save the whole document
    DirectSave,
    /// Merge into the cached copy only
    CacheOnly,
}

impl UpdateStrategy {
    pub const DEFAULT_ORDER: [UpdateStrategy; 3] = [
        UpdateStrategy::StoreUpdate,
        UpdateStrategy::DirectSave,
        UpdateStrategy::CacheOnly,
    ];
}

/// One strategy tried during an update
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateAttempt {
    pub strategy: UpdateStrategy,
    pub error: Option<String>,
}

/// Outcome of [`DocumentGateway::update`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UpdateReport {
    /// The strategy that succeeded, if any
    pub applied: Option<UpdateStrategy>,
    pub attempts: Vec<UpdateAttempt>,
}

impl UpdateReport {
    pub fn succeeded(&self) -> bool {
        self.applied.is_some()
    }
}

/// Cache key for a document id
pub fn document_key(id: &str) -> String {
    format!("doc:{}", id)
}

/// Document access through the document cache
pub struct DocumentGateway {
    store: Arc<dyn DocumentStore>,
    cache: Arc<TwoTierCache>,
    strategies: Vec<UpdateStrategy>,
}

impl DocumentGateway {
    pub fn new(store: Arc<dyn DocumentStore>, cache: Arc<TwoTierCache>) -> Self {
        Self {
            store,
            cache,
            strategies: UpdateStrategy::DEFAULT_ORDER.to_vec(),
        }
    }

    /// Replace the fallback order.
    pub fn with_strategies(mut self, strategies: Vec<UpdateStrategy>) -> Self {
        self.strategies = strategies;
        self
    }

    /// Fetch a document, from cache when possible.
    pub async fn get(&self, id: &str) -> Result<Option<Value>, StoreError> {
        let key = document_key(id);
        if let Some(doc) = self.cache.get(&key).await {
            return Ok(Some(doc));
        }
        let doc = self.store.get_by_id(id).await?;
        if let Some(doc) = &doc {
            self.cache.set(&key, doc.clone()).await;
        }
        Ok(doc)
    }

    /// Apply a partial update, trying each strategy in order until one
    /// succeeds. Every attempt is logged and reported.
    pub async fn update(&self, id: &str, partial: &Value) -> UpdateReport {
        let mut report = UpdateReport::default();
        for &strategy in &self.strategies {
            let result = self.try_strategy(strategy, id, partial).await;
            match result {
                Ok(()) => {
                    info!(document = id, ?strategy, "document updated");
                    report.attempts.push(UpdateAttempt {
                        strategy,
                        error: None,
                    });
                    report.applied = Some(strategy);
                    return report;
                }
                Err(e) => {
                    warn!(document = id, ?strategy, error = %e, "update strategy failed, trying next");
                    report.attempts.push(UpdateAttempt {
                        strategy,
                        error: Some(e),
                    });
                }
            }
        }
        warn!(document = id, attempts = report.attempts.len(), "every update strategy failed");
        report
    }

    async fn try_strategy(
        &self,
        strategy: UpdateStrategy,
        id: &str,
        partial: &Value,
    ) -> Result<(), String> {
        let key = document_key(id);
        match strategy {
            UpdateStrategy::StoreUpdate => {
                self.store
                    .update(id, partial)
                    .await
                    .map_err(|e| e.to_string())?;
                self.cache.update(&key, partial).await;
                Ok(())
            }
            UpdateStrategy::DirectSave => {
                let mut doc = self
                    .get(id)
                    .await
                    .map_err(|e| e.to_string())?
                    .ok_or_else(|| format!("document '{}' not found", id))?;
                apply_partial_update(&mut doc, partial);
                self.store.store(id, &doc).await.map_err(|e| e.to_string())?;
                self.cache.set(&key, doc).await;
                Ok(())
            }
            UpdateStrategy::CacheOnly => self
                .cache
                .update(&key, partial)
                .await
                .map(|_| ())
                .ok_or_else(|| format!("document '{}' is not cached", id)),
        }
    }
}
