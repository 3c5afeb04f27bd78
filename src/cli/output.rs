use std::fmt::Write as FmtWrite;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;

use crate::models::{CollectionStatus, OutputFormat, ScoredRecord};
use crate::services::{IngestReport, SearchMode};

/// Characters of record text shown per hit.
const PREVIEW_CHARS: usize = 160;

#[derive(Debug, Clone, Serialize)]
pub struct SearchResults {
    pub query: String,
    pub mode: SearchMode,
    pub hits: Vec<ScoredRecord>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusInfo {
    pub vector_store_driver: String,
    pub vector_store_url: String,
    pub vector_store_connected: bool,
    pub embedding_url: String,
    pub embedding_connected: bool,
    pub collection: String,
    pub collection_status: Option<CollectionStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestSummary {
    pub collection: String,
    pub report: IngestReport,
    /// Status after the index build, when one was run.
    pub index: Option<CollectionStatus>,
}

pub trait Formatter {
    fn format_search_results(&self, results: &SearchResults) -> String;
    fn format_status(&self, status: &StatusInfo) -> String;
    fn format_ingest(&self, summary: &IngestSummary) -> String;
    fn format_collection_status(&self, collection: &str, status: &CollectionStatus) -> String;
    fn format_message(&self, message: &str) -> String;
    fn format_error(&self, error: &str) -> String;
}

/// Short label for a hit: its title if it has one, else a text preview.
fn hit_label(hit: &ScoredRecord) -> String {
    if let Some(title) = hit.payload.get("title").and_then(|v| v.as_str()) {
        return title.to_string();
    }
    let text = hit
        .payload
        .get("text")
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    let preview: String = text.chars().take(PREVIEW_CHARS).collect();
    if text.chars().count() > PREVIEW_CHARS {
        format!("{}...", preview)
    } else {
        preview
    }
}

pub struct TextFormatter;

impl Formatter for TextFormatter {
    fn format_search_results(&self, results: &SearchResults) -> String {
        if results.hits.is_empty() {
            return format!("No results found for: {}\n", results.query);
        }

        let mut output = String::new();
        writeln!(output, "Search results for: \"{}\"", results.query).unwrap();
        writeln!(
            output,
            "{} results ({:?}) in {}ms\n",
            results.hits.len(),
            results.mode,
            results.duration_ms
        )
        .unwrap();

        for (i, hit) in results.hits.iter().enumerate() {
            writeln!(output, "{}. {} ({:.4})", i + 1, hit_label(hit), hit.score).unwrap();
            writeln!(output, "   id: {}", hit.id).unwrap();
        }

        output
    }

    fn format_status(&self, status: &StatusInfo) -> String {
        let connected = |ok: bool| if ok { "[CONNECTED]" } else { "[DISCONNECTED]" };

        let mut output = String::new();
        writeln!(output, "Status").unwrap();
        writeln!(output, "------").unwrap();
        writeln!(
            output,
            "Vector Store:  {} {}",
            status.vector_store_driver,
            connected(status.vector_store_connected)
        )
        .unwrap();
        writeln!(output, "  URL:         {}", status.vector_store_url).unwrap();
        writeln!(
            output,
            "Embedding:     {}",
            connected(status.embedding_connected)
        )
        .unwrap();
        writeln!(output, "  URL:         {}", status.embedding_url).unwrap();
        writeln!(output).unwrap();
        writeln!(output, "Collection:    {}", status.collection).unwrap();
        match status.collection_status {
            Some(ref s) => {
                writeln!(output, "  Points:      {}", s.point_count).unwrap();
                writeln!(output, "  Index:       {}", s.index_status).unwrap();
            }
            None => writeln!(output, "  (not found)").unwrap(),
        }

        output
    }

    fn format_ingest(&self, summary: &IngestSummary) -> String {
        let report = &summary.report;
        let mut output = String::new();
        writeln!(output, "Ingestion Complete").unwrap();
        writeln!(output, "------------------").unwrap();
        writeln!(output, "Collection:     {}", summary.collection).unwrap();
        writeln!(output, "Batches:        {}", report.batches).unwrap();
        writeln!(output, "Points:         {}", report.points).unwrap();
        writeln!(output, "Peak in flight: {}", report.peak_in_flight).unwrap();
        writeln!(output, "Duration:       {}ms", report.elapsed.as_millis()).unwrap();
        if let Some(ref index) = summary.index {
            writeln!(
                output,
                "Index:          {} ({} points)",
                index.index_status, index.point_count
            )
            .unwrap();
        }
        output
    }

    fn format_collection_status(&self, collection: &str, status: &CollectionStatus) -> String {
        format!(
            "{}: {} points, index {}\n",
            collection, status.point_count, status.index_status
        )
    }

    fn format_message(&self, message: &str) -> String {
        format!("{}\n", message)
    }

    fn format_error(&self, error: &str) -> String {
        format!("Error: {}\n", error)
    }
}

pub struct JsonFormatter {
    pub pretty: bool,
}

impl JsonFormatter {
    pub fn new(pretty: bool) -> Self {
        Self { pretty }
    }

    fn render<T: Serialize>(&self, value: &T) -> String {
        let rendered = if self.pretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        };
        let mut out = rendered.unwrap_or_else(|e| format!("{{\"error\": \"{}\"}}", e));
        out.push('\n');
        out
    }
}

impl Formatter for JsonFormatter {
    fn format_search_results(&self, results: &SearchResults) -> String {
        self.render(results)
    }

    fn format_status(&self, status: &StatusInfo) -> String {
        self.render(status)
    }

    fn format_ingest(&self, summary: &IngestSummary) -> String {
        self.render(summary)
    }

    fn format_collection_status(&self, collection: &str, status: &CollectionStatus) -> String {
        self.render(&serde_json::json!({
            "collection": collection,
            "points": status.point_count,
            "index_status": status.index_status,
        }))
    }

    fn format_message(&self, message: &str) -> String {
        self.render(&serde_json::json!({"message": message}))
    }

    fn format_error(&self, error: &str) -> String {
        self.render(&serde_json::json!({"error": error}))
    }
}

pub fn get_formatter(format: OutputFormat) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Text => Box::new(TextFormatter),
        OutputFormat::Json => Box::new(JsonFormatter::new(true)),
    }
}

/// Progress bar counting ingested points. Length is known only with `--limit`.
pub fn ingest_progress_bar(total: Option<u64>) -> ProgressBar {
    let (pb, template) = match total {
        Some(len) => (
            ProgressBar::new(len),
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} points ({eta}) {msg}",
        ),
        None => (
            ProgressBar::new_spinner(),
            "{spinner:.green} [{elapsed_precise}] {pos} points ({per_sec}) {msg}",
        ),
    };
    if let Ok(style) = ProgressStyle::default_bar().template(template) {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}
