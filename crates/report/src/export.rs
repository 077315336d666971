use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use indexmap::IndexMap;
use pulldown_cmark::{html, Options, Parser};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, error, info, warn};

use crate::error::{ReportError, Result};

pub const DEFAULT_FILE_NAME: &str = "report";
pub const EXPORT_VERSION: &str = "1.0.0";
const DEFAULT_TITLE: &str = "Report";
const DEFAULT_AUTHOR: &str = "Data Processing Framework";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Md,
    Html,
    Pdf,
    Mdx,
    Json,
    Docx,
}

impl ExportFormat {
    pub const ALL: [ExportFormat; 6] = [
        ExportFormat::Md,
        ExportFormat::Html,
        ExportFormat::Pdf,
        ExportFormat::Mdx,
        ExportFormat::Json,
        ExportFormat::Docx,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Md => "md",
            ExportFormat::Html => "html",
            ExportFormat::Pdf => "pdf",
            ExportFormat::Mdx => "mdx",
            ExportFormat::Json => "json",
            ExportFormat::Docx => "docx",
        }
    }

    pub fn extension(&self) -> &'static str {
        self.as_str()
    }

    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        Self::ALL
            .into_iter()
            .find(|format| format.as_str().eq_ignore_ascii_case(value))
    }

    /// Keeps the recognised names, warning about the rest.
    pub fn parse_list<S: AsRef<str>>(names: &[S]) -> Vec<Self> {
        let mut formats = Vec::new();
        for name in names {
            match Self::parse(name.as_ref()) {
                Some(format) if !formats.contains(&format) => formats.push(format),
                Some(_) => {}
                None => warn!(format = name.as_ref(), "invalid export format ignored"),
            }
        }
        formats
    }

    /// Formats produced by an external renderer rather than written directly.
    pub fn needs_renderer(&self) -> bool {
        matches!(self, ExportFormat::Pdf | ExportFormat::Docx)
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Turns a finished report into a binary document (PDF, DOCX). Receives the
/// markdown source and a standalone HTML rendering, writes `output`.
#[async_trait]
pub trait DocumentRenderer: Send + Sync {
    async fn render(&self, markdown: &str, html: &str, output: &Path) -> anyhow::Result<PathBuf>;
}

#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub destination: PathBuf,
    pub file_name: String,
    pub metadata: Map<String, Value>,
}

impl ExportOptions {
    pub fn new(destination: impl Into<PathBuf>) -> Self {
        Self {
            destination: destination.into(),
            file_name: DEFAULT_FILE_NAME.to_string(),
            metadata: Map::new(),
        }
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = file_name.into();
        self
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn path_for(&self, format: ExportFormat) -> PathBuf {
        self.destination
            .join(format!("{}.{}", self.file_name, format.extension()))
    }
}

/// Where each format landed, and why the others did not.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExportReport {
    pub outputs: IndexMap<ExportFormat, PathBuf>,
    pub failures: IndexMap<ExportFormat, String>,
}

impl ExportReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Clone, Default)]
pub struct ExportManager {
    renderers: HashMap<ExportFormat, Arc<dyn DocumentRenderer>>,
}

impl fmt::Debug for ExportManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportManager")
            .field("renderers", &self.renderers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ExportManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_renderer(mut self, format: ExportFormat, renderer: Arc<dyn DocumentRenderer>) -> Self {
        self.renderers.insert(format, renderer);
        self
    }

    pub fn supports(&self, format: ExportFormat) -> bool {
        !format.needs_renderer() || self.renderers.contains_key(&format)
    }

    /// Writes every requested format. A failing format is logged and recorded
    /// in the report; the remaining formats are still attempted.
    pub async fn export_all(
        &self,
        content: &str,
        formats: &[ExportFormat],
        options: &ExportOptions,
    ) -> Result<ExportReport> {
        let mut unique = Vec::new();
        for format in formats {
            if !unique.contains(format) {
                unique.push(*format);
            }
        }
        if unique.is_empty() {
            return Err(ReportError::NoExportFormats);
        }
        if !options.destination.exists() {
            tokio::fs::create_dir_all(&options.destination).await?;
            debug!(dir = %options.destination.display(), "created output directory");
        }

        let mut report = ExportReport::default();
        for format in unique {
            match self.export(content, format, options).await {
                Ok(path) => {
                    info!(format = %format, path = %path.display(), "exported");
                    report.outputs.insert(format, path);
                }
                Err(err) => {
                    error!(format = %format, error = %err, "export failed");
                    report.failures.insert(format, err.to_string());
                }
            }
        }
        Ok(report)
    }

    pub async fn export(
        &self,
        content: &str,
        format: ExportFormat,
        options: &ExportOptions,
    ) -> Result<PathBuf> {
        let path = options.path_for(format);
        let body = match format {
            ExportFormat::Md => content.to_string(),
            ExportFormat::Html => html_document(&markdown_to_html(content), &title_of(&options.metadata)),
            ExportFormat::Mdx => mdx_document(content, &options.metadata, Utc::now().date_naive()),
            ExportFormat::Json => json_document(content, &options.metadata, Utc::now())?,
            ExportFormat::Pdf | ExportFormat::Docx => {
                let renderer = self
                    .renderers
                    .get(&format)
                    .ok_or_else(|| ReportError::MissingRenderer(format.to_string()))?;
                let html = html_document(&markdown_to_html(content), &title_of(&options.metadata));
                return renderer
                    .render(content, &html, &path)
                    .await
                    .map_err(ReportError::Renderer);
            }
        };
        tokio::fs::write(&path, body).await?;
        Ok(path)
    }
}

fn title_of(metadata: &Map<String, Value>) -> String {
    metadata
        .get("title")
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_TITLE)
        .to_string()
}

pub fn markdown_to_html(markdown: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    let mut out = String::with_capacity(markdown.len() * 3 / 2);
    html::push_html(&mut out, Parser::new_ext(markdown, options));
    out
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

pub fn html_document(body: &str, title: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="UTF-8">
  <meta name="viewport" content="width=device-width, initial-scale=1.0">
  <title>{title}</title>
  <style>
    body {{
      font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, 'Helvetica Neue', Arial, sans-serif;
      line-height: 1.6;
      color: #333;
      max-width: 1000px;
      margin: 0 auto;
      padding: 2rem;
      background: #fff;
    }}
    table {{ border-collapse: collapse; }}
    th, td {{ border: 1px solid #ddd; padding: 0.4rem 0.8rem; }}
  </style>
</head>
<body>
{body}
</body>
</html>
"#,
        title = escape_html(title),
    )
}

/// Prepends YAML frontmatter unless the content already has some. Metadata
/// keys override the defaults in place.
pub fn mdx_document(content: &str, metadata: &Map<String, Value>, date: NaiveDate) -> String {
    if content.starts_with("---\n") {
        return content.to_string();
    }
    let mut frontmatter = Map::new();
    frontmatter.insert("title".into(), Value::from(DEFAULT_TITLE));
    frontmatter.insert("date".into(), Value::from(date.format("%Y-%m-%d").to_string()));
    frontmatter.insert("author".into(), Value::from(DEFAULT_AUTHOR));
    for (key, value) in metadata {
        frontmatter.insert(key.clone(), value.clone());
    }
    let lines: Vec<String> = frontmatter
        .iter()
        .map(|(key, value)| format!("{key}: {value}"))
        .collect();
    format!("---\n{}\n---\n\n{content}", lines.join("\n"))
}

pub fn json_document(
    content: &str,
    metadata: &Map<String, Value>,
    generated_at: DateTime<Utc>,
) -> Result<String> {
    let document = json!({
        "content": content,
        "metadata": metadata,
        "generatedAt": generated_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        "version": EXPORT_VERSION,
    });
    Ok(serde_json::to_string_pretty(&document)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::fs;
    use tempfile::tempdir;

    struct StubPdf;

    #[async_trait]
    impl DocumentRenderer for StubPdf {
        async fn render(&self, _markdown: &str, html: &str, output: &Path) -> anyhow::Result<PathBuf> {
            fs::write(output, format!("%PDF-stub\n{}", html.len()))?;
            Ok(output.to_path_buf())
        }
    }

    #[test]
    fn formats_parse_and_dedupe() {
        assert_eq!(ExportFormat::parse("HTML"), Some(ExportFormat::Html));
        assert_eq!(
            ExportFormat::parse_list(&["md", "docs", "json", "md"]),
            vec![ExportFormat::Md, ExportFormat::Json]
        );
        assert!(ExportFormat::Pdf.needs_renderer());
        assert!(!ExportManager::new().supports(ExportFormat::Pdf));
        assert!(ExportManager::new().supports(ExportFormat::Mdx));
    }

    #[test]
    fn mdx_frontmatter_merges_metadata() {
        let mut metadata = Map::new();
        metadata.insert("title".into(), json!("Q1 Sales"));
        metadata.insert("records".into(), json!(2));
        let date = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        let doc = mdx_document("# Body", &metadata, date);
        assert_eq!(
            doc,
            "---\ntitle: \"Q1 Sales\"\ndate: \"2025-03-01\"\nauthor: \"Data Processing Framework\"\nrecords: 2\n---\n\n# Body"
        );
        assert_eq!(mdx_document("---\ntitle: x\n---\nhi", &metadata, date), "---\ntitle: x\n---\nhi");
    }

    #[test]
    fn json_export_wraps_content() {
        let at = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();
        let doc: Value = serde_json::from_str(&json_document("body", &Map::new(), at).unwrap()).unwrap();
        assert_eq!(
            doc,
            json!({"content": "body", "metadata": {}, "generatedAt": "2025-01-02T03:04:05.000Z", "version": "1.0.0"})
        );
    }

    #[test]
    fn html_uses_tables_extension() {
        let html = markdown_to_html("| a | b |\n|---|---|\n| 1 | 2 |\n\n~~old~~");
        assert!(html.contains("<table>"));
        assert!(html.contains("<del>old</del>"));
        let doc = html_document(&html, "A & B");
        assert!(doc.contains("<title>A &amp; B</title>"));
    }

    #[tokio::test]
    async fn export_all_writes_each_format_and_isolates_failures() {
        let dir = tempdir().unwrap();
        let options = ExportOptions::new(dir.path().join("out")).with_file_name("sales");
        let report = ExportManager::new()
            .export_all(
                "# Sales\n\nTotal 3800",
                &[ExportFormat::Md, ExportFormat::Pdf, ExportFormat::Html, ExportFormat::Json],
                &options,
            )
            .await
            .unwrap();
        assert_eq!(report.outputs.len(), 3);
        assert!(!report.is_complete());
        assert!(report.failures[&ExportFormat::Pdf].contains("no document renderer"));
        let md = fs::read_to_string(dir.path().join("out/sales.md")).unwrap();
        assert_eq!(md, "# Sales\n\nTotal 3800");
        let html = fs::read_to_string(&report.outputs[&ExportFormat::Html]).unwrap();
        assert!(html.contains("<h1>Sales</h1>"));
    }

    #[tokio::test]
    async fn registered_renderer_handles_pdf() {
        let dir = tempdir().unwrap();
        let manager = ExportManager::new().with_renderer(ExportFormat::Pdf, Arc::new(StubPdf));
        let report = manager
            .export_all("# Hi", &[ExportFormat::Pdf], &ExportOptions::new(dir.path()))
            .await
            .unwrap();
        let path = &report.outputs[&ExportFormat::Pdf];
        assert_eq!(path, &dir.path().join("report.pdf"));
        assert!(fs::read_to_string(path).unwrap().starts_with("%PDF-stub"));
    }

    #[tokio::test]
    async fn no_formats_is_an_error() {
        let dir = tempdir().unwrap();
        let err = ExportManager::new()
            .export_all("x", &[], &ExportOptions::new(dir.path()))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "No valid export formats specified");
    }
}
