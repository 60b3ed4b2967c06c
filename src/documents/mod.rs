// Document source: enumerates PDF and text files and extracts their text


use anyhow::{Context, Result, anyhow};
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentFormat {
    Pdf,
    Text,
}

impl DocumentFormat {
    /// Format declared by the file extension, compared case-insensitively
    #[inline]
    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?;
        if extension.eq_ignore_ascii_case("pdf") {
            Some(Self::Pdf)
        } else if extension.eq_ignore_ascii_case("txt") {
            Some(Self::Text)
        } else {
            None
        }
    }
}

impl fmt::Display for DocumentFormat {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pdf => write!(f, "pdf"),
            Self::Text => write!(f, "text"),
        }
    }
}

/// A source document with its extracted text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Path relative to the documents root, with `/` separators
    pub id: String,
    pub path: PathBuf,
    pub format: DocumentFormat,
    pub text: String,
}

/// Turns the raw bytes of one document format into plain text
pub trait TextExtractor: Send + Sync {
    fn extract(&self, path: &Path, bytes: &[u8]) -> Result<String>;
}

/// Identity extraction for text files; invalid UTF-8 is replaced rather than rejected
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    #[inline]
    fn extract(&self, _path: &Path, bytes: &[u8]) -> Result<String> {
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }
}

/// PDF extraction through poppler's `pdftotext` binary
#[derive(Debug, Clone)]
pub struct PdfToTextExtractor {
    binary: PathBuf,
}

impl Default for PdfToTextExtractor {
    #[inline]
    fn default() -> Self {
        Self {
            binary: PathBuf::from("pdftotext"),
        }
    }
}

impl PdfToTextExtractor {
    #[inline]
    pub fn with_binary<P: Into<PathBuf>>(binary: P) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl TextExtractor for PdfToTextExtractor {
    #[inline]
    fn extract(&self, path: &Path, bytes: &[u8]) -> Result<String> {
        let mut staged = tempfile::Builder::new()
            .suffix(".pdf")
            .tempfile()
            .context("Failed to create temporary PDF file")?;
        staged
            .write_all(bytes)
            .context("Failed to write temporary PDF file")?;
        staged.flush()?;

        debug!("Running {} on {}", self.binary.display(), path.display());

        let output = Command::new(&self.binary)
            .arg("-layout")
            .arg("-enc")
            .arg("UTF-8")
            .arg(staged.path())
            .arg("-")
            .output()
            .with_context(|| {
                format!(
                    "Failed to run {} (is poppler installed?)",
                    self.binary.display()
                )
            })?;

        if !output.status.success() {
            return Err(anyhow!(
                "pdftotext failed for {}: {}",
                path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// A document that could not be loaded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedDocument {
    pub path: PathBuf,
    pub reason: String,
}

/// Outcome of loading every document under the root
#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    pub documents: Vec<Document>,
    pub skipped: Vec<SkippedDocument>,
}

/// Enumerates `*.pdf` and `*.txt` files below a root directory
#[derive(Clone)]
pub struct DocumentSource {
    root: PathBuf,
    pdf: Arc<dyn TextExtractor>,
    text: Arc<dyn TextExtractor>,
}

impl fmt::Debug for DocumentSource {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentSource")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl DocumentSource {
    #[inline]
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self {
            root: root.into(),
            pdf: Arc::new(PdfToTextExtractor::default()),
            text: Arc::new(PlainTextExtractor),
        }
    }

    #[inline]
    pub fn with_pdf_extractor(mut self, extractor: Arc<dyn TextExtractor>) -> Self {
        self.pdf = extractor;
        self
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// List supported files in a stable, sorted order. A missing root is empty.
    #[inline]
    pub fn scan(&self) -> Vec<(PathBuf, DocumentFormat)> {
        if !self.root.is_dir() {
            debug!("Documents directory {} does not exist", self.root.display());
            return Vec::new();
        }

        let mut files: Vec<(PathBuf, DocumentFormat)> = WalkDir::new(&self.root)
            .follow_links(true)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("Skipping unreadable directory entry: {}", e);
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| {
                DocumentFormat::from_path(entry.path())
                    .map(|format| (entry.path().to_path_buf(), format))
            })
            .collect();

        files.sort_by(|a, b| a.0.cmp(&b.0));
        files
    }

    /// Read and extract every document. Failures are reported, not fatal.
    #[inline]
    pub fn load_all(&self) -> LoadReport {
        let mut report = LoadReport::default();

        for (path, format) in self.scan() {
            match self.load(&path, format) {
                Ok(document) => report.documents.push(document),
                Err(e) => {
                    warn!("Skipping {}: {:#}", path.display(), e);
                    report.skipped.push(SkippedDocument {
                        path,
                        reason: format!("{:#}", e),
                    });
                }
            }
        }

        info!(
            "Loaded {} documents from {} ({} skipped)",
            report.documents.len(),
            self.root.display(),
            report.skipped.len()
        );

        report
    }

    fn load(&self, path: &Path, format: DocumentFormat) -> Result<Document> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;

        let extractor = match format {
            DocumentFormat::Pdf => &self.pdf,
            DocumentFormat::Text => &self.text,
        };
        let text = extractor.extract(path, &bytes)?;

        Ok(Document {
            id: self.document_id(path),
            path: path.to_path_buf(),
            format,
            text,
        })
    }

    fn document_id(&self, path: &Path) -> String {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }
}
