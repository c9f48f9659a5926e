//! Remote document bundle fetch collaborator.
//!
//! A bundle is a flat set of named files plus metadata. The canonical source
//! is a GitHub gist; a local directory and an in-memory map stand in for it
//! in development and tests.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::EngineError;
use crate::http::HttpFetch;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BundleFile {
    pub filename: String,
    pub content: String,
    /// Where the raw bytes can be downloaded. Data files are fetched from
    /// here; without it the text content is used.
    pub raw_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bundle {
    pub description: Option<String>,
    /// `%Y-%m-%dT%H:%M:%SZ`
    pub updated_at: Option<String>,
    pub files: BTreeMap<String, BundleFile>,
}

impl Bundle {
    pub fn with_file(mut self, name: &str, content: &str) -> Self {
        self.files.insert(
            name.to_string(),
            BundleFile {
                filename: name.to_string(),
                content: content.to_string(),
                raw_url: None,
            },
        );
        self
    }

    pub fn with_raw_file(mut self, name: &str, raw_url: &str) -> Self {
        self.files.insert(
            name.to_string(),
            BundleFile {
                filename: name.to_string(),
                content: String::new(),
                raw_url: Some(raw_url.to_string()),
            },
        );
        self
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.files
            .get(name)
            .map(|f| f.content.as_str())
            .filter(|c| !c.is_empty())
    }
}

#[async_trait]
pub trait BundleSource: Send + Sync {
    /// Fetch the bundle behind `locator` (a gist page URL, a path, a key).
    async fn fetch(&self, locator: &str) -> Result<Bundle, EngineError>;
}

// ── Gists ────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct GistResponse {
    description: Option<String>,
    updated_at: Option<String>,
    #[serde(default)]
    files: HashMap<String, GistFile>,
}

#[derive(Deserialize)]
struct GistFile {
    filename: String,
    #[serde(default)]
    content: String,
    raw_url: Option<String>,
}

/// Fetches gists through the GitHub API.
pub struct GistSource {
    http: Arc<dyn HttpFetch>,
    api_base: String,
    token: Option<String>,
}

impl GistSource {
    pub fn new(http: Arc<dyn HttpFetch>, token: Option<String>) -> Self {
        GistSource {
            http,
            api_base: "https://api.github.com".to_string(),
            token,
        }
    }

    pub fn with_api_base(mut self, base: &str) -> Self {
        self.api_base = base.trim_end_matches('/').to_string();
        self
    }

    /// `https://gist.github.com/<user>/<id>` → `<id>`
    pub fn gist_id(page: &str) -> Result<&str, EngineError> {
        page.split('/')
            .nth(4)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| EngineError::User(format!("Not a valid gist url {}", page)))
    }

    fn fetch_blocking(
        http: &dyn HttpFetch,
        url: &str,
        token: Option<&str>,
    ) -> Result<Bundle, EngineError> {
        let auth = token.map(|t| format!("token {}", t));
        let mut headers = vec![("Accept", "application/vnd.github.v3+json")];
        if let Some(auth) = auth.as_deref() {
            headers.push(("Authorization", auth));
        }
        let response = http.get(url, &headers)?;
        if response.status != 200 {
            return Err(EngineError::Fetch(format!(
                "Failed to fetch Gist data. Status code: {}",
                response.status
            )));
        }
        let gist: GistResponse = serde_json::from_slice(&response.body)
            .map_err(|e| EngineError::Fetch(format!("invalid gist response: {}", e)))?;
        Ok(Bundle {
            description: gist.description,
            updated_at: gist.updated_at,
            files: gist
                .files
                .into_values()
                .map(|f| {
                    (
                        f.filename.clone(),
                        BundleFile {
                            filename: f.filename,
                            content: f.content,
                            raw_url: f.raw_url,
                        },
                    )
                })
                .collect(),
        })
    }
}

#[async_trait]
impl BundleSource for GistSource {
    async fn fetch(&self, locator: &str) -> Result<Bundle, EngineError> {
        let url = format!("{}/gists/{}", self.api_base, Self::gist_id(locator)?);
        let http = self.http.clone();
        let token = self.token.clone();
        // HttpFetch is blocking
        tokio::task::spawn_blocking(move || Self::fetch_blocking(http.as_ref(), &url, token.as_deref()))
            .await
            .map_err(|e| EngineError::Fetch(format!("task join error: {}", e)))?
    }
}

// ── Local directories ────────────────────────────────────────────────────────

/// Treats a directory as a bundle: every regular file is a bundle file, its
/// raw URL is a `file://` URL. `description` and `updated_at` are read from
/// an optional `bundle.toml`.
pub struct DirectorySource {
    root: Option<PathBuf>,
}

#[derive(Deserialize, Default)]
struct DirectoryMeta {
    description: Option<String>,
    updated_at: Option<String>,
}

impl DirectorySource {
    /// Resolve locators as paths, relative to `root` when given.
    pub fn new(root: Option<PathBuf>) -> Self {
        DirectorySource { root }
    }
}

#[async_trait]
impl BundleSource for DirectorySource {
    async fn fetch(&self, locator: &str) -> Result<Bundle, EngineError> {
        let dir = match &self.root {
            Some(root) => root.join(locator),
            None => PathBuf::from(locator),
        };
        let io = |e: std::io::Error| EngineError::Fetch(format!("{}: {}", dir.display(), e));
        let mut entries = tokio::fs::read_dir(&dir).await.map_err(io)?;
        let mut bundle = Bundle::default();
        while let Some(entry) = entries.next_entry().await.map_err(io)? {
            if !entry.file_type().await.map_err(io)?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let path = entry.path();
            if name == "bundle.toml" {
                let text = tokio::fs::read_to_string(&path).await.map_err(io)?;
                let meta: DirectoryMeta = toml::from_str(&text)
                    .map_err(|e| EngineError::Fetch(format!("{}: {}", path.display(), e)))?;
                bundle.description = meta.description;
                bundle.updated_at = meta.updated_at;
                continue;
            }
            let bytes = tokio::fs::read(&path).await.map_err(io)?;
            let absolute = std::path::absolute(&path).unwrap_or(path);
            bundle.files.insert(
                name.clone(),
                BundleFile {
                    filename: name,
                    content: String::from_utf8_lossy(&bytes).into_owned(),
                    raw_url: Some(format!("file://{}", absolute.display())),
                },
            );
        }
        Ok(bundle)
    }
}

// ── In memory ────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryBundleSource {
    bundles: HashMap<String, Bundle>,
}

impl MemoryBundleSource {
    pub fn new() -> Self {
        MemoryBundleSource::default()
    }

    pub fn with(mut self, locator: &str, bundle: Bundle) -> Self {
        self.bundles.insert(locator.to_string(), bundle);
        self
    }
}

#[async_trait]
impl BundleSource for MemoryBundleSource {
    async fn fetch(&self, locator: &str) -> Result<Bundle, EngineError> {
        self.bundles
            .get(locator)
            .cloned()
            .ok_or_else(|| EngineError::Fetch(format!("no bundle at {}", locator)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{HttpResponse, StaticHttp};

    #[test]
    fn gist_id_is_the_fifth_path_segment() {
        assert_eq!(
            GistSource::gist_id("https://gist.github.com/alice/e0585a08").unwrap(),
            "e0585a08"
        );
        assert!(GistSource::gist_id("https://gist.github.com/alice").is_err());
    }

    #[tokio::test]
    async fn gist_source_parses_the_api_response() {
        let body = serde_json::json!({
            "description": "Telegram sync",
            "updated_at": "2024-05-01T10:00:00Z",
            "files": {
                "README.md": {"filename": "README.md", "content": "# Hi", "raw_url": "https://raw/readme"}
            }
        });
        let http = StaticHttp::new().with(
            "https://api.github.com/gists/abc",
            HttpResponse::ok(body.to_string()),
        );
        let source = GistSource::new(Arc::new(http), None);
        let bundle = source.fetch("https://gist.github.com/alice/abc").await.unwrap();
        assert_eq!(bundle.description.as_deref(), Some("Telegram sync"));
        assert_eq!(bundle.text("README.md"), Some("# Hi"));
    }

    #[tokio::test]
    async fn gist_source_reports_bad_status() {
        let source = GistSource::new(Arc::new(StaticHttp::new()), None);
        let err = source.fetch("https://gist.github.com/alice/abc").await.unwrap_err();
        assert!(err.to_string().contains("Status code: 404"));
    }

    #[tokio::test]
    async fn directory_source_reads_files_and_meta() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("README.md"), "# Docs").unwrap();
        std::fs::write(
            dir.path().join("bundle.toml"),
            "description = \"Local\"\nupdated_at = \"2024-01-02T03:04:05Z\"\n",
        )
        .unwrap();
        let bundle = DirectorySource::new(None)
            .fetch(dir.path().to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(bundle.description.as_deref(), Some("Local"));
        assert_eq!(bundle.files.len(), 1);
        let readme = &bundle.files["README.md"];
        assert!(readme.raw_url.as_deref().unwrap().starts_with("file://"));
    }
}
