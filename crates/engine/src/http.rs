//! HTTP fetch collaborator.
//!
//! `url2bin`, `url2base64` and the import pipeline's raw data downloads all go
//! through [`HttpFetch`]. [`UreqFetch`] is the network implementation;
//! [`StaticHttp`] serves canned responses for tests and offline runs.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::EngineError;

/// Status and body of a completed GET.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        HttpResponse {
            status: 200,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

pub trait HttpFetch: Send + Sync {
    /// GET `url`. Non-2xx statuses are returned, not raised; only transport
    /// failures are errors.
    fn get(&self, url: &str, headers: &[(&str, &str)]) -> Result<HttpResponse, EngineError>;
}

/// Whether `url` is an `http://` or `https://` URL.
pub fn is_network_url(url: &str) -> bool {
    let lower = url.trim_start().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Blocking HTTP client. Only `http`/`https` URLs are fetched unless
/// [`with_local_files`](Self::with_local_files) is set; that variant reads
/// `file://` URLs from disk so directory bundles reuse the raw-URL download
/// path. Script helpers are never handed the local-file variant.
pub struct UreqFetch {
    agent: ureq::Agent,
    local_files: bool,
}

impl UreqFetch {
    pub fn new(timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build();
        UreqFetch {
            agent: config.into(),
            local_files: false,
        }
    }

    pub fn with_local_files(mut self) -> Self {
        self.local_files = true;
        self
    }
}

impl HttpFetch for UreqFetch {
    fn get(&self, url: &str, headers: &[(&str, &str)]) -> Result<HttpResponse, EngineError> {
        if let (true, Some(path)) = (self.local_files, url.strip_prefix("file://")) {
            return match std::fs::read(path) {
                Ok(body) => Ok(HttpResponse::ok(body)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HttpResponse {
                    status: 404,
                    body: Vec::new(),
                }),
                Err(e) => Err(EngineError::Fetch(format!("{}: {}", url, e))),
            };
        }
        if !is_network_url(url) {
            return Err(EngineError::Validation(format!(
                "only http and https URLs can be fetched, not '{}'",
                url
            )));
        }

        let mut request = self.agent.get(url);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        let response = request
            .call()
            .map_err(|e| EngineError::Fetch(format!("{}: {}", url, e)))?;
        let status = response.status().as_u16();
        let body = response
            .into_body()
            .read_to_vec()
            .map_err(|e| EngineError::Fetch(format!("error reading {}: {}", url, e)))?;
        Ok(HttpResponse { status, body })
    }
}

/// Canned responses keyed by URL. Unknown URLs answer 404. Every request is
/// recorded.
#[derive(Default)]
pub struct StaticHttp {
    routes: HashMap<String, HttpResponse>,
    requests: Mutex<Vec<String>>,
}

impl StaticHttp {
    pub fn new() -> Self {
        StaticHttp::default()
    }

    pub fn with(mut self, url: &str, response: HttpResponse) -> Self {
        self.routes.insert(url.to_string(), response);
        self
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }
}

impl HttpFetch for StaticHttp {
    fn get(&self, url: &str, _headers: &[(&str, &str)]) -> Result<HttpResponse, EngineError> {
        self.requests.lock().push(url.to_string());
        Ok(self.routes.get(url).cloned().unwrap_or(HttpResponse {
            status: 404,
            body: Vec::new(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_http_answers_known_urls_and_records_requests() {
        let http = StaticHttp::new().with("https://x.test/a", HttpResponse::ok("hello"));
        assert_eq!(http.get("https://x.test/a", &[]).unwrap().body, b"hello");
        assert_eq!(http.get("https://x.test/b", &[]).unwrap().status, 404);
        assert_eq!(http.requests().len(), 2);
    }

    #[test]
    fn file_urls_are_read_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.csv");
        std::fs::write(&path, "a,b\n").unwrap();
        let fetch = UreqFetch::new(Duration::from_secs(1)).with_local_files();
        let url = format!("file://{}", path.display());
        assert_eq!(fetch.get(&url, &[]).unwrap().body, b"a,b\n");
        let missing = format!("file://{}", dir.path().join("nope").display());
        assert_eq!(fetch.get(&missing, &[]).unwrap().status, 404);
    }

    #[test]
    fn network_fetcher_refuses_other_schemes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secret.txt");
        std::fs::write(&path, "token").unwrap();
        let fetch = UreqFetch::new(Duration::from_secs(1));
        for url in [format!("file://{}", path.display()), "ftp://host/x".to_string()] {
            let err = fetch.get(&url, &[]).unwrap_err();
            assert!(matches!(err, EngineError::Validation(_)), "{url}: {err}");
        }
        assert!(is_network_url("HTTPS://example.com"));
        assert!(!is_network_url("file:///etc/passwd"));
    }
}
