use crate::error::{ServerError, ServerResult};
use crate::http::Method;
use crate::output::{CompressionLevel, Encoding};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Application options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppOptions {
    /// Status code used when no handler resolves a request
    pub default_code: u16,

    // Network configuration
    pub listen_address: String,
    pub backlog: u32,
    pub max_header_size: usize,

    // Thread configuration (used by the runtime that hosts the app)
    pub worker_threads: usize,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            default_code: 404,
            listen_address: "127.0.0.1".to_string(),
            backlog: 1024,
            max_header_size: 16 * 1024, // 16 KB
            worker_threads: num_cpus::get(),
        }
    }
}

impl AppOptions {
    /// Create options with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the fallback status code
    pub fn with_default_code(mut self, code: u16) -> Self {
        self.default_code = code;
        self
    }

    /// Set the address to listen on
    pub fn with_listen_address(mut self, address: &str) -> Self {
        self.listen_address = address.to_string();
        self
    }

    /// Set the maximum accepted size of a request head
    pub fn with_max_header_size(mut self, size: usize) -> Self {
        self.max_header_size = size;
        self
    }

    /// Set the number of worker threads
    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    /// Check option values that cannot be expressed in the type
    pub fn validate(&self) -> ServerResult<()> {
        if !(100..=999).contains(&self.default_code) {
            return Err(ServerError::Config(format!(
                "default_code {} is not a valid status code",
                self.default_code
            )));
        }
        if self.worker_threads == 0 {
            return Err(ServerError::Config("worker_threads must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Load options from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> ServerResult<Self> {
        let content = fs::read_to_string(path)?;
        let options: Self = serde_json::from_str(&content)?;
        options.validate()?;
        Ok(options)
    }
}

/// Options for compressed output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionOptions {
    /// Accepted encodings in preferred order; `None` disables compression
    pub compression: Option<Vec<Encoding>>,

    /// Encoder quality
    pub level: CompressionLevel,
}

impl Default for CompressionOptions {
    fn default() -> Self {
        Self {
            compression: Some(vec![Encoding::Brotli, Encoding::Gzip, Encoding::Deflate]),
            level: CompressionLevel::Default,
        }
    }
}

impl CompressionOptions {
    /// Options that never compress
    pub fn disabled() -> Self {
        Self {
            compression: None,
            ..Self::default()
        }
    }

    /// Set the preference list
    pub fn with_preference(mut self, encodings: Vec<Encoding>) -> Self {
        self.compression = Some(encodings);
        self
    }

    /// Set the encoder quality
    pub fn with_level(mut self, level: CompressionLevel) -> Self {
        self.level = level;
        self
    }
}

/// Options for the static file handler
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StaticHandlerOptions {
    /// Page served for directory requests; `None` disables the fallback
    pub default_page: Option<String>,

    /// Methods the handler answers
    pub methods: Vec<Method>,

    /// End unmatched requests with 404 instead of passing them on
    pub terminal: bool,

    /// Compression used for served files
    pub compression: CompressionOptions,
}

impl Default for StaticHandlerOptions {
    fn default() -> Self {
        Self {
            default_page: Some("index.html".to_string()),
            methods: vec![Method::Get, Method::Head],
            terminal: false,
            compression: CompressionOptions::default(),
        }
    }
}

impl StaticHandlerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_page(mut self, page: Option<&str>) -> Self {
        self.default_page = page.map(str::to_string);
        self
    }

    pub fn with_methods(mut self, methods: Vec<Method>) -> Self {
        self.methods = methods;
        self
    }

    pub fn with_terminal(mut self, terminal: bool) -> Self {
        self.terminal = terminal;
        self
    }

    pub fn with_compression(mut self, compression: CompressionOptions) -> Self {
        self.compression = compression;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = AppOptions::default();
        assert_eq!(options.default_code, 404);
        assert!(options.validate().is_ok());

        let compression = CompressionOptions::default();
        assert_eq!(
            compression.compression,
            Some(vec![Encoding::Brotli, Encoding::Gzip, Encoding::Deflate])
        );

        let static_options = StaticHandlerOptions::default();
        assert_eq!(static_options.default_page.as_deref(), Some("index.html"));
        assert_eq!(static_options.methods, vec![Method::Get, Method::Head]);
        assert!(!static_options.terminal);
    }

    #[test]
    fn test_partial_json() {
        let options: AppOptions = serde_json::from_str(r#"{"default_code": 410}"#).unwrap();
        assert_eq!(options.default_code, 410);
        assert_eq!(options.listen_address, "127.0.0.1");

        let compression: CompressionOptions =
            serde_json::from_str(r#"{"compression": ["gzip", "br"]}"#).unwrap();
        assert_eq!(compression.compression, Some(vec![Encoding::Gzip, Encoding::Brotli]));

        let compression: CompressionOptions =
            serde_json::from_str(r#"{"compression": null}"#).unwrap();
        assert_eq!(compression.compression, None);

        let static_options: StaticHandlerOptions =
            serde_json::from_str(r#"{"methods": ["GET"], "terminal": true}"#).unwrap();
        assert_eq!(static_options.methods, vec![Method::Get]);
        assert!(static_options.terminal);
        assert_eq!(static_options.default_page.as_deref(), Some("index.html"));
    }

    #[test]
    fn test_unknown_encoding_rejected() {
        let result: Result<CompressionOptions, _> =
            serde_json::from_str(r#"{"compression": ["zstd"]}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_validate() {
        assert!(AppOptions::new().with_default_code(42).validate().is_err());
        assert!(AppOptions::new().with_worker_threads(0).validate().is_err());
    }
}
