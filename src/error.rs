use thiserror::Error;

/// Failure classes surfaced by adapters, the request layer and the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Configuration,
    Fetch,
    Blocked,
    NotFound,
    Parse,
    Anomaly,
    Other,
}

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("invalid descriptor for '{source_name}': {detail}")]
    Configuration { source_name: String, detail: String },

    #[error("request to {url} failed: {message}")]
    Fetch {
        url: String,
        status: Option<u16>,
        timed_out: bool,
        message: String,
    },

    #[error("request to {url} was blocked (status {status})")]
    Blocked { url: String, status: u16 },

    #[error("{url} returned 404")]
    NotFound { url: String },

    #[error("[{source_name}] could not parse {what} from {url}")]
    Parse {
        source_name: String,
        url: String,
        what: String,
    },

    #[error("[{source_name}] chapter list of '{series_id}' was reset: {stored} stored, {fetched} fetched, no overlap")]
    Anomaly {
        source_name: String,
        series_id: String,
        stored: usize,
        fetched: usize,
    },

    #[error("'{source_name}' does not support {capability}")]
    Unsupported {
        source_name: String,
        capability: &'static str,
    },

    #[error("no enabled scanlator matches '{0}'")]
    UnknownSource(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("a sweep is already in progress")]
    SweepInProgress,
}

impl ScanError {
    pub fn configuration(source_name: impl Into<String>, detail: impl Into<String>) -> Self {
        ScanError::Configuration {
            source_name: source_name.into(),
            detail: detail.into(),
        }
    }

    pub fn parse(source_name: &str, url: &str, what: impl Into<String>) -> Self {
        ScanError::Parse {
            source_name: source_name.to_string(),
            url: url.to_string(),
            what: what.into(),
        }
    }

    pub fn network(url: &str, err: &reqwest::Error) -> Self {
        ScanError::Fetch {
            url: url.to_string(),
            status: err.status().map(|s| s.as_u16()),
            timed_out: err.is_timeout(),
            message: err.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ScanError::Configuration { .. } => ErrorKind::Configuration,
            ScanError::Fetch { .. } => ErrorKind::Fetch,
            ScanError::Blocked { .. } => ErrorKind::Blocked,
            ScanError::NotFound { .. } => ErrorKind::NotFound,
            ScanError::Parse { .. } => ErrorKind::Parse,
            ScanError::Anomaly { .. } => ErrorKind::Anomaly,
            _ => ErrorKind::Other,
        }
    }

    /// Whether the failure says something about the whole source rather than
    /// one series. The engine stops polling that source for the rest of the
    /// sweep when this is true.
    pub fn is_source_level(&self) -> bool {
        match self {
            ScanError::Blocked { .. } => true,
            ScanError::Fetch {
                status, timed_out, ..
            } => match status {
                None => true,
                Some(code) => *timed_out || *code == 429 || *code >= 500,
            },
            _ => false,
        }
    }
}

impl From<rusqlite::Error> for ScanError {
    fn from(err: rusqlite::Error) -> Self {
        ScanError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for ScanError {
    fn from(err: serde_json::Error) -> Self {
        ScanError::Storage(format!("serialization failed: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetch_error(status: Option<u16>, timed_out: bool) -> ScanError {
        ScanError::Fetch {
            url: "https://example.org".to_string(),
            status,
            timed_out,
            message: "boom".to_string(),
        }
    }

    #[test]
    fn test_source_level_classification() {
        assert!(fetch_error(None, true).is_source_level());
        assert!(fetch_error(None, false).is_source_level());
        assert!(fetch_error(Some(503), false).is_source_level());
        assert!(fetch_error(Some(429), false).is_source_level());
        assert!(!fetch_error(Some(410), false).is_source_level());

        let blocked = ScanError::Blocked {
            url: "https://example.org".to_string(),
            status: 403,
        };
        assert!(blocked.is_source_level());
        assert_eq!(blocked.kind(), ErrorKind::Blocked);

        let missing = ScanError::NotFound {
            url: "https://example.org/gone".to_string(),
        };
        assert!(!missing.is_source_level());
        assert!(!ScanError::parse("asura", "https://example.org", "title").is_source_level());
    }

    #[test]
    fn test_configuration_message_names_source() {
        let err = ScanError::configuration("asura", "missing field `url_regex`");
        assert!(err.to_string().contains("asura"));
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }
}
