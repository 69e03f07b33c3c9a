use reqwest::StatusCode;
use serde::Serialize;
use thiserror::Error;
use url::Url;

pub type Result<T, E = CalendlyError> = std::result::Result<T, E>;

/// Upstream bodies are cut to this many bytes before being carried in an error.
const BODY_SNIPPET_LIMIT: usize = 1024;

/// Machine-readable category of a failure, reported next to the message in every error envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Local configuration is missing or unusable
    Config,
    /// Token empty or rejected by Calendly
    Auth,
    /// Calendly answered with an error, was unreachable, or sent something unreadable
    Upstream,
    /// A value required to continue was missing
    Validation,
}

/// Every failure a tool invocation can run into.
#[derive(Debug, Error)]
pub enum CalendlyError {
    // ------------------- Config -------------------
    #[error("{var} environment variable is not set")]
    MissingToken { var: String },

    #[error("invalid configuration: {msg}")]
    Config { msg: String },

    // ------------------- Auth -------------------
    #[error("refusing to call Calendly with an empty token")]
    EmptyToken,

    #[error("Calendly rejected the token: HTTP {status}{body}")]
    Unauthorized { status: StatusCode, body: String },

    // ------------------- HTTP / network -------------------
    #[error("HTTP request failed for {url}: {source}")]
    Http {
        url: Url,
        #[source]
        source: reqwest::Error,
    },

    #[error("unexpected HTTP status {status} from {url}{body}")]
    HttpStatus {
        url: Url,
        status: StatusCode,
        body: String,
    },

    #[error("malformed response from {url}: {source}")]
    Decode {
        url: Url,
        #[source]
        source: serde_json::Error,
    },

    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    // ------------------- Domain -------------------
    #[error("{context} has no {field}")]
    MissingField {
        field: &'static str,
        context: String,
    },
}

impl CalendlyError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CalendlyError::MissingToken { .. } | CalendlyError::Config { .. } => ErrorKind::Config,
            CalendlyError::EmptyToken | CalendlyError::Unauthorized { .. } => ErrorKind::Auth,
            CalendlyError::Http { .. }
            | CalendlyError::HttpStatus { .. }
            | CalendlyError::Decode { .. }
            | CalendlyError::Url(_) => ErrorKind::Upstream,
            CalendlyError::MissingField { .. } => ErrorKind::Validation,
        }
    }

    /// HTTP status returned by Calendly, when the failure came with one.
    pub fn status(&self) -> Option<u16> {
        match self {
            CalendlyError::Unauthorized { status, .. } | CalendlyError::HttpStatus { status, .. } => {
                Some(status.as_u16())
            }
            _ => None,
        }
    }

    /// Build the error for a non-2xx response.
    pub fn from_status(url: Url, status: StatusCode, body: &str) -> Self {
        let body = snippet(body);
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            CalendlyError::Unauthorized { status, body }
        } else {
            CalendlyError::HttpStatus { url, status, body }
        }
    }
}

/// Formats a response body as `" - <first KiB>"`, or nothing when it is blank.
fn snippet(body: &str) -> String {
    let body = body.trim();
    if body.is_empty() {
        return String::new();
    }
    let mut end = body.len().min(BODY_SNIPPET_LIMIT);
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!(" - {}", &body[..end])
}
