//! The contact form: turns one SCGI request into a stored message and a
//! Gemini response.

use std::fmt;

use chrono::{DateTime, Utc};
use percent_encoding::percent_decode_str;

use crate::{
    scgi::ScgiRequest,
    store::{MessageStore, NewMessage},
};

pub const PROMPT: &str = "Please enter your message.";
pub const THANKS: &str = "Thank you for your message!";
pub const FAILURE: &str = "Something went wrong. Error has been logged.";

/// CGI variables the contact form reads. Missing variables are empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContactRequest {
    pub script_path: String,
    pub path_info: String,
    pub tls_client_hash: String,
    pub remote_addr: String,
    /// Query string exactly as received, still percent-encoded.
    pub query_string: String,
}

impl ContactRequest {
    pub fn from_scgi(request: &ScgiRequest) -> Self {
        let var = |name: &str| request.header(name).unwrap_or_default().to_owned();
        Self {
            script_path: var("SCRIPT_PATH"),
            path_info: var("PATH_INFO"),
            tls_client_hash: var("TLS_CLIENT_HASH"),
            remote_addr: var("REMOTE_ADDR"),
            query_string: var("QUERY_STRING"),
        }
    }

    /// The visitor's message: the query string with percent escapes decoded.
    pub fn message(&self) -> String {
        percent_decode_str(&self.query_string)
            .decode_utf8_lossy()
            .into_owned()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeminiResponse {
    Input { prompt: String },
    Success { mime: String, body: String },
    TemporaryFailure { meta: String },
}

impl GeminiResponse {
    pub fn status(&self) -> u16 {
        match self {
            Self::Input { .. } => 10,
            Self::Success { .. } => 20,
            Self::TemporaryFailure { .. } => 40,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

impl fmt::Display for GeminiResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input { prompt } => write!(f, "10 {prompt}\r\n"),
            Self::Success { mime, body } => write!(f, "20 {mime}\r\n{body}\n"),
            Self::TemporaryFailure { meta } => write!(f, "40 {meta}\r\n"),
        }
    }
}

/// Stores the message carried by `request`, or asks for one when it is empty.
///
/// Storage failures are logged here and answered with a generic failure; no
/// internal detail reaches the visitor.
pub fn handle(
    store: &MessageStore,
    request: &ContactRequest,
    now: DateTime<Utc>,
) -> GeminiResponse {
    let message = request.message();
    if message.is_empty() {
        return GeminiResponse::Input {
            prompt: PROMPT.to_owned(),
        };
    }

    let new_message = NewMessage {
        script_path: request.script_path.clone(),
        path_info: request.path_info.clone(),
        tls_client_hash: request.tls_client_hash.clone(),
        ip_addr: request.remote_addr.clone(),
        time: now,
        message,
    };
    match store.insert(&new_message) {
        Ok(id) => {
            tracing::info!(%id, script_path = %request.script_path, "received message");
            GeminiResponse::Success {
                mime: "text/plain".to_owned(),
                body: THANKS.to_owned(),
            }
        }
        Err(err) => {
            tracing::error!(
                error = %err,
                script_path = %request.script_path,
                remote_addr = %request.remote_addr,
                "failed to store message"
            );
            GeminiResponse::TemporaryFailure {
                meta: FAILURE.to_owned(),
            }
        }
    }
}
