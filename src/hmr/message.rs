//! HMR Payload Protocol
//!
//! Defines the JSON message format dispatched over HMR channels to browser
//! clients.
//!
//! # Payload Types
//!
//! - `update`: fine-grained js/css updates applied at accept boundaries
//! - `full-reload`: no boundary found, the page must reload
//! - `prune`: modules that are no longer imported and should be disposed
//! - `custom`: plugin-defined events
//! - `error`: transform error to render in the client overlay

use serde::{Deserialize, Serialize};

/// Discriminates js and css updates; css updates swap a stylesheet link,
/// js updates re-import the boundary module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateKind {
    #[serde(rename = "js-update")]
    JsUpdate,
    #[serde(rename = "css-update")]
    CssUpdate,
}

/// One boundary-applied update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Update {
    #[serde(rename = "type")]
    pub kind: UpdateKind,
    /// Boundary module path.
    pub path: String,
    /// Module whose update the boundary accepted.
    pub accepted_path: String,
    pub timestamp: u64,
    /// The accepted module is an asset that needs the `?import` marker.
    pub explicit_import_required: bool,
    /// The boundary sits inside an import cycle; the client reloads instead
    /// of re-running the accept callback with possibly stale exports.
    pub is_within_circular_import: bool,
    /// Server-side modules invalidated during the same propagation pass.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ssr_invalidates: Vec<String>,
}

/// Error detail rendered by the client overlay.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// HMR payload sent over a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum HmrPayload {
    /// Fine-grained updates
    Update { updates: Vec<Update> },

    /// Full page reload (no boundary found or optimizer re-bundle)
    #[serde(rename_all = "camelCase")]
    FullReload {
        /// Restrict the reload to clients viewing this path
        #[serde(skip_serializing_if = "Option::is_none")]
        path: Option<String>,
        /// File that triggered the reload (for client logging)
        #[serde(skip_serializing_if = "Option::is_none")]
        triggered_by: Option<String>,
    },

    /// Modules no longer imported by anything
    Prune { paths: Vec<String> },

    /// Plugin-defined event
    Custom {
        event: String,
        #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
        data: serde_json::Value,
    },

    /// Transform error (display overlay, no reload)
    Error { err: ErrorPayload },
}

impl HmrPayload {
    /// Create a full-reload payload naming the triggering file.
    pub fn full_reload(triggered_by: impl Into<String>) -> Self {
        Self::FullReload {
            path: None,
            triggered_by: Some(triggered_by.into()),
        }
    }

    /// Create a prune payload.
    pub fn prune(paths: Vec<String>) -> Self {
        Self::Prune { paths }
    }

    /// Create an error payload.
    pub fn error(message: impl Into<String>, id: Option<String>) -> Self {
        Self::Error {
            err: ErrorPayload {
                message: message.into(),
                stack: None,
                id,
            },
        }
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"type":"full-reload"}"#.to_string())
    }

    /// Parse from JSON string.
    pub fn from_json(s: &str) -> Option<Self> {
        serde_json::from_str(s).ok()
    }
}
