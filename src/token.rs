//! Capability tokens for completing a deferred from outside its execution.
//!
//! A token is `base64url(json([workflow_name, execution_id, deferred_name]))`
//! without padding. It carries everything needed to address the deferred, so
//! any process can decode it without engine state.

use std::fmt;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Token(String);

/// Decoded token contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenParts {
    pub workflow_name: String,
    pub execution_id: String,
    pub deferred_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("token is not valid base64url: {0}")]
    Encoding(String),
    #[error("token payload is not a [workflow, execution, deferred] triple: {0}")]
    Payload(String),
}

impl Token {
    pub fn new(workflow_name: &str, execution_id: &str, deferred_name: &str) -> Self {
        let json = serde_json::json!([workflow_name, execution_id, deferred_name]).to_string();
        Token(URL_SAFE_NO_PAD.encode(json))
    }

    pub fn parse(&self) -> Result<TokenParts, TokenError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(self.0.as_bytes())
            .map_err(|e| TokenError::Encoding(e.to_string()))?;
        let (workflow_name, execution_id, deferred_name): (String, String, String) =
            serde_json::from_slice(&bytes).map_err(|e| TokenError::Payload(e.to_string()))?;
        Ok(TokenParts {
            workflow_name,
            execution_id,
            deferred_name,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Token {
    fn from(s: String) -> Self {
        Token(s)
    }
}

impl From<&str> for Token {
    fn from(s: &str) -> Self {
        Token(s.to_string())
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
