//! Deterministic, content-addressed identifiers.
//!
//! Execution ids are a SHA-256 digest of `"{workflow}-{idempotency_key}"`.
//! Memo and deferred keys extend the execution id with `/`-separated parts,
//! so every table can live in a flat string-keyed store.

use sha2::{Digest, Sha256};

pub fn digest(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn execution_id(workflow_name: &str, idempotency_key: &str) -> String {
    digest(&format!("{workflow_name}-{idempotency_key}"))
}

pub fn activity_key(execution_id: &str, activity_name: &str, attempt: u32) -> String {
    format!("{execution_id}/{activity_name}/{attempt}")
}

pub fn deferred_key(execution_id: &str, deferred_name: &str) -> String {
    format!("{execution_id}/{deferred_name}")
}

pub fn clock_key(execution_id: &str, clock_name: &str) -> String {
    format!("{execution_id}/{clock_name}")
}

/// Key an activity can hand to an external system to deduplicate its side
/// effect. With `attempt`, each logical retry gets its own key.
pub fn activity_idempotency_key(execution_id: &str, key: &str, attempt: Option<u32>) -> String {
    match attempt {
        Some(attempt) => digest(&format!("{execution_id}-{key}-{attempt}")),
        None => digest(&format!("{execution_id}-{key}")),
    }
}
