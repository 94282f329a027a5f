//! Outcome taxonomy shared by workflows, activities and deferreds.
//!
//! A body either succeeds or fails with a [`Cause`]:
//! - `Fail` carries a typed, expected error from the declared error contract.
//! - `Die` is a defect (panic, undecodable value, engine misuse).
//! - `Interrupt` is cancellation; it also doubles as the suspend signal when
//!   the owning instance has been marked suspended.
//!
//! The engine stores the encoded forms ([`CauseEncoded`], [`ExitEncoded`]).

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codec::{self, CodecError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "_tag", content = "value")]
pub enum Cause<E> {
    Fail(E),
    Die(String),
    Interrupt,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "_tag", content = "value")]
pub enum Exit<A, E> {
    Success(A),
    Failure(Cause<E>),
}

pub type CauseEncoded = Cause<Value>;
pub type ExitEncoded = Exit<Value, Value>;

impl<E> Cause<E> {
    pub fn fail(error: E) -> Self {
        Cause::Fail(error)
    }

    pub fn die(defect: impl Into<String>) -> Self {
        Cause::Die(defect.into())
    }

    pub fn is_interrupted_only(&self) -> bool {
        matches!(self, Cause::Interrupt)
    }

    pub fn is_die(&self) -> bool {
        matches!(self, Cause::Die(_))
    }

    pub fn is_fail(&self) -> bool {
        matches!(self, Cause::Fail(_))
    }

    /// Transform the typed failure, leaving defects and interrupts untouched.
    pub fn map_fail<E2>(self, f: impl FnOnce(E) -> E2) -> Cause<E2> {
        match self {
            Cause::Fail(e) => Cause::Fail(f(e)),
            Cause::Die(d) => Cause::Die(d),
            Cause::Interrupt => Cause::Interrupt,
        }
    }

    /// Widen the typed failure into a caller's error type.
    pub fn into_fail<E2: From<E>>(self) -> Cause<E2> {
        self.map_fail(E2::from)
    }
}

impl<E: Serialize> Cause<E> {
    /// Encode for storage. A failure that cannot be encoded becomes a defect.
    pub fn encode(&self) -> CauseEncoded {
        match self {
            Cause::Fail(e) => match codec::encode(e) {
                Ok(v) => Cause::Fail(v),
                Err(issue) => Cause::Die(issue.to_string()),
            },
            Cause::Die(d) => Cause::Die(d.clone()),
            Cause::Interrupt => Cause::Interrupt,
        }
    }
}

impl Cause<Value> {
    /// Decode a stored cause into the typed contract of `E`.
    pub fn decode<E: DeserializeOwned>(self) -> Cause<E> {
        match self {
            Cause::Fail(v) => match codec::decode(&v) {
                Ok(e) => Cause::Fail(e),
                Err(issue) => Cause::Die(issue.to_string()),
            },
            Cause::Die(d) => Cause::Die(d),
            Cause::Interrupt => Cause::Interrupt,
        }
    }

    /// Collapse any non-interrupt cause into a single defect.
    pub fn squash(self) -> CauseEncoded {
        match self {
            Cause::Fail(v) => Cause::Die(render(&v)),
            other => other,
        }
    }

    /// Re-type a cause whose failure channel is never used by the caller.
    /// A stray failure value is surfaced as a defect.
    pub fn retype<E>(self) -> Cause<E> {
        match self {
            Cause::Fail(v) => Cause::Die(render(&v)),
            Cause::Die(d) => Cause::Die(d),
            Cause::Interrupt => Cause::Interrupt,
        }
    }
}

impl<E> From<CodecError> for Cause<E> {
    fn from(issue: CodecError) -> Self {
        Cause::Die(issue.to_string())
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl<E: fmt::Display> fmt::Display for Cause<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cause::Fail(e) => write!(f, "Fail: {e}"),
            Cause::Die(d) => write!(f, "Die: {d}"),
            Cause::Interrupt => write!(f, "Interrupt"),
        }
    }
}

impl<A, E> Exit<A, E> {
    pub fn into_result(self) -> Result<A, Cause<E>> {
        match self {
            Exit::Success(a) => Ok(a),
            Exit::Failure(c) => Err(c),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Exit::Success(_))
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, Exit::Failure(Cause::Interrupt))
    }
}

impl<A, E> From<Result<A, Cause<E>>> for Exit<A, E> {
    fn from(result: Result<A, Cause<E>>) -> Self {
        match result {
            Ok(a) => Exit::Success(a),
            Err(c) => Exit::Failure(c),
        }
    }
}

impl<A: Serialize, E: Serialize> Exit<A, E> {
    pub fn encode(&self) -> ExitEncoded {
        match self {
            Exit::Success(a) => match codec::encode(a) {
                Ok(v) => Exit::Success(v),
                Err(issue) => Exit::Failure(Cause::Die(issue.to_string())),
            },
            Exit::Failure(c) => Exit::Failure(c.encode()),
        }
    }
}

impl Exit<Value, Value> {
    /// Encode a borrowed typed result without consuming it.
    pub fn from_result<A: Serialize, E: Serialize>(result: &Result<A, Cause<E>>) -> ExitEncoded {
        match result {
            Ok(a) => match codec::encode(a) {
                Ok(v) => Exit::Success(v),
                Err(issue) => Exit::Failure(Cause::Die(issue.to_string())),
            },
            Err(c) => Exit::Failure(c.encode()),
        }
    }

    pub fn decode<A: DeserializeOwned, E: DeserializeOwned>(self) -> Result<A, Cause<E>> {
        match self {
            Exit::Success(v) => codec::decode(&v).map_err(|issue| Cause::Die(issue.to_string())),
            Exit::Failure(c) => Err(c.decode()),
        }
    }
}

/// Render a caught panic payload as a defect message.
pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}
