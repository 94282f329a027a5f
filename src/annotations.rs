//! Typed side-channel metadata attached to a workflow definition.
//!
//! Each annotation is a marker type with a value type and a default, looked
//! up by type. Unset annotations read as their default.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub trait Annotation: 'static {
    type Value: Clone + Send + Sync + 'static;
    const NAME: &'static str;

    fn default_value() -> Self::Value;
}

/// Record defects as a `Complete` failure instead of crashing the attempt.
pub struct CaptureDefects;

impl Annotation for CaptureDefects {
    type Value = bool;
    const NAME: &'static str = "CaptureDefects";

    fn default_value() -> bool {
        true
    }
}

/// Turn a failing body into a `Suspended` result so it can be resumed.
pub struct SuspendOnFailure;

impl Annotation for SuspendOnFailure {
    type Value = bool;
    const NAME: &'static str = "SuspendOnFailure";

    fn default_value() -> bool {
        false
    }
}

#[derive(Clone, Default)]
pub struct Annotations {
    entries: HashMap<TypeId, (&'static str, Arc<dyn Any + Send + Sync>)>,
}

impl Annotations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<A: Annotation>(mut self, value: A::Value) -> Self {
        self.set::<A>(value);
        self
    }

    pub fn set<A: Annotation>(&mut self, value: A::Value) {
        self.entries
            .insert(TypeId::of::<A>(), (A::NAME, Arc::new(value)));
    }

    pub fn get<A: Annotation>(&self) -> A::Value {
        self.entries
            .get(&TypeId::of::<A>())
            .and_then(|(_, value)| value.downcast_ref::<A::Value>())
            .cloned()
            .unwrap_or_else(A::default_value)
    }

    pub fn contains<A: Annotation>(&self) -> bool {
        self.entries.contains_key(&TypeId::of::<A>())
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.entries.values().map(|(name, _)| *name).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for Annotations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
