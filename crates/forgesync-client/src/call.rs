//! Call descriptors and promise handles.
//!
//! A `CallDescriptor` is the opaque unit the engine hands to a batch:
//! `(method, positional args, named args)`. Named args ride the wire as a
//! trailing struct carrying a `__starstar` marker, the convention the hub
//! uses to distinguish them from a positional struct.
//!
//! A `Promise` is a handle to one slot of a batch. It stays unsettled until
//! the batch executes; entities hold promises during the read phase and read
//! them only once the processor has moved them to the compare phase.

use forgesync_core::Fault;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::{Arc, OnceLock};

/// Marker key flagging the trailing named-argument struct.
pub const STARSTAR_KEY: &str = "__starstar";

/// One remote call: method name, positional arguments, named arguments.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CallDescriptor {
    pub method: String,
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
}

impl CallDescriptor {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            args: Vec::new(),
            kwargs: Map::new(),
        }
    }

    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(name.into(), value.into());
        self
    }

    /// Positional parameters as they appear on the wire: the args, plus the
    /// kwargs struct (with the marker) when any named args are present.
    pub fn wire_params(&self) -> Vec<Value> {
        let mut params = self.args.clone();
        if !self.kwargs.is_empty() {
            let mut kw = self.kwargs.clone();
            kw.insert(STARSTAR_KEY.to_string(), Value::Bool(true));
            params.push(Value::Object(kw));
        }
        params
    }
}

impl std::fmt::Display for CallDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({} args)", self.method, self.args.len() + usize::from(!self.kwargs.is_empty()))
    }
}

/// Outcome of one call within a batch.
pub type CallOutcome = Result<Value, Fault>;

/// Handle to one slot of a multicall batch. Cheaply cloneable; settled
/// exactly once when the batch completes.
#[derive(Clone, Debug)]
pub struct Promise {
    descriptor: Arc<CallDescriptor>,
    slot: Arc<OnceLock<CallOutcome>>,
}

impl Promise {
    pub(crate) fn new(descriptor: CallDescriptor) -> Self {
        Self {
            descriptor: Arc::new(descriptor),
            slot: Arc::new(OnceLock::new()),
        }
    }

    /// A pre-settled promise, for tests and offline evaluation.
    pub fn resolved(descriptor: CallDescriptor, outcome: CallOutcome) -> Self {
        let promise = Self::new(descriptor);
        promise.settle(outcome);
        promise
    }

    pub fn descriptor(&self) -> &CallDescriptor {
        &self.descriptor
    }

    pub fn method(&self) -> &str {
        &self.descriptor.method
    }

    pub fn settled(&self) -> bool {
        self.slot.get().is_some()
    }

    /// The resolved value. Reading an unsettled promise is a phase-ordering
    /// bug and surfaces as a fault rather than a panic.
    pub fn value(&self) -> Result<&Value, Fault> {
        match self.slot.get() {
            Some(Ok(value)) => Ok(value),
            Some(Err(fault)) => Err(fault.clone()),
            None => Err(Fault::transport("promise read before batch completion")),
        }
    }

    pub(crate) fn settle(&self, outcome: CallOutcome) {
        let _ = self.slot.set(outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn kwargs_ride_as_trailing_struct() {
        let call = CallDescriptor::new("editTag")
            .arg("fedora-42-build")
            .kwarg("locked", true);
        let params = call.wire_params();
        assert_eq!(params.len(), 2);
        assert_eq!(params[0], json!("fedora-42-build"));
        assert_eq!(params[1]["locked"], json!(true));
        assert_eq!(params[1][STARSTAR_KEY], json!(true));
    }

    #[test]
    fn no_kwargs_no_trailing_struct() {
        let call = CallDescriptor::new("getTag").arg("fedora-42-build");
        assert_eq!(call.wire_params().len(), 1);
    }

    #[test]
    fn promise_lifecycle() {
        let promise = Promise::new(CallDescriptor::new("getTag"));
        assert!(!promise.settled());
        assert!(promise.value().is_err());

        promise.settle(Ok(json!({"name": "fedora-42-build"})));
        assert!(promise.settled());
        assert_eq!(promise.value().unwrap()["name"], json!("fedora-42-build"));

        // settle is first-write-wins
        promise.settle(Err(Fault::new(1, "late")));
        assert!(promise.value().is_ok());
    }
}
