//! Endpoint registry: named targets and the members they expose.
//!
//! Targets implement [`Target::lookup`] instead of being reflected over. A
//! member is either callable (a method closure that owns its receiver) or a
//! plain value that can be read with a zero-argument query.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::bridge::protocol::Invoke;
use crate::error::{BridgeError, EndpointError};

pub type EndpointResult = Result<Value, EndpointError>;

/// Requests cancellation of an in-flight deferred result.
#[derive(Clone)]
pub struct CancelHandle(Arc<dyn Fn() + Send + Sync>);

impl CancelHandle {
    pub fn new(cancel: impl Fn() + Send + Sync + 'static) -> Self {
        Self(Arc::new(cancel))
    }

    pub fn cancel(&self) {
        (self.0)()
    }
}

impl From<CancellationToken> for CancelHandle {
    fn from(token: CancellationToken) -> Self {
        Self::new(move || token.cancel())
    }
}

impl std::fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CancelHandle")
    }
}

/// What invoking an endpoint produced.
pub enum Invocation {
    Immediate(Value),
    Deferred {
        future: BoxFuture<'static, EndpointResult>,
        cancel: Option<CancelHandle>,
    },
}

impl Invocation {
    pub fn deferred(future: impl Future<Output = EndpointResult> + Send + 'static) -> Self {
        Self::Deferred {
            future: future.boxed(),
            cancel: None,
        }
    }

    pub fn cancellable(
        future: impl Future<Output = EndpointResult> + Send + 'static,
        cancel: impl Into<CancelHandle>,
    ) -> Self {
        Self::Deferred {
            future: future.boxed(),
            cancel: Some(cancel.into()),
        }
    }
}

impl std::fmt::Debug for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Immediate(value) => f.debug_tuple("Immediate").field(value).finish(),
            Self::Deferred { cancel, .. } => f
                .debug_struct("Deferred")
                .field("cancellable", &cancel.is_some())
                .finish(),
        }
    }
}

/// A callable member.
pub type Method = Arc<dyn Fn(Vec<Value>) -> Result<Invocation, EndpointError> + Send + Sync>;

pub enum Lookup {
    Callable(Method),
    Value(Value),
    NotFound,
}

/// An object whose members can be reached by remote requests.
pub trait Target: Send + Sync {
    fn lookup(&self, endpoint: &str) -> Lookup;
}

enum Member {
    Method(Method),
    Field(Arc<dyn Fn() -> Value + Send + Sync>),
}

/// A [`Target`] assembled from closures.
///
/// Methods that need shared state capture it (usually an `Arc`) so that every
/// invocation sees the same receiver.
#[derive(Default)]
pub struct ObjectTarget {
    members: HashMap<String, Member>,
}

impl ObjectTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Synchronous method returning its result directly.
    pub fn method<F>(mut self, name: impl Into<String>, method: F) -> Self
    where
        F: Fn(Vec<Value>) -> EndpointResult + Send + Sync + 'static,
    {
        let method: Method = Arc::new(move |args| method(args).map(Invocation::Immediate));
        self.members.insert(name.into(), Member::Method(method));
        self
    }

    /// Method whose result arrives later and cannot be cancelled.
    pub fn async_method<F, Fut>(mut self, name: impl Into<String>, method: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = EndpointResult> + Send + 'static,
    {
        let method: Method = Arc::new(move |args| Ok(Invocation::deferred(method(args))));
        self.members.insert(name.into(), Member::Method(method));
        self
    }

    /// Method whose result arrives later and observes a cancellation token.
    pub fn cancellable_method<F, Fut>(mut self, name: impl Into<String>, method: F) -> Self
    where
        F: Fn(Vec<Value>, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = EndpointResult> + Send + 'static,
    {
        let method: Method = Arc::new(move |args| {
            let token = CancellationToken::new();
            Ok(Invocation::cancellable(method(args, token.clone()), token))
        });
        self.members.insert(name.into(), Member::Method(method));
        self
    }

    /// Method that builds its own [`Invocation`].
    pub fn raw_method<F>(mut self, name: impl Into<String>, method: F) -> Self
    where
        F: Fn(Vec<Value>) -> Result<Invocation, EndpointError> + Send + Sync + 'static,
    {
        self.members
            .insert(name.into(), Member::Method(Arc::new(method)));
        self
    }

    /// Readable member; `getter` runs on every lookup.
    pub fn field<F>(mut self, name: impl Into<String>, getter: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        self.members
            .insert(name.into(), Member::Field(Arc::new(getter)));
        self
    }

    /// Readable member with a fixed value.
    pub fn value(self, name: impl Into<String>, value: Value) -> Self {
        self.field(name, move || value.clone())
    }
}

impl Target for ObjectTarget {
    fn lookup(&self, endpoint: &str) -> Lookup {
        match self.members.get(endpoint) {
            Some(Member::Method(method)) => Lookup::Callable(Arc::clone(method)),
            Some(Member::Field(getter)) => Lookup::Value(getter()),
            None => Lookup::NotFound,
        }
    }
}

/// Targets reachable by name. Owned by the host; cloning shares the registry.
#[derive(Clone, Default)]
pub struct Refs {
    targets: Arc<DashMap<String, Arc<dyn Target>>>,
}

impl Refs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: impl Into<String>, target: impl Target + 'static) {
        self.targets.insert(name.into(), Arc::new(target));
    }

    pub fn remove(&self, name: &str) -> bool {
        self.targets.remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Target>> {
        self.targets.get(name).map(|entry| Arc::clone(entry.value()))
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Resolve `invoke` against the registry and invoke it.
    pub fn resolve(&self, invoke: Invoke) -> Result<Invocation, BridgeError> {
        let Invoke {
            target,
            endpoint,
            args,
        } = invoke;

        let object = self
            .get(&target)
            .ok_or_else(|| BridgeError::NoSuchTarget(target.clone()))?;

        match object.lookup(&endpoint) {
            Lookup::Callable(method) => Ok(method(args)?),
            Lookup::Value(value) if args.is_empty() => Ok(Invocation::Immediate(value)),
            Lookup::Value(_) => Err(BridgeError::NotCallable { target, endpoint }),
            Lookup::NotFound => Err(BridgeError::NoSuchEndpoint { target, endpoint }),
        }
    }
}

/// Read argument `index` as `T`, failing with a message naming the argument.
pub fn arg<T: serde::de::DeserializeOwned>(args: &[Value], index: usize) -> Result<T, EndpointError> {
    let value = args
        .get(index)
        .ok_or_else(|| EndpointError::new(format!("missing argument {index}")))?;
    serde_json::from_value(value.clone())
        .map_err(|e| EndpointError::new(format!("argument {index}: {e}")))
}
