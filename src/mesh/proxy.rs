//! The Proxy Generator of spec §4.5: a stand-in for services this node
//! does not implement locally, which serializes arguments and forwards
//! the call through the Invocation Engine.
//!
//! Without build-time interface reflection (spec §9 explicitly rules out
//! carrying a runtime IL-emitting code generator across the port), one
//! generic `RemoteProxy` plays the role of every per-interface dispatcher
//! the ground-truth system would synthesize: callers provide the
//! `(service, method)` pair and `bincode`-serializable argument/return
//! types at the call site instead of through generated code.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

use crate::mesh::communication::ScopeId;
use crate::mesh::error::{ErrorKind, Result, ResultWrappedExt};
use crate::mesh::invocation::InvocationEngine;

/// A dispatcher bound to one remote service name and (optionally) one
/// scope id, generalizing "one entry per `(service, method) -> handler`"
/// (SPEC_FULL §4.5) into a single reusable type.
pub struct RemoteProxy {
    engine: Arc<InvocationEngine>,
    service: String,
    scope: Option<ScopeId>,
}

impl RemoteProxy {
    pub fn new(engine: Arc<InvocationEngine>, service: impl Into<String>) -> Self {
        RemoteProxy { engine, service: service.into(), scope: None }
    }

    /// Binds this proxy to a scoped remote instance (spec §3 "Scope
    /// identity").
    pub fn scoped(mut self, scope: ScopeId) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Invokes `method` on the remote service (spec §4.5 steps 1-4):
    /// serializes `args`, calls the engine with `"service.method"`,
    /// deserializes the result.
    pub async fn call<A, R>(&self, method: &str, args: &A) -> Result<R>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        let procedure = format!("{}.{}", self.service, method);
        let payload = bincode::serialize(args).wrapped(ErrorKind::Other)?;
        let result_bytes = self.engine.call(self.scope, &procedure, payload).await?;
        bincode::deserialize(&result_bytes).wrapped(ErrorKind::Other)
    }
}

#[cfg(test)]
mod tests {
    // `RemoteProxy` is exercised end-to-end in `tests/` against a live
    // invocation engine; unit-testing it here would just re-implement
    // `InvocationEngine::call` with extra steps.
}
