//! Workflow invocation.
//!
//! Resolves a `WorkflowDefinition` against registered services, rebuilds
//! its arguments through the codec and calls the handler with the live
//! replay context substituted into the context slot.

use std::collections::HashMap;
use std::sync::Arc;

use duraflow_types::definition::{ServiceIdentifier, WorkflowDefinition, WorkflowParameter};
use futures_util::future::BoxFuture;
use tracing::debug;

use crate::codec::{Codec, Durable, TypedValue};
use crate::context::ReplayContext;
use crate::error::WorkflowError;

// ---------------------------------------------------------------------------
// Arguments
// ---------------------------------------------------------------------------

/// One positional argument as seen by a handler.
#[derive(Debug, Clone, PartialEq)]
pub enum Argument {
    /// The slot that receives the replay context (passed separately).
    Context,
    Value(TypedValue),
}

/// Decoded positional arguments for one call.
///
/// Handlers pull values in order with [`next`](Self::next); context slots
/// are skipped since the context is passed as its own parameter.
#[derive(Debug, Clone, Default)]
pub struct Arguments {
    items: Vec<Argument>,
    cursor: usize,
}

impl Arguments {
    pub fn new(items: Vec<Argument>) -> Self {
        Self { items, cursor: 0 }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[Argument] {
        &self.items
    }

    /// Positions of the context slots.
    pub fn context_slots(&self) -> Vec<usize> {
        self.items
            .iter()
            .enumerate()
            .filter(|(_, a)| matches!(a, Argument::Context))
            .map(|(i, _)| i)
            .collect()
    }

    /// Take the next non-context value as `T`.
    pub fn next<T: Durable>(&mut self) -> Result<T, WorkflowError> {
        while let Some(item) = self.items.get(self.cursor) {
            self.cursor += 1;
            if let Argument::Value(value) = item {
                return T::from_typed(value.clone()).map_err(|e| {
                    WorkflowError::InvalidArguments(format!("argument {}: {e}", self.cursor - 1))
                });
            }
        }
        Err(WorkflowError::InvalidArguments(format!(
            "expected more than {} argument(s)",
            self.items.len()
        )))
    }

    /// Fail if any value was left unconsumed.
    pub fn finish(&self) -> Result<(), WorkflowError> {
        let leftover = self.items[self.cursor.min(self.items.len())..]
            .iter()
            .filter(|a| matches!(a, Argument::Value(_)))
            .count();
        if leftover > 0 {
            return Err(WorkflowError::InvalidArguments(format!(
                "{leftover} unexpected argument(s)"
            )));
        }
        Ok(())
    }
}

/// Decode a definition's parameter list into positional arguments.
pub fn build_arguments(
    codec: &Codec,
    parameters: &[WorkflowParameter],
) -> Result<Arguments, WorkflowError> {
    let mut items = Vec::with_capacity(parameters.len());
    for param in parameters {
        if param.is_context() {
            items.push(Argument::Context);
            continue;
        }
        let value = codec.decode(param.type_tag.as_deref(), param.value.as_deref())?;
        items.push(Argument::Value(value));
    }
    Ok(Arguments::new(items))
}

// ---------------------------------------------------------------------------
// Services
// ---------------------------------------------------------------------------

/// A callable workflow method.
pub trait WorkflowMethod: Send + Sync {
    fn call<'a>(
        &'a self,
        ctx: &'a mut ReplayContext,
        args: Arguments,
    ) -> BoxFuture<'a, Result<TypedValue, WorkflowError>>;
}

impl<F> WorkflowMethod for F
where
    F: for<'a> Fn(
            &'a mut ReplayContext,
            Arguments,
        ) -> BoxFuture<'a, Result<TypedValue, WorkflowError>>
        + Send
        + Sync,
{
    fn call<'a>(
        &'a self,
        ctx: &'a mut ReplayContext,
        args: Arguments,
    ) -> BoxFuture<'a, Result<TypedValue, WorkflowError>> {
        self(ctx, args)
    }
}

/// A handler instance exposing named workflow methods.
pub trait WorkflowService: Send + Sync {
    fn invoke<'a>(
        &'a self,
        method: &'a str,
        ctx: &'a mut ReplayContext,
        args: Arguments,
    ) -> BoxFuture<'a, Result<TypedValue, WorkflowError>>;

    /// Method names, for listing.
    fn methods(&self) -> Vec<String>;
}

/// Resolves a service identifier to a live handler instance.
pub trait ServiceInstanceProvider: Send + Sync {
    fn get_instance(
        &self,
        id: &ServiceIdentifier,
    ) -> Result<Arc<dyn WorkflowService>, WorkflowError>;
}

/// Service assembled from individually registered methods.
struct MethodTable {
    name: String,
    methods: HashMap<String, Arc<dyn WorkflowMethod>>,
}

impl WorkflowService for MethodTable {
    fn invoke<'a>(
        &'a self,
        method: &'a str,
        ctx: &'a mut ReplayContext,
        args: Arguments,
    ) -> BoxFuture<'a, Result<TypedValue, WorkflowError>> {
        match self.methods.get(method) {
            Some(handler) => handler.call(ctx, args),
            None => Box::pin(std::future::ready(Err(WorkflowError::UnresolvedMethod {
                service: self.name.clone(),
                method: method.to_string(),
            }))),
        }
    }

    fn methods(&self) -> Vec<String> {
        let mut names: Vec<String> = self.methods.keys().cloned().collect();
        names.sort();
        names
    }
}

/// In-process `ServiceInstanceProvider` keyed by service name.
#[derive(Default)]
pub struct HandlerRegistry {
    tables: HashMap<String, HashMap<String, Arc<dyn WorkflowMethod>>>,
    services: HashMap<String, Arc<dyn WorkflowService>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` as `service.method`. Replaces any earlier handler.
    pub fn register<F>(&mut self, service: &str, method: &str, handler: F) -> &mut Self
    where
        F: for<'a> Fn(
                &'a mut ReplayContext,
                Arguments,
            ) -> BoxFuture<'a, Result<TypedValue, WorkflowError>>
            + Send
            + Sync
            + 'static,
    {
        self.tables
            .entry(service.to_string())
            .or_default()
            .insert(method.to_string(), Arc::new(handler));
        self
    }

    /// Register a whole service implementation under `name`.
    ///
    /// Takes precedence over methods registered individually under the same name.
    pub fn register_service(&mut self, name: &str, service: Arc<dyn WorkflowService>) -> &mut Self {
        self.services.insert(name.to_string(), service);
        self
    }

    /// `(service, methods)` pairs, sorted by service name.
    pub fn catalog(&self) -> Vec<(String, Vec<String>)> {
        let mut names: Vec<&String> = self.tables.keys().chain(self.services.keys()).collect();
        names.sort();
        names.dedup();
        names
            .into_iter()
            .filter_map(|name| {
                self.get_instance(&ServiceIdentifier::new(name.clone()))
                    .ok()
                    .map(|svc| (name.clone(), svc.methods()))
            })
            .collect()
    }
}

impl ServiceInstanceProvider for HandlerRegistry {
    fn get_instance(
        &self,
        id: &ServiceIdentifier,
    ) -> Result<Arc<dyn WorkflowService>, WorkflowError> {
        if let Some(service) = self.services.get(&id.name) {
            return Ok(service.clone());
        }
        let methods = self
            .tables
            .get(&id.name)
            .ok_or_else(|| WorkflowError::UnresolvedService(id.name.clone()))?;
        Ok(Arc::new(MethodTable {
            name: id.name.clone(),
            methods: methods.clone(),
        }))
    }
}

/// Resolve and run the workflow described by `definition`.
pub async fn invoke_workflow(
    provider: &dyn ServiceInstanceProvider,
    codec: &Codec,
    definition: &WorkflowDefinition,
    ctx: &mut ReplayContext,
) -> Result<TypedValue, WorkflowError> {
    let service = provider.get_instance(&definition.service_identifier)?;
    let args = build_arguments(codec, &definition.parameters)?;
    debug!(
        execution_id = %ctx.execution_id(),
        service = %definition.service_identifier,
        method = %definition.method_name,
        args = args.len(),
        "invoking workflow"
    );
    service.invoke(&definition.method_name, ctx, args).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use duraflow_types::execution::{Execution, ExecutionStatus};

    use crate::context::ExecutionStore;
    use crate::repository::{ExecutionRepository, InMemoryExecutionRepository};

    fn add(
        ctx: &mut ReplayContext,
        mut args: Arguments,
    ) -> BoxFuture<'_, Result<TypedValue, WorkflowError>> {
        Box::pin(async move {
            let a: i32 = args.next()?;
            let b: i32 = args.next()?;
            args.finish()?;
            let sum: i32 = ctx.action("sum", || async move { Ok(a + b) }).await?;
            Ok(TypedValue::I32(sum))
        })
    }

    async fn context() -> ReplayContext {
        let repo = Arc::new(InMemoryExecutionRepository::new());
        let mut exec = Execution::queued(b"{}".to_vec(), "[]".to_string());
        exec.status = ExecutionStatus::Running;
        repo.save(&exec).await.unwrap();
        let store: Arc<dyn ExecutionStore> = repo;
        ReplayContext::load(exec.id, store, Arc::new(Codec::new()))
            .await
            .unwrap()
    }

    fn definition(
        service: &str,
        method: &str,
        params: Vec<WorkflowParameter>,
    ) -> WorkflowDefinition {
        WorkflowDefinition {
            service_identifier: ServiceIdentifier::new(service),
            method_name: method.to_string(),
            parameters: params,
        }
    }

    fn int_param(name: &str, v: i32) -> WorkflowParameter {
        WorkflowParameter {
            name: name.to_string(),
            type_tag: Some("i32".to_string()),
            value: Some(v.to_string()),
        }
    }

    #[test]
    fn context_slot_is_marked_not_decoded() {
        let codec = Codec::new();
        let params = vec![int_param("a", 1), WorkflowParameter::context("ctx"), int_param("b", 2)];
        let mut args = build_arguments(&codec, &params).unwrap();
        assert_eq!(args.context_slots(), vec![1]);
        assert_eq!(args.next::<i32>().unwrap(), 1);
        assert_eq!(args.next::<i32>().unwrap(), 2);
        assert!(args.finish().is_ok());
        assert!(args.next::<i32>().is_err());
    }

    #[test]
    fn leftover_arguments_are_rejected() {
        let mut args = Arguments::new(vec![
            Argument::Value(TypedValue::I32(1)),
            Argument::Value(TypedValue::I32(2)),
        ]);
        args.next::<i32>().unwrap();
        assert!(matches!(args.finish(), Err(WorkflowError::InvalidArguments(_))));
    }

    #[test]
    fn unknown_parameter_tag_fails_to_build() {
        let codec = Codec::new();
        let params = vec![WorkflowParameter {
            name: "x".to_string(),
            type_tag: Some("demo.Unknown".to_string()),
            value: Some("{}".to_string()),
        }];
        assert!(matches!(
            build_arguments(&codec, &params),
            Err(WorkflowError::UnsupportedType(_))
        ));
    }

    #[tokio::test]
    async fn registered_method_is_invoked_with_context() {
        let mut registry = HandlerRegistry::new();
        registry.register("math", "add", add);
        let codec = Codec::new();
        let def = definition(
            "math",
            "add",
            vec![WorkflowParameter::context("ctx"), int_param("a", 2), int_param("b", 40)],
        );

        let mut ctx = context().await;
        let result = invoke_workflow(&registry, &codec, &def, &mut ctx).await.unwrap();
        assert_eq!(result, TypedValue::I32(42));
        assert!(ctx.flow().find("0").unwrap().completed);
    }

    #[tokio::test]
    async fn unresolved_service_and_method() {
        let mut registry = HandlerRegistry::new();
        registry.register("math", "add", add);
        let codec = Codec::new();
        let mut ctx = context().await;

        let err = invoke_workflow(&registry, &codec, &definition("nope", "add", vec![]), &mut ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::UnresolvedService(name) if name == "nope"));

        let err = invoke_workflow(&registry, &codec, &definition("math", "mul", vec![]), &mut ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::UnresolvedMethod { .. }));
    }

    #[test]
    fn catalog_lists_services_and_methods() {
        let mut registry = HandlerRegistry::new();
        registry.register("math", "sub", add).register("math", "add", add);
        let catalog = registry.catalog();
        assert_eq!(catalog, vec![("math".to_string(), vec!["add".to_string(), "sub".to_string()])]);
    }
}
