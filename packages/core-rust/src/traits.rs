use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde_json::Value;

use crate::dispatch::{DispatchOptions, MessageId, QueueMessage, StartRun};
use crate::error::StoreError;
use crate::types::{
    Event, Hook, HookFilter, HookResumption, NewEvent, Page, Pagination, ResolveData, RunFilter,
    Step, WorkflowRun,
};

/// Raw chunks of a named stream, each one serialized value.
pub type ChunkStream = BoxStream<'static, Result<Vec<u8>, StoreError>>;

/// Run persistence.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Fetch a run. Missing runs fail with [`StoreError::RunNotFound`].
    async fn get(&self, run_id: &str, resolve: ResolveData) -> Result<WorkflowRun, StoreError>;

    async fn list(
        &self,
        filter: &RunFilter,
        page: &Pagination,
        resolve: ResolveData,
    ) -> Result<Page<WorkflowRun>, StoreError>;

    /// Mark a run cancelled and return its new state.
    async fn cancel(&self, run_id: &str) -> Result<WorkflowRun, StoreError>;
}

/// Step persistence.
#[async_trait]
pub trait StepStore: Send + Sync {
    async fn get(
        &self,
        run_id: &str,
        step_id: &str,
        resolve: ResolveData,
    ) -> Result<Step, StoreError>;

    async fn list(
        &self,
        run_id: &str,
        page: &Pagination,
        resolve: ResolveData,
    ) -> Result<Page<Step>, StoreError>;
}

/// Append-only event log.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn get(
        &self,
        run_id: &str,
        event_id: &str,
        resolve: ResolveData,
    ) -> Result<Event, StoreError>;

    async fn list(
        &self,
        run_id: &str,
        page: &Pagination,
        resolve: ResolveData,
    ) -> Result<Page<Event>, StoreError>;

    async fn list_by_correlation_id(
        &self,
        correlation_id: &str,
        page: &Pagination,
        resolve: ResolveData,
    ) -> Result<Page<Event>, StoreError>;

    /// Append an event to a run's log.
    async fn create(&self, run_id: &str, event: NewEvent) -> Result<Event, StoreError>;
}

/// Hook persistence.
#[async_trait]
pub trait HookStore: Send + Sync {
    async fn get(&self, hook_id: &str, resolve: ResolveData) -> Result<Hook, StoreError>;

    /// Look a hook up by its public token.
    async fn get_by_token(&self, token: &str) -> Result<Hook, StoreError>;

    async fn list(
        &self,
        filter: &HookFilter,
        page: &Pagination,
        resolve: ResolveData,
    ) -> Result<Page<Hook>, StoreError>;
}

/// Entry points into the workflow scheduling layer.
#[async_trait]
pub trait Dispatch: Send + Sync {
    /// Place a message on a named queue.
    async fn enqueue(
        &self,
        queue_name: &str,
        message: QueueMessage,
        opts: &DispatchOptions,
    ) -> Result<MessageId, StoreError>;

    /// Create and schedule a new run. Returns the new run id.
    async fn start_run(&self, spec: StartRun, opts: &DispatchOptions) -> Result<String, StoreError>;
}

/// Named output streams written by runs.
#[async_trait]
pub trait StreamStore: Send + Sync {
    /// Read `stream_id` starting at chunk `start_index`.
    async fn read(&self, stream_id: &str, start_index: usize) -> Result<ChunkStream, StoreError>;

    async fn list_by_run_id(&self, run_id: &str) -> Result<Vec<String>, StoreError>;
}

/// The execution store: one capability object per backend connection.
pub trait World: Send + Sync {
    fn runs(&self) -> &dyn RunStore;
    fn steps(&self) -> &dyn StepStore;
    fn events(&self) -> &dyn EventStore;
    fn hooks(&self) -> &dyn HookStore;
    fn dispatch(&self) -> &dyn Dispatch;
    fn streams(&self) -> &dyn StreamStore;
}

/// Runtime operation that delivers an external payload to a hook.
///
/// The runtime resolves its backend from ambient configuration rather than
/// receiving a connection.
#[async_trait]
pub trait HookRuntime: Send + Sync {
    async fn resume_hook_by_token(
        &self,
        token: &str,
        payload: Value,
    ) -> Result<HookResumption, StoreError>;
}
