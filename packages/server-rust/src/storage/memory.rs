//! In-process execution store.
//!
//! [`MemoryWorld`] keeps runs, steps, events, hooks, streams and the dispatch
//! log in memory. It backs the `memory` backend kind used for local
//! development, and it is the fixture the control-plane tests run against:
//! every enqueued message and appended event is observable, and a failure can
//! be injected into the next store call.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use futures_util::StreamExt;
use parking_lot::{Mutex, RwLock};
use runboard_core::{
    workflow_queue_name, ChunkStream, Dispatch, DispatchOptions, Event, EventStore, EventType,
    Hook, HookFilter, HookStore, MessageId, NewEvent, Page, Pagination, QueueMessage, ResolveData,
    RunFilter, RunStatus, RunStore, SortOrder, StartRun, Step, StepStore, StoreError, StreamStore,
    World, WorkflowRun, WORKFLOW_QUEUE_PREFIX,
};
use serde_json::Value;

use crate::service::config::Settings;
use crate::storage::factory::WorldFactory;

/// Page size used when a list call does not ask for one.
pub const DEFAULT_PAGE_LIMIT: usize = 100;

/// A message accepted by the in-memory queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnqueuedMessage {
    pub message_id: String,
    pub queue_name: String,
    pub message: QueueMessage,
    pub deployment_id: Option<String>,
}

#[derive(Debug, Clone)]
struct StreamRecord {
    stream_id: String,
    run_id: String,
    chunks: Vec<Vec<u8>>,
}

#[derive(Debug, Default)]
struct MemoryState {
    runs: Vec<WorkflowRun>,
    steps: Vec<Step>,
    events: Vec<Event>,
    hooks: Vec<Hook>,
    streams: Vec<StreamRecord>,
    enqueued: Vec<EnqueuedMessage>,
}

/// In-memory execution store.
#[derive(Debug, Default)]
pub struct MemoryWorld {
    state: RwLock<MemoryState>,
    injected_failure: Mutex<Option<StoreError>>,
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
}

fn new_id(prefix: &str) -> String {
    format!("{prefix}_{}", uuid::Uuid::new_v4().simple())
}

fn paginate<T>(mut items: Vec<T>, page: &Pagination) -> Result<Page<T>, StoreError> {
    if page.sort_order == SortOrder::Desc {
        items.reverse();
    }
    let offset = match page.cursor.as_deref() {
        None => 0,
        Some(cursor) => cursor
            .parse::<usize>()
            .map_err(|_| StoreError::status(400, format!("invalid cursor: {cursor}")))?,
    };
    let limit = page.limit.unwrap_or(DEFAULT_PAGE_LIMIT).max(1);
    let total = items.len();
    let data: Vec<T> = items.into_iter().skip(offset).take(limit).collect();
    let next = offset + data.len();
    let has_more = next < total;
    Ok(Page {
        data,
        cursor: has_more.then(|| next.to_string()),
        has_more,
    })
}

fn strip_run(mut run: WorkflowRun, resolve: ResolveData) -> WorkflowRun {
    if resolve == ResolveData::None {
        run.input = None;
        run.output = None;
    }
    run
}

fn strip_step(mut step: Step, resolve: ResolveData) -> Step {
    if resolve == ResolveData::None {
        step.input = None;
        step.output = None;
    }
    step
}

fn strip_event(mut event: Event, resolve: ResolveData) -> Event {
    if resolve == ResolveData::None {
        event.event_data = None;
    }
    event
}

fn strip_hook(mut hook: Hook, resolve: ResolveData) -> Hook {
    if resolve == ResolveData::None {
        hook.metadata = None;
    }
    hook
}

impl MemoryWorld {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next store call fail with `err`.
    pub fn fail_next(&self, err: StoreError) {
        *self.injected_failure.lock() = Some(err);
    }

    fn check_failure(&self) -> Result<(), StoreError> {
        match self.injected_failure.lock().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    // ----- Seeding -----

    /// Create a running run of `workflow_name` and record its creation.
    pub fn create_run(&self, workflow_name: &str, deployment_id: &str, input: Value) -> WorkflowRun {
        let now = now_millis();
        let run = WorkflowRun {
            run_id: new_id("wrun"),
            workflow_name: workflow_name.to_string(),
            deployment_id: deployment_id.to_string(),
            status: RunStatus::Running,
            input: Some(input),
            output: None,
            error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        let mut state = self.state.write();
        state.runs.push(run.clone());
        state.events.push(Event {
            event_id: new_id("evnt"),
            run_id: run.run_id.clone(),
            event_type: EventType::RunCreated,
            correlation_id: None,
            event_data: None,
            created_at: now,
        });
        run
    }

    pub fn insert_step(&self, step: Step) {
        self.state.write().steps.push(step);
    }

    /// Append an event without going through the store interface.
    pub fn record_event(&self, run_id: &str, event: NewEvent) -> Event {
        let event = Event {
            event_id: new_id("evnt"),
            run_id: run_id.to_string(),
            event_type: event.event_type,
            correlation_id: event.correlation_id,
            event_data: event.event_data,
            created_at: now_millis(),
        };
        self.state.write().events.push(event.clone());
        event
    }

    /// Register a hook with `token` on `run_id`.
    pub fn create_hook(&self, run_id: &str, token: &str) -> Hook {
        let hook = Hook {
            hook_id: new_id("hook"),
            run_id: run_id.to_string(),
            token: token.to_string(),
            metadata: None,
            created_at: now_millis(),
        };
        self.state.write().hooks.push(hook.clone());
        hook
    }

    /// Append serialized chunks to a run's named stream.
    pub fn write_stream(&self, run_id: &str, stream_id: &str, chunks: Vec<Vec<u8>>) {
        let mut state = self.state.write();
        if let Some(stream) = state.streams.iter_mut().find(|s| s.stream_id == stream_id) {
            stream.chunks.extend(chunks);
        } else {
            state.streams.push(StreamRecord {
                stream_id: stream_id.to_string(),
                run_id: run_id.to_string(),
                chunks,
            });
        }
    }

    // ----- Inspection -----

    #[must_use]
    pub fn events_for(&self, run_id: &str) -> Vec<Event> {
        self.state
            .read()
            .events
            .iter()
            .filter(|e| e.run_id == run_id)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn enqueued(&self) -> Vec<EnqueuedMessage> {
        self.state.read().enqueued.clone()
    }

    #[must_use]
    pub fn run_count(&self) -> usize {
        self.state.read().runs.len()
    }

    fn find_run(&self, run_id: &str) -> Result<WorkflowRun, StoreError> {
        self.state
            .read()
            .runs
            .iter()
            .find(|r| r.run_id == run_id)
            .cloned()
            .ok_or_else(|| StoreError::RunNotFound {
                run_id: run_id.to_string(),
            })
    }

    fn push_message(&self, queue_name: &str, message: QueueMessage, opts: &DispatchOptions) -> MessageId {
        let message_id = new_id("msg");
        self.state.write().enqueued.push(EnqueuedMessage {
            message_id: message_id.clone(),
            queue_name: queue_name.to_string(),
            message,
            deployment_id: opts.deployment_id.clone(),
        });
        MessageId(message_id)
    }
}

#[async_trait]
impl RunStore for MemoryWorld {
    async fn get(&self, run_id: &str, resolve: ResolveData) -> Result<WorkflowRun, StoreError> {
        self.check_failure()?;
        self.find_run(run_id).map(|run| strip_run(run, resolve))
    }

    async fn list(
        &self,
        filter: &RunFilter,
        page: &Pagination,
        resolve: ResolveData,
    ) -> Result<Page<WorkflowRun>, StoreError> {
        self.check_failure()?;
        let runs: Vec<WorkflowRun> = self
            .state
            .read()
            .runs
            .iter()
            .filter(|r| {
                filter
                    .workflow_name
                    .as_ref()
                    .is_none_or(|name| &r.workflow_name == name)
                    && filter.status.is_none_or(|status| r.status == status)
            })
            .map(|r| strip_run(r.clone(), resolve))
            .collect();
        paginate(runs, page)
    }

    async fn cancel(&self, run_id: &str) -> Result<WorkflowRun, StoreError> {
        self.check_failure()?;
        let now = now_millis();
        let mut state = self.state.write();
        let run = state
            .runs
            .iter_mut()
            .find(|r| r.run_id == run_id)
            .ok_or_else(|| StoreError::RunNotFound {
                run_id: run_id.to_string(),
            })?;
        if run.status.is_terminal() {
            return Err(StoreError::status(
                409,
                format!("run {run_id} is already finished"),
            ));
        }
        run.status = RunStatus::Cancelled;
        run.updated_at = now;
        run.completed_at = Some(now);
        let cancelled = run.clone();
        state.events.push(Event {
            event_id: new_id("evnt"),
            run_id: run_id.to_string(),
            event_type: EventType::RunCancelled,
            correlation_id: None,
            event_data: None,
            created_at: now,
        });
        Ok(cancelled)
    }
}

#[async_trait]
impl StepStore for MemoryWorld {
    async fn get(
        &self,
        run_id: &str,
        step_id: &str,
        resolve: ResolveData,
    ) -> Result<Step, StoreError> {
        self.check_failure()?;
        self.state
            .read()
            .steps
            .iter()
            .find(|s| s.run_id == run_id && s.step_id == step_id)
            .map(|s| strip_step(s.clone(), resolve))
            .ok_or_else(|| StoreError::not_found("step", step_id))
    }

    async fn list(
        &self,
        run_id: &str,
        page: &Pagination,
        resolve: ResolveData,
    ) -> Result<Page<Step>, StoreError> {
        self.check_failure()?;
        let steps: Vec<Step> = self
            .state
            .read()
            .steps
            .iter()
            .filter(|s| s.run_id == run_id)
            .map(|s| strip_step(s.clone(), resolve))
            .collect();
        paginate(steps, page)
    }
}

#[async_trait]
impl EventStore for MemoryWorld {
    async fn get(
        &self,
        run_id: &str,
        event_id: &str,
        resolve: ResolveData,
    ) -> Result<Event, StoreError> {
        self.check_failure()?;
        self.state
            .read()
            .events
            .iter()
            .find(|e| e.run_id == run_id && e.event_id == event_id)
            .map(|e| strip_event(e.clone(), resolve))
            .ok_or_else(|| StoreError::not_found("event", event_id))
    }

    async fn list(
        &self,
        run_id: &str,
        page: &Pagination,
        resolve: ResolveData,
    ) -> Result<Page<Event>, StoreError> {
        self.check_failure()?;
        let events: Vec<Event> = self
            .state
            .read()
            .events
            .iter()
            .filter(|e| e.run_id == run_id)
            .map(|e| strip_event(e.clone(), resolve))
            .collect();
        paginate(events, page)
    }

    async fn list_by_correlation_id(
        &self,
        correlation_id: &str,
        page: &Pagination,
        resolve: ResolveData,
    ) -> Result<Page<Event>, StoreError> {
        self.check_failure()?;
        let events: Vec<Event> = self
            .state
            .read()
            .events
            .iter()
            .filter(|e| e.correlation_id.as_deref() == Some(correlation_id))
            .map(|e| strip_event(e.clone(), resolve))
            .collect();
        paginate(events, page)
    }

    async fn create(&self, run_id: &str, event: NewEvent) -> Result<Event, StoreError> {
        self.check_failure()?;
        self.find_run(run_id)?;
        Ok(self.record_event(run_id, event))
    }
}

#[async_trait]
impl HookStore for MemoryWorld {
    async fn get(&self, hook_id: &str, resolve: ResolveData) -> Result<Hook, StoreError> {
        self.check_failure()?;
        self.state
            .read()
            .hooks
            .iter()
            .find(|h| h.hook_id == hook_id)
            .map(|h| strip_hook(h.clone(), resolve))
            .ok_or_else(|| StoreError::not_found("hook", hook_id))
    }

    async fn get_by_token(&self, token: &str) -> Result<Hook, StoreError> {
        self.check_failure()?;
        self.state
            .read()
            .hooks
            .iter()
            .find(|h| h.token == token)
            .cloned()
            .ok_or_else(|| StoreError::HookNotFound {
                token: token.to_string(),
            })
    }

    async fn list(
        &self,
        filter: &HookFilter,
        page: &Pagination,
        resolve: ResolveData,
    ) -> Result<Page<Hook>, StoreError> {
        self.check_failure()?;
        let hooks: Vec<Hook> = self
            .state
            .read()
            .hooks
            .iter()
            .filter(|h| filter.run_id.as_ref().is_none_or(|id| &h.run_id == id))
            .map(|h| strip_hook(h.clone(), resolve))
            .collect();
        paginate(hooks, page)
    }
}

#[async_trait]
impl Dispatch for MemoryWorld {
    async fn enqueue(
        &self,
        queue_name: &str,
        message: QueueMessage,
        opts: &DispatchOptions,
    ) -> Result<MessageId, StoreError> {
        self.check_failure()?;
        Ok(self.push_message(queue_name, message, opts))
    }

    async fn start_run(&self, spec: StartRun, opts: &DispatchOptions) -> Result<String, StoreError> {
        self.check_failure()?;
        let deployment_id = opts.deployment_id.clone().unwrap_or_default();
        let mut run = self.create_run(&spec.workflow_name, &deployment_id, spec.input);
        run.status = RunStatus::Pending;
        if let Some(stored) = self
            .state
            .write()
            .runs
            .iter_mut()
            .find(|r| r.run_id == run.run_id)
        {
            stored.status = RunStatus::Pending;
        }
        let queue = workflow_queue_name(WORKFLOW_QUEUE_PREFIX, &spec.workflow_name);
        self.push_message(
            &queue,
            QueueMessage {
                run_id: run.run_id.clone(),
            },
            opts,
        );
        Ok(run.run_id)
    }
}

#[async_trait]
impl StreamStore for MemoryWorld {
    async fn read(&self, stream_id: &str, start_index: usize) -> Result<ChunkStream, StoreError> {
        self.check_failure()?;
        let chunks: Vec<Vec<u8>> = self
            .state
            .read()
            .streams
            .iter()
            .find(|s| s.stream_id == stream_id)
            .map(|s| s.chunks.iter().skip(start_index).cloned().collect())
            .ok_or_else(|| StoreError::not_found("stream", stream_id))?;
        Ok(futures_util::stream::iter(chunks.into_iter().map(Ok)).boxed())
    }

    async fn list_by_run_id(&self, run_id: &str) -> Result<Vec<String>, StoreError> {
        self.check_failure()?;
        Ok(self
            .state
            .read()
            .streams
            .iter()
            .filter(|s| s.run_id == run_id)
            .map(|s| s.stream_id.clone())
            .collect())
    }
}

impl World for MemoryWorld {
    fn runs(&self) -> &dyn RunStore {
        self
    }

    fn steps(&self) -> &dyn StepStore {
        self
    }

    fn events(&self) -> &dyn EventStore {
        self
    }

    fn hooks(&self) -> &dyn HookStore {
        self
    }

    fn dispatch(&self) -> &dyn Dispatch {
        self
    }

    fn streams(&self) -> &dyn StreamStore {
        self
    }
}

// ---------------------------------------------------------------------------
// MemoryWorldFactory
// ---------------------------------------------------------------------------

/// Factory for the `memory` backend kind.
///
/// By default every construction opens a fresh, empty world. A factory built
/// with [`MemoryWorldFactory::shared`] hands out the same world every time,
/// which lets tests seed data before the control plane connects.
#[derive(Debug, Default)]
pub struct MemoryWorldFactory {
    shared: Option<Arc<MemoryWorld>>,
    constructed: Arc<AtomicUsize>,
}

impl MemoryWorldFactory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn shared(world: Arc<MemoryWorld>) -> Self {
        Self {
            shared: Some(world),
            constructed: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Counter of successful constructions, shared with clones of the handle.
    #[must_use]
    pub fn construction_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.constructed)
    }
}

#[async_trait]
impl WorldFactory for MemoryWorldFactory {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn create(&self, _settings: &Settings) -> Result<Arc<dyn World>, StoreError> {
        self.constructed.fetch_add(1, Ordering::SeqCst);
        let world: Arc<dyn World> = match &self.shared {
            Some(world) => Arc::clone(world) as Arc<dyn World>,
            None => Arc::new(MemoryWorld::new()),
        };
        Ok(world)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn get_missing_run_is_run_not_found() {
        let world = MemoryWorld::new();
        let err = world.runs().get("wrun_missing", ResolveData::All).await.unwrap_err();
        assert_eq!(
            err,
            StoreError::RunNotFound {
                run_id: "wrun_missing".to_string()
            }
        );
    }

    #[tokio::test]
    async fn list_runs_paginates_newest_first() {
        let world = MemoryWorld::new();
        let first = world.create_run("order", "dpl_1", json!([]));
        let second = world.create_run("order", "dpl_1", json!([]));
        let third = world.create_run("order", "dpl_1", json!([]));

        let page = world
            .runs()
            .list(&RunFilter::default(), &Pagination::with_limit(2), ResolveData::All)
            .await
            .unwrap();
        assert_eq!(page.data.len(), 2);
        assert_eq!(page.data[0].run_id, third.run_id);
        assert_eq!(page.data[1].run_id, second.run_id);
        assert!(page.has_more);

        let next = Pagination {
            cursor: page.cursor,
            ..Pagination::with_limit(2)
        };
        let page = world
            .runs()
            .list(&RunFilter::default(), &next, ResolveData::All)
            .await
            .unwrap();
        assert_eq!(page.data.len(), 1);
        assert_eq!(page.data[0].run_id, first.run_id);
        assert!(!page.has_more);
        assert!(page.cursor.is_none());
    }

    #[tokio::test]
    async fn invalid_cursor_is_400() {
        let world = MemoryWorld::new();
        let page = Pagination {
            cursor: Some("not-a-number".to_string()),
            ..Pagination::default()
        };
        let err = world
            .runs()
            .list(&RunFilter::default(), &page, ResolveData::All)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), Some(400));
    }

    #[tokio::test]
    async fn resolve_none_strips_payloads() {
        let world = MemoryWorld::new();
        let run = world.create_run("order", "dpl_1", json!({ "sku": "A-1" }));
        let fetched = world.runs().get(&run.run_id, ResolveData::None).await.unwrap();
        assert!(fetched.input.is_none());
        let fetched = world.runs().get(&run.run_id, ResolveData::All).await.unwrap();
        assert_eq!(fetched.input, Some(json!({ "sku": "A-1" })));
    }

    #[tokio::test]
    async fn cancel_finished_run_conflicts() {
        let world = MemoryWorld::new();
        let run = world.create_run("order", "dpl_1", json!([]));
        let cancelled = world.runs().cancel(&run.run_id).await.unwrap();
        assert_eq!(cancelled.status, RunStatus::Cancelled);

        let err = world.runs().cancel(&run.run_id).await.unwrap_err();
        assert_eq!(err.status_code(), Some(409));
    }

    #[tokio::test]
    async fn injected_failure_hits_next_call_only() {
        let world = MemoryWorld::new();
        world.fail_next(StoreError::status(403, "forbidden"));
        assert!(world.streams().list_by_run_id("wrun_1").await.is_err());
        assert!(world.streams().list_by_run_id("wrun_1").await.is_ok());
    }

    #[tokio::test]
    async fn start_run_enqueues_on_workflow_queue() {
        let world = MemoryWorld::new();
        let run_id = world
            .dispatch()
            .start_run(
                StartRun {
                    workflow_name: "order".to_string(),
                    input: json!([1]),
                },
                &DispatchOptions {
                    deployment_id: Some("dpl_7".to_string()),
                },
            )
            .await
            .unwrap();

        let run = world.runs().get(&run_id, ResolveData::All).await.unwrap();
        assert_eq!(run.status, RunStatus::Pending);
        assert_eq!(run.deployment_id, "dpl_7");

        let enqueued = world.enqueued();
        assert_eq!(enqueued.len(), 1);
        assert_eq!(enqueued[0].queue_name, "__wkf_workflow_order");
        assert_eq!(enqueued[0].message.run_id, run_id);
    }

    #[tokio::test]
    async fn read_stream_starts_at_index() {
        let world = MemoryWorld::new();
        world.write_stream(
            "wrun_1",
            "strm_1",
            vec![b"1".to_vec(), b"2".to_vec(), b"3".to_vec()],
        );
        let chunks: Vec<_> = world
            .streams()
            .read("strm_1", 1)
            .await
            .unwrap()
            .collect()
            .await;
        let chunks: Vec<Vec<u8>> = chunks.into_iter().map(Result::unwrap).collect();
        assert_eq!(chunks, vec![b"2".to_vec(), b"3".to_vec()]);
        assert_eq!(
            world.streams().list_by_run_id("wrun_1").await.unwrap(),
            vec!["strm_1".to_string()]
        );
    }

    #[tokio::test]
    async fn shared_factory_returns_same_world() {
        let world = Arc::new(MemoryWorld::new());
        let factory = MemoryWorldFactory::shared(Arc::clone(&world));
        let a = factory.create(&Settings::new()).await.unwrap();
        let b = factory.create(&Settings::new()).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(factory.construction_counter().load(Ordering::SeqCst), 2);
    }
}
