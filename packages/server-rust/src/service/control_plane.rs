//! The run control plane: every dashboard action against the execution store.
//!
//! Each operation resolves the effective configuration from the caller's
//! override, obtains the cached connection for it, performs its store calls,
//! and returns an [`OperationResult`]. Failures never escape as `Err`; they
//! are classified into an [`ErrorRecord`] at the operation boundary.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use runboard_core::{
    workflow_queue_name, DispatchOptions, HookFilter, HookResumption, HookRuntime, Pagination,
    QueueMessage, ResolveData, RunFilter, StartRun, WorkflowRun,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, info_span, warn, Instrument};

use super::classify::classify;
use super::config::{AmbientConfig, ConfigResolver, ControlPlaneConfig, Settings};
use super::display::DisplayConfig;
use super::envelope::{hydrate, wrap_failure, wrap_success};
use super::hooks::WorldHookRuntime;
use super::instance_cache::{ConnectionHandle, InstanceCache};
use super::operation::{ErrorRecord, OperationContext, OperationError, OperationResult};
use super::reconcile::{wake_up, WakeUpSummary};
use crate::storage::factory::BackendRegistry;

/// Deserialized chunks of a stream, or the failure that ended it.
pub type ValueStream = BoxStream<'static, Result<Value, ErrorRecord>>;

/// Facade over the config resolver, instance cache, classifier and envelope.
pub struct ControlPlane {
    resolver: ConfigResolver,
    cache: Arc<InstanceCache>,
    hook_runtime: Arc<dyn HookRuntime>,
    config: ControlPlaneConfig,
    next_call_id: AtomicU64,
}

impl ControlPlane {
    /// Control plane over `registry`, delivering hook payloads through the
    /// connection of the active configuration.
    #[must_use]
    pub fn new(
        registry: BackendRegistry,
        ambient: Arc<AmbientConfig>,
        config: ControlPlaneConfig,
    ) -> Self {
        let resolver = ConfigResolver::new(Arc::clone(&ambient));
        let cache = Arc::new(InstanceCache::new(
            Arc::new(registry),
            ambient,
            config.default_backend.clone(),
        ));
        let hook_runtime: Arc<dyn HookRuntime> = Arc::new(WorldHookRuntime::new(
            resolver.clone(),
            Arc::clone(&cache),
            config.queue_prefix.clone(),
        ));
        Self {
            resolver,
            cache,
            hook_runtime,
            config,
            next_call_id: AtomicU64::new(1),
        }
    }

    /// Replace the hook runtime.
    #[must_use]
    pub fn with_hook_runtime(mut self, runtime: Arc<dyn HookRuntime>) -> Self {
        self.hook_runtime = runtime;
        self
    }

    /// Resolver used to build the effective configuration of each call.
    #[must_use]
    pub fn resolver(&self) -> &ConfigResolver {
        &self.resolver
    }

    /// Connections built so far, one per configuration fingerprint.
    #[must_use]
    pub fn cache(&self) -> &Arc<InstanceCache> {
        &self.cache
    }

    #[must_use]
    pub fn config(&self) -> &ControlPlaneConfig {
        &self.config
    }

    // ----- Runs -----

    /// Page through runs matching `filter`.
    pub async fn list_runs(
        &self,
        env: &Settings,
        filter: &RunFilter,
        page: &Pagination,
        resolve: ResolveData,
    ) -> OperationResult<Value> {
        let params = json!({ "filter": filter, "pagination": page, "resolveData": resolve });
        self.run("listRuns", params, async {
            let world = self.connect(env).await?;
            let runs = world.runs().list(filter, page, resolve).await?;
            hydrate("runs", &runs)
        })
        .await
    }

    /// Fetch one run.
    pub async fn get_run(
        &self,
        env: &Settings,
        run_id: &str,
        resolve: ResolveData,
    ) -> OperationResult<Value> {
        let params = json!({ "runId": run_id, "resolveData": resolve });
        self.run("getRun", params, async {
            let world = self.connect(env).await?;
            let run = world.runs().get(run_id, resolve).await?;
            hydrate("run", &run)
        })
        .await
    }

    /// Cancel a run and return its updated state.
    pub async fn cancel_run(&self, env: &Settings, run_id: &str) -> OperationResult<WorkflowRun> {
        self.run("cancelRun", json!({ "runId": run_id }), async {
            let world = self.connect(env).await?;
            Ok::<_, OperationError>(world.runs().cancel(run_id).await?)
        })
        .await
    }

    /// Start a new run of the same workflow with the same deployment and
    /// input. Returns the new run id.
    pub async fn recreate_run(&self, env: &Settings, run_id: &str) -> OperationResult<String> {
        self.run("recreateRun", json!({ "runId": run_id }), async {
            let world = self.connect(env).await?;
            let run = world.runs().get(run_id, ResolveData::All).await?;
            let spec = StartRun {
                workflow_name: run.workflow_name,
                input: run.input.unwrap_or(Value::Null),
            };
            let opts = DispatchOptions {
                deployment_id: Some(run.deployment_id),
            };
            Ok::<_, OperationError>(world.dispatch().start_run(spec, &opts).await?)
        })
        .await
    }

    /// Put a stuck run back on its workflow queue.
    pub async fn reenqueue_run(&self, env: &Settings, run_id: &str) -> OperationResult<()> {
        self.run("reenqueueRun", json!({ "runId": run_id }), async {
            let world = self.connect(env).await?;
            let run = world.runs().get(run_id, ResolveData::None).await?;
            world
                .dispatch()
                .enqueue(
                    &workflow_queue_name(&self.config.queue_prefix, &run.workflow_name),
                    QueueMessage { run_id: run.run_id },
                    &DispatchOptions {
                        deployment_id: Some(run.deployment_id),
                    },
                )
                .await?;
            Ok::<_, OperationError>(())
        })
        .await
    }

    /// Interrupt pending waits of a run. See [`wake_up`].
    pub async fn wake_up_run(
        &self,
        env: &Settings,
        run_id: &str,
        correlation_ids: Option<&[String]>,
    ) -> OperationResult<WakeUpSummary> {
        let params = json!({ "runId": run_id, "correlationIds": correlation_ids });
        self.run("wakeUpRun", params, async {
            let world = self.connect(env).await?;
            Ok::<_, OperationError>(wake_up(
                &**world,
                run_id,
                correlation_ids,
                self.config.event_scan_limit,
                &self.config.queue_prefix,
            )
            .await?)
        })
        .await
    }

    // ----- Steps -----

    /// Page through the steps of a run.
    pub async fn list_steps(
        &self,
        env: &Settings,
        run_id: &str,
        page: &Pagination,
        resolve: ResolveData,
    ) -> OperationResult<Value> {
        let params = json!({ "runId": run_id, "pagination": page, "resolveData": resolve });
        self.run("listSteps", params, async {
            let world = self.connect(env).await?;
            let steps = world.steps().list(run_id, page, resolve).await?;
            hydrate("steps", &steps)
        })
        .await
    }

    pub async fn get_step(
        &self,
        env: &Settings,
        run_id: &str,
        step_id: &str,
        resolve: ResolveData,
    ) -> OperationResult<Value> {
        let params = json!({ "runId": run_id, "stepId": step_id, "resolveData": resolve });
        self.run("getStep", params, async {
            let world = self.connect(env).await?;
            let step = world.steps().get(run_id, step_id, resolve).await?;
            hydrate("step", &step)
        })
        .await
    }

    // ----- Events -----

    /// Page through the event log of a run.
    pub async fn list_events(
        &self,
        env: &Settings,
        run_id: &str,
        page: &Pagination,
        resolve: ResolveData,
    ) -> OperationResult<Value> {
        let params = json!({ "runId": run_id, "pagination": page, "resolveData": resolve });
        self.run("listEvents", params, async {
            let world = self.connect(env).await?;
            let events = world.events().list(run_id, page, resolve).await?;
            hydrate("events", &events)
        })
        .await
    }

    /// Page through events sharing `correlation_id`, across runs.
    pub async fn list_events_by_correlation_id(
        &self,
        env: &Settings,
        correlation_id: &str,
        page: &Pagination,
        resolve: ResolveData,
    ) -> OperationResult<Value> {
        let params = json!({
            "correlationId": correlation_id,
            "pagination": page,
            "resolveData": resolve,
        });
        self.run("listEventsByCorrelationId", params, async {
            let world = self.connect(env).await?;
            let events = world
                .events()
                .list_by_correlation_id(correlation_id, page, resolve)
                .await?;
            hydrate("events", &events)
        })
        .await
    }

    /// Fetch one event of a run.
    pub async fn get_event(
        &self,
        env: &Settings,
        run_id: &str,
        event_id: &str,
        resolve: ResolveData,
    ) -> OperationResult<Value> {
        let params = json!({ "runId": run_id, "eventId": event_id, "resolveData": resolve });
        self.run("getEvent", params, async {
            let world = self.connect(env).await?;
            let event = world.events().get(run_id, event_id, resolve).await?;
            hydrate("event", &event)
        })
        .await
    }

    // ----- Hooks -----

    /// Page through hooks, optionally limited to one run.
    pub async fn list_hooks(
        &self,
        env: &Settings,
        filter: &HookFilter,
        page: &Pagination,
        resolve: ResolveData,
    ) -> OperationResult<Value> {
        let params = json!({ "filter": filter, "pagination": page, "resolveData": resolve });
        self.run("listHooks", params, async {
            let world = self.connect(env).await?;
            let hooks = world.hooks().list(filter, page, resolve).await?;
            hydrate("hooks", &hooks)
        })
        .await
    }

    /// Fetch one hook.
    pub async fn get_hook(
        &self,
        env: &Settings,
        hook_id: &str,
        resolve: ResolveData,
    ) -> OperationResult<Value> {
        let params = json!({ "hookId": hook_id, "resolveData": resolve });
        self.run("getHook", params, async {
            let world = self.connect(env).await?;
            let hook = world.hooks().get(hook_id, resolve).await?;
            hydrate("hook", &hook)
        })
        .await
    }

    /// Deliver `payload` to the hook registered under `token`.
    ///
    /// The connection for the active configuration is established first; the
    /// hook runtime then finds it through the process-wide settings.
    pub async fn resume_hook(
        &self,
        env: &Settings,
        token: &str,
        payload: Value,
    ) -> OperationResult<HookResumption> {
        // The token is a credential; it is not echoed back in error records.
        self.run("resumeHook", json!({}), async {
            self.connect(env).await?;
            Ok::<_, OperationError>(self.hook_runtime.resume_hook_by_token(token, payload).await?)
        })
        .await
    }

    // ----- Streams -----

    /// Names of the streams a run has written.
    pub async fn list_streams(&self, env: &Settings, run_id: &str) -> OperationResult<Vec<String>> {
        self.run("listStreams", json!({ "runId": run_id }), async {
            let world = self.connect(env).await?;
            Ok::<_, OperationError>(world.streams().list_by_run_id(run_id).await?)
        })
        .await
    }

    /// Open a stream and decode its chunks as JSON.
    ///
    /// Returns the bare error record instead of an envelope, both when the
    /// stream cannot be opened and for a failure part-way through.
    ///
    /// # Errors
    ///
    /// Returns the classified failure when the stream cannot be opened.
    pub async fn read_stream(
        &self,
        env: &Settings,
        stream_id: &str,
        start_index: usize,
    ) -> Result<ValueStream, ErrorRecord> {
        let ctx = self.context(
            "readStream",
            json!({ "streamId": stream_id, "startIndex": start_index }),
        );
        let opened = async {
            let world = self.connect(env).await?;
            Ok::<_, OperationError>(world.streams().read(stream_id, start_index).await?)
        }
        .await;

        let chunks = match opened {
            Ok(chunks) => chunks,
            Err(err) => {
                let record = classify(&err, ctx.operation, &ctx.params);
                log_outcome(&ctx, Some(&record));
                return Err(record);
            }
        };
        log_outcome(&ctx, None);

        let operation = ctx.operation;
        let params = ctx.params;
        Ok(chunks
            .map(move |chunk| {
                let decoded = chunk.map_err(OperationError::from).and_then(|bytes| {
                    serde_json::from_slice::<Value>(&bytes).map_err(|source| {
                        OperationError::Hydration {
                            resource: "stream chunk",
                            source,
                        }
                    })
                });
                decoded.map_err(|err| classify(&err, operation, &params))
            })
            .boxed())
    }

    // ----- Configuration -----

    /// Backend kind and redacted connection details of the effective
    /// configuration. Does not connect.
    pub async fn display_config(&self, env: &Settings) -> OperationResult<DisplayConfig> {
        self.run("getDisplayConfig", json!({}), async {
            let resolved = self.resolver.resolve(env);
            Ok::<_, OperationError>(DisplayConfig::from_settings(
                &resolved.settings,
                &self.config.default_backend,
            ))
        })
        .await
    }

    // ----- Plumbing -----

    async fn connect(&self, env: &Settings) -> Result<Arc<ConnectionHandle>, OperationError> {
        let resolved = self.resolver.resolve(env);
        self.cache.get_or_create(&resolved).await
    }

    fn context(&self, operation: &'static str, params: Value) -> OperationContext {
        let call_id = self.next_call_id.fetch_add(1, Ordering::Relaxed);
        OperationContext::new(call_id, operation, params)
    }

    /// Run `body` as `operation` and wrap its outcome.
    async fn run<T, F>(&self, operation: &'static str, params: Value, body: F) -> OperationResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: Future<Output = Result<T, OperationError>>,
    {
        let ctx = self.context(operation, params);
        let span = info_span!(
            "operation",
            op = operation,
            call_id = ctx.call_id,
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        async move {
            let result = match body.await {
                Ok(data) => wrap_success(&ctx, &data),
                Err(err) => wrap_failure(&ctx, &err),
            };
            log_outcome(&ctx, result.error());
            result
        }
        .instrument(span)
        .await
    }
}

fn log_outcome(ctx: &OperationContext, failure: Option<&ErrorRecord>) {
    let duration_ms = elapsed_ms(ctx.started_at);
    let outcome = if failure.is_some() { "error" } else { "ok" };
    tracing::Span::current().record("duration_ms", duration_ms);
    tracing::Span::current().record("outcome", outcome);
    metrics::counter!(
        "runboard_operations_total",
        "operation" => ctx.operation,
        "outcome" => outcome
    )
    .increment(1);

    match failure {
        None => info!(
            op = ctx.operation,
            call_id = ctx.call_id,
            duration_ms,
            outcome,
            "operation complete"
        ),
        Some(record) => warn!(
            op = ctx.operation,
            call_id = ctx.call_id,
            duration_ms,
            outcome,
            layer = record.layer.as_str(),
            status = record.status(),
            message = %record.message,
            "operation failed"
        ),
    }
}

fn elapsed_ms(started_at: Instant) -> u64 {
    u64::try_from(started_at.elapsed().as_millis()).unwrap_or(u64::MAX)
}
