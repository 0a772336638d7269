//! Hook payload delivery.
//!
//! [`WorldHookRuntime`] is the runtime side of a hook resume. Like the
//! scheduling layer, it does not receive a connection: it asks the instance
//! cache for the one of the active process-wide configuration.

use std::sync::Arc;

use async_trait::async_trait;
use runboard_core::{
    workflow_queue_name, DispatchOptions, EventType, HookResumption, HookRuntime, NewEvent,
    QueueMessage, ResolveData, StoreError,
};
use serde_json::Value;
use tracing::info;

use super::config::{ConfigResolver, Settings};
use super::instance_cache::InstanceCache;
use super::operation::OperationError;

/// Delivers hook payloads through the cached connection of the active
/// configuration.
pub struct WorldHookRuntime {
    resolver: ConfigResolver,
    cache: Arc<InstanceCache>,
    queue_prefix: String,
}

impl WorldHookRuntime {
    /// Runtime resolving connections through `resolver` and `cache`, and
    /// dispatching to queues named with `queue_prefix`.
    #[must_use]
    pub fn new(resolver: ConfigResolver, cache: Arc<InstanceCache>, queue_prefix: impl Into<String>) -> Self {
        Self {
            resolver,
            cache,
            queue_prefix: queue_prefix.into(),
        }
    }
}

#[async_trait]
impl HookRuntime for WorldHookRuntime {
    async fn resume_hook_by_token(
        &self,
        token: &str,
        payload: Value,
    ) -> Result<HookResumption, StoreError> {
        let active = self.resolver.resolve(&Settings::new());
        let world = self
            .cache
            .get_or_create(&active)
            .await
            .map_err(|err| match err {
                OperationError::Store(store) => store,
                other => StoreError::Unavailable(other.to_string()),
            })?;

        let hook = world.hooks().get_by_token(token).await?;
        world
            .events()
            .create(
                &hook.run_id,
                NewEvent {
                    event_type: EventType::HookReceived,
                    correlation_id: Some(hook.hook_id.clone()),
                    event_data: Some(payload),
                },
            )
            .await?;

        let run = world.runs().get(&hook.run_id, ResolveData::None).await?;
        world
            .dispatch()
            .enqueue(
                &workflow_queue_name(&self.queue_prefix, &run.workflow_name),
                QueueMessage {
                    run_id: run.run_id.clone(),
                },
                &DispatchOptions {
                    deployment_id: Some(run.deployment_id),
                },
            )
            .await?;

        info!(
            hook_id = %hook.hook_id,
            run_id = %hook.run_id,
            event = EventType::HookReceived.as_str(),
            "hook resumed"
        );
        Ok(HookResumption {
            hook_id: hook.hook_id,
            run_id: hook.run_id,
        })
    }
}
