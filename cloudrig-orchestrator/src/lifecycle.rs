use cloudrig_common::ownership::{self, owned_instances_filter, ownership_tag};
use cloudrig_common::{
    CapacityRequestSpec, CloudrigError, Instance, InstanceStateName, LaunchSpecification,
};
use cloudrig_providers::CloudGateway;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::context::CloudrigContext;
use crate::polling::{bounded_wait, poll_until};

pub const NO_INSTANCE_RUNNING: &str = "There's no instance running...";

/// Where the controller believes the instance is. Observed, never owned: the
/// provider's inventory is the truth and is re-queried at every step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecyclePhase {
    Absent,
    RequestSubmitted,
    InstanceTagging,
    AwaitingRunning,
    AwaitingHealthy,
    Running,
    CancellingRequest,
    AwaitingTerminated,
    Failed,
}

impl LifecyclePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecyclePhase::Absent => "absent",
            LifecyclePhase::RequestSubmitted => "request_submitted",
            LifecyclePhase::InstanceTagging => "instance_tagging",
            LifecyclePhase::AwaitingRunning => "awaiting_running",
            LifecyclePhase::AwaitingHealthy => "awaiting_healthy",
            LifecyclePhase::Running => "running",
            LifecyclePhase::CancellingRequest => "cancelling_request",
            LifecyclePhase::AwaitingTerminated => "awaiting_terminated",
            LifecyclePhase::Failed => "failed",
        }
    }
}

fn transition(ctx: &CloudrigContext, to: LifecyclePhase, subject: &str) {
    let from = ctx.publish_phase(to);
    tracing::info!("🔄 [lifecycle] {}: {} -> {}", subject, from.as_str(), to.as_str());
}

/// Owned instances grouped by provider state.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InstanceState {
    pub active: Vec<Instance>,
    pub pending: Vec<Instance>,
    pub shutting_down: Vec<Instance>,
}

impl InstanceState {
    pub fn is_empty(&self) -> bool {
        self.active.is_empty() && self.pending.is_empty() && self.shutting_down.is_empty()
    }
}

async fn owned_instances(
    gw: &dyn CloudGateway,
    state: InstanceStateName,
) -> Result<Vec<Instance>, CloudrigError> {
    let instances = gw
        .describe_instances(&owned_instances_filter(state))
        .await
        .map_err(|e| CloudrigError::lookup("instances", e))?;
    Ok(ownership::owned(instances)
        .into_iter()
        .filter(|i| i.state == state)
        .collect())
}

/// Fresh view of our instances. Three concurrent queries, never cached.
pub async fn get_state(ctx: &CloudrigContext) -> Result<InstanceState, CloudrigError> {
    let gw = ctx.gateway();
    let (active, pending, shutting_down) = tokio::try_join!(
        owned_instances(gw, InstanceStateName::Running),
        owned_instances(gw, InstanceStateName::Pending),
        owned_instances(gw, InstanceStateName::ShuttingDown),
    )?;
    Ok(InstanceState {
        active,
        pending,
        shutting_down,
    })
}

/// First active instance, or a precondition error.
pub async fn active_instance(ctx: &CloudrigContext) -> Result<Instance, CloudrigError> {
    get_state(ctx)
        .await?
        .active
        .into_iter()
        .next()
        .ok_or_else(|| CloudrigError::precondition(NO_INSTANCE_RUNNING))
}

pub async fn public_dns(ctx: &CloudrigContext) -> Result<String, CloudrigError> {
    let instance = active_instance(ctx).await?;
    instance
        .public_dns_name
        .filter(|d| !d.trim().is_empty())
        .ok_or_else(|| {
            CloudrigError::precondition(format!(
                "instance {} has no public DNS name",
                instance.instance_id
            ))
        })
}

/// Returned by `start()` as soon as the capacity request is accepted.
pub struct StartTicket {
    request: CapacityRequestSpec,
    request_id: String,
    phase: watch::Receiver<LifecyclePhase>,
    cancel: CancellationToken,
    task: JoinHandle<Result<Instance, CloudrigError>>,
}

impl StartTicket {
    /// Raw parameters of the submitted request.
    pub fn request(&self) -> &CapacityRequestSpec {
        &self.request
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn phase(&self) -> LifecyclePhase {
        *self.phase.borrow()
    }

    /// Session phase; a later `stop()` keeps publishing here.
    pub fn watch_phase(&self) -> watch::Receiver<LifecyclePhase> {
        self.phase.clone()
    }

    /// Abort the readiness sequence. The capacity request itself stays open;
    /// `stop()` (once an instance is active) or the provider console closes it.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait until the instance is running and healthy.
    pub async fn wait_ready(self) -> Result<Instance, CloudrigError> {
        match self.task.await {
            Ok(res) => res,
            Err(e) => Err(CloudrigError::Task(e.to_string())),
        }
    }
}

/// Submit one capacity request and drive it to a running, healthy instance in the background.
pub async fn start(ctx: &CloudrigContext) -> Result<StartTicket, CloudrigError> {
    let settings = ctx.settings().await;
    let missing = settings.missing();
    if !missing.is_empty() {
        return Err(CloudrigError::precondition(format!(
            "setup has not resolved: {}",
            missing.join(", ")
        )));
    }

    let state = get_state(ctx).await?;
    if let Some(existing) = state.active.first().or_else(|| state.pending.first()) {
        return Err(CloudrigError::precondition(format!(
            "instance {} is already {}",
            existing.instance_id,
            existing.state.as_str()
        )));
    }

    let config = ctx.config();
    // Settings were checked complete above.
    let request = CapacityRequestSpec {
        execution_role_arn: settings.execution_role_arn.unwrap_or_default(),
        launch: LaunchSpecification {
            image_id: settings.image_id.unwrap_or_default(),
            instance_type: config.instance_type.clone(),
            instance_profile_arn: settings.command_instance_profile_arn.unwrap_or_default(),
            network_rule_group_id: settings.network_rule_group_id.unwrap_or_default(),
            credential_pair_name: settings.credential_pair_name.unwrap_or_default(),
        },
        max_price: config.max_price.clone(),
        target_capacity: 1,
    };

    let request_id = ctx
        .gateway()
        .submit_capacity_request(&request)
        .await
        .map_err(|e| {
            tracing::error!("❌ [lifecycle] capacity request rejected: {}", e);
            CloudrigError::mutation("submit capacity request", e)
        })?;
    tracing::info!("[lifecycle] request made: {}", request_id);
    transition(ctx, LifecyclePhase::RequestSubmitted, &request_id);

    let phase = ctx.watch_phase();
    let cancel = CancellationToken::new();
    let task = {
        let ctx = ctx.clone();
        let request_id = request_id.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let res = drive_to_running(&ctx, &request_id, &cancel).await;
            if let Err(e) = &res {
                tracing::error!("❌ [lifecycle] start of {} failed: {}", request_id, e);
                transition(&ctx, LifecyclePhase::Failed, &request_id);
            }
            res
        })
    };

    Ok(StartTicket {
        request,
        request_id,
        phase,
        cancel,
        task,
    })
}

async fn fulfilling_instance(
    gw: &dyn CloudGateway,
    request_id: &str,
) -> Result<Option<String>, CloudrigError> {
    let ids = gw
        .describe_capacity_request_instances(request_id)
        .await
        .map_err(|e| CloudrigError::lookup("capacity request instances", e))?;
    Ok(ids.into_iter().next())
}

async fn running_instance(
    gw: &dyn CloudGateway,
    instance_id: &str,
) -> Result<Option<Instance>, CloudrigError> {
    Ok(owned_instances(gw, InstanceStateName::Running)
        .await?
        .into_iter()
        .find(|i| i.instance_id == instance_id))
}

async fn drive_to_running(
    ctx: &CloudrigContext,
    request_id: &str,
    cancel: &CancellationToken,
) -> Result<Instance, CloudrigError> {
    let gw = ctx.gateway();

    let instance_id = poll_until(
        "capacity request fulfillment",
        &ctx.fulfillment_policy(),
        cancel,
        || fulfilling_instance(gw, request_id),
    )
    .await?;
    tracing::info!("[lifecycle] got an instance: {}", instance_id);

    transition(ctx, LifecyclePhase::InstanceTagging, &instance_id);
    gw.create_tags(&instance_id, &[ownership_tag()])
        .await
        .map_err(|e| CloudrigError::mutation(format!("tag instance {}", instance_id), e))?;

    transition(ctx, LifecyclePhase::AwaitingRunning, &instance_id);
    let instance = poll_until("instance boot", &ctx.boot_policy(), cancel, || {
        running_instance(gw, &instance_id)
    })
    .await?;

    transition(ctx, LifecyclePhase::AwaitingHealthy, &instance_id);
    bounded_wait(
        "instance status ok",
        &instance_id,
        ctx.config().timeouts.health,
        cancel,
        gw.wait_for_instance_healthy(&instance_id),
    )
    .await?;

    transition(ctx, LifecyclePhase::Running, &instance_id);
    tracing::info!("✅ [lifecycle] {} ready", instance_id);
    Ok(instance)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StopOutcome {
    pub request_id: String,
    pub instance_id: String,
}

/// Cancel the active instance's capacity request and wait for termination.
pub async fn stop(
    ctx: &CloudrigContext,
    cancel: &CancellationToken,
) -> Result<StopOutcome, CloudrigError> {
    let instance = active_instance(ctx).await?;
    let instance_id = instance.instance_id.clone();

    let request_id = ownership::capacity_request_id(&instance.tags)
        .map(str::to_string)
        .ok_or_else(|| {
            CloudrigError::precondition(format!(
                "instance {} carries no capacity request association tag",
                instance_id
            ))
        })?;

    let res = tear_down(ctx, &request_id, &instance_id, cancel).await;
    if let Err(e) = &res {
        tracing::error!("❌ [lifecycle] stop of {} failed: {}", instance_id, e);
        transition(ctx, LifecyclePhase::Failed, &instance_id);
    }
    res?;

    Ok(StopOutcome {
        request_id,
        instance_id,
    })
}

async fn tear_down(
    ctx: &CloudrigContext,
    request_id: &str,
    instance_id: &str,
    cancel: &CancellationToken,
) -> Result<(), CloudrigError> {
    let gw = ctx.gateway();

    transition(ctx, LifecyclePhase::CancellingRequest, request_id);
    gw.cancel_capacity_request(request_id, true)
        .await
        .map_err(|e| {
            CloudrigError::mutation(format!("cancel capacity request {}", request_id), e)
        })?;

    transition(ctx, LifecyclePhase::AwaitingTerminated, instance_id);
    bounded_wait(
        "instance terminated",
        instance_id,
        ctx.config().timeouts.terminate,
        cancel,
        gw.wait_for_instance_terminated(instance_id),
    )
    .await?;

    transition(ctx, LifecyclePhase::Absent, instance_id);
    Ok(())
}
