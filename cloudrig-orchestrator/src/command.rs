use cloudrig_common::{CloudrigError, CommandInvocationRequest, InvocationStatus};
use cloudrig_providers::CloudGateway;
use tokio_util::sync::CancellationToken;

use crate::context::CloudrigContext;
use crate::lifecycle;
use crate::polling::poll_until;

pub const DOCUMENT_NAME: &str = "AWS-RunPowerShellScript";

async fn check_invocation(
    gw: &dyn CloudGateway,
    invocation_id: &str,
    instance_id: &str,
) -> Result<Option<String>, CloudrigError> {
    let report = gw
        .get_invocation_status(invocation_id, instance_id)
        .await
        .map_err(|e| CloudrigError::lookup("command invocation", e))?;

    let Some(report) = report else {
        tracing::debug!("[command] {} has no report yet", invocation_id);
        return Ok(None);
    };

    match report.status {
        InvocationStatus::Success => Ok(Some(report.output.unwrap_or_default())),
        status if status.is_failure() => {
            tracing::error!("❌ [command] {} ended {}", invocation_id, status.as_str());
            Err(CloudrigError::CommandFailed {
                invocation_id: invocation_id.to_string(),
                status: status.as_str().to_string(),
                output: report.output,
            })
        }
        status => {
            tracing::debug!("[command] {} is {}", invocation_id, status.as_str());
            Ok(None)
        }
    }
}

/// Run a PowerShell script on the active instance and return its output.
pub async fn run(
    ctx: &CloudrigContext,
    commands: &[String],
    cancel: &CancellationToken,
) -> Result<String, CloudrigError> {
    let gw = ctx.gateway();
    let instance = lifecycle::active_instance(ctx).await?;

    let request = CommandInvocationRequest {
        instance_id: instance.instance_id.clone(),
        document_name: DOCUMENT_NAME.to_string(),
        service_role_arn: ctx.settings().await.command_role_arn,
        commands: commands.to_vec(),
    };
    let invocation_id = gw
        .submit_command_invocation(&request)
        .await
        .map_err(|e| {
            CloudrigError::mutation(format!("send command to {}", instance.instance_id), e)
        })?;
    tracing::info!(
        "[command] sent {} command(s) to {} as {}",
        commands.len(),
        instance.instance_id,
        invocation_id
    );

    let output = poll_until("command invocation", &ctx.command_policy(), cancel, || {
        check_invocation(gw, &invocation_id, &instance.instance_id)
    })
    .await?;
    tracing::info!("✅ [command] {} succeeded", invocation_id);
    Ok(output)
}
