// ============================================================================
// REMEDIATIONS: create what setup() found missing
// ============================================================================
//
// Each step is ordered and stops at the first failure. Nothing is rolled back;
// the next setup() pass re-detects whatever is still missing.

use std::path::Path;

use cloudrig_common::ownership::ownership_tag;
use cloudrig_common::{CloudrigError, IngressRule};
use serde_json::json;

use crate::context::CloudrigContext;
use crate::reconciler::{COMMAND_ROLE_NAME, CREDENTIAL_PAIR_NAME, EXECUTION_ROLE_NAME};

pub const EXECUTION_ROLE_POLICY: &str =
    "arn:aws:iam::aws:policy/service-role/AmazonEC2SpotFleetRole";
pub const COMMAND_ROLE_POLICIES: [&str; 2] = [
    "arn:aws:iam::aws:policy/service-role/AmazonEC2RoleforSSM",
    "arn:aws:iam::aws:policy/AmazonSNSFullAccess",
];

fn trust_policy(services: &[&str]) -> String {
    json!({
        "Version": "2012-10-17",
        "Statement": {
            "Effect": "Allow",
            "Principal": { "Service": services },
            "Action": "sts:AssumeRole"
        }
    })
    .to_string()
}

/// Role plus its policy. Re-runnable: an existing role is reused and the
/// policy is attached again.
pub async fn create_execution_role(ctx: &CloudrigContext) -> Result<(), CloudrigError> {
    let gw = ctx.gateway();

    if role_exists(ctx, EXECUTION_ROLE_NAME).await? {
        tracing::info!("[remediation] role '{}' already exists, reusing", EXECUTION_ROLE_NAME);
    } else {
        tracing::info!("[remediation] creating role '{}'", EXECUTION_ROLE_NAME);
        gw.create_role(
            EXECUTION_ROLE_NAME,
            &trust_policy(&["spotfleet.amazonaws.com"]),
        )
        .await
        .map_err(|e| CloudrigError::mutation(format!("create role {}", EXECUTION_ROLE_NAME), e))?;
    }

    tracing::info!("[remediation] attaching policy '{}'", EXECUTION_ROLE_POLICY);
    gw.attach_role_policy(EXECUTION_ROLE_NAME, EXECUTION_ROLE_POLICY)
        .await
        .map_err(|e| CloudrigError::mutation(format!("attach {}", EXECUTION_ROLE_POLICY), e))?;

    Ok(())
}

async fn role_exists(ctx: &CloudrigContext, name: &'static str) -> Result<bool, CloudrigError> {
    Ok(ctx
        .gateway()
        .list_roles()
        .await
        .map_err(|e| CloudrigError::lookup("roles", e))?
        .iter()
        .any(|r| r.name == name))
}

/// Role, two policies, instance profile, binding.
///
/// Re-runnable after a partial failure: the role, the profile and the binding
/// are only created when missing. Policy attachment is idempotent provider side.
pub async fn create_command_role(ctx: &CloudrigContext) -> Result<(), CloudrigError> {
    let gw = ctx.gateway();

    if role_exists(ctx, COMMAND_ROLE_NAME).await? {
        tracing::info!("[remediation] role '{}' already exists, reusing", COMMAND_ROLE_NAME);
    } else {
        tracing::info!("[remediation] creating role '{}'", COMMAND_ROLE_NAME);
        gw.create_role(
            COMMAND_ROLE_NAME,
            &trust_policy(&["ec2.amazonaws.com", "ssm.amazonaws.com"]),
        )
        .await
        .map_err(|e| CloudrigError::mutation(format!("create role {}", COMMAND_ROLE_NAME), e))?;
    }

    for policy in COMMAND_ROLE_POLICIES {
        tracing::info!("[remediation] attaching policy '{}'", policy);
        gw.attach_role_policy(COMMAND_ROLE_NAME, policy)
            .await
            .map_err(|e| CloudrigError::mutation(format!("attach {}", policy), e))?;
    }

    let profile = gw
        .list_instance_profiles()
        .await
        .map_err(|e| CloudrigError::lookup("command instance profile", e))?
        .into_iter()
        .find(|p| p.name == COMMAND_ROLE_NAME);

    let bound = match profile {
        Some(p) => p.roles.iter().any(|r| r == COMMAND_ROLE_NAME),
        None => {
            tracing::info!("[remediation] creating instance profile '{}'", COMMAND_ROLE_NAME);
            gw.create_instance_profile(COMMAND_ROLE_NAME)
                .await
                .map_err(|e| {
                    CloudrigError::mutation(
                        format!("create instance profile {}", COMMAND_ROLE_NAME),
                        e,
                    )
                })?;
            false
        }
    };

    if !bound {
        tracing::info!(
            "[remediation] adding role '{}' to instance profile '{}'",
            COMMAND_ROLE_NAME,
            COMMAND_ROLE_NAME
        );
        gw.add_role_to_instance_profile(COMMAND_ROLE_NAME, COMMAND_ROLE_NAME)
            .await
            .map_err(|e| {
                CloudrigError::mutation(format!("bind role to profile {}", COMMAND_ROLE_NAME), e)
            })?;
    }

    Ok(())
}

/// Rule group open to the caller's current address only. Returns the group id.
pub async fn create_network_rule(ctx: &CloudrigContext) -> Result<String, CloudrigError> {
    let gw = ctx.gateway();

    let ip = ctx
        .addresses()
        .public_ipv4()
        .await
        .map_err(|e| CloudrigError::lookup("public address", e))?;

    let name = format!("CloudRig{}", chrono::Utc::now().timestamp_millis());
    tracing::info!("[remediation] creating network rule group '{}'", name);
    let group_id = gw
        .create_network_rule_group(&name, &name)
        .await
        .map_err(|e| CloudrigError::mutation("create network rule group", e))?;

    let rule = IngressRule::all_traffic_from(format!("{}/32", ip));
    tracing::info!("[remediation] authorizing ingress from {} on {}", rule.cidr, group_id);
    gw.authorize_ingress(&group_id, &rule)
        .await
        .map_err(|e| CloudrigError::mutation(format!("authorize ingress on {}", group_id), e))?;

    gw.create_tags(&group_id, &[ownership_tag()])
        .await
        .map_err(|e| CloudrigError::mutation(format!("tag {}", group_id), e))?;

    Ok(group_id)
}

pub async fn create_credential_pair(ctx: &CloudrigContext) -> Result<(), CloudrigError> {
    let material = ctx
        .gateway()
        .create_credential_pair(CREDENTIAL_PAIR_NAME)
        .await
        .map_err(|e| {
            CloudrigError::mutation(format!("create credential pair {}", CREDENTIAL_PAIR_NAME), e)
        })?;

    let path = ctx.config().key_pair_path.as_path();
    write_private_key(path, &material.private_key).await?;
    tracing::info!("[remediation] PEM stored at {}", path.display());
    Ok(())
}

async fn write_private_key(path: &Path, pem: &str) -> Result<(), CloudrigError> {
    use tokio::io::AsyncWriteExt;

    let io_err = |source| CloudrigError::Io {
        path: path.display().to_string(),
        source,
    };

    let mut opts = tokio::fs::OpenOptions::new();
    opts.create(true).write(true).truncate(true);
    // Owner-only from creation on. mode() is ignored for an existing file.
    #[cfg(unix)]
    opts.mode(0o600);
    let mut file = opts.open(path).await.map_err(io_err)?;

    // A pre-existing key file keeps its old mode; tighten it before writing.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))
            .await
            .map_err(io_err)?;
    }

    file.write_all(pem.as_bytes()).await.map_err(io_err)?;
    file.flush().await.map_err(io_err)?;
    Ok(())
}
