use cloudrig_common::ownership::{self, ownership_filter};
use cloudrig_common::{
    CloudrigError, CredentialPair, Image, InstanceProfile, NetworkRuleGroup, Role, Settings,
};
use cloudrig_providers::CloudGateway;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::context::CloudrigContext;
use crate::remediation;

pub const EXECUTION_ROLE_NAME: &str = "cloudrig-spotfleet-4";
pub const COMMAND_ROLE_NAME: &str = "cloudrig-ssm-4";
pub const CREDENTIAL_PAIR_NAME: &str = "cloudrig";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    ExecutionRole,
    CommandRole,
    Image,
    NetworkRule,
    CredentialPair,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 5] = [
        ResourceKind::ExecutionRole,
        ResourceKind::CommandRole,
        ResourceKind::Image,
        ResourceKind::NetworkRule,
        ResourceKind::CredentialPair,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::ExecutionRole => "execution_role",
            ResourceKind::CommandRole => "command_role",
            ResourceKind::Image => "image",
            ResourceKind::NetworkRule => "network_rule",
            ResourceKind::CredentialPair => "credential_pair",
        }
    }

    fn prompt(&self) -> String {
        match self {
            ResourceKind::ExecutionRole => format!(
                "Shall I make a role called '{}' for Spot Fleet requests?",
                EXECUTION_ROLE_NAME
            ),
            ResourceKind::CommandRole => format!(
                "Shall I make a role and instance profile called '{}' for SSM communication?",
                COMMAND_ROLE_NAME
            ),
            ResourceKind::Image => {
                "Shall I make an AMI based off the stock 'cloudrig' AMI?".to_string()
            }
            ResourceKind::NetworkRule => "Can I make a CloudRig security group for you?".to_string(),
            ResourceKind::CredentialPair => {
                format!("Shall I make a Key Pair called '{}'?", CREDENTIAL_PAIR_NAME)
            }
        }
    }
}

/// Deferred fix for one absent resource. Nothing happens until `run` is called.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Remediation {
    kind: ResourceKind,
}

impl Remediation {
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub async fn run(
        &self,
        ctx: &CloudrigContext,
        cancel: &CancellationToken,
    ) -> Result<(), CloudrigError> {
        tracing::info!("[reconciler] running remediation for {}", self.kind.as_str());
        let res = match self.kind {
            ResourceKind::ExecutionRole => remediation::create_execution_role(ctx).await,
            ResourceKind::CommandRole => remediation::create_command_role(ctx).await,
            ResourceKind::Image => crate::image::create_image(ctx, cancel).await.map(|_| ()),
            ResourceKind::NetworkRule => remediation::create_network_rule(ctx).await.map(|_| ()),
            ResourceKind::CredentialPair => remediation::create_credential_pair(ctx).await,
        };
        if let Err(e) = &res {
            tracing::error!("[reconciler] remediation for {} failed: {}", self.kind.as_str(), e);
        }
        res
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Question {
    pub prompt: String,
    pub remediation: Remediation,
}

#[derive(Debug, Clone, Serialize)]
pub struct SetupReport {
    pub questions: Vec<Question>,
    pub settings: Settings,
}

/// Command role counts only when the role exists and is bound into its profile.
#[derive(Debug, Clone)]
pub struct CommandRoleBinding {
    pub role: Role,
    pub profile: InstanceProfile,
}

pub async fn find_execution_role(gw: &dyn CloudGateway) -> Result<Option<Role>, CloudrigError> {
    let roles = gw
        .list_roles()
        .await
        .map_err(|e| CloudrigError::lookup("execution role", e))?;
    Ok(roles.into_iter().find(|r| r.name == EXECUTION_ROLE_NAME))
}

pub async fn find_command_role(
    gw: &dyn CloudGateway,
) -> Result<Option<CommandRoleBinding>, CloudrigError> {
    let (roles, profiles) = tokio::try_join!(
        async {
            gw.list_roles()
                .await
                .map_err(|e| CloudrigError::lookup("command role", e))
        },
        async {
            gw.list_instance_profiles()
                .await
                .map_err(|e| CloudrigError::lookup("command instance profile", e))
        },
    )?;

    let role = roles.into_iter().find(|r| r.name == COMMAND_ROLE_NAME);
    let profile = profiles.into_iter().find(|p| p.name == COMMAND_ROLE_NAME);

    match (role, profile) {
        (Some(role), Some(profile)) if profile.roles.iter().any(|r| r == &role.name) => {
            Ok(Some(CommandRoleBinding { role, profile }))
        }
        (Some(_), _) => {
            tracing::warn!(
                "[reconciler] role '{}' exists but is not bound to its instance profile",
                COMMAND_ROLE_NAME
            );
            Ok(None)
        }
        _ => Ok(None),
    }
}

pub async fn find_image(gw: &dyn CloudGateway) -> Result<Option<Image>, CloudrigError> {
    let images = gw
        .describe_images("self", &ownership_filter())
        .await
        .map_err(|e| CloudrigError::lookup("image", e))?;
    let images = ownership::owned(images);
    if images.len() > 1 {
        tracing::warn!(
            "[reconciler] {} images carry the ownership tag, picking the newest",
            images.len()
        );
    }
    Ok(ownership::select_current_image(&images).cloned())
}

pub async fn find_network_rule_group(
    gw: &dyn CloudGateway,
) -> Result<Option<NetworkRuleGroup>, CloudrigError> {
    let groups = gw
        .describe_network_rule_groups(&ownership_filter())
        .await
        .map_err(|e| CloudrigError::lookup("network rule group", e))?;
    Ok(ownership::owned(groups).into_iter().next())
}

/// Soft-fail lookup: the provider errors when the named pair is missing, so any
/// error here reads as "absent".
pub async fn find_credential_pair(gw: &dyn CloudGateway) -> Option<CredentialPair> {
    match gw
        .describe_credential_pairs(&[CREDENTIAL_PAIR_NAME.to_string()])
        .await
    {
        Ok(pairs) => pairs.into_iter().find(|k| k.name == CREDENTIAL_PAIR_NAME),
        Err(e) => {
            tracing::warn!("[reconciler] credential pair lookup failed, treating as absent: {}", e);
            None
        }
    }
}

/// Discover every supporting resource and report what is missing.
///
/// All lookups run concurrently. On any lookup error (credential pair excepted)
/// the session settings are left untouched and the error is returned.
pub async fn setup(ctx: &CloudrigContext) -> Result<SetupReport, CloudrigError> {
    let gw = ctx.gateway();
    tracing::info!("🔍 [reconciler] checking supporting resources");

    let (execution_role, command_role, image, rule_group, credential_pair) = tokio::try_join!(
        find_execution_role(gw),
        find_command_role(gw),
        find_image(gw),
        find_network_rule_group(gw),
        async { Ok::<_, CloudrigError>(find_credential_pair(gw).await) },
    )?;

    let mut settings = Settings::default();
    let mut questions = Vec::new();
    let mut ask = |kind: ResourceKind| {
        tracing::info!("[reconciler] {} is missing", kind.as_str());
        questions.push(Question {
            prompt: kind.prompt(),
            remediation: Remediation { kind },
        });
    };

    match execution_role {
        Some(role) => settings.execution_role_arn = Some(role.arn),
        None => ask(ResourceKind::ExecutionRole),
    }
    match command_role {
        Some(binding) => {
            settings.command_role_arn = Some(binding.role.arn);
            settings.command_instance_profile_arn = Some(binding.profile.arn);
        }
        None => ask(ResourceKind::CommandRole),
    }
    match image {
        Some(image) => settings.image_id = Some(image.image_id),
        None => ask(ResourceKind::Image),
    }
    match rule_group {
        Some(group) => settings.network_rule_group_id = Some(group.group_id),
        None => ask(ResourceKind::NetworkRule),
    }
    match credential_pair {
        Some(pair) => settings.credential_pair_name = Some(pair.name),
        None => ask(ResourceKind::CredentialPair),
    }

    ctx.replace_settings(settings.clone()).await;
    tracing::info!(
        "✅ [reconciler] setup complete: {} question(s), settings complete={}",
        questions.len(),
        settings.is_complete()
    );
    Ok(SetupReport {
        questions,
        settings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn questions_serialize_with_their_kind() {
        let q = Question {
            prompt: ResourceKind::Image.prompt(),
            remediation: Remediation {
                kind: ResourceKind::Image,
            },
        };
        let v = serde_json::to_value(&q).unwrap();
        assert_eq!(v["remediation"]["kind"], "image");
        assert!(v["prompt"].as_str().unwrap().contains("AMI"));
    }

    #[test]
    fn every_kind_has_a_distinct_prompt() {
        let mut prompts: Vec<String> = ResourceKind::ALL.iter().map(|k| k.prompt()).collect();
        prompts.sort();
        prompts.dedup();
        assert_eq!(prompts.len(), ResourceKind::ALL.len());
    }
}
