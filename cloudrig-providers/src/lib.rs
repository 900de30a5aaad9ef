use anyhow::Result;
use async_trait::async_trait;
use cloudrig_common::{
    CapacityRequestSpec, CommandInvocationRequest, CopyImageRequest, CredentialPair,
    CredentialPairMaterial, Filter, Image, IngressRule, Instance, InstanceProfile,
    InvocationReport, NetworkRuleGroup, Role, Tag,
};

pub mod public_ip;

pub use public_ip::{HttpPublicIp, PublicAddressSource, StaticPublicIp};

/// Typed client for the provider's compute, identity and command services.
///
/// Implementations are thin: one call per method, no retries, no polling.
/// Provider-side waiters (`wait_for_*`) block until the provider's own waiter
/// resolves; callers bound them with a timeout.
#[async_trait]
pub trait CloudGateway: Send + Sync {
    // Identity
    async fn list_roles(&self) -> Result<Vec<Role>>;
    async fn list_instance_profiles(&self) -> Result<Vec<InstanceProfile>>;
    async fn create_role(&self, name: &str, trust_policy: &str) -> Result<Role>;
    async fn attach_role_policy(&self, role_name: &str, policy_arn: &str) -> Result<()>;
    async fn create_instance_profile(&self, name: &str) -> Result<InstanceProfile>;
    async fn add_role_to_instance_profile(&self, profile_name: &str, role_name: &str)
        -> Result<()>;

    // Images
    async fn describe_images(&self, owner: &str, filters: &[Filter]) -> Result<Vec<Image>>;
    async fn copy_image(&self, request: &CopyImageRequest) -> Result<String>;
    async fn create_image_from_instance(
        &self,
        instance_id: &str,
        name: &str,
        no_reboot: bool,
    ) -> Result<String>;
    async fn wait_for_image_available(&self, image_id: &str) -> Result<()>;

    // Network
    async fn describe_network_rule_groups(&self, filters: &[Filter])
        -> Result<Vec<NetworkRuleGroup>>;
    async fn create_network_rule_group(&self, name: &str, description: &str) -> Result<String>;
    async fn authorize_ingress(&self, group_id: &str, rule: &IngressRule) -> Result<()>;

    // Credential pairs
    async fn describe_credential_pairs(&self, names: &[String]) -> Result<Vec<CredentialPair>>;
    async fn create_credential_pair(&self, name: &str) -> Result<CredentialPairMaterial>;

    // Tags (any resource id)
    async fn create_tags(&self, resource_id: &str, tags: &[Tag]) -> Result<()>;
    async fn delete_tags(&self, resource_id: &str, tags: &[Tag]) -> Result<()>;

    // Instances & capacity requests
    async fn describe_instances(&self, filters: &[Filter]) -> Result<Vec<Instance>>;
    async fn submit_capacity_request(&self, spec: &CapacityRequestSpec) -> Result<String>;
    /// Instance ids currently fulfilling the request (empty while unfulfilled).
    async fn describe_capacity_request_instances(&self, request_id: &str) -> Result<Vec<String>>;
    async fn cancel_capacity_request(&self, request_id: &str, terminate_instances: bool)
        -> Result<()>;
    async fn wait_for_instance_healthy(&self, instance_id: &str) -> Result<()>;
    async fn wait_for_instance_terminated(&self, instance_id: &str) -> Result<()>;

    // Remote commands
    async fn submit_command_invocation(&self, request: &CommandInvocationRequest)
        -> Result<String>;
    /// `None` until the provider has registered the invocation for this instance.
    async fn get_invocation_status(
        &self,
        invocation_id: &str,
        instance_id: &str,
    ) -> Result<Option<InvocationReport>>;
}

#[cfg(feature = "mock")]
pub mod mock;
