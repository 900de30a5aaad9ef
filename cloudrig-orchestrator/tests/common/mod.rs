// Shared fixtures for orchestrator integration tests.
// Everything runs against MockGateway; no test talks to a real provider.
#![allow(dead_code)]

use std::net::Ipv4Addr;
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use cloudrig_common::ownership::ownership_tag;
use cloudrig_common::CloudrigConfig;
use cloudrig_orchestrator::reconciler::{
    COMMAND_ROLE_NAME, CREDENTIAL_PAIR_NAME, EXECUTION_ROLE_NAME,
};
use cloudrig_orchestrator::{logging, CloudrigContext};
use cloudrig_providers::mock::MockGateway;
use cloudrig_providers::StaticPublicIp;
use tempfile::TempDir;

pub const SEEDED_IMAGE_ID: &str = "ami-seeded01";
pub const SEEDED_GROUP_ID: &str = "sg-seeded01";
pub const CALLER_IP: Ipv4Addr = Ipv4Addr::new(203, 0, 113, 7);

pub struct Fixture {
    pub gateway: Arc<MockGateway>,
    pub ctx: CloudrigContext,
    // Holds the key file directory alive for the test's duration.
    pub dir: TempDir,
}

impl Fixture {
    pub fn key_path(&self) -> std::path::PathBuf {
        self.ctx.config().key_pair_path.clone()
    }
}

/// Empty account: nothing cloudrig needs exists yet.
pub fn fixture() -> Fixture {
    logging::init();
    let dir = TempDir::new().expect("tempdir");
    let config = CloudrigConfig {
        region: Some("us-east-1".to_string()),
        key_pair_path: dir.path().join("cloudrig.pem"),
        ..CloudrigConfig::default()
    };
    let gateway = Arc::new(MockGateway::new());
    let ctx = CloudrigContext::new(gateway.clone(), Arc::new(StaticPublicIp(CALLER_IP)), config);
    Fixture { gateway, ctx, dir }
}

/// Seed every supporting resource `setup()` looks for.
pub fn seed_all_present(gw: &MockGateway) {
    gw.seed_role(EXECUTION_ROLE_NAME);
    gw.seed_role(COMMAND_ROLE_NAME);
    gw.seed_instance_profile(COMMAND_ROLE_NAME, &[COMMAND_ROLE_NAME]);
    gw.seed_image(
        SEEDED_IMAGE_ID,
        Some(Utc.with_ymd_and_hms(2017, 3, 1, 12, 0, 0).unwrap()),
        vec![ownership_tag()],
    );
    gw.seed_rule_group(SEEDED_GROUP_ID, vec![ownership_tag()]);
    gw.seed_key_pair(CREDENTIAL_PAIR_NAME);
}

/// Fully provisioned account with `setup()` already run.
pub async fn ready_fixture() -> Fixture {
    let f = fixture();
    seed_all_present(&f.gateway);
    let report = cloudrig_orchestrator::setup(&f.ctx).await.expect("setup");
    assert!(report.questions.is_empty());
    f
}
