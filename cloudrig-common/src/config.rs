use std::path::PathBuf;
use std::time::Duration;

use aws_config::profile::ProfileFileCredentialsProvider;
#[allow(deprecated)]
use aws_config::profile::profile_file::{ProfileFileKind, ProfileFiles};
use aws_credential_types::provider::ProvideCredentials;

pub const ENV_PROFILE: &str = "CLOUDRIG_AWS_PROFILE";
pub const ENV_MAX_PRICE: &str = "CLOUDRIG_AWS_MAX_PRICE";
pub const ENV_REGION: &str = "CLOUDRIG_AWS_REGION";
pub const ENV_INSTANCE_TYPE: &str = "CLOUDRIG_INSTANCE_TYPE";
pub const ENV_KEY_PATH: &str = "CLOUDRIG_KEY_PATH";
pub const ENV_CREDENTIALS_FILE: &str = "AWS_SHARED_CREDENTIALS_FILE";
pub const ENV_CONFIG_FILE: &str = "AWS_CONFIG_FILE";

pub const DEFAULT_PROFILE: &str = "default";
pub const DEFAULT_MAX_PRICE: &str = "0.4";
pub const DEFAULT_INSTANCE_TYPE: &str = "g2.2xlarge";
pub const DEFAULT_KEY_PATH: &str = "cloudrig.pem";

/// Upper bounds for every wait the orchestrator performs.
#[derive(Debug, Clone, PartialEq)]
pub struct Timeouts {
    pub fulfillment: Duration,
    pub boot: Duration,
    pub health: Duration,
    pub terminate: Duration,
    pub image: Duration,
    pub command: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            fulfillment: Duration::from_secs(900),
            boot: Duration::from_secs(900),
            health: Duration::from_secs(1200),
            terminate: Duration::from_secs(600),
            image: Duration::from_secs(3600),
            command: Duration::from_secs(1800),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CloudrigConfig {
    pub credentials_profile: String,
    /// Kept as the provider expects it (decimal string, dollars per hour).
    pub max_price: String,
    pub region: Option<String>,
    pub instance_type: String,
    pub key_pair_path: PathBuf,
    pub credentials_file: Option<PathBuf>,
    pub config_file: Option<PathBuf>,
    pub timeouts: Timeouts,
}

impl Default for CloudrigConfig {
    fn default() -> Self {
        Self {
            credentials_profile: DEFAULT_PROFILE.to_string(),
            max_price: DEFAULT_MAX_PRICE.to_string(),
            region: None,
            instance_type: DEFAULT_INSTANCE_TYPE.to_string(),
            key_pair_path: PathBuf::from(DEFAULT_KEY_PATH),
            credentials_file: None,
            config_file: None,
            timeouts: Timeouts::default(),
        }
    }
}

/// Configuration keys the front end must ask for.
pub fn required_config_keys() -> [&'static str; 3] {
    [ENV_PROFILE, ENV_MAX_PRICE, ENV_REGION]
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn secs(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: Duration) -> Duration {
    non_empty(lookup(key))
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

impl CloudrigConfig {
    /// Load `.env` (if any) then read the process environment.
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Timeouts::default();
        let aws_dir = dirs::home_dir().map(|home| home.join(".aws"));
        let aws_file = |key: &str, name: &str| {
            non_empty(lookup(key))
                .map(PathBuf::from)
                .or_else(|| aws_dir.as_ref().map(|dir| dir.join(name)))
        };
        let credentials_file = aws_file(ENV_CREDENTIALS_FILE, "credentials");
        let config_file = aws_file(ENV_CONFIG_FILE, "config");

        let cfg = Self {
            credentials_profile: non_empty(lookup(ENV_PROFILE))
                .unwrap_or_else(|| DEFAULT_PROFILE.to_string()),
            max_price: non_empty(lookup(ENV_MAX_PRICE))
                .unwrap_or_else(|| DEFAULT_MAX_PRICE.to_string()),
            region: non_empty(lookup(ENV_REGION)),
            instance_type: non_empty(lookup(ENV_INSTANCE_TYPE))
                .unwrap_or_else(|| DEFAULT_INSTANCE_TYPE.to_string()),
            key_pair_path: non_empty(lookup(ENV_KEY_PATH))
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_KEY_PATH)),
            credentials_file,
            config_file,
            timeouts: Timeouts {
                fulfillment: secs(&lookup, "CLOUDRIG_FULFILLMENT_TIMEOUT_S", defaults.fulfillment),
                boot: secs(&lookup, "CLOUDRIG_BOOT_TIMEOUT_S", defaults.boot),
                health: secs(&lookup, "CLOUDRIG_HEALTH_TIMEOUT_S", defaults.health),
                terminate: secs(&lookup, "CLOUDRIG_TERMINATE_TIMEOUT_S", defaults.terminate),
                image: secs(&lookup, "CLOUDRIG_IMAGE_TIMEOUT_S", defaults.image),
                command: secs(&lookup, "CLOUDRIG_COMMAND_TIMEOUT_S", defaults.command),
            },
        };
        tracing::debug!(
            "[config] profile={} region={:?} max_price={} instance_type={}",
            cfg.credentials_profile,
            cfg.region,
            cfg.max_price,
            cfg.instance_type
        );
        cfg
    }

    /// Validate the required values. Returns human-readable failures; empty means OK.
    pub async fn validate(&self) -> Vec<String> {
        let mut failures = Vec::new();

        if let Err(reason) = self.resolve_access_key().await {
            tracing::debug!("[config] profile {}: {}", self.credentials_profile, reason);
            failures.push("AWS profile not found".to_string());
        }

        if self.region.is_none() {
            failures.push("AWS region is not set".to_string());
        }

        match self.max_price.trim().parse::<f64>() {
            Ok(p) if p.is_finite() && p > 0.0 => {}
            _ => failures.push(format!(
                "AWS max price '{}' is not a positive number",
                self.max_price
            )),
        }

        failures
    }

    /// Resolve the configured profile through the SDK's profile chain and
    /// return its access key id.
    #[allow(deprecated)]
    pub async fn resolve_access_key(&self) -> Result<String, String> {
        if self.credentials_file.is_none() && self.config_file.is_none() {
            return Err("no shared credentials or config file".to_string());
        }
        let mut files = ProfileFiles::builder();
        if let Some(path) = &self.credentials_file {
            files = files.with_file(ProfileFileKind::Credentials, path);
        }
        if let Some(path) = &self.config_file {
            files = files.with_file(ProfileFileKind::Config, path);
        }
        let provider = ProfileFileCredentialsProvider::builder()
            .profile_files(files.build())
            .profile_name(&self.credentials_profile)
            .build();

        let credentials = provider
            .provide_credentials()
            .await
            .map_err(|e| e.to_string())?;
        let key = credentials.access_key_id().trim();
        if key.is_empty() {
            return Err("access key id is empty".to_string());
        }
        Ok(key.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_apply_when_env_is_empty() {
        let cfg = CloudrigConfig::from_lookup(lookup(&[]));
        assert_eq!(cfg.credentials_profile, "default");
        assert_eq!(cfg.max_price, "0.4");
        assert_eq!(cfg.instance_type, "g2.2xlarge");
        assert_eq!(cfg.key_pair_path, PathBuf::from("cloudrig.pem"));
        let aws_dir = dirs::home_dir().map(|h| h.join(".aws"));
        assert_eq!(cfg.credentials_file, aws_dir.as_ref().map(|d| d.join("credentials")));
        assert_eq!(cfg.config_file, aws_dir.as_ref().map(|d| d.join("config")));
        assert_eq!(cfg.region, None);
        assert_eq!(cfg.timeouts, Timeouts::default());
    }

    #[test]
    fn env_overrides_and_timeouts() {
        let cfg = CloudrigConfig::from_lookup(lookup(&[
            (ENV_PROFILE, "gaming"),
            (ENV_MAX_PRICE, " 0.75 "),
            (ENV_REGION, "ap-southeast-2"),
            (ENV_CREDENTIALS_FILE, "/tmp/creds"),
            (ENV_CONFIG_FILE, "/tmp/aws-config"),
            ("CLOUDRIG_COMMAND_TIMEOUT_S", "30"),
            ("CLOUDRIG_BOOT_TIMEOUT_S", "not-a-number"),
        ]));
        assert_eq!(cfg.credentials_profile, "gaming");
        assert_eq!(cfg.max_price, "0.75");
        assert_eq!(cfg.region.as_deref(), Some("ap-southeast-2"));
        assert_eq!(cfg.credentials_file, Some(PathBuf::from("/tmp/creds")));
        assert_eq!(cfg.config_file, Some(PathBuf::from("/tmp/aws-config")));
        assert_eq!(cfg.timeouts.command, Duration::from_secs(30));
        assert_eq!(cfg.timeouts.boot, Timeouts::default().boot);
    }

    fn aws_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", contents).unwrap();
        file
    }

    fn with_files(
        profile: &str,
        credentials: &tempfile::NamedTempFile,
        config: Option<&tempfile::NamedTempFile>,
    ) -> CloudrigConfig {
        CloudrigConfig {
            credentials_profile: profile.into(),
            region: Some("us-east-1".into()),
            credentials_file: Some(credentials.path().to_path_buf()),
            config_file: config.map(|f| f.path().to_path_buf()),
            ..CloudrigConfig::default()
        }
    }

    #[tokio::test]
    async fn validate_reports_failures_as_strings() {
        let creds = aws_file("[rig]\naws_access_key_id = AKIA123\naws_secret_access_key = s3cr3t\n");

        let mut cfg = with_files("rig", &creds, None);
        assert!(cfg.validate().await.is_empty());
        assert_eq!(cfg.resolve_access_key().await.unwrap(), "AKIA123");

        cfg.credentials_profile = "other".into();
        cfg.max_price = "-1".into();
        cfg.region = None;
        let failures = cfg.validate().await;
        assert_eq!(failures.len(), 3);
        assert_eq!(failures[0], "AWS profile not found");
    }

    #[tokio::test]
    async fn profile_prefix_in_credentials_file_is_not_a_profile() {
        // `[profile name]` headers belong to the config file only.
        let creds = aws_file(
            "[profile gaming]\naws_access_key_id = AKIAGAMING\naws_secret_access_key = s3cr3t\n",
        );

        let cfg = with_files("gaming", &creds, None);

        assert_eq!(cfg.validate().await, vec!["AWS profile not found".to_string()]);
    }

    #[tokio::test]
    async fn profile_from_config_file_counts() {
        let creds = aws_file("");
        let config = aws_file(
            "[profile gaming]\naws_access_key_id = AKIAGAMING\naws_secret_access_key = s3cr3t\n",
        );

        let cfg = with_files("gaming", &creds, Some(&config));

        assert!(cfg.validate().await.is_empty());
        assert_eq!(cfg.resolve_access_key().await.unwrap(), "AKIAGAMING");
    }

    #[tokio::test]
    async fn blank_access_key_is_missing() {
        let creds = aws_file("[empty]\naws_access_key_id =\naws_secret_access_key = s3cr3t\n");

        let cfg = with_files("empty", &creds, None);

        assert_eq!(cfg.validate().await, vec!["AWS profile not found".to_string()]);
    }

    #[tokio::test]
    async fn validate_without_credentials_file() {
        let cfg = CloudrigConfig {
            region: Some("us-east-1".into()),
            credentials_file: Some(PathBuf::from("/definitely/not/here")),
            ..CloudrigConfig::default()
        };
        assert_eq!(cfg.validate().await, vec!["AWS profile not found".to_string()]);

        let cfg = CloudrigConfig {
            region: Some("us-east-1".into()),
            ..CloudrigConfig::default()
        };
        assert!(cfg.resolve_access_key().await.is_err());
    }

    #[test]
    fn required_keys_are_listed() {
        assert_eq!(
            required_config_keys(),
            ["CLOUDRIG_AWS_PROFILE", "CLOUDRIG_AWS_MAX_PRICE", "CLOUDRIG_AWS_REGION"]
        );
    }
}
