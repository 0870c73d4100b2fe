//! Controller configuration
//!
//! Connection settings for the control plane and Jenkins, plus the timing of
//! resyncs, retries and forced kills.

use std::time::Duration;

/// Controller configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Identifier of this controller instance, used in logs
    pub controller_id: String,

    /// Control-plane API base URL (e.g., "http://localhost:8001")
    pub control_plane_url: String,

    /// Bearer token for the control plane
    pub control_plane_token: Option<String>,

    /// Jenkins base URL; `None` runs against an in-memory engine
    pub jenkins_url: Option<String>,

    pub jenkins_user: Option<String>,

    /// Jenkins API token of `jenkins_user`
    pub jenkins_token: Option<String>,

    /// Name of the Jenkins instance JenkinsBindings must target
    pub jenkins_service: String,

    /// How often every resource is re-enqueued
    pub resync_interval: Duration,

    /// Number of concurrent reconcile workers
    pub worker_count: usize,

    /// Delay between terminating a run and force-killing it
    pub kill_grace_period: Duration,

    /// Delay before a failed reconcile is retried
    pub requeue_delay: Duration,
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new(controller_id: String, control_plane_url: String) -> Self {
        Self {
            controller_id,
            control_plane_url,
            control_plane_token: None,
            jenkins_url: None,
            jenkins_user: None,
            jenkins_token: None,
            jenkins_service: "jenkins".to_string(),
            resync_interval: Duration::from_secs(300),
            worker_count: 4,
            kill_grace_period: Duration::from_secs(5),
            requeue_delay: Duration::from_secs(10),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - CONTROL_PLANE_URL (required)
    /// - CONTROL_PLANE_TOKEN (optional)
    /// - CONTROLLER_ID (optional, default: random)
    /// - JENKINS_URL (optional, unset runs against an in-memory engine)
    /// - JENKINS_USER, JENKINS_TOKEN (optional, set together)
    /// - JENKINS_SERVICE (optional, default: jenkins)
    /// - RESYNC_INTERVAL (optional, seconds, default: 300)
    /// - WORKER_COUNT (optional, default: 4)
    /// - KILL_GRACE_PERIOD (optional, seconds, default: 5)
    /// - REQUEUE_DELAY (optional, seconds, default: 10)
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let control_plane_url = lookup("CONTROL_PLANE_URL")
            .ok_or_else(|| anyhow::anyhow!("CONTROL_PLANE_URL environment variable not set"))?;

        let controller_id =
            lookup("CONTROLLER_ID").unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let seconds = |name: &str, default: u64| {
            lookup(name)
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(Duration::from_secs(default))
        };

        let worker_count = lookup("WORKER_COUNT")
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(4);

        Ok(Self {
            controller_id,
            control_plane_url,
            control_plane_token: lookup("CONTROL_PLANE_TOKEN"),
            jenkins_url: lookup("JENKINS_URL"),
            jenkins_user: lookup("JENKINS_USER"),
            jenkins_token: lookup("JENKINS_TOKEN"),
            jenkins_service: lookup("JENKINS_SERVICE").unwrap_or_else(|| "jenkins".to_string()),
            resync_interval: seconds("RESYNC_INTERVAL", 300),
            worker_count,
            kill_grace_period: seconds("KILL_GRACE_PERIOD", 5),
            requeue_delay: seconds("REQUEUE_DELAY", 10),
        })
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.controller_id.is_empty() {
            anyhow::bail!("controller_id cannot be empty");
        }

        if !is_http_url(&self.control_plane_url) {
            anyhow::bail!("control_plane_url must start with http:// or https://");
        }

        if let Some(url) = &self.jenkins_url {
            if !is_http_url(url) {
                anyhow::bail!("jenkins_url must start with http:// or https://");
            }
        }

        if self.jenkins_user.is_some() != self.jenkins_token.is_some() {
            anyhow::bail!("jenkins_user and jenkins_token must be set together");
        }

        if self.jenkins_service.is_empty() {
            anyhow::bail!("jenkins_service cannot be empty");
        }

        if self.resync_interval.as_secs() == 0 {
            anyhow::bail!("resync_interval must be greater than 0");
        }

        if self.worker_count == 0 {
            anyhow::bail!("worker_count must be greater than 0");
        }

        if self.requeue_delay.as_secs() == 0 {
            anyhow::bail!("requeue_delay must be greater than 0");
        }

        Ok(())
    }
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

impl Default for Config {
    fn default() -> Self {
        Self::new(
            uuid::Uuid::new_v4().to_string(),
            "http://localhost:8001".to_string(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| vars.get(name).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.resync_interval, Duration::from_secs(300));
        assert_eq!(config.worker_count, 4);
        assert_eq!(config.kill_grace_period, Duration::from_secs(5));
        assert_eq!(config.requeue_delay, Duration::from_secs(10));
        assert!(config.jenkins_url.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_lookup() {
        let config = Config::from_lookup(lookup(&[
            ("CONTROL_PLANE_URL", "https://cp.local"),
            ("CONTROLLER_ID", "ctrl-1"),
            ("JENKINS_URL", "http://jenkins.local"),
            ("JENKINS_USER", "admin"),
            ("JENKINS_TOKEN", "secret"),
            ("WORKER_COUNT", "8"),
            ("KILL_GRACE_PERIOD", "2"),
            ("RESYNC_INTERVAL", "not-a-number"),
        ]))
        .unwrap();

        assert_eq!(config.controller_id, "ctrl-1");
        assert_eq!(config.jenkins_url.as_deref(), Some("http://jenkins.local"));
        assert_eq!(config.worker_count, 8);
        assert_eq!(config.kill_grace_period, Duration::from_secs(2));
        assert_eq!(config.resync_interval, Duration::from_secs(300));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_control_plane_url_required() {
        assert!(Config::from_lookup(lookup(&[])).is_err());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.control_plane_url = "not-a-url".to_string();
        assert!(config.validate().is_err());
        config.control_plane_url = "http://localhost:8001".to_string();

        config.jenkins_user = Some("admin".to_string());
        assert!(config.validate().is_err());
        config.jenkins_token = Some("secret".to_string());
        assert!(config.validate().is_ok());

        config.worker_count = 0;
        assert!(config.validate().is_err());
    }
}
