use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{info, warn};

use crate::observability::MetricsRegistry;
use crate::rules::RuleSet;

use super::loader::{PolicyError, PolicyLoader};

/// Watch the rule source for changes and broadcast new rule sets.
pub struct PolicyWatcher {
    loader: PolicyLoader,
    check_interval: Duration,
    last_version: Option<String>,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl PolicyWatcher {
    /// Create a new policy watcher.
    pub fn new(loader: PolicyLoader, check_interval: Duration) -> Self {
        PolicyWatcher {
            loader,
            check_interval,
            last_version: None,
            metrics: None,
        }
    }

    /// Count reloads and reload failures.
    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Load the initial policy and start watching for changes.
    ///
    /// The initial load must succeed: a gateway running on an empty rule
    /// set would allow everything. Later reload failures keep the previous
    /// rule set in place.
    pub fn start(
        mut self,
    ) -> Result<(watch::Receiver<Arc<RuleSet>>, tokio::task::JoinHandle<()>), PolicyError> {
        let (policy, ruleset) = self.loader.load()?;
        info!(
            version = %policy.version,
            rules = ruleset.len(),
            "Loaded initial policy"
        );
        self.last_version = Some(policy.version);

        let (tx, rx) = watch::channel(Arc::new(ruleset));

        let handle = tokio::spawn(async move {
            let mut interval = interval(self.check_interval);
            // first tick completes immediately
            interval.tick().await;

            loop {
                interval.tick().await;

                let result = self.check_for_updates(&tx);
                match &result {
                    Ok(true) => info!("Policy reloaded successfully"),
                    Ok(false) => {}
                    Err(e) => warn!(error = %e, "Error checking for policy updates"),
                }
                if let (Some(metrics), Ok(true) | Err(_)) = (&self.metrics, &result) {
                    metrics.record_policy_reload(result.is_ok());
                }
            }
        });

        Ok((rx, handle))
    }

    /// Check for policy updates and broadcast if the version changed.
    fn check_for_updates(&mut self, tx: &watch::Sender<Arc<RuleSet>>) -> Result<bool, PolicyError> {
        let policy = self.loader.load_policy()?;

        if self.last_version.as_ref() == Some(&policy.version) {
            return Ok(false);
        }

        let ruleset = RuleSet::from_policy(&policy)?;

        info!(
            previous = ?self.last_version,
            version = %policy.version,
            "Policy version changed"
        );

        self.last_version = Some(policy.version);
        let _ = tx.send(Arc::new(ruleset));

        Ok(true)
    }
}
