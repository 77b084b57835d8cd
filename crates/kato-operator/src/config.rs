//! Operator configuration

use crate::backoff;
use crate::resources::LabelPredicate;
use std::time::Duration;

/// Tunable parameters of a running operator
#[derive(Debug, Clone)]
pub struct Config {
    /// Namespace the operator watches and writes resources in
    pub namespace: String,
    /// Label pairs identifying resources this operator owns
    pub labels: Vec<(String, String)>,
    /// Interval between full three-way reconciliations of everything
    pub full_reconcile_interval: Duration,
    /// Delay of the second metadata retry after a topic creation;
    /// doubles per attempt
    pub metadata_backoff_delay: Duration,
    /// Metadata retry ceiling
    pub metadata_max_attempts: u32,
    /// How long shutdown waits for in-flight operations to finish
    pub shutdown_timeout: Duration,
}

impl Config {
    /// The ownership filter built from the configured labels
    pub fn predicate(&self) -> LabelPredicate {
        LabelPredicate::new(
            self.labels
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            labels: vec![
                ("app".to_string(), "kato".to_string()),
                ("kato.dev/kind".to_string(), "topic".to_string()),
            ],
            full_reconcile_interval: Duration::from_secs(900),
            metadata_backoff_delay: backoff::DEFAULT_INITIAL_DELAY,
            metadata_max_attempts: backoff::DEFAULT_MAX_ATTEMPTS,
            shutdown_timeout: Duration::from_secs(60),
        }
    }
}
