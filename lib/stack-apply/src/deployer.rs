//! Applying a plan's cluster workloads
//!
//! Units become ready once every unit they depend on has finished; ready
//! units run concurrently. Steps inside a unit run in declaration order. A
//! recoverable failure skips only the steps that depend on it (directly or
//! through a skipped step), and units that depend on a unit with a failed
//! step are skipped entirely. A fatal failure aborts everything still
//! pending.

use crate::target::{ApplyToCluster, ClusterTarget};
use futures::future::join_all;
use stack_core::{StackPlan, UnitPlan};
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info, warn};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    Applied,
    Failed { error: String, fatal: bool },
    Skipped { reason: String },
}

#[derive(Clone, Debug)]
pub struct StepReport {
    pub unit: String,
    pub key: String,
    pub workload: String,
    pub outcome: StepOutcome,
}

impl fmt::Display for StepReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            StepOutcome::Applied => write!(f, "{}/{}: applied {}", self.unit, self.key, self.workload),
            StepOutcome::Failed { error, .. } => {
                write!(f, "{}/{}: failed: {}", self.unit, self.key, error)
            }
            StepOutcome::Skipped { reason } => {
                write!(f, "{}/{}: skipped ({})", self.unit, self.key, reason)
            }
        }
    }
}

/// Outcome of every step, grouped by unit in completion order
#[derive(Clone, Debug, Default)]
pub struct DeployReport {
    pub steps: Vec<StepReport>,
    pub aborted: bool,
}

impl DeployReport {
    pub fn applied(&self) -> impl Iterator<Item = &StepReport> {
        self.steps.iter().filter(|s| s.outcome == StepOutcome::Applied)
    }

    pub fn failed(&self) -> impl Iterator<Item = &StepReport> {
        self.steps
            .iter()
            .filter(|s| matches!(s.outcome, StepOutcome::Failed { .. }))
    }

    pub fn skipped(&self) -> impl Iterator<Item = &StepReport> {
        self.steps
            .iter()
            .filter(|s| matches!(s.outcome, StepOutcome::Skipped { .. }))
    }

    pub fn step(&self, unit: &str, key: &str) -> Option<&StepReport> {
        self.steps.iter().find(|s| s.unit == unit && s.key == key)
    }

    pub fn is_success(&self) -> bool {
        !self.aborted && self.failed().next().is_none() && self.skipped().next().is_none()
    }
}

/// Applies plans to one target
pub struct Deployer<'a> {
    target: &'a dyn ClusterTarget,
    abort: AtomicBool,
}

impl<'a> Deployer<'a> {
    pub fn new(target: &'a dyn ClusterTarget) -> Self {
        Self {
            target,
            abort: AtomicBool::new(false),
        }
    }

    pub async fn deploy(&self, plan: &StackPlan) -> DeployReport {
        info!(
            target = self.target.name(),
            environment = plan.environment(),
            "Applying cluster workloads"
        );

        let mut report = DeployReport::default();
        let mut finished: HashSet<&str> = HashSet::new();
        let mut broken: HashSet<&str> = HashSet::new();
        let mut pending: Vec<&UnitPlan> = plan.units().iter().collect();

        while !pending.is_empty() {
            let (ready, waiting): (Vec<&UnitPlan>, Vec<&UnitPlan>) = pending
                .into_iter()
                .partition(|u| u.depends_on.iter().all(|d| finished.contains(d.as_str())));
            pending = waiting;

            // Registry ordering guarantees progress; guard anyway
            if ready.is_empty() {
                for unit in &pending {
                    report.steps.extend(skip_all(unit, "unresolvable unit dependency"));
                }
                break;
            }

            let runs = ready.iter().map(|unit| {
                let blocked = unit.depends_on.iter().find(|d| broken.contains(d.as_str()));
                async move {
                    if self.abort.load(Ordering::SeqCst) {
                        return skip_all(unit, "aborted");
                    }
                    match blocked {
                        Some(dep) => skip_all(unit, &format!("unit {} did not complete", dep)),
                        None => self.apply_unit(unit).await,
                    }
                }
            });
            let results = join_all(runs).await;

            for (unit, steps) in ready.iter().zip(results) {
                if steps.iter().any(|s| s.outcome != StepOutcome::Applied) {
                    broken.insert(unit.name.as_str());
                }
                finished.insert(unit.name.as_str());
                report.steps.extend(steps);
            }
        }

        report.aborted = self.abort.load(Ordering::SeqCst);
        info!(
            applied = report.applied().count(),
            failed = report.failed().count(),
            skipped = report.skipped().count(),
            aborted = report.aborted,
            "Cluster workloads applied"
        );
        report
    }

    async fn apply_unit(&self, unit: &UnitPlan) -> Vec<StepReport> {
        let mut steps = Vec::with_capacity(unit.workloads.len());
        let mut unusable: HashSet<&str> = HashSet::new();

        for planned in &unit.workloads {
            let outcome = if self.abort.load(Ordering::SeqCst) {
                StepOutcome::Skipped {
                    reason: "aborted".to_string(),
                }
            } else if let Some(dep) = planned
                .depends_on
                .iter()
                .find(|d| unusable.contains(d.as_str()))
            {
                StepOutcome::Skipped {
                    reason: format!("dependency {} not applied", dep),
                }
            } else {
                match planned.workload.apply_to(self.target).await {
                    Ok(()) => StepOutcome::Applied,
                    Err(e) if e.is_fatal() => {
                        error!(
                            unit = %unit.name,
                            step = %planned.key,
                            "Fatal error, aborting: {}", e
                        );
                        self.abort.store(true, Ordering::SeqCst);
                        StepOutcome::Failed {
                            error: e.to_string(),
                            fatal: true,
                        }
                    }
                    Err(e) => {
                        warn!(unit = %unit.name, step = %planned.key, "Step failed: {}", e);
                        StepOutcome::Failed {
                            error: e.to_string(),
                            fatal: false,
                        }
                    }
                }
            };

            if outcome != StepOutcome::Applied {
                unusable.insert(planned.key.as_str());
            }
            steps.push(StepReport {
                unit: unit.name.clone(),
                key: planned.key.clone(),
                workload: planned.workload.to_string(),
                outcome,
            });
        }
        steps
    }
}

fn skip_all(unit: &UnitPlan, reason: &str) -> Vec<StepReport> {
    unit.workloads
        .iter()
        .map(|planned| StepReport {
            unit: unit.name.clone(),
            key: planned.key.clone(),
            workload: planned.workload.to_string(),
            outcome: StepOutcome::Skipped {
                reason: reason.to_string(),
            },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ApplyError, DryRunTarget, Result};
    use kube::core::ErrorResponse;
    use stack_api::{ChartInstallation, ClusterObject};
    use stack_core::StackConfig;
    use stack_provision::{compose, compose_with_self_test};
    use std::sync::Mutex;

    /// Fails one named release or object, records everything else
    struct FailingTarget {
        fails: &'static str,
        status: u16,
        applied: Mutex<Vec<String>>,
    }

    impl FailingTarget {
        fn new(fails: &'static str, status: u16) -> Self {
            Self {
                fails,
                status,
                applied: Mutex::new(Vec::new()),
            }
        }

        fn outcome(&self, name: &str, label: String) -> Result<()> {
            if name == self.fails {
                return Err(ApplyError::Kubernetes {
                    object: label,
                    source: kube::Error::Api(ErrorResponse {
                        status: "Failure".to_string(),
                        message: "rejected".to_string(),
                        reason: "Test".to_string(),
                        code: self.status,
                    }),
                });
            }
            self.applied.lock().unwrap().push(label);
            Ok(())
        }
    }

    #[async_trait::async_trait]
    impl ClusterTarget for FailingTarget {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn apply_object(&self, object: &ClusterObject) -> Result<()> {
            self.outcome(object.name(), object.to_string())
        }

        async fn install_chart(&self, chart: &ChartInstallation) -> Result<()> {
            self.outcome(&chart.release, chart.release.clone())
        }
    }

    /// Records the order steps finish in; the metrics stack waits like
    /// `helm --wait` does for its CRDs
    struct SlowMetricsTarget {
        finished: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl ClusterTarget for SlowMetricsTarget {
        fn name(&self) -> &'static str {
            "slow-metrics"
        }

        async fn apply_object(&self, object: &ClusterObject) -> Result<()> {
            self.finished.lock().unwrap().push(object.name().to_string());
            Ok(())
        }

        async fn install_chart(&self, chart: &ChartInstallation) -> Result<()> {
            if chart.release == "kube-prometheus-stack" {
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            }
            self.finished.lock().unwrap().push(chart.release.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_autoscaler_waits_for_metrics_stack() {
        let plan = compose(&StackConfig::default()).unwrap();
        let target = SlowMetricsTarget {
            finished: Mutex::new(Vec::new()),
        };
        let report = Deployer::new(&target).deploy(&plan).await;
        assert!(report.is_success());

        let finished = target.finished.lock().unwrap();
        let position = |name: &str| finished.iter().position(|n| n == name).unwrap();
        assert!(position("kube-prometheus-stack") < position("cluster-autoscaler"));
    }

    #[tokio::test]
    async fn test_autoscaler_skipped_when_metrics_stack_fails() {
        let plan = compose(&StackConfig::default()).unwrap();
        let target = FailingTarget::new("kube-prometheus-stack", 500);
        let report = Deployer::new(&target).deploy(&plan).await;

        assert_eq!(
            report.step("autoscaler", "cluster-autoscaler").unwrap().outcome,
            StepOutcome::Skipped {
                reason: "unit observability did not complete".to_string()
            }
        );
        assert!(report
            .steps
            .iter()
            .filter(|s| s.unit == "secrets")
            .all(|s| s.outcome == StepOutcome::Applied));
    }

    #[tokio::test]
    async fn test_dry_run_applies_everything() {
        let plan = compose(&StackConfig::default()).unwrap();
        let target = DryRunTarget::new();
        let report = Deployer::new(&target).deploy(&plan).await;

        let expected: usize = plan.units().iter().map(|u| u.workloads.len()).sum();
        assert!(report.is_success());
        assert_eq!(report.applied().count(), expected);
        assert_eq!(target.applied().len(), expected);
    }

    #[tokio::test]
    async fn test_recoverable_failure_is_isolated() {
        let plan = compose(&StackConfig::default()).unwrap();
        let target = FailingTarget::new("cert-manager", 500);
        let report = Deployer::new(&target).deploy(&plan).await;

        assert!(!report.aborted);
        assert!(matches!(
            report.step("ingress", "cert-manager").unwrap().outcome,
            StepOutcome::Failed { fatal: false, .. }
        ));
        assert!(matches!(
            report.step("ingress", "aws-load-balancer-controller").unwrap().outcome,
            StepOutcome::Skipped { .. }
        ));
        for unit in ["observability", "secrets", "autoscaler"] {
            assert!(report
                .steps
                .iter()
                .filter(|s| s.unit == unit)
                .all(|s| s.outcome == StepOutcome::Applied));
        }
    }

    #[tokio::test]
    async fn test_independent_chart_failure_does_not_block_siblings() {
        let plan = compose(&StackConfig::default()).unwrap();
        let target = FailingTarget::new("aws-cloudwatch-metrics", 500);
        let report = Deployer::new(&target).deploy(&plan).await;

        assert_eq!(report.failed().count(), 1);
        for key in ["aws-for-fluent-bit", "kube-prometheus-stack"] {
            assert_eq!(report.step("observability", key).unwrap().outcome, StepOutcome::Applied);
        }
        // Only the unit waiting on the metrics stack is held back
        assert!(report.skipped().all(|s| s.unit == "autoscaler"));
        assert!(report
            .steps
            .iter()
            .filter(|s| s.unit == "ingress" || s.unit == "secrets")
            .all(|s| s.outcome == StepOutcome::Applied));
    }

    #[tokio::test]
    async fn test_fatal_failure_aborts_all_units() {
        let plan = compose(&StackConfig::default()).unwrap();
        let target = FailingTarget::new("cert-manager", 403);
        let report = Deployer::new(&target).deploy(&plan).await;

        assert!(report.aborted);
        assert!(!report.is_success());
        assert_eq!(report.failed().count(), 1);
        assert_eq!(report.applied().count(), 0);
        assert!(report
            .skipped()
            .all(|s| s.outcome == StepOutcome::Skipped { reason: "aborted".to_string() }));
    }

    #[tokio::test]
    async fn test_self_test_waits_for_secrets_unit() {
        let plan = compose_with_self_test(&StackConfig::default()).unwrap();
        let target = FailingTarget::new("secrets-store-csi-driver", 500);
        let report = Deployer::new(&target).deploy(&plan).await;

        let verification: Vec<_> = report.steps.iter().filter(|s| s.unit == "verification").collect();
        assert_eq!(verification.len(), 2);
        assert!(verification.iter().all(|s| s.outcome
            == StepOutcome::Skipped {
                reason: "unit secrets did not complete".to_string()
            }));
    }
}
