//! Node autoscaling for the default node group

use super::observability::{self, METRICS_NAMESPACE};
use super::Addon;
use crate::cluster::ClusterHandle;
use crate::identity::{apply_service_account, attach_policy, workload_identity};
use serde_json::json;
use stack_api::iam::PolicyStatement;
use stack_api::{ChartInstallation, ServiceAccountRef};
use stack_core::{bind_identity, Result, StackConfig, StackPlan};
use tracing::info;

const UNIT: &str = "autoscaler";

pub struct AutoscalerAddon;

impl Addon for AutoscalerAddon {
    fn name(&self) -> &'static str {
        UNIT
    }

    fn enabled(&self, config: &StackConfig) -> bool {
        config.addons.autoscaler.enabled
    }

    // The ServiceMonitor CRD is installed by the metrics stack
    fn depends_on(&self, config: &StackConfig) -> Vec<&'static str> {
        if scrapes_metrics(config) {
            vec![observability::UNIT]
        } else {
            Vec::new()
        }
    }

    fn provision(
        &self,
        plan: &mut StackPlan,
        config: &StackConfig,
        cluster: &ClusterHandle,
    ) -> Result<()> {
        let settings = &config.addons.autoscaler;
        let account = ServiceAccountRef::new("kube-system", "cluster-autoscaler");

        let identity = workload_identity(
            plan,
            UNIT,
            config,
            cluster,
            "ClusterAutoscalerRole",
            &format!("cluster-autoscaler-role-{}", config.environment),
            account.clone(),
            &[],
        )?;
        attach_policy(
            plan,
            UNIT,
            &identity,
            "ClusterAutoscalerPolicy",
            &format!("cluster-autoscaler-policy-{}", config.environment),
            autoscaler_statements(&cluster.name),
            &[],
        )?;
        apply_service_account(plan, UNIT, "service-account", &identity, &[])?;

        let scrape = scrapes_metrics(config);

        let mut chart = ChartInstallation::new(
            "cluster-autoscaler",
            "https://kubernetes.github.io/autoscaler",
            &settings.chart_version,
            &account.namespace,
        )
        .values(json!({
            "autoDiscovery": { "clusterName": cluster.name },
            "awsRegion": config.region,
            "rbac": {
                "create": true,
                "serviceAccount": { "create": false, "name": account.name },
            },
            "replicaCount": settings.replicas,
            "serviceMonitor": { "enabled": scrape, "namespace": METRICS_NAMESPACE },
        }))?
        .runs_as(account);
        bind_identity(&mut chart, &identity)?;
        plan.add_workload(UNIT, "cluster-autoscaler", chart, &["service-account"])?;

        info!(
            role = %identity.role_name,
            replicas = settings.replicas,
            "Autoscaler add-on declared"
        );
        Ok(())
    }
}

fn scrapes_metrics(config: &StackConfig) -> bool {
    config.addons.observability.enabled
}

/// Read-only discovery everywhere, scaling only on groups the cluster owns
fn autoscaler_statements(cluster_name: &str) -> Vec<PolicyStatement> {
    vec![
        PolicyStatement::allow(
            [
                "autoscaling:DescribeAutoScalingGroups",
                "autoscaling:DescribeAutoScalingInstances",
                "autoscaling:DescribeLaunchConfigurations",
                "autoscaling:DescribeTags",
                "ec2:DescribeLaunchTemplateVersions",
            ],
            ["*"],
        ),
        PolicyStatement::allow(
            [
                "autoscaling:SetDesiredCapacity",
                "autoscaling:TerminateInstanceInAutoScalingGroup",
            ],
            ["*"],
        )
        .with_condition(
            "StringEquals",
            format!("aws:ResourceTag/k8s.io/cluster-autoscaler/{}", cluster_name),
            "owned",
        ),
    ]
}
