//! Observability: log shipping, in-cluster metrics and the CloudWatch agent

use super::Addon;
use crate::cluster::ClusterHandle;
use crate::identity::{apply_service_account, attach_policy, workload_identity};
use serde_json::json;
use stack_api::iam::PolicyStatement;
use stack_api::{ChartInstallation, ServiceAccountRef};
use stack_core::{bind_identity, Result, StackConfig, StackPlan};
use tracing::info;

pub(crate) const UNIT: &str = "observability";
const EKS_CHARTS: &str = "https://aws.github.io/eks-charts";
const SERVICE_ACCOUNT: &str = "service-account";
const FLUENT_BIT_IMAGE: &str = "public.ecr.aws/aws-observability/aws-for-fluent-bit";
const CLOUDWATCH_AGENT_IMAGE: &str = "public.ecr.aws/cloudwatch-agent/cloudwatch-agent";

/// Namespace the metrics stack is installed into. Other add-ons register
/// scrape targets here.
pub const METRICS_NAMESPACE: &str = "prometheus";

pub struct ObservabilityAddon;

impl Addon for ObservabilityAddon {
    fn name(&self) -> &'static str {
        UNIT
    }

    fn enabled(&self, config: &StackConfig) -> bool {
        config.addons.observability.enabled
    }

    fn provision(
        &self,
        plan: &mut StackPlan,
        config: &StackConfig,
        cluster: &ClusterHandle,
    ) -> Result<()> {
        let settings = &config.addons.observability;
        let account = ServiceAccountRef::new("kube-system", "aws-for-fluent-bit");

        let identity = workload_identity(
            plan,
            UNIT,
            config,
            cluster,
            "LoggingMetricsRole",
            &format!("logging-metrics-role-{}", config.environment),
            account.clone(),
            &["CloudWatchAgentServerPolicy"],
        )?;
        attach_policy(
            plan,
            UNIT,
            &identity,
            "LoggingMetricsPolicy",
            &format!("logging-metrics-policy-{}", config.environment),
            vec![PolicyStatement::allow(["logs:PutRetentionPolicy"], ["*"])],
            &[],
        )?;

        // Shared by the log shipper and the CloudWatch agent
        apply_service_account(plan, UNIT, SERVICE_ACCOUNT, &identity, &[])?;

        let mut fluent_bit = ChartInstallation::new(
            "aws-for-fluent-bit",
            EKS_CHARTS,
            &settings.fluent_bit_version,
            &account.namespace,
        )
        .values(json!({
            "image": {
                "repository": FLUENT_BIT_IMAGE,
                "tag": settings.fluent_bit_image_tag,
            },
            "serviceAccount": { "create": false, "name": account.name },
            "cloudWatch": {
                "enabled": true,
                "region": config.region,
                "logGroupName": format!("/aws/eks/eks-fluentbit-logs/{}/logs", cluster.name),
            },
            "firehose": { "enabled": false },
            "kinesis": { "enabled": false },
            "elasticsearch": { "enabled": false },
        }))?
        .runs_as(account.clone());
        bind_identity(&mut fluent_bit, &identity)?;
        plan.add_workload(UNIT, "aws-for-fluent-bit", fluent_bit, &[SERVICE_ACCOUNT])?;

        let prometheus = ChartInstallation::new(
            "kube-prometheus-stack",
            "https://prometheus-community.github.io/helm-charts",
            &settings.prometheus_stack_version,
            METRICS_NAMESPACE,
        )
        .create_namespace();
        plan.add_workload(UNIT, "kube-prometheus-stack", prometheus, &[])?;

        let mut cloudwatch = ChartInstallation::new(
            "aws-cloudwatch-metrics",
            EKS_CHARTS,
            &settings.cloudwatch_metrics_version,
            &account.namespace,
        )
        .values(json!({
            "image": { "repository": CLOUDWATCH_AGENT_IMAGE },
            "clusterName": cluster.name,
            "serviceAccount": { "create": false, "name": account.name },
        }))?
        .runs_as(account);
        bind_identity(&mut cloudwatch, &identity)?;
        plan.add_workload(UNIT, "aws-cloudwatch-metrics", cloudwatch, &[SERVICE_ACCOUNT])?;

        info!(role = %identity.role_name, "Observability add-on declared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose;
    use stack_api::iam::ROLE_ARN_ANNOTATION;

    #[test]
    fn test_fluent_bit_ships_to_cluster_log_group() {
        let plan = compose(&StackConfig::default()).unwrap();
        let unit = plan.unit(UNIT).unwrap();
        let chart = unit.workload("aws-for-fluent-bit").unwrap().workload.as_chart().unwrap();

        assert_eq!(chart.values["image"]["repository"], FLUENT_BIT_IMAGE);
        assert_eq!(chart.values["image"]["tag"], "2.21.5");
        assert_eq!(
            chart.values["cloudWatch"]["logGroupName"],
            "/aws/eks/eks-fluentbit-logs/dev-cluster/logs"
        );
        assert_eq!(chart.values["cloudWatch"]["region"], "us-east-1");
        for sink in ["firehose", "kinesis", "elasticsearch"] {
            assert_eq!(chart.values[sink]["enabled"], false);
        }
    }

    #[test]
    fn test_charts_are_independent() {
        let plan = compose(&StackConfig::default()).unwrap();
        let unit = plan.unit(UNIT).unwrap();

        for key in ["aws-for-fluent-bit", "kube-prometheus-stack", "aws-cloudwatch-metrics"] {
            let workload = unit.workload(key).unwrap();
            assert!(workload.depends_on.iter().all(|d| d == SERVICE_ACCOUNT), "{}", key);
        }
        let prometheus = unit.workload("kube-prometheus-stack").unwrap().workload.as_chart().unwrap();
        assert_eq!(prometheus.namespace, METRICS_NAMESPACE);
        assert!(prometheus.create_namespace);
    }

    #[test]
    fn test_role_has_managed_and_inline_grants() {
        let plan = compose(&StackConfig::default()).unwrap();
        let identity = plan
            .identities()
            .iter()
            .find(|i| i.role_name == "logging-metrics-role-dev")
            .unwrap();

        let role = plan.resource(&identity.role).unwrap().as_role().unwrap();
        assert_eq!(
            role.managed_policy_arns,
            vec!["arn:aws:iam::aws:policy/CloudWatchAgentServerPolicy"]
        );

        let inline: Vec<_> = plan.policies_for(&identity.role).collect();
        assert_eq!(inline.len(), 1);
        let actions: Vec<&str> = inline[0].as_policy().unwrap().policy_document.actions().collect();
        assert_eq!(actions, vec!["logs:PutRetentionPolicy"]);

        let sa = plan.unit(UNIT).unwrap().workload(SERVICE_ACCOUNT).unwrap().workload.as_object().unwrap();
        assert_eq!(sa.annotation(ROLE_ARN_ANNOTATION), Some(identity.role_arn.as_str()));
    }
}
