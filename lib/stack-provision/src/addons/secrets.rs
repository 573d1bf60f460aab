//! Secrets: the CSI secrets store driver and its cloud provider plugin

use super::Addon;
use crate::cluster::ClusterHandle;
use crate::identity::{apply_service_account, attach_policy, workload_identity};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, PolicyRule, RoleRef, Subject};
use serde_json::json;
use stack_api::iam::PolicyStatement;
use stack_api::manifest::object_meta;
use stack_api::{ChartInstallation, ClusterObject, ServiceAccountRef};
use stack_core::{bind_identity, Result, StackConfig, StackPlan};
use tracing::info;

pub(crate) const UNIT: &str = "secrets";
const CLUSTER_ROLE: &str = "secretproviderclasses-role";
const CLUSTER_ROLE_BINDING: &str = "secretproviderclasses-rolebinding";
const SECRETS_STORE_GROUP: &str = "secrets-store.csi.x-k8s.io";

pub struct SecretsAddon;

impl Addon for SecretsAddon {
    fn name(&self) -> &'static str {
        UNIT
    }

    fn enabled(&self, config: &StackConfig) -> bool {
        config.addons.secrets.enabled
    }

    fn provision(
        &self,
        plan: &mut StackPlan,
        config: &StackConfig,
        cluster: &ClusterHandle,
    ) -> Result<()> {
        let settings = &config.addons.secrets;
        let account = ServiceAccountRef::new("kube-system", "secrets-store-csi-driver");

        let identity = workload_identity(
            plan,
            UNIT,
            config,
            cluster,
            "CsiSecretsRole",
            &format!("csi-secrets-role-{}", config.environment),
            account.clone(),
            &[],
        )?;

        // Read access scoped to this account and region
        let parameters = format!(
            "arn:{}:ssm:{}:{}:parameter/*",
            config.partition, config.region, config.account_id
        );
        let secrets = format!(
            "arn:{}:secretsmanager:{}:{}:secret:*",
            config.partition, config.region, config.account_id
        );
        attach_policy(
            plan,
            UNIT,
            &identity,
            "CsiSecretsPolicy",
            &format!("csi-secrets-policy-{}", config.environment),
            vec![
                PolicyStatement::allow(["ssm:GetParameters", "ssm:GetParameter"], [parameters]),
                PolicyStatement::allow(
                    ["secretsmanager:GetSecretValue", "secretsmanager:DescribeSecret"],
                    [secrets],
                ),
            ],
            &[],
        )?;

        apply_service_account(plan, UNIT, "service-account", &identity, &[])?;
        plan.add_workload(UNIT, "cluster-role", cluster_role(), &[])?;
        plan.add_workload(
            UNIT,
            "cluster-role-binding",
            cluster_role_binding(&account),
            &["cluster-role", "service-account"],
        )?;

        let mut driver = ChartInstallation::new(
            "secrets-store-csi-driver",
            "https://kubernetes-sigs.github.io/secrets-store-csi-driver/charts",
            &settings.driver_version,
            &account.namespace,
        )
        .values(json!({
            "rbac": { "install": false },
            "syncSecret": { "enabled": true },
        }))?
        .runs_as(account.clone());
        bind_identity(&mut driver, &identity)?;
        plan.add_workload(UNIT, "secrets-store-csi-driver", driver, &["cluster-role-binding"])?;

        let mut provider = ChartInstallation::new(
            "csi-secrets-store-provider-aws",
            "https://aws.github.io/eks-charts",
            &settings.provider_version,
            &account.namespace,
        )
        .values(json!({
            "clusterName": cluster.name,
            "rbac": {
                "install": false,
                "serviceAccount": { "name": account.name },
            },
        }))?
        .runs_as(account);
        bind_identity(&mut provider, &identity)?;
        plan.add_workload(
            UNIT,
            "csi-secrets-store-provider-aws",
            provider,
            &["secrets-store-csi-driver"],
        )?;

        info!(role = %identity.role_name, "Secrets add-on declared");
        Ok(())
    }
}

fn rule(api_group: &str, resources: &[&str], verbs: &[&str]) -> PolicyRule {
    PolicyRule {
        api_groups: Some(vec![api_group.to_string()]),
        resources: Some(resources.iter().map(|r| r.to_string()).collect()),
        verbs: verbs.iter().map(|v| v.to_string()).collect(),
        ..Default::default()
    }
}

/// Permissions the driver needs when the chart does not install its own RBAC
fn cluster_role() -> ClusterObject {
    ClusterObject::ClusterRole(ClusterRole {
        metadata: object_meta(CLUSTER_ROLE, None),
        rules: Some(vec![
            rule("", &["events"], &["create", "patch"]),
            rule("", &["pods", "nodes", "serviceaccounts"], &["get", "list", "watch"]),
            rule("", &["serviceaccounts/token"], &["create"]),
            rule(SECRETS_STORE_GROUP, &["secretproviderclasses"], &["get", "list", "watch"]),
            rule(
                SECRETS_STORE_GROUP,
                &["secretproviderclasspodstatuses"],
                &["create", "delete", "get", "list", "patch", "update", "watch"],
            ),
            rule(
                SECRETS_STORE_GROUP,
                &["secretproviderclasspodstatuses/status"],
                &["get", "patch", "update"],
            ),
        ]),
        ..Default::default()
    })
}

fn cluster_role_binding(account: &ServiceAccountRef) -> ClusterObject {
    ClusterObject::ClusterRoleBinding(ClusterRoleBinding {
        metadata: object_meta(CLUSTER_ROLE_BINDING, None),
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "ClusterRole".to_string(),
            name: CLUSTER_ROLE.to_string(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: account.name.clone(),
            namespace: Some(account.namespace.clone()),
            ..Default::default()
        }]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose;

    fn plan() -> StackPlan {
        compose(&StackConfig {
            account_id: "123456789012".to_string(),
            region: "eu-west-1".to_string(),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_grant_is_scoped_to_account_and_region() {
        let plan = plan();
        let identity = plan
            .identities()
            .iter()
            .find(|i| i.service_account.name == "secrets-store-csi-driver")
            .unwrap();

        let policies: Vec<_> = plan.policies_for(&identity.role).collect();
        let document = &policies[0].as_policy().unwrap().policy_document;
        assert!(document.statement.iter().all(|s| !s.has_wildcard_resource()));
        assert_eq!(
            document.statement[0].resources[0].as_literal(),
            Some("arn:aws:ssm:eu-west-1:123456789012:parameter/*")
        );
        assert_eq!(
            document.statement[1].resources[0].as_literal(),
            Some("arn:aws:secretsmanager:eu-west-1:123456789012:secret:*")
        );
    }

    #[test]
    fn test_rbac_objects_before_charts() {
        let plan = plan();
        let unit = plan.unit(UNIT).unwrap();
        let keys: Vec<&str> = unit.workloads.iter().map(|w| w.key.as_str()).collect();
        assert_eq!(
            keys,
            vec![
                "service-account",
                "cluster-role",
                "cluster-role-binding",
                "secrets-store-csi-driver",
                "csi-secrets-store-provider-aws",
            ]
        );
        assert_eq!(
            unit.workload("secrets-store-csi-driver").unwrap().depends_on,
            vec!["cluster-role-binding"]
        );
    }

    #[test]
    fn test_cluster_role_rules() {
        let role = match cluster_role() {
            ClusterObject::ClusterRole(role) => role,
            other => panic!("unexpected {}", other),
        };
        let rules = role.rules.unwrap();
        assert_eq!(rules.len(), 6);
        assert_eq!(rules[2].resources, Some(vec!["serviceaccounts/token".to_string()]));
        assert_eq!(rules[4].verbs.len(), 7);
    }

    #[test]
    fn test_binding_targets_driver_service_account() {
        let account = ServiceAccountRef::new("kube-system", "secrets-store-csi-driver");
        let binding = match cluster_role_binding(&account) {
            ClusterObject::ClusterRoleBinding(binding) => binding,
            other => panic!("unexpected {}", other),
        };
        assert_eq!(binding.role_ref.name, CLUSTER_ROLE);
        let subject = &binding.subjects.unwrap()[0];
        assert_eq!(subject.name, "secrets-store-csi-driver");
        assert_eq!(subject.namespace.as_deref(), Some("kube-system"));
    }

    #[test]
    fn test_provider_reuses_driver_service_account() {
        let plan = plan();
        let provider = plan
            .unit(UNIT)
            .unwrap()
            .workload("csi-secrets-store-provider-aws")
            .unwrap()
            .workload
            .as_chart()
            .unwrap();
        assert_eq!(provider.values["rbac"]["serviceAccount"]["name"], "secrets-store-csi-driver");
        assert_eq!(provider.values["clusterName"], "dev-cluster");
        assert!(provider.identity.is_some());
    }
}
