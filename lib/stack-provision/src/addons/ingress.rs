//! Ingress: certificate manager and the load balancer controller

use super::Addon;
use crate::cluster::ClusterHandle;
use crate::identity::{attach_policy, workload_identity};
use serde_json::json;
use stack_api::iam::{PolicyDocument, ROLE_ARN_ANNOTATION};
use stack_api::{ChartInstallation, ServiceAccountRef};
use stack_core::{bind_identity, Result, StackConfig, StackError, StackPlan};
use tracing::{debug, info};

const UNIT: &str = "ingress";
const CONTROLLER: &str = "aws-load-balancer-controller";
const CERT_MANAGER: &str = "cert-manager";

/// Controller permission set as published by the controller project
const BUNDLED_POLICY: &str = include_str!("../../policies/alb-controller-iam-policy.json");

pub struct IngressAddon;

impl Addon for IngressAddon {
    fn name(&self) -> &'static str {
        UNIT
    }

    fn enabled(&self, config: &StackConfig) -> bool {
        config.addons.ingress.enabled
    }

    fn provision(
        &self,
        plan: &mut StackPlan,
        config: &StackConfig,
        cluster: &ClusterHandle,
    ) -> Result<()> {
        let env = &config.environment;
        let account = ServiceAccountRef::new("kube-system", CONTROLLER);

        let identity = workload_identity(
            plan,
            UNIT,
            config,
            cluster,
            "AlbControllerRole",
            &format!("alb-controller-role-{}", env),
            account.clone(),
            &[],
        )?;

        let document = controller_policy(config)?;
        attach_policy(
            plan,
            UNIT,
            &identity,
            "AlbControllerPolicy",
            &format!("alb-controller-policy-{}", env),
            document.statement,
            &[],
        )?;

        // Webhook certificates for the controller come from cert-manager
        let cert_manager = ChartInstallation::new(
            CERT_MANAGER,
            "https://charts.jetstack.io",
            &config.addons.ingress.cert_manager_version,
            CERT_MANAGER,
        )
        .create_namespace()
        .values(json!({ "installCRDs": true }))?;
        plan.add_workload(UNIT, CERT_MANAGER, cert_manager, &[])?;

        let mut controller = controller_chart(config, &cluster.name, account, &identity.role_arn)?;
        bind_identity(&mut controller, &identity)?;
        plan.add_workload(UNIT, CONTROLLER, controller, &[CERT_MANAGER])?;

        info!(role = %identity.role_name, "Ingress add-on declared");
        Ok(())
    }
}

/// The controller chart, creating its own annotated service account
fn controller_chart(
    config: &StackConfig,
    cluster_name: &str,
    account: ServiceAccountRef,
    role_arn: &str,
) -> Result<ChartInstallation> {
    let chart = ChartInstallation::new(
        CONTROLLER,
        "https://aws.github.io/eks-charts",
        &config.addons.ingress.controller_version,
        &account.namespace,
    )
    .values(json!({
        "clusterName": cluster_name,
        "region": config.region,
        "serviceAccount": {
            "create": true,
            "name": account.name,
            "annotations": { ROLE_ARN_ANNOTATION: role_arn },
        },
    }))?
    .runs_as(account);
    Ok(chart)
}

/// Load the controller policy, from the configured file or the bundled copy
fn controller_policy(config: &StackConfig) -> Result<PolicyDocument> {
    let (name, contents) = match &config.addons.ingress.policy_file {
        Some(path) => {
            debug!("Reading load balancer controller policy from {}", path.display());
            (path.display().to_string(), std::fs::read_to_string(path)?)
        }
        None => ("bundled".to_string(), BUNDLED_POLICY.to_string()),
    };

    PolicyDocument::from_json(&contents)
        .map_err(|source| StackError::InvalidPolicyDocument { name, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose;
    use stack_api::iam::TrustCondition;
    use stack_api::WorkloadIdentity;

    fn config() -> StackConfig {
        StackConfig {
            account_id: "123456789012".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_bundled_policy_parses() {
        let document = controller_policy(&config()).unwrap();
        assert!(document.actions().any(|a| a == "elasticloadbalancing:CreateLoadBalancer"));
        assert!(document.actions().any(|a| a == "iam:CreateServiceLinkedRole"));
    }

    #[test]
    fn test_missing_policy_file_is_an_error() {
        let mut config = config();
        config.addons.ingress.policy_file = Some("/nonexistent/alb-policy.json".into());
        assert!(matches!(controller_policy(&config), Err(StackError::Io(_))));
    }

    fn policy_file(name: &str, contents: &str) -> std::path::PathBuf {
        let file = format!("eks-stack-{}-{}.json", name, std::process::id());
        let path = std::env::temp_dir().join(file);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_policy_file_is_rendered_with_the_same_meaning() {
        let mut config = config();
        config.addons.ingress.policy_file = Some(policy_file(
            "not-resource",
            r#"{"Version": "2012-10-17", "Statement": [
                {"Effect": "Allow", "Action": "ec2:Describe*", "Resource": "*"},
                {"Sid": "DenyOutside", "Effect": "Deny", "Action": "ec2:*",
                 "NotResource": "arn:aws:ec2:*:*:vpc/vpc-1"}
            ]}"#,
        ));
        let plan = compose(&config).unwrap();

        let template = stack_core::render::render_template(&plan).unwrap();
        let properties = &template["Resources"]["AlbControllerPolicy"]["Properties"];
        let statements = &properties["PolicyDocument"]["Statement"];
        assert_eq!(
            statements[1],
            json!({
                "Sid": "DenyOutside",
                "Effect": "Deny",
                "Action": ["ec2:*"],
                "NotResource": ["arn:aws:ec2:*:*:vpc/vpc-1"],
            })
        );
    }

    #[test]
    fn test_policy_file_with_unsupported_keys_is_rejected() {
        let mut config = config();
        config.addons.ingress.policy_file = Some(policy_file(
            "principal",
            r#"{"Statement": [{"Effect": "Allow", "Action": "ec2:*", "Resource": "*",
                "NotPrincipal": {"AWS": "arn:aws:iam::123456789012:root"}}]}"#,
        ));

        let err = compose(&config).unwrap_err();
        assert!(matches!(err, StackError::InvalidPolicyDocument { .. }));
        assert!(err.to_string().contains("eks-stack-principal"));
    }

    #[test]
    fn test_trust_subject_matches_controller_service_account() {
        let plan = compose(&config()).unwrap();
        let unit = plan.unit(UNIT).unwrap();
        let chart = unit.workload(CONTROLLER).unwrap().workload.as_chart().unwrap();

        let identity = plan
            .identities()
            .iter()
            .find(|i| Some(&i.role) == chart.identity.as_ref())
            .unwrap();
        assert_eq!(
            identity.trust.subject,
            "system:serviceaccount:kube-system:aws-load-balancer-controller"
        );
        assert_eq!(chart.service_account.as_ref(), Some(&identity.service_account));
        assert_eq!(identity.role_name, "alb-controller-role-dev");
        assert_eq!(
            chart.values["serviceAccount"]["annotations"][ROLE_ARN_ANNOTATION],
            "arn:aws:iam::123456789012:role/alb-controller-role-dev"
        );
    }

    #[test]
    fn test_controller_rejects_identity_for_another_service_account() {
        // The controller must never be bound to a role trusting the EBS CSI
        // controller's service account
        let plan = compose(&config()).unwrap();
        let good = plan
            .identities()
            .iter()
            .find(|i| i.role_name == "alb-controller-role-dev")
            .unwrap();
        let wrong_account = ServiceAccountRef::new("kube-system", "ebs-csi-controller-sa");
        let wrong = WorkloadIdentity {
            service_account: wrong_account.clone(),
            trust: TrustCondition {
                subject: wrong_account.subject(),
                ..good.trust.clone()
            },
            ..good.clone()
        };

        let mut chart = controller_chart(
            &config(),
            "dev-cluster",
            ServiceAccountRef::new("kube-system", CONTROLLER),
            &wrong.role_arn,
        )
        .unwrap();
        let err = bind_identity(&mut chart, &wrong).unwrap_err();
        assert!(matches!(err, StackError::ServiceAccountMismatch { .. }));
        assert!(chart.identity.is_none());
    }

    #[test]
    fn test_controller_waits_for_cert_manager() {
        let plan = compose(&config()).unwrap();
        let unit = plan.unit(UNIT).unwrap();
        assert_eq!(unit.depends_on, vec!["cluster"]);
        assert_eq!(unit.workload(CONTROLLER).unwrap().depends_on, vec![CERT_MANAGER]);

        let cert_manager = unit.workload(CERT_MANAGER).unwrap().workload.as_chart().unwrap();
        assert!(cert_manager.create_namespace);
        assert_eq!(cert_manager.version, "v1.6.1");
    }
}
