//! Secrets mount self-test
//!
//! Declares a parameter, a namespace and a service account whose role can
//! read exactly that parameter. A pod mounting the parameter through the
//! secrets driver proves the identity chain end to end. Only composed on
//! request, never as part of the default stack.

use crate::addons::secrets;
use crate::cluster::{self, ClusterHandle};
use crate::identity::{apply_service_account, attach_policy, workload_identity};
use stack_api::iam::PolicyStatement;
use stack_api::manifest::namespace;
use stack_api::ssm::ParameterSpec;
use stack_api::{ResourceKind, ServiceAccountRef};
use stack_core::{Result, StackConfig, StackPlan};
use tracing::info;

pub const UNIT: &str = "verification";

pub const TEST_PARAMETER: &str = "/nginx-test-parameter";
pub const TEST_NAMESPACE: &str = "secret";

/// Declare the self-test. The secrets add-on must already be in the plan.
pub fn provision(
    plan: &mut StackPlan,
    config: &StackConfig,
    cluster: &ClusterHandle,
) -> Result<()> {
    plan.begin_unit(UNIT, &[cluster::UNIT, secrets::UNIT])?;

    let parameter = ParameterSpec::string(TEST_PARAMETER, "test");
    let parameter_arn = parameter.arn(&config.partition, &config.region, &config.account_id);
    let parameter_id =
        plan.add_resource(UNIT, "NginxTestParameter", ResourceKind::Parameter(parameter), &[])?;

    let account = ServiceAccountRef::new(TEST_NAMESPACE, "nginx-deployment-sa");
    let identity = workload_identity(
        plan,
        UNIT,
        config,
        cluster,
        "NginxTestRole",
        &format!("nginx-test-role-{}", config.environment),
        account,
        &[],
    )?;
    attach_policy(
        plan,
        UNIT,
        &identity,
        "NginxTestPolicy",
        &format!("nginx-test-policy-{}", config.environment),
        vec![PolicyStatement::allow(
            [
                "ssm:GetParameters",
                "secretsmanager:GetSecretValue",
                "secretsmanager:DescribeSecret",
            ],
            [parameter_arn],
        )],
        &[&parameter_id],
    )?;

    plan.add_workload(UNIT, "namespace", namespace(TEST_NAMESPACE), &[])?;
    apply_service_account(plan, UNIT, "service-account", &identity, &["namespace"])?;

    info!(parameter = TEST_PARAMETER, "Secrets self-test declared");
    Ok(())
}
