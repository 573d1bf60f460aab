//! Workload identities: federated roles bound to one service account

use crate::cluster::ClusterHandle;
use stack_api::iam::{
    AssumeRolePolicy, PolicyDocument, PolicySpec, PolicyStatement, RoleSpec, TrustCondition,
    STS_AUDIENCE,
};
use stack_api::manifest::service_account;
use stack_api::{ResourceId, ResourceKind, ServiceAccountRef, Token, WorkloadIdentity};
use stack_core::{Result, StackConfig, StackPlan};
use tracing::debug;

/// Declare a role trusted by `account` through `cluster`'s OIDC issuer
#[allow(clippy::too_many_arguments)]
pub fn workload_identity(
    plan: &mut StackPlan,
    unit: &str,
    config: &StackConfig,
    cluster: &ClusterHandle,
    id: &str,
    role_name: &str,
    account: ServiceAccountRef,
    managed_policies: &[&str],
) -> Result<WorkloadIdentity> {
    let trust = TrustCondition {
        issuer_url: cluster.oidc_issuer_url(),
        provider_arn: cluster.oidc_provider_arn(),
        audience: STS_AUDIENCE.to_string(),
        subject: account.subject(),
    };

    let role = plan.add_resource(
        unit,
        id,
        ResourceKind::Role(RoleSpec {
            role_name: role_name.to_string(),
            assume_role_policy_document: AssumeRolePolicy::WebIdentity(trust.clone()),
            managed_policy_arns: managed_policies
                .iter()
                .map(|name| config.managed_policy_arn(name))
                .collect(),
        }),
        &[&cluster.id, &cluster.oidc_provider],
    )?;

    let identity = WorkloadIdentity {
        cluster: cluster.id.clone(),
        service_account: account,
        role,
        role_name: role_name.to_string(),
        role_arn: config.role_arn(role_name),
        trust,
    };
    plan.register_identity(identity.clone())?;

    debug!(
        "Identity {} trusts {} on {}",
        identity.role_name, identity.service_account, cluster.name
    );
    Ok(identity)
}

/// Attach an inline policy to an identity's role
pub fn attach_policy(
    plan: &mut StackPlan,
    unit: &str,
    identity: &WorkloadIdentity,
    id: &str,
    policy_name: &str,
    statements: Vec<PolicyStatement>,
    depends_on: &[&ResourceId],
) -> Result<ResourceId> {
    let mut deps = vec![&identity.role];
    deps.extend_from_slice(depends_on);

    plan.add_resource(
        unit,
        id,
        ResourceKind::Policy(PolicySpec {
            policy_name: policy_name.to_string(),
            policy_document: PolicyDocument::new(statements),
            roles: vec![Token::Ref(identity.role.clone())],
        }),
        &deps,
    )
}

/// Schedule the annotated service account object for an identity
pub fn apply_service_account(
    plan: &mut StackPlan,
    unit: &str,
    key: &str,
    identity: &WorkloadIdentity,
    depends_on: &[&str],
) -> Result<()> {
    plan.add_workload(
        unit,
        key,
        service_account(&identity.service_account, &identity.role_arn),
        depends_on,
    )
}
