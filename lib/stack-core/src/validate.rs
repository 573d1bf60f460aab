//! Whole-plan invariants, checked before a plan is rendered or applied

use crate::{Result, StackError, StackPlan};
use stack_api::cluster::attributes;
use stack_api::iam::ROLE_ARN_ANNOTATION;
use stack_api::network::SubnetTier;
use stack_api::{ChartInstallation, ResourceId, ResourceKind, Token, WorkloadIdentity};
use tracing::debug;

/// Number of NAT gateways a network has, independent of its AZ count
pub const NAT_GATEWAYS: usize = 1;

/// Bind a chart to the identity whose role its workload assumes.
///
/// Fails when the chart runs as a different service account than the one
/// the identity's trust condition names.
pub fn bind_identity(chart: &mut ChartInstallation, identity: &WorkloadIdentity) -> Result<()> {
    match &chart.service_account {
        Some(sa) if *sa == identity.service_account => {
            chart.identity = Some(identity.role.clone());
            Ok(())
        }
        other => Err(StackError::ServiceAccountMismatch {
            role: identity.role_name.clone(),
            expected: identity.service_account.clone(),
            actual: other
                .as_ref()
                .map(|sa| sa.to_string())
                .unwrap_or_else(|| "no service account".to_string()),
            workload: format!("chart {}", chart.release),
        }),
    }
}

/// Check every invariant the provisioning engine will not catch for us
pub fn validate(plan: &StackPlan) -> Result<()> {
    validate_network(plan)?;
    validate_grants(plan)?;
    for identity in plan.identities() {
        validate_identity(plan, identity)?;
    }
    debug!(
        resources = plan.resources().len(),
        identities = plan.identities().len(),
        "Plan validated"
    );
    Ok(())
}

fn validate_network(plan: &StackPlan) -> Result<()> {
    let has_vpc = plan.resources().iter().any(|r| matches!(r.kind, ResourceKind::Vpc(_)));
    if !has_vpc {
        return Ok(());
    }

    let nat_gateways: Vec<_> = plan
        .resources()
        .iter()
        .filter(|r| matches!(r.kind, ResourceKind::NatGateway(_)))
        .collect();
    if nat_gateways.len() != NAT_GATEWAYS {
        return Err(StackError::Invariant(format!(
            "expected {} NAT gateway, found {}",
            NAT_GATEWAYS,
            nat_gateways.len()
        )));
    }

    let nat = Token::Ref(nat_gateways[0].id.clone());
    for resource in plan.resources() {
        if let Some(subnet) = resource.as_subnet() {
            if subnet.tier == SubnetTier::PrivateWithNat && subnet.default_route != nat {
                return Err(StackError::Invariant(format!(
                    "private subnet {} does not route through the NAT gateway",
                    resource.id
                )));
            }
        }
    }
    Ok(())
}

/// Every inline policy is attached to exactly one declared role
fn validate_grants(plan: &StackPlan) -> Result<()> {
    for resource in plan.resources() {
        let Some(policy) = resource.as_policy() else {
            continue;
        };
        let roles: Vec<_> = policy.roles.iter().filter_map(Token::referenced).collect();
        let attached = match roles.as_slice() {
            [role] if policy.roles.len() == 1 => {
                plan.resource(role).and_then(|r| r.as_role()).is_some()
            }
            _ => false,
        };
        if !attached {
            return Err(StackError::Invariant(format!(
                "policy {} must be attached to exactly one declared role",
                resource.id
            )));
        }
    }
    Ok(())
}

fn validate_identity(plan: &StackPlan, identity: &WorkloadIdentity) -> Result<()> {
    let hosts_cluster = plan
        .resource(&identity.cluster)
        .map(|r| r.as_cluster().is_some())
        .unwrap_or(false);
    if !hosts_cluster {
        return Err(StackError::Invariant(format!(
            "identity {} is bound to {}, which is not a cluster",
            identity.role_name, identity.cluster
        )));
    }

    let issuer_mismatch = |issuer_cluster: &ResourceId| StackError::IssuerMismatch {
        role: identity.role_name.clone(),
        cluster: identity.cluster.clone(),
        issuer_cluster: issuer_cluster.clone(),
    };
    if identity.trust.issuer_url.resource != identity.cluster {
        return Err(issuer_mismatch(&identity.trust.issuer_url.resource));
    }

    // The federated principal must be the provider registered for this cluster
    let provider_id = &identity.trust.provider_arn.resource;
    let provider = plan
        .resource(provider_id)
        .and_then(|r| r.as_oidc_provider())
        .ok_or_else(|| {
            StackError::Invariant(format!(
                "identity {} is federated through {}, which is not an OIDC provider",
                identity.role_name, provider_id
            ))
        })?;
    if provider.url != Token::Attr(identity.cluster.attr(attributes::OIDC_ISSUER_URL)) {
        return Err(issuer_mismatch(provider.url.referenced().unwrap_or(provider_id)));
    }

    if identity.trust.subject != identity.service_account.subject() {
        return Err(StackError::ServiceAccountMismatch {
            role: identity.role_name.clone(),
            expected: identity.service_account.clone(),
            actual: identity.trust.subject.clone(),
            workload: "trust condition".to_string(),
        });
    }

    let mut consumers = 0;
    for (unit, planned) in plan.workloads() {
        let (runs_as, bound) = match &planned.workload {
            stack_api::ClusterWorkload::Chart(chart) => (
                chart.service_account.as_ref().map(|sa| sa.to_string()),
                chart.identity.as_ref() == Some(&identity.role),
            ),
            stack_api::ClusterWorkload::Object(object) => (
                object.service_account().map(|sa| sa.to_string()),
                object.annotation(ROLE_ARN_ANNOTATION) == Some(identity.role_arn.as_str()),
            ),
        };
        if !bound {
            continue;
        }

        if runs_as.as_deref() != Some(identity.service_account.to_string().as_str()) {
            return Err(StackError::ServiceAccountMismatch {
                role: identity.role_name.clone(),
                expected: identity.service_account.clone(),
                actual: runs_as.unwrap_or_else(|| "no service account".to_string()),
                workload: format!("{}/{}", unit.name, planned.key),
            });
        }
        consumers += 1;
    }

    if consumers == 0 {
        return Err(StackError::UnboundIdentity {
            role: identity.role_name.clone(),
            service_account: identity.service_account.clone(),
        });
    }
    Ok(())
}
