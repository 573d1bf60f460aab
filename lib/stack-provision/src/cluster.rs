//! Cluster provisioner: control plane, masters role and Fargate profile

use crate::network::NetworkOutput;
use stack_api::cluster::{
    attributes, ClusterSpec, DefaultCapacity, FargateProfileSpec, FargateSelector, VpcConfig,
};
use stack_api::iam::{
    AssumeRolePolicy, OidcProviderSpec, PolicyDocument, PolicySpec, PolicyStatement, Principal,
    RoleSpec, STS_AUDIENCE,
};
use stack_api::network::Tag;
use stack_api::{AttrRef, ResourceId, ResourceKind, Token};
use stack_core::{Result, StackConfig, StackPlan};
use tracing::info;

pub const UNIT: &str = "cluster";

/// Read-only view of the cluster that every add-on receives
#[derive(Clone, Debug)]
pub struct ClusterHandle {
    pub id: ResourceId,
    pub name: String,
    pub arn: String,
    pub masters_role: ResourceId,
    pub fargate_profile: ResourceId,
    /// Identity provider for the cluster's service account tokens
    pub oidc_provider: ResourceId,
}

impl ClusterHandle {
    pub fn oidc_issuer_url(&self) -> AttrRef {
        self.id.attr(attributes::OIDC_ISSUER_URL)
    }

    pub fn oidc_provider_arn(&self) -> AttrRef {
        self.oidc_provider.attr(attributes::ARN)
    }
}

fn assume_role(principal: Principal) -> AssumeRolePolicy {
    let statement = PolicyStatement::allow(["sts:AssumeRole"], std::iter::empty::<Token>())
        .with_principal(principal);
    AssumeRolePolicy::Document(PolicyDocument::new(vec![statement]))
}

/// Declare the cluster inside `network`
pub fn provision(
    plan: &mut StackPlan,
    config: &StackConfig,
    network: &NetworkOutput,
) -> Result<ClusterHandle> {
    let env = &config.environment;
    let name = config.cluster_name();
    let arn = config.cluster_arn();

    plan.begin_unit(UNIT, &[crate::network::UNIT])?;

    // Administrative identity, assumable from inside the account only
    let masters_role_name = format!("masters-{}", env);
    let masters_role = plan.add_resource(
        UNIT,
        "MastersRole",
        ResourceKind::Role(RoleSpec {
            role_name: masters_role_name.clone(),
            assume_role_policy_document: assume_role(Principal::Account(config.account_root_arn())),
            managed_policy_arns: Vec::new(),
        }),
        &[],
    )?;

    let subnet_ids: Vec<Token> = network
        .private_subnets
        .iter()
        .map(|s| Token::Ref(s.clone()))
        .collect();

    let mut deps: Vec<&ResourceId> = vec![&masters_role];
    deps.extend(network.private_subnets.iter());

    let cluster = plan.add_resource(
        UNIT,
        "EksCluster",
        ResourceKind::Cluster(ClusterSpec {
            name: name.clone(),
            version: config.cluster.version.clone(),
            resources_vpc_config: VpcConfig {
                subnet_ids: subnet_ids.clone(),
                endpoint_public_access: true,
                endpoint_private_access: true,
            },
            masters_role_arn: Token::Attr(masters_role.attr("Arn")),
            default_capacity: DefaultCapacity {
                instance_type: config.cluster.instance_type.clone(),
                desired_size: config.cluster.default_capacity,
                min_size: config.cluster.default_capacity,
                max_size: config.cluster.max_capacity,
                // Auto-discovery tags for the cluster autoscaler
                tags: vec![
                    Tag::new("k8s.io/cluster-autoscaler/enabled", "true"),
                    Tag::new(format!("k8s.io/cluster-autoscaler/{}", name), "owned"),
                ],
            },
        }),
        &deps,
    )?;

    let oidc_provider = plan.add_resource(
        UNIT,
        "EksClusterOidcProvider",
        ResourceKind::OidcProvider(OidcProviderSpec {
            url: Token::Attr(cluster.attr(attributes::OIDC_ISSUER_URL)),
            client_id_list: vec![STS_AUDIENCE.to_string()],
        }),
        &[&cluster],
    )?;

    let pod_execution_role = plan.add_resource(
        UNIT,
        "FargatePodExecutionRole",
        ResourceKind::Role(RoleSpec {
            role_name: format!("fargate-pod-execution-{}", env),
            assume_role_policy_document: assume_role(Principal::Service(
                "eks-fargate-pods.amazonaws.com".to_string(),
            )),
            managed_policy_arns: vec![
                config.managed_policy_arn("AmazonEKSFargatePodExecutionRolePolicy")
            ],
        }),
        &[],
    )?;

    let fargate_profile = plan.add_resource(
        UNIT,
        "FargateProfile",
        ResourceKind::FargateProfile(FargateProfileSpec {
            cluster_name: name.clone(),
            pod_execution_role_arn: Token::Attr(pod_execution_role.attr("Arn")),
            subnets: subnet_ids,
            selectors: vec![
                FargateSelector {
                    namespace: "default".to_string(),
                },
                FargateSelector {
                    namespace: env.clone(),
                },
            ],
        }),
        &[&cluster, &pod_execution_role],
    )?;

    plan.add_resource(
        UNIT,
        "MastersPolicy",
        ResourceKind::Policy(PolicySpec {
            policy_name: format!("eks-masters-policy-{}", env),
            policy_document: PolicyDocument::new(vec![PolicyStatement::allow(
                ["eks:DescribeCluster"],
                [arn.clone()],
            )]),
            roles: vec![Token::Ref(masters_role.clone())],
        }),
        &[&masters_role, &cluster],
    )?;

    plan.add_output("ClusterName", Token::literal(name.clone()));
    plan.add_output("ClusterEndpoint", Token::Attr(cluster.attr(attributes::ENDPOINT)));
    plan.add_output("MastersRoleArn", Token::Attr(masters_role.attr("Arn")));

    info!(
        cluster = %name,
        version = %config.cluster.version,
        capacity = config.cluster.default_capacity,
        "Cluster declared"
    );

    Ok(ClusterHandle {
        id: cluster,
        name,
        arn,
        masters_role,
        fargate_profile,
        oidc_provider,
    })
}
