//! Network provisioner: VPC, subnets and the shared egress path

use ipnetwork::Ipv4Network;
use stack_api::network::{
    ElasticIpSpec, InternetGatewaySpec, NatGatewaySpec, SubnetSpec, SubnetTier, Tag, VpcSpec,
};
use stack_api::{ResourceId, ResourceKind, Token};
use stack_core::{Result, StackConfig, StackError, StackPlan};
use std::net::Ipv4Addr;
use tracing::info;

pub const UNIT: &str = "network";

/// What the cluster needs from the network
#[derive(Clone, Debug)]
pub struct NetworkOutput {
    pub vpc: ResourceId,
    pub public_subnets: Vec<ResourceId>,
    pub private_subnets: Vec<ResourceId>,
    pub nat_gateway: ResourceId,
}

/// Split `cidr` evenly into `count` subnets, the smallest power of two that fits
pub fn carve_subnets(cidr: Ipv4Network, count: usize) -> Result<Vec<Ipv4Network>> {
    let bits = (count.max(1) as u32).next_power_of_two().trailing_zeros();
    let prefix = cidr.prefix() as u32 + bits;
    if prefix > 28 {
        return Err(StackError::InvalidConfiguration(format!(
            "{} cannot hold {} subnets",
            cidr, count
        )));
    }

    let size = 1u32 << (32 - prefix);
    let base = u32::from(cidr.network());
    (0..count as u32)
        .map(|i| Ok(Ipv4Network::new(Ipv4Addr::from(base + i * size), prefix as u8)?))
        .collect()
}

/// Declare the network: one public and one NAT-routed private subnet per AZ,
/// all private subnets sharing a single NAT gateway
pub fn provision(plan: &mut StackPlan, config: &StackConfig) -> Result<NetworkOutput> {
    let env = &config.environment;
    let zones = config.availability_zones();
    if zones.is_empty() {
        return Err(no_zones());
    }
    let blocks = carve_subnets(config.network.cidr()?, zones.len() * 2)?;
    let (public_blocks, private_blocks) = blocks.split_at(zones.len());

    plan.begin_unit(UNIT, &[])?;

    let vpc = plan.add_resource(
        UNIT,
        "Vpc",
        ResourceKind::Vpc(VpcSpec {
            cidr_block: config.network.cidr.clone(),
            enable_dns_support: true,
            enable_dns_hostnames: true,
            tags: vec![Tag::name(format!("{}-vpc", env))],
        }),
        &[],
    )?;

    let igw = plan.add_resource(
        UNIT,
        "VpcInternetGateway",
        ResourceKind::InternetGateway(InternetGatewaySpec {
            vpc_id: Token::Ref(vpc.clone()),
            tags: vec![Tag::name(format!("{}-igw", env))],
        }),
        &[&vpc],
    )?;

    let mut public_subnets = Vec::with_capacity(zones.len());
    for (i, (zone, block)) in zones.iter().zip(public_blocks).enumerate() {
        let id = plan.add_resource(
            UNIT,
            &format!("VpcPublicSubnet{}", i + 1),
            ResourceKind::Subnet(SubnetSpec {
                vpc_id: Token::Ref(vpc.clone()),
                cidr_block: block.to_string(),
                availability_zone: zone.clone(),
                map_public_ip_on_launch: true,
                tier: SubnetTier::Public,
                default_route: Token::Ref(igw.clone()),
                tags: vec![
                    Tag::name(format!("{}-public-subnet-{}", env, zone)),
                    Tag::new("kubernetes.io/role/elb", "1"),
                ],
            }),
            &[&vpc, &igw],
        )?;
        public_subnets.push(id);
    }

    let eip = plan.add_resource(
        UNIT,
        "VpcNatEip",
        ResourceKind::ElasticIp(ElasticIpSpec {
            domain: "vpc".to_string(),
            tags: vec![Tag::name(format!("{}-nat-eip", env))],
        }),
        &[&vpc],
    )?;

    // Shared by every private subnet
    let nat_subnet = public_subnets.first().ok_or_else(no_zones)?;
    let nat_gateway = plan.add_resource(
        UNIT,
        "VpcNatGateway",
        ResourceKind::NatGateway(NatGatewaySpec {
            subnet_id: Token::Ref(nat_subnet.clone()),
            allocation_id: Token::Attr(eip.attr("AllocationId")),
            tags: vec![Tag::name(format!("{}-nat", env))],
        }),
        &[nat_subnet, &eip],
    )?;

    let mut private_subnets = Vec::with_capacity(zones.len());
    for (i, (zone, block)) in zones.iter().zip(private_blocks).enumerate() {
        let id = plan.add_resource(
            UNIT,
            &format!("VpcPrivateSubnet{}", i + 1),
            ResourceKind::Subnet(SubnetSpec {
                vpc_id: Token::Ref(vpc.clone()),
                cidr_block: block.to_string(),
                availability_zone: zone.clone(),
                map_public_ip_on_launch: false,
                tier: SubnetTier::PrivateWithNat,
                default_route: Token::Ref(nat_gateway.clone()),
                tags: vec![
                    Tag::name(format!("{}-nodes-subnet-{}", env, zone)),
                    Tag::new("kubernetes.io/role/internal-elb", "1"),
                ],
            }),
            &[&vpc, &nat_gateway],
        )?;
        private_subnets.push(id);
    }

    info!(
        cidr = %config.network.cidr,
        zones = zones.len(),
        "Network declared with {} public and {} private subnets",
        public_subnets.len(),
        private_subnets.len()
    );

    Ok(NetworkOutput {
        vpc,
        public_subnets,
        private_subnets,
        nat_gateway,
    })
}

fn no_zones() -> StackError {
    StackError::InvalidConfiguration("the network needs at least one availability zone".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use stack_core::validate;

    fn config(max_azs: u8) -> StackConfig {
        let mut config = StackConfig {
            account_id: "123456789012".to_string(),
            ..Default::default()
        };
        config.network.max_azs = max_azs;
        config
    }

    fn nat_count(plan: &StackPlan) -> usize {
        plan.resources()
            .iter()
            .filter(|r| matches!(r.kind, ResourceKind::NatGateway(_)))
            .count()
    }

    #[test]
    fn test_carve_three_zones() {
        let cidr: Ipv4Network = "10.124.0.0/16".parse().unwrap();
        let blocks: Vec<String> = carve_subnets(cidr, 6).unwrap().iter().map(|b| b.to_string()).collect();
        assert_eq!(
            blocks,
            vec![
                "10.124.0.0/19",
                "10.124.32.0/19",
                "10.124.64.0/19",
                "10.124.96.0/19",
                "10.124.128.0/19",
                "10.124.160.0/19",
            ]
        );
    }

    #[test]
    fn test_default_network_layout() {
        let mut plan = StackPlan::new("dev");
        let network = provision(&mut plan, &config(3)).unwrap();

        assert_eq!(network.public_subnets.len(), 3);
        assert_eq!(network.private_subnets.len(), 3);
        assert_eq!(nat_count(&plan), 1);

        let private = plan.resource(&network.private_subnets[2]).unwrap().as_subnet().unwrap();
        assert_eq!(private.availability_zone, "us-east-1c");
        assert_eq!(private.cidr_block, "10.124.160.0/19");
        assert_eq!(private.default_route, Token::Ref(network.nat_gateway.clone()));
        assert!(validate(&plan).is_ok());
    }

    #[test]
    fn test_single_nat_gateway_for_any_zone_count() {
        for zones in 1..=6 {
            let mut plan = StackPlan::new("dev");
            let network = provision(&mut plan, &config(zones)).unwrap();
            assert_eq!(nat_count(&plan), 1, "zones = {}", zones);
            assert_eq!(network.private_subnets.len(), zones as usize);

            // Every private subnet egresses through the same gateway
            for id in &network.private_subnets {
                let subnet = plan.resource(id).unwrap().as_subnet().unwrap();
                assert_eq!(subnet.default_route, Token::Ref(network.nat_gateway.clone()));
            }
        }
    }

    #[test]
    fn test_no_zones_is_a_configuration_error() {
        let mut plan = StackPlan::new("dev");
        let err = provision(&mut plan, &config(0)).unwrap_err();
        assert!(matches!(err, StackError::InvalidConfiguration(_)));
        assert!(plan.units().is_empty());
    }
}
