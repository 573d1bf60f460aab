//! Stack plan: the dependency-ordered graph the provisioning units build

use crate::{Result, StackError};
use stack_api::{ClusterWorkload, Resource, ResourceId, ResourceKind, Token, WorkloadIdentity};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

/// A workload scheduled for the running cluster
#[derive(Clone, Debug)]
pub struct PlannedWorkload {
    /// Unique within its unit
    pub key: String,
    pub workload: ClusterWorkload,
    /// Keys of workloads in the same unit that must be applied first
    pub depends_on: Vec<String>,
}

/// One provisioning unit (network, cluster, or an add-on)
#[derive(Clone, Debug)]
pub struct UnitPlan {
    pub name: String,
    pub depends_on: Vec<String>,
    pub workloads: Vec<PlannedWorkload>,
}

impl UnitPlan {
    pub fn workload(&self, key: &str) -> Option<&PlannedWorkload> {
        self.workloads.iter().find(|w| w.key == key)
    }
}

/// The object graph handed to the provisioning engine and the cluster.
///
/// Declaration order is construction order: a unit can only be opened after
/// the units it depends on, and a resource can only be declared after every
/// resource it depends on.
#[derive(Clone, Debug)]
pub struct StackPlan {
    environment: String,
    resources: Vec<Resource>,
    index: HashMap<ResourceId, usize>,
    units: Vec<UnitPlan>,
    identities: Vec<WorkloadIdentity>,
    outputs: BTreeMap<String, Token>,
}

impl StackPlan {
    pub fn new(environment: impl Into<String>) -> Self {
        Self {
            environment: environment.into(),
            resources: Vec::new(),
            index: HashMap::new(),
            units: Vec::new(),
            identities: Vec::new(),
            outputs: BTreeMap::new(),
        }
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Open a provisioning unit
    pub fn begin_unit(&mut self, name: &str, depends_on: &[&str]) -> Result<()> {
        if self.unit(name).is_some() {
            return Err(StackError::DuplicateUnit(name.to_string()));
        }
        for dep in depends_on {
            if self.unit(dep).is_none() {
                return Err(StackError::UnknownDependency {
                    resource: format!("unit {}", name),
                    dependency: format!("unit {}", dep),
                });
            }
        }

        self.units.push(UnitPlan {
            name: name.to_string(),
            depends_on: depends_on.iter().map(|d| d.to_string()).collect(),
            workloads: Vec::new(),
        });
        debug!("Opened unit {}", name);
        Ok(())
    }

    /// Declare a cloud resource
    pub fn add_resource(
        &mut self,
        unit: &str,
        id: &str,
        kind: ResourceKind,
        depends_on: &[&ResourceId],
    ) -> Result<ResourceId> {
        if self.unit(unit).is_none() {
            return Err(StackError::UnknownUnit(unit.to_string()));
        }
        let id = ResourceId::new(id).ok_or_else(|| StackError::InvalidResourceId(id.to_string()))?;
        if self.index.contains_key(&id) {
            return Err(StackError::DuplicateResource(id));
        }
        for dep in depends_on {
            if !self.index.contains_key(*dep) {
                return Err(StackError::UnknownDependency {
                    resource: id.to_string(),
                    dependency: dep.to_string(),
                });
            }
        }

        debug!("Declared {} {} in unit {}", kind.type_name(), id, unit);
        self.index.insert(id.clone(), self.resources.len());
        self.resources.push(Resource {
            id: id.clone(),
            unit: unit.to_string(),
            kind,
            depends_on: depends_on.iter().map(|d| (*d).clone()).collect::<BTreeSet<_>>(),
        });
        Ok(id)
    }

    /// Schedule a workload for the running cluster
    pub fn add_workload(
        &mut self,
        unit: &str,
        key: &str,
        workload: impl Into<ClusterWorkload>,
        depends_on: &[&str],
    ) -> Result<()> {
        let plan = self
            .units
            .iter_mut()
            .find(|u| u.name == unit)
            .ok_or_else(|| StackError::UnknownUnit(unit.to_string()))?;

        if plan.workload(key).is_some() {
            return Err(StackError::DuplicateWorkload {
                unit: unit.to_string(),
                key: key.to_string(),
            });
        }
        for dep in depends_on {
            if plan.workload(dep).is_none() {
                return Err(StackError::UnknownDependency {
                    resource: format!("{}/{}", unit, key),
                    dependency: format!("{}/{}", unit, dep),
                });
            }
        }

        let workload = workload.into();
        debug!("Scheduled {} in unit {}", workload, unit);
        plan.workloads.push(PlannedWorkload {
            key: key.to_string(),
            workload,
            depends_on: depends_on.iter().map(|d| d.to_string()).collect(),
        });
        Ok(())
    }

    /// Record a workload identity so it can be validated against its consumers
    pub fn register_identity(&mut self, identity: WorkloadIdentity) -> Result<()> {
        if !self.index.contains_key(&identity.role) {
            return Err(StackError::UnknownDependency {
                resource: format!("identity {}", identity.service_account),
                dependency: identity.role.to_string(),
            });
        }
        self.identities.push(identity);
        Ok(())
    }

    pub fn add_output(&mut self, name: &str, value: Token) {
        self.outputs.insert(name.to_string(), value);
    }

    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    pub fn resource(&self, id: &ResourceId) -> Option<&Resource> {
        self.index.get(id).map(|&i| &self.resources[i])
    }

    pub fn units(&self) -> &[UnitPlan] {
        &self.units
    }

    pub fn unit(&self, name: &str) -> Option<&UnitPlan> {
        self.units.iter().find(|u| u.name == name)
    }

    pub fn identities(&self) -> &[WorkloadIdentity] {
        &self.identities
    }

    pub fn outputs(&self) -> &BTreeMap<String, Token> {
        &self.outputs
    }

    /// Inline policies attached to a role, in declaration order
    pub fn policies_for<'a>(
        &'a self,
        role: &'a ResourceId,
    ) -> impl Iterator<Item = &'a Resource> + 'a {
        let target = Token::Ref(role.clone());
        self.resources
            .iter()
            .filter(move |r| r.as_policy().map(|p| p.roles.contains(&target)).unwrap_or(false))
    }

    /// Workloads across all units, in unit order
    pub fn workloads(&self) -> impl Iterator<Item = (&UnitPlan, &PlannedWorkload)> {
        self.units
            .iter()
            .flat_map(|u| u.workloads.iter().map(move |w| (u, w)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stack_api::manifest::namespace;
    use stack_api::ssm::ParameterSpec;

    fn param() -> ResourceKind {
        ResourceKind::Parameter(ParameterSpec::string("/p", "v"))
    }

    #[test]
    fn test_units_must_be_declared_in_order() {
        let mut plan = StackPlan::new("dev");
        assert!(matches!(
            plan.begin_unit("cluster", &["network"]),
            Err(StackError::UnknownDependency { .. })
        ));
        plan.begin_unit("network", &[]).unwrap();
        plan.begin_unit("cluster", &["network"]).unwrap();
        assert!(matches!(plan.begin_unit("network", &[]), Err(StackError::DuplicateUnit(_))));
        assert_eq!(plan.units().len(), 2);
    }

    #[test]
    fn test_resource_dependencies_must_exist() {
        let mut plan = StackPlan::new("dev");
        plan.begin_unit("a", &[]).unwrap();
        let first = plan.add_resource("a", "First", param(), &[]).unwrap();
        let second = plan.add_resource("a", "Second", param(), &[&first]).unwrap();

        let missing = ResourceId::new("Missing").unwrap();
        assert!(matches!(
            plan.add_resource("a", "Third", param(), &[&missing]),
            Err(StackError::UnknownDependency { .. })
        ));
        assert!(matches!(
            plan.add_resource("a", "First", param(), &[]),
            Err(StackError::DuplicateResource(_))
        ));
        assert!(matches!(
            plan.add_resource("a", "bad-id", param(), &[]),
            Err(StackError::InvalidResourceId(_))
        ));
        assert!(matches!(
            plan.add_resource("nope", "Fourth", param(), &[]),
            Err(StackError::UnknownUnit(_))
        ));

        let order: Vec<&ResourceId> = plan.resources().iter().map(|r| &r.id).collect();
        assert_eq!(order, vec![&first, &second]);
        assert!(plan.resource(&second).unwrap().depends_on.contains(&first));
    }

    #[test]
    fn test_workload_dependencies_stay_in_unit() {
        let mut plan = StackPlan::new("dev");
        plan.begin_unit("a", &[]).unwrap();
        plan.begin_unit("b", &[]).unwrap();
        plan.add_workload("a", "ns", namespace("x"), &[]).unwrap();

        assert!(plan.add_workload("b", "other", namespace("y"), &["ns"]).is_err());
        assert!(plan.add_workload("a", "ns", namespace("z"), &[]).is_err());
        plan.add_workload("a", "ns2", namespace("z"), &["ns"]).unwrap();

        assert_eq!(plan.workloads().count(), 2);
        assert_eq!(plan.unit("a").unwrap().workload("ns2").unwrap().depends_on, vec!["ns"]);
    }
}
