//! Rendering a plan for its consumers
//!
//! - template: cloud resources for the provisioning engine
//! - manifests: raw objects, one YAML document each
//! - releases: chart installations grouped by unit

use crate::{Result, StackPlan};
use serde::Serialize;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use stack_api::ChartInstallation;

/// Render the provisioning template
pub fn render_template(plan: &StackPlan) -> Result<Value> {
    let resources = render_resources(plan)?;
    let fingerprint = fingerprint_of(&resources)?;

    let mut outputs = Map::new();
    for (name, value) in plan.outputs() {
        outputs.insert(name.clone(), json!({ "Value": value }));
    }

    Ok(json!({
        "Description": format!("EKS stack ({})", plan.environment()),
        "Metadata": {
            "Environment": plan.environment(),
            "GeneratedAt": chrono::Utc::now().to_rfc3339(),
            "Fingerprint": fingerprint,
        },
        "Resources": resources,
        "Outputs": outputs,
    }))
}

/// Content hash of the plan's resources. Stable across renders of the same plan.
pub fn fingerprint(plan: &StackPlan) -> Result<String> {
    fingerprint_of(&render_resources(plan)?)
}

/// All raw objects as a multi-document YAML stream
pub fn render_manifests(plan: &StackPlan) -> Result<String> {
    let mut docs = Vec::new();
    for (_, planned) in plan.workloads() {
        if let Some(object) = planned.workload.as_object() {
            docs.push(serde_yaml::to_string(object)?);
        }
    }
    Ok(docs.join("---\n"))
}

#[derive(Serialize)]
struct UnitReleases<'a> {
    unit: &'a str,
    releases: Vec<&'a ChartInstallation>,
}

/// Chart installations grouped by unit
pub fn render_releases(plan: &StackPlan) -> Result<String> {
    let units: Vec<UnitReleases<'_>> = plan
        .units()
        .iter()
        .map(|u| UnitReleases {
            unit: &u.name,
            releases: u.workloads.iter().filter_map(|w| w.workload.as_chart()).collect(),
        })
        .filter(|u| !u.releases.is_empty())
        .collect();
    Ok(serde_yaml::to_string(&units)?)
}

fn render_resources(plan: &StackPlan) -> Result<Map<String, Value>> {
    let mut resources = Map::new();
    for resource in plan.resources() {
        let mut entry = Map::new();
        entry.insert("Type".to_string(), json!(resource.kind.type_name()));
        entry.insert("Properties".to_string(), serde_json::to_value(&resource.kind)?);
        if !resource.depends_on.is_empty() {
            entry.insert("DependsOn".to_string(), json!(resource.depends_on));
        }
        entry.insert("Metadata".to_string(), json!({ "Unit": resource.unit }));
        resources.insert(resource.id.to_string(), Value::Object(entry));
    }
    Ok(resources)
}

fn fingerprint_of(resources: &Map<String, Value>) -> Result<String> {
    let bytes = serde_json::to_vec(resources)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}
