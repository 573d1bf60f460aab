//! Raw Kubernetes objects applied directly to the cluster API
use crate::{ChartInstallation, ServiceAccountRef};
use k8s_openapi::api::core::v1::{Namespace, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Kubernetes object applied outside chart templating
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ClusterObject {
    Namespace(Namespace),
    ServiceAccount(ServiceAccount),
    ClusterRole(ClusterRole),
    ClusterRoleBinding(ClusterRoleBinding),
}

impl ClusterObject {
    pub fn kind(&self) -> &'static str {
        match self {
            ClusterObject::Namespace(_) => "Namespace",
            ClusterObject::ServiceAccount(_) => "ServiceAccount",
            ClusterObject::ClusterRole(_) => "ClusterRole",
            ClusterObject::ClusterRoleBinding(_) => "ClusterRoleBinding",
        }
    }

    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            ClusterObject::Namespace(o) => &o.metadata,
            ClusterObject::ServiceAccount(o) => &o.metadata,
            ClusterObject::ClusterRole(o) => &o.metadata,
            ClusterObject::ClusterRoleBinding(o) => &o.metadata,
        }
    }

    pub fn name(&self) -> &str {
        self.metadata().name.as_deref().unwrap_or_default()
    }

    pub fn namespace(&self) -> Option<&str> {
        self.metadata().namespace.as_deref()
    }

    /// The service account this object defines, if it is one
    pub fn service_account(&self) -> Option<ServiceAccountRef> {
        match self {
            ClusterObject::ServiceAccount(sa) => Some(ServiceAccountRef::new(
                sa.metadata.namespace.clone().unwrap_or_else(|| "default".to_string()),
                sa.metadata.name.clone().unwrap_or_default(),
            )),
            _ => None,
        }
    }

    /// Annotation value on this object
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.metadata()
            .annotations
            .as_ref()
            .and_then(|a| a.get(key))
            .map(String::as_str)
    }
}

impl fmt::Display for ClusterObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.namespace() {
            Some(ns) => write!(f, "{} {}/{}", self.kind(), ns, self.name()),
            None => write!(f, "{} {}", self.kind(), self.name()),
        }
    }
}

/// Anything applied to the running cluster: a raw object or a chart
#[derive(Clone, Debug, PartialEq)]
pub enum ClusterWorkload {
    Object(ClusterObject),
    Chart(ChartInstallation),
}

impl ClusterWorkload {
    pub fn as_chart(&self) -> Option<&ChartInstallation> {
        match self {
            ClusterWorkload::Chart(chart) => Some(chart),
            ClusterWorkload::Object(_) => None,
        }
    }

    pub fn as_object(&self) -> Option<&ClusterObject> {
        match self {
            ClusterWorkload::Object(object) => Some(object),
            ClusterWorkload::Chart(_) => None,
        }
    }
}

impl fmt::Display for ClusterWorkload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterWorkload::Object(object) => object.fmt(f),
            ClusterWorkload::Chart(chart) => {
                write!(
                    f,
                    "HelmRelease {}/{} ({}@{})",
                    chart.namespace, chart.release, chart.chart, chart.version
                )
            }
        }
    }
}

impl From<ClusterObject> for ClusterWorkload {
    fn from(value: ClusterObject) -> Self {
        ClusterWorkload::Object(value)
    }
}

impl From<ChartInstallation> for ClusterWorkload {
    fn from(value: ChartInstallation) -> Self {
        ClusterWorkload::Chart(value)
    }
}

/// Metadata shared by every object this stack applies
pub fn object_meta(name: &str, namespace: Option<&str>) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: namespace.map(str::to_string),
        labels: Some(BTreeMap::from([(
            "app.kubernetes.io/managed-by".to_string(),
            "eks-stack".to_string(),
        )])),
        ..Default::default()
    }
}

pub fn namespace(name: &str) -> ClusterObject {
    ClusterObject::Namespace(Namespace {
        metadata: object_meta(name, None),
        ..Default::default()
    })
}

/// Service account annotated with the IAM role it assumes
pub fn service_account(account: &ServiceAccountRef, role_arn: &str) -> ClusterObject {
    let mut metadata = object_meta(&account.name, Some(&account.namespace));
    metadata.annotations = Some(BTreeMap::from([(
        crate::iam::ROLE_ARN_ANNOTATION.to_string(),
        role_arn.to_string(),
    )]));
    ClusterObject::ServiceAccount(ServiceAccount {
        metadata,
        ..Default::default()
    })
}
