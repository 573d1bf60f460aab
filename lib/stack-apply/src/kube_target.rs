//! Live cluster target: server-side apply for objects, helm for charts

use crate::{ApplyError, ClusterTarget, HelmCli, Result};
use k8s_openapi::api::core::v1::{Namespace, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding};
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, Patch, PatchParams};
use kube::config::KubeConfigOptions;
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use stack_api::{ChartInstallation, ClusterObject};
use std::fmt::Debug;
use tracing::info;

/// Field manager recorded on every object this stack applies
pub const FIELD_MANAGER: &str = "eks-stack";

pub struct KubeTarget {
    client: Client,
    helm: HelmCli,
}

impl KubeTarget {
    pub fn new(client: Client, helm: HelmCli) -> Self {
        Self { client, helm }
    }

    /// Connect through a named kubeconfig context, or the inferred
    /// configuration (current context or in-cluster) when none is given
    pub async fn connect(context: Option<String>, helm: HelmCli) -> Result<Self> {
        let client = match context {
            Some(context) => {
                let options = KubeConfigOptions {
                    context: Some(context),
                    ..Default::default()
                };
                let config = kube::Config::from_kubeconfig(&options).await?;
                Client::try_from(config)
            }
            None => Client::try_default().await,
        }
        .map_err(|source| ApplyError::Kubernetes {
            object: "client".to_string(),
            source,
        })?;
        Ok(Self::new(client, helm))
    }

    fn namespaced<K>(&self, object: &ClusterObject) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), object.namespace().unwrap_or("default"))
    }

    async fn server_side_apply<K>(
        &self,
        api: Api<K>,
        resource: &K,
        object: &ClusterObject,
    ) -> Result<()>
    where
        K: Resource + Clone + DeserializeOwned + Serialize + Debug,
    {
        let params = PatchParams::apply(FIELD_MANAGER).force();
        api.patch(object.name(), &params, &Patch::Apply(resource))
            .await
            .map_err(|source| ApplyError::Kubernetes {
                object: object.to_string(),
                source,
            })?;
        info!("Applied {}", object);
        Ok(())
    }
}

#[async_trait::async_trait]
impl ClusterTarget for KubeTarget {
    fn name(&self) -> &'static str {
        "kubernetes"
    }

    async fn apply_object(&self, object: &ClusterObject) -> Result<()> {
        match object {
            ClusterObject::Namespace(ns) => {
                let api: Api<Namespace> = Api::all(self.client.clone());
                self.server_side_apply(api, ns, object).await
            }
            ClusterObject::ServiceAccount(sa) => {
                let api: Api<ServiceAccount> = self.namespaced(object);
                self.server_side_apply(api, sa, object).await
            }
            ClusterObject::ClusterRole(role) => {
                let api: Api<ClusterRole> = Api::all(self.client.clone());
                self.server_side_apply(api, role, object).await
            }
            ClusterObject::ClusterRoleBinding(binding) => {
                let api: Api<ClusterRoleBinding> = Api::all(self.client.clone());
                self.server_side_apply(api, binding, object).await
            }
        }
    }

    async fn install_chart(&self, chart: &ChartInstallation) -> Result<()> {
        self.helm.upgrade_install(chart).await
    }
}
