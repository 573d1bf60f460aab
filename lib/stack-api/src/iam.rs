//! IAM roles, permission grants and workload identities
use crate::{AttrRef, ResourceId, Token};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::json;
use std::collections::BTreeMap;
use std::fmt;

pub const POLICY_VERSION: &str = "2012-10-17";

/// Audience every service account token is issued for
pub const STS_AUDIENCE: &str = "sts.amazonaws.com";

/// Annotation that binds a Kubernetes service account to an IAM role
pub const ROLE_ARN_ANNOTATION: &str = "eks.amazonaws.com/role-arn";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    #[default]
    Allow,
    Deny,
}

/// Who may assume a role
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum Principal {
    /// An account principal, e.g. `arn:aws:iam::123456789012:root`
    #[serde(rename = "AWS")]
    Account(String),
    /// A cloud service, e.g. `eks-fargate-pods.amazonaws.com`
    Service(String),
}

/// Condition operator -> condition key -> value(s)
pub type Conditions = BTreeMap<String, BTreeMap<String, serde_json::Value>>;

/// A named set of allowed (or denied) actions on resources.
///
/// Parsing is strict: a key this type does not model is an error, so a
/// document read from disk is written back with the same meaning. Identity
/// policies never name a principal, so `Principal` is only ever produced by
/// trust documents built in code.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct PolicyStatement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,

    #[serde(default)]
    pub effect: Effect,

    #[serde(default, skip_serializing_if = "Option::is_none", skip_deserializing)]
    pub principal: Option<Principal>,

    #[serde(
        rename = "Action",
        default,
        skip_serializing_if = "Vec::is_empty",
        deserialize_with = "one_or_many"
    )]
    pub actions: Vec<String>,

    #[serde(
        rename = "NotAction",
        default,
        skip_serializing_if = "Vec::is_empty",
        deserialize_with = "one_or_many"
    )]
    pub not_actions: Vec<String>,

    #[serde(
        rename = "Resource",
        default,
        skip_serializing_if = "Vec::is_empty",
        deserialize_with = "one_or_many"
    )]
    pub resources: Vec<Token>,

    #[serde(
        rename = "NotResource",
        default,
        skip_serializing_if = "Vec::is_empty",
        deserialize_with = "one_or_many"
    )]
    pub not_resources: Vec<Token>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub condition: Conditions,
}

impl PolicyStatement {
    /// Allow `actions` on `resources`
    pub fn allow<A, R>(actions: A, resources: R) -> Self
    where
        A: IntoIterator,
        A::Item: Into<String>,
        R: IntoIterator,
        R::Item: Into<Token>,
    {
        Self {
            sid: None,
            effect: Effect::Allow,
            principal: None,
            actions: actions.into_iter().map(Into::into).collect(),
            not_actions: Vec::new(),
            resources: resources.into_iter().map(Into::into).collect(),
            not_resources: Vec::new(),
            condition: Conditions::new(),
        }
    }

    pub fn with_principal(mut self, principal: Principal) -> Self {
        self.principal = Some(principal);
        self
    }

    /// Add a `StringEquals`-style condition
    pub fn with_condition(
        mut self,
        operator: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.condition
            .entry(operator.into())
            .or_default()
            .insert(key.into(), value.into());
        self
    }

    /// True if any resource in this statement is the bare `*` wildcard
    pub fn has_wildcard_resource(&self) -> bool {
        self.resources.iter().any(Token::is_wildcard)
    }
}

/// A permission or trust document
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct PolicyDocument {
    #[serde(default = "default_policy_version")]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(deserialize_with = "one_or_many")]
    pub statement: Vec<PolicyStatement>,
}

impl PolicyDocument {
    pub fn new(statement: Vec<PolicyStatement>) -> Self {
        Self {
            version: default_policy_version(),
            id: None,
            statement,
        }
    }

    /// Parse an externally maintained policy document.
    ///
    /// Each statement names its actions with exactly one of `Action` and
    /// `NotAction`, and its resources with at most one of `Resource` and
    /// `NotResource`.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        use serde::de::Error;

        let document: Self = serde_json::from_str(json)?;
        for (i, statement) in document.statement.iter().enumerate() {
            if statement.actions.is_empty() == statement.not_actions.is_empty() {
                return Err(serde_json::Error::custom(format!(
                    "statement {} must have exactly one of Action or NotAction",
                    i
                )));
            }
            if !statement.resources.is_empty() && !statement.not_resources.is_empty() {
                return Err(serde_json::Error::custom(format!(
                    "statement {} has both Resource and NotResource",
                    i
                )));
            }
        }
        Ok(document)
    }

    /// All actions granted by this document, in statement order
    pub fn actions(&self) -> impl Iterator<Item = &str> {
        self.statement
            .iter()
            .flat_map(|s| s.actions.iter().map(String::as_str))
    }
}

/// Who may assume a role
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AssumeRolePolicy {
    /// A document fully known at composition time
    Document(PolicyDocument),
    /// Federation of one service account through a cluster's OIDC issuer
    WebIdentity(TrustCondition),
}

/// An IAM role
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RoleSpec {
    pub role_name: String,
    pub assume_role_policy_document: AssumeRolePolicy,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub managed_policy_arns: Vec<String>,
}

/// An inline policy attached to exactly one role
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicySpec {
    pub policy_name: String,
    pub policy_document: PolicyDocument,
    pub roles: Vec<Token>,
}

/// Namespaced reference to a Kubernetes service account
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ServiceAccountRef {
    pub namespace: String,
    pub name: String,
}

impl ServiceAccountRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Token subject the cluster's OIDC issuer puts in service account tokens
    pub fn subject(&self) -> String {
        format!("system:serviceaccount:{}:{}", self.namespace, self.name)
    }
}

impl fmt::Display for ServiceAccountRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.name)
    }
}

/// OIDC identity provider registered for a cluster's issuer
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct OidcProviderSpec {
    pub url: Token,
    pub client_id_list: Vec<String>,
}

/// Federated trust of one service account through a cluster's OIDC issuer
#[derive(Clone, Debug, PartialEq)]
pub struct TrustCondition {
    /// Issuer URL exported by the cluster
    pub issuer_url: AttrRef,
    /// ARN of the provider registered for that issuer
    pub provider_arn: AttrRef,
    pub audience: String,
    pub subject: String,
}

impl TrustCondition {
    /// The trust document with `${Issuer}` and `${ProviderArn}` left for
    /// the provisioning engine to substitute
    pub fn template(&self) -> serde_json::Value {
        json!({
            "Version": POLICY_VERSION,
            "Statement": [{
                "Effect": "Allow",
                "Principal": { "Federated": "${ProviderArn}" },
                "Action": "sts:AssumeRoleWithWebIdentity",
                "Condition": {
                    "StringEquals": {
                        "${Issuer}:aud": self.audience,
                        "${Issuer}:sub": self.subject,
                    }
                },
            }],
        })
    }
}

// Condition keys embed the issuer host, which only exists once the cluster
// does. Keys cannot hold intrinsics, so the whole document goes through
// `Fn::Sub` with the host cut out of the issuer URL.
impl Serialize for TrustCondition {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let issuer_url = Token::Attr(self.issuer_url.clone());
        let variables = json!({
            "Issuer": { "Fn::Select": [1, { "Fn::Split": ["//", issuer_url] }] },
            "ProviderArn": Token::Attr(self.provider_arn.clone()),
        });

        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry("Fn::Sub", &(self.template().to_string(), variables))?;
        map.end()
    }
}

/// A federated role bound to one Kubernetes service account
#[derive(Clone, Debug, PartialEq)]
pub struct WorkloadIdentity {
    /// Cluster hosting the service account
    pub cluster: ResourceId,
    pub service_account: ServiceAccountRef,
    pub role: ResourceId,
    pub role_name: String,
    pub role_arn: String,
    pub trust: TrustCondition,
}

fn default_policy_version() -> String {
    POLICY_VERSION.to_string()
}

/// Policy grammar allows a single value wherever a list is expected
fn one_or_many<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany<T> {
        One(T),
        Many(Vec<T>),
    }

    Ok(match OneOrMany::<T>::deserialize(deserializer)? {
        OneOrMany::One(value) => vec![value],
        OneOrMany::Many(values) => values,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_policy_with_single_values() {
        let doc = PolicyDocument::from_json(
            r#"{
                "Version": "2012-10-17",
                "Statement": [
                    {"Effect": "Allow", "Action": "iam:CreateServiceLinkedRole", "Resource": "*",
                     "Condition": {"StringEquals": {
                        "iam:AWSServiceName": "elasticloadbalancing.amazonaws.com"}}},
                    {"Effect": "Allow", "Action": ["ec2:DescribeVpcs", "ec2:DescribeSubnets"],
                     "Resource": ["*"]}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(doc.statement.len(), 2);
        assert_eq!(doc.statement[0].actions, vec!["iam:CreateServiceLinkedRole"]);
        assert!(doc.statement[0].has_wildcard_resource());
        assert_eq!(doc.actions().count(), 3);
    }

    #[test]
    fn test_parse_policy_rejects_garbage() {
        assert!(PolicyDocument::from_json(r#"{"Statement": 3}"#).is_err());
    }

    #[test]
    fn test_negated_keys_survive_a_round_trip() {
        let doc = PolicyDocument::from_json(
            r#"{"Statement": [
                {"Sid": "DenyOutside", "Effect": "Deny", "Action": "ec2:*",
                 "NotResource": "arn:aws:ec2:*:*:vpc/vpc-1"},
                {"Effect": "Deny", "NotAction": ["iam:*"], "Resource": "*"}
            ]}"#,
        )
        .unwrap();

        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(
            value["Statement"][0],
            serde_json::json!({
                "Sid": "DenyOutside",
                "Effect": "Deny",
                "Action": ["ec2:*"],
                "NotResource": ["arn:aws:ec2:*:*:vpc/vpc-1"],
            })
        );
        assert_eq!(value["Statement"][1]["NotAction"], serde_json::json!(["iam:*"]));
        assert!(value["Statement"][1].get("Action").is_none());
    }

    #[test]
    fn test_unmodelled_keys_are_rejected() {
        for statement in [
            r#"{"Effect": "Allow", "Action": "s3:GetObject", "Resource": "*", "Principal": {"AWS": "*"}}"#,
            r#"{"Effect": "Deny", "Action": "s3:*", "NotPrincipal": {"AWS": "arn:aws:iam::1:root"}}"#,
            r#"{"Effect": "Allow", "Action": "s3:*", "Resources": "*"}"#,
        ] {
            let json = format!(r#"{{"Statement": [{}]}}"#, statement);
            assert!(PolicyDocument::from_json(&json).is_err(), "{}", statement);
        }
    }

    #[test]
    fn test_statement_needs_one_action_list() {
        let neither = PolicyDocument::from_json(r#"{"Statement": [{"Effect": "Allow", "Resource": "*"}]}"#);
        assert!(neither.unwrap_err().to_string().contains("Action or NotAction"));

        let both = PolicyDocument::from_json(
            r#"{"Statement": [{"Action": "a:b", "NotAction": "a:c", "Resource": "*"}]}"#,
        );
        assert!(both.is_err());

        let resources = PolicyDocument::from_json(
            r#"{"Statement": [{"Action": "a:b", "Resource": "*", "NotResource": "x"}]}"#,
        );
        assert!(resources.is_err());
    }

    #[test]
    fn test_web_identity_trust_is_substituted() {
        let cluster = ResourceId::new("EksCluster").unwrap();
        let provider = ResourceId::new("EksClusterOidcProvider").unwrap();
        let trust = TrustCondition {
            issuer_url: cluster.attr("OpenIdConnectIssuerUrl"),
            provider_arn: provider.attr("Arn"),
            audience: STS_AUDIENCE.to_string(),
            subject: ServiceAccountRef::new("kube-system", "cluster-autoscaler").subject(),
        };

        let value = serde_json::to_value(AssumeRolePolicy::WebIdentity(trust)).unwrap();
        let sub = &value["Fn::Sub"];
        let document: serde_json::Value = serde_json::from_str(sub[0].as_str().unwrap()).unwrap();
        let statement = &document["Statement"][0];
        assert_eq!(statement["Action"], "sts:AssumeRoleWithWebIdentity");
        assert_eq!(statement["Principal"]["Federated"], "${ProviderArn}");
        assert_eq!(
            statement["Condition"]["StringEquals"]["${Issuer}:sub"],
            "system:serviceaccount:kube-system:cluster-autoscaler"
        );
        assert_eq!(statement["Condition"]["StringEquals"]["${Issuer}:aud"], STS_AUDIENCE);

        assert_eq!(
            sub[1]["ProviderArn"],
            serde_json::json!({"Fn::GetAtt": ["EksClusterOidcProvider", "Arn"]})
        );
        assert_eq!(
            sub[1]["Issuer"],
            serde_json::json!({"Fn::Select": [1, {"Fn::Split": ["//",
                {"Fn::GetAtt": ["EksCluster", "OpenIdConnectIssuerUrl"]}]}]})
        );
    }

    #[test]
    fn test_static_trust_is_a_plain_document() {
        let document = PolicyDocument::new(vec![PolicyStatement::allow(
            ["sts:AssumeRole"],
            std::iter::empty::<Token>(),
        )
        .with_principal(Principal::Service("eks-fargate-pods.amazonaws.com".to_string()))]);

        let value = serde_json::to_value(AssumeRolePolicy::Document(document)).unwrap();
        assert_eq!(
            value["Statement"][0]["Principal"],
            serde_json::json!({"Service": "eks-fargate-pods.amazonaws.com"})
        );
        assert!(value.get("Fn::Sub").is_none());
    }
}
