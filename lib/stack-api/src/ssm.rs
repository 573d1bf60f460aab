use serde::Serialize;

/// A plain string parameter in the parameter store
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ParameterSpec {
    pub name: String,
    #[serde(rename = "Type")]
    pub parameter_type: String,
    pub value: String,
}

impl ParameterSpec {
    pub fn string(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameter_type: "String".to_string(),
            value: value.into(),
        }
    }

    /// ARN of this parameter. Parameter ARNs drop the leading `/` of the name.
    pub fn arn(&self, partition: &str, region: &str, account: &str) -> String {
        format!(
            "arn:{}:ssm:{}:{}:parameter/{}",
            partition,
            region,
            account,
            self.name.trim_start_matches('/')
        )
    }
}
