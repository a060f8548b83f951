use anyhow::Result;
use indexmap::IndexMap;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

pub const TEMPLATE_FORMAT_VERSION: &str = "2010-09-09";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("duplicate logical name in template: {0}")]
    DuplicateLogicalName(String),

    #[error("invalid logical name (CloudFormation requires [A-Za-z][A-Za-z0-9]*): {0}")]
    InvalidLogicalName(String),

    #[error("invalid output key (expected lower-case hyphenated, e.g. \"vpc-id\"): {0}")]
    InvalidOutputKey(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tag {
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "Value")]
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Resource {
    #[serde(rename = "Type")]
    pub resource_type: String,

    #[serde(rename = "Properties")]
    pub properties: Value,

    #[serde(rename = "DependsOn", skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

impl Resource {
    pub fn new(resource_type: impl Into<String>, properties: Value) -> Self {
        Self {
            resource_type: resource_type.into(),
            properties,
            depends_on: Vec::new(),
        }
    }

    pub fn depends_on(mut self, logical_name: impl Into<String>) -> Self {
        self.depends_on.push(logical_name.into());
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Parameter {
    #[serde(rename = "Type")]
    pub parameter_type: String,

    #[serde(rename = "Description", skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(rename = "Default", skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl Parameter {
    pub fn string(description: impl Into<String>) -> Self {
        Self {
            parameter_type: "String".to_string(),
            description: Some(description.into()),
            default: None,
        }
    }

    pub fn typed(parameter_type: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            parameter_type: parameter_type.into(),
            description: Some(description.into()),
            default: None,
        }
    }

    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Output {
    #[serde(rename = "Value")]
    pub value: Value,

    #[serde(rename = "Description", skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Output {
    pub fn new(value: Value, description: impl Into<String>) -> Self {
        Self {
            value,
            description: Some(description.into()),
        }
    }
}

/// An append-only CloudFormation template document. Resources, parameters
/// and outputs keep insertion order, so a fixed construction sequence
/// serializes to byte-identical JSON every time.
///
/// Logical names share one namespace across resources and parameters and
/// must be unique; inserting a duplicate fails rather than overwriting, so
/// a build that trips on a collision never hands back a partial template.
#[derive(Debug, Clone, Serialize)]
pub struct Template {
    #[serde(rename = "AWSTemplateFormatVersion")]
    format_version: String,

    #[serde(rename = "Description", skip_serializing_if = "Option::is_none")]
    description: Option<String>,

    #[serde(rename = "Parameters", skip_serializing_if = "IndexMap::is_empty")]
    parameters: IndexMap<String, Parameter>,

    #[serde(rename = "Resources")]
    resources: IndexMap<String, Resource>,

    #[serde(rename = "Outputs", skip_serializing_if = "IndexMap::is_empty")]
    outputs: IndexMap<String, Output>,
}

impl Template {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            format_version: TEMPLATE_FORMAT_VERSION.to_string(),
            description: Some(description.into()),
            parameters: IndexMap::new(),
            resources: IndexMap::new(),
            outputs: IndexMap::new(),
        }
    }

    pub fn add_resource(
        &mut self,
        logical_name: impl Into<String>,
        resource: Resource,
    ) -> Result<(), TemplateError> {
        let name = logical_name.into();
        validate_logical_name(&name)?;
        if self.parameters.contains_key(&name) || self.resources.contains_key(&name) {
            return Err(TemplateError::DuplicateLogicalName(name));
        }
        self.resources.insert(name, resource);
        Ok(())
    }

    pub fn add_parameter(
        &mut self,
        logical_name: impl Into<String>,
        parameter: Parameter,
    ) -> Result<(), TemplateError> {
        let name = logical_name.into();
        validate_logical_name(&name)?;
        if self.parameters.contains_key(&name) || self.resources.contains_key(&name) {
            return Err(TemplateError::DuplicateLogicalName(name));
        }
        self.parameters.insert(name, parameter);
        Ok(())
    }

    pub fn add_output(
        &mut self,
        key: impl Into<String>,
        output: Output,
    ) -> Result<(), TemplateError> {
        let key = key.into();
        validate_output_key(&key)?;
        if self.outputs.contains_key(&key) {
            return Err(TemplateError::DuplicateLogicalName(key));
        }
        self.outputs.insert(key, output);
        Ok(())
    }

    // ---------- read access (mostly for assertions and callers) ----------

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn parameters(&self) -> &IndexMap<String, Parameter> {
        &self.parameters
    }

    pub fn resources(&self) -> &IndexMap<String, Resource> {
        &self.resources
    }

    pub fn outputs(&self) -> &IndexMap<String, Output> {
        &self.outputs
    }

    pub fn resources_of_type<'a>(
        &'a self,
        resource_type: &'a str,
    ) -> impl Iterator<Item = (&'a String, &'a Resource)> {
        self.resources
            .iter()
            .filter(move |(_, r)| r.resource_type == resource_type)
    }

    // ---------- serialization ----------

    pub fn to_json(&self) -> Result<String> {
        let mut s = serde_json::to_string_pretty(self)?;
        s.push('\n');
        Ok(s)
    }

    pub fn to_json_compact(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

// -------------------- logical naming --------------------

/// Builds a CloudFormation logical name from free-form config strings:
/// each part is split on `-`, `_` and whitespace and each word is
/// capitalized, e.g. `("openvpn-server", "Instance")` -> `OpenvpnServerInstance`.
pub fn logical_name(parts: &[&str]) -> String {
    let mut out = String::new();
    for part in parts {
        for word in part.split(|c: char| c == '-' || c == '_' || c.is_whitespace()) {
            let mut chars = word.chars();
            if let Some(first) = chars.next() {
                out.extend(first.to_uppercase());
                out.push_str(chars.as_str());
            }
        }
    }
    out
}

fn validate_logical_name(name: &str) -> Result<(), TemplateError> {
    let re = Regex::new(r"^[A-Za-z][A-Za-z0-9]*$").expect("static regex");
    if !re.is_match(name) {
        return Err(TemplateError::InvalidLogicalName(name.to_string()));
    }
    Ok(())
}

fn validate_output_key(key: &str) -> Result<(), TemplateError> {
    let re = Regex::new(r"^[a-z][a-z0-9-]*$").expect("static regex");
    if !re.is_match(key) {
        return Err(TemplateError::InvalidOutputKey(key.to_string()));
    }
    Ok(())
}
