//! CloudFormation intrinsic-function helpers.
//!
//! Builders wire resources together by logical-name key, never by live
//! reference; the stack engine resolves these at apply time.

use serde_json::{json, Value};

pub fn ref_(logical_name: &str) -> Value {
    json!({ "Ref": logical_name })
}

pub fn get_att(logical_name: &str, attribute: &str) -> Value {
    json!({ "Fn::GetAtt": [logical_name, attribute] })
}

/// The region's availability zone list, in the engine's canonical order.
pub fn get_azs() -> Value {
    json!({ "Fn::GetAZs": "" })
}

pub fn select(index: usize, list: Value) -> Value {
    json!({ "Fn::Select": [index.to_string(), list] })
}

pub fn join(separator: &str, parts: Vec<Value>) -> Value {
    json!({ "Fn::Join": [separator, parts] })
}

pub fn base64(value: Value) -> Value {
    json!({ "Fn::Base64": value })
}
