use anyhow::{bail, Result};
use serde_json::{json, Value};
use tracing::info;

use crate::{
    config::{IngressRule, SecurityGroupConfig},
    intrinsics,
    template::{logical_name, Output, Resource, Tag, Template},
};

/// Builds the security-group stack template: one group with one ingress
/// entry per configured rule, in configuration order.
pub fn build(cfg: &SecurityGroupConfig) -> Result<Template> {
    let ingress = ingress_rules(&cfg.rules)?;

    let mut t = Template::new(format!(
        "{} {} security group stack",
        cfg.application, cfg.sg_name
    ));

    let group_name = logical_name(&[&cfg.sg_name, "SecurityGroup"]);
    t.add_resource(
        &group_name,
        Resource::new(
            "AWS::EC2::SecurityGroup",
            json!({
                "VpcId": cfg.vpc_id,
                "GroupDescription": format!("{} {} security group", cfg.application, cfg.sg_name),
                "SecurityGroupIngress": ingress,
                "Tags": [
                    Tag::new("Application", &cfg.application),
                    Tag::new("Environment", &cfg.environment),
                    Tag::new("Owner", &cfg.owner),
                    Tag::new("Name", format!("{}-{}-sg", cfg.application, cfg.sg_name)),
                ],
            }),
        ),
    )?;

    t.add_output(
        "security-group-id",
        Output::new(
            intrinsics::ref_(&group_name),
            format!("{} security group ID", cfg.sg_name),
        ),
    )?;

    info!(sg = %cfg.sg_name, rules = cfg.rules.len(), "built security group template");
    Ok(t)
}

/// Maps config rules to ingress entries one-to-one. A rule must name its
/// source exactly once: either a CIDR or another security group. Anything
/// else aborts the build rather than being dropped on the floor.
fn ingress_rules(rules: &[IngressRule]) -> Result<Vec<Value>> {
    let mut out = Vec::with_capacity(rules.len());

    for (i, rule) in rules.iter().enumerate() {
        let entry = match (&rule.cidr_ip, &rule.source_security_group_id) {
            (Some(cidr), None) => json!({
                "IpProtocol": rule.ip_protocol,
                "FromPort": rule.from_port,
                "ToPort": rule.to_port,
                "CidrIp": cidr,
            }),
            (None, Some(source_sg)) => json!({
                "IpProtocol": rule.ip_protocol,
                "FromPort": rule.from_port,
                "ToPort": rule.to_port,
                "SourceSecurityGroupId": source_sg,
            }),
            (None, None) => bail!(
                "security_group: rule {} has neither cidr_ip nor source_security_group_id",
                i + 1
            ),
            (Some(_), Some(_)) => bail!(
                "security_group: rule {} sets both cidr_ip and source_security_group_id; pick one source",
                i + 1
            ),
        };
        out.push(entry);
    }

    Ok(out)
}
