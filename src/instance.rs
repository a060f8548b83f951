use anyhow::{bail, Context as _, Result};
use minijinja::Environment;
use serde_json::json;
use tracing::info;

use crate::{
    config::InstanceConfig,
    intrinsics,
    template::{logical_name, Output, Parameter, Resource, Tag, Template},
};

/// OpenVPN Access Server appliances read these key=value lines from user
/// data on first boot. Values are passed through verbatim; the appliance
/// owns their validation.
const USER_DATA_TEMPLATE: &str = "\
admin_user={{ admin_user }}
admin_pw={{ admin_password }}
reroute_gw={{ reroute_gw }}
reroute_dns={{ reroute_dns }}
";

/// Builds the instance stack template: exactly one EC2 instance with a
/// region-selected AMI, plus an output exposing its public address.
pub fn build(cfg: &InstanceConfig) -> Result<Template> {
    let ami = resolve_ami(cfg)?;
    let user_data = render_user_data(cfg)?;

    let mut t = Template::new(format!("{} instance stack", cfg.name));

    t.add_parameter(
        "KeyName",
        Parameter::typed("AWS::EC2::KeyPair::KeyName", "SSH key pair for the instance")
            .with_default(cfg.key_name.as_str()),
    )?;

    let instance_name = logical_name(&[&cfg.name, "Instance"]);
    t.add_resource(
        &instance_name,
        Resource::new(
            "AWS::EC2::Instance",
            json!({
                "ImageId": ami,
                "InstanceType": cfg.instance_type,
                "KeyName": intrinsics::ref_("KeyName"),
                "SubnetId": cfg.subnet_id,
                "SecurityGroupIds": cfg.security_group_ids,
                // The VPN server forwards traffic for other hosts.
                "SourceDestCheck": false,
                "UserData": intrinsics::base64(json!(user_data)),
                "Tags": [
                    Tag::new("Owner", &cfg.owner_name),
                    Tag::new("Contact", &cfg.owner_email),
                    Tag::new("Name", &cfg.name),
                ],
            }),
        ),
    )?;

    t.add_output(
        "public-ip",
        Output::new(
            intrinsics::get_att(&instance_name, "PublicIp"),
            format!("{} public IP address", cfg.name),
        ),
    )?;

    info!(name = %cfg.name, region = %cfg.region, %ami, "built instance template");
    Ok(t)
}

fn resolve_ami<'a>(cfg: &'a InstanceConfig) -> Result<&'a str> {
    match cfg.amis.get(&cfg.region) {
        Some(ami) => Ok(ami),
        None => {
            let known: Vec<&str> = cfg.amis.keys().map(|s| s.as_str()).collect();
            bail!(
                "instance: no AMI configured for region {} (have: {})",
                cfg.region,
                known.join(", ")
            );
        }
    }
}

fn render_user_data(cfg: &InstanceConfig) -> Result<String> {
    let ctx = json!({
        "admin_user": cfg.admin_user,
        "admin_password": cfg.admin_password,
        "reroute_gw": if cfg.reroute_gw { 1 } else { 0 },
        "reroute_dns": if cfg.reroute_dns { 1 } else { 0 },
    });

    let mut env = Environment::new();
    env.set_keep_trailing_newline(true);
    env.add_template("user-data", USER_DATA_TEMPLATE)?;
    let tpl = env.get_template("user-data")?;
    tpl.render(minijinja::value::Value::from_serialize(&ctx))
        .context("instance: failed to render user data")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    fn base_config() -> InstanceConfig {
        let mut amis = BTreeMap::new();
        amis.insert("eu-west-1".to_string(), "ami-07783fa0".to_string());
        amis.insert("us-east-1".to_string(), "ami-0acc9101".to_string());

        InstanceConfig {
            name: "openvpn".to_string(),
            region: "eu-west-1".to_string(),
            instance_type: "t3.small".to_string(),
            key_name: "vpn-keypair".to_string(),
            subnet_id: "subnet-0123".to_string(),
            security_group_ids: vec!["sg-0456".to_string()],
            amis,
            admin_user: "openvpn".to_string(),
            admin_password: "hunter2!$".to_string(),
            reroute_gw: true,
            reroute_dns: false,
            owner_name: "Jane Ops".to_string(),
            owner_email: "ops@example.com".to_string(),
        }
    }

    #[test]
    fn exactly_one_instance_and_one_output() {
        let t = build(&base_config()).unwrap();
        assert_eq!(t.resources().len(), 1);
        assert_eq!(t.outputs().len(), 1);
        assert!(t.resources().contains_key("OpenvpnInstance"));
        assert_eq!(
            t.outputs()["public-ip"].value,
            json!({ "Fn::GetAtt": ["OpenvpnInstance", "PublicIp"] })
        );
    }

    #[test]
    fn ami_is_selected_by_region() {
        let mut cfg = base_config();
        cfg.region = "us-east-1".to_string();
        let t = build(&cfg).unwrap();
        assert_eq!(
            t.resources()["OpenvpnInstance"].properties["ImageId"],
            json!("ami-0acc9101")
        );
    }

    #[test]
    fn unknown_region_error_lists_configured_regions() {
        let mut cfg = base_config();
        cfg.region = "ap-south-1".to_string();
        let err = build(&cfg).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("ap-south-1"));
        assert!(msg.contains("eu-west-1"));
        assert!(msg.contains("us-east-1"));
    }

    #[test]
    fn user_data_embeds_boot_parameters_verbatim() {
        let rendered = render_user_data(&base_config()).unwrap();
        assert_eq!(
            rendered,
            "admin_user=openvpn\nadmin_pw=hunter2!$\nreroute_gw=1\nreroute_dns=0\n"
        );
    }

    #[test]
    fn user_data_is_base64_wrapped_in_template() {
        let t = build(&base_config()).unwrap();
        let user_data = &t.resources()["OpenvpnInstance"].properties["UserData"];
        let inner = user_data["Fn::Base64"].as_str().unwrap();
        assert!(inner.starts_with("admin_user=openvpn\n"));
    }

    #[test]
    fn key_pair_is_a_template_parameter_with_default() {
        let t = build(&base_config()).unwrap();
        let param = &t.parameters()["KeyName"];
        assert_eq!(param.parameter_type, "AWS::EC2::KeyPair::KeyName");
        assert_eq!(param.default, Some(json!("vpn-keypair")));
        assert_eq!(
            t.resources()["OpenvpnInstance"].properties["KeyName"],
            json!({ "Ref": "KeyName" })
        );
    }
}
