use anyhow::{bail, Result};
use regex::Regex;
use serde_json::json;
use tracing::{debug, info};

use crate::{
    config::NetworkConfig,
    intrinsics,
    template::{logical_name, Output, Resource, Tag, Template},
};

/// Builds the network stack template: one VPC, one internet gateway, one
/// subnet per (tier, AZ) pair, one route table per tier, default routes for
/// gateway-flagged tiers, and a subnet/route-table association per subnet.
pub fn build(cfg: &NetworkConfig) -> Result<Template> {
    NetworkBuilder::new(cfg)?.build()
}

struct NetworkBuilder<'a> {
    cfg: &'a NetworkConfig,
    default_tags: Vec<Tag>,
}

impl<'a> NetworkBuilder<'a> {
    fn new(cfg: &'a NetworkConfig) -> Result<Self> {
        validate(cfg)?;
        let default_tags = vec![
            Tag::new("Owner", &cfg.owner_name),
            Tag::new("Contact", &cfg.owner_email),
        ];
        Ok(Self { cfg, default_tags })
    }

    fn build(self) -> Result<Template> {
        let mut t = Template::new(format!("{} network stack", self.cfg.application));

        self.add_vpc(&mut t)?;
        self.add_igw(&mut t)?;
        self.add_subnets(&mut t)?;
        self.add_route_tables(&mut t)?;
        self.add_nat_gateway(&mut t)?;
        self.add_routes(&mut t)?;
        self.associate_route_tables(&mut t)?;
        self.add_outputs(&mut t)?;

        info!(
            application = %self.cfg.application,
            resources = t.resources().len(),
            outputs = t.outputs().len(),
            "built network template"
        );
        Ok(t)
    }

    fn tags_with_name(&self, name: &str) -> Vec<Tag> {
        let mut tags = self.default_tags.clone();
        tags.push(Tag::new("Name", name));
        tags
    }

    fn add_vpc(&self, t: &mut Template) -> Result<()> {
        t.add_resource(
            "Vpc",
            Resource::new(
                "AWS::EC2::VPC",
                json!({
                    "CidrBlock": self.cfg.vpc_cidr,
                    "EnableDnsSupport": true,
                    "EnableDnsHostnames": true,
                    "Tags": self.tags_with_name(&format!("{}-VPC", self.cfg.application)),
                }),
            ),
        )?;
        Ok(())
    }

    fn add_igw(&self, t: &mut Template) -> Result<()> {
        t.add_resource(
            "InternetGateway",
            Resource::new(
                "AWS::EC2::InternetGateway",
                json!({
                    "Tags": self.tags_with_name(&format!("{}-IGW", self.cfg.application)),
                }),
            ),
        )?;
        t.add_resource(
            "InternetGatewayAttachment",
            Resource::new(
                "AWS::EC2::VPCGatewayAttachment",
                json!({
                    "VpcId": intrinsics::ref_("Vpc"),
                    "InternetGatewayId": intrinsics::ref_("InternetGateway"),
                }),
            ),
        )?;
        Ok(())
    }

    fn add_subnets(&self, t: &mut Template) -> Result<()> {
        for tier in &self.cfg.subnets {
            for n in 1..=self.cfg.num_az {
                let name = subnet_logical(&tier.tier, n);
                let cidr = format!("{}{}", tier.az_cidrs[n - 1], tier.suffix);
                debug!(tier = %tier.tier, az = n, %cidr, "adding subnet");

                t.add_resource(
                    &name,
                    Resource::new(
                        "AWS::EC2::Subnet",
                        json!({
                            "VpcId": intrinsics::ref_("Vpc"),
                            "AvailabilityZone": intrinsics::select(n - 1, intrinsics::get_azs()),
                            "CidrBlock": cidr,
                            "Tags": self.tags_with_name(&format!(
                                "{}-{}-az{}", self.cfg.application, tier.tier, n
                            )),
                        }),
                    ),
                )?;
            }
        }
        Ok(())
    }

    fn add_route_tables(&self, t: &mut Template) -> Result<()> {
        for tier in &self.cfg.subnets {
            let name = route_table_logical(&tier.tier);
            t.add_resource(
                &name,
                Resource::new(
                    "AWS::EC2::RouteTable",
                    json!({
                        "VpcId": intrinsics::ref_("Vpc"),
                        "Tags": self.tags_with_name(&format!(
                            "{}-{}-route-table", self.cfg.application, tier.tier
                        )),
                    }),
                ),
            )?;
        }
        Ok(())
    }

    /// One NAT gateway for the whole VPC, placed in the first AZ of the
    /// first internet-facing tier. Only emitted when some tier asks for it.
    fn add_nat_gateway(&self, t: &mut Template) -> Result<()> {
        if !self.cfg.subnets.iter().any(|s| s.use_nat) {
            return Ok(());
        }
        let Some(public) = self.cfg.subnets.iter().find(|s| s.use_igw) else {
            bail!("use_nat requires at least one tier with use_igw");
        };

        t.add_resource(
            "NatEip",
            Resource::new("AWS::EC2::EIP", json!({ "Domain": "vpc" })),
        )?;
        t.add_resource(
            "NatGateway",
            Resource::new(
                "AWS::EC2::NatGateway",
                json!({
                    "AllocationId": intrinsics::get_att("NatEip", "AllocationId"),
                    "SubnetId": intrinsics::ref_(&subnet_logical(&public.tier, 1)),
                    "Tags": self.tags_with_name(&format!("{}-nat", self.cfg.application)),
                }),
            )
            .depends_on("InternetGatewayAttachment"),
        )?;
        Ok(())
    }

    fn add_routes(&self, t: &mut Template) -> Result<()> {
        for tier in &self.cfg.subnets {
            if tier.use_igw {
                debug!(tier = %tier.tier, "adding default route via internet gateway");
                t.add_resource(
                    logical_name(&[&tier.tier, "IgwRoute"]),
                    Resource::new(
                        "AWS::EC2::Route",
                        json!({
                            "RouteTableId": intrinsics::ref_(&route_table_logical(&tier.tier)),
                            "DestinationCidrBlock": "0.0.0.0/0",
                            "GatewayId": intrinsics::ref_("InternetGateway"),
                        }),
                    )
                    .depends_on("InternetGatewayAttachment"),
                )?;
            }
            if tier.use_nat {
                debug!(tier = %tier.tier, "adding default route via NAT gateway");
                t.add_resource(
                    logical_name(&[&tier.tier, "NatRoute"]),
                    Resource::new(
                        "AWS::EC2::Route",
                        json!({
                            "RouteTableId": intrinsics::ref_(&route_table_logical(&tier.tier)),
                            "DestinationCidrBlock": "0.0.0.0/0",
                            "NatGatewayId": intrinsics::ref_("NatGateway"),
                        }),
                    ),
                )?;
            }
            // Neither flag set: isolated tier, no default route.
        }
        Ok(())
    }

    fn associate_route_tables(&self, t: &mut Template) -> Result<()> {
        for tier in &self.cfg.subnets {
            for n in 1..=self.cfg.num_az {
                t.add_resource(
                    logical_name(&[&tier.tier, &format!("Az{n}SubnetRouteTableAssociation")]),
                    Resource::new(
                        "AWS::EC2::SubnetRouteTableAssociation",
                        json!({
                            "SubnetId": intrinsics::ref_(&subnet_logical(&tier.tier, n)),
                            "RouteTableId": intrinsics::ref_(&route_table_logical(&tier.tier)),
                        }),
                    ),
                )?;
            }
        }
        Ok(())
    }

    fn add_outputs(&self, t: &mut Template) -> Result<()> {
        t.add_output("vpc-id", Output::new(intrinsics::ref_("Vpc"), "VPC ID"))?;

        for tier in &self.cfg.subnets {
            for n in 1..=self.cfg.num_az {
                t.add_output(
                    format!("{}-az{}-subnet-id", tier.tier, n),
                    Output::new(
                        intrinsics::ref_(&subnet_logical(&tier.tier, n)),
                        format!("{} AZ{} subnet ID", tier.tier, n),
                    ),
                )?;
            }
        }

        for tier in &self.cfg.subnets {
            t.add_output(
                format!("{}-route-table-id", tier.tier),
                Output::new(
                    intrinsics::ref_(&route_table_logical(&tier.tier)),
                    format!("{} route table ID", tier.tier),
                ),
            )?;
        }
        Ok(())
    }
}

// -------------------- naming --------------------

fn subnet_logical(tier: &str, az_num: usize) -> String {
    logical_name(&[tier, &format!("Az{az_num}Subnet")])
}

fn route_table_logical(tier: &str) -> String {
    logical_name(&[tier, "RouteTable"])
}

// -------------------- validation --------------------

fn validate(cfg: &NetworkConfig) -> Result<()> {
    if cfg.num_az == 0 {
        bail!("network: num_az must be at least 1");
    }
    if cfg.subnets.is_empty() {
        bail!("network: at least one subnet tier is required");
    }

    let cidr_re = Regex::new(r"^(\d{1,3}\.){3}\d{1,3}/\d{1,2}$").expect("static regex");
    let tier_re = Regex::new(r"^[a-z][a-z0-9-]*$").expect("static regex");

    if !cidr_re.is_match(&cfg.vpc_cidr) {
        bail!("network: vpc_cidr is not a CIDR block: {}", cfg.vpc_cidr);
    }

    let mut seen = std::collections::BTreeSet::new();
    for tier in &cfg.subnets {
        if !tier_re.is_match(&tier.tier) {
            bail!(
                "network: tier name must be lower-case hyphenated: {:?}",
                tier.tier
            );
        }
        if !seen.insert(tier.tier.as_str()) {
            bail!("network: duplicate tier name: {}", tier.tier);
        }
        if tier.use_igw && tier.use_nat {
            bail!(
                "network: tier {} sets both use_igw and use_nat; pick one default route",
                tier.tier
            );
        }
        if tier.az_cidrs.len() < cfg.num_az {
            bail!(
                "network: tier {} has {} az_cidrs but num_az is {}",
                tier.tier,
                tier.az_cidrs.len(),
                cfg.num_az
            );
        }
        for base in &tier.az_cidrs[..cfg.num_az] {
            let full = format!("{}{}", base, tier.suffix);
            if !cidr_re.is_match(&full) {
                bail!(
                    "network: tier {}: {:?} + {:?} is not a CIDR block",
                    tier.tier,
                    base,
                    tier.suffix
                );
            }
        }
    }

    if cfg.subnets.iter().any(|s| s.use_nat) && !cfg.subnets.iter().any(|s| s.use_igw) {
        bail!("network: use_nat requires at least one tier with use_igw");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SubnetTier;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn tier(name: &str, use_igw: bool, use_nat: bool, bases: &[&str]) -> SubnetTier {
        SubnetTier {
            tier: name.to_string(),
            use_igw,
            use_nat,
            az_cidrs: bases.iter().map(|s| s.to_string()).collect(),
            suffix: "0/24".to_string(),
        }
    }

    fn base_config(subnets: Vec<SubnetTier>, num_az: usize) -> NetworkConfig {
        NetworkConfig {
            application: "vpn".to_string(),
            owner_name: "Jane Ops".to_string(),
            owner_email: "ops@example.com".to_string(),
            vpc_cidr: "10.0.0.0/16".to_string(),
            num_az,
            subnets,
        }
    }

    #[test]
    fn single_public_tier_two_azs() {
        // The worked example: one igw-routed tier across two AZs.
        let cfg = base_config(vec![tier("public", true, false, &["10.0.1.", "10.0.2."])], 2);
        let t = build(&cfg).unwrap();

        assert_eq!(t.resources_of_type("AWS::EC2::Subnet").count(), 2);
        assert_eq!(t.resources_of_type("AWS::EC2::RouteTable").count(), 1);
        assert_eq!(t.resources_of_type("AWS::EC2::Route").count(), 1);
        assert_eq!(
            t.resources_of_type("AWS::EC2::SubnetRouteTableAssociation")
                .count(),
            2
        );

        assert!(t.outputs().contains_key("vpc-id"));
        assert!(t.outputs().contains_key("public-az1-subnet-id"));
        assert!(t.outputs().contains_key("public-az2-subnet-id"));
        assert!(t.outputs().contains_key("public-route-table-id"));
    }

    #[test]
    fn subnet_count_is_tiers_times_azs() {
        let cfg = base_config(
            vec![
                tier("public", true, false, &["10.0.1.", "10.0.2.", "10.0.3."]),
                tier("private", false, false, &["10.0.11.", "10.0.12.", "10.0.13."]),
            ],
            3,
        );
        let t = build(&cfg).unwrap();
        assert_eq!(t.resources_of_type("AWS::EC2::Subnet").count(), 6);
        assert_eq!(t.resources_of_type("AWS::EC2::RouteTable").count(), 2);
    }

    #[test]
    fn isolated_tier_gets_no_default_route() {
        let cfg = base_config(
            vec![
                tier("public", true, false, &["10.0.1."]),
                tier("data", false, false, &["10.0.21."]),
            ],
            1,
        );
        let t = build(&cfg).unwrap();

        let routes: Vec<&String> = t
            .resources_of_type("AWS::EC2::Route")
            .map(|(name, _)| name)
            .collect();
        assert_eq!(routes, vec!["PublicIgwRoute"]);
    }

    #[test]
    fn subnet_cidr_concatenates_base_and_suffix() {
        let cfg = base_config(vec![tier("public", true, false, &["10.0.1."])], 1);
        let t = build(&cfg).unwrap();
        let subnet = &t.resources()["PublicAz1Subnet"];
        assert_eq!(subnet.properties["CidrBlock"], json!("10.0.1.0/24"));
        assert_eq!(
            subnet.properties["AvailabilityZone"],
            json!({ "Fn::Select": ["0", { "Fn::GetAZs": "" }] })
        );
    }

    #[test]
    fn association_targets_the_tiers_own_route_table() {
        let cfg = base_config(
            vec![
                tier("public", true, false, &["10.0.1.", "10.0.2."]),
                tier("private", false, false, &["10.0.11.", "10.0.12."]),
            ],
            2,
        );
        let t = build(&cfg).unwrap();

        for tier_name in ["public", "private"] {
            for n in 1..=2 {
                let assoc_name =
                    logical_name(&[tier_name, &format!("Az{n}SubnetRouteTableAssociation")]);
                let assoc = &t.resources()[&assoc_name];
                assert_eq!(
                    assoc.properties["RouteTableId"],
                    json!({ "Ref": route_table_logical(tier_name) })
                );
                assert_eq!(
                    assoc.properties["SubnetId"],
                    json!({ "Ref": subnet_logical(tier_name, n) })
                );
            }
        }
    }

    #[test]
    fn nat_tier_routes_through_single_nat_gateway() {
        let cfg = base_config(
            vec![
                tier("public", true, false, &["10.0.1."]),
                tier("private", false, true, &["10.0.11."]),
            ],
            1,
        );
        let t = build(&cfg).unwrap();

        assert_eq!(t.resources_of_type("AWS::EC2::EIP").count(), 1);
        assert_eq!(t.resources_of_type("AWS::EC2::NatGateway").count(), 1);

        let nat = &t.resources()["NatGateway"];
        assert_eq!(nat.properties["SubnetId"], json!({ "Ref": "PublicAz1Subnet" }));

        let route = &t.resources()["PrivateNatRoute"];
        assert_eq!(route.properties["NatGatewayId"], json!({ "Ref": "NatGateway" }));
        assert_eq!(route.properties["DestinationCidrBlock"], json!("0.0.0.0/0"));
    }

    #[test]
    fn nat_without_igw_tier_is_rejected() {
        let cfg = base_config(vec![tier("private", false, true, &["10.0.11."])], 1);
        let err = build(&cfg).unwrap_err();
        assert!(err.to_string().contains("use_igw"));
    }

    #[test]
    fn tier_with_both_flags_is_rejected() {
        let cfg = base_config(vec![tier("odd", true, true, &["10.0.1."])], 1);
        let err = build(&cfg).unwrap_err();
        assert!(err.to_string().contains("both"));
    }

    #[test]
    fn too_few_az_cidrs_is_rejected() {
        let cfg = base_config(vec![tier("public", true, false, &["10.0.1."])], 2);
        let err = build(&cfg).unwrap_err();
        assert!(err.to_string().contains("num_az"));
    }

    #[test]
    fn duplicate_tier_name_is_rejected() {
        let cfg = base_config(
            vec![
                tier("public", true, false, &["10.0.1."]),
                tier("public", false, false, &["10.0.2."]),
            ],
            1,
        );
        let err = build(&cfg).unwrap_err();
        assert!(err.to_string().contains("duplicate tier"));
    }

    #[test]
    fn malformed_cidr_is_rejected_before_any_resource() {
        let mut bad = tier("public", true, false, &["10.0.1"]);
        bad.suffix = "/24".to_string();
        let cfg = base_config(vec![bad], 1);
        assert!(build(&cfg).is_err());
    }
}
