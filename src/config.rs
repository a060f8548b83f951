use anyhow::{bail, Context as _, Result};
use serde::Deserialize;
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

pub fn default_config_path() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        if !xdg.is_empty() {
            return PathBuf::from(xdg).join("stratus").join("config.toml");
        }
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".config").join("stratus").join("config.toml");
    }
    PathBuf::from("stratus/config.toml")
}

/// Config path precedence:
/// 1) CLI --config / STRATUS_CONFIG (must exist)
/// 2) default XDG_CONFIG_HOME/stratus/config.toml (must exist)
pub fn locate_config(cli_config: Option<&PathBuf>) -> Result<PathBuf> {
    if let Some(p) = cli_config {
        if !p.exists() {
            bail!("config file does not exist: {}", p.display());
        }
        return Ok(p.clone());
    }

    let p = default_config_path();
    if !p.exists() {
        bail!(
            "no config found at {} (pass --config or set STRATUS_CONFIG)",
            p.display()
        );
    }
    Ok(p)
}

/// One environment's worth of stack configuration. Each builder reads only
/// its own section; a section left out of the file is fine until the
/// matching builder is asked for.
#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub network: Option<NetworkConfig>,

    #[serde(default)]
    pub instance: Option<InstanceConfig>,

    #[serde(default)]
    pub security_group: Option<SecurityGroupConfig>,
}

impl Config {
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        let cfg: Self = toml::from_str(&text)
            .with_context(|| format!("invalid config at {}", path.display()))?;
        Ok(cfg)
    }

    pub fn network(&self) -> Result<&NetworkConfig> {
        self.network
            .as_ref()
            .context("config has no [network] section")
    }

    pub fn instance(&self) -> Result<&InstanceConfig> {
        self.instance
            .as_ref()
            .context("config has no [instance] section")
    }

    pub fn security_group(&self) -> Result<&SecurityGroupConfig> {
        self.security_group
            .as_ref()
            .context("config has no [security_group] section")
    }
}

// -------------------- network --------------------

#[derive(Debug, Deserialize)]
pub struct NetworkConfig {
    pub application: String,
    pub owner_name: String,
    pub owner_email: String,
    pub vpc_cidr: String,
    pub num_az: usize,
    pub subnets: Vec<SubnetTier>,
}

/// One subnet tier, repeated across availability zones. `az_cidrs[n]` is the
/// CIDR base for AZ n+1; the full subnet CIDR is `az_cidrs[n] + suffix`.
#[derive(Debug, Deserialize)]
pub struct SubnetTier {
    pub tier: String,

    /// Route 0.0.0.0/0 through the internet gateway (public tier).
    #[serde(default)]
    pub use_igw: bool,

    /// Route 0.0.0.0/0 through a NAT gateway (private tier with egress).
    #[serde(default)]
    pub use_nat: bool,

    pub az_cidrs: Vec<String>,
    pub suffix: String,
}

// -------------------- instance --------------------

#[derive(Debug, Deserialize)]
pub struct InstanceConfig {
    pub name: String,
    pub region: String,
    pub instance_type: String,
    pub key_name: String,
    pub subnet_id: String,
    pub security_group_ids: Vec<String>,

    /// Region -> AMI id. The AMI for `region` must be present here.
    pub amis: BTreeMap<String, String>,

    // Boot-time parameters, embedded verbatim into the instance user data.
    // The OpenVPN appliance validates them on first boot, not us.
    pub admin_user: String,
    pub admin_password: String,

    #[serde(default)]
    pub reroute_gw: bool,

    #[serde(default)]
    pub reroute_dns: bool,

    pub owner_name: String,
    pub owner_email: String,
}

// -------------------- security group --------------------

#[derive(Debug, Deserialize)]
pub struct SecurityGroupConfig {
    pub application: String,
    pub environment: String,
    pub owner: String,
    pub sg_name: String,
    pub vpc_id: String,

    #[serde(default)]
    pub rules: Vec<IngressRule>,
}

/// One ingress permission. Exactly one of `cidr_ip` and
/// `source_security_group_id` must be set; the builder rejects anything else.
#[derive(Debug, Clone, Deserialize)]
pub struct IngressRule {
    pub ip_protocol: String,

    /// -1 together with ip_protocol "icmp" means all ICMP types.
    pub from_port: i64,
    pub to_port: i64,

    #[serde(default)]
    pub cidr_ip: Option<String>,

    #[serde(default)]
    pub source_security_group_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_required_network_key_fails_at_parse() {
        // owner_email left out
        let toml_text = r#"
            [network]
            application = "vpn"
            owner_name  = "Jane"
            vpc_cidr    = "10.0.0.0/16"
            num_az      = 2
            subnets     = []
        "#;
        let err = toml::from_str::<Config>(toml_text).unwrap_err();
        assert!(err.to_string().contains("owner_email"));
    }

    #[test]
    fn section_accessors_name_the_missing_section() {
        let cfg: Config = toml::from_str("").unwrap();
        let err = cfg.network().unwrap_err();
        assert!(err.to_string().contains("[network]"));
    }

    #[test]
    fn tier_flags_default_to_false() {
        let tier: SubnetTier = toml::from_str(
            r#"
            tier     = "data"
            az_cidrs = ["10.0.5."]
            suffix   = "0/24"
        "#,
        )
        .unwrap();
        assert!(!tier.use_igw);
        assert!(!tier.use_nat);
    }

    #[test]
    fn ingress_rule_sources_are_optional_at_parse_time() {
        // Parse accepts it; the security-group builder is what rejects it.
        let rule: IngressRule = toml::from_str(
            r#"
            ip_protocol = "tcp"
            from_port   = 443
            to_port     = 443
        "#,
        )
        .unwrap();
        assert!(rule.cidr_ip.is_none());
        assert!(rule.source_security_group_id.is_none());
    }
}
