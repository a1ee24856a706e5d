use std::path::PathBuf;
use std::time::Duration;

use clap::Args;

use crate::controller::Error;
use crate::crd::ProductName;

pub const DEFAULT_INSTALLATION_NAME: &str = "rhmi";
pub const DEFAULT_CERT_DIR: &str = "/etc/ssl/certs/webhook";

#[derive(Args, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct RunArgs {
    /// Namespace the operator and its Installation live in
    #[arg(long, env = "WATCH_NAMESPACE")]
    pub namespace: String,
    #[arg(long, env = "NAMESPACE_PREFIX", default_value = "redhat-rhmi-")]
    pub namespace_prefix: String,
    /// Comma separated; empty installs every product
    #[arg(long, env = "SELECTED_PRODUCTS", value_delimiter = ',')]
    pub selected_products: Vec<String>,
    #[arg(long, default_value = DEFAULT_INSTALLATION_NAME)]
    pub installation_name: String,
    #[arg(long, env = "WEBHOOK_PORT", default_value_t = 8090)]
    pub webhook_port: u16,
    #[arg(long, env = "CERT_DIR", default_value = DEFAULT_CERT_DIR)]
    pub cert_dir: PathBuf,
    #[arg(long, env = "WEBHOOKS_ENABLED", default_value_t = true, action = clap::ArgAction::Set)]
    pub webhooks_enabled: bool,
    /// Minutes an install may take before it is reported as overdue
    #[arg(long, default_value_t = 30)]
    pub install_sla_minutes: u64,
}

/// Validated process configuration, shared by every loop.
#[derive(Debug, Clone, PartialEq)]
pub struct OperatorConfig {
    pub namespace: String,
    pub namespace_prefix: String,
    pub selected_products: Vec<String>,
    pub installation_name: String,
    pub webhook_port: u16,
    pub cert_dir: PathBuf,
    pub webhooks_enabled: bool,
    pub install_sla: Duration,
}

impl TryFrom<RunArgs> for OperatorConfig {
    type Error = Error;

    fn try_from(args: RunArgs) -> Result<Self, Self::Error> {
        if args.namespace.trim().is_empty() {
            return Err(Error::InvalidConfig("operator namespace must be set".into()));
        }
        if args.namespace_prefix.trim().is_empty() {
            return Err(Error::InvalidConfig("namespace prefix must be set".into()));
        }

        let mut namespace_prefix = args.namespace_prefix.trim().to_string();
        if !namespace_prefix.ends_with('-') {
            namespace_prefix.push('-');
        }

        let selected_products = args
            .selected_products
            .iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .map(|p| {
                p.parse::<ProductName>()
                    .map(|name| name.as_str().to_string())
                    .map_err(Error::InvalidConfig)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(OperatorConfig {
            namespace: args.namespace,
            namespace_prefix,
            selected_products,
            installation_name: args.installation_name,
            webhook_port: args.webhook_port,
            cert_dir: args.cert_dir,
            webhooks_enabled: args.webhooks_enabled,
            install_sla: Duration::from_secs(args.install_sla_minutes * 60),
        })
    }
}

#[cfg(test)]
pub fn test_config() -> OperatorConfig {
    OperatorConfig {
        namespace: "rhmi-operator".into(),
        namespace_prefix: "prefix-".into(),
        selected_products: vec![],
        installation_name: DEFAULT_INSTALLATION_NAME.into(),
        webhook_port: 8090,
        cert_dir: PathBuf::from(DEFAULT_CERT_DIR),
        webhooks_enabled: true,
        install_sla: Duration::from_secs(30 * 60),
    }
}
