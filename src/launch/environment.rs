//! Environment exported to the launched process group.

use rand::Rng;

use super::command::shell_quote;
use crate::config::LaunchConfig;

/// Ports drawn for the rendezvous when none is configured
pub const MASTER_PORT_RANGE: std::ops::RangeInclusive<u16> = 10000..=65535;

/// Use the configured port, or draw one at random
pub fn resolve_master_port(configured: Option<u16>) -> u16 {
    configured.unwrap_or_else(|| rand::rng().random_range(MASTER_PORT_RANGE))
}

/// Ordered environment variables for the child process
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Environment {
    vars: Vec<(String, String)>,
}

impl Environment {
    /// Build the environment for a launch.
    ///
    /// `inherited_pythonpath` is the caller's current `PYTHONPATH`; configured
    /// entries are placed before it.
    pub fn resolve(launch: &LaunchConfig, master_port: u16, inherited_pythonpath: Option<&str>) -> Self {
        let mut vars: Vec<(String, String)> = launch
            .nccl
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        vars.push(("MASTER_PORT".to_string(), master_port.to_string()));

        let mut entries: Vec<String> = launch
            .python_path
            .iter()
            .map(|p| p.display().to_string())
            .collect();
        if let Some(inherited) = inherited_pythonpath.filter(|p| !p.is_empty()) {
            entries.push(inherited.to_string());
        }
        if !entries.is_empty() {
            vars.push(("PYTHONPATH".to_string(), entries.join(":")));
        }

        Self { vars }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// `KEY=value` prefix form, as written before a shell command
    pub fn render(&self) -> String {
        self.vars
            .iter()
            .map(|(k, v)| format!("{}={}", k, shell_quote(v)))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_resolve_defaults() {
        let env = Environment::resolve(&LaunchConfig::default(), 24000, None);

        assert_eq!(env.get("NCCL_DEBUG"), Some("info"));
        assert_eq!(env.get("NCCL_IB_DISABLE"), Some("0"));
        assert_eq!(env.get("NCCL_NET_GDR_LEVEL"), Some("2"));
        assert_eq!(env.get("MASTER_PORT"), Some("24000"));
        assert_eq!(env.get("PYTHONPATH"), None);
        assert_eq!(env.len(), 4);
    }

    #[test]
    fn test_pythonpath_prepends() {
        let launch = LaunchConfig {
            python_path: vec![PathBuf::from("/opt/sat"), PathBuf::from("/opt/glm")],
            ..Default::default()
        };

        let env = Environment::resolve(&launch, 24000, Some("/usr/lib/py"));
        assert_eq!(env.get("PYTHONPATH"), Some("/opt/sat:/opt/glm:/usr/lib/py"));

        let env = Environment::resolve(&LaunchConfig::default(), 24000, Some("/usr/lib/py"));
        assert_eq!(env.get("PYTHONPATH"), Some("/usr/lib/py"));
    }

    #[test]
    fn test_master_port() {
        assert_eq!(resolve_master_port(Some(29500)), 29500);
        for _ in 0..32 {
            assert!(MASTER_PORT_RANGE.contains(&resolve_master_port(None)));
        }
    }

    #[test]
    fn test_render() {
        let env = Environment::resolve(&LaunchConfig::default(), 24000, None);
        assert_eq!(
            env.render(),
            "NCCL_DEBUG=info NCCL_IB_DISABLE=0 NCCL_NET_GDR_LEVEL=2 MASTER_PORT=24000"
        );
    }

    #[test]
    fn test_render_quotes_values() {
        let launch = LaunchConfig {
            python_path: vec![PathBuf::from("/opt/my models")],
            ..Default::default()
        };

        let env = Environment::resolve(&launch, 24000, Some("/usr/lib/py"));
        assert!(env.render().ends_with("MASTER_PORT=24000 PYTHONPATH='/opt/my models:/usr/lib/py'"));
    }
}
