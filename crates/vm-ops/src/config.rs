use std::path::PathBuf;

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing::debug;

use crate::backends::KubeClient;
use crate::error::{Result, VmOpsError};

/// How to reach the cluster, as given on the command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientSettings {
    /// Explicit kubeconfig file; otherwise the usual lookup chain applies.
    pub kubeconfig: Option<PathBuf>,
    /// Kubeconfig context to use instead of the current one.
    pub context: Option<String>,
    /// Namespace override. Falls back to the context's namespace.
    pub namespace: Option<String>,
}

fn client_config_error(e: impl std::fmt::Display) -> VmOpsError {
    VmOpsError::ClientConfig {
        detail: e.to_string(),
    }
}

impl ClientSettings {
    pub async fn load_config(&self) -> Result<Config> {
        let options = KubeConfigOptions {
            context: self.context.clone(),
            ..Default::default()
        };
        match (&self.kubeconfig, &self.context) {
            (Some(path), _) => {
                debug!(path = %path.display(), context = ?self.context, "loading kubeconfig");
                let kubeconfig = Kubeconfig::read_from(path).map_err(client_config_error)?;
                Config::from_custom_kubeconfig(kubeconfig, &options)
                    .await
                    .map_err(client_config_error)
            }
            (None, Some(context)) => {
                debug!(context = %context, "loading kubeconfig context");
                Config::from_kubeconfig(&options)
                    .await
                    .map_err(client_config_error)
            }
            (None, None) => Config::infer().await.map_err(client_config_error),
        }
    }

    /// The namespace operations run in: the override, then the config's default.
    pub fn namespace(&self, config: &Config) -> String {
        self.namespace
            .clone()
            .filter(|ns| !ns.is_empty())
            .unwrap_or_else(|| config.default_namespace.clone())
    }

    pub async fn connect(&self) -> Result<(KubeClient, String)> {
        let config = self.load_config().await?;
        let namespace = self.namespace(&config);
        debug!(cluster = %config.cluster_url, namespace = %namespace, "connecting");
        let client = Client::try_from(config).map_err(client_config_error)?;
        Ok((KubeClient::new(client), namespace))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const KUBECONFIG: &str = r#"
apiVersion: v1
kind: Config
current-context: dev
clusters:
- name: local
  cluster:
    server: https://127.0.0.1:6443
    insecure-skip-tls-verify: true
users:
- name: admin
  user:
    token: abc123
contexts:
- name: dev
  context:
    cluster: local
    user: admin
    namespace: vms
- name: bare
  context:
    cluster: local
    user: admin
"#;

    fn kubeconfig_file() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(KUBECONFIG.as_bytes()).unwrap();
        file
    }

    #[tokio::test]
    async fn context_namespace_is_the_default() {
        let file = kubeconfig_file();
        let settings = ClientSettings {
            kubeconfig: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        let config = settings.load_config().await.unwrap();
        assert_eq!(config.cluster_url.host(), Some("127.0.0.1"));
        assert_eq!(settings.namespace(&config), "vms");
    }

    #[tokio::test]
    async fn flag_overrides_context_namespace() {
        let file = kubeconfig_file();
        let settings = ClientSettings {
            kubeconfig: Some(file.path().to_path_buf()),
            context: Some("bare".into()),
            namespace: Some("prod".into()),
        };
        let config = settings.load_config().await.unwrap();
        assert_eq!(settings.namespace(&config), "prod");

        let no_override = ClientSettings {
            namespace: None,
            ..settings
        };
        assert_eq!(no_override.namespace(&config), "default");
    }

    #[tokio::test]
    async fn unknown_context_is_a_config_error() {
        let file = kubeconfig_file();
        let settings = ClientSettings {
            kubeconfig: Some(file.path().to_path_buf()),
            context: Some("missing".into()),
            namespace: None,
        };
        let err = settings.load_config().await.unwrap_err();
        assert!(matches!(err, VmOpsError::ClientConfig { .. }));
    }

    #[tokio::test]
    async fn unreadable_kubeconfig_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let settings = ClientSettings {
            kubeconfig: Some(dir.path().join("absent")),
            ..Default::default()
        };
        let err = settings.load_config().await.unwrap_err();
        assert!(err.to_string().starts_with("cannot obtain cluster client"));
    }
}
