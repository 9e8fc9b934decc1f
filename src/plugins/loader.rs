//! Plugin loader
//!
//! Turns plugin specs into live connectors. Every failure is logged and
//! isolated to the plugin that caused it; `load_all` never fails.

use super::connector::Connector;
use super::native::{module_name, NativeRegistry};
use super::process::ProcessConnector;
use super::search_path::{self, SearchPathGuard};
use crate::config::{HostSettings, PluginKind, PluginSpec};
use crate::error::LoadError;
use crate::safe_zone::SafeZone;
use crate::secrets::SecretsProvider;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Loaded connectors in configuration order
#[derive(Clone, Default)]
pub struct LoadedPlugins {
    entries: Vec<(String, Arc<dyn Connector>)>,
}

impl LoadedPlugins {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connector; an existing id keeps its position and gets the new instance
    pub fn insert(&mut self, id: String, connector: Arc<dyn Connector>) {
        match self.entries.iter_mut().find(|(existing, _)| *existing == id) {
            Some(entry) => entry.1 = connector,
            None => self.entries.push((id, connector)),
        }
    }

    pub fn get(&self, id: &str) -> Option<&Arc<dyn Connector>> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == id)
            .map(|(_, connector)| connector)
    }

    pub fn contains_key(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.entries.iter().map(|(id, _)| id.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<dyn Connector>)> {
        self.entries.iter().map(|(id, connector)| (id.as_str(), connector))
    }
}

#[cfg(test)]
impl std::ops::Index<&str> for LoadedPlugins {
    type Output = Arc<dyn Connector>;

    fn index(&self, id: &str) -> &Self::Output {
        match self.get(id) {
            Some(connector) => connector,
            None => panic!("no loaded plugin '{}'", id),
        }
    }
}

impl std::fmt::Debug for LoadedPlugins {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.ids()).finish()
    }
}

impl FromIterator<(String, Arc<dyn Connector>)> for LoadedPlugins {
    fn from_iter<I: IntoIterator<Item = (String, Arc<dyn Connector>)>>(iter: I) -> Self {
        let mut loaded = Self::new();
        for (id, connector) in iter {
            loaded.insert(id, connector);
        }
        loaded
    }
}

/// Loads connectors from plugin specs
pub struct PluginLoader {
    secrets: Arc<dyn SecretsProvider>,
    natives: NativeRegistry,
    safe_zone: Option<SafeZone>,
    timeout: Duration,
}

impl PluginLoader {
    /// Create a loader with the built-in native connectors
    pub fn new(settings: &HostSettings, secrets: Arc<dyn SecretsProvider>) -> Self {
        Self::with_natives(settings, secrets, NativeRegistry::with_builtins())
    }

    /// Create a loader with an explicit native registry
    pub fn with_natives(
        settings: &HostSettings,
        secrets: Arc<dyn SecretsProvider>,
        natives: NativeRegistry,
    ) -> Self {
        let safe_zone = match settings.safe_zone() {
            Ok(zone) => Some(zone),
            Err(e) => {
                // Without a zone no file plugin can be admitted
                error!("Safe zone unavailable, file plugins will not load: {}", e);
                None
            }
        };

        for dir in &settings.search_paths {
            search_path::append(dir);
        }

        Self {
            secrets,
            natives,
            safe_zone,
            timeout: Duration::from_secs(settings.plugin_timeout),
        }
    }

    /// Load every spec, one at a time. Plugins that fail are omitted.
    pub fn load_all(&self, specs: &[PluginSpec]) -> LoadedPlugins {
        let mut loaded = LoadedPlugins::new();

        for spec in specs {
            match self.load_plugin(spec) {
                Ok(Some(connector)) => {
                    info!("Loaded plugin '{}'", spec.id);
                    loaded.insert(spec.id.clone(), connector);
                }
                Ok(None) => {}
                Err(e) => warn!("Failed to load plugin '{}': {}", spec.id, e),
            }
        }

        info!("Loaded {} of {} plugins", loaded.len(), specs.len());
        loaded
    }

    /// Load one plugin. `Ok(None)` means the kind is not supported.
    pub fn load_plugin(&self, spec: &PluginSpec) -> Result<Option<Arc<dyn Connector>>, LoadError> {
        match &spec.kind {
            PluginKind::Local => self.load_local(spec).map(Some),
            PluginKind::Native => self.load_native(spec).map(Some),
            PluginKind::Unsupported(kind) => {
                info!(
                    "Skipping plugin '{}': unsupported plugin type '{}'",
                    spec.id, kind
                );
                Ok(None)
            }
        }
    }

    fn load_local(&self, spec: &PluginSpec) -> Result<Arc<dyn Connector>, LoadError> {
        let raw_path = spec.path.as_ref().ok_or(LoadError::MissingPath)?;
        let zone = self.safe_zone.as_ref().ok_or_else(|| {
            LoadError::Construction("no safe zone configured for file plugins".to_string())
        })?;

        // Checked before anything touches the file
        let path = zone.resolve(raw_path)?;

        if !path.is_file() {
            return Err(LoadError::NotFound(path));
        }
        if !is_executable(&path) {
            return Err(LoadError::NotExecutable(path));
        }

        let _lock = search_path::lock_loading();
        let guard = SearchPathGuard::push(search_path::plugin_dirs(&path));
        debug!(
            "Loading plugin '{}' from {:?} with search path additions {:?}",
            spec.id,
            path,
            guard.added()
        );

        let secrets = self.secrets.as_ref();
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            ProcessConnector::new(&spec.id, &path, &spec.env, self.timeout, secrets)
        }));
        drop(guard);

        match result {
            Ok(connector) => Ok(Arc::new(connector?)),
            Err(payload) => Err(LoadError::Panicked(panic_message(payload.as_ref()))),
        }
    }

    fn load_native(&self, spec: &PluginSpec) -> Result<Arc<dyn Connector>, LoadError> {
        let module = module_name(&spec.id);
        let factory = self
            .natives
            .resolve(&spec.id)
            .ok_or_else(|| LoadError::UnknownNative(module.clone()))?;
        debug!("Constructing native plugin '{}' from module '{}'", spec.id, module);

        let secrets = Arc::clone(&self.secrets);
        match panic::catch_unwind(AssertUnwindSafe(|| factory(secrets))) {
            Ok(Ok(connector)) => Ok(connector),
            Ok(Err(e)) => Err(LoadError::Construction(format!("{:#}", e))),
            Err(payload) => Err(LoadError::Panicked(panic_message(payload.as_ref()))),
        }
    }
}

/// Text of a panic payload
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Check if a file is executable
#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(meta) = fs::metadata(path) {
        let mode = meta.permissions().mode();
        mode & 0o111 != 0
    } else {
        false
    }
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    fs::metadata(path).map(|m| m.is_file()).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConnectorError;
    use crate::identity::CallerIdentity;
    use crate::plugins::connector::ToolDefinition;
    use crate::secrets::MemorySecrets;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::path::PathBuf;
    use tempfile::TempDir;

    struct Counter {
        calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl Connector for Counter {
        fn list_tools(&self) -> Result<Vec<ToolDefinition>, ConnectorError> {
            Ok(vec![ToolDefinition::new("count", "Count calls")])
        }

        async fn execute(
            &self,
            _tool_name: &str,
            _arguments: Value,
            _identity: Option<CallerIdentity>,
        ) -> Result<Value, ConnectorError> {
            let n = self
                .calls
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(json!(n + 1))
        }
    }

    fn counter(_secrets: Arc<dyn SecretsProvider>) -> anyhow::Result<Arc<dyn Connector>> {
        Ok(Arc::new(Counter {
            calls: std::sync::atomic::AtomicUsize::new(0),
        }))
    }

    fn failing(secrets: Arc<dyn SecretsProvider>) -> anyhow::Result<Arc<dyn Connector>> {
        let key = secrets.get_secret("REQUIRED_KEY")?;
        anyhow::bail!("bad key {}", key)
    }

    fn panicking(_secrets: Arc<dyn SecretsProvider>) -> anyhow::Result<Arc<dyn Connector>> {
        panic!("constructor exploded")
    }

    fn natives() -> NativeRegistry {
        let mut natives = NativeRegistry::new();
        natives.register("counter", counter);
        natives.register("counter_copy", counter);
        natives.register("failing", failing);
        natives.register("panicking", panicking);
        natives
    }

    fn settings(root: &Path) -> HostSettings {
        HostSettings {
            safe_zone: Some(root.to_path_buf()),
            plugin_timeout: 10,
            ..HostSettings::default()
        }
    }

    fn loader(root: &Path) -> PluginLoader {
        PluginLoader::with_natives(&settings(root), Arc::new(MemorySecrets::new()), natives())
    }

    fn native(id: &str) -> PluginSpec {
        PluginSpec::new(id, PluginKind::Native)
    }

    fn local(id: &str, path: &str) -> PluginSpec {
        PluginSpec {
            path: Some(PathBuf::from(path)),
            ..PluginSpec::new(id, PluginKind::Local)
        }
    }

    fn locked_snapshot() -> Vec<PathBuf> {
        let _lock = search_path::lock_loading();
        search_path::snapshot()
    }

    #[test]
    fn test_native_load_by_module_name() {
        let dir = TempDir::new().unwrap();
        let plugins = loader(dir.path()).load_all(&[native("counter")]);
        assert!(plugins.contains_key("counter"));
        assert_eq!(plugins["counter"].list_tools().unwrap()[0].name, "count");
    }

    #[test]
    fn test_native_hyphenated_id() {
        let dir = TempDir::new().unwrap();
        let plugins = loader(dir.path()).load_all(&[native("counter-copy")]);
        assert!(plugins.contains_key("counter-copy"));
    }

    #[test]
    fn test_unknown_native_skipped() {
        let dir = TempDir::new().unwrap();
        let plugins = loader(dir.path()).load_all(&[native("calendar")]);
        assert!(plugins.is_empty());
    }

    #[test]
    fn test_unsupported_type_skipped() {
        let dir = TempDir::new().unwrap();
        let spec = PluginSpec::new("openapi-plugin", PluginKind::Unsupported("openapi".into()));
        let loader = loader(dir.path());

        assert!(loader.load_plugin(&spec).unwrap().is_none());
        assert!(loader.load_all(&[spec]).is_empty());
    }

    #[test]
    fn test_construction_failure_is_isolated() {
        let dir = TempDir::new().unwrap();
        let specs = vec![
            native("counter"),
            native("failing"),
            native("panicking"),
            native("counter-copy"),
        ];

        let plugins = loader(dir.path()).load_all(&specs);

        assert_eq!(plugins.len(), 2);
        assert!(plugins.contains_key("counter"));
        assert!(plugins.contains_key("counter-copy"));
        assert!(!plugins.contains_key("failing"));
        assert!(!plugins.contains_key("panicking"));
    }

    #[test]
    fn test_secret_lookup_failure_aborts_construction() {
        let dir = TempDir::new().unwrap();
        let err = match loader(dir.path()).load_plugin(&native("failing")) {
            Err(e) => e,
            Ok(_) => panic!("expected construction failure"),
        };
        assert!(matches!(err, LoadError::Construction(_)));
        assert!(err.to_string().contains("Secret 'REQUIRED_KEY' not found"));
    }

    #[tokio::test]
    async fn test_same_factory_gives_distinct_instances() {
        let dir = TempDir::new().unwrap();
        let plugins = loader(dir.path()).load_all(&[native("counter"), native("counter-copy")]);
        let a = &plugins["counter"];
        let b = &plugins["counter-copy"];
        assert!(!Arc::ptr_eq(a, b));

        assert_eq!(a.execute("count", json!({}), None).await.unwrap(), json!(1));
        assert_eq!(a.execute("count", json!({}), None).await.unwrap(), json!(2));
        assert_eq!(b.execute("count", json!({}), None).await.unwrap(), json!(1));
    }

    #[test]
    fn test_local_missing_path() {
        let dir = TempDir::new().unwrap();
        let spec = PluginSpec::new("no-path-plugin", PluginKind::Local);
        assert!(matches!(
            loader(dir.path()).load_plugin(&spec),
            Err(LoadError::MissingPath)
        ));
    }

    #[test]
    fn test_local_missing_file() {
        let dir = TempDir::new().unwrap();
        let spec = local("missing-plugin", "non_existent.sh");
        assert!(matches!(
            loader(dir.path()).load_plugin(&spec),
            Err(LoadError::NotFound(_))
        ));
    }

    #[test]
    fn test_local_unsafe_paths_rejected() {
        let dir = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let outside_file = outside.path().join("unsafe.sh");
        fs::write(&outside_file, "#!/bin/sh\n").unwrap();

        let loader = loader(dir.path());
        for path in [
            outside_file.to_str().unwrap(),
            "../../etc/passwd",
            "safe_folder/../../unsafe_file.sh",
        ] {
            let result = loader.load_plugin(&local("unsafe", path));
            assert!(
                matches!(result, Err(LoadError::UnsafePath(_))),
                "{path} should be rejected"
            );
        }
        assert!(loader.load_all(&[local("unsafe", "../../etc/passwd")]).is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_local_not_executable() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("plain.sh"), "#!/bin/sh\n").unwrap();
        assert!(matches!(
            loader(dir.path()).load_plugin(&local("plain", "plain.sh")),
            Err(LoadError::NotExecutable(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_local_plugin_loads_and_restores_search_path() {
        use crate::plugins::process::tests::{write_plugin, ECHO_TOOLS};

        let dir = TempDir::new().unwrap();
        let adapters = dir.path().join("libs/adapters");
        fs::create_dir_all(&adapters).unwrap();
        write_plugin(&adapters, "valid.sh", ECHO_TOOLS, r#"reply='"success":true,"result":"ok"'"#);
        // A contract-less executable fails after the search path was pushed
        let broken = adapters.join("broken.sh");
        fs::write(&broken, "#!/bin/sh\nexit 3\n").unwrap();
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&broken, fs::Permissions::from_mode(0o755)).unwrap();
        }

        let before = locked_snapshot();
        let plugins = loader(dir.path()).load_all(&[
            local("broken", "libs/adapters/broken.sh"),
            local("valid-plugin", "libs/adapters/valid.sh"),
        ]);
        assert_eq!(locked_snapshot(), before);

        assert!(!plugins.contains_key("broken"));
        assert!(plugins.contains_key("valid-plugin"));
        assert_eq!(plugins["valid-plugin"].list_tools().unwrap()[0].name, "echo");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_same_source_loads_as_distinct_plugins() {
        use crate::plugins::process::tests::{write_plugin, ECHO_TOOLS};

        let dir = TempDir::new().unwrap();
        for sub in ["one", "two"] {
            let sub_dir = dir.path().join(sub);
            fs::create_dir_all(&sub_dir).unwrap();
            write_plugin(
                &sub_dir,
                "adapter.sh",
                ECHO_TOOLS,
                r#"reply="\"success\":true,\"result\":\"$CONNECT_PLUGIN_ID\"""#,
            );
        }

        let plugins = loader(dir.path()).load_all(&[
            local("first", "one/adapter.sh"),
            local("second", "two/adapter.sh"),
        ]);
        let first = &plugins["first"];
        let second = &plugins["second"];
        assert!(!Arc::ptr_eq(first, second));

        assert_eq!(first.execute("echo", json!({}), None).await.unwrap(), json!("first"));
        assert_eq!(second.execute("echo", json!({}), None).await.unwrap(), json!("second"));
    }

    #[test]
    fn test_load_order_follows_config() {
        let dir = TempDir::new().unwrap();
        let plugins = loader(dir.path()).load_all(&[native("counter-copy"), native("counter")]);
        assert_eq!(plugins.ids(), vec!["counter-copy", "counter"]);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
    }
}
