//! Filesystem boundaries ("roots") advertised to connected servers.
//!
//! The [`RootsManager`] owns the root list. Readers get an `Arc` snapshot;
//! every mutation swaps in a new list, so a reader never observes a
//! half-applied change. Listeners always receive the full list.

use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use tracing::{debug, info};
use url::Url;

use crate::error::{McpError, McpResult};

/// A filesystem boundary.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Root {
    /// Normalized absolute `file://` URI.
    pub uri: String,
    /// Display name.
    pub name: String,
}

impl Root {
    /// Create a root from a URI and a name. The URI is taken as given.
    #[must_use]
    pub fn new(uri: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            name: name.into(),
        }
    }

    /// Create a root for a filesystem path.
    ///
    /// # Errors
    ///
    /// Returns an error if the path cannot be expressed as a `file://` URI.
    pub fn from_path(path: &Path, name: impl Into<String>) -> McpResult<Self> {
        Ok(Self::new(path_to_uri(path)?, name))
    }
}

/// A manifest that marks a directory as a workspace root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceMarker {
    /// Manifest file name.
    pub file: String,
    /// Text the manifest must contain; any content matches when unset.
    pub contains: Option<String>,
}

impl WorkspaceMarker {
    fn new(file: &str, contains: Option<&str>) -> Self {
        Self {
            file: file.to_string(),
            contains: contains.map(String::from),
        }
    }

    fn matches(&self, dir: &Path) -> bool {
        let manifest = dir.join(&self.file);
        if !manifest.is_file() {
            return false;
        }
        match &self.contains {
            None => true,
            Some(needle) => std::fs::read_to_string(&manifest)
                .map(|content| content.contains(needle.as_str()))
                .unwrap_or(false),
        }
    }
}

/// Roots discovery settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct RootsConfig {
    /// Include the working directory.
    #[serde(default = "default_true")]
    pub include_cwd: bool,
    /// Include the user's home directory.
    #[serde(default)]
    pub include_home: bool,
    /// Walk upward looking for a workspace manifest.
    #[serde(default = "default_true")]
    pub detect_workspace: bool,
    /// Maximum number of parent hops during the upward walk.
    #[serde(default = "default_max_walk_depth")]
    pub max_walk_depth: usize,
    /// Manifests identifying a workspace root.
    #[serde(default = "default_workspace_markers")]
    pub workspace_markers: Vec<WorkspaceMarker>,
    /// Sub-package directory names picked up under a workspace root.
    #[serde(default = "default_sub_package_dirs")]
    pub sub_package_dirs: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_max_walk_depth() -> usize {
    10
}

fn default_workspace_markers() -> Vec<WorkspaceMarker> {
    vec![
        WorkspaceMarker::new("package.json", Some("\"workspaces\"")),
        WorkspaceMarker::new("Cargo.toml", Some("[workspace]")),
        WorkspaceMarker::new("pnpm-workspace.yaml", None),
    ]
}

fn default_sub_package_dirs() -> Vec<String> {
    ["packages", "crates", "apps", "servers"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for RootsConfig {
    fn default() -> Self {
        Self {
            include_cwd: true,
            include_home: false,
            detect_workspace: true,
            max_walk_depth: default_max_walk_depth(),
            workspace_markers: default_workspace_markers(),
            sub_package_dirs: default_sub_package_dirs(),
        }
    }
}

type Listener = Arc<dyn Fn(&[Root]) + Send + Sync>;
type ListenerList = Mutex<Vec<(u64, Listener)>>;

/// Handle returned by [`RootsManager::on_roots_changed`].
///
/// Dropping the handle keeps the listener registered; call
/// [`unsubscribe`](Self::unsubscribe) to remove it.
#[derive(Debug)]
#[must_use = "keep the subscription to be able to unsubscribe"]
pub struct RootsSubscription {
    id: u64,
    listeners: Weak<ListenerList>,
}

impl RootsSubscription {
    /// Remove the listener. Safe to call after the manager is gone.
    pub fn unsubscribe(self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|(id, _)| *id != self.id);
        }
    }
}

/// Owner of the root list.
pub struct RootsManager {
    config: RootsConfig,
    cwd: Option<PathBuf>,
    home: Option<PathBuf>,
    roots: RwLock<Arc<Vec<Root>>>,
    listeners: Arc<ListenerList>,
    next_listener_id: AtomicU64,
}

impl RootsManager {
    /// Create a manager with no roots.
    #[must_use]
    pub fn new(config: RootsConfig) -> Self {
        Self {
            config,
            cwd: None,
            home: None,
            roots: RwLock::new(Arc::new(Vec::new())),
            listeners: Arc::new(Mutex::new(Vec::new())),
            next_listener_id: AtomicU64::new(0),
        }
    }

    /// Discover from `cwd` instead of the process working directory.
    #[must_use]
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Use `home` instead of the user's home directory.
    #[must_use]
    pub fn with_home(mut self, home: impl Into<PathBuf>) -> Self {
        self.home = Some(home.into());
        self
    }

    /// Get the configuration.
    #[must_use]
    pub fn config(&self) -> &RootsConfig {
        &self.config
    }

    /// Discover roots and replace the current list.
    ///
    /// Order: working directory, workspace root, its sub-package
    /// directories, home. Duplicates are dropped. Listeners are not
    /// notified; the caller broadcasts the initial list.
    ///
    /// # Errors
    ///
    /// Returns an error if the working directory cannot be determined.
    pub fn initialize(&self) -> McpResult<Vec<Root>> {
        let cwd = match &self.cwd {
            Some(cwd) => normalize_path(cwd),
            None => std::env::current_dir()?,
        };

        let mut discovered = Vec::new();

        if self.config.include_cwd {
            discovered.push(Root::from_path(&cwd, "Working Directory")?);
        }

        if self.config.detect_workspace {
            if let Some(workspace) = self.find_workspace_root(&cwd) {
                discovered.push(Root::from_path(
                    &workspace,
                    format!("Workspace ({})", dir_name(&workspace)),
                )?);
                for sub in self.sub_packages(&workspace) {
                    discovered.push(Root::from_path(&sub, dir_name(&sub))?);
                }
            }
        }

        if self.config.include_home {
            let home = self.home.clone().or_else(|| {
                directories::BaseDirs::new().map(|dirs| dirs.home_dir().to_path_buf())
            });
            if let Some(home) = home {
                discovered.push(Root::from_path(&home, "Home")?);
            }
        }

        let roots = dedup_by_uri(discovered);
        info!(count = roots.len(), "Roots initialized");
        *self.write_lock() = Arc::new(roots.clone());
        Ok(roots)
    }

    /// Nearest ancestor of `start` (inclusive) carrying a workspace marker.
    ///
    /// At most `max_walk_depth` parent hops are taken.
    #[must_use]
    pub fn find_workspace_root(&self, start: &Path) -> Option<PathBuf> {
        let mut dir = Some(start);
        let mut hops = 0usize;

        while let Some(current) = dir {
            if self
                .config
                .workspace_markers
                .iter()
                .any(|marker| marker.matches(current))
            {
                debug!(path = %current.display(), "Workspace root detected");
                return Some(current.to_path_buf());
            }
            if hops >= self.config.max_walk_depth {
                break;
            }
            hops = hops.saturating_add(1);
            dir = current.parent();
        }

        None
    }

    fn sub_packages(&self, workspace: &Path) -> Vec<PathBuf> {
        let Ok(entries) = std::fs::read_dir(workspace) else {
            return Vec::new();
        };

        let mut found: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_ok_and(|t| t.is_dir()))
            .filter(|entry| {
                let name = entry.file_name();
                self.config
                    .sub_package_dirs
                    .iter()
                    .any(|allowed| name.to_str() == Some(allowed.as_str()))
            })
            .map(|entry| entry.path())
            .collect();
        found.sort();
        found
    }

    /// Current roots, copied.
    #[must_use]
    pub fn roots(&self) -> Vec<Root> {
        self.snapshot().as_ref().clone()
    }

    /// Current roots as a shared snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<Vec<Root>> {
        Arc::clone(&self.roots.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Add a root. Adding a URI that is already present changes nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if `uri` is not a valid `file://` URI.
    pub fn add_root(&self, uri: &str, name: impl Into<String>) -> McpResult<()> {
        let uri = normalize_uri(uri)?;
        let updated = {
            let mut guard = self.write_lock();
            if guard.iter().any(|r| r.uri == uri) {
                return Ok(());
            }
            let mut next = guard.as_ref().clone();
            next.push(Root::new(uri, name));
            *guard = Arc::new(next);
            Arc::clone(&guard)
        };
        self.notify(&updated);
        Ok(())
    }

    /// Remove the root with `uri`. Returns whether one was removed.
    pub fn remove_root(&self, uri: &str) -> bool {
        let uri = normalize_uri(uri).unwrap_or_else(|_| uri.to_string());
        let updated = {
            let mut guard = self.write_lock();
            if !guard.iter().any(|r| r.uri == uri) {
                return false;
            }
            let next: Vec<Root> = guard.iter().filter(|r| r.uri != uri).cloned().collect();
            *guard = Arc::new(next);
            Arc::clone(&guard)
        };
        self.notify(&updated);
        true
    }

    /// Replace every root.
    ///
    /// # Errors
    ///
    /// Returns an error if any URI is not a valid `file://` URI; the list is
    /// left unchanged in that case.
    pub fn set_roots(&self, roots: Vec<Root>) -> McpResult<()> {
        let normalized = roots
            .into_iter()
            .map(|root| Ok(Root::new(normalize_uri(&root.uri)?, root.name)))
            .collect::<McpResult<Vec<_>>>()?;

        let updated = Arc::new(dedup_by_uri(normalized));
        *self.write_lock() = Arc::clone(&updated);
        self.notify(&updated);
        Ok(())
    }

    /// Whether `path` lies inside any root.
    #[must_use]
    pub fn is_within_roots(&self, path: &Path) -> bool {
        self.get_root_for_path(path).is_some()
    }

    /// The most specific root containing `path`.
    ///
    /// Matching is by whole path segments, so `/a/bc` is not inside `/a/b`.
    #[must_use]
    pub fn get_root_for_path(&self, path: &Path) -> Option<Root> {
        let target = normalize_path(path);
        self.snapshot()
            .iter()
            .filter_map(|root| {
                let root_path = uri_to_path(&root.uri).ok()?;
                target
                    .starts_with(&root_path)
                    .then(|| (root_path.components().count(), root))
            })
            .max_by_key(|(depth, _)| *depth)
            .map(|(_, root)| root.clone())
    }

    /// Register a listener for root list changes.
    pub fn on_roots_changed<F>(&self, listener: F) -> RootsSubscription
    where
        F: Fn(&[Root]) + Send + Sync + 'static,
    {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(listener)));
        RootsSubscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    fn notify(&self, roots: &[Root]) {
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();

        debug!(
            count = roots.len(),
            listeners = listeners.len(),
            "Roots changed"
        );
        for listener in listeners {
            listener(roots);
        }
    }

    fn write_lock(&self) -> std::sync::RwLockWriteGuard<'_, Arc<Vec<Root>>> {
        self.roots.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for RootsManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootsManager")
            .field("config", &self.config)
            .field("roots", &self.snapshot())
            .finish_non_exhaustive()
    }
}

fn dir_name(path: &Path) -> String {
    path.file_name().map_or_else(
        || path.display().to_string(),
        |n| n.to_string_lossy().into_owned(),
    )
}

fn dedup_by_uri(roots: Vec<Root>) -> Vec<Root> {
    let mut seen = std::collections::HashSet::new();
    roots
        .into_iter()
        .filter(|root| seen.insert(root.uri.clone()))
        .collect()
}

fn normalize_uri(uri: &str) -> McpResult<String> {
    path_to_uri(&uri_to_path(uri)?)
}

/// Make `path` absolute and resolve `.` and `..` lexically.
///
/// Symlinks are not followed and the path need not exist.
#[must_use]
pub fn normalize_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir().map_or_else(|_| path.to_path_buf(), |cwd| cwd.join(path))
    };

    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::Prefix(_) | Component::RootDir | Component::Normal(_) => {
                normalized.push(component.as_os_str());
            },
            Component::CurDir => {},
            Component::ParentDir => {
                // Never pops past the root.
                if normalized.parent().is_some() {
                    normalized.pop();
                }
            },
        }
    }
    normalized
}

/// Convert a filesystem path to a normalized `file://` URI.
///
/// # Errors
///
/// Returns an error if the path cannot be represented as a URI.
pub fn path_to_uri(path: &Path) -> McpResult<String> {
    let normalized = normalize_path(path);
    Url::from_file_path(&normalized)
        .map(String::from)
        .map_err(|()| McpError::InvalidRootUri {
            uri: normalized.display().to_string(),
            reason: "path cannot be expressed as a file URI".to_string(),
        })
}

/// Convert a `file://` URI to a normalized filesystem path.
///
/// # Errors
///
/// Returns an error if `uri` does not parse, is not a `file` URI, or has
/// no local path.
pub fn uri_to_path(uri: &str) -> McpResult<PathBuf> {
    let invalid = |reason: String| McpError::InvalidRootUri {
        uri: uri.to_string(),
        reason,
    };

    let url = Url::parse(uri).map_err(|e| invalid(e.to_string()))?;
    if url.scheme() != "file" {
        return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
    }
    let path = url
        .to_file_path()
        .map_err(|()| invalid("no local path".to_string()))?;
    Ok(normalize_path(&path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn manager() -> RootsManager {
        RootsManager::new(RootsConfig::default())
    }

    #[test]
    fn test_normalize_path_lexical() {
        assert_eq!(
            normalize_path(Path::new("/a/./b/../c")),
            PathBuf::from("/a/c")
        );
        assert_eq!(normalize_path(Path::new("/../..")), PathBuf::from("/"));
    }

    #[test]
    fn test_path_uri_round_trip() {
        for raw in ["/tmp/project", "/tmp/a b/c", "/tmp/x/../y", "/"] {
            let uri = path_to_uri(Path::new(raw)).unwrap();
            assert!(uri.starts_with("file:///"));
            assert_eq!(uri_to_path(&uri).unwrap(), normalize_path(Path::new(raw)));
        }
    }

    #[test]
    fn test_path_to_uri_escapes_spaces() {
        let uri = path_to_uri(Path::new("/tmp/a b")).unwrap();
        assert_eq!(uri, "file:///tmp/a%20b");
    }

    #[test]
    fn test_uri_to_path_rejects_other_schemes() {
        let err = uri_to_path("https://example.com/x").unwrap_err();
        assert!(matches!(err, McpError::InvalidRootUri { .. }));
        assert!(uri_to_path("not a uri").is_err());
    }

    #[test]
    fn test_add_then_remove_restores_order() {
        let roots = manager();
        roots.add_root("file:///a", "a").unwrap();
        roots.add_root("file:///b", "b").unwrap();
        roots.add_root("file:///c", "c").unwrap();
        let before = roots.roots();

        roots.add_root("file:///d", "d").unwrap();
        assert!(roots.remove_root("file:///d"));
        assert_eq!(roots.roots(), before);

        assert!(roots.remove_root("file:///b"));
        let uris: Vec<_> = roots.roots().into_iter().map(|r| r.uri).collect();
        assert_eq!(uris, vec!["file:///a", "file:///c"]);
    }

    #[test]
    fn test_add_duplicate_is_noop() {
        let roots = manager();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let _sub = roots.on_roots_changed(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        roots.add_root("file:///a", "a").unwrap();
        roots.add_root("file:///a/./", "again").unwrap();
        assert_eq!(roots.roots().len(), 1);
        assert_eq!(roots.roots()[0].name, "a");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_add_root_rejects_invalid_uri() {
        let roots = manager();
        assert!(roots.add_root("http://host/x", "x").is_err());
        assert!(roots.roots().is_empty());
    }

    #[test]
    fn test_listeners_receive_full_list() {
        let roots = manager();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let sub = roots.on_roots_changed(move |list| {
            sink.lock().unwrap().push(list.len());
        });

        roots.add_root("file:///a", "a").unwrap();
        roots.add_root("file:///b", "b").unwrap();
        roots.remove_root("file:///a");
        assert!(!roots.remove_root("file:///missing"));
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 1]);

        sub.unsubscribe();
        roots.add_root("file:///c", "c").unwrap();
        assert_eq!(seen.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_set_roots_dedups_and_notifies() {
        let roots = manager();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let _sub = roots.on_roots_changed(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        roots
            .set_roots(vec![
                Root::new("file:///x", "x"),
                Root::new("file:///x/", "x again"),
                Root::new("file:///y", "y"),
            ])
            .unwrap();
        assert_eq!(roots.roots().len(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert!(roots.set_roots(vec![Root::new("ftp://x", "bad")]).is_err());
        assert_eq!(roots.roots().len(), 2);
    }

    #[test]
    fn test_snapshot_is_stable_across_mutation() {
        let roots = manager();
        roots.add_root("file:///a", "a").unwrap();
        let snapshot = roots.snapshot();
        roots.add_root("file:///b", "b").unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(roots.snapshot().len(), 2);
    }

    #[test]
    fn test_root_for_path_matches_segments() {
        let roots = manager();
        roots.add_root("file:///work", "work").unwrap();
        roots.add_root("file:///work/app", "app").unwrap();

        assert_eq!(
            roots
                .get_root_for_path(Path::new("/work/app/src/main.rs"))
                .map(|r| r.name),
            Some("app".to_string())
        );
        assert_eq!(
            roots
                .get_root_for_path(Path::new("/work/lib.rs"))
                .map(|r| r.name),
            Some("work".to_string())
        );
        assert!(!roots.is_within_roots(Path::new("/workshop/file")));
        assert!(roots.is_within_roots(Path::new("/work/app/../other")));
        assert!(!roots.is_within_roots(Path::new("/work/../etc/passwd")));
    }

    #[test]
    fn test_initialize_detects_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = dir.path().join("repo");
        let member = workspace.join("crates").join("core");
        std::fs::create_dir_all(&member).unwrap();
        std::fs::create_dir_all(workspace.join("apps")).unwrap();
        std::fs::create_dir_all(workspace.join("docs")).unwrap();
        std::fs::write(
            workspace.join("Cargo.toml"),
            "[workspace]\nmembers = [\"crates/*\"]\n",
        )
        .unwrap();

        let roots = RootsManager::new(RootsConfig::default()).with_cwd(&member);
        let found = roots.initialize().unwrap();

        let names: Vec<_> = found.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["Working Directory", "Workspace (repo)", "apps", "crates"]
        );
        assert_eq!(found[1].uri, path_to_uri(&workspace).unwrap());
        assert_eq!(roots.roots(), found);
    }

    #[test]
    fn test_initialize_ignores_plain_package_json() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("package.json"), r#"{"name": "x"}"#).unwrap();

        let roots = RootsManager::new(RootsConfig::default()).with_cwd(dir.path());
        let found = roots.initialize().unwrap();
        assert!(found.iter().all(|r| !r.name.starts_with("Workspace")));
    }

    #[test]
    fn test_initialize_dedups_cwd_and_workspace() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("pnpm-workspace.yaml"), "").unwrap();

        let config = RootsConfig {
            include_home: true,
            ..RootsConfig::default()
        };
        let roots = RootsManager::new(config)
            .with_cwd(dir.path())
            .with_home("/home/tester");
        let found = roots.initialize().unwrap();

        let names: Vec<_> = found.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["Working Directory", "Home"]);
    }

    #[test]
    fn test_walk_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("pnpm-workspace.yaml"), "").unwrap();
        let deep = dir.path().join("a").join("b").join("c");
        std::fs::create_dir_all(&deep).unwrap();

        let shallow = RootsManager::new(RootsConfig {
            max_walk_depth: 2,
            ..RootsConfig::default()
        });
        assert!(shallow.find_workspace_root(&deep).is_none());

        let deeper = RootsManager::new(RootsConfig {
            max_walk_depth: 3,
            ..RootsConfig::default()
        });
        assert_eq!(
            deeper.find_workspace_root(&deep),
            Some(dir.path().to_path_buf())
        );
    }

    #[test]
    fn test_unsubscribe_after_drop_is_safe() {
        let roots = manager();
        let sub = roots.on_roots_changed(|_| {});
        drop(roots);
        sub.unsubscribe();
    }
}
