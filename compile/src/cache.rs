//! Download, verify and cache `protoc` releases.
//!
//! Releases live under `{base}/protobuf/{tag}/{os}/{arch}` with `bin/protoc`
//! and `include/`. Installs are serialized across processes with an
//! exclusive lock on `{base}/protobuf/{tag}.lock` and published by renaming
//! a fully prepared staging directory into place, so a reader that sees
//! `bin/protoc` sees a complete install.

use std::fs::{self, File, TryLockError};
use std::io::{Cursor, Read};
use std::path::{Component, Path, PathBuf};
use std::process::Command;
use std::thread;
use std::time::{Duration, Instant};

use protoforge_config::DEFAULT_PROTOC_VERSION;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::cancel::CancelToken;
use crate::error::CacheError;

/// Default release URL; `{version}`, `{os}` and `{arch}` are substituted.
pub const PROTOC_URL_TEMPLATE: &str = "https://github.com/protocolbuffers/protobuf/releases/download/v{version}/protoc-{version}-{os}-{arch}.zip";

pub const CACHE_PATH_ENV: &str = "PROTOFORGE_CACHE_PATH";

const CACHE_DIR_NAME: &str = "protoforge";
const PROTOBUF_DIR_NAME: &str = "protobuf";
const INSTALL_RECORD: &str = ".install.json";
const FILE_URL_PREFIX: &str = "file://";

const LOCK_TIMEOUT: Duration = Duration::from_secs(10);
const LOCK_BACKOFF: Duration = Duration::from_millis(250);

const ARCHIVE_HINT: &str =
    "expected a zip archive containing bin/protoc and include/google/protobuf/*.proto";

#[cfg(windows)]
const PROTOC_BIN: &str = "protoc.exe";
#[cfg(not(windows))]
const PROTOC_BIN: &str = "protoc";

type Result<T> = std::result::Result<T, CacheError>;

/// Where the compiler comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolchainOptions {
    pub protoc_version: String,
    /// Cache base directory; defaults from the environment when unset.
    pub cache_path: Option<PathBuf>,
    /// Custom archive URL. Disables version verification.
    pub protoc_url: Option<String>,
    /// Use this binary instead of the cache. Requires `protoc_wkt_path`.
    pub protoc_bin_path: Option<PathBuf>,
    /// Well-known types include directory for `protoc_bin_path`.
    pub protoc_wkt_path: Option<PathBuf>,
}

impl Default for ToolchainOptions {
    fn default() -> Self {
        Self {
            protoc_version: DEFAULT_PROTOC_VERSION.to_string(),
            cache_path: None,
            protoc_url: None,
            protoc_bin_path: None,
            protoc_wkt_path: None,
        }
    }
}

/// A complete cached release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Installation {
    /// Version, or the hash of the custom URL it came from.
    pub version_tag: String,
    pub install_dir: PathBuf,
    pub bin_path: PathBuf,
    pub wkt_include_path: PathBuf,
    /// Whether this call downloaded the release rather than finding it.
    pub downloaded: bool,
}

/// The two paths the planner needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolchainPaths {
    pub protoc: PathBuf,
    pub wkt_include: PathBuf,
}

#[derive(Debug, Serialize)]
struct InstallRecord<'a> {
    version: &'a str,
    url: &'a str,
    tag: &'a str,
    os: &'a str,
    arch: &'a str,
    installed_at: String,
}

/// Toolchain cache for one requested compiler.
#[derive(Debug, Clone)]
pub struct ToolchainCache {
    options: ToolchainOptions,
    cancel: CancelToken,
}

impl ToolchainCache {
    pub fn new(options: ToolchainOptions) -> Self {
        Self {
            options,
            cancel: CancelToken::new(),
        }
    }

    /// Stops lock waits and downloads once `cancel` trips.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn options(&self) -> &ToolchainOptions {
        &self.options
    }

    /// Resolved cache base directory.
    pub fn base_dir(&self) -> Result<PathBuf> {
        resolve_base_dir(
            self.options.cache_path.as_deref(),
            |key| std::env::var(key).ok(),
            std::env::consts::OS,
        )
    }

    /// Path to `protoc`, installing it first if needed.
    pub fn binary_path(&self) -> Result<PathBuf> {
        Ok(self.paths()?.protoc)
    }

    /// Path to the well-known types include, installing first if needed.
    pub fn well_known_types_path(&self) -> Result<PathBuf> {
        Ok(self.paths()?.wkt_include)
    }

    /// Both paths; explicit overrides bypass the cache entirely.
    pub fn paths(&self) -> Result<ToolchainPaths> {
        if let Some(paths) = self.overrides()? {
            return Ok(paths);
        }
        let installation = self.install()?;
        Ok(ToolchainPaths {
            protoc: installation.bin_path,
            wkt_include: installation.wkt_include_path,
        })
    }

    fn overrides(&self) -> Result<Option<ToolchainPaths>> {
        match (&self.options.protoc_bin_path, &self.options.protoc_wkt_path) {
            (Some(protoc), Some(wkt_include)) => Ok(Some(ToolchainPaths {
                protoc: protoc.clone(),
                wkt_include: wkt_include.clone(),
            })),
            (None, None) => Ok(None),
            _ => Err(CacheError::PartialOverride),
        }
    }

    fn version_tag(&self) -> String {
        match &self.options.protoc_url {
            Some(url) => url_hash(url),
            None => self.options.protoc_version.clone(),
        }
    }

    fn installation_in(&self, slot: PathBuf) -> Installation {
        Installation {
            version_tag: self.version_tag(),
            bin_path: slot.join("bin").join(PROTOC_BIN),
            wkt_include_path: slot.join("include"),
            install_dir: slot,
            downloaded: false,
        }
    }

    /// Ensures the release is installed and returns it.
    ///
    /// A present `bin/protoc` is trusted without locking. Otherwise the
    /// install lock is taken and the slot re-checked before downloading.
    pub fn install(&self) -> Result<Installation> {
        let (os, arch) = host_platform()?;
        let base = self.base_dir()?;
        let tag = self.version_tag();
        let protobuf_dir = base.join(PROTOBUF_DIR_NAME);
        let mut slot = protobuf_dir.join(&tag).join(os);
        if !arch.is_empty() {
            slot.push(arch);
        }
        let installation = self.installation_in(slot.clone());

        if installation.bin_path.is_file() {
            debug!(path = %installation.bin_path.display(), "protoc cache hit");
            return Ok(installation);
        }

        let slot_parent = slot.parent().unwrap_or(&protobuf_dir).to_path_buf();
        fs::create_dir_all(&slot_parent).map_err(|e| CacheError::io(&slot_parent, e))?;
        let _lock = acquire_lock(&protobuf_dir.join(format!("{tag}.lock")), &self.cancel)?;

        if installation.bin_path.is_file() {
            debug!(path = %installation.bin_path.display(), "protoc installed while waiting for lock");
            return Ok(installation);
        }

        let cancelled = || CacheError::Cancelled { path: slot.clone() };
        if self.cancel.is_cancelled() {
            return Err(cancelled());
        }
        let url = self.download_url(os, arch);
        info!(url = %url, dir = %slot.display(), "downloading protoc");
        let archive = fetch(&url)?;
        if self.cancel.is_cancelled() {
            return Err(cancelled());
        }

        let staging = tempfile::Builder::new()
            .prefix(".staging-")
            .tempdir_in(&slot_parent)
            .map_err(|e| CacheError::io(&slot_parent, e))?;
        extract_zip(&archive, staging.path(), &url)?;

        let staged_bin = staging.path().join("bin").join(PROTOC_BIN);
        if !staged_bin.is_file() {
            return Err(CacheError::Archive {
                url,
                message: format!("missing bin/{PROTOC_BIN}"),
                hint: ARCHIVE_HINT,
            });
        }
        make_executable(&staged_bin)?;
        if self.options.protoc_url.is_none() {
            verify_version(&staged_bin, &self.options.protoc_version)?;
        }

        let record = InstallRecord {
            version: &self.options.protoc_version,
            url: &url,
            tag: &tag,
            os,
            arch,
            installed_at: chrono::Utc::now().to_rfc3339(),
        };
        let record_path = staging.path().join("bin").join(INSTALL_RECORD);
        fs::write(&record_path, serde_json::to_vec_pretty(&record)?)
            .map_err(|e| CacheError::io(&record_path, e))?;

        if slot.exists() {
            fs::remove_dir_all(&slot).map_err(|e| CacheError::io(&slot, e))?;
        }
        let staged = staging.keep();
        if let Err(err) = fs::rename(&staged, &slot) {
            let _ = fs::remove_dir_all(&staged);
            return Err(CacheError::io(&slot, err));
        }

        info!(version = %self.options.protoc_version, path = %installation.bin_path.display(), "installed protoc");
        Ok(Installation {
            downloaded: true,
            ..installation
        })
    }

    /// Removes every cached release.
    pub fn delete(&self) -> Result<()> {
        let dir = self.base_dir()?.join(PROTOBUF_DIR_NAME);
        if dir.exists() {
            fs::remove_dir_all(&dir).map_err(|e| CacheError::io(&dir, e))?;
            info!(dir = %dir.display(), "deleted protoc cache");
        }
        Ok(())
    }

    fn download_url(&self, os: &str, arch: &str) -> String {
        match &self.options.protoc_url {
            Some(url) => url.clone(),
            // Windows releases carry no architecture suffix.
            None if arch.is_empty() => PROTOC_URL_TEMPLATE
                .replace("{version}", &self.options.protoc_version)
                .replace("{os}-{arch}", os),
            None => PROTOC_URL_TEMPLATE
                .replace("{version}", &self.options.protoc_version)
                .replace("{os}", os)
                .replace("{arch}", arch),
        }
    }
}

/// Picks the cache base from an explicit path, then the environment.
pub(crate) fn resolve_base_dir(
    explicit: Option<&Path>,
    env: impl Fn(&str) -> Option<String>,
    os: &str,
) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    let var = |key: &str| env(key).filter(|value| !value.is_empty());
    if let Some(path) = var(CACHE_PATH_ENV) {
        return Ok(PathBuf::from(path));
    }
    if let Some(xdg) = var("XDG_CACHE_HOME") {
        return Ok(PathBuf::from(xdg).join(CACHE_DIR_NAME));
    }
    let home = var("HOME").ok_or(CacheError::NoHomeDir)?;
    let home = PathBuf::from(home);
    if os == "macos" {
        Ok(home.join("Library").join("Caches").join(CACHE_DIR_NAME))
    } else {
        Ok(home.join(".cache").join(CACHE_DIR_NAME))
    }
}

fn host_platform() -> Result<(&'static str, &'static str)> {
    platform_tags(std::env::consts::OS, std::env::consts::ARCH)
}

fn platform_tags(os: &str, arch: &str) -> Result<(&'static str, &'static str)> {
    let unsupported = || CacheError::UnsupportedPlatform {
        os: os.to_string(),
        arch: arch.to_string(),
    };
    let os_tag = match os {
        "linux" => "linux",
        "macos" => "osx",
        "windows" => "win64",
        _ => return Err(unsupported()),
    };
    if os_tag == "win64" {
        return Ok((os_tag, ""));
    }
    let arch_tag = match arch {
        "x86_64" => "x86_64",
        "aarch64" => "aarch_64",
        _ => return Err(unsupported()),
    };
    Ok((os_tag, arch_tag))
}

fn url_hash(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

fn acquire_lock(path: &Path, cancel: &CancelToken) -> Result<File> {
    let file = File::options()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)
        .map_err(|e| CacheError::io(path, e))?;
    let started = Instant::now();
    loop {
        match file.try_lock() {
            Ok(()) => return Ok(file),
            Err(TryLockError::WouldBlock) => {}
            Err(TryLockError::Error(err)) => return Err(CacheError::io(path, err)),
        }
        if cancel.is_cancelled() {
            return Err(CacheError::Cancelled {
                path: path.to_path_buf(),
            });
        }
        if started.elapsed() >= LOCK_TIMEOUT {
            return Err(CacheError::LockTimeout {
                path: path.to_path_buf(),
                waited_secs: LOCK_TIMEOUT.as_secs(),
            });
        }
        debug!(lock = %path.display(), "waiting for protoc install lock");
        thread::sleep(LOCK_BACKOFF);
    }
}

fn fetch(url: &str) -> Result<Vec<u8>> {
    let download_error = |message: String| CacheError::Download {
        url: url.to_string(),
        message,
        hint: ARCHIVE_HINT,
    };
    if let Some(local) = url.strip_prefix(FILE_URL_PREFIX) {
        return fs::read(local).map_err(|e| download_error(e.to_string()));
    }
    let resp = ureq::get(url)
        .call()
        .map_err(|e| download_error(e.to_string()))?;
    let mut reader = resp.into_body().into_reader();
    let mut bytes = Vec::new();
    reader
        .read_to_end(&mut bytes)
        .map_err(|e| download_error(e.to_string()))?;
    Ok(bytes)
}

fn extract_zip(bytes: &[u8], out_dir: &Path, url: &str) -> Result<()> {
    let archive_error = |message: String| CacheError::Archive {
        url: url.to_string(),
        message,
        hint: ARCHIVE_HINT,
    };
    let mut zip = zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| archive_error(e.to_string()))?;
    for i in 0..zip.len() {
        let mut file = zip.by_index(i).map_err(|e| archive_error(e.to_string()))?;
        let name = file.name().to_string();
        let rel = sanitize_rel_path(Path::new(&name)).map_err(archive_error)?;
        let out_path = out_dir.join(rel);
        if file.is_dir() {
            fs::create_dir_all(&out_path).map_err(|e| CacheError::io(&out_path, e))?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent).map_err(|e| CacheError::io(parent, e))?;
        }
        let mut out = File::create(&out_path).map_err(|e| CacheError::io(&out_path, e))?;
        std::io::copy(&mut file, &mut out).map_err(|e| CacheError::io(&out_path, e))?;
        apply_unix_mode(&out_path, file.unix_mode())?;
    }
    Ok(())
}

#[cfg(unix)]
fn apply_unix_mode(path: &Path, mode: Option<u32>) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    match mode {
        Some(mode) => fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o7777))
            .map_err(|e| CacheError::io(path, e)),
        None => Ok(()),
    }
}

#[cfg(not(unix))]
fn apply_unix_mode(_path: &Path, _mode: Option<u32>) -> Result<()> {
    Ok(())
}

fn sanitize_rel_path(path: &Path) -> std::result::Result<PathBuf, String> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => {
                return Err(format!("invalid archive path (absolute): {}", path.display()));
            }
            Component::ParentDir => {
                return Err(format!("invalid archive path (..): {}", path.display()));
            }
            Component::CurDir => {}
            Component::Normal(part) => out.push(part),
        }
    }
    Ok(out)
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(path)
        .map_err(|e| CacheError::io(path, e))?
        .permissions();
    perms.set_mode(perms.mode() | 0o755);
    fs::set_permissions(path, perms).map_err(|e| CacheError::io(path, e))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}

/// Runs `protoc --version` and checks it reports `libprotoc {version}`.
fn verify_version(bin: &Path, version: &str) -> Result<()> {
    let output = Command::new(bin)
        .arg("--version")
        .output()
        .map_err(|e| CacheError::Verify {
            path: bin.to_path_buf(),
            message: e.to_string(),
        })?;
    let actual = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let expected = format!("libprotoc {version}");
    if actual != expected {
        return Err(CacheError::VersionMismatch { expected, actual });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_base_dir_precedence() {
        let env = env_of(&[
            (CACHE_PATH_ENV, "/env/cache"),
            ("XDG_CACHE_HOME", "/xdg"),
            ("HOME", "/home/u"),
        ]);
        assert_eq!(
            resolve_base_dir(Some(Path::new("/explicit")), &env, "linux").unwrap(),
            PathBuf::from("/explicit")
        );
        assert_eq!(resolve_base_dir(None, &env, "linux").unwrap(), PathBuf::from("/env/cache"));

        let env = env_of(&[("XDG_CACHE_HOME", "/xdg"), ("HOME", "/home/u")]);
        assert_eq!(resolve_base_dir(None, &env, "linux").unwrap(), PathBuf::from("/xdg/protoforge"));

        let env = env_of(&[("HOME", "/home/u")]);
        assert_eq!(
            resolve_base_dir(None, &env, "linux").unwrap(),
            PathBuf::from("/home/u/.cache/protoforge")
        );
        assert_eq!(
            resolve_base_dir(None, &env, "macos").unwrap(),
            PathBuf::from("/home/u/Library/Caches/protoforge")
        );
    }

    #[test]
    fn test_base_dir_without_home_fails() {
        let err = resolve_base_dir(None, env_of(&[("HOME", "")]), "linux").unwrap_err();
        assert!(matches!(err, CacheError::NoHomeDir));
    }

    #[test]
    fn test_platform_tags() {
        assert_eq!(platform_tags("linux", "x86_64").unwrap(), ("linux", "x86_64"));
        assert_eq!(platform_tags("macos", "aarch64").unwrap(), ("osx", "aarch_64"));
        assert!(matches!(
            platform_tags("freebsd", "x86_64"),
            Err(CacheError::UnsupportedPlatform { .. })
        ));
    }

    #[test]
    fn test_download_url_template_and_custom_tag() {
        let cache = ToolchainCache::new(ToolchainOptions {
            protoc_version: "3.11.4".to_string(),
            ..ToolchainOptions::default()
        });
        assert_eq!(
            cache.download_url("linux", "x86_64"),
            "https://github.com/protocolbuffers/protobuf/releases/download/v3.11.4/protoc-3.11.4-linux-x86_64.zip"
        );
        assert_eq!(cache.version_tag(), "3.11.4");

        let custom = ToolchainCache::new(ToolchainOptions {
            protoc_url: Some("https://mirror.example/protoc.zip".to_string()),
            ..ToolchainOptions::default()
        });
        let tag = custom.version_tag();
        assert_eq!(tag.len(), 64);
        assert!(tag.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_partial_override_is_rejected() {
        let cache = ToolchainCache::new(ToolchainOptions {
            protoc_bin_path: Some(PathBuf::from("/opt/protoc")),
            ..ToolchainOptions::default()
        });
        assert!(matches!(cache.paths(), Err(CacheError::PartialOverride)));

        let cache = ToolchainCache::new(ToolchainOptions {
            protoc_bin_path: Some(PathBuf::from("/opt/protoc")),
            protoc_wkt_path: Some(PathBuf::from("/opt/include")),
            ..ToolchainOptions::default()
        });
        let paths = cache.paths().unwrap();
        assert_eq!(paths.protoc, PathBuf::from("/opt/protoc"));
        assert_eq!(paths.wkt_include, PathBuf::from("/opt/include"));
    }

    #[test]
    fn test_lock_wait_stops_when_cancelled() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("3.8.0.lock");
        let holder = File::create(&path).unwrap();
        holder.lock().unwrap();

        let cancel = CancelToken::new();
        let trip = cancel.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(300));
            trip.cancel();
        });
        let started = Instant::now();
        let err = acquire_lock(&path, &cancel).unwrap_err();
        canceller.join().unwrap();
        assert!(matches!(err, CacheError::Cancelled { .. }));
        assert!(started.elapsed() < LOCK_TIMEOUT);
    }

    #[test]
    fn test_cancelled_install_does_not_download() {
        let tmp = tempfile::tempdir().unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        let cache = ToolchainCache::new(ToolchainOptions {
            cache_path: Some(tmp.path().to_path_buf()),
            protoc_url: Some("file:///does/not/exist.zip".to_string()),
            ..ToolchainOptions::default()
        })
        .with_cancel(cancel);
        assert!(matches!(cache.install(), Err(CacheError::Cancelled { .. })));
    }

    #[test]
    fn test_sanitize_rejects_escaping_entries() {
        assert!(sanitize_rel_path(Path::new("../evil")).is_err());
        assert!(sanitize_rel_path(Path::new("/etc/passwd")).is_err());
        assert_eq!(
            sanitize_rel_path(Path::new("./bin/protoc")).unwrap(),
            PathBuf::from("bin/protoc")
        );
    }

    #[test]
    fn test_extract_rejects_traversal() {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut buf);
            zip.start_file("../outside", zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(b"x").unwrap();
            zip.finish().unwrap();
        }
        let tmp = tempfile::tempdir().unwrap();
        let err = extract_zip(buf.get_ref(), tmp.path(), "file:///a.zip").unwrap_err();
        assert!(matches!(err, CacheError::Archive { .. }));
        assert!(err.to_string().contains("bin/protoc"));
    }

    #[test]
    fn test_missing_archive_reports_download_hint() {
        let tmp = tempfile::tempdir().unwrap();
        let err = fetch(&format!("file://{}/nope.zip", tmp.path().display())).unwrap_err();
        assert!(matches!(err, CacheError::Download { .. }));
        assert!(err.to_string().contains("include/google/protobuf"));
    }

    #[cfg(unix)]
    #[test]
    fn test_verify_version_mismatch() {
        use std::os::unix::fs::PermissionsExt;
        let tmp = tempfile::tempdir().unwrap();
        let bin = tmp.path().join("protoc");
        fs::write(&bin, "#!/bin/sh\necho 'libprotoc 3.6.1'\n").unwrap();
        fs::set_permissions(&bin, fs::Permissions::from_mode(0o755)).unwrap();

        verify_version(&bin, "3.6.1").unwrap();
        match verify_version(&bin, "3.8.0").unwrap_err() {
            CacheError::VersionMismatch { expected, actual } => {
                assert_eq!(expected, "libprotoc 3.8.0");
                assert_eq!(actual, "libprotoc 3.6.1");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
