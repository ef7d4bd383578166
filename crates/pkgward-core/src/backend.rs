use crate::environment::Environment;
use crate::error::{PkgError, Result};
use crate::paths;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;

pub type PackageSet = BTreeMap<String, String>;

// ---------------------------------------------------------------------------
// Backend trait
// ---------------------------------------------------------------------------

/// The thing that actually puts packages into an environment's isolated
/// target. The installer only talks to environments through this trait and
/// the environment store.
pub trait Backend: Send + Sync {
    /// Prepare a freshly created environment for installs.
    fn provision(&self, env: &Environment) -> Result<()>;
    fn install(&self, env: &Environment, name: &str, version: &str) -> Result<()>;
    fn uninstall(&self, env: &Environment, name: &str) -> Result<()>;
    /// Packages present in the target right now.
    fn list(&self, env: &Environment) -> Result<PackageSet>;
    /// Bring the target back to exactly `snapshot`.
    fn restore(&self, env: &Environment, snapshot: &PackageSet) -> Result<()>;
}

/// Packages to remove and `(name, version)` pins to (re)install so that
/// `current` becomes `snapshot`. Names compare case-insensitively.
pub fn restore_plan(current: &PackageSet, snapshot: &PackageSet) -> (Vec<String>, Vec<(String, String)>) {
    let lower = |s: &PackageSet| -> BTreeMap<String, (String, String)> {
        s.iter()
            .map(|(k, v)| (k.to_lowercase(), (k.clone(), v.clone())))
            .collect()
    };
    let cur = lower(current);
    let snap = lower(snapshot);

    let remove = cur
        .iter()
        .filter(|(k, _)| !snap.contains_key(*k))
        .map(|(_, (name, _))| name.clone())
        .collect();
    let pin = snap
        .iter()
        .filter(|(k, (_, v))| cur.get(*k).map(|(_, cv)| cv != v).unwrap_or(true))
        .map(|(_, (name, v))| (name.clone(), v.clone()))
        .collect();
    (remove, pin)
}

// ---------------------------------------------------------------------------
// ManifestBackend
// ---------------------------------------------------------------------------

/// Records package sets in `site/packages.yaml` without running anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct ManifestBackend;

impl ManifestBackend {
    fn read(&self, env: &Environment) -> Result<PackageSet> {
        let path = paths::site_manifest(&env.path);
        if !path.exists() {
            return Ok(PackageSet::new());
        }
        let data = std::fs::read_to_string(&path)?;
        Ok(serde_yaml::from_str(&data)?)
    }

    fn write(&self, env: &Environment, set: &PackageSet) -> Result<()> {
        let data = serde_yaml::to_string(set)?;
        crate::io::atomic_write(&paths::site_manifest(&env.path), data.as_bytes())
    }
}

impl Backend for ManifestBackend {
    fn provision(&self, env: &Environment) -> Result<()> {
        crate::io::ensure_dir(&paths::site_dir(&env.path))?;
        let empty = serde_yaml::to_string(&PackageSet::new())?;
        crate::io::write_if_missing(&paths::site_manifest(&env.path), empty.as_bytes())?;
        Ok(())
    }

    fn install(&self, env: &Environment, name: &str, version: &str) -> Result<()> {
        let mut set = self.read(env)?;
        let wanted = name.to_lowercase();
        set.retain(|k, _| k.to_lowercase() != wanted);
        set.insert(name.to_string(), version.to_string());
        self.write(env, &set)
    }

    fn uninstall(&self, env: &Environment, name: &str) -> Result<()> {
        let mut set = self.read(env)?;
        let wanted = name.to_lowercase();
        let before = set.len();
        set.retain(|k, _| k.to_lowercase() != wanted);
        if set.len() == before {
            return Err(PkgError::PackageNotFound(format!("{name} in {}", env.id)));
        }
        self.write(env, &set)
    }

    fn list(&self, env: &Environment) -> Result<PackageSet> {
        self.read(env)
    }

    fn restore(&self, env: &Environment, snapshot: &PackageSet) -> Result<()> {
        self.write(env, snapshot)
    }
}

// ---------------------------------------------------------------------------
// PipBackend
// ---------------------------------------------------------------------------

/// Real virtualenvs: `python -m venv` plus the environment's own pip.
pub struct PipBackend {
    python: String,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct PipListEntry {
    name: String,
    version: String,
}

impl PipBackend {
    pub fn new(python: impl Into<String>, timeout: Duration) -> Self {
        Self {
            python: python.into(),
            timeout,
        }
    }

    /// Pick an interpreter for `version` (e.g. `3.11` → `python3.11`),
    /// falling back to the configured default.
    pub fn find_interpreter(&self, version: &str) -> String {
        let version = version.trim();
        if version.is_empty() || version == self.python {
            return self.python.clone();
        }
        if version.starts_with("python") && which::which(version).is_ok() {
            return version.to_string();
        }
        let candidate = format!("python{version}");
        if which::which(&candidate).is_ok() {
            return candidate;
        }
        if Path::new(version).is_file() {
            return version.to_string();
        }
        tracing::warn!(
            requested = %version,
            fallback = %self.python,
            "no matching interpreter found, using default"
        );
        self.python.clone()
    }

    fn run_pip(&self, env: &Environment, args: &[&str]) -> Result<String> {
        let pip = env.executable("pip");
        let mut full = vec!["--disable-pip-version-check"];
        full.extend_from_slice(args);
        let out = run_command(&pip.to_string_lossy(), &full, self.timeout)?;
        if !out.success {
            return Err(PkgError::InstallFailed(format!(
                "pip {} failed: {}",
                args.first().copied().unwrap_or(""),
                out.output
            )));
        }
        Ok(out.output)
    }
}

impl Backend for PipBackend {
    fn provision(&self, env: &Environment) -> Result<()> {
        let python = self.find_interpreter(&env.interpreter);
        let site = paths::site_dir(&env.path);
        let site_arg = site.to_string_lossy().into_owned();
        let out = run_command(&python, &["-m", "venv", site_arg.as_str()], self.timeout)?;
        if !out.success {
            return Err(PkgError::Backend(format!(
                "creating virtualenv with {python} failed: {}",
                out.output
            )));
        }
        Ok(())
    }

    fn install(&self, env: &Environment, name: &str, version: &str) -> Result<()> {
        let spec = format!("{name}=={version}");
        self.run_pip(env, &["install", spec.as_str()])?;
        Ok(())
    }

    fn uninstall(&self, env: &Environment, name: &str) -> Result<()> {
        if !self.list(env)?.keys().any(|k| k.eq_ignore_ascii_case(name)) {
            return Err(PkgError::PackageNotFound(format!("{name} in {}", env.id)));
        }
        self.run_pip(env, &["uninstall", "-y", name])?;
        Ok(())
    }

    fn list(&self, env: &Environment) -> Result<PackageSet> {
        let pip = env.executable("pip");
        let out = run_command(
            &pip.to_string_lossy(),
            &["--disable-pip-version-check", "list", "--format=json"],
            self.timeout,
        )?;
        if !out.success {
            return Err(PkgError::Backend(format!("pip list failed: {}", out.output)));
        }
        parse_pip_list(&out.stdout)
    }

    fn restore(&self, env: &Environment, snapshot: &PackageSet) -> Result<()> {
        let current = self.list(env)?;
        let (remove, pin) = restore_plan(&current, snapshot);
        if !remove.is_empty() {
            let mut args = vec!["uninstall", "-y"];
            args.extend(remove.iter().map(String::as_str));
            self.run_pip(env, &args)?;
        }
        if !pin.is_empty() {
            let specs: Vec<String> = pin.iter().map(|(n, v)| format!("{n}=={v}")).collect();
            let mut args = vec!["install", "--no-deps"];
            args.extend(specs.iter().map(String::as_str));
            self.run_pip(env, &args)?;
        }
        Ok(())
    }
}

pub fn parse_pip_list(json: &str) -> Result<PackageSet> {
    let entries: Vec<PipListEntry> = serde_json::from_str(json)?;
    Ok(entries.into_iter().map(|e| (e.name, e.version)).collect())
}

// ---------------------------------------------------------------------------
// Subprocess execution
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    /// Combined stdout/stderr, capped, for error messages.
    pub output: String,
}

/// Run `program args...` with a timeout, killing it on expiry.
///
/// stdout/stderr are drained on dedicated threads (no pipe-buffer
/// deadlocks) and the wait happens on a waiter thread with
/// `mpsc::recv_timeout`, so there is no busy-wait.
pub fn run_command(program: &str, args: &[&str], timeout: Duration) -> Result<CommandOutput> {
    tracing::debug!(program, ?args, "running command");
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| PkgError::Backend(format!("failed to spawn {program}: {e}")))?;

    let child_pid = child.id();
    let stdout_handle = child.stdout.take();
    let stderr_handle = child.stderr.take();

    let stdout_thread = std::thread::spawn(move || -> String {
        let mut buf = String::new();
        if let Some(mut r) = stdout_handle {
            use std::io::Read;
            let _ = r.read_to_string(&mut buf);
        }
        buf
    });
    let stderr_thread = std::thread::spawn(move || -> String {
        let mut buf = String::new();
        if let Some(mut r) = stderr_handle {
            use std::io::Read;
            let _ = r.read_to_string(&mut buf);
        }
        buf
    });

    let (tx, rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        let _ = tx.send(child.wait());
    });

    let status = match rx.recv_timeout(timeout) {
        Ok(result) => result?,
        Err(_) => {
            // Reader threads see EOF once the killed process exits.
            kill_process(child_pid);
            return Err(PkgError::InstallFailed(format!(
                "{program} timed out after {}s",
                timeout.as_secs()
            )));
        }
    };

    let stdout = stdout_thread.join().unwrap_or_default();
    let stderr = stderr_thread.join().unwrap_or_default();
    let output = combine_output(&stdout, &stderr);
    Ok(CommandOutput {
        success: status.success(),
        stdout,
        output,
    })
}

/// Combine stdout/stderr and cap to 10KB (keeping the tail).
fn combine_output(stdout: &str, stderr: &str) -> String {
    let output = if stderr.is_empty() {
        stdout.to_string()
    } else if stdout.is_empty() {
        stderr.to_string()
    } else {
        format!("{stdout}\n{stderr}")
    };
    const MAX_OUTPUT: usize = 10 * 1024;
    let trimmed = output.trim();
    if trimmed.len() > MAX_OUTPUT {
        let mut start = trimmed.len() - MAX_OUTPUT;
        while !trimmed.is_char_boundary(start) {
            start += 1;
        }
        trimmed[start..].to_string()
    } else {
        trimmed.to_string()
    }
}

/// Terminate a process by PID. Best-effort; errors are ignored.
fn kill_process(pid: u32) {
    let pid = pid.to_string();
    let mut cmd = if cfg!(windows) {
        let mut c = Command::new("taskkill");
        c.args(["/F", "/PID", pid.as_str()]);
        c
    } else {
        let mut c = Command::new("kill");
        c.args(["-9", pid.as_str()]);
        c
    };
    let _ = cmd.stdout(Stdio::null()).stderr(Stdio::null()).status();
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::EnvironmentStore;
    use tempfile::TempDir;

    fn set(pairs: &[(&str, &str)]) -> PackageSet {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn manifest_backend_lifecycle() {
        let dir = TempDir::new().unwrap();
        let store = EnvironmentStore::new(dir.path());
        let env = store.create("ml", "3.11").unwrap();
        let backend = ManifestBackend;

        backend.provision(&env).unwrap();
        assert!(backend.list(&env).unwrap().is_empty());

        backend.install(&env, "pandas", "2.2.0").unwrap();
        backend.install(&env, "numpy", "1.26.0").unwrap();
        backend.install(&env, "Pandas", "2.2.1").unwrap();
        assert_eq!(
            backend.list(&env).unwrap(),
            set(&[("Pandas", "2.2.1"), ("numpy", "1.26.0")])
        );

        backend.uninstall(&env, "numpy").unwrap();
        assert!(matches!(
            backend.uninstall(&env, "numpy").unwrap_err(),
            PkgError::PackageNotFound(_)
        ));

        let snapshot = set(&[("requests", "2.31.0")]);
        backend.restore(&env, &snapshot).unwrap();
        assert_eq!(backend.list(&env).unwrap(), snapshot);
    }

    #[test]
    fn restore_plan_computes_diff() {
        let current = set(&[("pandas", "2.2.0"), ("numpy", "2.0.0"), ("six", "1.16.0")]);
        let snapshot = set(&[("numpy", "1.26.0"), ("Six", "1.16.0"), ("tzdata", "2024.1")]);
        let (remove, pin) = restore_plan(&current, &snapshot);
        assert_eq!(remove, vec!["pandas"]);
        assert_eq!(
            pin,
            vec![
                ("numpy".to_string(), "1.26.0".to_string()),
                ("tzdata".to_string(), "2024.1".to_string())
            ]
        );
    }

    #[test]
    fn pip_list_parses() {
        let json = r#"[{"name": "pip", "version": "24.0"}, {"name": "pandas", "version": "2.2.0"}]"#;
        let parsed = parse_pip_list(json).unwrap();
        assert_eq!(parsed, set(&[("pip", "24.0"), ("pandas", "2.2.0")]));
    }

    #[test]
    fn output_is_capped_to_tail() {
        let long = "x".repeat(20 * 1024) + "END";
        let out = combine_output(&long, "");
        assert_eq!(out.len(), 10 * 1024);
        assert!(out.ends_with("END"));
    }

    #[cfg(unix)]
    #[test]
    fn run_command_reports_status() {
        let ok = run_command("sh", &["-c", "echo hi"], Duration::from_secs(10)).unwrap();
        assert!(ok.success);
        assert_eq!(ok.stdout.trim(), "hi");
        let bad = run_command("sh", &["-c", "echo oops >&2; exit 3"], Duration::from_secs(10))
            .unwrap();
        assert!(!bad.success);
        assert_eq!(bad.output, "oops");
    }

    #[cfg(unix)]
    #[test]
    fn run_command_times_out() {
        let err = run_command("sleep", &["30"], Duration::from_millis(200)).unwrap_err();
        assert!(matches!(err, PkgError::InstallFailed(m) if m.contains("timed out")));
    }

    #[test]
    fn missing_program_is_backend_error() {
        let err = run_command("definitely-not-a-real-binary-xyz", &[], Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, PkgError::Backend(_)));
    }
}
