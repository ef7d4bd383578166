//! Fakes shared by unit tests across modules.

use crate::approval::{Prompt, PromptAnswer};
use crate::backend::{Backend, ManifestBackend, PackageSet};
use crate::environment::Environment;
use crate::error::{PkgError, Result};
use crate::metadata::PackageMetadata;
use crate::registry::Registry;
use crate::types::VersionSpec;
use chrono::Duration;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

// ---------------------------------------------------------------------------
// ScriptedPrompt
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Shown(String),
    Asked,
}

/// Replays canned answers; `Closed` once the script runs out.
pub struct ScriptedPrompt {
    answers: Mutex<VecDeque<PromptAnswer>>,
    events: Mutex<Vec<Event>>,
}

impl ScriptedPrompt {
    pub fn new(answers: Vec<PromptAnswer>) -> Self {
        Self {
            answers: Mutex::new(answers.into()),
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn yes() -> Self {
        Self::new(vec![PromptAnswer::Line("yes".into())])
    }

    pub fn shown(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                Event::Shown(s) => Some(s.clone()),
                Event::Asked => None,
            })
            .collect()
    }

    pub fn asked(&self) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| **e == Event::Asked)
            .count()
    }

    pub fn shown_before_first_ask(&self) -> bool {
        let events = self.events.lock().unwrap();
        match events.iter().position(|e| *e == Event::Asked) {
            Some(i) => events[..i].iter().any(|e| matches!(e, Event::Shown(_))),
            None => false,
        }
    }
}

impl Prompt for ScriptedPrompt {
    fn show(&self, text: &str) {
        self.events.lock().unwrap().push(Event::Shown(text.to_string()));
    }

    fn ask(&self, _question: &str, _timeout: Option<std::time::Duration>) -> PromptAnswer {
        self.events.lock().unwrap().push(Event::Asked);
        self.answers
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(PromptAnswer::Closed)
    }
}

// ---------------------------------------------------------------------------
// StaticRegistry
// ---------------------------------------------------------------------------

/// In-memory registry that can fail the first `outages` fetches.
pub struct StaticRegistry {
    packages: HashMap<String, PackageMetadata>,
    outages: u32,
    calls: AtomicU32,
}

impl StaticRegistry {
    pub fn new(packages: Vec<PackageMetadata>) -> Self {
        Self {
            packages: packages.into_iter().map(|m| (m.name.clone(), m)).collect(),
            outages: 0,
            calls: AtomicU32::new(0),
        }
    }

    pub fn with_outages(mut self, outages: u32) -> Self {
        self.outages = outages;
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Registry for StaticRegistry {
    fn fetch(&self, name: &str, version: &VersionSpec) -> Result<PackageMetadata> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.outages {
            return Err(PkgError::RegistryUnavailable("simulated outage".into()));
        }
        let meta = self
            .packages
            .get(name)
            .ok_or_else(|| PkgError::PackageNotFound(name.to_string()))?;
        match version {
            VersionSpec::Exact(v) if v != &meta.version => {
                Err(PkgError::PackageNotFound(format!("{name}=={v}")))
            }
            _ => Ok(meta.clone()),
        }
    }
}

// ---------------------------------------------------------------------------
// Metadata builders
// ---------------------------------------------------------------------------

pub fn established(name: &str, version: &str) -> PackageMetadata {
    let mut m = PackageMetadata::new(name, version);
    m.published_at = Some(m.fetched_at - Duration::days(900));
    m.downloads = Some(50_000);
    m.license = Some("BSD".into());
    m
}

pub fn suspicious(name: &str, version: &str) -> PackageMetadata {
    let mut m = PackageMetadata::new(name, version);
    m.published_at = Some(m.fetched_at - Duration::days(2));
    m.downloads = Some(3);
    m
}

// ---------------------------------------------------------------------------
// Backends
// ---------------------------------------------------------------------------

/// Manifest backend whose installs leave a stray package behind and fail.
pub struct BrokenBackend;

impl Backend for BrokenBackend {
    fn provision(&self, env: &Environment) -> Result<()> {
        ManifestBackend.provision(env)
    }

    fn install(&self, env: &Environment, name: &str, _version: &str) -> Result<()> {
        ManifestBackend.install(env, &format!("{name}-partial"), "0.0.1")?;
        Err(PkgError::InstallFailed(format!(
            "dependency conflict while installing {name}"
        )))
    }

    fn uninstall(&self, env: &Environment, name: &str) -> Result<()> {
        ManifestBackend.uninstall(env, name)
    }

    fn list(&self, env: &Environment) -> Result<PackageSet> {
        ManifestBackend.list(env)
    }

    fn restore(&self, env: &Environment, snapshot: &PackageSet) -> Result<()> {
        ManifestBackend.restore(env, snapshot)
    }
}

/// Manifest backend that records a different version than requested, so
/// post-install verification fails.
pub struct MismatchBackend;

impl Backend for MismatchBackend {
    fn provision(&self, env: &Environment) -> Result<()> {
        ManifestBackend.provision(env)
    }

    fn install(&self, env: &Environment, name: &str, _version: &str) -> Result<()> {
        ManifestBackend.install(env, name, "0.0.0-wrong")
    }

    fn uninstall(&self, env: &Environment, name: &str) -> Result<()> {
        ManifestBackend.uninstall(env, name)
    }

    fn list(&self, env: &Environment) -> Result<PackageSet> {
        ManifestBackend.list(env)
    }

    fn restore(&self, env: &Environment, snapshot: &PackageSet) -> Result<()> {
        ManifestBackend.restore(env, snapshot)
    }
}
