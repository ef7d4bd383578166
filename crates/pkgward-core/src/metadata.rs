use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// One downloadable file of a release (sdist, wheel, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionFile {
    pub filename: String,
    #[serde(default)]
    pub url: Option<String>,
    /// Size in bytes, when reported.
    #[serde(default)]
    pub size: Option<u64>,
    /// Registry package type, e.g. `sdist`, `bdist_wheel`, `bdist_wininst`.
    #[serde(default)]
    pub packagetype: Option<String>,
}

impl DistributionFile {
    /// Host part of `url`, lowercased. `None` if there is no parseable URL.
    pub fn host(&self) -> Option<String> {
        let url = self.url.as_deref()?.trim();
        let rest = url.split_once("://").map(|(_, r)| r)?;
        let authority = rest.split(['/', '?', '#']).next()?;
        let host = authority.rsplit('@').next()?;
        let host = host.split(':').next()?.to_ascii_lowercase();
        (!host.is_empty()).then_some(host)
    }
}

/// Registry facts about one release of a package.
///
/// Fetched fresh for every request. `fetched_at` is part of the value so
/// that age-based rules depend only on the metadata, not on the clock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageMetadata {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub license: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    pub fetched_at: DateTime<Utc>,
    /// Recent download count; `None` when the registry did not report one.
    #[serde(default)]
    pub downloads: Option<u64>,
    /// Names of declared runtime dependencies.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Files published for this release.
    #[serde(default)]
    pub files: Vec<DistributionFile>,
    /// Project links by label. `None` when the registry did not report any
    /// link information at all, which is different from an empty map.
    #[serde(default)]
    pub project_urls: Option<BTreeMap<String, String>>,
}

impl PackageMetadata {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            author: None,
            license: None,
            summary: None,
            published_at: None,
            fetched_at: Utc::now(),
            downloads: None,
            dependencies: Vec::new(),
            files: Vec::new(),
            project_urls: None,
        }
    }

    /// Whole days between publication and fetch. `None` if the publication
    /// date is unknown.
    pub fn age_days(&self) -> Option<i64> {
        self.published_at
            .map(|p| (self.fetched_at - p).num_days().max(0))
    }

    /// License string if present and meaningful.
    pub fn declared_license(&self) -> Option<&str> {
        self.license
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.eq_ignore_ascii_case("unknown"))
    }

    /// First project link that points at source code: a label mentioning
    /// "source" or a URL on github.
    pub fn source_url(&self) -> Option<&str> {
        self.project_urls.as_ref()?.iter().find_map(|(label, url)| {
            let label = label.to_lowercase();
            let link = url.to_lowercase();
            (label.contains("source") || link.contains("github")).then_some(url.as_str())
        })
    }
}

/// PEP 503 normalized form: lowercase, runs of `-`, `_`, `.` become `-`.
pub fn canonical_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut sep = false;
    for c in name.trim().chars() {
        if matches!(c, '-' | '_' | '.') {
            sep = true;
        } else {
            if sep && !out.is_empty() {
                out.push('-');
            }
            sep = false;
            out.push(c.to_ascii_lowercase());
        }
    }
    out
}

/// Compare dotted release strings numerically, segment by segment.
///
/// Non-numeric suffixes inside a segment (`0rc1`) are cut at the first
/// non-digit; a missing segment counts as 0, so `1.0` == `1.0.0`.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    fn segments(v: &str) -> Vec<u64> {
        v.split(['.', '+', '-'])
            .map(|s| {
                let digits: String = s.chars().take_while(|c| c.is_ascii_digit()).collect();
                digits.parse().unwrap_or(0)
            })
            .collect()
    }
    let (a, b) = (segments(a), segments(b));
    let len = a.len().max(b.len());
    for i in 0..len {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        match x.cmp(&y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}
