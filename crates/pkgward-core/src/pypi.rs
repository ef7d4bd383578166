//! PyPI JSON API client.
//!
//! Metadata comes from `/pypi/<name>[/<version>]/json`; recent download
//! counts come from a pypistats-compatible `/api/packages/<name>/recent`
//! endpoint when one is configured. A stats failure leaves the count
//! unknown rather than failing the fetch.

use crate::error::{PkgError, Result};
use crate::metadata::{DistributionFile, PackageMetadata};
use crate::registry::Registry;
use crate::types::VersionSpec;
use chrono::{DateTime, Utc};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct ProjectResponse {
    info: ProjectInfo,
    #[serde(default)]
    urls: Vec<ReleaseFile>,
}

#[derive(Debug, Deserialize)]
struct ProjectInfo {
    name: String,
    version: String,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    license: Option<String>,
    #[serde(default)]
    license_expression: Option<String>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    requires_dist: Option<Vec<String>>,
    #[serde(default)]
    project_urls: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct ReleaseFile {
    #[serde(default)]
    filename: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    packagetype: Option<String>,
    #[serde(default)]
    upload_time_iso_8601: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct RecentResponse {
    data: RecentData,
}

#[derive(Debug, Deserialize)]
struct RecentData {
    last_month: u64,
}

pub struct PypiRegistry {
    client: Client,
    base_url: String,
    stats_url: Option<String>,
}

impl PypiRegistry {
    pub fn new(base_url: &str, stats_url: Option<&str>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("pkgward/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PkgError::RegistryUnavailable(format!("http client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            stats_url: stats_url.map(|s| s.trim_end_matches('/').to_string()),
        })
    }

    fn project_url(&self, name: &str, version: &VersionSpec) -> String {
        match version {
            VersionSpec::Latest => format!("{}/pypi/{name}/json", self.base_url),
            VersionSpec::Exact(v) => format!("{}/pypi/{name}/{v}/json", self.base_url),
        }
    }

    fn recent_downloads(&self, name: &str) -> Option<u64> {
        let base = self.stats_url.as_deref()?;
        let url = format!("{base}/api/packages/{}/recent", name.to_lowercase());
        let result = self
            .client
            .get(&url)
            .send()
            .and_then(|r| r.error_for_status())
            .and_then(|r| r.json::<RecentResponse>());
        match result {
            Ok(body) => Some(body.data.last_month),
            Err(e) => {
                tracing::debug!(package = %name, error = %e, "download stats unavailable");
                None
            }
        }
    }
}

impl Registry for PypiRegistry {
    fn fetch(&self, name: &str, version: &VersionSpec) -> Result<PackageMetadata> {
        let url = self.project_url(name, version);
        tracing::debug!(%url, "fetching package metadata");

        let resp = self
            .client
            .get(&url)
            .send()
            .map_err(|e| PkgError::RegistryUnavailable(format!("{url}: {e}")))?;

        match resp.status() {
            s if s.is_success() => {}
            StatusCode::NOT_FOUND => {
                let what = match version {
                    VersionSpec::Latest => name.to_string(),
                    VersionSpec::Exact(v) => format!("{name}=={v}"),
                };
                return Err(PkgError::PackageNotFound(what));
            }
            s => {
                return Err(PkgError::RegistryUnavailable(format!("{url}: HTTP {s}")));
            }
        }

        let body: ProjectResponse = resp
            .json()
            .map_err(|e| PkgError::RegistryUnavailable(format!("{url}: invalid response: {e}")))?;

        let published_at = body
            .urls
            .iter()
            .filter_map(|f| f.upload_time_iso_8601)
            .min();
        let files = body
            .urls
            .into_iter()
            .map(|f| DistributionFile {
                filename: f.filename,
                url: f.url,
                size: f.size,
                packagetype: f.packagetype,
            })
            .collect();
        let info = body.info;
        let license = info
            .license_expression
            .filter(|l| !l.trim().is_empty())
            .or(info.license);

        Ok(PackageMetadata {
            downloads: self.recent_downloads(&info.name),
            name: info.name,
            version: info.version,
            author: info.author.filter(|a| !a.trim().is_empty()),
            license,
            summary: info.summary,
            published_at,
            fetched_at: Utc::now(),
            dependencies: info
                .requires_dist
                .unwrap_or_default()
                .iter()
                .filter_map(|r| requirement_name(r))
                .collect(),
            files,
            // A null `project_urls` still means PyPI answered: no links at all.
            project_urls: Some(info.project_urls.unwrap_or_default()),
        })
    }
}

/// Extract the distribution name from a PEP 508 requirement string.
///
/// Requirements that only apply to an extra (`; extra == "test"`) are not
/// installed by default and yield `None`.
pub fn requirement_name(requirement: &str) -> Option<String> {
    let (spec, marker) = match requirement.split_once(';') {
        Some((s, m)) => (s, Some(m)),
        None => (requirement, None),
    };
    if marker.is_some_and(|m| m.contains("extra")) {
        return None;
    }
    let name: String = spec
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect();
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PANDAS_JSON: &str = r#"{
        "info": {
            "name": "pandas",
            "version": "2.2.0",
            "author": "The Pandas Development Team",
            "license": "BSD 3-Clause License",
            "summary": "Powerful data structures for data analysis",
            "requires_dist": [
                "numpy>=1.22.4; python_version < \"3.11\"",
                "python-dateutil>=2.8.2",
                "pytest>=7.3.2; extra == \"test\""
            ],
            "project_urls": {
                "Homepage": "https://pandas.pydata.org",
                "Source Code": "https://github.com/pandas-dev/pandas"
            }
        },
        "urls": [
            {
                "filename": "pandas-2.2.0-cp312-cp312-manylinux_2_17_x86_64.whl",
                "url": "https://files.pythonhosted.org/packages/aa/pandas-2.2.0-cp312.whl",
                "size": 13012345,
                "packagetype": "bdist_wheel",
                "upload_time_iso_8601": "2024-01-20T13:33:03.467874Z"
            },
            {
                "filename": "pandas-2.2.0.tar.gz",
                "url": "https://files.pythonhosted.org/packages/bb/pandas-2.2.0.tar.gz",
                "size": 4400000,
                "packagetype": "sdist",
                "upload_time_iso_8601": "2024-01-19T20:15:11.123456Z"
            }
        ]
    }"#;

    #[test]
    fn requirement_names() {
        assert_eq!(requirement_name("numpy>=1.22"), Some("numpy".into()));
        assert_eq!(
            requirement_name("requests[socks] (>=2.0)"),
            Some("requests".into())
        );
        assert_eq!(requirement_name("pytest; extra == 'test'"), None);
        assert_eq!(
            requirement_name("tomli; python_version < \"3.11\""),
            Some("tomli".into())
        );
        assert_eq!(requirement_name("  "), None);
    }

    #[test]
    fn fetches_latest_with_downloads() {
        let mut server = mockito::Server::new();
        let meta_mock = server
            .mock("GET", "/pypi/pandas/json")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(PANDAS_JSON)
            .create();
        let stats_mock = server
            .mock("GET", "/api/packages/pandas/recent")
            .with_status(200)
            .with_body(r#"{"data":{"last_day":1,"last_week":2,"last_month":50000},"package":"pandas","type":"recent_downloads"}"#)
            .create();

        let reg = PypiRegistry::new(&server.url(), Some(&server.url()), Duration::from_secs(5))
            .unwrap();
        let meta = reg.fetch("pandas", &VersionSpec::Latest).unwrap();

        meta_mock.assert();
        stats_mock.assert();
        assert_eq!(meta.name, "pandas");
        assert_eq!(meta.version, "2.2.0");
        assert_eq!(meta.downloads, Some(50000));
        assert_eq!(meta.license.as_deref(), Some("BSD 3-Clause License"));
        assert_eq!(meta.dependencies, vec!["numpy", "python-dateutil"]);
        let published = meta.published_at.unwrap();
        assert_eq!(published.to_rfc3339().get(..10), Some("2024-01-19"));
        assert_eq!(meta.files.len(), 2);
        assert_eq!(meta.files[1].filename, "pandas-2.2.0.tar.gz");
        assert_eq!(meta.files[1].size, Some(4_400_000));
        assert_eq!(meta.files[0].packagetype.as_deref(), Some("bdist_wheel"));
        assert_eq!(
            meta.files[0].host().as_deref(),
            Some("files.pythonhosted.org")
        );
        assert_eq!(meta.source_url(), Some("https://github.com/pandas-dev/pandas"));
    }

    #[test]
    fn null_project_urls_count_as_no_links() {
        let mut server = mockito::Server::new();
        server
            .mock("GET", "/pypi/tiny/json")
            .with_status(200)
            .with_body(r#"{"info":{"name":"tiny","version":"0.1","project_urls":null},"urls":[]}"#)
            .create();
        let reg = PypiRegistry::new(&server.url(), None, Duration::from_secs(5)).unwrap();
        let meta = reg.fetch("tiny", &VersionSpec::Latest).unwrap();
        assert_eq!(meta.project_urls, Some(BTreeMap::new()));
        assert!(meta.files.is_empty());
    }

    #[test]
    fn exact_version_url() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("GET", "/pypi/pandas/2.2.0/json")
            .with_status(200)
            .with_body(PANDAS_JSON)
            .create();
        let reg = PypiRegistry::new(&server.url(), None, Duration::from_secs(5)).unwrap();
        let meta = reg
            .fetch("pandas", &VersionSpec::Exact("2.2.0".into()))
            .unwrap();
        mock.assert();
        assert_eq!(meta.downloads, None);
    }

    #[test]
    fn not_found_maps_to_package_not_found() {
        let mut server = mockito::Server::new();
        server
            .mock("GET", "/pypi/nope/json")
            .with_status(404)
            .create();
        let reg = PypiRegistry::new(&server.url(), None, Duration::from_secs(5)).unwrap();
        let err = reg.fetch("nope", &VersionSpec::Latest).unwrap_err();
        assert!(matches!(err, PkgError::PackageNotFound(_)));
    }

    #[test]
    fn server_error_maps_to_unavailable() {
        let mut server = mockito::Server::new();
        server
            .mock("GET", "/pypi/pandas/json")
            .with_status(503)
            .create();
        let reg = PypiRegistry::new(&server.url(), None, Duration::from_secs(5)).unwrap();
        let err = reg.fetch("pandas", &VersionSpec::Latest).unwrap_err();
        assert!(matches!(err, PkgError::RegistryUnavailable(_)));
    }

    #[test]
    fn stats_failure_leaves_downloads_unknown() {
        let mut server = mockito::Server::new();
        server
            .mock("GET", "/pypi/pandas/json")
            .with_status(200)
            .with_body(PANDAS_JSON)
            .create();
        server
            .mock("GET", "/api/packages/pandas/recent")
            .with_status(500)
            .create();
        let reg = PypiRegistry::new(&server.url(), Some(&server.url()), Duration::from_secs(5))
            .unwrap();
        let meta = reg.fetch("pandas", &VersionSpec::Latest).unwrap();
        assert_eq!(meta.downloads, None);
    }
}
