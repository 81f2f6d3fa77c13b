//! Release lookup against a package index.

use std::collections::HashMap;
use std::time::Duration;

use url::Url;

use crate::version::{Version, VersionExt as _};
use crate::AgentResult;
use crate::Context as _;

/// A package index that can enumerate published releases.
///
/// Returns `(version, is_prerelease)` pairs in unspecified order. Failures of
/// any kind yield an empty list; callers treat a package without releases as
/// already up to date.
pub trait Registry {
    fn list_versions(&self, name: &str) -> Vec<(Version, bool)>;
}

/// Registry over the PyPI JSON API.
pub struct PypiRegistry {
    base: Url,
    client: reqwest::blocking::Client,
}

impl PypiRegistry {
    pub fn new(base: Url) -> AgentResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build the index HTTP client")?;
        Ok(PypiRegistry { base, client })
    }

    fn project_url(&self, name: &str) -> String {
        format!("{}/{}/json", self.base.as_str().trim_end_matches('/'), name)
    }
}

impl Registry for PypiRegistry {
    fn list_versions(&self, name: &str) -> Vec<(Version, bool)> {
        let url = self.project_url(name);
        let response = match self
            .client
            .get(&url)
            .send()
            .and_then(|response| response.error_for_status())
        {
            Ok(response) => response,
            Err(err) => {
                log::debug!("index lookup for {name} failed: {err}");
                return Vec::new();
            }
        };
        let payload: serde_json::Value = match response.json() {
            Ok(payload) => payload,
            Err(err) => {
                log::debug!("bad index payload for {name}: {err}");
                return Vec::new();
            }
        };
        let Some(releases) = payload.get("releases").and_then(|value| value.as_object()) else {
            return Vec::new();
        };
        releases
            .keys()
            .filter_map(|raw| crate::version::parse_lenient(raw))
            .map(|version| {
                let prerelease = !version.is_stable();
                (version, prerelease)
            })
            .collect()
    }
}

/// Cached per-run view over a [`Registry`].
pub struct RegistryProbe<'r> {
    registry: &'r dyn Registry,
    cache: HashMap<String, Vec<(Version, bool)>>,
}

impl<'r> RegistryProbe<'r> {
    pub fn new(registry: &'r dyn Registry) -> Self {
        RegistryProbe {
            registry,
            cache: HashMap::new(),
        }
    }

    fn releases(&mut self, name: &str) -> &[(Version, bool)] {
        self.cache
            .entry(name.to_owned())
            .or_insert_with(|| self.registry.list_versions(name))
    }

    /// Greatest stable release, falling back to the greatest release overall
    /// when the package has never shipped a final version.
    pub fn latest(&mut self, name: &str) -> Option<Version> {
        let releases = self.releases(name);
        releases
            .iter()
            .filter(|(_, prerelease)| !prerelease)
            .map(|(version, _)| version)
            .max()
            .or_else(|| releases.iter().map(|(version, _)| version).max())
            .cloned()
    }

    /// Sorted stable releases `lo <= v < hi`.
    pub fn stable_range(&mut self, name: &str, lo: &Version, hi: &Version) -> Vec<Version> {
        let mut versions: Vec<Version> = self
            .releases(name)
            .iter()
            .filter(|(_, prerelease)| !prerelease)
            .map(|(version, _)| version)
            .filter(|version| *version >= lo && *version < hi)
            .cloned()
            .collect();
        versions.sort();
        versions.dedup();
        versions
    }
}
