//! Operator catalog reader.
//!
//! Reads the declarative-config documents extracted from a catalog image
//! (`olm.package`, `olm.channel`, `olm.bundle`) and selects the related images
//! of the bundles a mirror run needs.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use a3s_mirror_core::config::Operator;
use a3s_mirror_core::error::{MirrorError, Result};
use semver::Version;
use serde::Deserialize;

const SCHEMA_PACKAGE: &str = "olm.package";
const SCHEMA_CHANNEL: &str = "olm.channel";
const SCHEMA_BUNDLE: &str = "olm.bundle";
const PROPERTY_PACKAGE: &str = "olm.package";

/// An image a bundle needs at runtime.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
pub struct RelatedImage {
    /// Declared name, possibly empty
    #[serde(default)]
    pub name: String,
    /// Image reference, normally pinned by digest
    pub image: String,
}

/// Channel and version restriction for one package.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageFilter {
    /// Channel to read; the package default channel when empty
    pub channel: String,
    pub min_version: String,
    pub max_version: String,
}

/// Package name to the channel restrictions declared for it.
pub type PackageFilters = BTreeMap<String, Vec<PackageFilter>>;

/// Build the package filter map from the declared operator entries.
pub fn package_filters(operators: &[Operator]) -> PackageFilters {
    let mut filters = PackageFilters::new();
    for operator in operators {
        for package in &operator.packages {
            let entry = filters.entry(package.name.clone()).or_default();
            if package.channels.is_empty() {
                entry.push(PackageFilter::default());
            }
            for channel in &package.channels {
                entry.push(PackageFilter {
                    channel: channel.name.clone(),
                    min_version: channel.min_version.clone(),
                    max_version: channel.max_version.clone(),
                });
            }
        }
    }
    filters
}

/// One declarative-config document. Unused fields are ignored.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Meta {
    #[serde(default)]
    schema: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    package: String,
    #[serde(default)]
    default_channel: String,
    #[serde(default)]
    entries: Vec<ChannelEntry>,
    #[serde(default)]
    related_images: Vec<RelatedImage>,
    #[serde(default)]
    properties: Vec<Property>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ChannelEntry {
    name: String,
    #[serde(default)]
    replaces: Option<String>,
    #[serde(default)]
    skips: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Property {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    value: serde_json::Value,
}

#[derive(Debug, Clone)]
struct Bundle {
    version: Option<Version>,
    related_images: Vec<RelatedImage>,
}

#[derive(Debug, Default)]
struct Package {
    default_channel: String,
    channels: BTreeMap<String, Vec<ChannelEntry>>,
    bundles: BTreeMap<String, Bundle>,
}

/// Packages, channels and bundles of one extracted catalog.
#[derive(Debug, Default)]
pub struct Catalog {
    packages: BTreeMap<String, Package>,
}

impl Catalog {
    /// Load every `*.json`, `*.yaml` and `*.yml` document below `dir`.
    pub fn load(dir: &Path) -> Result<Self> {
        let mut files = Vec::new();
        collect_files(dir, &mut files)?;
        files.sort();

        let mut catalog = Catalog::default();
        for file in &files {
            for meta in read_documents(file)? {
                catalog.add(meta);
            }
        }

        tracing::debug!(
            dir = %dir.display(),
            files = files.len(),
            packages = catalog.packages.len(),
            "Loaded operator catalog"
        );
        Ok(catalog)
    }

    fn add(&mut self, meta: Meta) {
        match meta.schema.as_str() {
            SCHEMA_PACKAGE => {
                let package = self.packages.entry(meta.name).or_default();
                package.default_channel = meta.default_channel;
            }
            SCHEMA_CHANNEL => {
                self.packages
                    .entry(meta.package)
                    .or_default()
                    .channels
                    .insert(meta.name, meta.entries);
            }
            SCHEMA_BUNDLE => {
                let version = bundle_version(&meta.properties);
                self.packages.entry(meta.package).or_default().bundles.insert(
                    meta.name,
                    Bundle {
                        version,
                        related_images: meta.related_images,
                    },
                );
            }
            _ => {}
        }
    }

    pub fn package_names(&self) -> impl Iterator<Item = &str> {
        self.packages.keys().map(String::as_str)
    }

    /// Related images per selected bundle name.
    ///
    /// Without filters, every package contributes the head bundle of its
    /// default channel. With filters, only the listed packages contribute:
    /// the channel head when no bounds are set, otherwise every bundle in the
    /// channel whose version lies in `[min, max]`.
    pub fn related_images(
        &self,
        filters: &PackageFilters,
    ) -> Result<BTreeMap<String, Vec<RelatedImage>>> {
        let mut selected = BTreeMap::new();

        if filters.is_empty() {
            for (name, package) in &self.packages {
                match package.head(&package.default_channel, name) {
                    Ok(head) => package.select(&head, &mut selected),
                    Err(e) => tracing::warn!(
                        package = %name,
                        error = %e,
                        "Skipping package without a head bundle"
                    ),
                }
            }
            return Ok(selected);
        }

        for (name, package_filters) in filters {
            let Some(package) = self.packages.get(name) else {
                tracing::debug!(package = %name, "Package not present in catalog");
                continue;
            };
            for filter in package_filters {
                let channel = if filter.channel.is_empty() {
                    package.default_channel.as_str()
                } else {
                    filter.channel.as_str()
                };

                if filter.min_version.is_empty() && filter.max_version.is_empty() {
                    let head = package.head(channel, name)?;
                    package.select(&head, &mut selected);
                    continue;
                }

                let min = parse_bound(&filter.min_version, name)?;
                let max = parse_bound(&filter.max_version, name)?;
                for bundle in package.bundles_in_range(channel, name, min.as_ref(), max.as_ref())? {
                    package.select(&bundle, &mut selected);
                }
            }
        }
        Ok(selected)
    }
}

impl Package {
    fn entries(&self, channel: &str, package: &str) -> Result<&[ChannelEntry]> {
        self.channels
            .get(channel)
            .map(Vec::as_slice)
            .ok_or_else(|| {
                MirrorError::collection(
                    "operator",
                    format!("package {} has no channel '{}'", package, channel),
                )
            })
    }

    /// The entry no other entry replaces or skips, preferring the highest version.
    fn head(&self, channel: &str, package: &str) -> Result<String> {
        let entries = self.entries(channel, package)?;
        let superseded: BTreeSet<&str> = entries
            .iter()
            .flat_map(|e| e.replaces.iter().chain(e.skips.iter()))
            .map(String::as_str)
            .collect();

        entries
            .iter()
            .filter(|e| !superseded.contains(e.name.as_str()))
            .max_by(|a, b| {
                self.version_of(&a.name)
                    .cmp(&self.version_of(&b.name))
                    .then_with(|| b.name.cmp(&a.name))
            })
            .map(|e| e.name.clone())
            .ok_or_else(|| {
                MirrorError::collection(
                    "operator",
                    format!("channel '{}' of package {} has no head", channel, package),
                )
            })
    }

    fn version_of(&self, bundle: &str) -> Option<&Version> {
        self.bundles.get(bundle).and_then(|b| b.version.as_ref())
    }

    fn bundles_in_range(
        &self,
        channel: &str,
        package: &str,
        min: Option<&Version>,
        max: Option<&Version>,
    ) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in self.entries(channel, package)? {
            let Some(version) = self.version_of(&entry.name) else {
                tracing::warn!(bundle = %entry.name, "Bundle has no parsable version, skipping");
                continue;
            };
            if min.map_or(true, |m| version >= m) && max.map_or(true, |m| version <= m) {
                names.push(entry.name.clone());
            }
        }
        Ok(names)
    }

    fn select(&self, bundle: &str, selected: &mut BTreeMap<String, Vec<RelatedImage>>) {
        match self.bundles.get(bundle) {
            Some(b) => {
                selected.insert(bundle.to_string(), b.related_images.clone());
            }
            None => tracing::warn!(bundle = %bundle, "Channel entry without bundle document"),
        }
    }
}

fn parse_bound(raw: &str, package: &str) -> Result<Option<Version>> {
    if raw.is_empty() {
        return Ok(None);
    }
    Version::parse(raw).map(Some).map_err(|e| {
        MirrorError::Config(format!(
            "invalid version '{}' for package {}: {}",
            raw, package, e
        ))
    })
}

fn bundle_version(properties: &[Property]) -> Option<Version> {
    properties
        .iter()
        .find(|p| p.kind == PROPERTY_PACKAGE)
        .and_then(|p| p.value.get("version"))
        .and_then(|v| v.as_str())
        .and_then(|v| Version::parse(v).ok())
}

fn collect_files(dir: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(&path, files)?;
        } else if matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("json" | "yaml" | "yml")
        ) {
            files.push(path);
        }
    }
    Ok(())
}

fn read_documents(path: &Path) -> Result<Vec<Meta>> {
    let content = std::fs::read_to_string(path)?;
    let is_json = path.extension().and_then(|e| e.to_str()) == Some("json");

    let parsed: std::result::Result<Vec<Meta>, String> = if is_json {
        serde_json::Deserializer::from_str(&content)
            .into_iter::<Meta>()
            .map(|doc| doc.map_err(|e| e.to_string()))
            .collect()
    } else {
        serde_yaml::Deserializer::from_str(&content)
            .map(|doc| Meta::deserialize(doc).map_err(|e| e.to_string()))
            .collect()
    };

    parsed.map_err(|e| {
        MirrorError::collection("operator", format!("failed to parse {}: {}", path.display(), e))
    })
}
