//! Portrait template library
//!
//! Reference portraits are loaded once, grouped by identity, and their
//! features are computed at load time. The library is read-only afterwards
//! and can be shared between threads behind an `Arc`.
//!
//! Two directory layouts are supported:
//!
//! ```text
//! templates/                      templates/
//!   celine/                         celine.png
//!     default.png                   celine@halloween.png
//!     halloween.png                 krau__summer.png
//!   krau/                           krau.png
//!     default.png
//! ```
//!
//! The left layout (one subdirectory per identity) is preferred. In the flat
//! layout, `name@variant` and `name__variant` stems group into one identity.

use image::GrayImage;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::capture::image_files_in;
use super::features::{count_ratio_matches, FeatureExtractor, FeatureSet};
use super::VisionError;
use crate::config::FeatureSettings;

/// How the template directory is organised
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    /// One image per identity at the root (with optional `@variant` suffixes)
    Flat,
    /// One subdirectory per identity holding any number of variants
    MultiVariant,
}

impl LoadMode {
    /// Any subdirectory switches the whole library to multi-variant mode
    pub fn detect(dir: &Path) -> std::io::Result<Self> {
        for entry in std::fs::read_dir(dir)? {
            if entry?.path().is_dir() {
                return Ok(LoadMode::MultiVariant);
            }
        }
        Ok(LoadMode::Flat)
    }
}

/// One reference appearance of an identity
#[derive(Debug, Clone)]
pub struct Variant {
    /// Variant name (file stem or `@` suffix)
    pub name: String,
    /// File the variant was loaded from, if any
    pub source: Option<PathBuf>,
    features: FeatureSet,
}

impl Variant {
    /// Precomputed features; never modified after load
    pub fn features(&self) -> &FeatureSet {
        &self.features
    }
}

/// A recognisable subject with one or more variants
#[derive(Debug, Clone)]
pub struct Identity {
    key: String,
    variants: Vec<Variant>,
}

impl Identity {
    /// Build an identity from in-memory variant images
    pub fn from_images(
        key: impl Into<String>,
        images: Vec<(String, GrayImage)>,
        extractor: &FeatureExtractor,
    ) -> Self {
        let variants = images
            .into_iter()
            .map(|(name, image)| Variant {
                name,
                source: None,
                features: extractor.extract(&image),
            })
            .collect();
        Self {
            key: key.into(),
            variants,
        }
    }

    /// Stable key reported in results
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Variants in load order; never empty when loaded from disk
    pub fn variants(&self) -> &[Variant] {
        &self.variants
    }

    /// Highest accepted-correspondence count over all variants, with the
    /// index of the variant that produced it. One strong skin is enough.
    pub fn best_variant_score(&self, slot: &FeatureSet, ratio: f32) -> (usize, Option<usize>) {
        let mut best = (0, None);
        for (i, variant) in self.variants.iter().enumerate() {
            let score = count_ratio_matches(&variant.features, slot, ratio);
            if best.1.is_none() || score > best.0 {
                best = (score, Some(i));
            }
        }
        best
    }
}

/// All known identities plus the extractor their features came from
#[derive(Debug, Clone)]
pub struct TemplateLibrary {
    mode: LoadMode,
    identities: Vec<Identity>,
    extractor: FeatureExtractor,
}

impl TemplateLibrary {
    /// Load every template under `dir`
    pub fn load(dir: &Path, settings: &FeatureSettings) -> Result<Self, VisionError> {
        let mode = LoadMode::detect(dir).map_err(|e| {
            VisionError::LoadError(format!("cannot read {}: {}", dir.display(), e))
        })?;
        let extractor = FeatureExtractor::new(settings.clone());

        let grouped = match mode {
            LoadMode::MultiVariant => collect_multi_variant(dir)?,
            LoadMode::Flat => collect_flat(dir)?,
        };

        let mut identities = Vec::new();
        let mut decoded = 0usize;
        for (key, files) in grouped {
            let mut variants = Vec::new();
            for (name, path) in files {
                let image = match image::open(&path) {
                    Ok(img) => img.to_luma8(),
                    Err(e) => {
                        log::warn!("Cannot read template {}: {}", path.display(), e);
                        continue;
                    }
                };
                decoded += 1;
                let features = extractor.extract(&image);
                if features.is_empty() {
                    log::warn!("No features in template {}; it will never match", path.display());
                }
                variants.push(Variant {
                    name,
                    source: Some(path),
                    features,
                });
            }

            if variants.is_empty() {
                log::warn!("Identity {} has no readable variants, skipping", key);
                continue;
            }
            log::debug!(
                "{}: {} descriptors across {} variant(s)",
                key,
                variants.iter().map(|v| v.features.len()).sum::<usize>(),
                variants.len()
            );
            identities.push(Identity { key, variants });
        }

        if decoded == 0 {
            return Err(VisionError::LoadError(format!(
                "no decodable templates in {}",
                dir.display()
            )));
        }

        log::info!(
            "Template library loaded {} identities ({:?} layout) from {}",
            identities.len(),
            mode,
            dir.display()
        );

        Ok(Self {
            mode,
            identities,
            extractor,
        })
    }

    /// Assemble a library from identities built in memory
    pub fn from_identities(
        identities: Vec<Identity>,
        extractor: FeatureExtractor,
    ) -> Result<Self, VisionError> {
        if identities.is_empty() {
            return Err(VisionError::LoadError(
                "template library needs at least one identity".to_string(),
            ));
        }
        Ok(Self {
            mode: LoadMode::MultiVariant,
            identities,
            extractor,
        })
    }

    /// Layout the library was loaded from
    pub fn mode(&self) -> LoadMode {
        self.mode
    }

    /// Every identity in key order
    pub fn identities(&self) -> &[Identity] {
        &self.identities
    }

    /// Look up an identity by key
    pub fn identity(&self, key: &str) -> Option<&Identity> {
        self.identities.iter().find(|i| i.key == key)
    }

    /// Extractor slot crops must use so their descriptors are comparable
    pub fn extractor(&self) -> &FeatureExtractor {
        &self.extractor
    }

    /// Total variants over all identities
    pub fn variant_count(&self) -> usize {
        self.identities.iter().map(|i| i.variants.len()).sum()
    }

    /// Best score and variant index for one identity against slot features
    pub fn best_variant_score(
        &self,
        key: &str,
        slot: &FeatureSet,
        ratio: f32,
    ) -> Option<(usize, Option<usize>)> {
        self.identity(key)
            .map(|identity| identity.best_variant_score(slot, ratio))
    }
}

type Grouped = BTreeMap<String, Vec<(String, PathBuf)>>;

fn collect_multi_variant(dir: &Path) -> Result<Grouped, VisionError> {
    let read_err = |e: std::io::Error| VisionError::LoadError(format!("{}: {}", dir.display(), e));

    let mut subdirs: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(read_err)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_dir())
        .collect();
    subdirs.sort();

    let mut grouped = Grouped::new();
    for sub in subdirs {
        let Some(key) = sub.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            continue;
        };
        let files = image_files_in(&sub).map_err(read_err)?;
        let entry = grouped.entry(key).or_default();
        for path in files {
            entry.push((file_stem(&path), path));
        }
    }
    Ok(grouped)
}

fn collect_flat(dir: &Path) -> Result<Grouped, VisionError> {
    let files = image_files_in(dir)
        .map_err(|e| VisionError::LoadError(format!("{}: {}", dir.display(), e)))?;
    if files.is_empty() {
        return Err(VisionError::LoadError(format!(
            "no templates in {}",
            dir.display()
        )));
    }

    let mut grouped = Grouped::new();
    for path in files {
        let (identity, variant) = parse_template_name(&file_stem(&path));
        grouped.entry(identity).or_default().push((variant, path));
    }
    Ok(grouped)
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string()
}

/// Split a flat-layout file stem into `(identity, variant)`.
///
/// `hero@variant` takes priority over `hero__variant`; anything else is
/// the `default` variant of the whole stem.
pub fn parse_template_name(stem: &str) -> (String, String) {
    let (identity, variant) = if let Some((h, v)) = stem.split_once('@') {
        (h, v)
    } else if let Some((h, v)) = stem.split_once("__") {
        (h, v)
    } else {
        (stem, "default")
    };
    (sanitize_key(identity), sanitize_key(variant))
}

/// Lower-case, hyphen-separated key restricted to `[a-z0-9_-]`
pub fn sanitize_key(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_hyphen = false;
    for c in text.trim().chars().flat_map(char::to_lowercase) {
        if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' {
            if pending_hyphen && !out.is_empty() {
                out.push('-');
            }
            pending_hyphen = false;
            out.push(c);
        } else {
            pending_hyphen = true;
        }
    }
    if out.is_empty() {
        "unknown".to_string()
    } else {
        out
    }
}
