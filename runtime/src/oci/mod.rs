//! OCI image support for the mirror engine.
//!
//! Reads local image layouts, extracts labeled layer content, parses
//! catalogs and release payload manifests, and copies images between
//! registries and layouts.
//!
//! # Layout
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    OCI Image Layout                          │
//! │                                                              │
//! │  image/                                                      │
//! │  ├── oci-layout           (OCI layout marker)               │
//! │  ├── index.json           (Image index)                     │
//! │  └── blobs/                                                 │
//! │      └── sha256/                                            │
//! │          ├── <manifest>   (Image manifest)                  │
//! │          ├── <config>     (Labels: index configs location)  │
//! │          └── <layers>     (configs/, release-manifests/)    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod catalog;
pub(crate) mod layers;
pub(crate) mod layout;
pub mod reference;
pub mod registry;
pub mod release;

pub use catalog::{package_filters, Catalog, PackageFilters, RelatedImage};
pub use layers::{LayerExtractor, TarLayerExtractor};
pub use layout::{OciLayout, INDEX_CONFIGS_LABEL};
pub use reference::{catalog_path, ImageName};
pub use registry::RegistryTransfer;
pub use release::{
    read_image_references, release_manifests_dir, RELEASE_MANIFESTS_DIR, RELEASE_MANIFESTS_LABEL,
};
