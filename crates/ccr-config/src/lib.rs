//! Cluster configuration synchronisation for `terraform/clusters.tf`.
//!
//! The encoder and reader cover the nested map/list/scalar subset of HCL used by
//! the `clusters` variable. The patcher rewrites one brace-delimited block in
//! place and the store wraps both into validated read/update operations.

pub mod config_patcher;
pub mod config_store;
pub mod hcl_encoder;
pub mod hcl_reader;

pub use config_patcher::{locate_block, patch_block, patch_file, BlockSpan, BlockTarget, PatchError};
pub use config_store::{
    clusters_file_path, extract_clusters_default, ClusterUpdate, ConfigError, ConfigStore,
    RepoPathResolver, StaticRepoPathResolver, CLUSTERS_BLOCK_DEPTH, CLUSTERS_DEFAULT_MARKER,
    CLUSTERS_VARIABLE_ANCHOR,
};
pub use hcl_encoder::{encode_hcl_body, render_hcl_key, render_hcl_string};
pub use hcl_reader::{decode_hcl_body, HclReadError};
