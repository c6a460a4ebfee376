//! Resources and the local file system they are stored in.

pub mod fs;
pub mod resource;

pub use fs::{FileSystem, LocalFileSystem};
pub use resource::{
    AssetProgress, DataAsset, MetaAsset, ProgressSubscription, RemoteStore, Resource,
    ResourceInfo,
};
