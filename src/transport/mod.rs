/// Filesystem enumeration of the shard tree.
pub mod fs;
