/// Canonical domain-name key that observations are grouped by.
/// Example: `www.example.com`
pub type Cname = String;
/// Observation timestamp in Unix epoch seconds.
/// Example: `1700000000`
pub type EpochSeconds = i64;
/// Path strings as they are written to (and compared against) the checkpoint registry.
/// Example: `input/com/part-0001.csv`
pub type PathString = String;
/// Shard directory name, one per top-level domain.
/// Examples: `com`, `net`, `co.uk`
pub type ShardName = String;
/// Identity of the orchestrator instance holding an in-flight claim.
/// Example: `host-a-pid4242-1700000000123456789`
pub type OwnerId = String;
