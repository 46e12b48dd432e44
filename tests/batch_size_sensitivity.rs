use std::fs;
use std::path::Path;
use std::time::Duration;

use cname_rollup::{MergePolicy, Orchestrator, RollupConfig, TimestampFormat};

fn rollup(body: &str, chunk_size: usize, policy: MergePolicy) -> String {
    let temp = tempfile::tempdir().unwrap();
    let root = temp.path();
    let shard = root.join("in").join("com");
    fs::create_dir_all(&shard).unwrap();
    fs::write(shard.join("part.csv"), body).unwrap();
    Orchestrator::new(config_in(root).with_chunk_size(chunk_size).with_merge_policy(policy))
        .unwrap()
        .run()
        .unwrap();
    fs::read_to_string(root.join("out/com/part.csv")).unwrap()
}

fn config_in(root: &Path) -> RollupConfig {
    RollupConfig::new(root.join("in"), root.join("out"))
        .with_state_dir(root.join("state"))
        .with_lock_timeout(Some(Duration::from_secs(5)))
        .with_owner("batch-test")
}

#[test]
fn first_batch_wins_depends_on_chunk_size() {
    let body = "a,100\nb,200\na,50\n";
    assert_eq!(
        rollup(body, 3, MergePolicy::FirstBatchWins),
        "a;50;100\nb;200;200\n"
    );
    assert_eq!(
        rollup(body, 2, MergePolicy::FirstBatchWins),
        "a;100;100\nb;200;200\n"
    );
}

#[test]
fn whole_file_is_invariant_under_chunk_size() {
    let body: String = (0..300)
        .map(|idx| format!("k{}.com,{}\n", (idx * 11) % 23, 50_000 - (idx * 37) % 4_001))
        .collect();
    let reference = rollup(&body, 1_000, MergePolicy::WholeFile);
    for chunk_size in [1, 2, 7, 64, 299, 300] {
        assert_eq!(
            rollup(&body, chunk_size, MergePolicy::WholeFile),
            reference,
            "chunk size {chunk_size}"
        );
    }
    // With one batch both policies agree.
    assert_eq!(rollup(&body, 1_000, MergePolicy::FirstBatchWins), reference);
}

#[test]
fn keys_are_sorted_within_a_batch_and_appended_in_first_batch_order() {
    let body = "z,1\ny,2\nb,3\na,4\n";
    assert_eq!(
        rollup(body, 2, MergePolicy::WholeFile),
        "y;2;2\nz;1;1\na;4;4\nb;3;3\n"
    );
    assert_eq!(
        rollup(body, 4, MergePolicy::WholeFile),
        "a;4;4\nb;3;3\ny;2;2\nz;1;1\n"
    );
}

#[test]
fn undefined_timestamps_render_empty_and_do_not_widen_spans() {
    let body = "a,oops\nb,\na,70\nc,30\nc,not-a-time\n";
    assert_eq!(
        rollup(body, 100, MergePolicy::WholeFile),
        "a;70;70\nb;;\nc;30;30\n"
    );
}

#[test]
fn quoted_fields_and_datetime_rendering() {
    let temp = tempfile::tempdir().unwrap();
    let root = temp.path();
    let shard = root.join("in").join("org");
    fs::create_dir_all(&shard).unwrap();
    fs::write(
        shard.join("part.csv"),
        "\"x.org\",\"86400\",extra\r\nx.org,0\n",
    )
    .unwrap();
    Orchestrator::new(config_in(root).with_timestamp_format(TimestampFormat::DateTime))
        .unwrap()
        .run()
        .unwrap();
    assert_eq!(
        fs::read_to_string(root.join("out/org/part.csv")).unwrap(),
        "x.org;1970-01-01 00:00:00;1970-01-02 00:00:00\n"
    );
}
