use cfcat_adapters::{FixtureSnapshotSource, SnapshotSource};
use cfcat_core::ProblemKey;

fn fixture_path() -> std::path::PathBuf {
    std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../../fixtures/codeforces/problemset.json")
}

#[tokio::test]
async fn bundled_fixture_decodes_with_lenient_entries() {
    let snapshot = FixtureSnapshotSource::new(fixture_path())
        .fetch()
        .await
        .expect("fixture decodes");

    assert_eq!(snapshot.problems.len(), 4);
    assert_eq!(snapshot.statistics.len(), 2);

    let keys: Vec<_> = snapshot.problems.iter().map(|p| p.key()).collect();
    assert_eq!(keys[0], Some(ProblemKey::new(1, "A")));
    assert_eq!(keys[2], Some(ProblemKey::new(2, "B1")));
    assert_eq!(keys[3], None);
    assert_eq!(snapshot.problems[2].rating, None);
}
