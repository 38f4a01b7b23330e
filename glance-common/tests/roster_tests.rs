//! Roster file integration tests

use glance_common::config::{AnalyzerSpec, Config};
use glance_common::types::AnalyzerCategory;

#[test]
fn full_roster_file_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("analyzers.json");

    // Serialize the built-in roster, read it back through the file path.
    let roster = Config::default_roster();
    let file = serde_json::json!({ "analyzers": roster });
    std::fs::write(&path, serde_json::to_string_pretty(&file).unwrap()).unwrap();

    let content = std::fs::read_to_string(&path).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&content).unwrap();
    let reloaded: Vec<AnalyzerSpec> =
        serde_json::from_value(parsed["analyzers"].clone()).unwrap();

    assert_eq!(reloaded.len(), roster.len());
    for (a, b) in roster.iter().zip(reloaded.iter()) {
        assert_eq!(a.id, b.id);
        assert_eq!(a.port, b.port);
        assert_eq!(a.category, b.category);
        assert_eq!(a.optimal_size, b.optimal_size);
    }
}

#[test]
fn categories_cover_the_roster() {
    let roster = Config::default_roster();

    let count = |c: AnalyzerCategory| roster.iter().filter(|a| a.category == c).count();
    assert!(count(AnalyzerCategory::Spatial) >= 5);
    assert!(count(AnalyzerCategory::Semantic) >= 2);
    assert_eq!(count(AnalyzerCategory::Specialized), 3);
    assert!(count(AnalyzerCategory::Other) >= 2);
    // reserved category: accepted by the schema, none configured
    assert_eq!(count(AnalyzerCategory::Classification), 0);
}
