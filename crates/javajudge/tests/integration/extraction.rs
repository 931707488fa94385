use std::path::Path;
use std::time::Duration;

use javajudge::{
    DirectorySource, ExtractOptions, ExtractionError, PageContent, PageSource, PageTable, extract,
};

use super::{FIXTURES_PATH, fixture_text};

fn pages_dir() -> std::path::PathBuf {
    Path::new(FIXTURES_PATH).join("pages")
}

fn table() -> PageTable {
    PageTable::load(&pages_dir().join("page_ids.json")).expect("page table")
}

#[test]
fn test_page_table_fixture() {
    let table = table();
    assert_eq!(table.len(), 2);
    assert_eq!(table.name("4711"), Some("Suma de dos numeros"));
    assert_eq!(table.page_ids().collect::<Vec<_>>(), vec!["4711", "4712"]);
}

#[test]
fn test_extract_blocks_page() {
    let page = PageContent::from_json("4711", &fixture_text("pages/4711.json")).unwrap();
    let results = extract(&page, &table(), &ExtractOptions::default());
    assert_eq!(results.len(), 3);

    let first = results[0].as_ref().expect("first block is valid");
    assert_eq!(first.student_id, "alu01");
    assert_eq!(first.exercise_name, "Suma de dos numeros");
    assert_eq!(first.test_cases[0].input, "3\n4\n");
    assert_eq!(first.test_cases[0].expected_output, "7");
    assert_eq!(first.test_cases[1].time_limit, Duration::from_secs(3));
    assert!(first.abstraction.is_some());

    // A syntax error is still a valid submission; it fails at compile time
    assert_eq!(results[1].as_ref().unwrap().student_id, "alu02");

    assert!(matches!(
        results[2],
        Err(ExtractionError::MissingField { field: "source", index: 2, .. })
    ));
}

#[test]
fn test_extract_bare_array_page() {
    let page = PageContent::from_json("4712", &fixture_text("pages/4712.json")).unwrap();
    let results = extract(&page, &table(), &ExtractOptions::default());
    let sub = results[0].as_ref().unwrap();
    assert_eq!(sub.exercise_id, "4712");
    assert_eq!(sub.test_cases[0].name, "test-1");
    assert_eq!(sub.test_cases[1].name, "test-2");
    assert_eq!(sub.test_cases[0].time_limit, Duration::from_secs(2));
}

#[test]
fn test_fingerprint_stable_across_extractions() {
    let text = fixture_text("pages/4711.json");
    let a = extract(
        &PageContent::from_json("4711", &text).unwrap(),
        &table(),
        &ExtractOptions::default(),
    );
    let b = extract(
        &PageContent::from_json("4711", &text).unwrap(),
        &table(),
        &ExtractOptions::default(),
    );
    assert_eq!(
        a[0].as_ref().unwrap().fingerprint(),
        b[0].as_ref().unwrap().fingerprint()
    );
    assert_ne!(
        a[0].as_ref().unwrap().fingerprint(),
        a[1].as_ref().unwrap().fingerprint()
    );
}

#[tokio::test]
async fn test_directory_source_reads_fixtures() {
    let source = DirectorySource::new(pages_dir());
    let text = source.fetch("4712").await.unwrap().expect("snapshot");
    assert!(text.contains("Saludo"));
    assert!(source.fetch("9999").await.unwrap().is_none());
}
