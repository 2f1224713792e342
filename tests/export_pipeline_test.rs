// ABOUTME: End-to-end tests of the schema export pipeline against the in-memory source
// ABOUTME: Reads produced archives back to check entry order, CSV content and connection accounting

use schema_zip_exporter::archive::{ArchiveSink, DirectorySink, ZipStreamWriter};
use schema_zip_exporter::export::export_schema;
use schema_zip_exporter::source::memory::{MemoryDatabase, MemoryTable};
use std::io::{Cursor, Read};
use tokio::io::AsyncReadExt;

/// Decoded archive: entry names in archive order with their CSV records
fn read_archive(bytes: Vec<u8>) -> Vec<(String, Vec<Vec<String>>)> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).expect("archive should be valid");
    (0..archive.len())
        .map(|i| {
            let mut entry = archive.by_index(i).unwrap();
            let mut content = String::new();
            entry.read_to_string(&mut content).unwrap();
            (entry.name().to_string(), parse_csv(&content))
        })
        .collect()
}

fn parse_csv(content: &str) -> Vec<Vec<String>> {
    csv::ReaderBuilder::new()
        .has_headers(false)
        .from_reader(content.as_bytes())
        .records()
        .map(|r| r.unwrap().iter().map(str::to_string).collect())
        .collect()
}

fn record(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

fn sales_db() -> MemoryDatabase {
    MemoryDatabase::new()
        .with_table(
            "sales",
            MemoryTable::new("customers", &["id", "name"])
                .row(&[Some("1"), Some("Ada")])
                .row(&[Some("2"), None]),
        )
        .with_table(
            "sales",
            MemoryTable::new("orders", &["id", "customer_id", "total"])
                .row(&[Some("10"), Some("1"), Some("19.99")]),
        )
        .with_table("sales", MemoryTable::new("refunds", &["id", "reason"]))
}

// ============================================================================
// Archive shape
// ============================================================================

#[tokio::test]
async fn test_one_entry_per_table_in_catalog_order() {
    let db = sales_db();
    let mut sink = ZipStreamWriter::new(Vec::new());

    let summary = export_schema(&db, "sales", &mut sink).await.unwrap();
    assert_eq!(summary.tables, 3);
    assert_eq!(summary.rows, 3);
    assert_eq!(summary.bytes, sink.bytes_written());

    let entries = read_archive(sink.into_inner().await.unwrap());
    let names: Vec<&str> = entries.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, vec!["customers.csv", "orders.csv", "refunds.csv"]);
}

#[tokio::test]
async fn test_header_then_rows_with_nulls_as_empty_fields() {
    let db = sales_db();
    let mut sink = ZipStreamWriter::new(Vec::new());
    export_schema(&db, "sales", &mut sink).await.unwrap();

    let entries = read_archive(sink.into_inner().await.unwrap());
    assert_eq!(
        entries[0].1,
        vec![record(&["id", "name"]), record(&["1", "Ada"]), record(&["2", ""])]
    );
    assert_eq!(
        entries[1].1,
        vec![
            record(&["id", "customer_id", "total"]),
            record(&["10", "1", "19.99"])
        ]
    );

    for (name, records) in &entries {
        let width = records[0].len();
        assert!(
            records.iter().all(|r| r.len() == width),
            "{} has a record whose width differs from its header",
            name
        );
    }
}

#[tokio::test]
async fn test_empty_table_has_only_header() {
    let db = sales_db();
    let mut sink = ZipStreamWriter::new(Vec::new());
    export_schema(&db, "sales", &mut sink).await.unwrap();

    let entries = read_archive(sink.into_inner().await.unwrap());
    assert_eq!(entries[2].0, "refunds.csv");
    assert_eq!(entries[2].1, vec![record(&["id", "reason"])]);
}

#[tokio::test]
async fn test_zero_tables_yields_valid_empty_archive() {
    let db = MemoryDatabase::new().with_empty_schema("empty");
    let stats = db.stats();
    let mut sink = ZipStreamWriter::new(Vec::new());

    let summary = export_schema(&db, "empty", &mut sink).await.unwrap();
    assert_eq!(summary.tables, 0);

    let bytes = sink.into_inner().await.unwrap();
    assert!(!bytes.is_empty());
    assert!(read_archive(bytes).is_empty());
    assert_eq!(stats.opened(), 1);
    assert_eq!(stats.closed(), 1);
}

#[tokio::test]
async fn test_unknown_schema_behaves_like_empty_schema() {
    let db = sales_db();
    let mut sink = ZipStreamWriter::new(Vec::new());

    let summary = export_schema(&db, "missing", &mut sink).await.unwrap();
    assert_eq!(summary.tables, 0);
    assert!(read_archive(sink.into_inner().await.unwrap()).is_empty());
}

// ============================================================================
// CSV content
// ============================================================================

#[tokio::test]
async fn test_special_characters_round_trip() {
    let db = MemoryDatabase::new().with_table(
        "s",
        MemoryTable::new("notes", &["id", "body"])
            .row(&[Some("1"), Some("comma, separated")])
            .row(&[Some("2"), Some("say \"hi\"")])
            .row(&[Some("3"), Some("line one\nline two")])
            .row(&[Some("4"), Some("naïve café ☕")]),
    );
    let mut sink = ZipStreamWriter::new(Vec::new());
    export_schema(&db, "s", &mut sink).await.unwrap();

    let entries = read_archive(sink.into_inner().await.unwrap());
    assert_eq!(
        entries[0].1,
        vec![
            record(&["id", "body"]),
            record(&["1", "comma, separated"]),
            record(&["2", "say \"hi\""]),
            record(&["3", "line one\nline two"]),
            record(&["4", "naïve café ☕"]),
        ]
    );
}

#[tokio::test]
async fn test_large_table_round_trips_across_chunks() {
    let payload = "x".repeat(200);
    let mut table = MemoryTable::new("events", &["seq", "payload"]);
    for i in 0..2_000 {
        let seq = i.to_string();
        table = table.row(&[Some(seq.as_str()), Some(payload.as_str())]);
    }
    let db = MemoryDatabase::new().with_table("s", table);
    let mut sink = ZipStreamWriter::new(Vec::new());

    let summary = export_schema(&db, "s", &mut sink).await.unwrap();
    assert_eq!(summary.rows, 2_000);

    let entries = read_archive(sink.into_inner().await.unwrap());
    let records = &entries[0].1;
    assert_eq!(records.len(), 2_001);
    assert_eq!(records[1], record(&["0", &payload]));
    assert_eq!(records[2_000], record(&["1999", &payload]));
}

#[tokio::test]
async fn test_unreadable_column_gets_placeholder_name() {
    let db = MemoryDatabase::new().with_table(
        "s",
        MemoryTable::new("wide", &["a", "b", "c"])
            .failing_column(2)
            .row(&[Some("1"), Some("2"), Some("3")]),
    );
    let mut sink = ZipStreamWriter::new(Vec::new());
    export_schema(&db, "s", &mut sink).await.unwrap();

    let entries = read_archive(sink.into_inner().await.unwrap());
    assert_eq!(
        entries[0].1,
        vec![record(&["a", "col2", "c"]), record(&["1", "2", "3"])]
    );
}

#[tokio::test]
async fn test_table_names_are_made_safe_for_entries() {
    let db = MemoryDatabase::new()
        .with_table("s", MemoryTable::new("a/b", &["v"]))
        .with_table("s", MemoryTable::new("a_b", &["v"]))
        .with_table("s", MemoryTable::new("Mixed Case", &["v"]));
    let mut sink = ZipStreamWriter::new(Vec::new());
    export_schema(&db, "s", &mut sink).await.unwrap();

    let entries = read_archive(sink.into_inner().await.unwrap());
    let names: Vec<&str> = entries.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, vec!["a_b.csv", "a_b_2.csv", "Mixed Case.csv"]);
}

// ============================================================================
// Connection lifecycle and failures
// ============================================================================

#[tokio::test]
async fn test_connection_opened_and_closed_exactly_once() {
    let db = sales_db();
    let stats = db.stats();
    let mut sink = ZipStreamWriter::new(Vec::new());

    export_schema(&db, "sales", &mut sink).await.unwrap();

    assert_eq!(stats.opened(), 1);
    assert_eq!(stats.closed(), 1);
    assert_eq!(stats.queries(), 3);
}

#[tokio::test]
async fn test_failing_table_aborts_export_and_closes_connection() {
    let db = sales_db().failing_query("orders");
    let stats = db.stats();
    let (output, mut captured) = tokio::io::duplex(16 << 20);
    let mut sink = ZipStreamWriter::new(output);

    let err = export_schema(&db, "sales", &mut sink).await.unwrap_err();
    assert!(format!("{:#}", err).contains("orders"));

    // No table after the failing one is attempted.
    assert_eq!(stats.queries(), 2);
    assert_eq!(stats.opened(), 1);
    assert_eq!(stats.closed(), 1);

    // The archive was never sealed: the output ends without a central directory.
    drop(sink);
    let mut bytes = Vec::new();
    captured.read_to_end(&mut bytes).await.unwrap();
    assert!(!bytes.is_empty());
    assert!(zip::ZipArchive::new(Cursor::new(bytes)).is_err());
}

#[tokio::test]
async fn test_row_stream_failure_aborts_export() {
    let db = MemoryDatabase::new().with_table(
        "s",
        MemoryTable::new("flaky", &["v"])
            .row(&[Some("1")])
            .row(&[Some("2")])
            .fail_after_rows(1),
    );
    let stats = db.stats();
    let mut sink = ZipStreamWriter::new(Vec::new());

    let err = export_schema(&db, "s", &mut sink).await.unwrap_err();
    assert!(format!("{:#}", err).contains("Failed to read rows from table 'flaky'"));
    assert_eq!(stats.closed(), 1);
}

#[tokio::test]
async fn test_connect_failure_opens_nothing() {
    let db = sales_db().failing_connect();
    let stats = db.stats();
    let mut sink = ZipStreamWriter::new(Vec::new());

    let err = export_schema(&db, "sales", &mut sink).await.unwrap_err();
    assert!(format!("{:#}", err).contains("Failed to open database connection"));
    assert_eq!(stats.opened(), 0);
    assert_eq!(stats.closed(), 0);
    assert_eq!(sink.bytes_written(), 0);
}

// ============================================================================
// Directory output
// ============================================================================

#[tokio::test]
async fn test_directory_export_writes_one_file_per_table() {
    let dir = tempfile::tempdir().unwrap();
    let mut sink = DirectorySink::create(dir.path().join("sales")).await.unwrap();

    export_schema(&sales_db(), "sales", &mut sink).await.unwrap();

    let customers = std::fs::read_to_string(dir.path().join("sales/customers.csv")).unwrap();
    assert_eq!(
        parse_csv(&customers),
        vec![record(&["id", "name"]), record(&["1", "Ada"]), record(&["2", ""])]
    );
    let refunds = std::fs::read_to_string(dir.path().join("sales/refunds.csv")).unwrap();
    assert_eq!(parse_csv(&refunds), vec![record(&["id", "reason"])]);
    assert!(dir.path().join("sales/orders.csv").exists());
}
