use bridge_storage::{
    InMemoryMeasurementWriter, InMemoryResultCache, InMemoryRoutingLookup, MeasurementWriter,
    ResultCache, RoutingLookup,
};
use domain::{Reading, ScalarValue};

fn sample_reading(name: &str, ts: f64, value: ScalarValue) -> Reading {
    Reading {
        name: name.to_string(),
        property: "value".to_string(),
        device: "sensorA".to_string(),
        iot: "dev1".to_string(),
        ts,
        value,
        quality: 0,
    }
}

#[tokio::test]
async fn writer_records_batches_in_order() {
    let writer = InMemoryMeasurementWriter::new();
    let first = vec![
        sample_reading("temp", 1.0, ScalarValue::Float(20.5)),
        sample_reading("temp", 2.0, ScalarValue::Float(20.6)),
    ];
    let second = vec![sample_reading("temp", 3.0, ScalarValue::Float(20.7))];
    writer.write_batch("example", &first).await.expect("write");
    writer.write_batch("plant2", &second).await.expect("write");

    let batches = writer.batches();
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0].0, "example");
    assert_eq!(batches[0].1, first);
    assert_eq!(batches[1].0, "plant2");
    assert_eq!(writer.reading_count(), 3);
}

#[tokio::test]
async fn writer_fails_atomically_when_forced() {
    let writer = InMemoryMeasurementWriter::new();
    writer.fail_next(1);
    let batch = vec![sample_reading("temp", 1.0, ScalarValue::Int(1))];
    writer
        .write_batch("example", &batch)
        .await
        .expect_err("forced failure");
    assert_eq!(writer.batch_count(), 0);

    writer.write_batch("example", &batch).await.expect("write");
    assert_eq!(writer.batch_count(), 1);
}

#[tokio::test]
async fn lookup_returns_configured_destination() {
    let lookup = InMemoryRoutingLookup::new();
    lookup.insert("dev1", "plant2");

    let found = lookup.destination_for("dev1").await.expect("lookup");
    assert_eq!(found.as_deref(), Some("plant2"));

    let missing = lookup.destination_for("dev2").await.expect("lookup");
    assert_eq!(missing, None);
}

#[tokio::test]
async fn result_cache_stores_with_ttl() {
    let cache = InMemoryResultCache::new();
    cache
        .store("req-1", r#"{"ok":true}"#, 86_400)
        .await
        .expect("store");

    let entry = cache.get("req-1").expect("entry");
    assert_eq!(entry.0, r#"{"ok":true}"#);
    assert_eq!(entry.1, 86_400);
}
