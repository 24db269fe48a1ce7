use bridge_dispatch::Dispatcher;
use bridge_ingest::InboundMessage;
use bridge_normalize::TypeHintTable;
use bridge_routing::{DeviceRegistry, WorkerSet};
use bridge_sink::SinkConfig;
use bridge_storage::{InMemoryMeasurementWriter, InMemoryRoutingLookup};
use domain::{Reading, ScalarValue};
use std::sync::Arc;
use std::time::Duration;

fn dispatcher(writer: Arc<InMemoryMeasurementWriter>) -> Dispatcher {
    let config = SinkConfig {
        queue_capacity: 64,
        backlog_capacity: 8,
        flush_interval: Duration::from_millis(10),
    };
    let workers = WorkerSet::new(writer, config);
    let registry = DeviceRegistry::new(Arc::new(InMemoryRoutingLookup::new()), "example", workers);
    Dispatcher::new(registry, Arc::new(TypeHintTable::new()))
}

fn live(topic: &str, payload: &str) -> InboundMessage {
    InboundMessage {
        topic: topic.to_string(),
        payload: payload.as_bytes().to_vec(),
        retained: false,
    }
}

fn retained(topic: &str, payload: &str) -> InboundMessage {
    InboundMessage {
        topic: topic.to_string(),
        payload: payload.as_bytes().to_vec(),
        retained: true,
    }
}

async fn wait_for_readings(writer: &InMemoryMeasurementWriter, expected: usize) -> Vec<Reading> {
    for _ in 0..200 {
        if writer.reading_count() >= expected {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    writer
        .batches()
        .into_iter()
        .flat_map(|(_, readings)| readings)
        .collect()
}

#[tokio::test]
async fn hinted_data_reading_round_trips_as_int() {
    let writer = Arc::new(InMemoryMeasurementWriter::new());
    let dispatcher = dispatcher(writer.clone());

    dispatcher
        .dispatch(live(
            "dev1/devices",
            r#"{"sensorA": {"inputs": [{"name": "temp", "vt": "int"}]}}"#,
        ))
        .await;
    dispatcher
        .dispatch(live(
            "dev1/data",
            r#"["sensorA/temp/value", 1690000000, "21", 0]"#,
        ))
        .await;

    let readings = wait_for_readings(&writer, 2).await;
    assert_eq!(readings.len(), 2);

    let snapshot = &readings[0];
    assert_eq!(snapshot.name, "iot_device");
    assert_eq!(snapshot.property, "cfg");
    assert_eq!(snapshot.device, "dev1");

    let data = &readings[1];
    assert_eq!(data.name, "temp");
    assert_eq!(data.property, "int_value");
    assert_eq!(data.device, "sensorA");
    assert_eq!(data.iot, "dev1");
    assert_eq!(data.ts, 1690000000.0);
    assert_eq!(data.value, ScalarValue::Int(21));
    assert_eq!(data.quality, 0);
}

#[tokio::test]
async fn unhinted_numeric_data_stays_float() {
    let writer = Arc::new(InMemoryMeasurementWriter::new());
    let dispatcher = dispatcher(writer.clone());

    dispatcher
        .dispatch(live("dev1/data", r#"["sensorA/temp/value", 1690000000, 2.5, 0]"#))
        .await;

    let readings = wait_for_readings(&writer, 1).await;
    assert_eq!(readings.len(), 1);
    assert_eq!(readings[0].property, "value");
    assert_eq!(readings[0].value, ScalarValue::Float(2.5));
}

#[tokio::test]
async fn non_value_property_is_stringified() {
    let writer = Arc::new(InMemoryMeasurementWriter::new());
    let dispatcher = dispatcher(writer.clone());

    dispatcher
        .dispatch(live(
            "dev1/data",
            r#"["sensorA/temp/unit", 1690000000, 7, 0]"#,
        ))
        .await;

    let readings = wait_for_readings(&writer, 1).await;
    assert_eq!(readings.len(), 1);
    assert_eq!(readings[0].property, "unit");
    assert_eq!(readings[0].value, ScalarValue::String("7".to_string()));
}

#[tokio::test]
async fn retained_data_is_never_enqueued() {
    let writer = Arc::new(InMemoryMeasurementWriter::new());
    let dispatcher = dispatcher(writer.clone());

    dispatcher
        .dispatch(retained(
            "dev1/data",
            r#"["sensorA/temp/value", 1690000000, 2.5, 0]"#,
        ))
        .await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(writer.reading_count(), 0);
}

#[tokio::test]
async fn status_tokens_map_to_bool() {
    let writer = Arc::new(InMemoryMeasurementWriter::new());
    let dispatcher = dispatcher(writer.clone());

    dispatcher.dispatch(live("dev1/status", "ONLINE")).await;
    dispatcher.dispatch(live("dev1/status", "OFFLINE")).await;
    dispatcher.dispatch(live("dev1/status", "REBOOTING")).await;

    let readings = wait_for_readings(&writer, 2).await;
    assert_eq!(readings.len(), 2);
    assert_eq!(readings[0].property, "online");
    assert_eq!(readings[0].value, ScalarValue::Bool(true));
    assert_eq!(readings[1].value, ScalarValue::Bool(false));
}

#[tokio::test]
async fn malformed_input_is_dropped_quietly() {
    let writer = Arc::new(InMemoryMeasurementWriter::new());
    let dispatcher = dispatcher(writer.clone());

    // 主题不成形、未知 kind、坏 JSON、短数组、坏路径
    dispatcher.dispatch(live("bare-topic", "{}")).await;
    dispatcher.dispatch(live("dev1/comm", "whatever")).await;
    dispatcher.dispatch(live("dev1/data", "not json")).await;
    dispatcher.dispatch(live("dev1/data", r#"["sensorA/temp/value"]"#)).await;
    dispatcher
        .dispatch(live("dev1/data", r#"["no-slashes", 1, 2, 0]"#))
        .await;
    dispatcher.dispatch(live("dev1/devices", "not json")).await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(writer.reading_count(), 0);
}

#[tokio::test]
async fn devices_snapshot_keeps_raw_document() {
    let writer = Arc::new(InMemoryMeasurementWriter::new());
    let dispatcher = dispatcher(writer.clone());
    let doc = r#"{"sensorA": {"inputs": [{"name": "temp"}]}}"#;

    dispatcher.dispatch(live("dev1/devices", doc)).await;

    let readings = wait_for_readings(&writer, 1).await;
    assert_eq!(readings.len(), 1);
    assert_eq!(readings[0].value, ScalarValue::String(doc.to_string()));
    assert_eq!(readings[0].quality, 0);
}
