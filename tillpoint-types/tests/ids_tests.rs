use std::collections::HashSet;
use std::str::FromStr;
use tillpoint_types::{ConflictId, DeviceId, QueueItemId, RecordId, SyncRecordId};

#[test]
fn record_ids_are_unique() {
    let ids: HashSet<RecordId> = (0..100).map(|_| RecordId::new()).collect();
    assert_eq!(ids.len(), 100);
}

#[test]
fn record_id_display_parse_roundtrip() {
    let id = RecordId::new();
    let parsed = RecordId::parse(&id.to_string()).unwrap();
    assert_eq!(id, parsed);
}

#[test]
fn record_id_from_str() {
    let id = RecordId::new();
    let parsed = RecordId::from_str(&id.to_string()).unwrap();
    assert_eq!(id, parsed);
}

#[test]
fn record_id_parse_rejects_garbage() {
    assert!(RecordId::parse("not-a-uuid").is_err());
}

#[test]
fn record_id_from_uuid_roundtrip() {
    let id = RecordId::new();
    assert_eq!(RecordId::from_uuid(id.as_uuid()), id);
}

#[test]
fn ids_are_time_ordered() {
    // UUID v7 embeds a timestamp, so later ids sort after earlier ones.
    let first = SyncRecordId::new();
    std::thread::sleep(std::time::Duration::from_millis(2));
    let second = SyncRecordId::new();
    assert!(first < second);
}

#[test]
fn id_serde_is_transparent() {
    let id = QueueItemId::new();
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, format!("\"{id}\""));

    let parsed: QueueItemId = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, id);
}

#[test]
fn distinct_id_types_roundtrip() {
    let device = DeviceId::new();
    let conflict = ConflictId::new();
    assert_eq!(DeviceId::parse(&device.to_string()).unwrap(), device);
    assert_eq!(ConflictId::parse(&conflict.to_string()).unwrap(), conflict);
}
