//! Fuzz testing for reading validation and MQTT topic handling.
//!
//! Feeds arbitrary bytes through the same entry points the intake adapters
//! use and checks that nothing panics and accepted readings satisfy the
//! validator's guarantees.
//!
//! # Running the Fuzz Tests
//!
//! ```bash
//! # Install cargo-fuzz (requires nightly)
//! cargo +nightly install cargo-fuzz
//!
//! # Run with a time limit (e.g., 60 seconds)
//! cargo +nightly fuzz run fuzz_validation -- -max_total_time=60
//! ```

#![no_main]

use std::sync::{Arc, LazyLock};

use libfuzzer_sys::fuzz_target;
use sensor_ingest::clock::ManualClock;
use sensor_ingest::mqtt::TopicPattern;
use sensor_ingest::validation::{
    MAX_DEVICE_ID_LENGTH, ReadingValidator, ValueBounds, parse_timestamp,
};
use serde_json::Value;

static VALIDATOR: LazyLock<ReadingValidator> = LazyLock::new(|| {
    ReadingValidator::new(
        Some(ValueBounds::default()),
        Arc::new(ManualClock::from_millis(1_705_315_800_000)),
    )
});

fuzz_target!(|data: &[u8]| {
    if let Ok(raw) = serde_json::from_slice::<Value>(data) {
        if let Ok(reading) = VALIDATOR.validate(&raw) {
            assert!(!reading.device_id.trim().is_empty());
            assert!(reading.device_id.len() <= MAX_DEVICE_ID_LENGTH);
            assert!(reading.value.is_finite());
            assert!(ValueBounds::default().contains(reading.value));
        }
        let _ = parse_timestamp(&raw);
    }

    if let Ok(s) = std::str::from_utf8(data) {
        // Interpret the input both as a pattern and as a topic
        if let Ok(pattern) = TopicPattern::parse(s) {
            let _ = pattern.topic_for("dev");
        }
        let pattern = TopicPattern::parse("iot/sensor/+/value").unwrap();
        if let Some(device_id) = pattern.extract_device_id(s) {
            assert!(!device_id.is_empty());
            assert!(!device_id.contains('/'));
        }
    }
});
