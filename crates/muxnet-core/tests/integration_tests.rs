//! Integration tests for addressing and configuration

use std::collections::BTreeSet;
use std::time::Duration;

use muxnet_core::{
    decode_field, encode, ErrorLevel, Field, Fqa, MuxnetConfig, MuxnetConfigBuilder, MuxnetError,
    MAX_ADDRESS, MAX_BUS, MAX_MODULE, MAX_SUBBUS,
};

#[test]
fn test_codec_is_injective_over_valid_fields() {
    let mut seen = BTreeSet::new();
    for bus in 0..=MAX_BUS {
        for module in 0..=MAX_MODULE {
            for subbus in 0..=MAX_SUBBUS {
                for address in 0..=MAX_ADDRESS {
                    let fqa = encode(bus, module, subbus, address);
                    if (bus, module, subbus, address) == (0, 0, 0, 0) {
                        assert_eq!(fqa, Fqa::INVALID);
                        continue;
                    }
                    assert!(seen.insert(fqa.raw()), "collision at {fqa}");
                    assert_eq!(decode_field(fqa, Field::Bus), bus);
                    assert_eq!(decode_field(fqa, Field::Module), module);
                    assert_eq!(decode_field(fqa, Field::Subbus), subbus);
                    assert_eq!(decode_field(fqa, Field::Address), address);
                }
            }
        }
    }
    assert_eq!(seen.len(), u16::MAX as usize);
}

#[test]
fn test_documented_example_value() {
    let fqa = encode(5, 3, 4, 65);
    assert_eq!(fqa.raw(), 0xAE41);
    assert_eq!(fqa.raw(), 0b1010_1110_0100_0001);
}

#[test]
fn test_try_new_reports_fields() {
    match Fqa::try_new(0, 9, 0, 1) {
        Err(MuxnetError::InvalidAddress { module, .. }) => assert_eq!(module, 9),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(MuxnetError::RecordEmpty.level(), ErrorLevel::Soft);
}

#[test]
fn test_config_file_roundtrip() {
    let config = MuxnetConfigBuilder::new()
        .wires(3)
        .eeprom_identifier("id")
        .ping_timeout(Duration::from_millis(25))
        .try_build()
        .unwrap();

    let path = std::env::temp_dir().join(format!("muxnet-config-{}.json", std::process::id()));
    std::fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();
    let loaded = MuxnetConfig::from_file(&path).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(loaded, config);
}

#[test]
fn test_missing_config_file_is_io_error() {
    let result = MuxnetConfig::from_file("/nonexistent/muxnet.json");
    assert!(matches!(result, Err(MuxnetError::Io(_))));
}
