//! Integration tests for the relay feature report protocol
//!
//! Exercises the public codec API the way the USB layer uses it:
//! - command buffers written with SET_REPORT
//! - responses captured from real boards
//! - status records serialized for `--json` output

use protocol::{
    COMMAND_LEN, DeviceInfo, FeatureReport, GET_INFO, GET_PORT, PORT_OFF, ProtocolError,
    REPORT_LEN, RelayStatus, SET_PORT_OFF, SET_PORT_ON, decode_info, decode_port_state,
};

mod commands {
    use super::*;

    #[test]
    fn test_commands_are_seven_bytes() {
        for command in [GET_INFO, GET_PORT, SET_PORT_ON, SET_PORT_OFF] {
            assert_eq!(command.len(), COMMAND_LEN);
        }
    }

    #[test]
    fn test_set_port_commands_share_opcode() {
        assert_eq!(SET_PORT_ON[0], SET_PORT_OFF[0]);
        assert_eq!(SET_PORT_ON[1], 0x00);
        assert_eq!(SET_PORT_OFF[1], PORT_OFF);
        assert!(SET_PORT_OFF[2..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_query_commands_have_zero_payload() {
        assert!(GET_INFO[1..].iter().all(|b| *b == 0));
        assert!(GET_PORT[1..].iter().all(|b| *b == 0));
    }
}

mod responses {
    use super::*;

    #[test]
    fn test_captured_info_response() {
        // Board labelled 3758, firmware 1.2, family 1
        let response = [0x1D, 0x01, 0x02, 0x01, 0x00, 0x00, 0x0E, 0xAE];
        let info = decode_info(&response).unwrap();

        assert_eq!(
            info,
            DeviceInfo {
                family: 1,
                version: 0x0102,
                id: 3758,
            }
        );
    }

    #[test]
    fn test_captured_port_responses() {
        let on = [0x7E, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
        let off = [0x7E, 0x19, 0x19, 0x00, 0x00, 0x00, 0x00, 0x00];

        assert!(decode_port_state(&on).unwrap());
        assert!(!decode_port_state(&off).unwrap());
    }

    #[test]
    fn test_mismatched_status_bytes_read_off() {
        let garbled = [0x7E, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00];
        assert!(!decode_port_state(&garbled).unwrap());
    }

    #[test]
    fn test_short_response_is_malformed() {
        let short = [0x7E, 0x00, 0x00, 0x00];
        let err = decode_port_state(&short).unwrap_err();

        assert_eq!(
            err,
            ProtocolError::MalformedResponse {
                expected: REPORT_LEN,
                actual: 4,
            }
        );
    }

    #[test]
    fn test_feature_report_accessors() {
        let bytes = [0x1D, 7, 0, 1, 0, 0, 1, 0];
        let report = FeatureReport::try_from(&bytes[..]).unwrap();

        assert_eq!(report.as_bytes(), &bytes);
        assert_eq!(report.device_info().id, 256);
        assert_eq!(report.device_info().version, 256);
        assert_eq!(report.as_ref(), &bytes[..]);
    }
}

mod status_records {
    use super::*;

    #[test]
    fn test_status_json_roundtrip() {
        let status = RelayStatus {
            bus_number: 3,
            device_address: 12,
            info: DeviceInfo {
                family: 1,
                version: 2,
                id: 20,
            },
            port_on: true,
        };

        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("\"port_on\":true"));
        assert!(json.contains("\"id\":20"));

        let parsed: RelayStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, status);
    }
}
