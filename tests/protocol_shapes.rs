//! Control-channel protocol tests.
//!
//! These verify the wire shapes both sides of the gateway agree on:
//! `action`-tagged control messages going in, `type`-tagged events coming
//! back, and the contact rows riding inside them.

use serde_json::json;
use whatsblitz::protocol::{ControlMessage, EventMessage};
use whatsblitz::roster::Contact;

/// Control messages as the operator CLI emits them.
mod control_messages {
    use super::*;

    #[test]
    fn start_sending_carries_contact_rows() {
        let raw = json!({
            "action": "startSending",
            "data": [{
                "Phone Number": "15551234567",
                "Name": "A",
                "Custom Message": "Hi {{Name}}",
                "Processed Message": "Hi A"
            }]
        });

        let control: ControlMessage = serde_json::from_value(raw).unwrap();
        match control {
            ControlMessage::StartSending { data } => {
                assert_eq!(data.len(), 1);
                assert_eq!(data[0].phone, "15551234567");
                assert_eq!(data[0].processed_message, "Hi A");
            }
            other => panic!("unexpected control message: {other:?}"),
        }
    }

    #[test]
    fn process_file_from_storage_structure() {
        let control = ControlMessage::ProcessFileFromStorage {
            storage_key: "whatsblitz_file_1719000000000_contacts.csv".into(),
            file_name: "contacts.csv".into(),
            file_type: "text/csv".into(),
        };
        let msg = serde_json::to_value(&control).unwrap();

        assert_eq!(msg["action"], "processFileFromStorage");
        assert!(msg["storageKey"].as_str().unwrap().starts_with("whatsblitz_file_"));
        assert_eq!(msg["fileName"], "contacts.csv");
        assert_eq!(msg["fileType"], "text/csv");
    }

    #[test]
    fn process_file_in_background_structure() {
        let control = ControlMessage::ProcessFileInBackground {
            file_array_buffer: "UGhvbmUgTnVtYmVy".into(),
            file_name: "contacts.csv".into(),
            file_type: "text/csv".into(),
        };
        let msg = serde_json::to_value(&control).unwrap();

        assert_eq!(msg["action"], "processFileInBackground");
        assert!(msg["fileArrayBuffer"].is_string());
    }

    #[test]
    fn readiness_probe_roundtrips() {
        let raw = json!({ "action": "isContentScriptReady" });
        let control: ControlMessage = serde_json::from_value(raw).unwrap();
        assert!(matches!(control, ControlMessage::IsContentScriptReady));
    }
}

/// Events as the daemon broadcasts them.
mod event_messages {
    use super::*;

    #[test]
    fn status_event_structure() {
        let event = EventMessage::status("Sending message 1 of 3... (Success: 0, Failed: 0)", 33.3);
        let msg = serde_json::to_value(&event).unwrap();

        assert_eq!(msg["type"], "status");
        assert!(msg["text"].as_str().unwrap().starts_with("Sending message"));
        assert!(msg["progress"].is_number());
        assert!(msg.get("completed").is_none());
    }

    #[test]
    fn completion_event_structure() {
        let event = EventMessage::completed("Completed! Successfully sent: 3, Failed: 0", 100.0);
        let msg = serde_json::to_value(&event).unwrap();

        assert_eq!(msg["type"], "status");
        assert_eq!(msg["completed"], true);
        assert_eq!(msg["progress"], 100.0);
    }

    #[test]
    fn validation_error_event_structure() {
        let event = EventMessage::ValidationError {
            text: "Missing required columns: Name".into(),
        };
        let msg = serde_json::to_value(&event).unwrap();

        assert_eq!(msg["type"], "validationError");
        assert!(msg["text"].as_str().unwrap().contains("Name"));
    }

    #[test]
    fn data_ready_event_roundtrips_contacts() {
        let contacts: Vec<Contact> = serde_json::from_value(json!([
            {
                "Phone Number": "15551234567",
                "Name": "A",
                "Custom Message": "Hi {{Name}}",
                "Processed Message": "Hi A",
                "City": "Berlin"
            }
        ]))
        .unwrap();

        let event = EventMessage::DataReady {
            data: contacts,
            text: "File processed with 1 records.".into(),
        };
        let msg = serde_json::to_value(&event).unwrap();

        assert_eq!(msg["type"], "dataReady");
        // Extra columns survive the roundtrip alongside the fixed ones.
        assert_eq!(msg["data"][0]["City"], "Berlin");
        assert_eq!(msg["data"][0]["Phone Number"], "15551234567");
    }

    #[test]
    fn ready_reply_structure() {
        let msg = serde_json::to_value(EventMessage::Ready { ready: false }).unwrap();
        assert_eq!(msg["type"], "ready");
        assert_eq!(msg["ready"], false);
    }

    #[test]
    fn events_parse_back_from_the_wire() {
        let raw = r#"{"type":"status","text":"working","progress":50.0}"#;
        let event: EventMessage = serde_json::from_str(raw).unwrap();
        match event {
            EventMessage::Status { text, progress, completed } => {
                assert_eq!(text, "working");
                assert_eq!(progress, Some(50.0));
                assert_eq!(completed, None);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
