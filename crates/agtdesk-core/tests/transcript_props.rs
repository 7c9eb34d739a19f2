use agtdesk_core::{AgentEvent, AgentTranscript, Role, parse_line};
use chrono::{DateTime, Utc};
use proptest::prelude::*;

fn now() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-02-25T12:00:00Z")
        .expect("valid")
        .with_timezone(&Utc)
}

proptest! {
    /// Deltas for one open message always concatenate in order.
    #[test]
    fn deltas_concatenate_in_order(chunks in proptest::collection::vec(".{0,12}", 1..24)) {
        let mut t = AgentTranscript::new("a1", None);
        t.apply(AgentEvent::Init, now());
        for chunk in &chunks {
            t.apply(AgentEvent::BlockDelta { text: chunk.clone() }, now());
        }

        let expected: String = chunks.concat();
        let assistants: Vec<_> = t.entries().iter().filter(|e| e.role == Role::Assistant).collect();
        prop_assert_eq!(assistants.len(), 1);
        prop_assert_eq!(&assistants[0].content, &expected);
        prop_assert!(assistants[0].streaming);
    }

    /// Whatever was streamed, a non-empty final text is what remains.
    #[test]
    fn final_text_converges(
        chunks in proptest::collection::vec("[a-z ]{1,8}", 1..10),
        final_text in "[A-Za-z ]{1,30}",
    ) {
        let mut t = AgentTranscript::new("a1", None);
        t.apply(AgentEvent::Init, now());
        for chunk in &chunks {
            t.apply(AgentEvent::BlockDelta { text: chunk.clone() }, now());
        }
        t.apply(AgentEvent::Result { final_text: final_text.clone() }, now());

        prop_assert_eq!(t.entries().len(), 1);
        prop_assert_eq!(&t.entries()[0].content, &final_text);
        prop_assert!(t.entries().iter().all(|e| !e.streaming));
    }

    /// Embedded and standalone reports of one tool id never duplicate,
    /// whichever arrives first.
    #[test]
    fn tool_reports_deduplicate(embedded_first in any::<bool>(), id in "[a-z0-9]{1,8}") {
        let embedded = format!(
            r#"{{"type":"assistant","message":{{"id":"m1","content":[{{"type":"tool_use","id":"{id}","name":"Read","input":{{"file_path":"/x/y"}}}}]}}}}"#
        );
        let standalone = format!(
            r#"{{"type":"tool_use","id":"{id}","name":"Read","input":{{"file_path":"/x/y"}}}}"#
        );
        let order = if embedded_first { [embedded, standalone] } else { [standalone, embedded] };

        let mut t = AgentTranscript::new("a1", None);
        for line in &order {
            let event = parse_line(line).expect("valid").expect("event");
            t.apply(event, now());
        }
        let activities = t.entries().iter().filter(|e| e.role == Role::Activity).count();
        prop_assert_eq!(activities, 1);
    }

    /// At most one entry is ever streaming, for any event sequence.
    #[test]
    fn single_streaming_entry(ops in proptest::collection::vec(0u8..7, 0..40)) {
        let mut t = AgentTranscript::new("a1", None);
        for (i, op) in ops.iter().enumerate() {
            let event = match op {
                0 => AgentEvent::Init,
                1 => AgentEvent::BlockDelta { text: format!("d{i}") },
                2 => AgentEvent::MessageStart { key: format!("m{}", i % 3) },
                3 => AgentEvent::AssistantFull {
                    key: format!("m{}", i % 3),
                    blocks: vec![agtdesk_core::ContentBlock::Text(format!("full{i}"))],
                },
                4 => AgentEvent::ToolUse {
                    id: format!("t{}", i % 4),
                    name: "Bash".into(),
                    input: serde_json::json!({"command": "ls"}),
                },
                5 => AgentEvent::Result { final_text: format!("r{i}") },
                _ => AgentEvent::Error { message: "boom".into() },
            };
            t.apply(event, now());
            prop_assert!(t.entries().iter().filter(|e| e.streaming).count() <= 1);
        }
    }
}
