//! Property-based tests for the JSON wire codec.
//!
//! Uses proptest to verify:
//! 1. Arbitrary text never panics `decode_client` (returns `Err` gracefully).
//! 2. Frames over the size limit are rejected before parsing.
//! 3. Client events survive encode → decode.
//! 4. Every server event carries its `type` discriminator.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use proptest::prelude::*;
use uuid::Uuid;
use workdeck_proto::codec::{self, CodecError};
use workdeck_proto::event::{ClientEvent, ErrorCode, ServerEvent};
use workdeck_proto::message::{MessageId, UserId};
use workdeck_proto::notification::{NotificationId, ReadScope};
use workdeck_proto::presence::UserSummary;

const LIMIT: usize = 64 * 1024;

fn arb_room() -> impl Strategy<Value = String> {
    "[a-z0-9-]{1,20}"
}

fn arb_message_id() -> impl Strategy<Value = MessageId> {
    any::<u128>().prop_map(|n| MessageId::from_uuid(Uuid::from_u128(n)))
}

fn arb_client_event() -> impl Strategy<Value = ClientEvent> {
    prop_oneof![
        "[ -~]{0,40}".prop_map(|token| ClientEvent::Authenticate { token }),
        arb_room().prop_map(|room| ClientEvent::JoinRoom { room }),
        arb_room().prop_map(|room| ClientEvent::LeaveRoom { room }),
        (arb_room(), ".{0,200}")
            .prop_map(|(room, content)| ClientEvent::SendMessage { room, content }),
        (arb_message_id(), ".{0,200}")
            .prop_map(|(id, content)| ClientEvent::EditMessage { id, content }),
        arb_message_id().prop_map(|id| ClientEvent::DeleteMessage { id }),
        (
            arb_room(),
            proptest::option::of(any::<u32>()),
            proptest::option::of(any::<u32>()),
            proptest::option::of(any::<u64>()),
        )
            .prop_map(|(room, page, limit, before)| ClientEvent::GetHistory {
                room,
                page,
                limit,
                before,
            }),
        proptest::option::of(any::<u128>()).prop_map(|id| ClientEvent::MarkNotificationsRead {
            id: id.map(|n| NotificationId::from_uuid(Uuid::from_u128(n))),
        }),
    ]
}

fn arb_server_event() -> impl Strategy<Value = ServerEvent> {
    let user = ("[a-z]{1,10}", "[A-Za-z ]{1,20}").prop_map(|(id, name)| UserSummary {
        id: UserId::new(id),
        name,
    });
    prop_oneof![
        user.clone()
            .prop_map(|user| ServerEvent::Authenticated { user }),
        (user.clone(), arb_room()).prop_map(|(user, room)| ServerEvent::UserJoined { user, room }),
        (user, arb_room()).prop_map(|(user, room)| ServerEvent::UserLeft { user, room }),
        arb_room().prop_map(|room| ServerEvent::RoomLeft { room }),
        (arb_message_id(), arb_room())
            .prop_map(|(id, room)| ServerEvent::MessageDeleted { id, room }),
        Just(ServerEvent::NotificationsRead {
            ids: ReadScope::All
        }),
        ".{0,50}".prop_map(|m| ServerEvent::error(ErrorCode::InvalidEvent, m)),
    ]
}

proptest! {
    #[test]
    fn decode_client_never_panics(text in ".{0,512}") {
        let _ = codec::decode_client(&text, LIMIT);
    }

    #[test]
    fn oversize_frames_are_rejected(extra in 1usize..256) {
        let text = "a".repeat(LIMIT + extra);
        let is_too_large = matches!(
            codec::decode_client(&text, LIMIT),
            Err(CodecError::FrameTooLarge { size, max }) if size == LIMIT + extra && max == LIMIT
        );
        prop_assert!(is_too_large);
    }

    #[test]
    fn client_events_survive_encoding(event in arb_client_event()) {
        let text = codec::encode_client(&event).unwrap();
        let decoded = codec::decode_client(&text, usize::MAX).unwrap();
        prop_assert_eq!(decoded, event);
    }

    #[test]
    fn server_events_carry_type(event in arb_server_event()) {
        let text = codec::encode_server(&event).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        prop_assert_eq!(value["type"].as_str(), Some(event.name()));
        prop_assert_eq!(codec::decode_server(&text).unwrap(), event);
    }
}
