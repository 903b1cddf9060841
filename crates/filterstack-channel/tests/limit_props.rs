//! Properties of limit resolution and enforcement.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

mod support;

use filterstack_channel::filters::message_size::{effective_limit, exceeds, MessageSizeLimits};
use filterstack_channel::{ChannelArgs, ChannelType};
use filterstack_core::{Metadata, OpBatch, RecvSlot, StatusCode};
use proptest::prelude::*;

use support::{events, find, manual_call, manual_channel, record};

fn limit() -> impl Strategy<Value = i32> {
    prop_oneof![Just(-1), 0..=i32::MAX]
}

proptest! {
    #[test]
    fn override_never_loosens(default in limit(), method in limit()) {
        let got = effective_limit(default, method);
        prop_assert!(got == default || got == method);
        for bound in [default, method] {
            if bound >= 0 {
                prop_assert!((0..=bound).contains(&got));
            }
        }
    }

    #[test]
    fn unset_override_keeps_default(default in limit()) {
        prop_assert_eq!(effective_limit(default, -1), default);
        let limits = MessageSizeLimits { max_send_size: default, max_recv_size: default };
        prop_assert_eq!(limits.tightened_by(MessageSizeLimits::UNBOUNDED), limits);
    }

    #[test]
    fn tightening_is_idempotent(default in limit(), method in limit()) {
        let once = effective_limit(default, method);
        prop_assert_eq!(effective_limit(once, method), once);
    }

    #[test]
    fn unbounded_never_exceeds(len in 0usize..1 << 30) {
        prop_assert!(!exceeds(len, -1));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn send_fails_iff_over_limit(max in 0i32..64, len in 0usize..128) {
        let args = ChannelArgs::new().with_max_send_message_length(i64::from(max));
        let (channel, transport) = manual_channel(ChannelType::ClientSubchannel, args);
        let (call, stream) = manual_call(&channel, &transport, "/prop.Svc/Send");
        let ev = events();

        call.start_batch(
            OpBatch::new()
                .send_message(vec![0u8; len])
                .on_complete(record(&ev, "on_complete")),
        );

        let done = find(&ev, "on_complete");
        prop_assert_eq!(done.len(), 1);
        if len > max as usize {
            prop_assert_eq!(done[0].status, Some(StatusCode::ResourceExhausted));
            let text = done[0].error.clone().unwrap();
            let needle = format!("({len} vs. {max})");
            prop_assert!(text.contains(&needle), "{}", text);
            prop_assert!(stream.sent_messages().is_empty());
        } else {
            prop_assert!(done[0].status.is_none());
            prop_assert_eq!(stream.sent_messages().len(), 1);
        }
    }

    #[test]
    fn receive_fails_iff_over_limit(max in 0i32..64, len in 0usize..128) {
        let args = ChannelArgs::new().with_max_receive_message_length(i64::from(max));
        let (channel, transport) = manual_channel(ChannelType::ClientSubchannel, args);
        let (call, stream) = manual_call(&channel, &transport, "/prop.Svc/Recv");
        let ev = events();
        let msg = RecvSlot::new();

        call.start_batch(
            OpBatch::new()
                .recv_message(msg.clone(), record(&ev, "recv_message"))
                .recv_trailing_metadata(RecvSlot::new(), record(&ev, "recv_trailing_metadata")),
        );
        stream.push_message(vec![1u8; len]);
        stream.push_trailing_metadata(Metadata::with_status(StatusCode::Ok, ""));

        prop_assert_eq!(msg.take().map(|m| m.len()), Some(len));
        let over = len > max as usize;
        let expected = if over { StatusCode::ResourceExhausted } else { StatusCode::Ok };
        prop_assert_eq!(call.final_status().unwrap().code, expected);
        prop_assert_eq!(find(&ev, "recv_message")[0].status.is_some(), over);
    }
}
