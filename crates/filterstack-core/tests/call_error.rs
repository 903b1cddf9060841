//! Composable call errors and batch failure.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::sync::{Arc, Mutex};

use filterstack_core::{
    CallCombiner, CallError, Closure, FilterStackError, Metadata, OpBatch, RecvSlot, StatusCode,
};

#[test]
fn compose_keeps_both_causes() {
    let parent = CallError::new("transport closed");
    let child = CallError::with_code(StatusCode::ResourceExhausted, "too big");

    let composed = CallError::compose(Some(parent), Some(child)).unwrap();
    assert_eq!(composed.message(), "transport closed");
    assert_eq!(composed.children().len(), 1);
    assert_eq!(composed.status(), StatusCode::ResourceExhausted);
    assert!(composed.to_string().contains("too big"));
}

#[test]
fn compose_with_none_returns_other_side() {
    let e = CallError::with_code(StatusCode::Cancelled, "gone");
    let only_child = CallError::compose(None, Some(e.clone())).unwrap();
    assert_eq!(only_child.message(), "gone");
    let only_parent = CallError::compose(Some(e), None).unwrap();
    assert_eq!(only_parent.message(), "gone");
    assert!(CallError::compose(None, None).is_none());
}

#[test]
fn status_search_is_depth_first() {
    let inner = CallError::with_code(StatusCode::DataLoss, "inner");
    let mid = CallError::new("mid").add_child(inner);
    let sibling = CallError::with_code(StatusCode::Aborted, "sibling");
    let root = CallError::new("root").add_child(mid).add_child(sibling);

    assert_eq!(root.find_status(), Some((StatusCode::DataLoss, "inner")));
    assert!(root.has_status(StatusCode::Aborted));
    assert_eq!(CallError::new("plain").status(), StatusCode::Unknown);
}

#[test]
fn adding_children_does_not_mutate_shared_copies() {
    let base = CallError::new("base");
    let shared = base.clone();
    let extended = base.add_child(CallError::new("extra"));
    assert!(shared.children().is_empty());
    assert_eq!(extended.children().len(), 1);
}

#[test]
fn parse_error_lists_every_defect() {
    let e = FilterStackError::ConfigParse {
        context: "Message size parser".into(),
        errors: vec!["field:a error:x".into(), "field:b error:y".into()],
    };
    let s = e.to_string();
    assert!(s.contains("field:a error:x"));
    assert!(s.contains("field:b error:y"));
    assert_eq!(e.parse_errors().len(), 2);
    assert_eq!(e.status_code(), StatusCode::InvalidArgument);
}

#[test]
fn finish_with_failure_completes_every_closure_once() {
    let combiner = Arc::new(CallCombiner::new());
    let got = Arc::new(Mutex::new(Vec::new()));

    let mk = |name: &'static str| {
        let c = Arc::clone(&combiner);
        let g = Arc::clone(&got);
        Closure::new(name, move |err| {
            g.lock().unwrap().push((name, err.map(|e| e.status())));
            c.stop(name);
        })
    };

    let batch = OpBatch::new()
        .send_message(vec![0u8; 8])
        .recv_message(RecvSlot::new(), mk("recv_message"))
        .recv_trailing_metadata(RecvSlot::<Metadata>::new(), mk("recv_trailing_metadata"))
        .on_complete(mk("on_complete"));

    let c = Arc::clone(&combiner);
    combiner.start(
        Closure::new("fail batch", move |_| {
            batch.finish_with_failure(
                CallError::with_code(StatusCode::ResourceExhausted, "nope"),
                &c,
            );
        }),
        None,
        "fail batch",
    );

    let got = got.lock().unwrap();
    assert_eq!(got.len(), 3);
    assert!(got.iter().all(|(_, s)| *s == Some(StatusCode::ResourceExhausted)));
    assert!(!combiner.is_active());
}

#[test]
fn recv_slot_is_shared_between_clones() {
    let slot = RecvSlot::new();
    let peer = slot.clone();
    peer.fill(Some(bytes::Bytes::from_static(b"hello")));
    assert_eq!(slot.with(|m| m.map(|b| b.len())), Some(5));
    assert_eq!(slot.take().unwrap(), "hello");
    assert!(!peer.is_filled());
}

#[test]
fn status_metadata_round_trips_code_names() {
    let md = Metadata::with_status(StatusCode::ResourceExhausted, "limit");
    let code = md.get(filterstack_core::batch::STATUS_KEY).and_then(StatusCode::parse);
    assert_eq!(code, Some(StatusCode::ResourceExhausted));
    assert_eq!(md.get(filterstack_core::batch::MESSAGE_KEY), Some("limit"));
}
