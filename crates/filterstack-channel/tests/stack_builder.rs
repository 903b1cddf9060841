//! Channel stack composition and element lifecycle.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

mod support;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;

use filterstack_channel::core_config::CoreConfiguration;
use filterstack_channel::filters::ConnectedFilter;
use filterstack_channel::service_config::CallContext;
use filterstack_channel::stack::{
    CallElement, CallElementArgs, CallNext, ChannelElement, ChannelElementArgs, ChannelFilter,
    ChannelStackBuilder, PRIORITY_HIGH, PRIORITY_LOW,
};
use filterstack_channel::transport::{InProcTransport, Transport};
use filterstack_channel::{Channel, ChannelArgs, ChannelType};
use filterstack_core::error::{CallError, FilterStackError, Result};
use filterstack_core::{CallCombiner, Metadata, OpBatch, RecvSlot, StatusCode};

use support::{events, find, manual_call, manual_channel, record};

/// Pass-through filter counting the batches it forwards.
struct TagFilter {
    name: &'static str,
    seen: Arc<AtomicUsize>,
}

impl TagFilter {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            seen: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl ChannelFilter for TagFilter {
    fn name(&self) -> &'static str {
        self.name
    }

    fn init_channel_elem(&self, _args: &ChannelElementArgs<'_>) -> Result<Box<dyn ChannelElement>> {
        Ok(Box::new(TagElem {
            seen: Arc::clone(&self.seen),
        }))
    }
}

struct TagElem {
    seen: Arc<AtomicUsize>,
}

impl ChannelElement for TagElem {
    fn init_call_elem(&self, _args: &CallElementArgs<'_>) -> Result<Box<dyn CallElement>> {
        Ok(Box::new(TagCall {
            seen: Arc::clone(&self.seen),
        }))
    }
}

struct TagCall {
    seen: Arc<AtomicUsize>,
}

impl CallElement for TagCall {
    fn start_batch(&self, batch: OpBatch, next: CallNext<'_>) {
        self.seen.fetch_add(1, Ordering::SeqCst);
        next.start_batch(batch);
    }
}

fn transport() -> Option<Arc<dyn Transport>> {
    let t: Arc<dyn Transport> = InProcTransport::manual();
    Some(t)
}

fn filters(channel_type: ChannelType, args: ChannelArgs) -> Vec<&'static str> {
    Channel::create("inproc:test", channel_type, args, transport())
        .unwrap()
        .filter_names()
}

fn unbounded() -> ChannelArgs {
    ChannelArgs::new()
        .with_max_send_message_length(-1)
        .with_max_receive_message_length(-1)
}

#[test]
fn subchannel_always_gets_message_size() {
    assert_eq!(
        filters(ChannelType::ClientSubchannel, ChannelArgs::new()),
        vec!["message_size", "connected"]
    );
    assert_eq!(
        filters(ChannelType::ClientSubchannel, unbounded()),
        vec!["message_size", "connected"]
    );
}

#[test]
fn direct_and_server_channels_skip_filter_without_limits() {
    for ty in [ChannelType::ClientDirectChannel, ChannelType::ServerChannel] {
        // The default receive limit is 4 MiB, so defaults still need the filter.
        assert_eq!(filters(ty, ChannelArgs::new()), vec!["message_size", "connected"]);
        assert_eq!(filters(ty, unbounded()), vec!["connected"]);
        assert_eq!(
            filters(ty, unbounded().with_max_send_message_length(10)),
            vec!["message_size", "connected"]
        );
        assert_eq!(
            filters(ty, unbounded().with_service_config("{}")),
            vec!["message_size", "connected"]
        );
    }
}

#[test]
fn minimal_stack_drops_message_size_everywhere() {
    for ty in ChannelType::ALL {
        let args = ChannelArgs::new()
            .with_max_send_message_length(10)
            .with_minimal_stack(true);
        assert_eq!(filters(ty, args), vec!["connected"]);
    }
}

#[test]
fn out_of_range_args_fall_back_to_defaults() {
    let args = ChannelArgs::new()
        .with_max_send_message_length(-7)
        .with_max_receive_message_length(i64::from(i32::MAX) + 1);
    assert_eq!(args.max_send_message_length(), -1);
    assert_eq!(args.max_receive_message_length(), 4 * 1024 * 1024);
}

#[test]
fn missing_transport_aborts_construction() {
    let err = Channel::create("nowhere", ChannelType::ClientSubchannel, ChannelArgs::new(), None)
        .err()
        .expect("must fail");
    match &err {
        FilterStackError::ChannelBuild(msg) => {
            assert_eq!(msg, "stage 'connected': no transport set on the channel")
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.to_string().matches("channel build failed").count(), 1, "{err}");
    assert_eq!(err.status_code(), StatusCode::Unavailable);
}

#[test]
fn stages_run_by_priority_then_registration_order() {
    let mut builder = CoreConfiguration::builtin_builder();
    let init = builder.channel_init();
    let ty = ChannelType::ClientDirectChannel;
    init.register_stage(ty, PRIORITY_HIGH, "append-a", |b| {
        b.append_filter(Arc::new(TagFilter::new("a")));
        Ok(())
    });
    init.register_stage(ty, PRIORITY_HIGH, "append-b", |b| {
        b.append_filter(Arc::new(TagFilter::new("b")));
        Ok(())
    });
    init.register_stage(ty, PRIORITY_LOW, "prepend-low", |b| {
        b.prepend_filter(Arc::new(TagFilter::new("low")));
        Ok(())
    });
    let config = builder.build();

    assert_eq!(
        config.channel_init().stage_names(ty),
        vec!["prepend-low", "message_size", "append-a", "append-b", "connected"]
    );

    let channel =
        Channel::create_with_config(&config, "inproc:test", ty, ChannelArgs::new(), transport()).unwrap();
    assert_eq!(
        channel.filter_names(),
        vec!["message_size", "low", "a", "b", "connected"]
    );
}

#[test]
fn failing_stage_names_itself() {
    let mut builder = CoreConfiguration::builtin_builder();
    builder.channel_init().register_stage(
        ChannelType::ServerChannel,
        PRIORITY_LOW,
        "broken",
        |_| Err(FilterStackError::BadConfig("nope".into())),
    );
    let config = builder.build();

    let err = Channel::create_with_config(
        &config,
        "inproc:test",
        ChannelType::ServerChannel,
        ChannelArgs::new(),
        transport(),
    )
    .err()
    .expect("must fail");
    let text = err.to_string();
    assert!(text.contains("stage 'broken'"), "{text}");
    assert!(text.contains("nope"), "{text}");
}

#[test]
fn terminal_filter_must_be_last() {
    let mut builder = CoreConfiguration::builtin_builder();
    builder.channel_init().register_stage(
        ChannelType::ClientSubchannel,
        PRIORITY_LOW,
        "early-terminal",
        |b| {
            b.append_filter(Arc::new(ConnectedFilter));
            Ok(())
        },
    );
    let config = builder.build();

    let err = Channel::create_with_config(
        &config,
        "inproc:test",
        ChannelType::ClientSubchannel,
        ChannelArgs::new(),
        transport(),
    )
    .err()
    .expect("must fail");
    assert!(err.to_string().contains("terminal filter is not last"), "{err}");
}

#[test]
fn empty_configuration_builds_nothing() {
    let config = CoreConfiguration::builder().build();
    let err = Channel::create_with_config(
        &config,
        "inproc:test",
        ChannelType::ClientDirectChannel,
        ChannelArgs::new(),
        transport(),
    )
    .err()
    .expect("must fail");
    assert!(matches!(err, FilterStackError::ChannelBuild(_)));
}

#[test]
fn call_stack_mirrors_channel_stack() {
    let config = CoreConfiguration::global();
    let mut builder = ChannelStackBuilder::new(ChannelType::ClientDirectChannel, "inproc:test", ChannelArgs::new());
    builder.set_transport(InProcTransport::manual());
    builder.append_filter(Arc::new(TagFilter::new("one")));
    builder.append_filter(Arc::new(TagFilter::new("two")));
    builder.append_filter(Arc::new(ConnectedFilter));
    let stack = builder.build(&config).unwrap();
    assert_eq!(stack.len(), 3);

    let combiner = Arc::new(CallCombiner::new());
    let context = CallContext::default();
    let call_stack = stack
        .create_call_stack(&CallElementArgs {
            path: "/test.Svc/Get",
            call_combiner: &combiner,
            context: &context,
        })
        .unwrap();
    assert_eq!(call_stack.len(), stack.len());
}

#[test]
fn batches_flow_through_every_filter() {
    let tag = Arc::new(TagFilter::new("tag"));
    let seen = Arc::clone(&tag.seen);

    let mut builder = CoreConfiguration::builtin_builder();
    builder.channel_init().register_stage(
        ChannelType::ClientSubchannel,
        PRIORITY_HIGH,
        "tag",
        move |b| {
            b.append_filter(Arc::clone(&tag) as Arc<dyn ChannelFilter>);
            Ok(())
        },
    );
    let config = builder.build();
    let manual = InProcTransport::manual();
    let t: Arc<dyn Transport> = manual.clone();
    let channel = Channel::create_with_config(
        &config,
        "inproc:test",
        ChannelType::ClientSubchannel,
        ChannelArgs::new(),
        Some(t),
    )
    .unwrap();
    assert_eq!(channel.filter_names(), vec!["message_size", "tag", "connected"]);

    let (call, stream) = manual_call(&channel, &manual, "/test.Svc/Get");
    call.start_batch(OpBatch::new().send_message(Bytes::from_static(b"hi")));
    call.start_batch(OpBatch::new().send_trailing_metadata(Metadata::new()));

    assert_eq!(seen.load(Ordering::SeqCst), 2);
    assert_eq!(stream.sent_messages().len(), 1);
    assert!(stream.is_half_closed());
}

#[test]
fn channel_info_walks_to_the_transport() {
    let sc = r#"{"methodConfig":[]}"#;
    let (channel, _t) = manual_channel(
        ChannelType::ClientSubchannel,
        ChannelArgs::new().with_service_config(sc),
    );
    let info = channel.info();
    assert_eq!(info.transport_name, Some("inproc"));
    assert_eq!(info.service_config_json.as_deref(), Some(sc));
    assert!(channel.service_config().is_some());
}

#[test]
fn disconnect_fails_open_and_new_streams() {
    let (channel, transport) = manual_channel(ChannelType::ClientSubchannel, ChannelArgs::new());
    let (call, _stream) = manual_call(&channel, &transport, "/test.Svc/Get");
    let ev = events();
    call.start_batch(
        OpBatch::new()
            .recv_message(RecvSlot::new(), record(&ev, "recv_message"))
            .recv_trailing_metadata(RecvSlot::new(), record(&ev, "recv_trailing_metadata")),
    );

    channel.disconnect(CallError::with_code(StatusCode::Unavailable, "connection lost"));

    assert_eq!(find(&ev, "recv_message")[0].status, Some(StatusCode::Unavailable));
    assert_eq!(find(&ev, "recv_trailing_metadata")[0].status, Some(StatusCode::Unavailable));
    assert_eq!(call.final_status().unwrap().message, "connection lost");

    let late = channel.create_call("/test.Svc/Get").unwrap();
    let ev = events();
    late.start_batch(
        OpBatch::new()
            .send_message(Bytes::from_static(b"x"))
            .on_complete(record(&ev, "on_complete")),
    );
    assert_eq!(find(&ev, "on_complete")[0].status, Some(StatusCode::Unavailable));
    assert!(transport.disconnect_error().is_some());
}
