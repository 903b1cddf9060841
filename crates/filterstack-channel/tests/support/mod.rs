//! Helpers shared by channel integration tests.

#![allow(dead_code)]
#![allow(clippy::unwrap_used)]

use std::sync::{Arc, Mutex};

use filterstack_channel::transport::{InProcStream, InProcTransport, Transport};
use filterstack_channel::{Call, ChannelArgs, ChannelType, Channel};
use filterstack_core::{Closure, StatusCode};

/// One observed completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub name: &'static str,
    pub status: Option<StatusCode>,
    pub error: Option<String>,
}

pub type Events = Arc<Mutex<Vec<Event>>>;

pub fn events() -> Events {
    Arc::new(Mutex::new(Vec::new()))
}

/// Application completion that records itself.
pub fn record(events: &Events, name: &'static str) -> Closure {
    let events = Arc::clone(events);
    Closure::new(name, move |err| {
        events.lock().unwrap().push(Event {
            name,
            status: err.as_ref().map(|e| e.status()),
            error: err.map(|e| e.to_string()),
        });
    })
}

pub fn names(events: &Events) -> Vec<&'static str> {
    events.lock().unwrap().iter().map(|e| e.name).collect()
}

pub fn find(events: &Events, name: &str) -> Vec<Event> {
    events
        .lock()
        .unwrap()
        .iter()
        .filter(|e| e.name == name)
        .cloned()
        .collect()
}

pub fn manual_channel(channel_type: ChannelType, args: ChannelArgs) -> (Channel, Arc<InProcTransport>) {
    let transport = InProcTransport::manual();
    let dyn_transport: Arc<dyn Transport> = transport.clone();
    let channel = Channel::create("inproc:test", channel_type, args, Some(dyn_transport)).unwrap();
    (channel, transport)
}

pub fn echo_channel(channel_type: ChannelType, args: ChannelArgs) -> Channel {
    let transport: Arc<dyn Transport> = InProcTransport::echo();
    Channel::create("inproc:echo", channel_type, args, Some(transport)).unwrap()
}

/// A call plus the manual stream backing it.
pub fn manual_call(channel: &Channel, transport: &InProcTransport, path: &str) -> (Call, Arc<InProcStream>) {
    let call = channel.create_call(path).unwrap();
    let stream = transport.last_stream().unwrap();
    assert_eq!(stream.path(), path);
    (call, stream)
}
