#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::sync::Arc;

use filterstack_channel::config;
use filterstack_channel::transport::{InProcTransport, Transport};
use filterstack_channel::{Channel, ChannelType};
use filterstack_core::error::{FilterStackError, StatusCode};

#[test]
fn deny_unknown_fields_nested() {
    let bad = r#"
version: 1
channels:
  - name: "a"
    type: client_subchannel
    args: { max_send_message_lenght: 10 } # typo should fail
"#;

    let err = config::load_from_str(bad).expect_err("must fail");
    assert_eq!(err.status_code(), StatusCode::InvalidArgument);
    assert!(err.to_string().contains("invalid yaml"), "{err}");
}

#[test]
fn ok_minimal_config() {
    let ok = r#"
version: 1
channels:
  - name: "a"
    type: server_channel
"#;
    let cfg = config::load_from_str(ok).expect("must parse");
    assert_eq!(cfg.version, 1);
    let ch = &cfg.channels[0];
    assert_eq!(ch.channel_type, ChannelType::ServerChannel);
    assert_eq!(ch.target, "inproc");
    assert_eq!(ch.probe_path, "/filterstack.Echo/Ping");
    assert!(ch.args.max_send_message_length.is_none());
    assert!(!ch.args.want_minimal_stack());
}

#[test]
fn rejects_unknown_version() {
    let bad = r#"
version: 2
channels:
  - name: "a"
    type: server_channel
"#;
    let err = config::load_from_str(bad).expect_err("must fail");
    assert!(matches!(err, FilterStackError::UnsupportedVersion));
}

#[test]
fn rejects_out_of_range_limit() {
    let bad = r#"
version: 1
channels:
  - name: "a"
    type: client_direct_channel
    args:
      max_receive_message_length: -2
"#;
    let err = config::load_from_str(bad).expect_err("must fail");
    let text = err.to_string();
    assert!(text.contains("channels[a].args"), "{text}");
    assert!(text.contains("max_receive_message_length"), "{text}");
}

#[test]
fn rejects_duplicate_names_and_unknown_types() {
    let dup = r#"
version: 1
channels:
  - { name: "a", type: server_channel }
  - { name: "a", type: client_subchannel }
"#;
    let err = config::load_from_str(dup).expect_err("must fail");
    assert!(err.to_string().contains("duplicate channel name: a"), "{err}");

    let unknown = r#"
version: 1
channels:
  - { name: "a", type: load_balanced }
"#;
    config::load_from_str(unknown).expect_err("must fail");
}

#[test]
fn rejects_relative_probe_path() {
    let bad = r#"
version: 1
channels:
  - { name: "a", type: server_channel, probe_path: "Echo/Ping" }
"#;
    let err = config::load_from_str(bad).expect_err("must fail");
    assert!(err.to_string().contains("probe_path"), "{err}");
}

#[test]
fn shipped_config_builds_every_channel() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../../filterstack.yaml");
    let cfg = config::load_from_file(path).expect("shipped config must load");
    assert_eq!(cfg.channels.len(), 4);

    for ch in cfg.channels {
        let transport: Arc<dyn Transport> = InProcTransport::echo();
        let channel = Channel::create(&ch.target, ch.channel_type, ch.args, Some(transport))
            .unwrap_or_else(|e| panic!("channel {}: {e}", ch.name));
        let expected: &[&str] = if ch.name == "server-minimal" {
            &["connected"]
        } else {
            &["message_size", "connected"]
        };
        assert_eq!(channel.filter_names(), expected, "channel {}", ch.name);
    }
}
