// Copyright 2025 coScene
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

// Serve configuration loading from YAML files.

use std::io::Write;

use streams_recorder::config::{self, names};

fn write_config(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_load_minimal_config() {
    let file = write_config("{}\n");
    let config = config::load_config(file.path()).unwrap();
    assert_eq!(config.bus.mode, "managed");
    assert_eq!(config.services.command_subject, names::RECORD_RPC_SUBJECT);
    assert_eq!(config.services.state_bucket, names::STATE_BUCKET);
    assert_eq!(config.services.buffer_refresh_seconds, 15);
    assert!(config.proxy.is_none());
    assert!(config.relay.is_none());
}

#[test]
fn test_load_full_config() {
    let file = write_config(
        r#"
bus:
  mode: external
  url: nats://example:4222
services:
  command_subject: custom.rpc
  monitor_subject: telemetry
  buffer_refresh_seconds: 30
proxy:
  enabled: true
  listen_addr: 127.0.0.1:6000
  base_path: /gw
  reconnect_attempts: 5
  reconnect_backoff_ms: 250
  routes:
    - path: /ws/:id
      param: id
      mode: text
      targets:
        abc: ws://localhost:9999/
relay:
  enabled: true
  subject: replay.olink
logging:
  level: debug
"#,
    );
    let config = config::load_config(file.path()).unwrap();
    assert_eq!(config.bus.mode, "external");
    assert_eq!(config.bus.url, "nats://example:4222");
    assert_eq!(config.services.command_subject, "custom.rpc");
    assert_eq!(config.services.monitor_subject, "telemetry");

    let proxy = config.proxy.unwrap();
    assert!(proxy.enabled);
    assert_eq!(proxy.base_path, "/gw");
    assert_eq!(proxy.reconnect_attempts, 5);
    assert_eq!(proxy.routes.len(), 1);
    assert_eq!(proxy.routes[0].param, "id");

    let relay = config.relay.unwrap();
    assert!(relay.enabled);
    assert_eq!(relay.subject, "replay.olink");
    assert_eq!(config.logging.level, "debug");
}

#[test]
fn test_env_substitution_in_file() {
    std::env::set_var("STREAMS_TEST_SUBJECT", "from-env");
    let file = write_config(
        r#"
services:
  monitor_subject: ${STREAMS_TEST_SUBJECT}
  command_subject: ${STREAMS_TEST_MISSING:-fallback.rpc}
"#,
    );
    let config = config::load_config(file.path()).unwrap();
    assert_eq!(config.services.monitor_subject, "from-env");
    assert_eq!(config.services.command_subject, "fallback.rpc");
    std::env::remove_var("STREAMS_TEST_SUBJECT");
}

#[test]
fn test_invalid_config_rejected() {
    let file = write_config(
        r#"
bus:
  mode: carrier-pigeon
"#,
    );
    let err = config::load_config(file.path()).unwrap_err();
    assert!(err.to_string().contains("bus mode"));
}

#[test]
fn test_proxy_route_validation() {
    let file = write_config(
        r#"
proxy:
  enabled: true
  routes:
    - path: /ws/:id
      param: id
      mode: smoke-signals
      targets:
        abc: ws://localhost:9999/
"#,
    );
    let err = config::load_config(file.path()).unwrap_err();
    assert!(err.to_string().contains("mode"));
}

#[test]
fn test_missing_file_errors() {
    let err = config::load_config("/does/not/exist.yaml").unwrap_err();
    assert!(err.to_string().contains("config file"));
}
