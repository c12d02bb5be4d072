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

// Header helpers: deep copies and RFC3339-nano timestamp handling.

use async_nats::HeaderMap;
use chrono::{DateTime, SecondsFormat, Utc};

/// Returns a deep copy of a header map, preserving multi-valued keys.
pub fn clone_headers(headers: Option<&HeaderMap>) -> HeaderMap {
    let mut out = HeaderMap::new();
    if let Some(headers) = headers {
        for (name, values) in headers.iter() {
            for value in values {
                out.append(name.clone(), value.clone());
            }
        }
    }
    out
}

/// Formats a timestamp the way every header in the system carries it:
/// RFC3339 with nanoseconds, UTC.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Parses an RFC3339 header timestamp; returns None when missing or invalid.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if value.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

/// Fetches the first value of a header as a string slice.
pub fn header_str<'a>(headers: &'a HeaderMap, key: &str) -> Option<&'a str> {
    headers.get(key).map(|value| value.as_str())
}

/// Parses a header carrying an RFC3339 timestamp.
pub fn header_timestamp(headers: &HeaderMap, key: &str) -> Option<DateTime<Utc>> {
    header_str(headers, key).and_then(parse_timestamp)
}
