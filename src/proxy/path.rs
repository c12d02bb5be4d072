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

// Route path grammar: colon-prefix parameters in route configurations are
// translated to brace form at registration, base paths are normalized, and
// request paths are matched against the resulting patterns.

use std::collections::HashMap;

/// Normalizes a base path: leading slash, no trailing slash except for root.
pub fn normalize_base_path(base: &str) -> String {
    let base = base.trim();
    if base.is_empty() {
        return String::new();
    }
    let mut base = if base.starts_with('/') {
        base.to_string()
    } else {
        format!("/{base}")
    };
    if base.len() > 1 {
        base = base.trim_end_matches('/').to_string();
        if base.is_empty() {
            base = "/".to_string();
        }
    }
    base
}

/// Translates colon-prefix parameters (`/ws/:id`) to brace form (`/ws/{id}`).
pub fn convert_colon_params(path: &str) -> String {
    let mut out = String::with_capacity(path.len() + 4);
    let mut rest = path;
    while let Some(pos) = rest.find(':') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        let end = after.find('/').unwrap_or(after.len());
        if end > 0 {
            out.push('{');
            out.push_str(&after[..end]);
            out.push('}');
        } else {
            out.push(':');
        }
        rest = &after[end..];
    }
    out.push_str(rest);
    if out.is_empty() {
        return "/".to_string();
    }
    out
}

/// Joins a base path and a route path into the registered pattern.
pub fn build_route_path(base: &str, path: &str) -> String {
    let base = normalize_base_path(base);
    let path = path.trim();

    let joined = if base.is_empty() && (path.is_empty() || path == "/") {
        "/".to_string()
    } else if base.is_empty() {
        format!("/{}", path.trim_start_matches('/'))
    } else if path.is_empty() || path == "/" {
        base
    } else {
        format!(
            "{}/{}",
            base.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    };
    convert_colon_params(&joined)
}

#[derive(Debug, Clone)]
enum Segment {
    Literal(String),
    Param(String),
}

/// A parsed route pattern in brace form, matched segment-by-segment.
#[derive(Debug, Clone)]
pub struct PathPattern {
    pattern: String,
    segments: Vec<Segment>,
}

impl PathPattern {
    pub fn parse(pattern: &str) -> Self {
        let segments = pattern
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(|segment| {
                if segment.starts_with('{') && segment.ends_with('}') && segment.len() > 2 {
                    Segment::Param(segment[1..segment.len() - 1].to_string())
                } else {
                    Segment::Literal(segment.to_string())
                }
            })
            .collect();
        Self {
            pattern: pattern.to_string(),
            segments,
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Matches a request path, returning the captured parameters.
    pub fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        let parts: Vec<&str> = path.split('/').filter(|part| !part.is_empty()).collect();
        if parts.len() != self.segments.len() {
            return None;
        }
        let mut params = HashMap::new();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                Segment::Literal(literal) => {
                    if literal != part {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    params.insert(name.clone(), part.to_string());
                }
            }
        }
        Some(params)
    }
}
