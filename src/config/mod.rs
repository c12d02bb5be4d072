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

// Configuration module: well-known names plus serve configuration loading.

pub mod loader;
pub mod names;
pub mod types;

pub use loader::ConfigLoader;
pub use names::*;
pub use types::{
    BusConfig, LoggingConfig, ProxyConfig, ProxyRouteConfig, RelayConfig, ServeConfig,
    ServicesConfig,
};

use std::path::Path;

/// Load serve configuration from a YAML file.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<ServeConfig> {
    ConfigLoader::load(path)
}
