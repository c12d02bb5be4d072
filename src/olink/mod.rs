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

// ObjectLink replay: frame codec, per-object fan-out sources, and the bus
// relay feeding them.

pub mod frame;
pub mod relay;
pub mod source;

pub use frame::{symbol_to_parts, Frame};
pub use relay::run_relay;
pub use source::{FrameSink, PlaybackRegistry, PlaybackSource};
