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

// Session capture and replay: metadata store, recorder, player, exporter.

pub mod export;
pub mod playback;
pub mod record;
pub mod store;

pub use export::{export, ExportOptions};
pub use playback::{playback, PlaybackOptions};
pub use record::{record, RecordOptions};
pub use store::{stream_name, Metadata, SessionStore};
