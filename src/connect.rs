// Copyright 2020-2022 The NATS Authors
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use serde::{Deserialize, Serialize};

#[allow(clippy::trivially_copy_pass_by_ref)]
#[inline]
fn is_empty_or_none(field: &Option<String>) -> bool {
    match field {
        Some(inner) => inner.is_empty(),
        None => true,
    }
}

/// Info to construct a CONNECT message.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[doc(hidden)]
#[allow(clippy::module_name_repetitions)]
pub struct ConnectInfo {
    /// Session identifier generated by the client.
    pub id: String,

    /// Optional client name.
    #[serde(default, skip_serializing_if = "is_empty_or_none")]
    pub name: Option<String>,

    /// Turns on +OK protocol acknowledgements.
    #[serde(default)]
    pub verbose: bool,

    /// Turns on additional strict format checking, e.g. for properly formed
    /// key expressions.
    #[serde(default)]
    pub pedantic: bool,

    /// The implementation language of the client.
    pub lang: String,

    /// The version of the client.
    pub version: String,
}

impl ConnectInfo {
    /// Serializes the info as a single JSON line.
    pub(crate) fn dump(&self) -> Option<String> {
        serde_json::to_string(self).ok()
    }
}
