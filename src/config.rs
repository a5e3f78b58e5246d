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

//! JSON configuration addressed with `/`-separated keys.
//!
//! ```
//! # fn main() -> keysub::Result<()> {
//! let mut config = keysub::Config::new();
//! config.insert_json("connect/endpoints", r#"["tcp/localhost:7447"]"#)?;
//! assert_eq!(config.endpoints()?.primary().port(), 7447);
//! # Ok(())
//! # }
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::{EndpointList, Error, IntoEndpointList, Options, Result};

/// Key holding the list of router endpoints.
pub const ENDPOINTS_KEY: &str = "connect/endpoints";

/// Key holding the per-endpoint connect timeout in milliseconds.
pub const TIMEOUT_KEY: &str = "connect/timeout_ms";

/// Key holding the client name.
pub const NAME_KEY: &str = "name";

const DEFAULT_TIMEOUT_MS: u64 = 10_000;

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

#[derive(Debug, Deserialize)]
struct Settings {
    #[serde(default)]
    name: Option<String>,
    connect: ConnectSettings,
}

#[derive(Debug, Deserialize)]
struct ConnectSettings {
    endpoints: Vec<String>,
    #[serde(default = "default_timeout_ms")]
    timeout_ms: u64,
}

/// Configuration of a subscriber session.
#[derive(Debug, Clone, PartialEq)]
pub struct Config(Value);

impl Default for Config {
    fn default() -> Config {
        Config(Value::Object(Map::new()))
    }
}

impl Config {
    /// An empty configuration.
    pub fn new() -> Config {
        Config::default()
    }

    /// Parses a configuration document, which must be a JSON object.
    pub fn from_json(json: &str) -> Result<Config> {
        let value: Value = serde_json::from_str(json)
            .map_err(|err| Error::Config(format!("malformed JSON: {}", err)))?;
        if !value.is_object() {
            return Err(Error::Config(
                "the configuration must be a JSON object".to_string(),
            ));
        }
        Ok(Config(value))
    }

    /// Loads a configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .map_err(|err| Error::Config(format!("cannot read {}: {}", path.display(), err)))?;
        Config::from_json(&json)
    }

    /// Parses `json` and stores it under `key`, creating intermediate objects.
    pub fn insert_json(&mut self, key: &str, json: &str) -> Result<()> {
        let value: Value = serde_json::from_str(json)
            .map_err(|err| Error::Config(format!("malformed JSON for `{}`: {}", key, err)))?;
        self.insert(key, value)
    }

    /// Stores `value` under `key`, creating intermediate objects.
    pub fn insert(&mut self, key: &str, value: impl Into<Value>) -> Result<()> {
        let chunks: Vec<&str> = key.split('/').collect();
        if chunks.iter().any(|chunk| chunk.is_empty()) {
            return Err(Error::Config(format!("invalid key `{}`", key)));
        }
        let not_an_object = || Error::Config(format!("`{}` does not lead to an object", key));

        let (last, parents) = chunks.split_last().ok_or_else(not_an_object)?;
        let mut node = &mut self.0;
        for parent in parents {
            node = node
                .as_object_mut()
                .ok_or_else(not_an_object)?
                .entry(parent.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
        }
        node.as_object_mut()
            .ok_or_else(not_an_object)?
            .insert(last.to_string(), value.into());
        Ok(())
    }

    /// Looks up the value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.pointer(&format!("/{}", key))
    }

    fn settings(&self) -> Result<Settings> {
        Settings::deserialize(&self.0).map_err(|err| Error::Config(err.to_string()))
    }

    /// The endpoints stored under `connect/endpoints`.
    pub fn endpoints(&self) -> Result<EndpointList> {
        self.settings()?.connect.endpoints.into_endpoint_list()
    }

    /// The connect timeout stored under `connect/timeout_ms`, 10 seconds if unset.
    pub fn connect_timeout(&self) -> Result<Duration> {
        Ok(Duration::from_millis(self.settings()?.connect.timeout_ms))
    }

    /// Connection options derived from this configuration.
    pub fn options(&self) -> Result<Options> {
        let settings = self.settings()?;
        let mut options =
            Options::new().connect_timeout(Duration::from_millis(settings.connect.timeout_ms));
        if let Some(name) = settings.name {
            options = options.with_name(&name);
        }
        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_json_creates_nested_objects() {
        let mut config = Config::new();
        config
            .insert_json(ENDPOINTS_KEY, r#"["tcp/localhost:7447"]"#)
            .unwrap();
        assert_eq!(
            config.get("connect/endpoints"),
            Some(&serde_json::json!(["tcp/localhost:7447"]))
        );
        assert!(config.get("connect/missing").is_none());
    }

    #[test]
    fn endpoints_keep_configured_order() {
        let config = Config::from_json(
            r#"{"connect": {"endpoints": ["tcp/zenoh-router:7447", "tcp/zenoh-mqtt-bridge:7448"]}}"#,
        )
        .unwrap();
        let endpoints = config.endpoints().unwrap();
        assert_eq!(
            endpoints.to_string(),
            "tcp/zenoh-router:7447,tcp/zenoh-mqtt-bridge:7448"
        );
        assert_eq!(config.connect_timeout().unwrap(), Duration::from_secs(10));
    }

    #[test]
    fn timeout_and_name() {
        let mut config = Config::new();
        config.insert(ENDPOINTS_KEY, vec!["tcp/a:1"]).unwrap();
        config.insert(TIMEOUT_KEY, 250_u64).unwrap();
        config.insert(NAME_KEY, "sensor-dashboard").unwrap();
        assert_eq!(
            config.connect_timeout().unwrap(),
            Duration::from_millis(250)
        );
        let options = config.options().unwrap();
        assert_eq!(options.name.as_deref(), Some("sensor-dashboard"));
        assert_eq!(options.connect_timeout, Duration::from_millis(250));
    }

    #[test]
    fn malformed_configuration() {
        assert!(matches!(Config::from_json("{"), Err(Error::Config(_))));
        assert!(matches!(Config::from_json("[1]"), Err(Error::Config(_))));
        assert!(matches!(Config::new().endpoints(), Err(Error::Config(_))));

        let mut config = Config::new();
        assert!(matches!(
            config.insert_json(ENDPOINTS_KEY, "[tcp/a:1]"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            config.insert("connect//endpoints", 1),
            Err(Error::Config(_))
        ));

        config.insert(ENDPOINTS_KEY, "tcp/a:1").unwrap();
        assert!(matches!(config.endpoints(), Err(Error::Config(_))));

        config.insert("name", 1).unwrap();
        assert!(matches!(
            config.insert("name/first", "x"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn empty_endpoint_list_is_rejected() {
        let config = Config::from_json(r#"{"connect": {"endpoints": []}}"#).unwrap();
        assert!(matches!(config.endpoints(), Err(Error::InvalidEndpoint(_))));
    }
}
