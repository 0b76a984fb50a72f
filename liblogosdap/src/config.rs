// Copyright 2025 Google LLC
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

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use serde_derive::Deserialize;
use tracing::{info, instrument};

use super::user;

#[instrument(skip_all)]
pub fn read_config(config_file: &Option<String>) -> anyhow::Result<Config> {
    let mut config = Config::default();
    if let Some(config_path) = config_file {
        info!("parsing explicitly passed in config ({})", config_path);
        let config_str = fs::read_to_string(config_path).context("reading config toml (1)")?;
        config = toml::from_str(&config_str).context("parsing config file (1)")?;
    } else {
        let user_info = user::info()?;
        let mut config_path = PathBuf::from(user_info.home_dir);
        config_path.push(".config");
        config_path.push("logosdap");
        config_path.push("config.toml");
        if config_path.exists() {
            let config_str = fs::read_to_string(config_path).context("reading config toml (2)")?;
            config = toml::from_str(&config_str).context("parsing config file (2)")?;
        }
    }

    Ok(config)
}

#[derive(Deserialize, Default, Debug, Clone)]
pub struct Config {
    /// How many seconds to wait for an adapter to answer a request
    /// before failing the caller. 30 by default.
    pub request_timeout_secs: Option<u64>,

    /// How many seconds a transport gets to reach its adapter
    /// before the connection attempt is abandoned. 10 by default.
    pub connect_timeout_secs: Option<u64>,

    /// Per-adapter-type overrides, keyed by adapter type (`node`,
    /// `python`, ...). Useful when an adapter lives somewhere
    /// unusual or needs extra flags:
    ///
    /// ```toml
    /// [adapters.python]
    /// command = "python3.12 -m debugpy.adapter"
    /// ```
    pub adapters: Option<HashMap<String, AdapterOverride>>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct AdapterOverride {
    /// Replacement spawn command line, split shell-style.
    pub command: Option<String>,
    /// Replacement dial host for socket adapters.
    pub host: Option<String>,
    /// Replacement dial port for socket adapters.
    pub port: Option<u16>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_full_config() {
        let blob = r#"
            request_timeout_secs = 10
            connect_timeout_secs = 3

            [adapters.python]
            command = "python3.12 -m debugpy.adapter"

            [adapters.go]
            host = "127.0.0.1"
            port = 40000
        "#;
        let config: Config = toml::from_str(blob).expect("config to parse");
        assert_eq!(config.request_timeout_secs, Some(10));
        assert_eq!(config.connect_timeout_secs, Some(3));
        let adapters = config.adapters.expect("adapter overrides");
        assert_eq!(
            adapters["python"].command.as_deref(),
            Some("python3.12 -m debugpy.adapter")
        );
        assert_eq!(adapters["go"].port, Some(40000));
    }

    #[test]
    fn empty_config_is_fine() {
        let config: Config = toml::from_str("").expect("empty config to parse");
        assert!(config.request_timeout_secs.is_none());
        assert!(config.adapters.is_none());
    }
}
