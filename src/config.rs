//! Startup configuration.
//!
//! A YAML 1.2 document describing sequencer timing, the outputs to drive,
//! the birds grouping them, and an optional admin port:
//!
//! ```yaml
//! %YAML 1.2
//! ---
//! Settings:
//!   MinWait: 1000
//!   MaxWait: 4000
//!   MinPecks: 1
//!   MaxPecks: 3
//!   PeckWait: 500
//! Outputs:
//!   - Body:
//!     Type: Memory
//!   - Beak:
//!     Type: File
//!     Path: /tmp/beak
//!   - Neck:
//!     Type: GPIO
//!     Pin: 17
//! Birds:
//!   - Woody:
//!     Static: [Body]
//!     Back: [Neck]
//!     Forward: [Beak]
//! Admin:
//!   Port: 7750
//! ```
//!
//! Each output and bird entry is a mapping whose first key is its name
//! (with an empty value); the remaining keys describe it.  JSON flow
//! documents are YAML too, so `{"Outputs": [{"Beak": null, "Type": "Memory"}]}`
//! is equally valid.
//!
//! Every section is optional.  Unknown keys are rejected.  Whether bird
//! references name real outputs is checked by the Controller when the
//! configuration is applied, not here.

use core::fmt;
use std::path::{Path, PathBuf};

use log::info;
use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};

use crate::controller::{Controller, Timing};
use crate::error::{ConfigError, Error};

/// Whole configuration document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields, default)]
pub struct Configuration {
    pub settings: Settings,
    pub outputs: Vec<OutputConfig>,
    pub birds: Vec<BirdConfig>,
    pub admin: Option<AdminConfig>,
}

/// Sequencer timing (milliseconds, except the peck counts).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields, default)]
pub struct Settings {
    pub min_wait: u32,
    pub max_wait: u32,
    pub min_pecks: u32,
    pub max_pecks: u32,
    pub peck_wait: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            min_wait: 1000,
            max_wait: 4000,
            min_pecks: 1,
            max_pecks: 3,
            peck_wait: 500,
        }
    }
}

impl From<Settings> for Timing {
    fn from(s: Settings) -> Self {
        Self {
            min_wait: s.min_wait,
            max_wait: s.max_wait,
            min_pecks: s.min_pecks,
            max_pecks: s.max_pecks,
            peck_wait: s.peck_wait,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputType {
    Memory,
    File,
    #[serde(rename = "GPIO")]
    Gpio,
}

/// One entry of `Outputs`.  The entry's first key is the output's name and
/// carries no value; `Type` and the type-specific keys follow it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputConfig {
    pub name: String,
    pub kind: OutputType,
    pub path: Option<PathBuf>,
    pub pin: Option<u32>,
}

/// One entry of `Birds`, headed by the bird's name like an output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BirdConfig {
    pub name: String,
    pub statics: Vec<String>,
    pub back: Vec<String>,
    pub forward: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct AdminConfig {
    pub port: u16,
}

impl Configuration {
    /// Read and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_yaml(&text)?;
        info!(
            "Config: loaded {} ({} outputs, {} birds)",
            path.display(),
            config.outputs.len(),
            config.birds.len()
        );
        Ok(config)
    }

    /// Parse and validate a YAML (or JSON) document.  A document with no
    /// content yields the defaults.
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let config = if text.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str::<Option<Self>>(text)?.unwrap_or_default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Structural checks that need no knowledge of other sections.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.settings;
        if s.min_wait > s.max_wait {
            return Err(ConfigError::ValidationFailed("MinWait exceeds MaxWait"));
        }
        if s.min_pecks > s.max_pecks {
            return Err(ConfigError::ValidationFailed("MinPecks exceeds MaxPecks"));
        }
        if s.peck_wait == 0 {
            return Err(ConfigError::ValidationFailed("PeckWait must be positive"));
        }

        for output in &self.outputs {
            if output.name.is_empty() {
                return Err(ConfigError::ValidationFailed("output name is empty"));
            }
            match output.kind {
                OutputType::File if output.path.is_none() => {
                    return Err(ConfigError::ValidationFailed("File output requires Path"));
                }
                OutputType::Gpio if output.pin.is_none() => {
                    return Err(ConfigError::ValidationFailed("GPIO output requires Pin"));
                }
                _ => {}
            }
        }

        if self.birds.iter().any(|b| b.name.is_empty()) {
            return Err(ConfigError::ValidationFailed("bird name is empty"));
        }

        Ok(())
    }

    pub fn admin_port(&self) -> Option<u16> {
        self.admin.map(|a| a.port)
    }

    /// Push timing, then outputs, then birds into the Controller, stopping
    /// at the first rejection.
    pub fn apply(&self, controller: &mut Controller) -> Result<(), Error> {
        controller.set_timing(self.settings.into());

        for output in &self.outputs {
            match (output.kind, &output.path, output.pin) {
                (OutputType::Memory, _, _) => controller.add_memory_output(&output.name)?,
                (OutputType::File, Some(path), _) => {
                    controller.add_file_output(&output.name, path.clone())?;
                }
                (OutputType::Gpio, _, Some(pin)) => controller.add_gpio_output(&output.name, pin)?,
                _ => return Err(ConfigError::ValidationFailed("output is missing Path or Pin").into()),
            }
        }

        fn names(list: &[String]) -> Vec<&str> {
            list.iter().map(String::as_str).collect()
        }

        for bird in &self.birds {
            controller.add_bird(
                &bird.name,
                &names(&bird.statics),
                &names(&bird.back),
                &names(&bird.forward),
            )?;
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Name-headed entries
// ---------------------------------------------------------------------------

const OUTPUT_KEYS: &[&str] = &["Type", "Path", "Pin"];
const BIRD_KEYS: &[&str] = &["Static", "Back", "Forward"];

/// Take the entry's leading name key.  Its value must be empty.
fn entry_name<'de, A: MapAccess<'de>>(map: &mut A) -> Result<String, A::Error> {
    let name: String = map
        .next_key()?
        .ok_or_else(|| de::Error::invalid_length(0, &"a mapping headed by a name"))?;
    map.next_value::<()>()?;
    Ok(name)
}

struct OutputVisitor;

impl<'de> Visitor<'de> for OutputVisitor {
    type Value = OutputConfig;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an output mapping headed by its name")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<OutputConfig, A::Error> {
        let name = entry_name(&mut map)?;
        let mut kind = None;
        let mut path = None;
        let mut pin = None;

        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                "Type" => kind = Some(map.next_value()?),
                "Path" => path = Some(map.next_value()?),
                "Pin" => pin = Some(map.next_value()?),
                other => return Err(de::Error::unknown_field(other, OUTPUT_KEYS)),
            }
        }

        Ok(OutputConfig {
            name,
            kind: kind.ok_or_else(|| de::Error::missing_field("Type"))?,
            path,
            pin,
        })
    }
}

impl<'de> Deserialize<'de> for OutputConfig {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(OutputVisitor)
    }
}

impl Serialize for OutputConfig {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry(&self.name, &())?;
        map.serialize_entry("Type", &self.kind)?;
        if let Some(path) = &self.path {
            map.serialize_entry("Path", path)?;
        }
        if let Some(pin) = self.pin {
            map.serialize_entry("Pin", &pin)?;
        }
        map.end()
    }
}

struct BirdVisitor;

impl<'de> Visitor<'de> for BirdVisitor {
    type Value = BirdConfig;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a bird mapping headed by its name")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<BirdConfig, A::Error> {
        let mut bird = BirdConfig {
            name: entry_name(&mut map)?,
            statics: Vec::new(),
            back: Vec::new(),
            forward: Vec::new(),
        };

        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                "Static" => bird.statics = map.next_value()?,
                "Back" => bird.back = map.next_value()?,
                "Forward" => bird.forward = map.next_value()?,
                other => return Err(de::Error::unknown_field(other, BIRD_KEYS)),
            }
        }

        Ok(bird)
    }
}

impl<'de> Deserialize<'de> for BirdConfig {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(BirdVisitor)
    }
}

impl Serialize for BirdConfig {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry(&self.name, &())?;
        for (key, names) in [
            ("Static", &self.statics),
            ("Back", &self.back),
            ("Forward", &self.forward),
        ] {
            if !names.is_empty() {
                map.serialize_entry(key, names)?;
            }
        }
        map.end()
    }
}
