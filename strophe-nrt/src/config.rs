use std::path::{Path, PathBuf};

use serde::Deserialize;

const DEFAULT_CONFIG: &str = include_str!("../render.toml");

#[derive(Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    render: RenderSection,
    #[serde(default)]
    server: ServerSection,
}

#[derive(Deserialize, Default, Debug, Clone)]
struct RenderSection {
    executable: Option<String>,
    sample_rate: Option<u32>,
    header_format: Option<String>,
    sample_format: Option<String>,
}

#[derive(Deserialize, Default, Debug, Clone)]
struct ServerSection {
    block_size: Option<u32>,
    memory_size: Option<u32>,
    buffer_count: Option<u32>,
    maximum_node_count: Option<u32>,
    wire_count: Option<u32>,
}

/// Container format of the rendered file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HeaderFormat {
    #[default]
    Aiff,
    Wav,
    Next,
    Ircam,
    Raw,
}

impl HeaderFormat {
    pub fn token(self) -> &'static str {
        match self {
            HeaderFormat::Aiff => "aiff",
            HeaderFormat::Wav => "wav",
            HeaderFormat::Next => "next",
            HeaderFormat::Ircam => "ircam",
            HeaderFormat::Raw => "raw",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SampleFormat {
    Int8,
    Int16,
    #[default]
    Int24,
    Int32,
    Float,
    Double,
    Mulaw,
    Alaw,
}

impl SampleFormat {
    pub fn token(self) -> &'static str {
        match self {
            SampleFormat::Int8 => "int8",
            SampleFormat::Int16 => "int16",
            SampleFormat::Int24 => "int24",
            SampleFormat::Int32 => "int32",
            SampleFormat::Float => "float",
            SampleFormat::Double => "double",
            SampleFormat::Mulaw => "mulaw",
            SampleFormat::Alaw => "alaw",
        }
    }
}

/// Settings for offline renders: which server binary to run and how.
#[derive(Debug, Clone)]
pub struct RenderConfig {
    render: RenderSection,
    server: ServerSection,
}

impl Default for RenderConfig {
    fn default() -> Self {
        let base = embedded();
        RenderConfig {
            render: base.render,
            server: base.server,
        }
    }
}

impl RenderConfig {
    /// Embedded defaults overlaid with the user's `render.toml`, if present.
    pub fn load() -> Self {
        match user_config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    pub fn load_from(path: &Path) -> Self {
        let mut base = embedded();

        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(contents) => match toml::from_str::<ConfigFile>(&contents) {
                    Ok(user) => {
                        merge_render(&mut base.render, user.render);
                        merge_server(&mut base.server, user.server);
                    }
                    Err(e) => {
                        log::warn!(target: "config", "ignoring malformed config {}: {}", path.display(), e)
                    }
                },
                Err(e) => {
                    log::warn!(target: "config", "could not read config {}: {}", path.display(), e)
                }
            }
        }

        RenderConfig {
            render: base.render,
            server: base.server,
        }
    }

    pub fn executable(&self) -> &str {
        self.render.executable.as_deref().unwrap_or("scsynth")
    }

    pub fn sample_rate(&self) -> u32 {
        self.render.sample_rate.unwrap_or(44_100)
    }

    pub fn header_format(&self) -> HeaderFormat {
        self.render
            .header_format
            .as_deref()
            .and_then(parse_header_format)
            .unwrap_or_default()
    }

    pub fn sample_format(&self) -> SampleFormat {
        self.render
            .sample_format
            .as_deref()
            .and_then(parse_sample_format)
            .unwrap_or_default()
    }

    pub fn block_size(&self) -> u32 {
        self.server.block_size.unwrap_or(64)
    }

    /// Real-time memory pool in kilobytes.
    pub fn memory_size(&self) -> u32 {
        self.server.memory_size.unwrap_or(8192)
    }

    pub fn buffer_count(&self) -> u32 {
        self.server.buffer_count.unwrap_or(1024)
    }

    pub fn maximum_node_count(&self) -> u32 {
        self.server.maximum_node_count.unwrap_or(1024)
    }

    pub fn wire_count(&self) -> u32 {
        self.server.wire_count.unwrap_or(64)
    }

    pub fn with_executable(mut self, executable: impl Into<String>) -> Self {
        self.render.executable = Some(executable.into());
        self
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.render.sample_rate = Some(sample_rate);
        self
    }

    pub fn with_header_format(mut self, format: HeaderFormat) -> Self {
        self.render.header_format = Some(format.token().to_string());
        self
    }

    pub fn with_sample_format(mut self, format: SampleFormat) -> Self {
        self.render.sample_format = Some(format.token().to_string());
        self
    }
}

fn embedded() -> ConfigFile {
    toml::from_str(DEFAULT_CONFIG).expect("Failed to parse embedded render.toml")
}

fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("strophe").join("render.toml"))
}

fn merge_render(base: &mut RenderSection, user: RenderSection) {
    if user.executable.is_some() {
        base.executable = user.executable;
    }
    if user.sample_rate.is_some() {
        base.sample_rate = user.sample_rate;
    }
    if user.header_format.is_some() {
        base.header_format = user.header_format;
    }
    if user.sample_format.is_some() {
        base.sample_format = user.sample_format;
    }
}

fn merge_server(base: &mut ServerSection, user: ServerSection) {
    if user.block_size.is_some() {
        base.block_size = user.block_size;
    }
    if user.memory_size.is_some() {
        base.memory_size = user.memory_size;
    }
    if user.buffer_count.is_some() {
        base.buffer_count = user.buffer_count;
    }
    if user.maximum_node_count.is_some() {
        base.maximum_node_count = user.maximum_node_count;
    }
    if user.wire_count.is_some() {
        base.wire_count = user.wire_count;
    }
}

fn parse_header_format(s: &str) -> Option<HeaderFormat> {
    match s.to_lowercase().as_str() {
        "aiff" => Some(HeaderFormat::Aiff),
        "wav" | "wave" => Some(HeaderFormat::Wav),
        "next" => Some(HeaderFormat::Next),
        "ircam" => Some(HeaderFormat::Ircam),
        "raw" => Some(HeaderFormat::Raw),
        _ => None,
    }
}

fn parse_sample_format(s: &str) -> Option<SampleFormat> {
    match s.to_lowercase().as_str() {
        "int8" => Some(SampleFormat::Int8),
        "int16" => Some(SampleFormat::Int16),
        "int24" => Some(SampleFormat::Int24),
        "int32" => Some(SampleFormat::Int32),
        "float" => Some(SampleFormat::Float),
        "double" => Some(SampleFormat::Double),
        "mulaw" => Some(SampleFormat::Mulaw),
        "alaw" => Some(SampleFormat::Alaw),
        _ => None,
    }
}
