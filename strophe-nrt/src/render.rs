//! Offline rendering through an external `scsynth -N` process.

use std::path::{Path, PathBuf};
use std::process::Command;

use sha2::{Digest, Sha256};

use crate::config::RenderConfig;
use crate::error::RenderResult;
use crate::offset::OffsetRange;
use crate::session::Session;

/// How the server process ended. A non-zero exit is reported here, not as an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderOutcome {
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub success: bool,
    pub output: PathBuf,
}

/// Full argument vector, executable first.
pub fn build_command(
    config: &RenderConfig,
    session: &Session,
    osc_path: &Path,
    input: Option<&Path>,
    output: &Path,
) -> Vec<String> {
    vec![
        config.executable().to_string(),
        "-i".to_string(),
        session.input_count().to_string(),
        "-o".to_string(),
        session.output_count().to_string(),
        "-z".to_string(),
        config.block_size().to_string(),
        "-m".to_string(),
        config.memory_size().to_string(),
        "-b".to_string(),
        config.buffer_count().to_string(),
        "-n".to_string(),
        config.maximum_node_count().to_string(),
        "-w".to_string(),
        config.wire_count().to_string(),
        "-N".to_string(),
        osc_path.display().to_string(),
        input.map_or_else(|| "_".to_string(), |path| path.display().to_string()),
        output.display().to_string(),
        config.sample_rate().to_string(),
        config.header_format().token().to_string(),
        config.sample_format().token().to_string(),
    ]
}

/// Write the session's datagram to a scratch directory and render it to `output`.
pub fn render(
    session: &Session,
    range: Option<OffsetRange>,
    input: Option<&Path>,
    output: &Path,
    config: &RenderConfig,
) -> RenderResult<RenderOutcome> {
    let datagram = session.to_datagram(range)?;
    let digest = format!("{:x}", Sha256::digest(&datagram));

    let scratch = tempfile::tempdir()?;
    let osc_path = scratch.path().join(format!("{}.osc", digest));
    std::fs::write(&osc_path, &datagram)?;

    let args = build_command(config, session, &osc_path, input, output);
    log::info!(target: "nrt::render", "rendering {} bytes of OSC to {}", datagram.len(), output.display());
    log::debug!(target: "nrt::render", "{}", args.join(" "));

    let result = Command::new(&args[0]).args(&args[1..]).output()?;
    let stdout = String::from_utf8_lossy(&result.stdout);
    for line in stdout.lines() {
        log::debug!(target: "nrt::render", "{}", line);
    }
    if !result.status.success() {
        log::warn!(
            target: "nrt::render",
            "{} exited with {:?}: {}",
            config.executable(),
            result.status.code(),
            String::from_utf8_lossy(&result.stderr).trim()
        );
    }

    Ok(RenderOutcome {
        exit_code: result.status.code(),
        success: result.status.success(),
        output: output.to_path_buf(),
    })
}
