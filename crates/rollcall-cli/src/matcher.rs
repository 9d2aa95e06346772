//! Face matcher backed by an external program.
//!
//! The program is invoked as `<command...> <image> <gallery_dir>` and must
//! print a JSON array on stdout, closest match first:
//!
//! ```json
//! [{"identity": "known_faces/Areeba/front.jpg", "distance": 0.28}]
//! ```
//!
//! `identity` may be a bare label or a reference sample path; `distance`
//! is optional. A non-zero exit status means the matcher is unavailable.

use rollcall_core::{FaceMatcher, MatchCandidate, MatcherError};
use serde::Deserialize;
use std::path::Path;
use std::process::Command;

#[derive(Debug, Deserialize)]
struct ReportedMatch {
    identity: String,
    #[serde(default)]
    distance: Option<f32>,
}

pub struct CommandMatcher {
    program: String,
    args: Vec<String>,
}

impl CommandMatcher {
    /// `None` when `command` is empty.
    pub fn new(command: &[String]) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

impl FaceMatcher for CommandMatcher {
    fn find(&self, image: &Path, gallery_dir: &Path) -> Result<Vec<MatchCandidate>, MatcherError> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(image)
            .arg(gallery_dir)
            .output()
            .map_err(|e| MatcherError::Unavailable(format!("failed to run {}: {e}", self.program)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(MatcherError::DetectionFailed(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        parse_matches(&output.stdout)
    }
}

fn parse_matches(stdout: &[u8]) -> Result<Vec<MatchCandidate>, MatcherError> {
    let text = std::str::from_utf8(stdout)
        .map_err(|e| MatcherError::Unavailable(format!("matcher output is not UTF-8: {e}")))?;
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    let reported: Vec<ReportedMatch> = serde_json::from_str(text)
        .map_err(|e| MatcherError::Unavailable(format!("unreadable matcher output: {e}")))?;
    Ok(reported
        .into_iter()
        .map(|m| MatchCandidate::from_sample(&m.identity, m.distance))
        .collect())
}

/// Stand-in used when no matcher command is configured.
pub struct NoMatcher;

impl FaceMatcher for NoMatcher {
    fn find(&self, _image: &Path, _gallery_dir: &Path) -> Result<Vec<MatchCandidate>, MatcherError> {
        Err(MatcherError::Unavailable("no matcher_command configured".into()))
    }
}

/// Matcher for the configured command, or [`NoMatcher`].
pub fn from_command(command: &[String]) -> Box<dyn FaceMatcher + Send> {
    match CommandMatcher::new(command) {
        Some(m) => Box::new(m),
        None => {
            tracing::warn!("no matcher_command configured; face matching disabled");
            Box::new(NoMatcher)
        }
    }
}
