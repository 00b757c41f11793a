//! Version information and build metadata display

use std::fmt;

use roleplay_audio::{INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE};

use crate::config::DEFAULT_MODEL;
use crate::scenario::VOICES;

/// Version and build details of the roleplay client
pub struct VersionInfo {
    /// Package version from Cargo.toml
    pub version: &'static str,
    /// Target triple (e.g., x86_64-unknown-linux-gnu)
    pub target: &'static str,
    /// Build profile (debug or release)
    pub profile: &'static str,
    /// Git commit hash (if available)
    pub git_commit: Option<&'static str>,
    pub build_timestamp: &'static str,
}

impl VersionInfo {
    pub fn current() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION"),
            target: env!("TARGET"),
            profile: if cfg!(debug_assertions) {
                "debug"
            } else {
                "release"
            },
            git_commit: option_env!("GIT_COMMIT_HASH"),
            build_timestamp: env!("BUILD_TIMESTAMP"),
        }
    }
}

impl fmt::Display for VersionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "roleplay {}", self.version)?;
        writeln!(f)?;

        writeln!(f, "Build Information:")?;
        writeln!(f, "  Target:       {}", self.target)?;
        writeln!(f, "  Profile:      {}", self.profile)?;
        writeln!(f, "  Build Date:   {}", self.build_timestamp)?;

        if let Some(commit) = self.git_commit {
            writeln!(f, "  Git Commit:   {}", commit)?;
        }

        writeln!(f)?;
        writeln!(f, "Audio:")?;
        writeln!(f, "  Microphone:   {} Hz mono PCM16", INPUT_SAMPLE_RATE)?;
        writeln!(f, "  Playback:     {} Hz mono PCM16", OUTPUT_SAMPLE_RATE)?;

        writeln!(f)?;
        writeln!(f, "Default model: {}", DEFAULT_MODEL)?;
        writeln!(f, "Voices:        {}", VOICES.join(", "))?;

        Ok(())
    }
}

/// Short version string (for --version)
pub fn version_short() -> String {
    format!("roleplay {}", env!("CARGO_PKG_VERSION"))
}

/// Long version string (for the `version` subcommand)
pub fn version_long() -> String {
    VersionInfo::current().to_string()
}
