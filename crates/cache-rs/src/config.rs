//! Engine configuration threaded through every entry point.

/// How much progress output the engine emits.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd)]
pub enum Verbosity {
    Silent,
    #[default]
    Normal,
    Verbose,
}

/// Settings for a single tool invocation.
///
/// Writing is off by default: every mutating operation computes its result but only
/// touches the device when `write_enabled` is set.
#[derive(Copy, Clone, Debug, Default)]
pub struct ToolConfig {
    pub write_enabled: bool,
    pub verbosity: Verbosity,
}

impl ToolConfig {
    #[must_use]
    pub const fn read_only() -> Self {
        Self {
            write_enabled: false,
            verbosity: Verbosity::Normal,
        }
    }

    #[must_use]
    pub const fn writable() -> Self {
        Self {
            write_enabled: true,
            verbosity: Verbosity::Normal,
        }
    }
}
