use serde::{Deserialize, Serialize};

/// One slot of a sequence: a pitch offset from the base note and a mute flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub transpose: i32,
    pub enabled: bool,
}

impl Step {
    pub const MIN_TRANSPOSE: i32 = -12;
    pub const MAX_TRANSPOSE: i32 = 12;

    pub fn new(transpose: i32, enabled: bool) -> Self {
        Self {
            transpose: clamp_transpose(transpose),
            enabled,
        }
    }

    pub fn rest(transpose: i32) -> Self {
        Self::new(transpose, false)
    }
}

impl Default for Step {
    fn default() -> Self {
        Self { transpose: 0, enabled: true }
    }
}

pub fn clamp_transpose(transpose: i32) -> i32 {
    transpose.clamp(Step::MIN_TRANSPOSE, Step::MAX_TRANSPOSE)
}

/// Which of the two stored sequences an operation addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Main,
    Preview,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Main => "main",
            Role::Preview => "preview",
        }
    }
}

/// Formats a transpose with an explicit sign (`+3`, `0`, `-5`).
pub fn format_transpose(transpose: i32) -> String {
    if transpose >= 0 {
        format!("+{}", transpose)
    } else {
        transpose.to_string()
    }
}
