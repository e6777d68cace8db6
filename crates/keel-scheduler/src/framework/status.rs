use std::collections::HashMap;
use std::fmt;

/// Outcome code of a plugin call, in ascending severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Code {
    /// The stage passed for this node or cycle
    #[default]
    Success,
    /// The node is rejected for this attempt; it may fit later (e.g. after preemption)
    Unschedulable,
    /// The node is rejected and no remedial action will help
    UnschedulableAndUnresolvable,
    /// The cycle must wait for an asynchronous permission check
    Wait,
    /// The plugin does not participate for this pod
    Skip,
    /// Plugin-internal or infrastructure fault
    Error,
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Code::Success => "Success",
            Code::Unschedulable => "Unschedulable",
            Code::UnschedulableAndUnresolvable => "UnschedulableAndUnresolvable",
            Code::Wait => "Wait",
            Code::Skip => "Skip",
            Code::Error => "Error",
        };
        f.write_str(s)
    }
}

/// Result of a plugin invocation
///
/// A default `Status` is `Success` with no reasons.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Status {
    code: Code,
    reasons: Vec<String>,
    plugin: Option<String>,
}

/// Per-node status of one cycle, keyed by node name
pub type NodeToStatusMap = HashMap<String, Status>;

impl Status {
    pub fn success() -> Self {
        Self::default()
    }

    /// Create a status with a single reason
    pub fn new(code: Code, reason: impl Into<String>) -> Self {
        Self {
            code,
            reasons: vec![reason.into()],
            plugin: None,
        }
    }

    /// Create a status carrying several reasons
    pub fn with_reasons(code: Code, reasons: Vec<String>) -> Self {
        Self {
            code,
            reasons,
            plugin: None,
        }
    }

    pub fn error(reason: impl Into<String>) -> Self {
        Self::new(Code::Error, reason)
    }

    pub fn skip() -> Self {
        Self {
            code: Code::Skip,
            ..Default::default()
        }
    }

    /// Wrap an error as an `Error` status
    pub fn as_error(err: impl fmt::Display) -> Self {
        Self::error(err.to_string())
    }

    /// Attribute this status to a plugin
    pub fn with_plugin(mut self, plugin: impl Into<String>) -> Self {
        self.plugin = Some(plugin.into());
        self
    }

    pub fn code(&self) -> Code {
        self.code
    }

    pub fn reasons(&self) -> &[String] {
        &self.reasons
    }

    /// Name of the plugin that produced the status, if attributed
    pub fn plugin(&self) -> Option<&str> {
        self.plugin.as_deref()
    }

    /// Reasons joined into one line
    pub fn message(&self) -> String {
        self.reasons.join(", ")
    }

    pub fn is_success(&self) -> bool {
        self.code == Code::Success
    }

    pub fn is_skip(&self) -> bool {
        self.code == Code::Skip
    }

    /// `Success` or `Skip`: the stage did not object
    pub fn is_passing(&self) -> bool {
        matches!(self.code, Code::Success | Code::Skip)
    }

    /// Whether the node was rejected by policy rather than by a fault
    pub fn is_rejected(&self) -> bool {
        matches!(
            self.code,
            Code::Unschedulable | Code::UnschedulableAndUnresolvable
        )
    }

    pub fn is_error(&self) -> bool {
        self.code == Code::Error
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.plugin {
            Some(plugin) => write!(f, "{} from {}: {}", self.code, plugin, self.message()),
            None => write!(f, "{}: {}", self.code, self.message()),
        }
    }
}
