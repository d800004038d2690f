use core::fmt;

/// Scroll axis direction, relative to dataset order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Direction {
    /// Towards lower indexes (up/left).
    Backward,
    /// Towards higher indexes (down/right).
    Forward,
}

/// Workflow pipeline stages.
///
/// A cycle runs `scroll → fetch → render → clip → adapt → end`; `end` either returns to
/// `scroll` (idle) or loops straight into another `fetch`. `reload` may interrupt any stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Process {
    Init,
    Reload,
    Scroll,
    Fetch,
    Render,
    Clip,
    Adapt,
    End,
}

impl fmt::Display for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Init => "init",
            Self::Reload => "reload",
            Self::Scroll => "scroll",
            Self::Fetch => "fetch",
            Self::Render => "render",
            Self::Clip => "clip",
            Self::Adapt => "adapt",
            Self::End => "end",
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ProcessStatus {
    Next,
    Error,
    Done,
}

/// An event on the workflow's internal signal bus: `process` finished with `status`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProcessSubject {
    pub process: Process,
    pub status: ProcessStatus,
}

impl ProcessSubject {
    pub fn next(process: Process) -> Self {
        Self {
            process,
            status: ProcessStatus::Next,
        }
    }

    pub fn error(process: Process) -> Self {
        Self {
            process,
            status: ProcessStatus::Error,
        }
    }

    pub fn done(process: Process) -> Self {
        Self {
            process,
            status: ProcessStatus::Done,
        }
    }
}

/// Identifies one workflow cycle. Completions carrying an older id are stale and discarded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CycleId(pub u64);

impl CycleId {
    pub(crate) fn bump(&mut self) -> Self {
        self.0 = self.0.wrapping_add(1);
        *self
    }
}
