//! Single-step controller
//!
//! Decides, for the task at the head of the queue, whether the debugger
//! stops on it or lets it run through. It never reorders the queue.

use serde::{Deserialize, Serialize};

use crate::application::queue::QueueTask;
use crate::domain::flow_state::FlowStateTree;

/// Stepping granularity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SingleStepMode {
    /// Stop inside sub-flow calls
    StepInto,
    /// Treat sub-flow calls as one step
    StepOver,
    /// Run until the current flow call returns
    StepOut,
}

/// What to do with the next task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepDecision {
    /// Run the task without handing control to the user
    Skip,
    /// Stop and surface the task
    Stop,
}

/// Step state of a session
#[derive(Debug, Clone, Default)]
pub struct SingleStepController {
    mode: Option<SingleStepMode>,
    focus_task: Option<QueueTask>,
    last_skipped: Option<QueueTask>,
}

impl SingleStepController {
    /// Create an idle controller
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a step from `focus`
    pub fn arm(&mut self, mode: SingleStepMode, focus: Option<QueueTask>) {
        self.mode = Some(mode);
        self.focus_task = focus;
        self.last_skipped = None;
    }

    /// Forget the current step
    pub fn clear(&mut self) {
        self.mode = None;
        self.focus_task = None;
        self.last_skipped = None;
    }

    /// Active step mode
    #[inline]
    pub fn mode(&self) -> Option<SingleStepMode> {
        self.mode
    }

    /// Task the current step started from, or last stopped at
    #[inline]
    pub fn focus_task(&self) -> Option<&QueueTask> {
        self.focus_task.as_ref()
    }

    /// Task most recently run through
    #[inline]
    pub fn last_skipped(&self) -> Option<&QueueTask> {
        self.last_skipped.as_ref()
    }

    /// Decide whether to run `next` through
    pub fn decide(&mut self, next: &QueueTask, tree: &FlowStateTree) -> StepDecision {
        let (Some(mode), Some(focus)) = (self.mode, self.focus_task.as_ref()) else {
            return StepDecision::Stop;
        };

        if next.id == focus.id || self.last_skipped.as_ref().map(|t| t.id) == Some(next.id) {
            return StepDecision::Stop;
        }

        // A step target that has finished (or been collected) is stale
        let focus_flow_state = match tree.get(&focus.flow_state) {
            Some(fs) if !fs.is_finished() => fs,
            _ => {
                self.focus_task = None;
                self.last_skipped = None;
                return StepDecision::Stop;
            }
        };

        let same_or_parent = next.flow_state == focus_flow_state.id
            || focus_flow_state.parent.as_ref() == Some(&next.flow_state);

        let skip = match mode {
            SingleStepMode::StepOver => !same_or_parent,
            SingleStepMode::StepInto => {
                !same_or_parent && tree.parent_of(&next.flow_state) != Some(&focus_flow_state.id)
            }
            SingleStepMode::StepOut => true,
        };

        if skip {
            self.last_skipped = Some(next.clone());
            StepDecision::Skip
        } else {
            self.focus_task = Some(next.clone());
            StepDecision::Stop
        }
    }
}
