use crate::model::step::{Role, Step};
use crate::model::STEPS_COUNT;

/// Holds the main sequence and the optional preview sequence.
///
/// The store is passive: it never decides which role is live, and every
/// mutation is visible to the very next scheduler read.
#[derive(Debug, Clone)]
pub struct SequenceStore {
    main: Vec<Step>,
    preview: Option<Vec<Step>>,
}

impl SequenceStore {
    pub fn new() -> Self {
        Self {
            main: vec![Step::default(); STEPS_COUNT],
            preview: None,
        }
    }

    pub fn steps(&self, role: Role) -> Option<&[Step]> {
        match role {
            Role::Main => Some(&self.main),
            Role::Preview => self.preview.as_deref(),
        }
    }

    fn steps_mut(&mut self, role: Role) -> Option<&mut Vec<Step>> {
        match role {
            Role::Main => Some(&mut self.main),
            Role::Preview => self.preview.as_mut(),
        }
    }

    /// Number of stored steps for `role`; zero when the preview is absent.
    pub fn len(&self, role: Role) -> usize {
        self.steps(role).map_or(0, |s| s.len())
    }

    pub fn has_preview(&self) -> bool {
        self.preview.is_some()
    }

    /// Returns `None` past the end of the stored sequence, which may be
    /// shorter than `STEPS_COUNT` for an externally supplied preview.
    pub fn get_step(&self, role: Role, index: usize) -> Option<Step> {
        self.steps(role).and_then(|s| s.get(index)).copied()
    }

    pub fn set_step(&mut self, role: Role, index: usize, step: Step) -> bool {
        match self.steps_mut(role).and_then(|s| s.get_mut(index)) {
            Some(slot) => {
                *slot = Step::new(step.transpose, step.enabled);
                true
            }
            None => false,
        }
    }

    pub fn update_step(&mut self, role: Role, index: usize, f: impl FnOnce(&mut Step)) -> bool {
        match self.get_step(role, index) {
            Some(mut step) => {
                f(&mut step);
                self.set_step(role, index, step)
            }
            None => false,
        }
    }

    pub fn swap(&mut self, role: Role, i: usize, j: usize) -> bool {
        match self.steps_mut(role) {
            Some(steps) if i < steps.len() && j < steps.len() => {
                steps.swap(i, j);
                true
            }
            _ => false,
        }
    }

    /// Replaces a whole sequence. The main sequence always keeps
    /// `STEPS_COUNT` slots; a preview keeps whatever length it was given,
    /// capped at `STEPS_COUNT`.
    pub fn replace_all(&mut self, role: Role, steps: Vec<Step>) {
        let mut steps: Vec<Step> = steps
            .into_iter()
            .take(STEPS_COUNT)
            .map(|s| Step::new(s.transpose, s.enabled))
            .collect();
        match role {
            Role::Main => {
                steps.resize(STEPS_COUNT, Step::default());
                self.main = steps;
            }
            Role::Preview => self.preview = Some(steps),
        }
    }

    pub fn clear_preview(&mut self) -> Option<Vec<Step>> {
        self.preview.take()
    }
}

impl Default for SequenceStore {
    fn default() -> Self {
        Self::new()
    }
}
