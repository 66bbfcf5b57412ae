//! Stage processes that fold one lifecycle transition over child entities.
//!
//! The folds only issue lifecycle commands and watch stages converge; the
//! children themselves are ticked by the owning entity's update propagation,
//! not by the fold.

use crate::entity::node::EntityNode;
use crate::lifecycle::{Progress, Stage, StageProcess};
use anyhow::Result;

/// Borrows every child relevant to a fold out of the owning data.
pub type ChildAccessor<D> = Box<dyn for<'a> Fn(&'a mut D) -> Vec<&'a mut dyn EntityNode>>;

/// Activates all children and completes once every child is `Active`.
pub struct FoldedActivatingProcess<D> {
    children: ChildAccessor<D>,
}

impl<D> FoldedActivatingProcess<D> {
    pub fn new(children: ChildAccessor<D>) -> Self {
        Self { children }
    }
}

impl<D> StageProcess<D> for FoldedActivatingProcess<D> {
    fn start(&mut self, data: &mut D) -> Result<()> {
        for child in (self.children)(data) {
            if child.stage() == Stage::Inactive {
                child.activate()?;
            }
        }
        Ok(())
    }

    fn update(&mut self, data: &mut D) -> Result<Progress> {
        let all_active = (self.children)(data)
            .iter()
            .all(|child| child.stage() == Stage::Active);
        Ok(if all_active {
            Progress::Done
        } else {
            Progress::Pending
        })
    }

    fn end(&mut self, _data: &mut D) -> Result<()> {
        Ok(())
    }

    fn fast_forward(&mut self, data: &mut D) -> Result<()> {
        for child in (self.children)(data) {
            child.mark_to_fast_forward_stage(Stage::Activating);
        }
        Ok(())
    }
}

/// Holds children through the parent's `Active` stage.
///
/// Completes on its first tick so a sibling wait process stays the sole
/// natural exit; children keep running through entity update propagation.
/// On fast-forward it marks every child's Active stage so time-based child
/// processes are forced to their terminal value.
pub struct FoldedActiveProcess<D> {
    children: ChildAccessor<D>,
}

impl<D> FoldedActiveProcess<D> {
    pub fn new(children: ChildAccessor<D>) -> Self {
        Self { children }
    }
}

impl<D> StageProcess<D> for FoldedActiveProcess<D> {
    fn start(&mut self, _data: &mut D) -> Result<()> {
        Ok(())
    }

    fn update(&mut self, _data: &mut D) -> Result<Progress> {
        Ok(Progress::Done)
    }

    fn end(&mut self, _data: &mut D) -> Result<()> {
        Ok(())
    }

    fn fast_forward(&mut self, data: &mut D) -> Result<()> {
        for child in (self.children)(data) {
            child.mark_to_fast_forward_stage(Stage::Active);
        }
        Ok(())
    }
}

/// Deactivates all children and completes once every child is `Inactive`.
pub struct FoldedDeactivatingProcess<D> {
    children: ChildAccessor<D>,
}

impl<D> FoldedDeactivatingProcess<D> {
    pub fn new(children: ChildAccessor<D>) -> Self {
        Self { children }
    }
}

impl<D> StageProcess<D> for FoldedDeactivatingProcess<D> {
    fn start(&mut self, data: &mut D) -> Result<()> {
        for child in (self.children)(data) {
            // Activating children defer their deactivation until Active.
            if matches!(child.stage(), Stage::Active | Stage::Activating) {
                child.deactivate()?;
            }
        }
        Ok(())
    }

    fn update(&mut self, data: &mut D) -> Result<Progress> {
        let all_inactive = (self.children)(data)
            .iter()
            .all(|child| child.stage() == Stage::Inactive);
        Ok(if all_inactive {
            Progress::Done
        } else {
            Progress::Pending
        })
    }

    fn end(&mut self, _data: &mut D) -> Result<()> {
        Ok(())
    }

    fn fast_forward(&mut self, data: &mut D) -> Result<()> {
        for child in (self.children)(data) {
            if child.stage() != Stage::Inactive {
                child.mark_to_fast_forward();
            }
        }
        Ok(())
    }
}

/// Aborts all children in parallel and completes once every child is
/// `Inactive`.
pub struct ParallelAbortProcess<D> {
    children: ChildAccessor<D>,
}

impl<D> ParallelAbortProcess<D> {
    pub fn new(children: ChildAccessor<D>) -> Self {
        Self { children }
    }
}

impl<D> StageProcess<D> for ParallelAbortProcess<D> {
    fn start(&mut self, data: &mut D) -> Result<()> {
        for child in (self.children)(data) {
            if !matches!(child.stage(), Stage::Inactive | Stage::Aborting) {
                child.abort()?;
            }
        }
        Ok(())
    }

    fn update(&mut self, data: &mut D) -> Result<Progress> {
        let all_inactive = (self.children)(data)
            .iter()
            .all(|child| child.stage() == Stage::Inactive);
        Ok(if all_inactive {
            Progress::Done
        } else {
            Progress::Pending
        })
    }

    fn end(&mut self, _data: &mut D) -> Result<()> {
        Ok(())
    }

    fn fast_forward(&mut self, data: &mut D) -> Result<()> {
        for child in (self.children)(data) {
            if child.stage() == Stage::Aborting {
                child.mark_to_fast_forward_stage(Stage::Aborting);
            }
        }
        Ok(())
    }
}
