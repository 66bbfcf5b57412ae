//! The unit of work an entity performs while occupying a stage.
//!
//! A `StageProcess` is created fresh every time its entity enters a stage and
//! discarded when the stage ends. Its `update` is a resumable sequence pumped
//! one suspension point per engine tick; nothing in it may block.

use anyhow::Result;

/// Result of pumping a stage process by one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// The sequence has more suspension points; pump again next tick.
    Pending,
    /// The sequence completed naturally; the stage can finalize.
    Done,
}

/// The work bound to one entity occupying one stage.
///
/// `fast_forward` must leave the external state (scene objects, timers) where
/// `end` would eventually see it; `end` always runs afterwards in the same
/// finalize path and owns any completion bookkeeping.
pub trait StageProcess<D> {
    /// Runs once, synchronously, at stage entry.
    fn start(&mut self, data: &mut D) -> Result<()>;

    /// Advances the resumable sequence by exactly one suspension point.
    fn update(&mut self, data: &mut D) -> Result<Progress>;

    /// Runs once when the sequence completes, naturally or fast-forwarded.
    fn end(&mut self, data: &mut D) -> Result<()>;

    /// Forces external state to its terminal value without waiting for the
    /// natural completion condition.
    fn fast_forward(&mut self, data: &mut D) -> Result<()>;
}

/// A process that does nothing and completes on its first tick.
///
/// Default for every stage an entity does not override.
#[derive(Debug, Default)]
pub struct EmptyProcess;

impl<D> StageProcess<D> for EmptyProcess {
    fn start(&mut self, _data: &mut D) -> Result<()> {
        Ok(())
    }

    fn update(&mut self, _data: &mut D) -> Result<Progress> {
        Ok(Progress::Done)
    }

    fn end(&mut self, _data: &mut D) -> Result<()> {
        Ok(())
    }

    fn fast_forward(&mut self, _data: &mut D) -> Result<()> {
        Ok(())
    }
}

/// Runs several stage processes as if they were one.
///
/// All members are started together; each tick pumps every unfinished member
/// and the composite completes once all members have completed. `end` and
/// `fast_forward` fan out to every member, `fast_forward` only to those still
/// unfinished.
pub struct CompositeProcess<D> {
    members: Vec<Member<D>>,
}

struct Member<D> {
    process: Box<dyn StageProcess<D>>,
    finished: bool,
}

impl<D> CompositeProcess<D> {
    /// Create a composite over the given members.
    pub fn new(processes: Vec<Box<dyn StageProcess<D>>>) -> Self {
        Self {
            members: processes
                .into_iter()
                .map(|process| Member {
                    process,
                    finished: false,
                })
                .collect(),
        }
    }
}

impl<D> StageProcess<D> for CompositeProcess<D> {
    fn start(&mut self, data: &mut D) -> Result<()> {
        for member in &mut self.members {
            member.process.start(data)?;
        }
        Ok(())
    }

    fn update(&mut self, data: &mut D) -> Result<Progress> {
        for member in &mut self.members {
            if member.finished {
                continue;
            }
            if member.process.update(data)? == Progress::Done {
                member.finished = true;
            }
        }
        if self.members.iter().all(|m| m.finished) {
            Ok(Progress::Done)
        } else {
            Ok(Progress::Pending)
        }
    }

    fn end(&mut self, data: &mut D) -> Result<()> {
        for member in &mut self.members {
            member.process.end(data)?;
        }
        Ok(())
    }

    fn fast_forward(&mut self, data: &mut D) -> Result<()> {
        for member in &mut self.members {
            if !member.finished {
                member.process.fast_forward(data)?;
                member.finished = true;
            }
        }
        Ok(())
    }
}

/// Factory closures producing the process for each transient stage.
///
/// Owned by the `LifeCycle` and fixed at construction; every stage entry
/// instantiates a fresh process through these. Stages without an override run
/// an `EmptyProcess`.
pub struct ProcessFactories<D> {
    pub activating: Factory<D>,
    pub active: Factory<D>,
    pub deactivating: Factory<D>,
    pub aborting: Factory<D>,
}

/// A boxed factory for one stage's process.
pub type Factory<D> = Box<dyn Fn() -> Box<dyn StageProcess<D>>>;

impl<D: 'static> Default for ProcessFactories<D> {
    fn default() -> Self {
        Self {
            activating: Box::new(|| Box::new(EmptyProcess)),
            active: Box::new(|| Box::new(EmptyProcess)),
            deactivating: Box::new(|| Box::new(EmptyProcess)),
            aborting: Box::new(|| Box::new(EmptyProcess)),
        }
    }
}

impl<D: 'static> ProcessFactories<D> {
    /// Replace the activating-stage factory.
    pub fn with_activating(
        mut self,
        factory: impl Fn() -> Box<dyn StageProcess<D>> + 'static,
    ) -> Self {
        self.activating = Box::new(factory);
        self
    }

    /// Replace the active-stage factory.
    pub fn with_active(
        mut self,
        factory: impl Fn() -> Box<dyn StageProcess<D>> + 'static,
    ) -> Self {
        self.active = Box::new(factory);
        self
    }

    /// Replace the deactivating-stage factory.
    pub fn with_deactivating(
        mut self,
        factory: impl Fn() -> Box<dyn StageProcess<D>> + 'static,
    ) -> Self {
        self.deactivating = Box::new(factory);
        self
    }

    /// Replace the aborting-stage factory.
    pub fn with_aborting(
        mut self,
        factory: impl Fn() -> Box<dyn StageProcess<D>> + 'static,
    ) -> Self {
        self.aborting = Box::new(factory);
        self
    }
}
