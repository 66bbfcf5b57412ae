//! Per-entity lifecycle state machine.
//!
//! A `LifeCycle` owns the current [`Stage`] and the stage process currently
//! bound to it; the two only ever change together inside `change_stage`. The
//! machine is driven cooperatively: an external caller pumps `update` once per
//! engine tick and the machine advances the running process by one suspension
//! point.
//!
//! Failure policy: illegal operations (`activate` while Active and friends)
//! are caller bugs and surface as [`StateError`]. Anything a stage process
//! itself returns as `Err` is user-authored-content failure — it is logged
//! with the entity breadcrumb and swallowed, and the stage still finalizes so
//! one misbehaving leaf never wedges its ancestors.

use crate::errors::StateError;
use crate::lifecycle::process::{ProcessFactories, Progress, StageProcess};
use crate::lifecycle::stage::{FastForwardFlags, Stage, StageEvent};
use std::sync::mpsc;

/// The currently bound stage process and its sequence state.
struct Running<D> {
    process: Box<dyn StageProcess<D>>,
    finished: bool,
}

/// Per-entity state machine over the five lifecycle stages.
pub struct LifeCycle<D> {
    stage: Stage,
    running: Option<Running<D>>,
    factories: ProcessFactories<D>,
    fast_forwarded: FastForwardFlags,
    deactivate_after_activation: bool,
    event_tx: Option<mpsc::Sender<StageEvent>>,
    entity_name: String,
    parent_name: Option<String>,
}

impl<D> LifeCycle<D> {
    /// Create a lifecycle in `Inactive` with the given process factories.
    pub fn new(entity_name: &str, factories: ProcessFactories<D>) -> Self {
        Self {
            stage: Stage::Inactive,
            running: None,
            factories,
            fast_forwarded: FastForwardFlags::default(),
            deactivate_after_activation: false,
            event_tx: None,
            entity_name: entity_name.to_string(),
            parent_name: None,
        }
    }

    /// Set the channel stage-change events are delivered on.
    pub fn set_event_channel(&mut self, tx: mpsc::Sender<StageEvent>) {
        self.event_tx = Some(tx);
    }

    /// Set the ancestor name used in log breadcrumbs.
    pub fn set_parent_name(&mut self, parent: &str) {
        self.parent_name = Some(parent.to_string());
    }

    /// The current stage.
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Display name of the owning entity.
    pub fn entity_name(&self) -> &str {
        &self.entity_name
    }

    /// Begin activating. Only legal from `Inactive`.
    pub fn activate(&mut self, data: &mut D) -> Result<(), StateError> {
        if self.stage != Stage::Inactive {
            return Err(StateError::invalid(&self.entity_name, "activate", self.stage));
        }
        self.start_activating(data);
        Ok(())
    }

    /// Begin deactivating, or defer it until activation finishes.
    ///
    /// Legal from `Active` (immediate) and `Activating` (deferred: the entity
    /// still reaches `Active` at least momentarily before deactivation runs).
    pub fn deactivate(&mut self, data: &mut D) -> Result<(), StateError> {
        match self.stage {
            Stage::Activating => {
                self.deactivate_after_activation = true;
                Ok(())
            }
            Stage::Active => {
                self.start_deactivating(data);
                Ok(())
            }
            stage => Err(StateError::invalid(&self.entity_name, "deactivate", stage)),
        }
    }

    /// Begin aborting, bypassing the natural deactivation path.
    ///
    /// Legal from any stage except `Inactive` and `Aborting`. The previously
    /// running process is discarded without `end`.
    pub fn abort(&mut self, data: &mut D) -> Result<(), StateError> {
        if matches!(self.stage, Stage::Inactive | Stage::Aborting) {
            return Err(StateError::invalid(&self.entity_name, "abort", self.stage));
        }
        self.deactivate_after_activation = false;
        self.start_aborting(data);
        Ok(())
    }

    /// Advance the running process by one tick.
    ///
    /// No-op when there is no running process or its sequence already
    /// finished. A process `Err` is logged and the sequence treated as
    /// finished; the stage finalizes either way.
    pub fn update(&mut self, data: &mut D) {
        let Some(running) = self.running.as_mut() else {
            return;
        };
        if running.finished {
            return;
        }
        match running.process.update(data) {
            Ok(Progress::Pending) => {}
            Ok(Progress::Done) => {
                running.finished = true;
                self.finish_current_stage(data);
            }
            Err(err) => {
                running.finished = true;
                tracing::warn!(
                    entity = %self.breadcrumb(),
                    stage = ?self.stage,
                    "stage process update failed: {err:#}"
                );
                self.finish_current_stage(data);
            }
        }
    }

    /// Request "skip to the end of the whole activity" from any stage.
    ///
    /// Marks Deactivating, Active and Activating, in that order; whichever of
    /// them is current fast-forwards immediately.
    pub fn mark_to_fast_forward(&mut self, data: &mut D) {
        self.mark_to_fast_forward_stage(Stage::Deactivating, data);
        self.mark_to_fast_forward_stage(Stage::Active, data);
        self.mark_to_fast_forward_stage(Stage::Activating, data);
    }

    /// Mark exactly one stage to fast-forward when reached.
    ///
    /// Fast-forwards immediately when the marked stage is current. Marking
    /// `Inactive` is silently ignored.
    pub fn mark_to_fast_forward_stage(&mut self, stage: Stage, data: &mut D) {
        if stage == Stage::Inactive {
            return;
        }
        self.fast_forwarded.mark(stage);
        if self.stage == stage {
            self.fast_forward(data);
        }
    }

    /// Force the current stage to its terminal state.
    ///
    /// No-op when the running sequence already finished; repeated calls from
    /// nested fast-forward propagation never double-fire `end`.
    fn fast_forward(&mut self, data: &mut D) {
        let Some(running) = self.running.as_mut() else {
            return;
        };
        if running.finished {
            return;
        }
        let result = running.process.fast_forward(data);
        running.finished = true;
        if let Err(err) = result {
            tracing::warn!(
                entity = %self.breadcrumb(),
                stage = ?self.stage,
                "stage process fast-forward failed: {err:#}"
            );
        }
        self.finish_current_stage(data);
    }

    /// Finalize the current stage: `end` the process, clear this stage's
    /// fast-forward flag and take the deterministic next transition.
    fn finish_current_stage(&mut self, data: &mut D) {
        let Some(mut running) = self.running.take() else {
            return;
        };
        if let Err(err) = running.process.end(data) {
            tracing::warn!(
                entity = %self.breadcrumb(),
                stage = ?self.stage,
                "stage process end failed: {err:#}"
            );
        }
        self.fast_forwarded.clear(self.stage);
        match self.stage {
            Stage::Activating => self.start_active(data),
            Stage::Deactivating | Stage::Aborting => self.start_inactive(data),
            Stage::Active | Stage::Inactive => {}
        }
    }

    fn start_activating(&mut self, data: &mut D) {
        self.change_stage(data, Stage::Activating, true);
        if self.fast_forwarded.is_marked(Stage::Activating) {
            self.fast_forward(data);
        }
    }

    fn start_active(&mut self, data: &mut D) {
        self.change_stage(data, Stage::Active, true);
        if self.fast_forwarded.is_marked(Stage::Active) {
            self.fast_forward(data);
        }
        if self.deactivate_after_activation {
            self.deactivate_after_activation = false;
            self.start_deactivating(data);
        }
    }

    fn start_deactivating(&mut self, data: &mut D) {
        self.change_stage(data, Stage::Deactivating, true);
        if self.fast_forwarded.is_marked(Stage::Deactivating) {
            self.fast_forward(data);
        }
    }

    fn start_aborting(&mut self, data: &mut D) {
        self.change_stage(data, Stage::Aborting, false);
        if self.fast_forwarded.is_marked(Stage::Aborting) {
            self.fast_forward(data);
        }
    }

    fn start_inactive(&mut self, data: &mut D) {
        self.change_stage(data, Stage::Inactive, true);
    }

    /// Switch to `stage` and bind its fresh process.
    ///
    /// With `fast_forward_previous`, an unfinished process of the stage being
    /// left is fast-forwarded first so no stage is ever skipped silently.
    /// Aborting passes `false`: it jumps straight to its own process.
    fn change_stage(&mut self, data: &mut D, stage: Stage, fast_forward_previous: bool) {
        if fast_forward_previous {
            self.fast_forward(data);
        }
        self.stage = stage;
        let process = match stage {
            Stage::Inactive => None,
            Stage::Activating => Some((self.factories.activating)()),
            Stage::Active => Some((self.factories.active)()),
            Stage::Deactivating => Some((self.factories.deactivating)()),
            Stage::Aborting => Some((self.factories.aborting)()),
        };
        self.running = process.map(|mut process| {
            if let Err(err) = process.start(data) {
                tracing::warn!(
                    entity = %self.breadcrumb(),
                    stage = ?stage,
                    "stage process start failed: {err:#}"
                );
            }
            Running {
                process,
                finished: false,
            }
        });
        self.emit(StageEvent {
            entity: self.entity_name.clone(),
            stage,
        });
    }

    fn emit(&self, event: StageEvent) {
        if let Some(tx) = &self.event_tx {
            tx.send(event).ok();
        }
    }

    fn breadcrumb(&self) -> String {
        match &self.parent_name {
            Some(parent) => format!("{parent} / {}", self.entity_name),
            None => self.entity_name.clone(),
        }
    }
}
