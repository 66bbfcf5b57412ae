//! End-to-end procedure runs: a chapter of steps pumped from the outside,
//! the way a host application drives the engine once per frame.

use anyhow::{Result, bail};
use procflow::entity::Entity;
use procflow::lifecycle::{ProcessFactories, Progress, StageProcess};
use procflow::step::{LockablePropertyReference, StepLockHandling, shared};
use procflow::{
    Condition, EntityNode, GraphError, Stage, Step, StepEntity, StepGroup, StepId, Transition,
};
use std::cell::Cell;
use std::rc::Rc;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Condition toggled from the outside, standing in for scene interaction.
struct Flag(Rc<Cell<bool>>);

impl Condition for Flag {
    fn is_satisfied(&self) -> bool {
        self.0.get()
    }

    fn complete(&mut self) {
        self.0.set(true);
    }
}

fn flag() -> Rc<Cell<bool>> {
    Rc::new(Cell::new(false))
}

fn flagged_transition(name: &str, flag: &Rc<Cell<bool>>, target: Option<StepId>) -> Transition {
    Transition::new(name, vec![Box::new(Flag(flag.clone()))], target)
}

fn pump(group: &mut StepGroup, ticks: usize) {
    for _ in 0..ticks {
        group.update();
    }
}

fn pump_until(group: &mut StepGroup, max: usize, done: impl Fn(&StepGroup) -> bool) {
    for _ in 0..max {
        if done(group) {
            return;
        }
        group.update();
    }
    panic!(
        "condition not reached within {max} ticks, group stage {:?}",
        group.stage()
    );
}

#[test]
fn test_linear_chapter_walks_all_steps_then_goes_active() {
    let (done_a, done_b, done_c) = (flag(), flag(), flag());

    let c = Step::new("put the tool back")
        .with_transition(flagged_transition("tool returned", &done_c, None));
    let b = Step::new("tighten the bolt")
        .with_transition(flagged_transition("bolt tight", &done_b, Some(c.id())));
    let a = Step::new("pick up the tool")
        .with_transition(flagged_transition("tool grabbed", &done_a, Some(b.id())));
    let (a_id, b_id, c_id) = (a.id(), b.id(), c.id());

    let (tx, rx) = mpsc::channel();
    let mut chapter = StepGroup::new("maintenance")
        .with_step(a)
        .with_step(b)
        .with_step(c);
    chapter.set_event_channel(tx);

    chapter.activate().unwrap();
    assert_eq!(chapter.stage(), Stage::Activating);

    // Nothing moves while the first step's condition is unmet.
    pump(&mut chapter, 6);
    assert_eq!(chapter.stage(), Stage::Activating);
    assert_eq!(chapter.data().current_step().unwrap().id(), a_id);

    done_a.set(true);
    pump_until(&mut chapter, 20, |g| {
        g.data().current_step().is_some_and(|s| s.id() == b_id)
    });

    done_b.set(true);
    pump_until(&mut chapter, 20, |g| {
        g.data().current_step().is_some_and(|s| s.id() == c_id)
    });

    done_c.set(true);
    pump_until(&mut chapter, 20, |g| g.stage() == Stage::Active);

    assert_eq!(chapter.data().exit_step(), Some(c_id));
    assert!(chapter.data().current_step().is_none());

    // The group itself only reports its own two stage changes.
    let stages: Vec<Stage> = rx.try_iter().map(|e| e.stage).collect();
    assert_eq!(stages, vec![Stage::Activating, Stage::Active]);
}

/// Records lock traffic so tests can assert boundary calls and their order.
#[derive(Default)]
struct RecordingLockHandling {
    calls: Arc<Mutex<Vec<String>>>,
}

impl StepLockHandling for RecordingLockHandling {
    fn unlock(&mut self, step_name: &str, _properties: &[LockablePropertyReference]) {
        self.calls.lock().unwrap().push(format!("unlock {step_name}"));
    }

    fn lock(&mut self, step_name: &str, _properties: &[LockablePropertyReference]) {
        self.calls.lock().unwrap().push(format!("lock {step_name}"));
    }
}

#[test]
fn test_abort_releases_locks_immediately_and_settles_inactive() {
    init_tracing();
    let handling = RecordingLockHandling::default();
    let calls = handling.calls.clone();

    let never = flag();
    let step = Step::new("hold the valve")
        .with_manual_unlock(LockablePropertyReference::new(Uuid::new_v4(), "grabbable"))
        .with_transition(flagged_transition("valve released", &never, None))
        .with_lock_handling(shared(handling));

    let mut chapter = StepGroup::new("emergency drill").with_step(step);
    chapter.activate().unwrap();
    pump_until(&mut chapter, 10, |g| {
        g.data().current_step().is_some_and(|s| s.stage() == Stage::Active)
    });
    assert_eq!(calls.lock().unwrap().as_slice(), ["unlock hold the valve"]);

    chapter.abort().unwrap();
    // The force-lock fires on aborting entry, before children settle.
    assert_eq!(
        calls.lock().unwrap().as_slice(),
        ["unlock hold the valve", "lock hold the valve"]
    );

    pump_until(&mut chapter, 10, |g| g.stage() == Stage::Inactive);
    assert!(chapter.data().steps().iter().all(|s| s.stage() == Stage::Inactive));
}

/// Behavior whose active sequence fails on its first tick.
struct ExplodingProcess;

impl StageProcess<()> for ExplodingProcess {
    fn start(&mut self, _data: &mut ()) -> Result<()> {
        Ok(())
    }

    fn update(&mut self, _data: &mut ()) -> Result<Progress> {
        bail!("referenced scene object was deleted")
    }

    fn end(&mut self, _data: &mut ()) -> Result<()> {
        Ok(())
    }

    fn fast_forward(&mut self, _data: &mut ()) -> Result<()> {
        Ok(())
    }
}

#[test]
fn test_failing_behavior_does_not_wedge_the_chapter() {
    init_tracing();
    let faulty: Box<dyn EntityNode> = Box::new(Entity::new(
        "play missing audio",
        (),
        ProcessFactories::default().with_active(|| Box::new(ExplodingProcess)),
    ));

    let done = flag();
    let step = Step::new("listen to the instructions")
        .with_behavior(faulty)
        .with_transition(flagged_transition("instructions heard", &done, None));

    let mut chapter = StepGroup::new("briefing").with_step(step);
    chapter.activate().unwrap();
    pump_until(&mut chapter, 10, |g| {
        g.data().current_step().is_some_and(|s| s.stage() == Stage::Active)
    });

    // The failure was contained inside the behavior; the step still runs.
    done.set(true);
    pump_until(&mut chapter, 20, |g| g.stage() == Stage::Active);
    assert!(chapter.data().current_step().is_none());
}

#[test]
fn test_fast_forward_skips_to_the_chapter_end() {
    let (done_a, done_b) = (flag(), flag());
    let b = Step::new("final check").with_transition(flagged_transition("checked", &done_b, None));
    let a = Step::new("long task")
        .with_transition(flagged_transition("task done", &done_a, Some(b.id())));
    let b_id = b.id();

    let mut chapter = StepGroup::new("shortcut").with_step(a).with_step(b);
    chapter.activate().unwrap();
    pump(&mut chapter, 4);
    assert_eq!(chapter.stage(), Stage::Activating);

    chapter.fast_forward().unwrap();
    pump(&mut chapter, 1);

    assert_eq!(chapter.stage(), Stage::Active);
    assert_eq!(chapter.data().exit_step(), Some(b_id));
    assert!(done_a.get());
    assert!(done_b.get());
    assert!(chapter.data().steps().iter().all(|s| s.stage() == Stage::Inactive));
}

#[test]
fn test_fast_forward_with_no_path_fails_without_changing_stage() {
    let first = Step::new("first");
    let second = Step::new("second").with_transition(Transition::to(first.id()));
    let first = first.with_transition(Transition::to(second.id()));

    let mut chapter = StepGroup::new("endless loop").with_step(first).with_step(second);
    chapter.activate().unwrap();
    pump(&mut chapter, 3);
    assert_eq!(chapter.stage(), Stage::Activating);

    let err = chapter.fast_forward().unwrap_err();
    assert!(matches!(err, GraphError::NoPathToEnd { .. }));
    assert_eq!(chapter.stage(), Stage::Activating);
}

#[test]
fn test_nested_group_runs_as_a_step() {
    let inner_done = flag();
    let inner_step = Step::new("inner task")
        .with_transition(flagged_transition("inner done", &inner_done, None));
    let inner_step_id = inner_step.id();

    let mut inner = StepGroup::new("sub-procedure").with_step(inner_step);

    let outer_done = flag();
    let closing = Step::new("closing step")
        .with_transition(flagged_transition("all done", &outer_done, None));
    let closing_id = closing.id();

    // Wire the inner group's dangling exit to the closing step.
    inner.set_linked_target(inner_step_id, Some(closing_id));
    let inner_id = inner.id();

    let mut outer = StepGroup::new("procedure").with_step(inner).with_step(closing);
    outer.activate().unwrap();

    // The nested group stays Activating while its own walk is underway.
    pump(&mut outer, 6);
    let current = outer.data().current_step().unwrap();
    assert_eq!(current.id(), inner_id);
    assert_eq!(current.stage(), Stage::Activating);

    inner_done.set(true);
    pump_until(&mut outer, 30, |g| {
        g.data().current_step().is_some_and(|s| s.id() == closing_id)
    });

    outer_done.set(true);
    pump_until(&mut outer, 20, |g| g.stage() == Stage::Active);
    assert_eq!(outer.data().exit_step(), Some(closing_id));
}
