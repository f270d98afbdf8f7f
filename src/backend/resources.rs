// Device-dependent resource tracking
//
// Some objects are only valid for one presentation target: depth buffers and
// framebuffers are sized to the swapchain, render passes use its format, and
// pipelines reference the render pass. When the swapchain is replaced these
// objects must be destroyed and rebuilt in dependency order.
//
// The tracker records resources in registration order, which doubles as the
// dependency order: a resource may read anything registered before it while
// it is being created, never anything after it.

use anyhow::{Context, Result};
use std::any::Any;
use std::fmt;
use std::marker::PhantomData;

/// Object-safe access to `Any` for tracked resources.
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A resource whose native handles are tied to a context `C` that can be
/// replaced at runtime.
///
/// `create` must leave nothing behind when it fails; `destroy` is only ever
/// called after a successful `create`.
pub trait DeviceResource<C: 'static>: AsAny {
    fn create(&mut self, ctx: &C, prior: &Prior<'_, C>) -> Result<()>;

    fn destroy(&mut self, ctx: &C);

    fn label(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Typed handle returned by [`ResourceTracker::register`].
pub struct ResourceId<R> {
    index: usize,
    _marker: PhantomData<fn() -> R>,
}

impl<R> ResourceId<R> {
    fn new(index: usize) -> Self {
        Self {
            index,
            _marker: PhantomData,
        }
    }
}

impl<R> Clone for ResourceId<R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<R> Copy for ResourceId<R> {}

impl<R> fmt::Debug for ResourceId<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResourceId({})", self.index)
    }
}

struct Entry<C: 'static> {
    resource: Box<dyn DeviceResource<C>>,
    live: bool,
}

impl<C: 'static> Entry<C> {
    fn downcast<R: DeviceResource<C>>(&self) -> Option<&R> {
        if !self.live {
            return None;
        }
        AsAny::as_any(&*self.resource).downcast_ref::<R>()
    }
}

/// Read-only view of the resources registered before the one being created.
pub struct Prior<'a, C: 'static> {
    entries: &'a [Entry<C>],
}

impl<'a, C: 'static> Prior<'a, C> {
    pub fn get<R: DeviceResource<C>>(&self, id: ResourceId<R>) -> Option<&'a R> {
        self.entries.get(id.index).and_then(|entry| entry.downcast())
    }

    /// Like [`Prior::get`], but a missing dependency is an error.
    pub fn require<R: DeviceResource<C>>(&self, id: ResourceId<R>) -> Result<&'a R> {
        self.get(id).with_context(|| {
            format!(
                "{} (#{}) is not available",
                std::any::type_name::<R>(),
                id.index
            )
        })
    }
}

pub struct ResourceTracker<C: 'static> {
    entries: Vec<Entry<C>>,
    generation: u64,
}

impl<C: 'static> Default for ResourceTracker<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: 'static> ResourceTracker<C> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            generation: 0,
        }
    }

    /// Create `resource` against `ctx` and start tracking it.
    pub fn register<R: DeviceResource<C>>(&mut self, ctx: &C, mut resource: R) -> Result<ResourceId<R>> {
        let prior = Prior {
            entries: &self.entries,
        };
        resource
            .create(ctx, &prior)
            .with_context(|| format!("Failed to create {}", resource.label()))?;

        log::debug!("Tracking {} as #{}", resource.label(), self.entries.len());

        self.entries.push(Entry {
            resource: Box::new(resource),
            live: true,
        });
        Ok(ResourceId::new(self.entries.len() - 1))
    }

    pub fn get<R: DeviceResource<C>>(&self, id: ResourceId<R>) -> Option<&R> {
        self.entries.get(id.index).and_then(|entry| entry.downcast())
    }

    pub fn is_live<R>(&self, id: ResourceId<R>) -> bool {
        self.entries.get(id.index).is_some_and(|entry| entry.live)
    }

    /// Number of completed full replays.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Destroy every live resource (newest first) and create them all again
    /// (oldest first) against `ctx`.
    pub fn recreate_all(&mut self, ctx: &C) -> Result<()> {
        self.replay(ctx, 0)?;
        self.generation += 1;
        log::debug!(
            "Recreated {} device resources (generation {})",
            self.entries.len(),
            self.generation
        );
        Ok(())
    }

    /// Replay `id` and everything registered after it.
    pub fn recreate_from<R>(&mut self, ctx: &C, id: ResourceId<R>) -> Result<()> {
        self.replay(ctx, id.index)
    }

    /// Update a live resource in place, then replay everything registered
    /// after it.
    ///
    /// `update` must leave the resource as it was when it fails. In that case
    /// nothing else is touched and the resource stays live, so a failed
    /// rebuild keeps the working version.
    pub fn update<R, F>(&mut self, ctx: &C, id: ResourceId<R>, update: F) -> Result<()>
    where
        R: DeviceResource<C>,
        F: FnOnce(&mut R, &C, &Prior<'_, C>) -> Result<()>,
    {
        let type_name = std::any::type_name::<R>();
        if !self.is_live(id) {
            anyhow::bail!("{} (#{}) is not live", type_name, id.index);
        }

        let (prior, rest) = self.entries.split_at_mut(id.index);
        let prior = Prior { entries: &*prior };
        let resource = AsAny::as_any_mut(&mut *rest[0].resource)
            .downcast_mut::<R>()
            .with_context(|| format!("#{} is not a {}", id.index, type_name))?;

        let label = resource.label();
        update(resource, ctx, &prior).with_context(|| format!("Failed to update {}", label))?;

        self.replay(ctx, id.index + 1)
    }

    /// Destroy all live resources, newest first. Entries stay registered and
    /// can be brought back with [`ResourceTracker::recreate_all`].
    pub fn destroy_all(&mut self, ctx: &C) {
        Self::destroy_range(&mut self.entries, ctx);
    }

    fn replay(&mut self, ctx: &C, start: usize) -> Result<()> {
        if start >= self.entries.len() {
            return Ok(());
        }

        Self::destroy_range(&mut self.entries[start..], ctx);

        for index in start..self.entries.len() {
            let (prior, rest) = self.entries.split_at_mut(index);
            let entry = &mut rest[0];
            let prior = Prior { entries: &*prior };

            entry
                .resource
                .create(ctx, &prior)
                .with_context(|| format!("Failed to recreate {}", entry.resource.label()))?;
            entry.live = true;
        }

        Ok(())
    }

    fn destroy_range(entries: &mut [Entry<C>], ctx: &C) {
        for entry in entries.iter_mut().rev().filter(|entry| entry.live) {
            entry.resource.destroy(ctx);
            entry.live = false;
        }
    }
}

impl<C: 'static> Drop for ResourceTracker<C> {
    fn drop(&mut self) {
        let live = self.entries.iter().filter(|entry| entry.live).count();
        if live > 0 {
            log::warn!("Resource tracker dropped with {} live resources", live);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};

    #[derive(Default)]
    struct TestContext {
        extent: Cell<u32>,
        fail_on: Cell<Option<&'static str>>,
        log: RefCell<Vec<String>>,
    }

    impl TestContext {
        fn take_log(&self) -> Vec<String> {
            self.log.take()
        }
    }

    struct Target {
        name: &'static str,
        size: Option<u32>,
    }

    impl Target {
        fn new(name: &'static str) -> Self {
            Self { name, size: None }
        }
    }

    impl DeviceResource<TestContext> for Target {
        fn create(&mut self, ctx: &TestContext, _prior: &Prior<'_, TestContext>) -> Result<()> {
            if ctx.fail_on.get() == Some(self.name) {
                anyhow::bail!("{} refused", self.name);
            }
            self.size = Some(ctx.extent.get());
            ctx.log.borrow_mut().push(format!("create {}", self.name));
            Ok(())
        }

        fn destroy(&mut self, ctx: &TestContext) {
            self.size = None;
            ctx.log.borrow_mut().push(format!("destroy {}", self.name));
        }
    }

    struct Dependent {
        base: ResourceId<Target>,
        seen: Option<u32>,
    }

    impl DeviceResource<TestContext> for Dependent {
        fn create(&mut self, ctx: &TestContext, prior: &Prior<'_, TestContext>) -> Result<()> {
            let base = prior.require(self.base)?;
            self.seen = base.size;
            ctx.log.borrow_mut().push("create dependent".to_string());
            Ok(())
        }

        fn destroy(&mut self, ctx: &TestContext) {
            self.seen = None;
            ctx.log.borrow_mut().push("destroy dependent".to_string());
        }
    }

    fn context(extent: u32) -> TestContext {
        let ctx = TestContext::default();
        ctx.extent.set(extent);
        ctx
    }

    #[test]
    fn register_creates_immediately_and_returns_typed_handle() {
        let ctx = context(640);
        let mut tracker = ResourceTracker::new();

        let depth = tracker.register(&ctx, Target::new("depth")).unwrap();
        assert_eq!(tracker.get(depth).unwrap().size, Some(640));
        assert_eq!(tracker.entries.len(), 1);
        assert_eq!(ctx.take_log(), ["create depth"]);

        tracker.destroy_all(&ctx);
    }

    #[test]
    fn dependents_read_earlier_resources() {
        let ctx = context(800);
        let mut tracker = ResourceTracker::new();

        let base = tracker.register(&ctx, Target::new("render pass")).unwrap();
        let dependent = tracker.register(&ctx, Dependent { base, seen: None }).unwrap();
        assert_eq!(tracker.get(dependent).unwrap().seen, Some(800));

        tracker.destroy_all(&ctx);
    }

    #[test]
    fn recreate_all_replays_in_dependency_order() {
        let ctx = context(100);
        let mut tracker = ResourceTracker::new();
        let a = tracker.register(&ctx, Target::new("a")).unwrap();
        tracker.register(&ctx, Target::new("b")).unwrap();
        let c = tracker.register(&ctx, Dependent { base: a, seen: None }).unwrap();
        ctx.take_log();

        ctx.extent.set(200);
        tracker.recreate_all(&ctx).unwrap();

        assert_eq!(
            ctx.take_log(),
            [
                "destroy dependent",
                "destroy b",
                "destroy a",
                "create a",
                "create b",
                "create dependent"
            ]
        );
        assert_eq!(tracker.get(c).unwrap().seen, Some(200));
        assert_eq!(tracker.generation(), 1);

        tracker.destroy_all(&ctx);
    }

    #[test]
    fn recreate_from_only_touches_the_suffix() {
        let ctx = context(1);
        let mut tracker = ResourceTracker::new();
        let first = tracker.register(&ctx, Target::new("first")).unwrap();
        let second = tracker.register(&ctx, Target::new("second")).unwrap();
        tracker.register(&ctx, Target::new("third")).unwrap();
        ctx.take_log();

        ctx.extent.set(2);
        tracker.recreate_from(&ctx, second).unwrap();

        assert_eq!(
            ctx.take_log(),
            ["destroy third", "destroy second", "create second", "create third"]
        );
        assert_eq!(tracker.get(first).unwrap().size, Some(1));
        assert_eq!(tracker.get(second).unwrap().size, Some(2));
        assert_eq!(tracker.generation(), 0);

        tracker.destroy_all(&ctx);
    }

    #[test]
    fn failed_replay_leaves_only_earlier_entries_live() {
        let ctx = context(10);
        let mut tracker = ResourceTracker::new();
        let a = tracker.register(&ctx, Target::new("a")).unwrap();
        let b = tracker.register(&ctx, Target::new("b")).unwrap();
        let c = tracker.register(&ctx, Target::new("c")).unwrap();
        ctx.take_log();

        ctx.fail_on.set(Some("b"));
        let err = tracker.recreate_all(&ctx).unwrap_err();
        assert!(format!("{:#}", err).contains("b refused"));
        assert!(tracker.is_live(a));
        assert!(!tracker.is_live(b));
        assert!(!tracker.is_live(c));
        assert!(tracker.get(b).is_none());
        assert_eq!(tracker.generation(), 0);
        ctx.take_log();

        ctx.fail_on.set(None);
        tracker.recreate_all(&ctx).unwrap();
        assert_eq!(
            ctx.take_log(),
            ["destroy a", "create a", "create b", "create c"]
        );

        tracker.destroy_all(&ctx);
    }

    #[test]
    fn failed_registration_is_not_tracked() {
        let ctx = context(3);
        ctx.fail_on.set(Some("broken"));
        let mut tracker = ResourceTracker::new();

        assert!(tracker.register(&ctx, Target::new("broken")).is_err());
        assert!(tracker.entries.is_empty());
    }

    #[test]
    fn missing_dependency_fails_creation() {
        let ctx = context(5);
        let mut tracker = ResourceTracker::new();
        let base = tracker.register(&ctx, Target::new("base")).unwrap();
        tracker.destroy_all(&ctx);

        let err = tracker
            .register(&ctx, Dependent { base, seen: None })
            .unwrap_err();
        assert!(format!("{:#}", err).contains("not available"));
    }

    #[test]
    fn destroy_all_is_idempotent() {
        let ctx = context(7);
        let mut tracker = ResourceTracker::new();
        tracker.register(&ctx, Target::new("x")).unwrap();
        tracker.register(&ctx, Target::new("y")).unwrap();
        ctx.take_log();

        tracker.destroy_all(&ctx);
        tracker.destroy_all(&ctx);
        assert_eq!(ctx.take_log(), ["destroy y", "destroy x"]);
    }

    #[test]
    fn failed_recreate_from_keeps_the_prefix_live() {
        let ctx = context(1);
        let mut tracker = ResourceTracker::new();
        let a = tracker.register(&ctx, Target::new("a")).unwrap();
        let b = tracker.register(&ctx, Target::new("b")).unwrap();
        let c = tracker.register(&ctx, Target::new("c")).unwrap();
        let d = tracker.register(&ctx, Target::new("d")).unwrap();
        ctx.take_log();

        ctx.extent.set(2);
        ctx.fail_on.set(Some("c"));
        let err = tracker.recreate_from(&ctx, b).unwrap_err();
        assert!(format!("{:#}", err).contains("c refused"));

        assert!(tracker.is_live(a));
        assert_eq!(tracker.get(a).unwrap().size, Some(1));
        // b was rebuilt before c failed
        assert!(tracker.is_live(b));
        assert_eq!(tracker.get(b).unwrap().size, Some(2));
        assert!(!tracker.is_live(c));
        assert!(!tracker.is_live(d));
        assert_eq!(
            ctx.take_log(),
            ["destroy d", "destroy c", "destroy b", "create b"]
        );

        tracker.destroy_all(&ctx);
    }

    #[test]
    fn failed_recreate_from_at_the_first_entry_leaves_nothing_after_it_live() {
        let ctx = context(1);
        let mut tracker = ResourceTracker::new();
        let a = tracker.register(&ctx, Target::new("a")).unwrap();
        let b = tracker.register(&ctx, Target::new("b")).unwrap();
        let c = tracker.register(&ctx, Target::new("c")).unwrap();

        ctx.fail_on.set(Some("b"));
        assert!(tracker.recreate_from(&ctx, b).is_err());
        assert!(tracker.is_live(a));
        assert!(!tracker.is_live(b));
        assert!(!tracker.is_live(c));

        tracker.destroy_all(&ctx);
    }

    #[test]
    fn generation_only_counts_completed_full_replays() {
        let ctx = context(1);
        let mut tracker = ResourceTracker::new();
        tracker.register(&ctx, Target::new("a")).unwrap();
        let b = tracker.register(&ctx, Target::new("b")).unwrap();

        ctx.fail_on.set(Some("b"));
        assert!(tracker.recreate_from(&ctx, b).is_err());
        assert_eq!(tracker.generation(), 0);

        ctx.fail_on.set(None);
        tracker.recreate_from(&ctx, b).unwrap();
        assert_eq!(tracker.generation(), 0);

        tracker.recreate_all(&ctx).unwrap();
        assert_eq!(tracker.generation(), 1);

        tracker.destroy_all(&ctx);
    }

    #[test]
    fn failed_update_keeps_the_current_resource() {
        let ctx = context(4);
        let mut tracker = ResourceTracker::new();
        let pass = tracker.register(&ctx, Target::new("pass")).unwrap();
        let pipeline = tracker.register(&ctx, Target::new("pipeline")).unwrap();
        ctx.take_log();

        let err = tracker
            .update(&ctx, pipeline, |_, _, _| anyhow::bail!("link error"))
            .unwrap_err();
        assert!(format!("{:#}", err).contains("link error"));

        assert!(tracker.is_live(pass));
        assert!(tracker.is_live(pipeline));
        assert_eq!(tracker.get(pipeline).unwrap().size, Some(4));
        assert!(ctx.take_log().is_empty());

        tracker.destroy_all(&ctx);
    }

    #[test]
    fn update_swaps_in_place_and_replays_later_entries() {
        let ctx = context(4);
        let mut tracker = ResourceTracker::new();
        let base = tracker.register(&ctx, Target::new("base")).unwrap();
        let middle = tracker.register(&ctx, Target::new("middle")).unwrap();
        let dependent = tracker.register(&ctx, Dependent { base: middle, seen: None }).unwrap();
        ctx.take_log();

        tracker
            .update(&ctx, middle, |target, _, prior| {
                let base_size = prior.require(base)?.size.unwrap_or(0);
                target.size = Some(base_size * 10);
                Ok(())
            })
            .unwrap();

        assert_eq!(tracker.get(middle).unwrap().size, Some(40));
        assert_eq!(tracker.get(dependent).unwrap().seen, Some(40));
        assert_eq!(ctx.take_log(), ["destroy dependent", "create dependent"]);

        tracker.destroy_all(&ctx);
    }

    #[test]
    fn update_requires_a_live_resource() {
        let ctx = context(9);
        let mut tracker = ResourceTracker::new();
        let id = tracker.register(&ctx, Target::new("x")).unwrap();
        tracker.destroy_all(&ctx);

        let err = tracker.update(&ctx, id, |_, _, _| Ok(())).unwrap_err();
        assert!(format!("{:#}", err).contains("not live"));
    }
}
