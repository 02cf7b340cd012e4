use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;

use super::*;

static TRACING: Lazy<()> = Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
});

fn traced() {
    Lazy::force(&TRACING);
}

// -- shared test types ----------------------------------------------------

#[derive(AutoInit, Debug)]
struct Point {
    x: i64,
    y: i64,
    #[auto_init(skip)]
    label: Option<String>,
}

#[derive(AutoInit, Debug)]
struct Point3d {
    #[auto_init(flatten)]
    point: Point,
    z: i64,
}

#[derive(AutoInit, Debug)]
struct Line {
    start: Point,
    end: Point,
}

#[derive(AutoInit, Debug)]
struct Node {
    label: String,
    parent: Option<Box<Node>>,
}

#[derive(AutoInit, Debug)]
struct Parent {
    child: Option<Box<Child>>,
}

#[derive(AutoInit, Debug)]
struct Child {
    parent: Option<Box<Parent>>,
}

#[derive(AutoInit, Debug)]
#[auto_init(singleton)]
struct Hub;

trait Timer {
    fn tick(&self) -> u64;
}

#[derive(AutoInit, Debug)]
struct StoppedTimer;

impl Timer for StoppedTimer {
    fn tick(&self) -> u64 {
        0
    }
}

crate::bind_instance!(dyn Timer => StoppedTimer);

// -- creation basics ------------------------------------------------------

#[test]
fn scalars_resolve_to_their_zero_defaults() -> Result<(), InitError> {
    traced();
    assert_eq!(get_instance::<i64>()?, 0);
    assert_eq!(get_instance::<f64>()?, 0.0);
    assert_eq!(get_instance::<String>()?, "");
    assert!(!get_instance::<bool>()?);
    Ok(())
}

#[test]
fn containers_resolve_empty_regardless_of_their_element_types() -> Result<(), InitError> {
    assert!(get_instance::<Vec<Point>>()?.is_empty());
    assert!(get_instance::<HashMap<String, Point>>()?.is_empty());
    assert!(get_instance::<std::collections::HashSet<u32>>()?.is_empty());
    Ok(())
}

#[test]
fn declared_attributes_get_their_neutral_defaults() -> Result<(), InitError> {
    let p: Point = get_instance()?;
    assert_eq!(p.x, 0);
    assert_eq!(p.y, 0);
    assert_eq!(p.label, None);
    Ok(())
}

#[test]
fn nested_attributes_are_populated() -> Result<(), InitError> {
    let line: Line = get_instance()?;
    assert_eq!(line.start, Point::builder().build()?);
    assert_eq!(line.end.y, 0);
    Ok(())
}

#[test]
fn repeated_resolution_yields_distinct_instances() -> Result<(), InitError> {
    let a: Arc<Point> = get_instance()?;
    let b: Arc<Point> = get_instance()?;
    assert!(!Arc::ptr_eq(&a, &b));
    assert_eq!(*a, *b);
    Ok(())
}

// -- resolution records ---------------------------------------------------

#[test]
fn scalars_produce_no_resolution_record() -> Result<(), InitError> {
    let (value, record) = create_instance::<i64>()?;
    assert_eq!(value, 0);
    assert!(record.is_none());
    Ok(())
}

#[test]
fn records_capture_the_dependency_tree() -> Result<(), InitError> {
    let (parent, record) = create_instance::<Parent>()?;
    let record = record.expect("a constructed type yields a record");
    assert!(record.type_name().ends_with("Parent"));
    assert!(record.is_complete());
    assert_eq!(record.dependencies().len(), 1);
    assert!(record.dependencies()[0].type_name().ends_with("Child"));
    assert!(parent.child.is_some());
    Ok(())
}

#[test]
fn provider_output_produces_no_resolution_record() -> Result<(), InitError> {
    let ctx = InitContext::new();
    ctx.register_factory::<Point, _>(|| Point {
        x: 9,
        y: 9,
        label: None,
    });
    let (point, record) = ctx.create_instance::<Point>()?;
    assert_eq!(point.x, 9);
    assert!(record.is_none());
    Ok(())
}

// -- cycles ---------------------------------------------------------------

#[test]
fn self_reference_terminates_immediately() -> Result<(), InitError> {
    traced();
    let node: Node = get_instance()?;
    assert_eq!(node.label, "");
    assert!(node.parent.is_none());
    Ok(())
}

#[test]
fn mutual_cycle_settles_one_level_past_detection() -> Result<(), InitError> {
    let parent: Parent = get_instance()?;
    let child = parent.child.expect("the peer is live");
    assert!(child.parent.is_none());

    let child: Child = get_instance()?;
    let parent = child.parent.expect("the peer is live");
    assert!(parent.child.is_none());
    Ok(())
}

#[test]
fn sibling_attributes_of_the_same_type_are_both_live() -> Result<(), InitError> {
    #[derive(AutoInit, Debug)]
    struct Fork {
        first: Option<Box<Node>>,
        second: Option<Box<Node>>,
    }

    let fork: Fork = get_instance()?;
    assert!(fork.first.is_some());
    assert!(fork.second.is_some());
    Ok(())
}

#[test]
fn pending_set_drains_after_cyclic_resolution() -> Result<(), InitError> {
    let mut resolver = crate::resolve::Resolver::new();
    let _: Parent = resolver.resolve()?;
    assert!(resolver.pending_is_empty());
    let _: Node = resolver.resolve()?;
    assert!(resolver.pending_is_empty());
    Ok(())
}

#[test]
fn cycle_through_an_owned_reference_fails_explicitly() {
    #[derive(AutoInit, Debug)]
    #[auto_init(repr = false, eq = false)]
    struct Looper {
        next: Box<Looper>,
    }

    let err = get_instance::<Looper>().unwrap_err();
    assert!(matches!(err, InitError::Cycle(_)));
    assert!(err.to_string().contains("cycle detected"));
}

// -- contexts and scoped providers ----------------------------------------

#[test]
fn scoped_provider_round_trip() -> Result<(), InitError> {
    let ctx = InitContext::new();
    ctx.register_factory::<i64, _>(|| 7);

    assert_eq!(get_instance::<i64>()?, 0);
    {
        let _scope = ctx.enter();
        assert_eq!(get_instance::<i64>()?, 7);
        let p: Point = get_instance()?;
        assert_eq!((p.x, p.y), (7, 7));
    }
    assert_eq!(get_instance::<i64>()?, 0);
    Ok(())
}

#[test]
fn provider_is_used_for_attributes_and_plain_instances() -> Result<(), InitError> {
    let ctx = InitContext::new();
    ctx.register_factory::<Point, _>(|| Point {
        x: 9,
        y: 9,
        label: None,
    });

    assert_eq!(get_instance::<Point>()?.x, 0);
    assert_eq!(get_instance::<Line>()?.start.x, 0);
    {
        let _scope = ctx.enter();
        assert_eq!(get_instance::<Point>()?.x, 9);
        let line: Line = get_instance()?;
        assert_eq!(line.start.x, 9);
        assert_eq!(line.end.x, 9);
    }
    assert_eq!(get_instance::<Point>()?.x, 0);
    assert_eq!(get_instance::<Line>()?.start.x, 0);
    Ok(())
}

#[test]
fn only_the_top_of_the_stack_is_consulted() -> Result<(), InitError> {
    let outer = InitContext::new();
    outer.register_factory::<i64, _>(|| 7);
    let inner = InitContext::new();

    let _outer_scope = outer.enter();
    assert_eq!(get_instance::<i64>()?, 7);
    {
        let _inner_scope = inner.enter();
        // No merging across frames: the inner scope has no provider.
        assert_eq!(get_instance::<i64>()?, 0);
    }
    assert_eq!(get_instance::<i64>()?, 7);
    Ok(())
}

#[test]
fn contexts_are_usable_without_entering() -> Result<(), InitError> {
    let ctx = InitContext::new();
    ctx.register_factory::<i64, _>(|| 3);
    assert_eq!(ctx.get_instance::<i64>()?, 3);
    // The temporary scope is gone again.
    assert_eq!(get_instance::<i64>()?, 0);
    Ok(())
}

#[test]
fn get_instance_or_prefers_the_provider() -> Result<(), InitError> {
    let ctx = InitContext::new();
    assert_eq!(ctx.get_instance_or::<i64>(42)?, 42);
    ctx.register_factory::<i64, _>(|| 7);
    assert_eq!(ctx.get_instance_or::<i64>(42)?, 7);
    Ok(())
}

#[test]
#[should_panic(expected = "reverse order")]
fn exiting_out_of_order_is_a_fatal_assertion() {
    let first = InitContext::new();
    let second = InitContext::new();
    let first_scope = first.enter();
    let _second_scope = second.enter();
    drop(first_scope);
}

// -- singletons -----------------------------------------------------------

#[test]
fn pinned_types_are_cached_per_context() -> Result<(), InitError> {
    traced();
    let a: Arc<Hub> = get_instance()?;
    let b: Arc<Hub> = get_instance()?;
    assert!(Arc::ptr_eq(&a, &b));
    Ok(())
}

#[test]
fn singleton_caches_are_isolated_per_context() -> Result<(), InitError> {
    let s00: Arc<Hub> = get_instance()?;

    let ctx1 = InitContext::new();
    let ctx2 = InitContext::new();

    let s10 = {
        let _scope = ctx1.enter();
        let s10: Arc<Hub> = get_instance()?;
        let s11: Arc<Hub> = get_instance()?;
        assert!(!Arc::ptr_eq(&s10, &s00));
        assert!(Arc::ptr_eq(&s10, &s11));
        s10
    };

    let s20 = {
        let _scope = ctx2.enter();
        let s20: Arc<Hub> = get_instance()?;
        let s21: Arc<Hub> = get_instance()?;
        assert!(Arc::ptr_eq(&s20, &s21));
        s20
    };

    assert!(!Arc::ptr_eq(&s20, &s10));
    // The base context still holds its own instance.
    let s01: Arc<Hub> = get_instance()?;
    assert!(Arc::ptr_eq(&s00, &s01));
    Ok(())
}

#[test]
fn any_type_can_be_registered_as_a_singleton() -> Result<(), InitError> {
    let ctx = InitContext::new();
    let _scope = ctx.enter();

    let a: Arc<Point> = get_instance()?;
    let b: Arc<Point> = get_instance()?;
    assert!(!Arc::ptr_eq(&a, &b));

    ctx.register_singleton::<Arc<Point>>();
    assert!(!ctx.has_singleton::<Arc<Point>>());
    let c: Arc<Point> = get_instance()?;
    let d: Arc<Point> = get_instance()?;
    assert!(!Arc::ptr_eq(&c, &a));
    assert!(Arc::ptr_eq(&c, &d));
    assert!(ctx.has_singleton::<Arc<Point>>());
    assert!(Arc::ptr_eq(&ctx.get_singleton::<Arc<Point>>().unwrap(), &c));
    Ok(())
}

#[test]
fn singleton_factories_feed_the_cache_once() -> Result<(), InitError> {
    let ctx = InitContext::new();
    ctx.register_singleton_with::<Arc<Point>, _>(|| {
        Arc::new(Point {
            x: 5,
            y: 5,
            label: None,
        })
    });
    let _scope = ctx.enter();

    let a: Arc<Point> = get_instance()?;
    let b: Arc<Point> = get_instance()?;
    assert_eq!(a.x, 5);
    assert!(Arc::ptr_eq(&a, &b));
    Ok(())
}

#[test]
fn singleton_cache_hits_produce_no_resolution_record() -> Result<(), InitError> {
    let ctx = InitContext::new();
    let (_, first) = ctx.create_instance::<Arc<Hub>>()?;
    assert!(first.is_some());
    let (_, second) = ctx.create_instance::<Arc<Hub>>()?;
    assert!(second.is_none());
    Ok(())
}

#[test]
fn registered_instances_are_shared_verbatim() -> Result<(), InitError> {
    #[derive(AutoInit)]
    #[auto_init(repr = false, eq = false)]
    struct Consumer {
        log: Option<Arc<String>>,
    }

    let log = Arc::new(String::from("shared"));
    let ctx = InitContext::new();
    ctx.register_instance::<Arc<String>>(log.clone());
    let _scope = ctx.enter();

    let a: Consumer = get_instance()?;
    let b: Consumer = get_instance()?;
    assert!(Arc::ptr_eq(a.log.as_ref().unwrap(), b.log.as_ref().unwrap()));
    assert!(Arc::ptr_eq(a.log.as_ref().unwrap(), &log));
    Ok(())
}

// -- the model/view/presenter wiring --------------------------------------

#[derive(AutoInit, Debug)]
#[auto_init(singleton)]
struct AppModel;

#[derive(AutoInit, Debug)]
struct AppView {
    model: Option<Arc<AppModel>>,
}

#[derive(AutoInit, Debug)]
struct AppPresenter {
    model: Option<Arc<AppModel>>,
}

#[derive(AutoInit, Debug)]
struct App {
    model: Option<Arc<AppModel>>,
    view: AppView,
    presenter: AppPresenter,
}

#[test]
fn one_model_is_shared_across_the_whole_graph() -> Result<(), InitError> {
    let ctx = InitContext::new();
    let _scope = ctx.enter();

    let app: App = get_instance()?;
    let model = app.model.as_ref().unwrap();
    assert!(Arc::ptr_eq(model, app.view.model.as_ref().unwrap()));
    assert!(Arc::ptr_eq(model, app.presenter.model.as_ref().unwrap()));
    Ok(())
}

#[test]
fn an_explicit_none_provider_suppresses_the_singleton() -> Result<(), InitError> {
    let ctx = InitContext::new();
    ctx.register_instance::<Option<Arc<AppModel>>>(None);

    {
        let _scope = ctx.enter();
        assert!(get_instance::<Option<Arc<AppModel>>>()?.is_none());
        let app: App = get_instance()?;
        assert!(app.model.is_none());
        assert!(app.view.model.is_none());
    }

    // Reverts once the provider goes out of scope.
    let app: App = get_instance()?;
    assert!(app.model.is_some());
    Ok(())
}

// -- interface bindings ---------------------------------------------------

#[allow(ambiguous_wide_pointer_comparisons)]
#[test]
fn bound_interfaces_resolve_fresh_instances() -> Result<(), InitError> {
    let a: Arc<dyn Timer> = get_instance()?;
    let b: Arc<dyn Timer> = get_instance()?;
    assert_eq!(a.tick(), 0);
    assert!(!Arc::ptr_eq(&a, &b));
    Ok(())
}

#[test]
fn bound_interfaces_honour_explicit_providers() -> Result<(), InitError> {
    struct FastTimer;
    impl Timer for FastTimer {
        fn tick(&self) -> u64 {
            1
        }
    }

    let ctx = InitContext::new();
    ctx.register_factory::<Arc<dyn Timer>, _>(|| Arc::new(FastTimer));
    let _scope = ctx.enter();

    let timer: Arc<dyn Timer> = get_instance()?;
    assert_eq!(timer.tick(), 1);
    Ok(())
}

trait Bus {
    fn name(&self) -> &'static str;
}

#[derive(AutoInit, Debug)]
struct MemoryBus;

impl Bus for MemoryBus {
    fn name(&self) -> &'static str {
        "memory"
    }
}

crate::bind_singleton!(dyn Bus => MemoryBus);

#[allow(ambiguous_wide_pointer_comparisons)]
#[test]
fn bound_singletons_are_cached_per_context() -> Result<(), InitError> {
    let a: Arc<dyn Bus> = get_instance()?;
    let b: Arc<dyn Bus> = get_instance()?;
    assert!(Arc::ptr_eq(&a, &b));

    let ctx = InitContext::new();
    let _scope = ctx.enter();
    let c: Arc<dyn Bus> = get_instance()?;
    assert!(!Arc::ptr_eq(&a, &c));
    assert_eq!(c.name(), "memory");
    Ok(())
}

// -- declaration layer ----------------------------------------------------

#[test]
fn builder_consumes_supplied_values() -> Result<(), InitError> {
    let p = Point::builder().x(1).y(2).build()?;
    assert_eq!((p.x, p.y), (1, 2));
    assert_eq!(p.label, None);
    assert_eq!(p.to_string(), "<Point x=1, y=2>");
    Ok(())
}

#[test]
fn skipped_fields_stay_settable_through_the_builder() -> Result<(), InitError> {
    let p = Point::builder().label(Some(String::from("origin"))).build()?;
    assert_eq!(p.label.as_deref(), Some("origin"));
    // Not a declared attribute: absent from the textual form.
    assert_eq!(p.to_string(), "<Point x=0, y=0>");
    Ok(())
}

#[test]
fn attribute_equality_and_distinct_builds() -> Result<(), InitError> {
    assert_eq!(Point::builder().build()?, get_instance::<Point>()?);
    assert_ne!(Point::builder().x(1).build()?, Point::builder().build()?);
    Ok(())
}

#[test]
fn flattened_base_attributes_come_first() -> Result<(), InitError> {
    let names: Vec<&str> = Point3d::attrs().iter().map(|a| a.name).collect();
    assert_eq!(names, ["x", "y", "z"]);

    let p = Point3d::builder()
        .point(Point::builder().x(1).build()?)
        .z(3)
        .build()?;
    assert_eq!((p.point.x, p.point.y, p.z), (1, 0, 3));
    assert_eq!(p.to_string(), "<Point3d x=1, y=0, z=3>");
    Ok(())
}

#[test]
fn schema_reflects_the_syntactic_classification() {
    #[derive(AutoInit, Debug)]
    struct Selection {
        items: Vec<Point>,
        tags: HashMap<String, String>,
        hook: Option<fn() -> u64>,
    }

    let kinds: Vec<AttrKind> = Selection::attrs().iter().map(|a| a.kind).collect();
    assert_eq!(kinds, [AttrKind::List, AttrKind::Map, AttrKind::Nullable]);

    let selection: Selection = get_instance().unwrap();
    assert!(selection.items.is_empty());
    assert!(selection.tags.is_empty());
    // Don't initialise what you don't know how to initialise.
    assert!(selection.hook.is_none());
}

#[test]
fn container_attributes_use_their_exact_registered_factory() -> Result<(), InitError> {
    #[derive(AutoInit, Debug)]
    struct Inventory {
        by_name: HashMap<String, i64>,
        spare: Vec<i64>,
    }

    let ctx = InitContext::new();
    ctx.register_factory::<HashMap<String, i64>, _>(|| {
        HashMap::from([(String::from("seed"), 1)])
    });
    let _scope = ctx.enter();

    let inventory: Inventory = get_instance()?;
    assert_eq!(inventory.by_name.len(), 1);
    // Only the exact declared type is overridden.
    assert!(inventory.spare.is_empty());
    Ok(())
}

#[test]
fn a_provider_for_the_type_wins_over_builder_arguments() -> Result<(), InitError> {
    let ctx = InitContext::new();
    ctx.register_factory::<Point, _>(|| Point {
        x: 9,
        y: 9,
        label: None,
    });
    let _scope = ctx.enter();

    let p = Point::builder().x(1).build()?;
    assert_eq!((p.x, p.y), (9, 9));
    Ok(())
}

#[test]
fn declared_defaults_yield_to_explicit_providers() -> Result<(), InitError> {
    #[derive(AutoInit, Debug)]
    struct Db {
        #[auto_init(default = String::from("root"))]
        username: String,
        connection: Option<Connection>,
    }

    let db: Db = get_instance()?;
    assert_eq!(db.username, "root");
    assert!(db.connection.is_some());

    let ctx = InitContext::new();
    ctx.register_instance::<String>(String::new());
    {
        let _scope = ctx.enter();
        let db: Db = get_instance()?;
        assert_eq!(db.username, "");
    }
    let db: Db = get_instance()?;
    assert_eq!(db.username, "root");
    Ok(())
}

#[derive(AutoInit, Debug)]
struct Connection;

// -- in-place population --------------------------------------------------

#[derive(AutoInit)]
#[auto_init(repr = false, eq = false)]
struct RunLoop {
    first_sleep: i64,
    sleep: i64,
    #[auto_init(default)]
    max_iterations: Option<i64>,
    timer: Option<Arc<dyn Timer>>,
}

#[test]
fn init_instance_populates_unset_attributes() -> Result<(), InitError> {
    let mut run_loop = RunLoop {
        first_sleep: 0,
        sleep: 5,
        max_iterations: None,
        timer: None,
    };
    let ctx = InitContext::new();
    ctx.init_instance(&mut run_loop)?;

    assert_eq!(run_loop.first_sleep, 0);
    assert_eq!(run_loop.sleep, 5);
    assert!(run_loop.max_iterations.is_none());
    assert_eq!(run_loop.timer.unwrap().tick(), 0);
    Ok(())
}

#[test]
fn init_instance_respects_providers() -> Result<(), InitError> {
    struct FastTimer;
    impl Timer for FastTimer {
        fn tick(&self) -> u64 {
            1
        }
    }

    let ctx = InitContext::new();
    ctx.register_factory::<i64, _>(|| 3);
    ctx.register_factory::<Arc<dyn Timer>, _>(|| Arc::new(FastTimer));

    let mut run_loop = RunLoop {
        first_sleep: 0,
        sleep: 5,
        max_iterations: None,
        timer: None,
    };
    ctx.init_instance(&mut run_loop)?;

    assert_eq!(run_loop.first_sleep, 3);
    assert_eq!(run_loop.sleep, 5);
    assert_eq!(run_loop.timer.unwrap().tick(), 1);
    Ok(())
}

#[test]
fn init_instance_recurses_into_plain_custom_attributes() -> Result<(), InitError> {
    let mut line = Line {
        start: Point {
            x: 4,
            y: 0,
            label: None,
        },
        end: Point::builder().build()?,
    };
    let ctx = InitContext::new();
    ctx.register_factory::<i64, _>(|| 8);
    ctx.init_instance(&mut line)?;

    // Set attributes survive; neutral ones resolve through the provider.
    assert_eq!(line.start.x, 4);
    assert_eq!(line.start.y, 8);
    assert_eq!(line.end.x, 8);
    Ok(())
}

// -- explicit-only contexts -----------------------------------------------

#[test]
fn explicit_only_resolves_to_neutral_absence() -> Result<(), InitError> {
    let ctx = InitContext::explicit_only();
    assert!(ctx.is_explicit_only());
    let _scope = ctx.enter();

    assert!(get_instance::<Option<Arc<AppModel>>>()?.is_none());
    assert_eq!(get_instance::<i64>()?, 0);
    assert!(get_instance::<Vec<Point>>()?.is_empty());
    Ok(())
}

#[test]
fn explicit_only_still_honours_providers() -> Result<(), InitError> {
    let ctx = InitContext::explicit_only();
    ctx.register_factory::<i64, _>(|| 7);
    let _scope = ctx.enter();

    assert_eq!(get_instance::<i64>()?, 7);
    Ok(())
}

#[test]
fn shared_references_have_no_neutral_absence() {
    let ctx = InitContext::explicit_only();
    let _scope = ctx.enter();

    let err = get_instance::<Arc<Point>>().unwrap_err();
    assert!(matches!(err, InitError::NotProvided(_)));
}

#[test]
fn registered_types_construct_inside_explicit_only() -> Result<(), InitError> {
    #[derive(AutoInit, Debug)]
    struct Db {
        connection: Option<Connection>,
    }

    {
        let ctx = InitContext::explicit_only();
        ctx.register_type::<Db>();
        let _scope = ctx.enter();
        let db: Db = get_instance()?;
        // Nothing opted the connection in.
        assert!(db.connection.is_none());
    }
    {
        let ctx = InitContext::new();
        ctx.register_type::<Db>();
        let _scope = ctx.enter();
        let db: Db = get_instance()?;
        assert!(db.connection.is_some());
    }
    Ok(())
}
