//! End-to-end tests: instrument a module, run it, and check what the tracker saw.
//!
//! Each test builds lowered bodies by hand, runs the pass over them, and
//! evaluates the result with the reference VM. Assertions are on the printed
//! tracker events (`#<activation> <event>`), so they read like a trace log.

use statetrace::prelude::*;
use statetrace::core::ir::{BinaryOp, NewObject};
use statetrace::core::{PrimitiveKind, Span, ValueCategory};
use statetrace::vm::{INSUFFICIENT_EXECUTION_STACK, OPERATION_CANCELED};

/// Install a test subscriber once; `RUST_LOG=statetrace=trace` shows the pass at work.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn module_of(types: TypeTable, methods: Vec<statetrace::core::ir::MethodDecl>) -> Module {
    let mut module = Module::new(types);
    for method in methods {
        module.add_method(method);
    }
    module
}

fn instrument(module: Module, config: &InstrumentationConfig) -> InstrumentationOutput {
    init_tracing();
    let output = statetrace::instrument_module(module, config);
    for diagnostic in &output.diagnostics {
        tracing::debug!(%diagnostic, "diagnostic");
    }
    output
}

fn printed(events: &[TraceEvent]) -> Vec<String> {
    events.iter().map(ToString::to_string).collect()
}

/// Every activation's events start with its entry and end with its return.
fn assert_bracketed(events: &[TraceEvent]) {
    let mut activations: Vec<u64> = events.iter().map(TraceEvent::activation).collect();
    activations.sort_unstable();
    activations.dedup();
    for activation in activations {
        let own: Vec<&TraceEvent> = events
            .iter()
            .filter(|e| e.activation() == activation)
            .collect();
        assert!(
            matches!(own.first(), Some(TraceEvent::Entered { .. })),
            "activation {activation} does not start with entry: {own:?}"
        );
        assert!(
            matches!(own.last(), Some(TraceEvent::Returned { .. })),
            "activation {activation} does not end with return: {own:?}"
        );
        let returns = own
            .iter()
            .filter(|e| matches!(e, TraceEvent::Returned { .. }))
            .count();
        assert_eq!(returns, 1, "activation {activation}");
    }
}

fn store(place: Place, value: Expr) -> Stmt {
    Stmt::expr(Expr::assign(place, value))
}

// =============================================================================
// Locals and parameters
// =============================================================================

/// `void F(int p) { int a = 1; p = a = 2; }`
fn chained_assignment() -> Module {
    let mut b = MethodBuilder::new(MethodId::new(1), "F");
    let p = b.param("p", primitives::INT32);
    let a = b.local("a", primitives::INT32);
    let method = b.build(Stmt::block(vec![
        store(Place::Local(a), Expr::int(1)),
        store(Place::Param(p), Expr::assign(Place::Local(a), Expr::int(2))),
    ]));
    module_of(TypeTable::new(), vec![method])
}

#[test]
fn test_store_sequence() {
    let output = instrument(chained_assignment(), &InstrumentationConfig::tracing());
    assert!(!output.has_errors());

    let mut vm = Vm::new(&output.module);
    assert_eq!(vm.call(MethodId::new(1), vec![Value::i32(9)]), Ok(Value::Void));
    assert_eq!(
        printed(vm.events()),
        [
            "#1 enter 1",
            "#1 local[0] = 1",
            "#1 local[0] = 2",
            "#1 param[0] = 2",
            "#1 return",
        ]
    );
}

#[test]
fn test_parameter_snapshot_follows_entry() {
    let config = InstrumentationConfig::tracing().with_parameter_snapshots(true);
    let output = instrument(chained_assignment(), &config);

    let mut vm = Vm::new(&output.module);
    vm.call(MethodId::new(1), vec![Value::i32(9)]).unwrap();
    assert_eq!(
        printed(vm.events()),
        [
            "#1 enter 1",
            "#1 param[0] = 9",
            "#1 local[0] = 1",
            "#1 local[0] = 2",
            "#1 param[0] = 2",
            "#1 return",
        ]
    );
}

#[test]
fn test_signed_values_reinterpreted() {
    let mut b = MethodBuilder::new(MethodId::new(1), "F");
    let s = b.local("s", primitives::INT8);
    let l = b.local("l", primitives::INT64);
    let method = b.build(Stmt::block(vec![
        store(Place::Local(s), Expr::int_of(-1, PrimitiveKind::Int8)),
        store(Place::Local(l), Expr::int_of(-2, PrimitiveKind::Int64)),
    ]));
    let output = instrument(
        module_of(TypeTable::new(), vec![method]),
        &InstrumentationConfig::tracing(),
    );

    let mut vm = Vm::new(&output.module);
    vm.call(MethodId::new(1), vec![]).unwrap();
    let stores: Vec<&TraceValue> = vm
        .events()
        .iter()
        .filter_map(|e| match e {
            TraceEvent::Store { value, .. } => Some(value),
            _ => None,
        })
        .collect();
    assert_eq!(
        stores,
        [&TraceValue::U8(255), &TraceValue::U64(u64::MAX - 1)]
    );
}

#[test]
fn test_value_shapes() {
    let mut types = TypeTable::new();
    let point = types.register(
        TypeDef::structure("Point", 8, 4)
            .with_field(FieldDef::new(FieldId::new(10), "X", primitives::INT32))
            .with_field(FieldDef::new(FieldId::new(11), "Y", primitives::INT32)),
    );

    let mut b = MethodBuilder::new(MethodId::new(1), "F");
    let d = b.local("d", primitives::DOUBLE);
    let s = b.local("s", primitives::STRING);
    let n = b.local("n", primitives::STRING);
    let pt = b.local("pt", point);
    let method = b.build(Stmt::block(vec![
        store(Place::Local(d), Expr::double(1.5)),
        store(Place::Local(s), Expr::str("hi")),
        store(Place::Local(n), Expr::null()),
        store(
            Place::Local(pt),
            Expr::New(Box::new(NewObject {
                ty: point,
                ctor: None,
                args: vec![],
                initializers: vec![
                    statetrace::core::ir::MemberInit {
                        field: FieldId::new(10),
                        value: Expr::int(1),
                    },
                    statetrace::core::ir::MemberInit {
                        field: FieldId::new(11),
                        value: Expr::int(-1),
                    },
                ],
            })),
        ),
    ]));
    let output = instrument(module_of(types, vec![method]), &InstrumentationConfig::tracing());
    assert!(output.stats.verification_warnings >= 1);

    let mut vm = Vm::new(&output.module);
    vm.call(MethodId::new(1), vec![]).unwrap();
    assert_eq!(
        printed(vm.events()),
        [
            "#1 enter 1",
            "#1 local[0] = 1.5",
            "#1 local[1] = \"hi\"",
            "#1 local[2] = null",
            "#1 local[3] = [01 00 00 00 ff ff ff ff]",
            "#1 return",
        ]
    );
}

#[test]
fn test_out_argument_logged_in_both_activations() {
    // void G(out int o) { o = 7; }
    let mut g = MethodBuilder::new(MethodId::new(2), "G");
    let o = g.param_with("o", primitives::INT32, RefKind::Out);
    let g = g.build(Stmt::block(vec![store(Place::Param(o), Expr::int(7))]));

    // int F() { int a = 0; G(out a); return a; }
    let mut f = MethodBuilder::new(MethodId::new(1), "F").returns(primitives::INT32);
    let a = f.local("a", primitives::INT32);
    let f = f.build(Stmt::block(vec![
        store(Place::Local(a), Expr::int(0)),
        Stmt::expr(Expr::call(
            MethodId::new(2),
            vec![Arg::out(Place::Local(a))],
            primitives::VOID,
        )),
        Stmt::ret(Some(Expr::local(a))),
    ]));

    let config = InstrumentationConfig::tracing().with_parameter_snapshots(true);
    let output = instrument(module_of(TypeTable::new(), vec![f, g]), &config);

    let mut vm = Vm::new(&output.module);
    assert_eq!(vm.call(MethodId::new(1), vec![]), Ok(Value::i32(7)));
    assert_eq!(
        printed(vm.events()),
        [
            "#1 enter 1",
            "#1 local[0] = 0",
            "#2 enter 2",
            "#2 param[0] = 7",
            "#2 return",
            "#1 local[0] = 7",
            "#1 return",
        ]
    );
}

// =============================================================================
// Ref rebinds
// =============================================================================

#[test]
fn test_ref_rebind_logs_alias_only() {
    // void F(int p) { int a = 1; ref int r = ref a; r = ref p; }
    let mut b = MethodBuilder::new(MethodId::new(1), "F");
    let p = b.param("p", primitives::INT32);
    let a = b.local("a", primitives::INT32);
    let r = b.ref_local("r", primitives::INT32);
    let method = b.build(Stmt::block(vec![
        store(Place::Local(a), Expr::int(1)),
        Stmt::expr(Expr::ref_assign(Place::Local(r), Place::Local(a))),
        Stmt::expr(Expr::ref_assign(Place::Local(r), Place::Param(p))),
    ]));
    let output = instrument(
        module_of(TypeTable::new(), vec![method]),
        &InstrumentationConfig::tracing(),
    );
    assert_eq!(output.stats.aliases, 2);

    let mut vm = Vm::new(&output.module);
    vm.call(MethodId::new(1), vec![Value::i32(4)]).unwrap();
    assert_eq!(
        printed(vm.events()),
        [
            "#1 enter 1",
            "#1 local[0] = 1",
            "#1 LogLocalStoreLocalAlias(0, 1)",
            "#1 LogLocalStoreParameterAlias(0, 1)",
            "#1 return",
        ]
    );
}

#[test]
fn test_parameter_alias_between_ref_parameters() {
    // void F(ref int p, ref int q) { p = ref q; p = 3; }
    let mut f = MethodBuilder::new(MethodId::new(2), "F");
    let p = f.param_with("p", primitives::INT32, RefKind::Ref);
    let q = f.param_with("q", primitives::INT32, RefKind::Ref);
    let f = f.build(Stmt::block(vec![
        Stmt::expr(Expr::ref_assign(Place::Param(p), Place::Param(q))),
        store(Place::Param(p), Expr::int(3)),
    ]));

    // int G() { int a = 1; int b = 2; F(ref a, ref b); return b; }
    let mut g = MethodBuilder::new(MethodId::new(1), "G").returns(primitives::INT32);
    let a = g.local("a", primitives::INT32);
    let b = g.local("b", primitives::INT32);
    let g = g.build(Stmt::block(vec![
        store(Place::Local(a), Expr::int(1)),
        store(Place::Local(b), Expr::int(2)),
        Stmt::expr(Expr::call(
            MethodId::new(2),
            vec![Arg::by_ref(Place::Local(a)), Arg::by_ref(Place::Local(b))],
            primitives::VOID,
        )),
        Stmt::ret(Some(Expr::local(b))),
    ]));

    let output = instrument(
        module_of(TypeTable::new(), vec![g, f]),
        &InstrumentationConfig::tracing(),
    );
    assert!(!output.has_errors());
    assert_eq!(output.stats.aliases, 1);

    let mut vm = Vm::new(&output.module);
    assert_eq!(vm.call(MethodId::new(1), vec![]), Ok(Value::i32(3)));
    assert_eq!(
        printed(vm.events()),
        [
            "#1 enter 1",
            "#1 local[0] = 1",
            "#1 local[1] = 2",
            "#2 enter 2",
            "#2 LogParameterStoreParameterAlias(1, 0)",
            "#2 param[0] = 3",
            "#2 return",
            "#1 local[0] = 1",
            "#1 local[1] = 3",
            "#1 return",
        ]
    );
}

// =============================================================================
// Exit paths
// =============================================================================

#[test]
fn test_single_return_on_early_exit() {
    // int F(int p) { if (p > 0) return 1; int a = 2; return a; }
    let mut b = MethodBuilder::new(MethodId::new(1), "F").returns(primitives::INT32);
    let p = b.param("p", primitives::INT32);
    let a = b.local("a", primitives::INT32);
    let method = b.build(Stmt::block(vec![
        Stmt::if_then(
            Expr::binary(BinaryOp::Gt, Expr::param(p), Expr::int(0)),
            Stmt::ret(Some(Expr::int(1))),
            None,
        ),
        store(Place::Local(a), Expr::int(2)),
        Stmt::ret(Some(Expr::local(a))),
    ]));
    let output = instrument(
        module_of(TypeTable::new(), vec![method]),
        &InstrumentationConfig::tracing(),
    );

    let mut vm = Vm::new(&output.module);
    assert_eq!(vm.call(MethodId::new(1), vec![Value::i32(5)]), Ok(Value::i32(1)));
    assert_eq!(printed(vm.events()), ["#1 enter 1", "#1 return"]);

    assert_eq!(vm.call(MethodId::new(1), vec![Value::i32(0)]), Ok(Value::i32(2)));
    assert_eq!(
        printed(&vm.events()[2..]),
        ["#2 enter 1", "#2 local[0] = 2", "#2 return"]
    );
    assert_bracketed(vm.events());
}

#[test]
fn test_single_return_on_exception() {
    let mut types = TypeTable::new();
    let boom = types.register(TypeDef::class("Boom"));

    // void F() { int a = 1; throw new Boom(); }
    let mut b = MethodBuilder::new(MethodId::new(1), "F");
    let a = b.local("a", primitives::INT32);
    let method = b.build(Stmt::block(vec![
        store(Place::Local(a), Expr::int(1)),
        Stmt::throw(Expr::new_object(boom, None, vec![])),
    ]));
    let output = instrument(module_of(types, vec![method]), &InstrumentationConfig::tracing());

    let mut vm = Vm::new(&output.module);
    assert_eq!(
        vm.call(MethodId::new(1), vec![]),
        Err(RuntimeError::UnhandledException { ty: "Boom".into() })
    );
    assert_eq!(
        printed(vm.events()),
        ["#1 enter 1", "#1 local[0] = 1", "#1 return"]
    );
}

#[test]
fn test_catch_local_logged_before_handler() {
    let mut types = TypeTable::new();
    let boom = types.register(TypeDef::class("Boom"));

    // int F() { int a = 0; try { throw new Boom(); } catch (Boom e) { a = 1; } return a; }
    let mut b = MethodBuilder::new(MethodId::new(1), "F").returns(primitives::INT32);
    let a = b.local("a", primitives::INT32);
    let e = b.local("e", boom);
    let method = b.build(Stmt::block(vec![
        store(Place::Local(a), Expr::int(0)),
        Stmt::try_region(
            Stmt::block(vec![Stmt::throw(Expr::new_object(boom, None, vec![]))]),
            vec![CatchClause::new(
                Some(boom),
                Some(e),
                Stmt::block(vec![store(Place::Local(a), Expr::int(1))]),
            )],
            None,
        ),
        Stmt::ret(Some(Expr::local(a))),
    ]));
    let output = instrument(module_of(types, vec![method]), &InstrumentationConfig::tracing());

    let mut vm = Vm::new(&output.module);
    assert_eq!(vm.call(MethodId::new(1), vec![]), Ok(Value::i32(1)));
    assert_eq!(
        printed(vm.events()),
        [
            "#1 enter 1",
            "#1 local[0] = 0",
            "#1 local[1] = {Boom}",
            "#1 local[0] = 1",
            "#1 return",
        ]
    );
}

// =============================================================================
// Lambdas and hoisted fields
// =============================================================================

#[test]
fn test_lambda_stores_into_hoisted_field() {
    let mut types = TypeTable::new();
    let closure = types.register(
        TypeDef::class("<>c__DisplayClass0_0").with_field(FieldDef::hoisted(
            FieldId::new(5),
            "x",
            primitives::INT32,
            HoistedFrom::Local,
        )),
    );

    // <F>b__0() { this.x = 5; }
    let lambda = MethodBuilder::new(MethodId::new(2), "<F>b__0")
        .kind(MethodKind::Lambda {
            containing: MethodId::new(1),
            lambda: LambdaId::new(0),
        })
        .in_type(closure)
        .build(Stmt::block(vec![store(
            Place::this_field(FieldId::new(5)),
            Expr::int(5),
        )]));

    // void F() { var c = new Closure(); c.x = 1; c.<F>b__0(); }
    let mut f = MethodBuilder::new(MethodId::new(1), "F");
    let c = f.synthesized("<>8__1", closure);
    let f = f.build(Stmt::block(vec![
        store(Place::Local(c), Expr::new_object(closure, None, vec![])),
        store(Place::field(Expr::local(c), FieldId::new(5)), Expr::int(1)),
        Stmt::expr(Expr::call_on(
            Arg::Value(Expr::local(c)),
            MethodId::new(2),
            vec![],
            primitives::VOID,
        )),
    ]));

    let output = instrument(module_of(types, vec![f, lambda]), &InstrumentationConfig::tracing());
    assert!(!output.has_errors());

    let mut vm = Vm::new(&output.module);
    vm.call(MethodId::new(1), vec![]).unwrap();
    let hoisted = statetrace::core::HOISTED_INDEX_BASE + 5;
    assert_eq!(
        printed(vm.events()),
        [
            "#1 enter 1".to_string(),
            format!("#1 local[{hoisted}] = 1"),
            "#2 enter 1.0".to_string(),
            format!("#2 local[{hoisted}] = 5"),
            "#2 return".to_string(),
            "#1 return".to_string(),
        ]
    );
}

const CAPTURED_X: FieldId = FieldId::new(5);

fn display_class() -> (TypeTable, TypeHash) {
    let mut types = TypeTable::new();
    let closure = types.register(TypeDef::class("<>c__DisplayClass1_0").with_field(
        FieldDef::hoisted(CAPTURED_X, "x", primitives::INT32, HoistedFrom::Local),
    ));
    (types, closure)
}

#[test]
fn test_hoisted_store_lands_on_receiver_read_before_value() {
    // int F() { var c = new C(); var d = new C(); var e = c; c.x = (c = d, 5); return e.x; }
    let (types, closure) = display_class();
    let mut b = MethodBuilder::new(MethodId::new(1), "F").returns(primitives::INT32);
    let c = b.local("c", closure);
    let d = b.local("d", closure);
    let e = b.local("e", closure);
    let method = b.build(Stmt::block(vec![
        store(Place::Local(c), Expr::new_object(closure, None, vec![])),
        store(Place::Local(d), Expr::new_object(closure, None, vec![])),
        store(Place::Local(e), Expr::local(c)),
        store(
            Place::field(Expr::local(c), CAPTURED_X),
            Expr::sequence(
                vec![Expr::assign(Place::Local(c), Expr::local(d))],
                Some(Expr::int(5)),
            ),
        ),
        Stmt::ret(Some(Expr::Load(Place::field(Expr::local(e), CAPTURED_X)))),
    ]));
    let module = module_of(types, vec![method]);

    let plain = Vm::new(&module).call(MethodId::new(1), vec![]);
    assert_eq!(plain, Ok(Value::i32(5)));

    let output = instrument(module, &InstrumentationConfig::tracing());
    assert!(!output.has_errors());
    let mut vm = Vm::new(&output.module);
    assert_eq!(vm.call(MethodId::new(1), vec![]), plain);

    let hoisted = statetrace::core::HOISTED_INDEX_BASE + CAPTURED_X.index();
    assert!(printed(vm.events()).contains(&format!("#1 local[{hoisted}] = 5")));
    assert_bracketed(vm.events());
}

#[test]
fn test_ref_field_argument_read_back_from_original_receiver() {
    // void G(ref int v, out C o) { o = new C(); v = 7; }
    let (types, closure) = display_class();
    let mut g = MethodBuilder::new(MethodId::new(2), "G");
    let v = g.param_with("v", primitives::INT32, RefKind::Ref);
    let o = g.param_with("o", closure, RefKind::Out);
    let g = g.build(Stmt::block(vec![
        store(Place::Param(o), Expr::new_object(closure, None, vec![])),
        store(Place::Param(v), Expr::int(7)),
    ]));

    // int F() { var c = new C(); G(ref c.x, out c); return c.x; }
    let mut f = MethodBuilder::new(MethodId::new(1), "F").returns(primitives::INT32);
    let c = f.local("c", closure);
    let f = f.build(Stmt::block(vec![
        store(Place::Local(c), Expr::new_object(closure, None, vec![])),
        Stmt::expr(Expr::call(
            MethodId::new(2),
            vec![
                Arg::by_ref(Place::field(Expr::local(c), CAPTURED_X)),
                Arg::out(Place::Local(c)),
            ],
            primitives::VOID,
        )),
        Stmt::ret(Some(Expr::Load(Place::field(Expr::local(c), CAPTURED_X)))),
    ]));
    let module = module_of(types, vec![f, g]);

    let plain = Vm::new(&module).call(MethodId::new(1), vec![]);
    assert_eq!(plain, Ok(Value::i32(0)));

    let output = instrument(module, &InstrumentationConfig::tracing());
    assert!(!output.has_errors());
    let mut vm = Vm::new(&output.module);
    assert_eq!(vm.call(MethodId::new(1), vec![]), plain);

    let hoisted = statetrace::core::HOISTED_INDEX_BASE + CAPTURED_X.index();
    let events = printed(vm.events());
    assert!(events.contains(&format!("#1 local[{hoisted}] = 7")), "{events:?}");
    assert!(!events.contains(&format!("#1 local[{hoisted}] = 0")), "{events:?}");
    assert_bracketed(vm.events());
}

// =============================================================================
// State machines
// =============================================================================

const STATE: FieldId = FieldId::new(20);
const INSTANCE: FieldId = FieldId::new(21);
const HOISTED_I: FieldId = FieldId::new(22);
const DISPOSE_MODE: FieldId = FieldId::new(23);

const KICKOFF: MethodId = MethodId::new(1);
const CTOR: MethodId = MethodId::new(2);
const MOVE_NEXT: MethodId = MethodId::new(3);
const DISPOSE: MethodId = MethodId::new(4);

/// An iterator state machine whose `MoveNext` increments a hoisted local.
///
/// With `dispose_mode`, it is an async iterator whose `Dispose` sets the
/// dispose flag.
fn iterator(dispose_mode: bool) -> (Module, TypeHash) {
    let mut types = TypeTable::new();
    let mut def = TypeDef::class("<Count>d__0")
        .with_field(FieldDef::new(STATE, "<>1__state", primitives::INT32))
        .with_field(FieldDef::new(INSTANCE, "<>id", primitives::UINT64))
        .with_field(FieldDef::hoisted(
            HOISTED_I,
            "<i>5__1",
            primitives::INT32,
            HoistedFrom::Local,
        ));
    if dispose_mode {
        def = def.with_field(FieldDef::new(DISPOSE_MODE, "<>w__disposeMode", primitives::BOOL));
    }
    let sm = types.register(def);

    let kickoff = MethodBuilder::new(KICKOFF, "Count")
        .kind(MethodKind::StateMachineKickoff)
        .returns(primitives::OBJECT)
        .build(Stmt::ret(Some(Expr::new_object(sm, Some(CTOR), vec![]))));
    let ctor = MethodBuilder::new(CTOR, ".ctor")
        .kind(MethodKind::StateMachineConstructor {
            instance_id: INSTANCE,
        })
        .in_type(sm)
        .build(Stmt::block(vec![]));
    let info = StateMachineInfo {
        kind: if dispose_mode {
            StateMachineKind::AsyncIterator
        } else {
            StateMachineKind::Iterator
        },
        kickoff: KICKOFF,
        instance_id: INSTANCE,
        dispose_mode: dispose_mode.then_some(DISPOSE_MODE),
    };
    let move_next = MethodBuilder::new(MOVE_NEXT, "MoveNext")
        .kind(MethodKind::StateMachineResume(info))
        .in_type(sm)
        .returns(primitives::BOOL)
        .build(Stmt::block(vec![
            Stmt::entry_point(),
            store(
                Place::this_field(HOISTED_I),
                Expr::binary(
                    BinaryOp::Add,
                    Expr::Load(Place::this_field(HOISTED_I)),
                    Expr::int(1),
                ),
            ),
            Stmt::ret(Some(Expr::bool(true))),
        ]));
    let dispose = MethodBuilder::new(DISPOSE, "Dispose")
        .kind(MethodKind::StateMachineDispose)
        .in_type(sm)
        .build(Stmt::block(if dispose_mode {
            vec![store(Place::this_field(DISPOSE_MODE), Expr::bool(true))]
        } else {
            vec![]
        }));

    (module_of(types, vec![kickoff, ctor, move_next, dispose]), sm)
}

#[test]
fn test_state_machine_resumes_share_instance() {
    let (module, sm) = iterator(false);
    let output = instrument(module, &InstrumentationConfig::tracing());
    assert!(!output.has_errors());
    assert_eq!(output.stats.instance_ids, 1);

    let mut vm = Vm::new(&output.module);
    let first = vm.construct(sm, Some(CTOR), vec![]).unwrap();
    let second = vm.construct(sm, Some(CTOR), vec![]).unwrap();
    assert_eq!(vm.field(&first, INSTANCE), Ok(Value::u64(1)));
    assert_eq!(vm.field(&second, INSTANCE), Ok(Value::u64(2)));

    vm.call_on(MOVE_NEXT, first.clone(), vec![]).unwrap();
    vm.call_on(MOVE_NEXT, first.clone(), vec![]).unwrap();
    vm.call_on(MOVE_NEXT, second, vec![]).unwrap();

    let hoisted = statetrace::core::HOISTED_INDEX_BASE + HOISTED_I.index();
    assert_eq!(
        printed(vm.events()),
        [
            "#1 enter 1 @1".to_string(),
            format!("#1 local[{hoisted}] = 1"),
            "#1 return".to_string(),
            "#2 enter 1 @1".to_string(),
            format!("#2 local[{hoisted}] = 2"),
            "#2 return".to_string(),
            "#3 enter 1 @2".to_string(),
            format!("#3 local[{hoisted}] = 1"),
            "#3 return".to_string(),
        ]
    );
    assert_bracketed(vm.events());
}

#[test]
fn test_state_machine_stubs_untouched() {
    let (module, _) = iterator(false);
    let kickoff = module.method(KICKOFF).unwrap().clone();
    let dispose = module.method(DISPOSE).unwrap().clone();
    let output = instrument(module, &InstrumentationConfig::tracing());

    assert_eq!(output.module.method(KICKOFF), Some(&kickoff));
    assert_eq!(output.module.method(DISPOSE), Some(&dispose));
}

#[test]
fn test_disposing_async_iterator_logs_nothing() {
    let (module, sm) = iterator(true);
    let output = instrument(module, &InstrumentationConfig::tracing());
    assert!(!output.has_errors());

    let mut vm = Vm::new(&output.module);
    let disposed = vm.construct(sm, Some(CTOR), vec![]).unwrap();
    vm.call_on(DISPOSE, disposed.clone(), vec![]).unwrap();
    vm.call_on(MOVE_NEXT, disposed.clone(), vec![]).unwrap();
    assert!(vm.events().is_empty());
    assert_eq!(vm.field(&disposed, HOISTED_I), Ok(Value::i32(1)));

    let live = vm.construct(sm, Some(CTOR), vec![]).unwrap();
    vm.call_on(MOVE_NEXT, live, vec![]).unwrap();
    assert_eq!(vm.events().len(), 3);
    assert_eq!(vm.events()[0].to_string(), "#1 enter 1 @2");
    assert_bracketed(vm.events());
}

#[test]
fn test_state_machine_parameter_snapshot_at_entry_point() {
    const START: FieldId = FieldId::new(24);

    let mut types = TypeTable::new();
    let sm = types.register(
        TypeDef::class("<Run>d__1")
            .with_field(FieldDef::new(STATE, "<>1__state", primitives::INT32))
            .with_field(FieldDef::new(INSTANCE, "<>id", primitives::UINT64))
            .with_field(FieldDef::hoisted(
                START,
                "start",
                primitives::INT32,
                HoistedFrom::Parameter,
            )),
    );
    let kickoff = MethodBuilder::new(KICKOFF, "Run")
        .kind(MethodKind::StateMachineKickoff)
        .returns(primitives::OBJECT)
        .build(Stmt::ret(Some(Expr::null())));
    let mut ctor = MethodBuilder::new(CTOR, ".ctor")
        .kind(MethodKind::StateMachineConstructor {
            instance_id: INSTANCE,
        })
        .in_type(sm);
    let start = ctor.param("start", primitives::INT32);
    let ctor = ctor.build(Stmt::block(vec![store(
        Place::this_field(START),
        Expr::param(start),
    )]));
    let move_next = MethodBuilder::new(MOVE_NEXT, "MoveNext")
        .kind(MethodKind::StateMachineResume(StateMachineInfo {
            kind: StateMachineKind::Iterator,
            kickoff: KICKOFF,
            instance_id: INSTANCE,
            dispose_mode: None,
        }))
        .in_type(sm)
        .returns(primitives::BOOL)
        .build(Stmt::block(vec![
            Stmt::entry_point(),
            Stmt::ret(Some(Expr::bool(true))),
        ]));

    let config = InstrumentationConfig::tracing().with_parameter_snapshots(true);
    let output = instrument(module_of(types, vec![kickoff, ctor, move_next]), &config);
    assert!(!output.has_errors());

    let mut vm = Vm::new(&output.module);
    let instance = vm.construct(sm, Some(CTOR), vec![Value::i32(4)]).unwrap();
    vm.call_on(MOVE_NEXT, instance, vec![]).unwrap();

    let hoisted = statetrace::core::HOISTED_INDEX_BASE + START.index();
    assert_eq!(
        printed(vm.events()),
        [
            "#1 enter 1 @1".to_string(),
            format!("#1 param[{hoisted}] = 4"),
            "#1 return".to_string(),
        ]
    );
}

// =============================================================================
// Exclusions
// =============================================================================

#[test]
fn test_auto_accessor_untouched() {
    let mut types = TypeTable::new();
    let widget = types.register(
        TypeDef::class("Widget")
            .with_field(FieldDef::new(FieldId::new(1), "<P>k__BackingField", primitives::INT32)),
    );
    let getter = MethodBuilder::new(MethodId::new(1), "get_P")
        .kind(MethodKind::Accessor)
        .flags(MethodFlags::AUTO_ACCESSOR)
        .in_type(widget)
        .returns(primitives::INT32)
        .build(Stmt::ret(Some(Expr::Load(Place::this_field(FieldId::new(1))))));
    let expected = getter.clone();

    let output = instrument(module_of(types, vec![getter]), &InstrumentationConfig::tracing());
    assert_eq!(output.module.method(MethodId::new(1)), Some(&expected));
    assert_eq!(output.stats.methods_excluded, 1);

    let mut vm = Vm::new(&output.module);
    let object = vm.construct(widget, None, vec![]).unwrap();
    assert_eq!(vm.call_on(MethodId::new(1), object, vec![]), Ok(Value::i32(0)));
    assert!(vm.events().is_empty());
}

#[test]
fn test_tracker_type_not_instrumented() {
    let mut types = TypeTable::new();
    let tracker = types.register(
        TypeDef::ref_struct("LocalStoreTracker", 8, 8).with_flags(TypeFlags::TRACKER),
    );
    let mut b = MethodBuilder::new(MethodId::new(1), "Helper").in_type(tracker);
    let a = b.local("a", primitives::INT32);
    let method = b.build(Stmt::block(vec![store(Place::Local(a), Expr::int(1))]));
    let expected = method.clone();

    let output = instrument(module_of(types, vec![method]), &InstrumentationConfig::tracing());
    assert_eq!(output.module.method(MethodId::new(1)), Some(&expected));
}

// =============================================================================
// Values without a loggable form
// =============================================================================

#[test]
fn test_unloggable_stores_skipped() {
    let mut types = TypeTable::new();
    let holder = types.register(
        TypeDef::ref_struct("RefHolder", 8, 8).with_flags(TypeFlags::HAS_MANAGED_REFS),
    );
    let by_ref_like = types.register(TypeDef::type_parameter("TRef", true));

    let mut b = MethodBuilder::new(MethodId::new(1), "F");
    let r = b.local("r", holder);
    let t = b.local("t", by_ref_like);
    let a = b.local("a", primitives::INT32);
    let method = b.build(Stmt::block(vec![
        store(Place::Local(r), Expr::Default(holder)),
        store(Place::Local(t), Expr::Default(by_ref_like)),
        store(Place::Local(a), Expr::int(1)),
    ]));
    let output = instrument(module_of(types, vec![method]), &InstrumentationConfig::tracing());

    assert!(!output.has_errors());
    assert_eq!(output.stats.skipped_stores, 2);
    assert_eq!(output.stats.stores, 1);
    let method = output.module.method(MethodId::new(1)).unwrap();
    let body = IrPrinter::new(&output.module, method).print_body();
    assert!(body.contains("    r = default(RefHolder);\n"), "{body}");
    assert!(body.contains("    t = default(TRef);\n"), "{body}");
    assert!(body.contains("LogLocalStore<u32>(reinterpret<uint32>(a), 2u32)"), "{body}");
}

// =============================================================================
// Diagnostics
// =============================================================================

#[test]
fn test_missing_store_overload_reported_at_statement() {
    let mut b = MethodBuilder::new(MethodId::new(1), "F").body_span(Span::new(2, 1, 40));
    let a = b.local("a", primitives::INT32);
    let method = b.build(Stmt::block(vec![
        store(Place::Local(a), Expr::int(1)).with_span(Span::new(3, 5, 6)),
        store(Place::Local(a), Expr::int(2)).with_span(Span::new(4, 5, 6)),
    ]));
    let member = TrackerMember::LogStore {
        family: StoreFamily::Local,
        category: ValueCategory::U32,
    };
    let config =
        InstrumentationConfig::tracing().with_tracker(TrackerContract::default().without(member));
    let output = instrument(module_of(TypeTable::new(), vec![method]), &config);

    let spans: Vec<_> = output.diagnostics.iter().filter_map(Diagnostic::span).collect();
    assert_eq!(spans, [Span::new(3, 5, 6), Span::new(4, 5, 6)]);
    assert_eq!(
        output.diagnostics[0].to_string(),
        "at 3:5: missing runtime member 'LogLocalStore(u32)' on the tracker type"
    );
    assert_eq!(output.stats.stores, 0);

    let mut vm = Vm::new(&output.module);
    vm.call(MethodId::new(1), vec![]).unwrap();
    assert_eq!(printed(vm.events()), ["#1 enter 1", "#1 return"]);
}

#[test]
fn test_missing_entry_member_reported_once_per_method() {
    let config = InstrumentationConfig::tracing()
        .with_tracker(TrackerContract::default().without(TrackerMember::LogMethodEntry));
    let output = instrument(chained_assignment(), &config);

    let entries: Vec<_> = output
        .diagnostics
        .iter()
        .filter(|d| {
            matches!(
                d,
                Diagnostic::MissingRuntimeMember {
                    member: TrackerMember::LogMethodEntry,
                    ..
                }
            )
        })
        .collect();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].method(), MethodId::new(1));
}

// =============================================================================
// Composition with other instrumentation kinds
// =============================================================================

#[test]
fn test_composed_kinds_share_one_frame() {
    let config = InstrumentationConfig::new(InstrumentationKinds::all());
    let output = instrument(chained_assignment(), &config);
    assert!(!output.has_errors());

    let method = output.module.method(MethodId::new(1)).unwrap();
    let text = IrPrinter::new(&output.module, method).print_body();
    let cancel = text.find("ThrowIfCancellationRequested").unwrap();
    let probe = text.find("EnsureSufficientExecutionStack").unwrap();
    let entry = text.find("LogMethodEntry").unwrap();
    let coverage = text.find("CreateCoveragePayload").unwrap();
    assert!(cancel < probe && probe < entry && entry < coverage);
    assert_eq!(text.matches("try {").count(), 1);

    let mut vm = Vm::new(&output.module);
    vm.call(MethodId::new(1), vec![Value::i32(0)]).unwrap();
    assert_eq!(vm.coverage(), [MethodId::new(1)]);
    assert_eq!(vm.events().len(), 5);
}

#[test]
fn test_cancelled_method_never_enters() {
    let config = InstrumentationConfig::new(
        InstrumentationKinds::LOCAL_STATE_TRACING
            | InstrumentationKinds::MODULE_CANCELLATION
            | InstrumentationKinds::TEST_COVERAGE,
    );
    let output = instrument(chained_assignment(), &config);

    let mut vm = Vm::new(&output.module);
    vm.cancel();
    assert_eq!(
        vm.call(MethodId::new(1), vec![Value::i32(0)]),
        Err(RuntimeError::UnhandledException {
            ty: OPERATION_CANCELED.into()
        })
    );
    assert!(vm.events().is_empty());
    assert!(vm.coverage().is_empty());
}

#[test]
fn test_stack_probe_stops_before_entry() {
    // void R(int n) { if (n > 0) R(n - 1); }
    let mut b = MethodBuilder::new(MethodId::new(1), "R");
    let n = b.param("n", primitives::INT32);
    let method = b.build(Stmt::block(vec![Stmt::if_then(
        Expr::binary(BinaryOp::Gt, Expr::param(n), Expr::int(0)),
        Stmt::expr(Expr::call(
            MethodId::new(1),
            vec![Arg::Value(Expr::binary(
                BinaryOp::Sub,
                Expr::param(n),
                Expr::int(1),
            ))],
            primitives::VOID,
        )),
        None,
    )]));
    let config = InstrumentationConfig::new(
        InstrumentationKinds::LOCAL_STATE_TRACING | InstrumentationKinds::STACK_OVERFLOW_PROBING,
    );
    let output = instrument(module_of(TypeTable::new(), vec![method]), &config);

    let mut vm = Vm::new(&output.module).with_probe_depth(3);
    assert_eq!(
        vm.call(MethodId::new(1), vec![Value::i32(10)]),
        Err(RuntimeError::UnhandledException {
            ty: INSUFFICIENT_EXECUTION_STACK.into()
        })
    );
    let entries = vm
        .events()
        .iter()
        .filter(|e| matches!(e, TraceEvent::Entered { .. }))
        .count();
    assert_eq!(entries, 3);
    assert_bracketed(vm.events());
}

// =============================================================================
// Determinism
// =============================================================================

#[test]
fn test_output_is_deterministic() {
    let (module, _) = iterator(true);
    let config = InstrumentationConfig::new(InstrumentationKinds::all())
        .with_parameter_snapshots(true);

    let render = |module: Module| -> Vec<String> {
        let output = instrument(module, &config);
        output
            .module
            .methods()
            .iter()
            .map(|m| IrPrinter::new(&output.module, m).print_method())
            .collect()
    };
    assert_eq!(render(module.clone()), render(module));
}

#[test]
fn test_rewritten_body_golden() {
    let output = instrument(chained_assignment(), &InstrumentationConfig::tracing());
    let method = output.module.method(MethodId::new(1)).unwrap();
    assert_eq!(
        IrPrinter::new(&output.module, method).print_body(),
        "{\n  \
         $tracker = Tracker::LogMethodEntry(1u32);\n  \
         try {\n    \
         seq(a = 1, $tracker.LogLocalStore<u32>(reinterpret<uint32>(a), 0u32));\n    \
         seq(p = seq(a = 2, $tracker.LogLocalStore<u32>(reinterpret<uint32>(a), 0u32) => a), \
         $tracker.LogParameterStore<u32>(reinterpret<uint32>(p), 0u32));\n  \
         } finally {\n    \
         $tracker.LogReturn();\n  \
         }\n\
         }\n"
    );
}
