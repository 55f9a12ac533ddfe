//! Linking, host-bridge and instantiation tests.

use std::cell::Cell;
use std::rc::Rc;

use tollway::{
    Error, FuncType, Linker, LinkerConfig, Module, ModuleConfig, Trap, ValType,
};

fn module(wat: &str) -> Module {
    let bytes = wat::parse_str(wat).unwrap();
    Module::new(ModuleConfig::default(), &bytes).unwrap()
}

#[test]
fn typed_host_functions_cover_all_arities() {
    let m = module(
        r#"
        (module
            (import "env" "tick" (func $tick))
            (import "env" "answer" (func $answer (result i32)))
            (import "env" "observe" (func $observe (param i64)))
            (import "env" "negate" (func $negate (param i32) (result i32)))
            (import "env" "mix" (func $mix (param f64 f64) (result f64)))
            (func (export "go") (result i32)
                call $tick
                i64.const 9
                call $observe
                call $answer
                call $negate)
            (func (export "avg") (param f64 f64) (result f64)
                local.get 0
                local.get 1
                call $mix))
    "#,
    );

    let ticks = Rc::new(Cell::new(0u32));
    let seen = Rc::new(Cell::new(0i64));
    let mut linker = Linker::new(LinkerConfig::default());
    {
        let ticks = Rc::clone(&ticks);
        linker.define_func0("env", "tick", move || ticks.set(ticks.get() + 1)).unwrap();
    }
    linker.define_func0_1("env", "answer", || 41i32).unwrap();
    {
        let seen = Rc::clone(&seen);
        linker.define_func1("env", "observe", move |v: i64| seen.set(v)).unwrap();
    }
    linker.define_func1_1("env", "negate", |v: i32| -v).unwrap();
    linker.define_func2_1("env", "mix", |a: f64, b: f64| (a + b) / 2.0).unwrap();

    let mut instance = linker.instantiate(&m).unwrap();
    assert_eq!(
        instance.call_export("go", &[]).unwrap(),
        vec![-41i32 as u32 as u64]
    );
    assert_eq!(ticks.get(), 1);
    assert_eq!(seen.get(), 9);

    let avg = instance
        .call_export("avg", &[1.0f64.to_bits(), 2.0f64.to_bits()])
        .unwrap();
    assert_eq!(avg, vec![1.5f64.to_bits()]);
}

#[test]
fn imported_global_is_shared_between_instances() {
    let m = module(
        r#"
        (module
            (import "env" "counter" (global $c (mut i32)))
            (export "counter" (global $c))
            (func (export "bump")
                global.get $c
                i32.const 1
                i32.add
                global.set $c))
    "#,
    );
    let mut linker = Linker::new(LinkerConfig::default());
    linker.define_global("env", "counter", 10i32).unwrap();

    let mut a = linker.instantiate(&m).unwrap();
    let b = linker.instantiate(&m).unwrap();
    a.call_export("bump", &[]).unwrap();
    a.call_export("bump", &[]).unwrap();
    assert_eq!(a.get_global("counter").unwrap(), 12);
    assert_eq!(b.get_global("counter").unwrap(), 12);
}

#[test]
fn external_memory_is_aliased_by_host_and_instances() {
    let writer = module(
        r#"
        (module
            (import "env" "mem" (memory 1))
            (func (export "poke") (param i32 i32)
                local.get 0
                local.get 1
                i32.store8))
    "#,
    );
    let reader = module(
        r#"
        (module
            (import "env" "mem" (memory 1))
            (func (export "peek") (param i32) (result i32)
                local.get 0
                i32.load8_u))
    "#,
    );

    let mut linker = Linker::new(LinkerConfig::default());
    linker.define_memory("env", "mem", vec![0u8; 16]).unwrap();

    let mut w = linker.instantiate(&writer).unwrap();
    let mut r = linker.instantiate(&reader).unwrap();
    w.call_export("poke", &[3, 99]).unwrap();
    assert_eq!(r.call_export("peek", &[3]).unwrap(), vec![99]);

    // The host aliases the same bytes.
    let data = w.get_memory().unwrap();
    assert_eq!(data.borrow()[3], 99);
    data.borrow_mut()[4] = 55;
    assert_eq!(r.call_export("peek", &[4]).unwrap(), vec![55]);
}

#[test]
fn imported_table_dispatches_host_functions() {
    let m = module(
        r#"
        (module
            (type $v (func (result i32)))
            (import "env" "helpers" (table 2 funcref))
            (import "env" "seven" (func (result i32)))
            (func (export "call_at") (param i32) (result i32)
                local.get 0
                call_indirect (type $v)))
    "#,
    );
    let mut linker = Linker::new(LinkerConfig::default());
    linker.define_func0_1("env", "seven", || 7i32).unwrap();
    // Slot 0 points at function index 0 of the importing instance: the
    // imported host function itself.
    linker.define_table("env", "helpers", vec![Some(0), None]).unwrap();

    let mut instance = linker.instantiate(&m).unwrap();
    assert_eq!(instance.call_export("call_at", &[0]).unwrap(), vec![7]);
    assert_eq!(
        instance.call_export("call_at", &[1]).unwrap_err(),
        Error::Trap(Trap::UndefinedElement)
    );
}

#[test]
fn unresolved_imports_fail_instantiation() {
    let missing_module = module(
        r#"(module (import "ether" "f" (func)))"#,
    );
    let missing_name = module(
        r#"(module (import "env" "absent" (func)))"#,
    );
    let wrong_kind = module(
        r#"(module (import "env" "thing" (global i32)))"#,
    );

    let mut linker = Linker::new(LinkerConfig::default());
    linker.define_func0("env", "thing", || {}).unwrap();

    assert_eq!(
        linker.instantiate(&missing_module).unwrap_err(),
        Error::ImportModuleNotFound("ether".to_string())
    );
    assert_eq!(
        linker.instantiate(&missing_name).unwrap_err(),
        Error::ImportNotFound("env".to_string(), "absent".to_string())
    );
    assert_eq!(
        linker.instantiate(&wrong_kind).unwrap_err(),
        Error::ImportKindMismatch("env".to_string(), "thing".to_string())
    );
}

#[test]
fn host_result_count_mismatch_traps() {
    let m = module(
        r#"
        (module
            (import "env" "liar" (func $liar (result i32)))
            (func (export "go") (result i32)
                call $liar))
    "#,
    );
    let mut linker = Linker::new(LinkerConfig::default());
    linker
        .define_func_raw(
            "env",
            "liar",
            FuncType::new(vec![], vec![ValType::I32]),
            Box::new(|_, _| Ok(vec![])),
        )
        .unwrap();
    let mut instance = linker.instantiate(&m).unwrap();
    assert_eq!(
        instance.call_export("go", &[]).unwrap_err(),
        Error::Trap(Trap::InvalidFuncReturnType)
    );
}

#[test]
fn host_functions_can_fail_with_a_trap() {
    let m = module(
        r#"
        (module
            (import "env" "fail" (func $fail))
            (func (export "go") call $fail))
    "#,
    );
    let mut linker = Linker::new(LinkerConfig::default());
    linker
        .define_func_raw(
            "env",
            "fail",
            FuncType::new(vec![], vec![]),
            Box::new(|_, _| Err(Trap::HostFault("backend unavailable".into()))),
        )
        .unwrap();
    let mut instance = linker.instantiate(&m).unwrap();
    assert_eq!(
        instance.call_export("go", &[]).unwrap_err(),
        Error::Trap(Trap::HostFault("backend unavailable".into()))
    );
}

#[test]
fn host_function_reads_guest_memory_through_the_instance() {
    let m = module(
        r#"
        (module
            (import "env" "peek" (func $peek (param i32) (result i32)))
            (memory 1)
            (data (i32.const 5) "\2a")
            (func (export "ask") (result i32)
                i32.const 5
                call $peek))
    "#,
    );
    let mut linker = Linker::new(LinkerConfig::default());
    linker
        .define_func_raw(
            "env",
            "peek",
            FuncType::new(vec![ValType::I32], vec![ValType::I32]),
            Box::new(|ins, args| {
                let mem = ins.get_memory().ok_or(Trap::PointerOutOfBounds)?;
                let byte = *mem
                    .borrow()
                    .get(args[0] as usize)
                    .ok_or(Trap::PointerOutOfBounds)?;
                Ok(vec![byte as u64])
            }),
        )
        .unwrap();
    let mut instance = linker.instantiate(&m).unwrap();
    assert_eq!(instance.call_export("ask", &[]).unwrap(), vec![42]);
}

#[test]
fn shadowing_disabled_rejects_redefinition_across_kinds() {
    let mut linker = Linker::new(LinkerConfig { disable_shadowing: true });
    linker.define_func0("env", "x", || {}).unwrap();
    assert_eq!(
        linker.define_memory("env", "x", vec![]).unwrap_err(),
        Error::ShadowingDisabled
    );
    // A different name in the same module is fine.
    linker.define_memory("env", "y", vec![]).unwrap();
}

#[test]
fn silent_overwrite_reroutes_imports() {
    let m = module(
        r#"
        (module
            (import "env" "n" (func $n (result i32)))
            (func (export "get") (result i32) call $n))
    "#,
    );
    let mut linker = Linker::new(LinkerConfig::default());
    linker.define_func0_1("env", "n", || 1i32).unwrap();
    linker.define_func0_1("env", "n", || 2i32).unwrap();
    let mut instance = linker.instantiate(&m).unwrap();
    assert_eq!(instance.call_export("get", &[]).unwrap(), vec![2]);
}

#[test]
fn f32_crosses_the_bridge_bit_exactly() {
    let m = module(
        r#"
        (module
            (import "env" "quarter" (func $quarter (param f32) (result f32)))
            (func (export "go") (param f32) (result f32)
                local.get 0
                call $quarter))
    "#,
    );
    let mut linker = Linker::new(LinkerConfig::default());
    linker.define_func1_1("env", "quarter", |v: f32| v / 4.0f32).unwrap();
    let mut instance = linker.instantiate(&m).unwrap();
    let out = instance.call_export("go", &[3.0f32.to_bits() as u64]).unwrap();
    assert_eq!(out, vec![0.75f32.to_bits() as u64]);
}
