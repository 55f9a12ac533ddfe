//! End-to-end execution tests driving the interpreter through WAT
//! modules.

use std::cell::Cell;
use std::rc::Rc;

use tollway::{Error, Instance, Linker, LinkerConfig, Module, ModuleConfig, Trap};

fn instantiate(wat: &str) -> Instance {
    let bytes = wat::parse_str(wat).unwrap();
    let module = Module::new(ModuleConfig::default(), &bytes).unwrap();
    Linker::new(LinkerConfig::default())
        .instantiate(&module)
        .unwrap()
}

#[test]
fn add_two_i32s() {
    let mut instance = instantiate(
        r#"
        (module
            (func (export "add") (param i32 i32) (result i32)
                local.get 0
                local.get 1
                i32.add))
    "#,
    );
    assert_eq!(instance.call_export("add", &[3, 4]).unwrap(), vec![7]);
}

#[test]
fn imported_host_function_receives_the_constant() {
    let bytes = wat::parse_str(
        r#"
        (module
            (import "env" "print" (func $print (param i32)))
            (func (export "go")
                i32.const 42
                call $print))
    "#,
    )
    .unwrap();
    let module = Module::new(ModuleConfig::default(), &bytes).unwrap();

    let got = Rc::new(Cell::new(0i32));
    let sink = Rc::clone(&got);
    let mut linker = Linker::new(LinkerConfig::default());
    linker.define_func1("env", "print", move |n: i32| sink.set(n)).unwrap();

    let mut instance = linker.instantiate(&module).unwrap();
    let results = instance.call_export("go", &[]).unwrap();
    assert!(results.is_empty());
    assert_eq!(got.get(), 42);
}

#[test]
fn memory_store_load_roundtrip_and_bounds() {
    let mut instance = instantiate(
        r#"
        (module
            (memory 1)
            (func (export "roundtrip") (result i32)
                i32.const 0
                i32.const 0xdeadbeef
                i32.store
                i32.const 0
                i32.load)
            (func (export "oob")
                i32.const 65533
                i32.const 1
                i32.store))
    "#,
    );
    assert_eq!(instance.call_export("roundtrip", &[]).unwrap(), vec![0xDEAD_BEEF]);
    assert_eq!(
        instance.call_export("oob", &[]).unwrap_err(),
        Error::Trap(Trap::PointerOutOfBounds)
    );
}

#[test]
fn start_function_trap_fails_instantiation() {
    let bytes = wat::parse_str(r#"(module (func unreachable) (start 0))"#).unwrap();
    let module = Module::new(ModuleConfig::default(), &bytes).unwrap();
    let err = Linker::new(LinkerConfig::default())
        .instantiate(&module)
        .err()
        .expect("instantiation must fail");
    assert_eq!(err, Error::Trap(Trap::Unreachable));
}

#[test]
fn start_function_side_effects_are_visible() {
    let mut instance = instantiate(
        r#"
        (module
            (memory 1)
            (func $init
                i32.const 0
                i32.const 7
                i32.store)
            (start $init)
            (func (export "first") (result i32)
                i32.const 0
                i32.load))
    "#,
    );
    assert_eq!(instance.call_export("first", &[]).unwrap(), vec![7]);
}

#[test]
fn call_indirect_dispatches_and_traps() {
    let mut instance = instantiate(
        r#"
        (module
            (type $t (func (param i32) (result i32)))
            (type $u (func (param i32) (result i64)))
            (table 2 funcref)
            (elem (i32.const 0) $inc)
            (func $inc (type $t)
                local.get 0
                i32.const 1
                i32.add)
            (func (export "dispatch") (param i32 i32) (result i32)
                local.get 1
                local.get 0
                call_indirect (type $t))
            (func (export "mismatch") (param i32) (result i64)
                i32.const 5
                local.get 0
                call_indirect (type $u)))
    "#,
    );
    assert_eq!(instance.call_export("dispatch", &[0, 5]).unwrap(), vec![6]);
    assert_eq!(
        instance.call_export("dispatch", &[1, 5]).unwrap_err(),
        Error::Trap(Trap::UndefinedElement)
    );
    assert_eq!(
        instance.call_export("dispatch", &[9, 5]).unwrap_err(),
        Error::Trap(Trap::UndefinedElement)
    );
    assert_eq!(
        instance.call_export("mismatch", &[0]).unwrap_err(),
        Error::Trap(Trap::IndirectCallTypeMismatch)
    );
}

#[test]
fn br_table_clamps_to_the_default_target() {
    let mut instance = instantiate(
        r#"
        (module
            (func (export "classify") (param i32) (result i32)
                block $b2
                    block $b1
                        block $b0
                            local.get 0
                            br_table $b0 $b1 $b2
                        end
                        i32.const 0
                        return
                    end
                    i32.const 1
                    return
                end
                i32.const 2))
    "#,
    );
    assert_eq!(instance.call_export("classify", &[0]).unwrap(), vec![0]);
    assert_eq!(instance.call_export("classify", &[1]).unwrap(), vec![1]);
    assert_eq!(instance.call_export("classify", &[2]).unwrap(), vec![2]);
    assert_eq!(instance.call_export("classify", &[250]).unwrap(), vec![2]);
}

#[test]
fn integer_division_edge_cases() {
    let mut instance = instantiate(
        r#"
        (module
            (func (export "div") (param i32 i32) (result i32)
                local.get 0
                local.get 1
                i32.div_s)
            (func (export "rem") (param i32 i32) (result i32)
                local.get 0
                local.get 1
                i32.rem_s)
            (func (export "div64") (param i64 i64) (result i64)
                local.get 0
                local.get 1
                i64.div_s))
    "#,
    );
    assert_eq!(instance.call_export("div", &[7, 2]).unwrap(), vec![3]);
    assert_eq!(
        instance.call_export("div", &[1, 0]).unwrap_err(),
        Error::Trap(Trap::IntegerDivisionByZero)
    );
    let min = i32::MIN as u32 as u64;
    let minus_one = -1i32 as u32 as u64;
    assert_eq!(
        instance.call_export("div", &[min, minus_one]).unwrap_err(),
        Error::Trap(Trap::IntegerOverflow)
    );
    // rem of MIN by -1 is defined as 0, not a trap.
    assert_eq!(instance.call_export("rem", &[min, minus_one]).unwrap(), vec![0]);
    assert_eq!(
        instance
            .call_export("div64", &[i64::MIN as u64, -1i64 as u64])
            .unwrap_err(),
        Error::Trap(Trap::IntegerOverflow)
    );
}

#[test]
fn memory_grow_reports_previous_size_or_minus_one() {
    let mut instance = instantiate(
        r#"
        (module
            (memory 1 3)
            (func (export "grow") (param i32) (result i32)
                local.get 0
                memory.grow)
            (func (export "size") (result i32)
                memory.size))
    "#,
    );
    assert_eq!(instance.call_export("size", &[]).unwrap(), vec![1]);
    assert_eq!(instance.call_export("grow", &[1]).unwrap(), vec![1]);
    assert_eq!(instance.call_export("size", &[]).unwrap(), vec![2]);
    let minus_one = -1i32 as u32 as u64;
    assert_eq!(instance.call_export("grow", &[5]).unwrap(), vec![minus_one]);
    assert_eq!(instance.call_export("size", &[]).unwrap(), vec![2]);
}

#[test]
fn loop_accumulates_across_backward_branches() {
    let mut instance = instantiate(
        r#"
        (module
            (func (export "sum") (result i32)
                (local $i i32) (local $acc i32)
                loop $l
                    local.get $i
                    i32.const 1
                    i32.add
                    local.set $i
                    local.get $acc
                    local.get $i
                    i32.add
                    local.set $acc
                    local.get $i
                    i32.const 10
                    i32.lt_s
                    br_if $l
                end
                local.get $acc))
    "#,
    );
    assert_eq!(instance.call_export("sum", &[]).unwrap(), vec![55]);
}

#[test]
fn if_else_and_bare_if() {
    let mut instance = instantiate(
        r#"
        (module
            (func (export "pick") (param i32) (result i32)
                local.get 0
                if (result i32)
                    i32.const 100
                else
                    i32.const 200
                end)
            (func (export "maybe") (param i32) (result i32)
                (local $r i32)
                i32.const 7
                local.set $r
                local.get 0
                if
                    i32.const 9
                    local.set $r
                end
                local.get $r))
    "#,
    );
    assert_eq!(instance.call_export("pick", &[1]).unwrap(), vec![100]);
    assert_eq!(instance.call_export("pick", &[0]).unwrap(), vec![200]);
    assert_eq!(instance.call_export("maybe", &[1]).unwrap(), vec![9]);
    assert_eq!(instance.call_export("maybe", &[0]).unwrap(), vec![7]);
}

#[test]
fn select_pushes_the_first_value_when_nonzero() {
    let mut instance = instantiate(
        r#"
        (module
            (func (export "choose") (param i32) (result i32)
                i32.const 11
                i32.const 22
                local.get 0
                select))
    "#,
    );
    assert_eq!(instance.call_export("choose", &[1]).unwrap(), vec![11]);
    assert_eq!(instance.call_export("choose", &[0]).unwrap(), vec![22]);
}

#[test]
fn globals_persist_between_calls_and_are_host_visible() {
    let mut instance = instantiate(
        r#"
        (module
            (global $g (mut i32) (i32.const 5))
            (export "g" (global $g))
            (func (export "bump") (result i32)
                global.get $g
                i32.const 1
                i32.add
                global.set $g
                global.get $g))
    "#,
    );
    assert_eq!(instance.call_export("bump", &[]).unwrap(), vec![6]);
    assert_eq!(instance.get_global("g").unwrap(), 6);
    instance.set_global("g", 40).unwrap();
    assert_eq!(instance.call_export("bump", &[]).unwrap(), vec![41]);
}

#[test]
fn float_arithmetic_and_trapping_conversions() {
    let mut instance = instantiate(
        r#"
        (module
            (func (export "hyp") (param f64 f64) (result f64)
                local.get 0
                local.get 0
                f64.mul
                local.get 1
                local.get 1
                f64.mul
                f64.add
                f64.sqrt)
            (func (export "halve") (param f32) (result f32)
                local.get 0
                f32.const 2
                f32.div)
            (func (export "to_int") (param f64) (result i32)
                local.get 0
                i32.trunc_f64_s))
    "#,
    );
    let result = instance
        .call_export("hyp", &[3.0f64.to_bits(), 4.0f64.to_bits()])
        .unwrap();
    assert_eq!(result, vec![5.0f64.to_bits()]);

    let result = instance
        .call_export("halve", &[3.0f32.to_bits() as u64])
        .unwrap();
    assert_eq!(result, vec![1.5f32.to_bits() as u64]);

    assert_eq!(
        instance.call_export("to_int", &[(-2.7f64).to_bits()]).unwrap(),
        vec![-2i32 as u32 as u64]
    );
    assert_eq!(
        instance.call_export("to_int", &[f64::NAN.to_bits()]).unwrap_err(),
        Error::Trap(Trap::InvalidConversionToInteger)
    );
    assert_eq!(
        instance.call_export("to_int", &[3.0e10f64.to_bits()]).unwrap_err(),
        Error::Trap(Trap::IntegerOverflow)
    );
}

#[test]
fn i64_bit_twiddling() {
    let mut instance = instantiate(
        r#"
        (module
            (func (export "rot") (param i64 i64) (result i64)
                local.get 0
                local.get 1
                i64.rotl)
            (func (export "clz") (param i64) (result i64)
                local.get 0
                i64.clz)
            (func (export "popcnt") (param i64) (result i64)
                local.get 0
                i64.popcnt))
    "#,
    );
    assert_eq!(instance.call_export("rot", &[1, 1]).unwrap(), vec![2]);
    assert_eq!(instance.call_export("rot", &[1 << 63, 1]).unwrap(), vec![1]);
    assert_eq!(instance.call_export("clz", &[1]).unwrap(), vec![63]);
    assert_eq!(instance.call_export("popcnt", &[u64::MAX]).unwrap(), vec![64]);
}

#[test]
fn bulk_memory_init_copy_fill_and_drop() {
    let mut instance = instantiate(
        r#"
        (module
            (memory 1)
            (data $d "abcdef")
            (data (i32.const 0) "XYZ")
            (func (export "init") (param i32 i32 i32)
                local.get 0
                local.get 1
                local.get 2
                memory.init $d)
            (func (export "drop_seg")
                data.drop $d)
            (func (export "copy") (param i32 i32 i32)
                local.get 0
                local.get 1
                local.get 2
                memory.copy)
            (func (export "fill") (param i32 i32 i32)
                local.get 0
                local.get 1
                local.get 2
                memory.fill)
            (func (export "load8") (param i32) (result i32)
                local.get 0
                i32.load8_u))
    "#,
    );
    // Active segment applied at instantiation.
    assert_eq!(instance.call_export("load8", &[0]).unwrap(), vec![b'X' as u64]);

    instance.call_export("init", &[10, 1, 3]).unwrap();
    assert_eq!(instance.call_export("load8", &[10]).unwrap(), vec![b'b' as u64]);
    assert_eq!(instance.call_export("load8", &[12]).unwrap(), vec![b'd' as u64]);

    instance.call_export("copy", &[20, 10, 3]).unwrap();
    assert_eq!(instance.call_export("load8", &[22]).unwrap(), vec![b'd' as u64]);

    instance.call_export("fill", &[30, 65, 5]).unwrap();
    assert_eq!(instance.call_export("load8", &[34]).unwrap(), vec![65]);
    assert_eq!(
        instance.call_export("fill", &[65530, 1, 100]).unwrap_err(),
        Error::Trap(Trap::PointerOutOfBounds)
    );

    // Out-of-range segment reads trap.
    assert_eq!(
        instance.call_export("init", &[0, 4, 3]).unwrap_err(),
        Error::Trap(Trap::PointerOutOfBounds)
    );

    // After the drop the segment is empty; only the trivial init remains
    // in bounds.
    instance.call_export("drop_seg", &[]).unwrap();
    instance.call_export("init", &[0, 0, 0]).unwrap();
    assert_eq!(
        instance.call_export("init", &[0, 0, 1]).unwrap_err(),
        Error::Trap(Trap::PointerOutOfBounds)
    );
}

#[test]
fn table_init_grow_size_and_fill() {
    let mut instance = instantiate(
        r#"
        (module
            (type $v (func (result i32)))
            (table $t 3 10 funcref)
            (elem $e func $one $two)
            (func $one (type $v) i32.const 1)
            (func $two (type $v) i32.const 2)
            (func (export "tinit") (param i32 i32 i32)
                local.get 0
                local.get 1
                local.get 2
                table.init $t $e)
            (func (export "tsize") (result i32)
                table.size $t)
            (func (export "tgrow") (param i32) (result i32)
                ref.null func
                local.get 0
                table.grow $t)
            (func (export "tfill") (param i32 i32)
                local.get 0
                ref.func $one
                local.get 1
                table.fill $t)
            (func (export "call_at") (param i32) (result i32)
                local.get 0
                call_indirect $t (type $v)))
    "#,
    );
    assert_eq!(instance.call_export("tsize", &[]).unwrap(), vec![3]);

    instance.call_export("tinit", &[0, 0, 2]).unwrap();
    assert_eq!(instance.call_export("call_at", &[0]).unwrap(), vec![1]);
    assert_eq!(instance.call_export("call_at", &[1]).unwrap(), vec![2]);
    assert_eq!(
        instance.call_export("call_at", &[2]).unwrap_err(),
        Error::Trap(Trap::UndefinedElement)
    );

    assert_eq!(instance.call_export("tgrow", &[2]).unwrap(), vec![3]);
    assert_eq!(instance.call_export("tsize", &[]).unwrap(), vec![5]);
    let minus_one = -1i32 as u32 as u64;
    assert_eq!(instance.call_export("tgrow", &[20]).unwrap(), vec![minus_one]);

    instance.call_export("tfill", &[3, 2]).unwrap();
    assert_eq!(instance.call_export("call_at", &[3]).unwrap(), vec![1]);
    assert_eq!(instance.call_export("call_at", &[4]).unwrap(), vec![1]);
}

#[test]
fn early_return_keeps_the_result_value() {
    let mut instance = instantiate(
        r#"
        (module
            (func (export "early") (result i32)
                block
                    i32.const 42
                    return
                end
                i32.const 7))
    "#,
    );
    assert_eq!(instance.call_export("early", &[]).unwrap(), vec![42]);
}

#[test]
fn nested_calls_pass_arguments_and_results() {
    let mut instance = instantiate(
        r#"
        (module
            (func $double (param i32) (result i32)
                local.get 0
                i32.const 2
                i32.mul)
            (func (export "quad") (param i32) (result i32)
                local.get 0
                call $double
                call $double))
    "#,
    );
    assert_eq!(instance.call_export("quad", &[5]).unwrap(), vec![20]);
}

#[test]
fn export_surface_errors() {
    let mut instance = instantiate(
        r#"
        (module
            (memory (export "mem") 1)
            (func (export "one") (result i32) i32.const 1))
    "#,
    );
    assert_eq!(
        instance.call_export("nope", &[]).unwrap_err(),
        Error::ExportNotFound("nope".to_string())
    );
    assert_eq!(
        instance.call_export("mem", &[]).unwrap_err(),
        Error::ExportKindMismatch("mem".to_string())
    );
    assert_eq!(
        instance.call_export("one", &[1]).unwrap_err(),
        Error::InvalidFuncInputType
    );
    assert!(instance.get_memory().is_some());
}

#[test]
fn unreachable_traps() {
    let mut instance = instantiate(
        r#"(module (func (export "bad") unreachable))"#,
    );
    assert_eq!(
        instance.call_export("bad", &[]).unwrap_err(),
        Error::Trap(Trap::Unreachable)
    );
}
