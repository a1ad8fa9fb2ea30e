//! End-to-end tests for the emission pipeline: emit, verify, execute

use emc_ir::{
    ComparisonType, IREmitter, IRFunctionEmitter, Interpreter, Linkage, Module, OperatorType,
    RtVal, ValueType,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn define_int_fn(emitter: &mut IREmitter, name: &str) {
    emitter
        .define_function(
            name,
            &ValueType::Int32,
            Linkage::External,
            &vec![("x".to_string(), ValueType::Int32)],
        )
        .unwrap();
}

#[test]
fn test_affine_function_end_to_end() {
    init_logging();
    let mut emitter = IREmitter::new("predictor");
    define_int_fn(&mut emitter, "affine");
    let mut fe = IRFunctionEmitter::new(&mut emitter, "affine").unwrap();
    let x = fe.arg(0).unwrap();
    let two = fe.literal_i32(2);
    let scaled = fe.op(OperatorType::Multiply, x, two).unwrap();
    let one = fe.literal_i32(1);
    let result = fe.op(OperatorType::Add, scaled, one).unwrap();
    fe.ret(result).unwrap();
    fe.verify().unwrap();

    let module = emitter.into_module();
    let mut interp = Interpreter::new(&module);
    assert_eq!(
        interp.run("affine", &[RtVal::Int(10)]).unwrap(),
        Some(RtVal::Int(21))
    );
}

#[test]
fn test_weighted_sum_over_global_array() {
    init_logging();
    let mut emitter = IREmitter::new("predictor");
    emitter.global_double_array("weights", &[0.5, 1.5, 2.5, 3.5]);
    emitter
        .define_function("weighted_sum", &ValueType::Double, Linkage::External, &vec![])
        .unwrap();
    let mut fe = IRFunctionEmitter::new(&mut emitter, "weighted_sum").unwrap();
    let acc = fe.var(&ValueType::Double).unwrap();
    let zero = fe.literal_f64(0.0);
    fe.store(acc.clone(), zero).unwrap();

    let mut lp = fe.for_loop();
    lp.begin(&mut fe, 4).unwrap();
    lp.enter_body(&mut fe).unwrap();
    let i = lp.iteration_var(&mut fe).unwrap();
    let weight = fe.global_value_at("weights", i.clone()).unwrap();
    // integer index promotes to double in the product
    let term = fe.op(OperatorType::Multiply, weight, i).unwrap();
    fe.op_and_update(acc.clone(), OperatorType::Add, term)
        .unwrap();
    lp.end(&mut fe).unwrap();

    let total = fe.load(acc).unwrap();
    fe.ret(total).unwrap();
    fe.verify().unwrap();

    let module = emitter.into_module();
    let mut interp = Interpreter::new(&module);
    // 0.5*0 + 1.5*1 + 2.5*2 + 3.5*3
    assert_eq!(
        interp.run("weighted_sum", &[]).unwrap(),
        Some(RtVal::Double(17.0))
    );
}

#[test]
fn test_conditional_inside_loop() {
    init_logging();
    let mut emitter = IREmitter::new("predictor");
    define_int_fn(&mut emitter, "sum_even_below_ten");
    let mut fe = IRFunctionEmitter::new(&mut emitter, "sum_even_below_ten").unwrap();
    let sum = fe.var(&ValueType::Int32).unwrap();
    let zero = fe.literal_i32(0);
    fe.store(sum.clone(), zero).unwrap();

    let mut lp = fe.for_loop();
    lp.begin(&mut fe, 10).unwrap();
    lp.enter_body(&mut fe).unwrap();
    let i = lp.iteration_var(&mut fe).unwrap();
    let two = fe.literal_i32(2);
    let parity = fe.op(OperatorType::Modulo, i.clone(), two).unwrap();

    let mut even = fe.if_();
    let zero = fe.literal_i32(0);
    even.begin_cmp(&mut fe, ComparisonType::Eq, parity, zero)
        .unwrap();
    fe.op_and_update(sum.clone(), OperatorType::Add, i).unwrap();
    even.end(&mut fe).unwrap();
    lp.end(&mut fe).unwrap();

    let total = fe.load(sum).unwrap();
    fe.ret(total).unwrap();
    fe.verify().unwrap();

    let module = emitter.into_module();
    let mut interp = Interpreter::new(&module);
    // 0 + 2 + 4 + 6 + 8
    assert_eq!(
        interp.run("sum_even_below_ten", &[RtVal::Int(0)]).unwrap(),
        Some(RtVal::Int(20))
    );
}

#[test]
fn test_phi_join_selects_per_path_value() {
    init_logging();
    let mut emitter = IREmitter::new("predictor");
    define_int_fn(&mut emitter, "sign");
    let mut fe = IRFunctionEmitter::new(&mut emitter, "sign").unwrap();
    let x = fe.arg(0).unwrap();
    let zero = fe.literal_i32(0);

    let mut branch = fe.if_();
    branch
        .begin_cmp(&mut fe, ComparisonType::Lt, x, zero)
        .unwrap();
    let then_block = fe.current_block().unwrap();
    branch.else_(&mut fe).unwrap();
    let else_block = fe.current_block().unwrap();
    branch.end(&mut fe).unwrap();

    let minus_one = fe.literal_i32(-1);
    let plus_one = fe.literal_i32(1);
    let sign = fe
        .emitter()
        .phi(&ValueType::Int32, minus_one, then_block, plus_one, else_block)
        .unwrap();
    fe.ret(sign).unwrap();
    fe.verify().unwrap();

    let module = emitter.into_module();
    let mut interp = Interpreter::new(&module);
    assert_eq!(
        interp.run("sign", &[RtVal::Int(-3)]).unwrap(),
        Some(RtVal::Int(-1))
    );
    assert_eq!(
        interp.run("sign", &[RtVal::Int(3)]).unwrap(),
        Some(RtVal::Int(1))
    );
}

#[test]
fn test_heap_buffer_pipeline() {
    init_logging();
    let mut emitter = IREmitter::new("predictor");
    emitter
        .define_function("scale", &ValueType::Double, Linkage::External, &vec![])
        .unwrap();
    let mut fe = IRFunctionEmitter::new(&mut emitter, "scale").unwrap();

    let buf = fe.malloc(&ValueType::Double, 8).unwrap();
    let mut fill = fe.for_loop();
    fill.begin(&mut fe, 8).unwrap();
    fill.enter_body(&mut fe).unwrap();
    let i = fill.iteration_var(&mut fe).unwrap();
    let half = fe.literal_f64(0.5);
    let value = fe.op(OperatorType::Multiply, i.clone(), half).unwrap();
    fe.set_value_at_h(buf.clone(), i, value).unwrap();
    fill.end(&mut fe).unwrap();

    let last = fe.literal_i32(7);
    let loaded = fe.value_at_h(buf.clone(), last).unwrap();
    fe.free(buf).unwrap();
    fe.ret(loaded).unwrap();
    fe.verify().unwrap();

    let module = emitter.into_module();
    let mut interp = Interpreter::new(&module);
    assert_eq!(
        interp.run("scale", &[]).unwrap(),
        Some(RtVal::Double(3.5))
    );
}

#[test]
fn test_output_capture_through_runtime_calls() {
    init_logging();
    let mut emitter = IREmitter::new("predictor");
    emitter
        .define_function("report", &ValueType::Void, Linkage::External, &vec![])
        .unwrap();
    let mut fe = IRFunctionEmitter::new(&mut emitter, "report").unwrap();
    fe.print("scores: ").unwrap();

    let mut lp = fe.for_loop();
    lp.begin(&mut fe, 3).unwrap();
    lp.enter_body(&mut fe).unwrap();
    let i = lp.iteration_var(&mut fe).unwrap();
    let fmt = fe.literal_string("%d ");
    fe.printf(&[fmt, i]).unwrap();
    lp.end(&mut fe).unwrap();

    fe.ret_void().unwrap();
    fe.verify().unwrap();

    let module = emitter.into_module();
    let mut interp = Interpreter::new(&module);
    interp.run("report", &[]).unwrap();
    assert_eq!(interp.output(), "scores: 0 1 2 ");
}

#[test]
fn test_widen_then_narrow_round_trip() {
    init_logging();
    let mut emitter = IREmitter::new("predictor");
    define_int_fn(&mut emitter, "through_double");
    let mut fe = IRFunctionEmitter::new(&mut emitter, "through_double").unwrap();
    let x = fe.arg(0).unwrap();
    let widened = fe.cast(x, &ValueType::Double).unwrap();
    let narrowed = fe.cast_float_to_int(widened).unwrap();
    fe.ret(narrowed).unwrap();
    fe.verify().unwrap();

    let module = emitter.into_module();
    let mut interp = Interpreter::new(&module);
    assert_eq!(
        interp.run("through_double", &[RtVal::Int(42)]).unwrap(),
        Some(RtVal::Int(42))
    );
}

#[test]
fn test_module_serde_round_trip() {
    init_logging();
    let mut emitter = IREmitter::new("predictor");
    emitter.global_double_array("weights", &[1.0, 2.0]);
    define_int_fn(&mut emitter, "affine");
    let mut fe = IRFunctionEmitter::new(&mut emitter, "affine").unwrap();
    let x = fe.arg(0).unwrap();
    let three = fe.literal_i32(3);
    let result = fe.op(OperatorType::Add, x, three).unwrap();
    fe.ret(result).unwrap();
    fe.verify().unwrap();

    let module = emitter.into_module();
    let json = serde_json::to_string(&module).unwrap();
    let restored: Module = serde_json::from_str(&json).unwrap();
    assert_eq!(module, restored);

    // a deserialized module still runs
    let mut interp = Interpreter::new(&restored);
    assert_eq!(
        interp.run("affine", &[RtVal::Int(4)]).unwrap(),
        Some(RtVal::Int(7))
    );
}

#[test]
fn test_verifier_gates_malformed_functions() {
    init_logging();
    let mut emitter = IREmitter::new("predictor");
    define_int_fn(&mut emitter, "broken");
    let fe = IRFunctionEmitter::new(&mut emitter, "broken").unwrap();
    // the entry block was never terminated
    let err = fe.verify().unwrap_err();
    assert!(err.to_string().contains("broken"));

    emc_ir::verify_module(emitter.module()).unwrap_err();
}

#[test]
fn test_textual_ir_mentions_structure() {
    init_logging();
    let mut emitter = IREmitter::new("predictor");
    define_int_fn(&mut emitter, "affine");
    let mut fe = IRFunctionEmitter::new(&mut emitter, "affine").unwrap();
    let x = fe.arg(0).unwrap();
    let two = fe.literal_i32(2);
    let result = fe.op(OperatorType::Multiply, x, two).unwrap();
    fe.ret(result).unwrap();

    let printed = emitter.module().to_string();
    assert!(printed.contains("define i32 @affine(i32 %0)"));
    assert!(printed.contains("entry:"));
    assert!(printed.contains("mul i32"));
    assert!(printed.contains("ret"));
}
