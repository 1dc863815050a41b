use std::sync::Arc;

use proptest::prelude::*;

use super::*;
use crate::class::ExceptionEntry;
use crate::cpool::{CPool, CpEntry, CpTag, MethodRefEntry, NameAndTypeEntry};
use crate::opcodes as op;

fn setup() {
    crate::globals::init_globals("test");
    classloader::init().unwrap();
    classloader::load_base_classes();
}

/// Pushes a synthetic caller, then a frame running `code`, and executes it.
fn exec_with_cp(
    code: Vec<u8>,
    locals: Vec<JvmValue>,
    cp: Option<CPool>,
) -> Result<FrameStack, JvmEx> {
    let mut fs = FrameStack::new(1);
    fs.push_frame(Frame::with_capacity(10)).unwrap();
    let mut callee = Frame::with_capacity(10);
    callee.cl_name = "test/Scenario".into();
    callee.meth_name = "run".into();
    callee.meth = Arc::new(code);
    callee.locals = locals;
    if let Some(cp) = cp {
        callee.cp = Arc::new(cp);
    }
    fs.push_frame(callee).unwrap();
    run_frame(&mut fs)?;
    Ok(fs)
}

fn exec(code: Vec<u8>, locals: Vec<JvmValue>) -> Result<FrameStack, JvmEx> {
    exec_with_cp(code, locals, None)
}

fn caller_int(fs: &mut FrameStack) -> i64 {
    let f = fs.top_mut().unwrap();
    match f.pop().unwrap() {
        JvmValue::Int(i) => i,
        other => panic!("caller TOS should be an int, got {other:?}"),
    }
}

fn int_binop(opcode: u8, a: i64, b: i64) -> Result<i64, JvmEx> {
    let code = vec![op::ILOAD_0, op::ILOAD_1, opcode, op::IRETURN];
    let mut fs = exec(code, vec![JvmValue::Int(a), JvmValue::Int(b)])?;
    Ok(caller_int(&mut fs))
}

#[test]
fn iload_iconst_iadd_ireturn_delivers_to_caller() {
    setup();
    let code = vec![op::ILOAD_0, op::ICONST_1, op::IADD, op::IRETURN];
    let mut fs = exec(code, vec![JvmValue::Int(27)]).unwrap();
    // the caller's TOS is one higher than before the call
    let caller = fs.top_mut().unwrap();
    assert_eq!(caller.tos, 0);
    assert_eq!(caller.pop().unwrap(), JvmValue::Int(28));
}

#[test]
fn plain_return_leaves_caller_tos_unchanged() {
    setup();
    let fs = exec(vec![op::RETURN], vec![]).unwrap();
    assert_eq!(fs.top().unwrap().tos, -1);
}

fn ldc_literal_pool(literal: &str) -> CPool {
    let mut cp = CPool::new();
    cp.cp_index = vec![CpEntry::default(); 3];
    cp.cp_index[1] = CpEntry::new(CpTag::Utf8, 0);
    cp.utf8s = vec![literal.to_string()];
    cp
}

fn ldc_string_index(fs: &mut FrameStack, literal: &str) -> u32 {
    let caller = fs.top_mut().unwrap();
    match caller.pop().unwrap() {
        JvmValue::Ref(r) => {
            let obj = r.lock().unwrap();
            assert_eq!(
                object::string_from_string_object(&obj).as_deref(),
                Some(literal)
            );
            match obj.field("value").unwrap().fvalue {
                FieldValue::StrIdx(idx) => idx,
                ref other => panic!("LDC value should be a pool index, got {other:?}"),
            }
        }
        other => panic!("LDC should push a String object, got {other:?}"),
    }
}

#[test]
fn ldc_pushes_string_object_and_interns_once() {
    setup();
    let literal = "hello, constant pool";
    let before = string_pool::size();

    let mut fs =
        exec_with_cp(vec![op::LDC, 1, op::ARETURN], vec![], Some(ldc_literal_pool(literal)))
            .unwrap();
    let idx1 = ldc_string_index(&mut fs, literal);
    // the literal was new, so it was appended past the snapshot point
    assert!(idx1 as usize >= before);
    assert_eq!(string_pool::get(idx1), Some(literal));

    // a second LDC of the same literal reuses the interned entry
    let mut fs =
        exec_with_cp(vec![op::LDC, 1, op::ARETURN], vec![], Some(ldc_literal_pool(literal)))
            .unwrap();
    let idx2 = ldc_string_index(&mut fs, literal);
    assert_eq!(idx1, idx2);
}

fn tableswitch_code() -> Vec<u8> {
    // 0: iload_0
    // 1: tableswitch (pad to 4), default->34, low=0, high=2, targets 28/30/32
    let mut code = vec![op::ILOAD_0, op::TABLESWITCH, 0, 0];
    let put = |code: &mut Vec<u8>, v: i32| code.extend_from_slice(&v.to_be_bytes());
    put(&mut code, 33); // default: 1 + 33 = 34
    put(&mut code, 0); // low
    put(&mut code, 2); // high
    put(&mut code, 27); // case 0 -> 28
    put(&mut code, 29); // case 1 -> 30
    put(&mut code, 31); // case 2 -> 32
    code.extend_from_slice(&[op::ICONST_0, op::IRETURN]); // 28
    code.extend_from_slice(&[op::ICONST_1, op::IRETURN]); // 30
    code.extend_from_slice(&[op::ICONST_2, op::IRETURN]); // 32
    code.extend_from_slice(&[op::ICONST_M1, op::IRETURN]); // 34
    code
}

#[test]
fn tableswitch_selects_case_and_default() {
    setup();
    let mut fs = exec(tableswitch_code(), vec![JvmValue::Int(0)]).unwrap();
    assert_eq!(caller_int(&mut fs), 0);
    let mut fs = exec(tableswitch_code(), vec![JvmValue::Int(2)]).unwrap();
    assert_eq!(caller_int(&mut fs), 2);
    let mut fs = exec(tableswitch_code(), vec![JvmValue::Int(10)]).unwrap();
    assert_eq!(caller_int(&mut fs), -1);
}

#[test]
fn lookupswitch_matches_sorted_pairs() {
    setup();
    // 0: iload_0, 1: lookupswitch (pad to 4), default->32, npairs=2,
    // pairs: (5 -> 28), (100 -> 30)
    let mut code = vec![op::ILOAD_0, op::LOOKUPSWITCH, 0, 0];
    let put = |code: &mut Vec<u8>, v: i32| code.extend_from_slice(&v.to_be_bytes());
    put(&mut code, 31); // default: 1 + 31 = 32
    put(&mut code, 2); // npairs
    put(&mut code, 5);
    put(&mut code, 27); // 1 + 27 = 28
    put(&mut code, 100);
    put(&mut code, 29); // 1 + 29 = 30
    code.extend_from_slice(&[op::ICONST_1, op::IRETURN]); // 28
    code.extend_from_slice(&[op::ICONST_2, op::IRETURN]); // 30
    code.extend_from_slice(&[op::ICONST_M1, op::IRETURN]); // 32

    let mut fs = exec(code.clone(), vec![JvmValue::Int(5)]).unwrap();
    assert_eq!(caller_int(&mut fs), 1);
    let mut fs = exec(code.clone(), vec![JvmValue::Int(100)]).unwrap();
    assert_eq!(caller_int(&mut fs), 2);
    let mut fs = exec(code, vec![JvmValue::Int(6)]).unwrap();
    assert_eq!(caller_int(&mut fs), -1);
}

fn string_classref_pool() -> CPool {
    let mut cp = CPool::new();
    cp.cp_index = vec![CpEntry::default(); 3];
    cp.cp_index[1] = CpEntry::new(CpTag::ClassRef, 0);
    cp.class_refs = vec![string_pool::STRING];
    cp
}

#[test]
fn instanceof_string_object_and_null() {
    setup();
    let code = vec![op::ALOAD_0, op::INSTANCEOF, 0, 1, op::IRETURN];
    let s = object::make_ref(object::string_object_from_str("hello world"));
    let mut fs = exec_with_cp(code.clone(), vec![s], Some(string_classref_pool())).unwrap();
    assert_eq!(caller_int(&mut fs), 1);

    let mut fs =
        exec_with_cp(code, vec![JvmValue::Null], Some(string_classref_pool())).unwrap();
    assert_eq!(caller_int(&mut fs), 0);
}

#[test]
fn checkcast_null_passes_and_mismatch_throws() {
    setup();
    let code = vec![op::ALOAD_0, op::CHECKCAST, 0, 1, op::RETURN];
    exec_with_cp(code.clone(), vec![JvmValue::Null], Some(string_classref_pool())).unwrap();

    let not_a_string = object::make_ref(object::Object::with_class("java/lang/Throwable"));
    let err = exec_with_cp(code, vec![not_a_string], Some(string_classref_pool())).unwrap_err();
    assert_eq!(err.kind, ExcKind::ClassCast);
}

#[test]
fn ishr_and_iushr_on_negative_input() {
    setup();
    // push -200, push 3, shift
    let code = vec![op::SIPUSH, 0xFF, 0x38, op::ICONST_3, op::ISHR, op::IRETURN];
    let mut fs = exec(code, vec![]).unwrap();
    assert_eq!(caller_int(&mut fs), -25);

    let code = vec![op::SIPUSH, 0xFF, 0x38, op::ICONST_3, op::IUSHR, op::IRETURN];
    let mut fs = exec(code, vec![]).unwrap();
    assert_eq!(caller_int(&mut fs), ((-200i64 as u64) >> 3) as i64);
}

#[test]
fn integer_division_by_zero_throws() {
    setup();
    let err = int_binop(op::IDIV, 1, 0).unwrap_err();
    assert_eq!(err.kind, ExcKind::Arithmetic);
    let err = int_binop(op::IREM, 7, 0).unwrap_err();
    assert_eq!(err.kind, ExcKind::Arithmetic);
}

#[test]
fn float_division_follows_ieee() {
    setup();
    let code = vec![op::FCONST_1, op::FCONST_0, op::FDIV, op::FRETURN];
    let mut fs = exec(code, vec![]).unwrap();
    match fs.top_mut().unwrap().pop().unwrap() {
        JvmValue::Float(v) => assert!(v.is_infinite() && v > 0.0),
        other => panic!("expected +Inf, got {other:?}"),
    }
}

#[test]
fn handler_catches_division_by_zero() {
    setup();
    // try { 1/0 } catch (any) { return -1 }
    let code = vec![
        op::ICONST_1,  // 0
        op::ICONST_0,  // 1
        op::IDIV,      // 2
        op::IRETURN,   // 3
        op::POP,       // 4: handler, discard the exception ref
        op::ICONST_M1, // 5
        op::IRETURN,   // 6
    ];
    let mut fs = FrameStack::new(1);
    fs.push_frame(Frame::with_capacity(4)).unwrap();
    let mut callee = Frame::with_capacity(4);
    callee.meth = Arc::new(code);
    callee.exceptions.push(ExceptionEntry {
        start_pc: 0,
        end_pc: 4,
        handler_pc: 4,
        catch_type: 0,
    });
    fs.push_frame(callee).unwrap();
    run_frame(&mut fs).unwrap();
    assert_eq!(caller_int(&mut fs), -1);
}

#[test]
fn athrow_unwinds_to_matching_frame() {
    setup();
    // the thrown NPE is rethrown out of the frame; no handler catches it
    let code = vec![op::ACONST_NULL, op::ATHROW];
    let err = exec(code, vec![]).unwrap_err();
    assert_eq!(err.kind, ExcKind::NullPointer);
}

#[test]
fn conversions_saturate_and_truncate() {
    setup();
    // i2b truncates
    let code = vec![op::SIPUSH, 0x01, 0x80, op::I2B, op::IRETURN]; // 0x0180 -> -128
    let mut fs = exec(code, vec![]).unwrap();
    assert_eq!(caller_int(&mut fs), -128);

    // i2c zero-extends to 16 bits
    let code = vec![op::ICONST_M1, op::I2C, op::IRETURN];
    let mut fs = exec(code, vec![]).unwrap();
    assert_eq!(caller_int(&mut fs), 0xFFFF);

    // d2l saturates on overflow
    let code = vec![op::DCONST_1, op::DCONST_1, op::DADD, op::D2L, op::LRETURN];
    let mut fs = exec(code, vec![]).unwrap();
    assert_eq!(caller_int(&mut fs), 2);
}

#[test]
fn lcmp_and_fcmp_nan_handling() {
    setup();
    let code = vec![op::LCONST_1, op::LCONST_0, op::LCMP, op::IRETURN];
    let mut fs = exec(code, vec![]).unwrap();
    assert_eq!(caller_int(&mut fs), 1);

    // 0.0/0.0 is NaN; FCMPL says -1, FCMPG says +1
    let nan_cmp = |cmp_op: u8| {
        let code = vec![
            op::FCONST_0,
            op::FCONST_0,
            op::FDIV,
            op::FCONST_0,
            cmp_op,
            op::IRETURN,
        ];
        let mut fs = exec(code, vec![]).unwrap();
        caller_int(&mut fs)
    };
    assert_eq!(nan_cmp(op::FCMPL), -1);
    assert_eq!(nan_cmp(op::FCMPG), 1);
}

#[test]
fn newarray_length_and_bounds() {
    setup();
    // new int[5]; a[3] = 7; return a[3]
    let code = vec![
        op::ICONST_5,
        op::NEWARRAY,
        10, // T_INT
        op::ASTORE_0,
        op::ALOAD_0,
        op::ICONST_3,
        op::BIPUSH,
        7,
        op::IASTORE,
        op::ALOAD_0,
        op::ICONST_3,
        op::IALOAD,
        op::IRETURN,
    ];
    let mut fs = exec(code, vec![JvmValue::Null]).unwrap();
    assert_eq!(caller_int(&mut fs), 7);

    // out-of-bounds store throws
    let code = vec![
        op::ICONST_2,
        op::NEWARRAY,
        10,
        op::ASTORE_0,
        op::ALOAD_0,
        op::ICONST_5,
        op::BIPUSH,
        7,
        op::IASTORE,
        op::RETURN,
    ];
    let err = exec(code, vec![JvmValue::Null]).unwrap_err();
    assert_eq!(err.kind, ExcKind::ArrayIndexOutOfBounds);

    // negative length throws
    let code = vec![op::ICONST_M1, op::NEWARRAY, 10, op::RETURN];
    let err = exec(code, vec![]).unwrap_err();
    assert_eq!(err.kind, ExcKind::NegativeArraySize);
}

#[test]
fn arraylength_and_anewarray() {
    setup();
    let code = vec![
        op::ICONST_4,
        op::ANEWARRAY,
        0,
        1,
        op::ARRAYLENGTH,
        op::IRETURN,
    ];
    let mut fs = exec_with_cp(code, vec![], Some(string_classref_pool())).unwrap();
    assert_eq!(caller_int(&mut fs), 4);
}

#[test]
fn iinc_adds_signed_delta() {
    setup();
    let code = vec![op::IINC, 0, 0xFB, op::ILOAD_0, op::IRETURN]; // delta -5
    let mut fs = exec(code, vec![JvmValue::Int(100)]).unwrap();
    assert_eq!(caller_int(&mut fs), 95);
}

#[test]
fn wide_iinc_and_loads() {
    setup();
    let code = vec![
        op::WIDE,
        op::IINC,
        0,
        0,
        0x01,
        0x00, // locals[0] += 256
        op::WIDE,
        op::ILOAD,
        0,
        0,
        op::IRETURN,
    ];
    let mut fs = exec(code, vec![JvmValue::Int(1)]).unwrap();
    assert_eq!(caller_int(&mut fs), 257);
}

#[test]
fn goto_and_ifnull_flow() {
    setup();
    // if (locals[0] == null) return 1; else return 0;
    let code = vec![
        op::ALOAD_0,   // 0
        op::IFNULL,    // 1 (+5 -> 6)
        0,
        5,
        op::ICONST_0, // 4
        op::IRETURN,  // 5
        op::ICONST_1, // 6
        op::IRETURN,  // 7
    ];
    let mut fs = exec(code.clone(), vec![JvmValue::Null]).unwrap();
    assert_eq!(caller_int(&mut fs), 1);
    let obj = object::make_ref(object::Object::new_empty());
    let mut fs = exec(code, vec![obj]).unwrap();
    assert_eq!(caller_int(&mut fs), 0);
}

fn string_method_pool(meth: &str, desc: &str) -> CPool {
    let mut cp = CPool::new();
    cp.cp_index = vec![CpEntry::default(); 8];
    cp.cp_index[1] = CpEntry::new(CpTag::Utf8, 0); // a literal for LDC
    cp.cp_index[2] = CpEntry::new(CpTag::MethodRef, 0);
    cp.cp_index[3] = CpEntry::new(CpTag::ClassRef, 0);
    cp.cp_index[4] = CpEntry::new(CpTag::NameAndType, 0);
    cp.cp_index[5] = CpEntry::new(CpTag::Utf8, 1);
    cp.cp_index[6] = CpEntry::new(CpTag::Utf8, 2);
    cp.utf8s = vec!["abc".to_string(), meth.to_string(), desc.to_string()];
    cp.method_refs = vec![MethodRefEntry {
        class_index: 3,
        name_and_type: 4,
    }];
    cp.class_refs = vec![string_pool::STRING];
    cp.name_and_types = vec![NameAndTypeEntry {
        name_index: 5,
        desc_index: 6,
    }];
    cp
}

#[test]
fn invokevirtual_dispatches_string_intrinsic() {
    setup();
    let cp = string_method_pool("length", "()I");
    let code = vec![op::LDC, 1, op::INVOKEVIRTUAL, 0, 2, op::IRETURN];
    let mut fs = exec_with_cp(code, vec![], Some(cp)).unwrap();
    assert_eq!(caller_int(&mut fs), 3);
}

#[test]
fn invokestatic_dispatches_value_of() {
    setup();
    let cp = string_method_pool("valueOf", "(I)Ljava/lang/String;");
    let code = vec![op::BIPUSH, 42, op::INVOKESTATIC, 0, 2, op::ARETURN];
    let mut fs = exec_with_cp(code, vec![], Some(cp)).unwrap();
    match fs.top_mut().unwrap().pop().unwrap() {
        JvmValue::Ref(r) => {
            assert_eq!(
                object::string_from_string_object(&r.lock().unwrap()).as_deref(),
                Some("42")
            );
        }
        other => panic!("valueOf should return a String, got {other:?}"),
    }
}

#[test]
fn invokevirtual_on_null_receiver_is_npe() {
    setup();
    let cp = string_method_pool("length", "()I");
    let code = vec![op::ACONST_NULL, op::INVOKEVIRTUAL, 0, 2, op::IRETURN];
    let err = exec_with_cp(code, vec![], Some(cp)).unwrap_err();
    assert_eq!(err.kind, ExcKind::NullPointer);
}

#[test]
fn invoke_on_wrong_cp_tag_reports_expected_method_ref() {
    setup();
    let code = vec![op::INVOKEVIRTUAL, 0, 1, op::RETURN];
    let err = exec_with_cp(code, vec![], Some(string_classref_pool())).unwrap_err();
    assert_eq!(err.kind, ExcKind::Internal);
    assert!(err.msg.contains("Expected a method ref, but got"));
}

#[test]
fn dup_and_swap_shapes() {
    setup();
    let code = vec![op::ICONST_1, op::ICONST_2, op::SWAP, op::ISUB, op::IRETURN];
    let mut fs = exec(code, vec![]).unwrap();
    assert_eq!(caller_int(&mut fs), 1); // 2 - 1

    let code = vec![op::ICONST_3, op::DUP, op::IMUL, op::IRETURN];
    let mut fs = exec(code, vec![]).unwrap();
    assert_eq!(caller_int(&mut fs), 9);

    // dup_x1: xy -> yxy; (2,3) -> 3,2,3; isub twice: 3-(2-3)... exercise shape
    let code = vec![
        op::ICONST_2,
        op::ICONST_3,
        op::DUP_X1,
        op::ISUB,
        op::ISUB,
        op::IRETURN,
    ];
    let mut fs = exec(code, vec![]).unwrap();
    assert_eq!(caller_int(&mut fs), 4); // 3 - (2 - 3)
}

#[test]
fn long_arithmetic_uses_two_slots() {
    setup();
    let code = vec![
        op::LLOAD_0,
        op::LLOAD_2,
        op::LADD,
        op::LRETURN,
    ];
    let locals = vec![
        JvmValue::Int(1i64 << 40),
        JvmValue::Int(1i64 << 40),
        JvmValue::Int(5),
        JvmValue::Int(5),
    ];
    let mut fs = exec(code, locals).unwrap();
    assert_eq!(caller_int(&mut fs), (1i64 << 40) + 5);
}

proptest! {
    #[test]
    fn iadd_is_wrapping_two_complement(a: i64, b: i64) {
        setup();
        prop_assert_eq!(int_binop(op::IADD, a, b).unwrap(), a.wrapping_add(b));
    }

    #[test]
    fn isub_and_imul_wrap(a: i64, b: i64) {
        setup();
        prop_assert_eq!(int_binop(op::ISUB, a, b).unwrap(), a.wrapping_sub(b));
        prop_assert_eq!(int_binop(op::IMUL, a, b).unwrap(), a.wrapping_mul(b));
    }

    #[test]
    fn irem_satisfies_division_identity(a: i64, b in prop::num::i64::ANY.prop_filter("nonzero", |v| *v != 0)) {
        setup();
        let rem = int_binop(op::IREM, a, b).unwrap();
        let quot = int_binop(op::IDIV, a, b).unwrap();
        prop_assert_eq!(rem, a.wrapping_sub(quot.wrapping_mul(b)));
    }

    #[test]
    fn shifts_mask_their_counts(a: i64, s in 0i64..64) {
        setup();
        let code = vec![op::ILOAD_0, op::ILOAD_1, op::ISHR, op::IRETURN];
        let mut fs = exec(code, vec![JvmValue::Int(a), JvmValue::Int(s)]).unwrap();
        prop_assert_eq!(caller_int(&mut fs), a >> (s & 0x1F));
    }

    #[test]
    fn ineg_is_wrapping_negation(a: i64) {
        setup();
        let code = vec![op::ILOAD_0, op::INEG, op::IRETURN];
        let mut fs = exec(code, vec![JvmValue::Int(a)]).unwrap();
        prop_assert_eq!(caller_int(&mut fs), a.wrapping_neg());
    }
}
