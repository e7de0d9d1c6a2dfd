//! End-to-end scenarios S1-S6, taken from spec.md §8: one literal IR program
//! per scenario, run through the full pipeline (text -> lower -> encode ->
//! load -> verify -> execute) and checked against its documented exit code
//! (or, for S6, its documented verify-time rejection).

use vitte_core_pipeline_tests::{compile_and_run, compile_and_verify, PipelineError};
use vitte_vitbc::{FunctionRow, MethodRow, Opcode, SbcModule, SigRow, AMBIGUOUS_FIELD};
use vitte_vm::{verify_module, ExecStatus, Value, VerifyError};

/// S1 (arithmetic): `enter 0; const.i32 7; const.i32 5; add.i32; ret` -> 12.
#[test]
fn s1_arithmetic_adds_two_constants() {
    let src = "\
sigs:
mainSig ret=i32 params=

func main locals=0 stack=8 sig=mainSig
enter 0
const.i32 7
const.i32 5
add.i32
ret
end

entry main
";
    let result = compile_and_run(src);
    assert_eq!(result.status, ExecStatus::Completed);
    assert_eq!(result.return_value, Some(Value::I32(12)));
}

/// S2 (loop): a local counter initialised to 0, looping while `< 3`
/// incrementing by 1, returning the local -> 3.
#[test]
fn s2_loop_counts_up_to_three() {
    let src = "\
sigs:
mainSig ret=i32 params=

func main locals=1 stack=8 sig=mainSig
locals: i:i32
enter 1
const.i32 0
stloc i
top:
ldloc i
const.i32 3
cmp.lt.i32
jmp.false done
ldloc i
const.i32 1
add.i32
stloc i
jmp top
done:
ldloc i
ret
end

entry main
";
    let result = compile_and_run(src);
    assert_eq!(result.status, ExecStatus::Completed);
    assert_eq!(result.return_value, Some(Value::I32(3)));
}

/// S3 (iterative fib): computes `fib(10)` via the same `a, b = b, a + b`
/// iterative pattern as the repo's `BuildFibIterModule` sample -> 55.
#[test]
fn s3_iterative_fib_of_ten_is_fifty_five() {
    let src = "\
sigs:
mainSig ret=i32 params=

func fib locals=4 stack=8 sig=mainSig
locals: a:i32, b:i32, tmp:i32, i:i32
enter 4
const.i32 0
stloc a
const.i32 1
stloc b
const.i32 0
stloc i
top:
ldloc i
const.i32 10
cmp.lt.i32
jmp.false done
ldloc a
ldloc b
add.i32
stloc tmp
ldloc b
stloc a
ldloc tmp
stloc b
ldloc i
const.i32 1
add.i32
stloc i
jmp top
done:
ldloc a
ret
end

entry fib
";
    let result = compile_and_run(src);
    assert_eq!(result.status, ExecStatus::Completed);
    assert_eq!(result.return_value, Some(Value::I32(55)));
}

/// S4 (string length): stores a 36-character literal in the const pool and
/// emits `const.string; string.len; ret` -> 36.
#[test]
fn s4_string_length_of_a_uuid_literal() {
    let src = "\
consts:
uuid string \"123e4567-e89b-12d3-a456-426614174000\"

sigs:
mainSig ret=i32 params=

func main locals=0 stack=4 sig=mainSig
enter 0
const.string uuid
string.len
ret
end

entry main
";
    let result = compile_and_run(src);
    assert_eq!(result.status, ExecStatus::Completed);
    assert_eq!(result.return_value, Some(Value::I32(36)));
}

/// S5 (object field): `Color{r,g,b,a}` field store/load through the
/// qualified `Type.field` form -> 255.
#[test]
fn s5_object_field_store_then_load() {
    let src = "\
types:
Color kind=artifact size=16
field r type=i32 offset=0
field g type=i32 offset=4
field b type=i32 offset=8
field a type=i32 offset=12

sigs:
mainSig ret=i32 params=

func main locals=0 stack=8 sig=mainSig
enter 0
newobj Color
dup
const.i32 255
stfld Color.r
ldfld Color.r
ret
end

entry main
";
    let result = compile_and_run(src);
    assert_eq!(result.status, ExecStatus::Completed);
    assert_eq!(result.return_value, Some(Value::I32(255)));
}

/// A sibling of S6 at the textual-IR layer: an undefined label is refused
/// at lowering, before a verifier even exists to reject it.
#[test]
fn undefined_jump_label_is_rejected_at_lowering_not_verify() {
    let src = "\
sigs:
mainSig ret=void params=

func main locals=0 stack=4 sig=mainSig
enter 0
jmp nowhere
ret
end
";
    // `nowhere` is never defined as a label, so lowering itself should
    // already refuse to assemble this function: an undefined label is
    // caught before the verifier even runs, which is a stronger guarantee
    // than the verifier's own "bad jump target" category (it never reaches
    // a form the verifier could accept).
    let err = compile_and_verify(src)
        .expect_err("program with an undefined jump target must not compile");
    assert!(
        matches!(err, PipelineError::Lower(_)),
        "expected a lowering-stage rejection, got: {err}"
    );
}

/// S6 (verify rejects bad branch), built directly at the table/bytecode
/// level since the textual IR's label resolution can never itself produce
/// an out-of-bounds target (every label binds to a real offset inside the
/// function it was declared in): `enter 0; jmp <far past the code end>; ret`
/// must be rejected by the verifier with `VerifyError::BadJumpTarget`, and
/// the interpreter must never be invoked on it.
#[test]
fn s6_verifier_rejects_a_jump_target_past_the_code_end() {
    let mut module = SbcModule::default();
    module.sigs.push(SigRow {
        ret_type_id: AMBIGUOUS_FIELD,
        param_count: 0,
        call_conv: 0,
        param_type_start: 0,
    });
    module.methods.push(MethodRow {
        name_str: 0,
        sig_id: 0,
        code_offset: 0,
        local_count: 0,
        flags: 0,
    });

    let mut code = Vec::new();
    code.push(Opcode::Enter as u8);
    code.extend_from_slice(&0u16.to_le_bytes());
    code.push(Opcode::Jmp as u8);
    code.extend_from_slice(&1000i32.to_le_bytes()); // delta lands far past the function body
    code.push(Opcode::Ret as u8);

    module.functions.push(FunctionRow {
        method_id: 0,
        code_offset: 0,
        code_size: code.len() as u32,
        stack_max: 4,
    });
    module.code = code;
    module.entry_method_id = 0;

    let err = verify_module(&module).expect_err("a jump past the code end must be rejected");
    assert!(
        matches!(err, VerifyError::BadJumpTarget { .. }),
        "expected BadJumpTarget, got: {err}"
    );
}
