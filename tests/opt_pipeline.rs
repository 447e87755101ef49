// tests/opt_pipeline.rs
//! End-to-end: parse a textual module, run the fold pass, and check the
//! printed result.

use wavefold::fold::run_on_function;
use wavefold::mir::parse_module;
use wavefold::target::WaveTarget;

fn optimize(src: &str) -> String {
    let mut funcs = parse_module(src).expect("input parses");
    let target = WaveTarget::new();
    let mut out = String::new();
    for func in &mut funcs {
        run_on_function(func, &target);
        out.push_str(&func.to_string());
    }
    out
}

#[test]
fn inline_constant_is_propagated_and_the_move_removed() {
    let out = optimize(
        "func @kernel {\n\
         block b0:\n\
         \x20 %0:s32 = s_mov_b32 7\n\
         \x20 %1:s32 = s_and_b32 %2:s32, %0\n\
         \x20 s_endpgm\n\
         }\n",
    );
    assert_eq!(
        out,
        "func @kernel {\n\
         block b0:\n\
         \x20 %1:s32 = s_and_b32 %2, 7\n\
         \x20 s_endpgm\n\
         }\n"
    );
}

#[test]
fn or_with_zero_collapses_to_a_copy_chain() {
    let out = optimize(
        "func @kernel {\n\
         block b0:\n\
         \x20 %0:v32 = v_mov_b32 0\n\
         \x20 %1:v32 = v_or_b32 %2:v32, %0\n\
         \x20 s_endpgm\n\
         }\n",
    );
    assert!(out.contains("%1:v32 = copy %2"), "got:\n{out}");
    assert!(!out.contains("v_or_b32"), "got:\n{out}");
    assert!(!out.contains("v_mov_b32"), "got:\n{out}");
}

#[test]
fn clamp_merge_survives_the_textual_round_trip() {
    let src = "func @kernel {\n\
               block b0:\n\
               \x20 %0:v32 = v_add_f32 %1:v32, %2:v32\n\
               \x20 %3:v32 = v_max_f32 %0, %0 clamp\n\
               \x20 scratch_store_b32 %3, %1, $sp, 0\n\
               \x20 s_endpgm\n\
               }\n";
    let out = optimize(src);
    assert!(out.contains("v_add_f32 %1, %2 clamp"), "got:\n{out}");
    assert!(!out.contains("v_max_f32"), "got:\n{out}");
    assert!(out.contains("scratch_store_b32 %0, %1, $sp, 0"), "got:\n{out}");

    // The optimized output parses again and is already a fixed point.
    let mut funcs = parse_module(&out).expect("output parses");
    let target = WaveTarget::new();
    assert!(!run_on_function(&mut funcs[0], &target));
    assert_eq!(funcs[0].to_string(), out);
}

#[test]
fn control_flow_is_preserved() {
    let src = "func @loopy {\n\
               block b0:\n\
               \x20 %0:s32 = s_mov_b32 1\n\
               \x20 s_branch b1\n\
               block b1:\n\
               \x20 %1:s32 = s_and_b32 %2:s32, %0\n\
               \x20 s_cbranch $carry, b1, b2\n\
               block b2:\n\
               \x20 s_endpgm\n\
               }\n";
    let out = optimize(src);
    assert!(out.contains("s_branch b1"), "got:\n{out}");
    assert!(out.contains("s_cbranch $carry, b1, b2"), "got:\n{out}");
    assert!(out.contains("s_and_b32 %2, 1"), "got:\n{out}");
}
