use std::{fs, path::Path};

use asmpp_core::{
    CounterScope, DefineTable, Dialect, EvalError, Preprocessor, RewriteOptions, ScopeMarkers,
    UnbalancedClose,
    diag::{Diag, codes, has_errors},
    rewrite_source_text,
};
use pretty_assertions::assert_eq;
use tempfile::tempdir;

fn bare_options() -> RewriteOptions {
    RewriteOptions {
        line_markers: false,
        ..RewriteOptions::default()
    }
}

fn rewrite(text: &str) -> String {
    let (out, diags) = rewrite_source_text(text, &bare_options());
    assert!(diags.is_empty(), "unexpected diagnostics: {diags:#?}");
    out
}

fn codes_of(diags: &[Diag]) -> Vec<&'static str> {
    diags.iter().filter_map(|diag| diag.code).collect()
}

#[test]
fn prefixes_top_level_literal_operands() {
    assert_eq!(rewrite("\tcmp.w 10, d0\n"), "\tcmp.w #10, d0\n");
    assert_eq!(rewrite("\tmove.l 4, 8(a0)\n"), "\tmove.l #4, 8(a0)\n");
    assert_eq!(rewrite("\tmove.w [4, a0], d0\n"), "\tmove.w (4, a0), d0\n");
    assert_eq!(rewrite("\tpush__regs 4, d0\n"), "\tpush__regs 4, d0\n");
    assert_eq!(rewrite("\tbne 1b\n"), "\tbne 1b\n");
}

#[test]
fn converts_indirect_brackets() {
    assert_eq!(
        rewrite("\tmove.l [a0+], [-a1]\n"),
        "\tmove.l (a0)+, -(a1)\n"
    );
    assert_eq!(rewrite("\tlea 8[a6], a0\n"), "\tlea 8(a6), a0\n");
    assert_eq!(rewrite("\tmove.l [a0, 42], d0\n"), "\tmove.l (a0, 42), d0\n");
}

#[test]
fn leaves_mid_line_braces_alone() {
    assert_eq!(rewrite("\tbfextu d0{4:8}, d1\n"), "\tbfextu d0{4:8}, d1\n");
}

#[test]
fn qualifies_nested_labels_and_restores_parent_scope() {
    let input = "\
a: {
  bra .done
  x: {
.n: dbra d0, .n
    bra .done
  }
.done: rts
}
";
    let expected = "\
#define scope a
a:

  bra a$done
#define scope a$x
a$x:

a$x$n: dbra d0, a$x$n
    bra a$done
#undef scope
#define scope a

a$done: rts
#undef scope

";
    assert_eq!(rewrite(input), expected);
}

#[test]
fn child_scope_name_is_a_label_of_its_parent() {
    let input = "outer: {\n  jsr .inner\n  inner: {\n  }\n}\n";
    let out = rewrite(input);
    assert!(out.contains("  jsr outer$inner\n"), "{out}");
}

#[test]
fn root_level_local_references_pass_through() {
    assert_eq!(rewrite("\tbra .x\n.x:\trts\n"), "\tbra .x\n.x:\trts\n");
}

#[test]
fn unknown_local_reference_binds_to_current_scope() {
    let out = rewrite("f: {\n  bra .nowhere\n}\n");
    assert!(out.contains("  bra f$nowhere\n"), "{out}");
}

#[test]
fn child_definition_does_not_capture_parent_reference() {
    let input = "f: {\n  bra .later\n  g: {\n.later: nop\n  }\n  bra .later\n}\n";
    let out = rewrite(input);
    assert_eq!(out.matches("  bra f$later\n").count(), 2, "{out}");
    assert!(out.contains("f$g$later: nop\n"), "{out}");
}

#[test]
fn nested_scopes_on_one_line_close_exactly_once() {
    let out = rewrite("a: { x: { } }\n");
    assert_eq!(
        out,
        "#define scope a\na:\n#define scope a$x\na$x:\n\
         #undef scope\n#define scope a\n#undef scope\n\n"
    );
    assert_eq!(out.matches("#undef scope\n").count(), 2);

    let out = rewrite("a: { x: { .n: bra .n } }\n");
    assert_eq!(out.matches("#undef scope\n").count(), 2, "{out}");
    assert!(out.contains(" a$x$n: bra a$x$n\n#undef scope\n"), "{out}");
}

#[test]
fn closing_brace_may_follow_a_statement() {
    assert_eq!(
        rewrite("a: {\n.n: rts }\n"),
        "#define scope a\na:\n\na$n: rts\n#undef scope\n\n"
    );
    assert_eq!(
        rewrite("a: {\n  b: {\n.n: rts } ; leave both\n}\n\tnop\n"),
        "#define scope a\na:\n\n#define scope a$b\na$b:\n\n\
         a$b$n: rts\n#undef scope\n#define scope a\n ; leave both\n#undef scope\n\n\tnop\n"
    );
}

#[test]
fn trailing_brace_at_root_is_a_stray_close() {
    let (out, diags) = rewrite_source_text("\trts }\n", &bare_options());
    assert_eq!(out, "\trts }\n");
    assert_eq!(codes_of(&diags), vec![codes::UNBALANCED_CLOSE]);
}

#[test]
fn aliases_are_scoped_and_chased() {
    let input = "\
f: {
  move.l 0, ptr@a0
  move.l [ptr], d0
  add.l cnt = d1, d0
  .set n = ptr
}
  move.l ptr, d1
";
    let expected = "\
#define scope f
f:

  move.l #0, a0
  move.l (a0), d0
  add.l d1, d0
  .set n = a0
#undef scope

  move.l ptr, d1
";
    assert_eq!(rewrite(input), expected);
}

#[test]
fn aliases_read_through_to_enclosing_scopes() {
    let out = rewrite("f: {\n  clr.l cnt@d0\n  {\n    addq.l 1, cnt\n  }\n}\n");
    assert!(out.contains("    addq.l #1, d0\n"), "{out}");
}

#[test]
fn line_leading_equate_is_left_to_the_assembler() {
    assert_eq!(rewrite("size = count\n"), "size = count\n");
}

#[test]
fn alias_cycle_is_a_hard_failure() {
    let (_, diags) = rewrite_source_text(
        "f: {\n  move foo@bar, d0\n  move bar@foo, d1\n}\n",
        &bare_options(),
    );
    assert!(has_errors(&diags));
    assert_eq!(codes_of(&diags), vec![codes::ALIAS_CYCLE]);

    let (_, diags) = rewrite_source_text("  move x@x, d0\n", &bare_options());
    assert_eq!(codes_of(&diags), vec![codes::ALIAS_CYCLE]);
}

#[test]
fn sigils_expand_to_templates() {
    assert_eq!(
        rewrite("\tmove.l @src, $tmp\n"),
        "\tmove.l ARG(src), VAR(tmp)\n"
    );
}

#[test]
fn escapes_pass_through_without_evaluator() {
    assert_eq!(rewrite("\tmove.w `WIDTH`, d0\n"), "\tmove.w `WIDTH`, d0\n");
}

#[test]
fn escapes_are_spliced_from_the_evaluator() {
    let mut defines = DefineTable::new();
    defines.define("WIDTH", "320");
    let mut preprocessor = Preprocessor::new(bare_options()).with_evaluator(defines);

    let rewritten = preprocessor
        .rewrite_named_text("t.s", "\tmove.w `WIDTH`, d0\n")
        .expect("rewrite succeeds");
    assert_eq!(rewritten.text, "\tmove.w 320, d0\n");

    let diags = preprocessor
        .rewrite_named_text("u.s", "\tmove.w `HEIGHT`, d0\n")
        .expect_err("undefined escape fails");
    assert_eq!(codes_of(&diags), vec![codes::EVAL_FAILED]);
}

#[test]
fn closure_evaluators_are_accepted() {
    let mut preprocessor = Preprocessor::new(bare_options())
        .with_evaluator(|payload: &str| Ok::<_, EvalError>(payload.trim().to_uppercase()));
    let rewritten = preprocessor
        .rewrite_named_text("t.s", "\t.ascii `hi`\n")
        .expect("rewrite succeeds");
    assert_eq!(rewritten.text, "\t.ascii HI\n");
}

#[test]
fn anonymous_counter_restarts_per_file_by_default() {
    let mut preprocessor = Preprocessor::new(bare_options());
    let first = preprocessor
        .rewrite_named_text("a.s", "{\n}\n")
        .expect("first file");
    let second = preprocessor
        .rewrite_named_text("b.s", "{\n}\n")
        .expect("second file");

    assert_eq!(
        first.text,
        "#define scope __anon1\n__anon1:\n\n#undef scope\n\n"
    );
    assert_eq!(second.text, first.text);
}

#[test]
fn anonymous_counter_can_span_the_batch() {
    let mut preprocessor = Preprocessor::new(RewriteOptions {
        anon_counter: CounterScope::PerBatch,
        ..bare_options()
    });
    preprocessor
        .rewrite_named_text("a.s", "{\n}\n{\n}\n")
        .expect("first file");
    let second = preprocessor
        .rewrite_named_text("b.s", "{\n}\n")
        .expect("second file");

    assert!(second.text.starts_with("#define scope __anon3\n"), "{}", second.text);
}

#[test]
fn stray_close_warns_and_passes_through() {
    let (out, diags) = rewrite_source_text("}\n\tnop\n", &bare_options());
    assert_eq!(out, "}\n\tnop\n");
    assert!(!has_errors(&diags));
    assert_eq!(codes_of(&diags), vec![codes::UNBALANCED_CLOSE]);
}

#[test]
fn stray_close_fails_with_strict_braces() {
    let options = RewriteOptions {
        unbalanced_close: UnbalancedClose::Error,
        ..bare_options()
    };
    let (_, diags) = rewrite_source_text("}\n", &options);
    assert!(has_errors(&diags));
    assert_eq!(codes_of(&diags), vec![codes::UNBALANCED_CLOSE]);
}

#[test]
fn unclosed_scopes_are_closed_at_end_of_input() {
    let (out, diags) = rewrite_source_text("a: {\n  b: {\n\tnop", &bare_options());
    assert_eq!(
        out,
        "#define scope a\na:\n\n#define scope a$b\na$b:\n\n\tnop\n\
         #undef scope\n#define scope a\n#undef scope\n"
    );
    assert_eq!(
        codes_of(&diags),
        vec![codes::UNCLOSED_SCOPE, codes::UNCLOSED_SCOPE]
    );
}

#[test]
fn duplicate_local_label_warns_and_keeps_first() {
    let (out, diags) = rewrite_source_text("a: {\n.x: nop\n.x: nop\n}\n", &bare_options());
    assert_eq!(codes_of(&diags), vec![codes::DUPLICATE_LABEL]);
    assert_eq!(out.matches("a$x: nop\n").count(), 2, "{out}");
}

#[test]
fn line_markers_follow_every_prologue_and_epilogue() {
    let (out, diags) = rewrite_source_text("a: {\n  nop\n}\n", &RewriteOptions::default());
    assert!(diags.is_empty());
    assert_eq!(
        out,
        "#define scope a\na:\n# 1 \"inline.s\"\n\n  nop\n#undef scope\n# 3 \"inline.s\"\n\n"
    );
}

#[test]
fn fn_markers_and_custom_separator() {
    let options = RewriteOptions {
        dialect: Dialect {
            scope_separator: "__".to_string(),
            markers: ScopeMarkers::Fn,
            ..Dialect::default()
        },
        ..bare_options()
    };
    let (out, diags) = rewrite_source_text("a: {\n  x: {\n.n: rts\n  }\n}\n", &options);
    assert!(diags.is_empty());
    assert_eq!(
        out,
        ".fn a\n\n.fn a__x\n\na__x__n: rts\n.endfn\n\n.endfn\n\n"
    );
}

#[test]
fn rewrites_files_from_disk() {
    let temp = tempdir().expect("create tempdir");
    let path = temp.path().join("main.s");
    write_file(&path, "main: {\n\tmoveq 1, d0\n}\n");

    let mut preprocessor = Preprocessor::new(RewriteOptions::default());
    let rewritten = preprocessor.rewrite_path(&path).expect("rewrite succeeds");
    let marker = format!("# 1 \"{}\"\n", path.display());
    assert!(rewritten.text.contains(&marker), "{}", rewritten.text);
    assert!(rewritten.text.contains("\tmoveq #1, d0\n"));
    assert!(rewritten.warnings.is_empty());
}

#[test]
fn missing_file_reports_io_error() {
    let temp = tempdir().expect("create tempdir");
    let mut preprocessor = Preprocessor::new(RewriteOptions::default());
    let diags = preprocessor
        .rewrite_path(&temp.path().join("absent.s"))
        .expect_err("missing file fails");
    assert_eq!(codes_of(&diags), vec![codes::IO]);
}

fn write_file(path: &Path, text: &str) {
    fs::write(path, text).expect("write test file");
}
