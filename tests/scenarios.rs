use oovm::image::{binary_format::BinaryFormat, text_format::TextFormat, ImageFormat};
use oovm::{loader, ExitStatus, Interpreter, Program, StreamConsole, VmConfig, VmError};

type TestConsole = StreamConsole<&'static [u8], Vec<u8>>;

fn program(source: &str) -> Program {
    loader::load(&TextFormat::parse(source).unwrap()).unwrap()
}

fn boot<'p>(program: &'p Program, config: VmConfig, input: &'static str) -> Interpreter<'p, TestConsole> {
    Interpreter::boot(program, config, StreamConsole::new(input.as_bytes(), Vec::new())).unwrap()
}

fn output(interp: Interpreter<TestConsole>) -> String {
    let (_, out) = interp.into_console().into_inner();
    String::from_utf8(out).unwrap()
}

fn run(source: &str) -> (Result<ExitStatus, VmError>, String) {
    run_with_input(source, "")
}

fn run_with_input(source: &str, input: &'static str) -> (Result<ExitStatus, VmError>, String) {
    let program = program(source);
    let mut interp = boot(&program, VmConfig::default(), input);
    let result = interp.run_main();
    (result, output(interp))
}

#[test]
fn write_int_of_a_sum() {
    let (result, out) = run(r#"
!Method: Main!
    ldc_i4 1
    ldc_i4 2
    add
    call -3
    ret
!Main: 0!
"#);
    assert_eq!(result.unwrap(), ExitStatus::Completed);
    assert_eq!(out, "3");
}

const COUNT_TO_FIVE: &str = r#"
; i = 0; while (i < 5) { i = i + 1; WriteInt(i); }
!Method: Main locals: -3!
    ldc_i4 0
    stloc 0
:top
    ldloc 0
    ldc_i4 5
    clt
    brfalse :done
    ldloc 0
    ldc_i4 1
    add
    dup
    stloc 0
    call -3
    br :top
:done
    ret
!Main: 0!
"#;

#[test]
fn while_loop_counts() {
    let (result, out) = run(COUNT_TO_FIVE);
    assert_eq!(result.unwrap(), ExitStatus::Completed);
    assert_eq!(out, "12345");
}

#[test]
fn array_store_then_load() {
    let (result, out) = run(r#"
!Array: -3!
!Method: Main locals: 0!
    ldc_i4 10
    newarr 0
    stloc 0
    ldloc 0
    ldc_i4 3
    ldc_i4 5
    stelem
    ldloc 0
    ldc_i4 3
    ldelem
    call -3
    ret
!Main: 0!
"#);
    assert_eq!(result.unwrap(), ExitStatus::Completed);
    assert_eq!(out, "5");
}

#[test]
fn virtual_dispatch_uses_the_runtime_class() {
    let (result, out) = run(r#"
!Class: A methods: 0!
!Class: B base: 0 methods: 1!
!Method: f returns: -3!
    ldc_i4 1
    ret
!Method: f returns: -3!
    ldc_i4 2
    ret
!Method: Main locals: 0!
    ; A a = new B();
    newobj 1
    stloc 0
    ldloc 0
    callvirt 0
    call -3
    newobj 0
    callvirt 0
    call -3
    ; a non-virtual call binds to the named method
    ldloc 0
    call 0
    call -3
    ret
!Main: 2!
"#);
    assert_eq!(result.unwrap(), ExitStatus::Completed);
    assert_eq!(out, "211");
}

#[test]
fn arguments_and_receivers_reach_the_callee() {
    let (result, out) = run(r#"
!Class: Counter fields: -3 methods: 0!
!Method: bump returns: -3 params: -3!
    ldthis
    ldthis
    ldfld 0.0
    ldarg 0
    add
    stfld 0.0
    ldthis
    ldfld 0.0
    ret
!Method: Main locals: 0!
    newobj 0
    stloc 0
    ldloc 0
    ldc_i4 40
    callvirt 0
    pop
    ldloc 0
    ldc_i4 2
    callvirt 0
    call -3
    ret
!Main: 1!
"#);
    assert_eq!(result.unwrap(), ExitStatus::Completed);
    assert_eq!(out, "42");
}

#[test]
fn unbounded_recursion_exhausts_the_call_stack() {
    let (result, _) = run(r#"
!Method: Recurse!
    call 0
    ret
!Method: Main!
    call 0
    ret
!Main: 1!
"#);
    assert!(matches!(result, Err(VmError::ResourceExhausted(_))));
}

#[test]
fn indexing_at_length_is_out_of_range() {
    let (result, out) = run(r#"
!Array: -3!
!Method: Main locals: 0!
    ldc_i4 3
    newarr 0
    stloc 0
    ldloc 0
    ldlen
    call -3
    ldloc 0
    ldloc 0
    ldlen
    ldelem
    call -3
    ret
!Main: 0!
"#);
    assert!(matches!(
        result,
        Err(VmError::IndexOutOfRange { index: 3, length: 3 })
    ));
    assert_eq!(out, "3");
}

#[test]
fn negative_array_length_is_rejected() {
    let (result, _) = run(r#"
!Array: -1!
!Method: Main!
    ldc_i4 -1
    newarr 0
    pop
    ret
!Main: 0!
"#);
    assert!(matches!(result, Err(VmError::IndexOutOfRange { index: -1, .. })));
}

const LINKED_LIST: &str = r#"
!Class: Node fields: 0 -3!
; locals: head, cursor, i, sum
!Method: Main locals: 0 0 -3 -3!
    ldc_i4 1
    stloc 2
:build
    ldloc 2
    ldc_i4 10
    cle
    brfalse :churn_setup
    newobj 0
    stloc 1
    ldloc 1
    ldloc 0
    stfld 0.0
    ldloc 1
    ldloc 2
    stfld 0.1
    ldloc 1
    stloc 0
    ldloc 2
    ldc_i4 1
    add
    stloc 2
    br :build
:churn_setup
    ldc_i4 0
    stloc 2
:churn
    ldloc 2
    ldc_i4 500
    clt
    brfalse :sum
    newobj 0
    pop
    ldloc 2
    ldc_i4 1
    add
    stloc 2
    br :churn
:sum
    ldloc 0
    stloc 1
:walk
    ldloc 1
    ldnull
    ceq
    brtrue :done
    ldloc 3
    ldloc 1
    ldfld 0.1
    add
    stloc 3
    ldloc 1
    ldfld 0.0
    stloc 1
    br :walk
:done
    ldloc 3
    call -3
    ret
!Main: 0!
"#;

#[test]
fn reachable_objects_survive_collection_under_pressure() {
    let program = program(LINKED_LIST);
    let config = VmConfig {
        heap_size: 1024,
        ..VmConfig::default()
    };
    let mut interp = boot(&program, config, "");
    assert_eq!(interp.run_main().unwrap(), ExitStatus::Completed);
    assert!(interp.memory().stats().collections > 0);
    assert_eq!(output(interp), "55");
}

#[test]
fn live_data_larger_than_the_heap_is_exhaustion() {
    let program = program(LINKED_LIST);
    let config = VmConfig {
        heap_size: 128,
        ..VmConfig::default()
    };
    let mut interp = boot(&program, config, "");
    assert!(matches!(
        interp.run_main(),
        Err(VmError::ResourceExhausted(_))
    ));
}

#[test]
fn locals_are_roots_until_their_frame_returns() {
    let program = program(r#"
!Class: Node fields: 0 -3!
!Method: Main locals: 0!
    newobj 0
    stloc 0
    ret
!Main: 0!
"#);
    let mut interp = boot(&program, VmConfig::default(), "");
    interp.start(program.entry()).unwrap();
    interp.cycle().unwrap();
    interp.cycle().unwrap();

    let held = interp.roots();
    assert_eq!(held.len(), 1);
    let report = interp.collect_garbage().unwrap();
    assert_eq!((report.marked, report.freed_blocks), (1, 0));
    assert!(interp.memory().is_allocated(held[0]));

    assert_eq!(interp.cycle().unwrap(), None);
    assert!(interp.frames().is_empty());
    let report = interp.collect_garbage().unwrap();
    assert_eq!((report.marked, report.freed_blocks), (0, 1));
    assert!(!interp.memory().is_allocated(held[0]));
    assert_eq!(interp.memory().free_bytes(), interp.memory().capacity());
}

#[test]
fn overwritten_local_is_reclaimed_while_its_frame_lives() {
    let program = program(r#"
!Class: Node fields: 0 -3!
!Method: Main locals: 0!
    newobj 0
    stloc 0
    ldnull
    stloc 0
    ret
!Main: 0!
"#);
    let mut interp = boot(&program, VmConfig::default(), "");
    interp.start(program.entry()).unwrap();
    interp.cycle().unwrap();
    interp.cycle().unwrap();
    let held = interp.roots();
    assert_eq!(held.len(), 1);
    let report = interp.collect_garbage().unwrap();
    assert_eq!((report.marked, report.freed_blocks), (1, 0));

    interp.cycle().unwrap();
    interp.cycle().unwrap();
    assert_eq!(interp.frames().len(), 1);
    assert!(interp.roots().is_empty());
    let report = interp.collect_garbage().unwrap();
    assert_eq!((report.marked, report.freed_blocks), (0, 1));
    assert!(!interp.memory().is_allocated(held[0]));
    assert_eq!(interp.frames().len(), 1);
}

#[test]
fn console_input_is_read_and_interned() {
    let (result, out) = run_with_input(
        r#"
!Method: Main locals: -4!
    call -6
    ldc_i4 2
    mul
    call -3
    call -5
    call -2
    call -7
    stloc 0
    ldloc 0
    call -4
    ldloc 0
    ldstr "hello world"
    ceq
    ldc_b true
    ceq
    brfalse :end
    ldc_c '!'
    call -2
:end
    ret
!Main: 0!
"#,
        "21 hello world\n",
    );
    assert_eq!(result.unwrap(), ExitStatus::Completed);
    assert_eq!(out, "42 hello world!");
}

#[test]
fn halt_ends_the_run_through_the_library_entry() {
    let image = TextFormat::parse(
        r#"
!Method: Main!
    ldstr "bye"
    call -1
    ret
!Main: 0!
"#,
    )
    .unwrap();
    let console = StreamConsole::new(&b""[..], Vec::new());
    let status = oovm::run(&image, VmConfig::default(), console).unwrap();
    assert_eq!(status, ExitStatus::Halted("bye".to_owned()));
}

#[test]
fn both_formats_carry_the_same_program() {
    let image = TextFormat::parse(COUNT_TO_FIVE).unwrap();

    let mut binary = Vec::new();
    BinaryFormat::write(&mut binary, &image).unwrap();
    let from_binary = BinaryFormat::read(&binary[..]).unwrap();
    assert_eq!(from_binary, image);

    let text = TextFormat::to_text(&from_binary).unwrap();
    let from_text = TextFormat::parse(&text).unwrap();
    assert_eq!(from_text, image);

    let program = loader::load(&from_text).unwrap();
    let mut interp = boot(&program, VmConfig::default(), "");
    interp.run_main().unwrap();
    assert_eq!(output(interp), "12345");
}

#[test]
fn malformed_images_never_run() {
    for source in &[
        // entry point out of range
        "!Method: Main!\n    ret\n!Main: 3!\n",
        // inheritance cycle
        "!Class: A base: 1!\n!Class: B base: 0!\n!Method: Main!\n    ret\n!Main: 0!\n",
        // branch outside the method
        "!Method: Main!\n    br +5\n    ret\n!Main: 0!\n",
    ] {
        let image = TextFormat::parse(source).unwrap();
        assert!(matches!(loader::load(&image), Err(VmError::ImageInvalid(_))));
    }
}
