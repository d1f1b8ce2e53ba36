//! Stand-in for what `prism profile` produces: this file plays the part of
//! an already-patched program, with the `enter`/`leave`/`begin_profile`
//! calls written out by hand instead of injected by the patcher, so the
//! runtime profiler can be exercised without a real source-patching pass.

use prism::prelude::*;

fn repeated(repetition: i32) {
    enter("demo.repeated");
    let _guard = leave_guard();
    tracing::info!(repetition, "repeated");
}

fn random() {
    enter("demo.random");
    let _guard = leave_guard();
}

fn nested() {
    enter("demo.nested");
    let _guard = leave_guard();
    random();
    for i in 1..=1000 {
        repeated(i);
    }
}

fn nested2() {
    enter("demo.nested2");
    let _guard = leave_guard();
    random();
    for i in 1..=1000 {
        repeated(i);
    }
    nested();
}

fn nest_deeply(depth: usize) {
    enter("demo.nest_deeply");
    let _guard = leave_guard();
    if depth == 0 {
        return;
    }
    nest_deeply(depth - 1);
}

fn request() {
    begin_profile("demo.request");
    let _guard = end_profile_guard();
    nested();
    repeated(-1);
    repeated(-2);
    nest_deeply(100);
    nested2();
}

fn main() {
    tracing_subscriber::fmt().with_target(false).init();

    let output_dir = std::env::temp_dir().join("prism-demo-profiles");
    init(FileSink::new(&output_dir), Some("nested-demo".to_string()))
        .expect("profiler init failed");

    request();

    shutdown().expect("profiler shutdown failed");
    println!("wrote profile(s) to {}", output_dir.display());
}
